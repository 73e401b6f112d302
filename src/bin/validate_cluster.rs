use std::env;

use tonic::Request;

use chord_dht::threads::chord::chord_proto::{Empty, FingerEntryMsg, NodeSummaryMsg};
use chord_dht::threads::chord::connect;
use chord_dht::utils::types::HashPos;

/// Connects to every given node (the nodes must run with --dev-mode),
/// pulls their summaries and checks the ring invariants: predecessor
/// chain, successor lists and finger targets.
#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() == 1 {
        panic!("Provide at least one node address")
    }

    let mut node_summaries: Vec<NodeSummaryMsg> = Vec::new();
    for address in args.iter().skip(1) {
        let mut client = connect(address).await.unwrap();
        let summary = client
            .get_node_summary(Request::new(Empty {}))
            .await
            .unwrap()
            .get_ref()
            .clone();
        node_summaries.push(summary);
    }

    node_summaries.sort_by_key(|summary| to_pos(&summary.pos));
    let node_positions: Vec<HashPos> = node_summaries.iter().map(|summary| to_pos(&summary.pos)).collect();

    let mut is_valid = true;

    // check predecessors: each node must be its ring neighbor's predecessor
    for i in 0..node_summaries.len() {
        let current_node = &node_summaries[i].address;
        let next = &node_summaries[(i + 1) % node_summaries.len()];
        match next.predecessor.as_ref() {
            Some(predecessor) if predecessor.address.eq(current_node) => {}
            Some(predecessor) => {
                eprintln!("Node {} has wrong predecessor: {}", next.address, predecessor.address);
                is_valid = false;
            }
            None => {
                eprintln!("Node {} has no predecessor", next.address);
                is_valid = false;
            }
        }
    }

    // validate finger entries against the actually responsible nodes
    for summary in node_summaries.iter() {
        let own_pos = to_pos(&summary.pos);
        // m is carried implicitly by the id width
        let ring_bits = summary.id.len() as u32 * 4;
        for (i, finger) in summary.finger_entries.iter().enumerate() {
            let target = (own_pos + (1u128 << i)) % (1u128 << ring_bits);
            let responsible_pos = get_responsible_node_for_pos(target, &node_positions);
            if finger_pos(finger).ne(&responsible_pos) {
                eprintln!("-----");
                eprintln!("Node ({}, {}): Wrong finger entry!", own_pos, summary.address);
                eprintln!("{}-th finger points to node ({}, {})", i, finger_pos(finger), finger.address);
                eprintln!("But node at {} is responsible for {}", responsible_pos, target);
                eprintln!("-----");
                is_valid = false;
            }
        }
    }

    // validate successor lists
    for (i, summary) in node_summaries.iter().enumerate() {
        for (j, successor_according_to_list) in summary.successor_list.iter().enumerate() {
            let actual_successor_address = &node_summaries[(i + j + 1) % node_summaries.len()].address;
            if successor_according_to_list.address.ne(actual_successor_address) {
                eprintln!("-----");
                eprintln!("Node ({}, {}): Wrong successor list!", to_pos(&summary.pos), summary.address);
                eprintln!(
                    "Actual successor address: {}, but was {}",
                    actual_successor_address, successor_according_to_list.address
                );
                eprintln!("-----");
                is_valid = false;
            }
        }
    }

    if is_valid {
        eprintln!("Looks good!")
    } else {
        eprintln!("Cluster is invalid!")
    }
}

fn get_responsible_node_for_pos(target: HashPos, node_positions: &Vec<HashPos>) -> HashPos {
    *node_positions
        .iter()
        .filter(|&pos| target <= *pos)
        .min()
        .unwrap_or(node_positions.iter().min().unwrap())
}

fn to_pos(bytes: &[u8]) -> HashPos {
    HashPos::from_be_bytes(bytes.try_into().unwrap())
}

fn finger_pos(finger: &FingerEntryMsg) -> HashPos {
    to_pos(&finger.pos)
}
