use std::env;
use std::error::Error;
use std::sync::{Arc, Mutex};

use log::{info, warn};
use tokio::sync::oneshot::Sender;
use tonic::Request;

use crate::kv::KvStore;
use crate::node::finger_entry::FingerEntry;
use crate::node::finger_table::FingerTable;
use crate::node::successor_list::SuccessorList;
use crate::threads::chord::{connect_with_retry, rpc_get_all};
use crate::utils::config::Config;
use crate::utils::constants::HANDOFF_TTL_SECS;
use crate::utils::crypto::ring_bits;
use crate::utils::types::Address;

/// Setup function that distinguishes between two scenarios:
/// 1. The node starts up a new ring (bootstrap_option is None)
/// 2. The node joins an existing ring via the bootstrap node
///
/// Runs exactly once per process. The one-shot channels hand the shared
/// state to the gRPC service and the shutdown thread, so a second join
/// is structurally impossible.
pub async fn setup(
    bootstrap_option: Option<Address>,
    own_grpc_address: &Address,
    tx_grpc_thread: Sender<(
        Arc<Mutex<FingerTable>>,
        Arc<Mutex<Option<FingerEntry>>>,
        Arc<Mutex<SuccessorList>>,
        Arc<Mutex<KvStore>>,
    )>,
    tx_shutdown_handoff: Sender<(Arc<Mutex<KvStore>>, Arc<Mutex<SuccessorList>>, FingerEntry)>,
) -> Result<(), Box<dyn Error>> {
    let own_entry = FingerEntry::from_address(own_grpc_address);
    let max_succ = Config::global().max_succ;

    let secret = env::var("SEC_KEY")
        .map(|key| key.into_bytes())
        .unwrap_or_else(|_| own_entry.id.clone().into_bytes());
    let kv_store_arc = Arc::new(Mutex::new(KvStore::new(secret)));
    let finger_table_arc = Arc::new(Mutex::new(FingerTable::new(ring_bits() as usize)));
    let predecessor_option_arc = Arc::new(Mutex::new(None));

    let successor_list_arc = match bootstrap_option {
        Some(bootstrap_address) => {
            info!("Joining existing ring via {}", bootstrap_address);
            let mut bootstrap_client = connect_with_retry(&bootstrap_address).await?;
            let response = bootstrap_client
                .find_successor(Request::new(own_entry.pos.into()))
                .await?
                .into_inner();
            let successor: FingerEntry = match (response.found, response.node) {
                (true, Some(node)) => node.into(),
                _ => return Err("bootstrap node could not locate a successor".into()),
            };
            info!("Bootstrap assigned successor {}", successor.address);

            finger_table_arc.lock().unwrap().set_all_fingers(&successor);

            // one-shot handoff of the keys this node is now responsible for
            match rpc_get_all(&successor.address, own_entry.pos).await {
                Ok((keys, values)) => {
                    info!("Received {} keys from successor", keys.len());
                    let mut kv_store_guard = kv_store_arc.lock().unwrap();
                    for (key, value) in keys.iter().zip(values.iter()) {
                        kv_store_guard.put(key, value, HANDOFF_TTL_SECS);
                    }
                }
                Err(e) => warn!("Join handoff failed ({}), keys stay reachable via replicas", e),
            }

            Arc::new(Mutex::new(SuccessorList::new(&successor, max_succ)))
        }
        None => {
            info!("Starting up a new ring");
            finger_table_arc.lock().unwrap().set_all_fingers(&own_entry);
            Arc::new(Mutex::new(SuccessorList::new(&own_entry, max_succ)))
        }
    };

    tx_grpc_thread
        .send((
            finger_table_arc.clone(),
            predecessor_option_arc.clone(),
            successor_list_arc.clone(),
            kv_store_arc.clone(),
        ))
        .map_err(|_| "gRPC thread is gone")?;
    tx_shutdown_handoff
        .send((kv_store_arc, successor_list_arc, own_entry))
        .map_err(|_| "shutdown thread is gone")?;
    Ok(())
}
