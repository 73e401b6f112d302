use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::oneshot::Receiver;
use tokio::time::sleep;
use tonic::transport::Channel;
use tonic::{Request, Response, Status};

use crate::kv::KvStore;
use crate::node::finger_entry::FingerEntry;
use crate::node::finger_table::FingerTable;
use crate::node::successor_list::SuccessorList;
use crate::threads::chord::chord_proto::chord_client::ChordClient;
use crate::threads::chord::chord_proto::{
    Empty, FindKeyRequest, FindKeyResponse, FindSuccessorResponse, GetAllRequest, GetAllResponse,
    GetKvStoreSizeResponse, GetPredAndSuccListResponse, HashPosMsg, NodeSummaryMsg, NotifyRequest,
    PingResponse, PutKeyRequest, PutKeyResponse, SaveKeyRequest, SaveKeyResponse,
};
use crate::utils::config::Config;
use crate::utils::constants::{
    CONNECTION_RETRY_UPON_FAILURE_MILLIS, DEBUG_RPCS_UNAVAILABLE_ERROR_MESSAGE,
    MAX_CONNECTION_RETRIES, REPLICATION_COUNT, RPC_TIMEOUT_MILLIS,
};
use crate::utils::crypto::{hash, is_between, ring_bits, ring_size};
use crate::utils::tls::client_tls_config;
use crate::utils::types::{Address, HashPos};

pub mod chord_proto {
    tonic::include_proto!("chord");
}

/// The struct representing the running node.
pub struct ChordService {
    /// gRPC address of the node
    address: Address,
    /// hex identifier of the node
    id: String,
    /// position in the hash ring
    pos: HashPos,
    /// data structure containing routing information
    finger_table: Arc<Mutex<FingerTable>>,
    /// predecessor handle
    predecessor_option: Arc<Mutex<Option<FingerEntry>>>,
    /// list of the next max_succ successors
    successor_list: Arc<Mutex<SuccessorList>>,
    /// key value storage
    kv_store: Arc<Mutex<KvStore>>,
    /// round-robin pointer to the finger updated by the fix_fingers procedure
    fix_finger_index: Arc<Mutex<usize>>,
    /// flag that enables debugging RPCs
    dev_mode: bool,
}

/// connection helper functions

pub async fn connect(address: &Address) -> Result<ChordClient<Channel>, Status> {
    let tls = client_tls_config()
        .map_err(|e| Status::internal(format!("Loading TLS material failed: {}", e)))?;
    let endpoint = Channel::from_shared(format!("https://{}", address))
        .map_err(|e| Status::invalid_argument(format!("Invalid peer address {}: {}", address, e)))?
        .tls_config(tls)
        .map_err(|e| Status::internal(format!("TLS configuration rejected: {}", e)))?
        .connect_timeout(Duration::from_millis(RPC_TIMEOUT_MILLIS))
        .timeout(Duration::from_millis(RPC_TIMEOUT_MILLIS));
    match endpoint.connect().await {
        Ok(channel) => Ok(ChordClient::new(channel)),
        Err(e) => Err(Status::unavailable(format!("Peer {} unreachable: {}", address, e))),
    }
}

pub async fn connect_with_retry(address: &Address) -> Result<ChordClient<Channel>, Status> {
    let mut retries = 0;
    loop {
        match connect(address).await {
            Ok(client) => return Ok(client),
            Err(e) => {
                retries += 1;
                if retries > MAX_CONNECTION_RETRIES {
                    return Err(Status::unavailable("Reached maximum number of connection retries"));
                }
                warn!("Failed to connect to {}: {}. Retrying...", address, e);
                sleep(Duration::from_millis(CONNECTION_RETRY_UPON_FAILURE_MILLIS)).await;
            }
        }
    }
}

/// peer-to-peer call wrappers, failures are values here

pub(crate) async fn rpc_ask_for_succ(next_node: &FingerEntry, target: HashPos) -> (bool, Option<FingerEntry>) {
    let mut client = match connect(&next_node.address).await {
        Ok(client) => client,
        Err(e) => {
            error!("find_successor on {} failed: {}", next_node.address, e);
            return (false, None);
        }
    };
    match client.find_successor(Request::new(target.into())).await {
        Ok(response) => {
            let response = response.into_inner();
            (response.found, response.node.map(|msg| msg.into()))
        }
        Err(e) => {
            error!("find_successor on {} failed: {}", next_node.address, e);
            (false, None)
        }
    }
}

pub(crate) async fn rpc_get_pred_and_succlist(
    address: &Address,
) -> Result<(Option<FingerEntry>, Vec<FingerEntry>), Status> {
    let mut client = connect(address).await?;
    let response = client.get_pred_and_succ_list(Request::new(Empty {})).await?.into_inner();
    let predecessor = response.predecessor.map(|msg| msg.into());
    let successors = response.successors.into_iter().map(|msg| msg.into()).collect();
    Ok((predecessor, successors))
}

pub(crate) async fn rpc_ping(address: &Address) -> bool {
    match connect(address).await {
        Ok(mut client) => match client.ping(Request::new(Empty {})).await {
            Ok(response) => response.into_inner().msg == "pong",
            Err(e) => {
                error!("ping on {} failed: {}", address, e);
                false
            }
        },
        Err(e) => {
            error!("ping on {} failed: {}", address, e);
            false
        }
    }
}

pub(crate) async fn rpc_notify(address: &Address, own_entry: &FingerEntry) {
    let mut client = match connect(address).await {
        Ok(client) => client,
        Err(e) => {
            debug!("notify on {} failed: {}", address, e);
            return;
        }
    };
    if let Err(e) = client
        .notify(Request::new(NotifyRequest { node: Some(own_entry.into()) }))
        .await
    {
        debug!("notify on {} failed: {}", address, e);
    }
}

pub(crate) async fn rpc_save_key(node: &FingerEntry, key: &str, value: &[u8], ttl: u64) -> bool {
    let mut client = match connect(&node.address).await {
        Ok(client) => client,
        Err(e) => {
            error!("save_key on {} failed: {}", node.address, e);
            return false;
        }
    };
    let request = SaveKeyRequest {
        key: key.to_string(),
        value: value.to_vec(),
        ttl,
    };
    match client.save_key(Request::new(request)).await {
        Ok(response) => response.into_inner().ok,
        Err(e) => {
            error!("save_key on {} failed: {}", node.address, e);
            false
        }
    }
}

pub(crate) async fn rpc_find_key(node: &FingerEntry, key: &str, hops: i32, is_replica: bool) -> Option<Vec<u8>> {
    let mut client = match connect(&node.address).await {
        Ok(client) => client,
        Err(e) => {
            error!("find_key on {} failed: {}", node.address, e);
            return None;
        }
    };
    let request = FindKeyRequest {
        key: key.to_string(),
        hops,
        is_replica,
    };
    match client.find_key(Request::new(request)).await {
        Ok(response) => {
            let response = response.into_inner();
            if response.found {
                Some(response.value)
            } else {
                None
            }
        }
        Err(e) => {
            error!("find_key on {} failed: {}", node.address, e);
            None
        }
    }
}

pub(crate) async fn rpc_get_all(address: &Address, pos: HashPos) -> Result<(Vec<String>, Vec<Vec<u8>>), Status> {
    let mut client = connect(address).await?;
    let response = client.get_all(Request::new(GetAllRequest { pos: pos.to_be_bytes().to_vec() })).await?.into_inner();
    Ok((response.keys, response.values))
}

impl ChordService {
    pub async fn new(
        rx: Receiver<(
            Arc<Mutex<FingerTable>>,
            Arc<Mutex<Option<FingerEntry>>>,
            Arc<Mutex<SuccessorList>>,
            Arc<Mutex<KvStore>>,
        )>,
        url: &Address,
        dev_mode: bool,
    ) -> ChordService {
        let (finger_table_arc, predecessor_option_arc, successor_list_arc, kv_store_arc) =
            rx.await.unwrap();
        let hashed = hash(url.as_bytes());
        ChordService {
            address: url.clone(),
            id: hashed.hex,
            pos: hashed.pos,
            finger_table: finger_table_arc,
            predecessor_option: predecessor_option_arc,
            successor_list: successor_list_arc,
            kv_store: kv_store_arc,
            fix_finger_index: Arc::new(Mutex::new(0)),
            dev_mode,
        }
    }

    fn own_entry(&self) -> FingerEntry {
        FingerEntry {
            address: self.address.clone(),
            id: self.id.clone(),
            pos: self.pos,
        }
    }

    fn get_successor(&self) -> FingerEntry {
        self.successor_list.lock().unwrap().head()
    }

    fn set_successor(&self, new_successor: &FingerEntry) {
        self.successor_list.lock().unwrap().set_head(new_successor);
        self.finger_table.lock().unwrap().set_finger(0, new_successor.clone());
    }

    /// One local step of the lookup: answer with the successor when the
    /// target falls into (self, successor], otherwise hand out the
    /// closest preceding finger, falling back to the successor when no
    /// finger qualifies.
    fn local_successor_step(&self, target: HashPos) -> (bool, FingerEntry) {
        let successor = self.get_successor();
        if is_between(target, self.pos, successor.pos, false, true) {
            return (true, successor);
        }
        let preceding = {
            self.finger_table.lock().unwrap().closest_preceding_node(self.pos, target)
        };
        (false, preceding.unwrap_or(successor))
    }

    /// The full lookup: local step, then iterate over remote answers,
    /// bounded by max_steps. (false, None) is a transient failure to
    /// locate, never "no such key".
    pub(crate) async fn lookup_successor(&self, target: HashPos) -> (bool, Option<FingerEntry>) {
        let (mut found, mut next_node) = self.local_successor_step(target);
        let max_steps = Config::global().max_steps;
        let mut steps = 0;
        while !found && steps < max_steps {
            if next_node.address == self.address {
                // asking ourselves again cannot make progress
                return (false, None);
            }
            let (remote_found, remote_node) = rpc_ask_for_succ(&next_node, target).await;
            match remote_node {
                Some(node) => {
                    found = remote_found;
                    next_node = node;
                }
                None => return (false, None),
            }
            steps += 1;
        }
        if found {
            (true, Some(next_node))
        } else {
            (false, None)
        }
    }
}

#[tonic::async_trait]
impl chord_proto::chord_server::Chord for ChordService {
    /// finds the node responsible for a given position in the hash ring
    async fn find_successor(
        &self,
        request: Request<HashPosMsg>,
    ) -> Result<Response<FindSuccessorResponse>, Status> {
        let target: HashPos = request.into_inner().into();
        let (found, node) = self.lookup_successor(target).await;
        debug!("Received find_successor call for {}, found = {}", target, found);
        Ok(Response::new(FindSuccessorResponse {
            found,
            node: node.map(|entry| entry.into()),
        }))
    }

    /// returns the predecessor handle and the successor list in one shot,
    /// the stabilize procedure needs both
    async fn get_pred_and_succ_list(
        &self,
        _: Request<Empty>,
    ) -> Result<Response<GetPredAndSuccListResponse>, Status> {
        let predecessor = { self.predecessor_option.lock().unwrap().clone() };
        let successors = { self.successor_list.lock().unwrap().successors.clone() };
        Ok(Response::new(GetPredAndSuccListResponse {
            predecessor: predecessor.map(|entry| entry.into()),
            successors: successors.into_iter().map(|entry| entry.into()).collect(),
        }))
    }

    /// Notify call, typically called on the successor by a node that
    /// believes to be its predecessor.
    async fn notify(&self, request: Request<NotifyRequest>) -> Result<Response<Empty>, Status> {
        let caller: FingerEntry = request
            .into_inner()
            .node
            .ok_or_else(|| Status::invalid_argument("notify carries no node reference"))?
            .into();

        let mut predecessor_guard = self.predecessor_option.lock().unwrap();
        let adopt = match *predecessor_guard {
            Some(ref predecessor) => is_between(caller.pos, predecessor.pos, self.pos, false, false),
            None => true,
        };
        if adopt {
            debug!("Updated predecessor to {} due to notify-call", caller.address);
            *predecessor_guard = Some(caller);
        }
        Ok(Response::new(Empty {}))
    }

    /// dummy call, used to check if the receiver node is still available
    async fn ping(&self, _: Request<Empty>) -> Result<Response<PingResponse>, Status> {
        Ok(Response::new(PingResponse { msg: "pong".to_string() }))
    }

    /// verifies this node's successor and tells the successor about this
    /// node, the periodic tick driving the ring towards convergence
    async fn stabilize(&self, _: Request<Empty>) -> Result<Response<Empty>, Status> {
        let successor = self.get_successor();
        match rpc_get_pred_and_succlist(&successor.address).await {
            Ok((pred_option, peer_successors)) => {
                if let Some(pred) = pred_option {
                    let successor_now = self.get_successor();
                    if is_between(pred.pos, self.pos, successor_now.pos, false, false) {
                        debug!("Adopting {} as new successor", pred.address);
                        self.set_successor(&pred);
                    }
                }
                let successor = self.get_successor();
                {
                    self.successor_list.lock().unwrap().refresh(&successor, &peer_successors);
                }
                rpc_notify(&successor.address, &self.own_entry()).await;
            }
            Err(e) => {
                warn!("Successor {} is no longer working ({}), switching to the next one", successor.address, e);
                let promoted = {
                    self.successor_list.lock().unwrap().drop_head(&self.own_entry())
                };
                self.finger_table.lock().unwrap().set_finger(0, promoted.clone());
                info!("Promoted {} to successor", promoted.address);
            }
        }
        Ok(Response::new(Empty {}))
    }

    /// updates the finger table entries one after another in a round
    /// robin fashion by resolving the position each entry points to
    async fn fix_fingers(&self, _: Request<Empty>) -> Result<Response<Empty>, Status> {
        let index = {
            let mut index_guard = self.fix_finger_index.lock().unwrap();
            *index_guard = (*index_guard + 1) % ring_bits() as usize;
            *index_guard
        };
        let target = (self.pos + (1u128 << index)) % ring_size();
        debug!("Fixing finger entry {} pointing at {}", index, target);

        let (found, node_option) = self.lookup_successor(target).await;
        match node_option {
            Some(node) if found => {
                let mut finger_table_guard = self.finger_table.lock().unwrap();
                if finger_table_guard.fingers[index] != node {
                    finger_table_guard.set_finger(index, node.clone());
                    // a single resolution often settles higher slots too,
                    // as long as their target stays below the found node
                    for i in index + 1..ring_bits() as usize {
                        let higher_target = (self.pos + (1u128 << i)) % ring_size();
                        if is_between(higher_target, self.pos, node.pos, false, false) {
                            finger_table_guard.set_finger(i, node.clone());
                        }
                    }
                }
            }
            _ => warn!("No suitable node found to fix finger {}", index),
        }
        Ok(Response::new(Empty {}))
    }

    /// pings the predecessor and clears the handle when it stopped responding
    async fn check_predecessor(&self, _: Request<Empty>) -> Result<Response<Empty>, Status> {
        let predecessor_option = { self.predecessor_option.lock().unwrap().clone() };
        if let Some(predecessor) = predecessor_option {
            if !rpc_ping(&predecessor.address).await {
                warn!("Predecessor {} stopped responding, clearing it", predecessor.address);
                *self.predecessor_option.lock().unwrap() = None;
            }
        }
        Ok(Response::new(Empty {}))
    }

    /// stores a value under REPLICATION_COUNT + 1 identifiers along the
    /// deterministic replica chain id, hash(id), hash(hash(id)), ...
    async fn put_key(&self, request: Request<PutKeyRequest>) -> Result<Response<PutKeyResponse>, Status> {
        let request = request.into_inner();
        if request.replication as usize != REPLICATION_COUNT {
            debug!(
                "Client asked for {} replicas, the configured count {} applies",
                request.replication, REPLICATION_COUNT
            );
        }

        let mut key = request.key;
        let mut replica_keys = Vec::with_capacity(REPLICATION_COUNT + 1);
        for _ in 0..=REPLICATION_COUNT {
            let dht_key = hash(key.as_bytes());
            let (found, node_option) = self.lookup_successor(dht_key.pos).await;
            let node = match node_option {
                Some(node) if found => node,
                _ => {
                    warn!("Lookup for {} failed, aborting the replica chain", dht_key.hex);
                    return Ok(Response::new(PutKeyResponse { ok: false, replica_keys }));
                }
            };
            info!("Putting key {} on node {}", dht_key.hex, node.address);
            if node.address == self.address {
                self.kv_store.lock().unwrap().put(&dht_key.hex, &request.value, request.ttl);
            } else if !rpc_save_key(&node, &dht_key.hex, &request.value, request.ttl).await {
                warn!("Replica {} was not stored on {}", dht_key.hex, node.address);
            }
            replica_keys.push(dht_key.hex.clone());
            key = dht_key.hex;
        }
        Ok(Response::new(PutKeyResponse { ok: true, replica_keys }))
    }

    /// walks the replica chain looking for a value, first hit wins. The
    /// hop budget bounds network amplification, replica probes stay at a
    /// single identifier.
    async fn find_key(&self, request: Request<FindKeyRequest>) -> Result<Response<FindKeyResponse>, Status> {
        let request = request.into_inner();
        debug!("Finding key {} with {} hops left", request.key, request.hops);
        if request.hops <= 0 {
            return Ok(Response::new(FindKeyResponse { found: false, value: Vec::new() }));
        }

        let probe_count = if request.is_replica { 1 } else { REPLICATION_COUNT + 1 };
        let mut key = request.key;
        for idx in 0..probe_count {
            let dht_key = hash(key.as_bytes());
            let local_hit = { self.kv_store.lock().unwrap().get(&dht_key.hex) };
            if let Some(value) = local_hit {
                return Ok(Response::new(FindKeyResponse { found: true, value }));
            }
            let (found, node_option) = self.lookup_successor(dht_key.pos).await;
            if let Some(node) = node_option {
                // the local store was already probed, only forward to others
                if found && node.address != self.address {
                    debug!("Getting key {} from responsible node {}", dht_key.hex, node.address);
                    if let Some(value) = rpc_find_key(&node, &key, request.hops - 1, idx > 0).await {
                        return Ok(Response::new(FindKeyResponse { found: true, value }));
                    }
                }
            }
            key = dht_key.hex;
        }
        Ok(Response::new(FindKeyResponse { found: false, value: Vec::new() }))
    }

    /// stores a key value pair in this very node's storage
    async fn save_key(&self, request: Request<SaveKeyRequest>) -> Result<Response<SaveKeyResponse>, Status> {
        let request = request.into_inner();
        info!("Saving key {} in my storage", request.key);
        let ok = self.kv_store.lock().unwrap().put(&request.key, &request.value, request.ttl);
        Ok(Response::new(SaveKeyResponse { ok }))
    }

    /// hands over all keys belonging to the range of a joining
    /// predecessor and deletes them locally
    async fn get_all(&self, request: Request<GetAllRequest>) -> Result<Response<GetAllResponse>, Status> {
        let target = HashPos::from_be_bytes(
            request
                .into_inner()
                .pos
                .try_into()
                .map_err(|_| Status::invalid_argument("malformed ring position"))?,
        );

        let predecessor_option = { self.predecessor_option.lock().unwrap().clone() };
        let predecessor = match predecessor_option {
            Some(predecessor) => predecessor,
            None => return Ok(Response::new(GetAllResponse { keys: Vec::new(), values: Vec::new() })),
        };
        if !is_between(target, predecessor.pos, self.pos, false, false) {
            return Ok(Response::new(GetAllResponse { keys: Vec::new(), values: Vec::new() }));
        }

        let (keys, values) = {
            let mut kv_store_guard = self.kv_store.lock().unwrap();
            let (keys, values) = kv_store_guard.range(predecessor.pos, target);
            kv_store_guard.delete(&keys);
            (keys, values)
        };
        info!("Handing over {} keys from ({}, {})", keys.len(), predecessor.pos, target);
        Ok(Response::new(GetAllResponse { keys, values }))
    }

    /// returns a human readable node summary (requires dev_mode = true)
    async fn get_node_summary(&self, _: Request<Empty>) -> Result<Response<NodeSummaryMsg>, Status> {
        if !self.dev_mode {
            return Err(Status::unimplemented(DEBUG_RPCS_UNAVAILABLE_ERROR_MESSAGE));
        }
        let predecessor = { self.predecessor_option.lock().unwrap().clone() };
        let fingers = { self.finger_table.lock().unwrap().fingers.clone() };
        let successors = { self.successor_list.lock().unwrap().successors.clone() };

        Ok(Response::new(NodeSummaryMsg {
            address: self.address.clone(),
            id: self.id.clone(),
            pos: self.pos.to_be_bytes().to_vec(),
            predecessor: predecessor.map(|entry| entry.into()),
            finger_entries: fingers.into_iter().map(|entry| entry.into()).collect(),
            successor_list: successors.into_iter().map(|entry| entry.into()).collect(),
        }))
    }

    /// returns the number of key value pairs stored (requires dev_mode = true)
    async fn get_kv_store_size(&self, _: Request<Empty>) -> Result<Response<GetKvStoreSizeResponse>, Status> {
        if !self.dev_mode {
            return Err(Status::unimplemented(DEBUG_RPCS_UNAVAILABLE_ERROR_MESSAGE));
        }
        Ok(Response::new(GetKvStoreSizeResponse {
            size: self.kv_store.lock().unwrap().len() as u32,
        }))
    }
}
