use std::error::Error;
use std::sync::{Arc, Mutex};

use log::{info, warn};
use tokio::signal;
use tokio::sync::oneshot::Receiver;

use crate::kv::KvStore;
use crate::node::finger_entry::FingerEntry;
use crate::node::successor_list::SuccessorList;
use crate::threads::chord::rpc_save_key;
use crate::utils::time::now;

/// Waits for ctrl-c and hands the local store over to the successor,
/// which is responsible for this node's range once it is gone.
pub async fn shutdown_handoff(
    rx: Receiver<(Arc<Mutex<KvStore>>, Arc<Mutex<SuccessorList>>, FingerEntry)>,
) -> Result<(), Box<dyn Error>> {
    let (kv_store_arc, successor_list_arc, own_entry) = rx.await?;
    signal::ctrl_c().await?;

    let successor = { successor_list_arc.lock().unwrap().head() };
    if successor.address == own_entry.address {
        info!("Shutting down a ring of one, nothing to hand over");
        return Ok(());
    }

    let pairs = { kv_store_arc.lock().unwrap().snapshot() };
    info!("Shutting down, handing {} keys over to {}", pairs.len(), successor.address);
    let now_secs = now().as_secs();
    for (key, value, expiration_date) in pairs {
        let remaining_ttl = expiration_date.saturating_sub(now_secs);
        if remaining_ttl == 0 {
            continue;
        }
        if !rpc_save_key(&successor, &key, &value, remaining_ttl).await {
            warn!("Could not hand over key {}", key);
        }
    }
    info!("Shutdown handoff finished");
    Ok(())
}
