pub static CONNECTION_RETRY_UPON_FAILURE_MILLIS: u64 = 100;
pub static MAX_CONNECTION_RETRIES: u64 = 15;
pub static RPC_TIMEOUT_MILLIS: u64 = 5_000;

pub static DHT_PUT: u16 = 650;
pub static DHT_GET: u16 = 651;
pub static DHT_SUCCESS: u16 = 652;
pub static DHT_FAILURE: u16 = 653;

/// number of additional copies stored along the replica chain
pub static REPLICATION_COUNT: usize = 3;

/// hop budget for a client-initiated key lookup
pub static FIND_KEY_HOP_LIMIT: i32 = 4;

/// ttl stamped on entries received through the join handoff, the
/// get_all reply carries keys and values only
pub static HANDOFF_TTL_SECS: u64 = 86_400;

/// all node certificates are issued with this SAN
pub static TLS_DOMAIN: &str = "chord-node";

pub static DEBUG_RPCS_UNAVAILABLE_ERROR_MESSAGE: &str = "Debugging RPCs are only available in dev mode";
