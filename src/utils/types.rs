/// gRPC address of a node, "host:port"
pub type Address = String;

/// position in the hash ring
pub type HashPos = u128;

/// unix timestamp in seconds after which a stored value is gone
pub type ExpirationDate = u64;
