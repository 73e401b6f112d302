use std::error::Error;
use std::fmt;

use log::{debug, error, info};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tonic::Request;

use crate::threads::chord::chord_proto::{FindKeyRequest, PutKeyRequest};
use crate::threads::chord::connect;
use crate::utils::constants::{DHT_FAILURE, DHT_GET, DHT_PUT, DHT_SUCCESS, FIND_KEY_HOP_LIMIT};
use crate::utils::types::Address;

const HEADER_LEN: usize = 4;
const KEY_LEN: usize = 32;
const PUT_PREFIX_LEN: usize = HEADER_LEN + 4 + KEY_LEN;

/// A decoded client API frame.
#[derive(Debug, PartialEq)]
pub enum ApiRequest {
    Put {
        ttl: u16,
        replication: u8,
        key: [u8; KEY_LEN],
        value: Vec<u8>,
    },
    Get {
        key: [u8; KEY_LEN],
    },
}

#[derive(Debug, PartialEq)]
pub enum FrameError {
    Truncated,
    SizeMismatch { declared: usize, received: usize },
    UnknownType(u16),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::Truncated => write!(f, "frame too short for its message type"),
            FrameError::SizeMismatch { declared, received } => {
                write!(f, "declared size {} but received {} bytes", declared, received)
            }
            FrameError::UnknownType(msg_type) => write!(f, "unknown message type {}", msg_type),
        }
    }
}

impl Error for FrameError {}

/// Parses one length-prefixed frame. The declared size must match the
/// received byte count exactly.
pub fn decode_request(frame: &[u8]) -> Result<ApiRequest, FrameError> {
    if frame.len() < HEADER_LEN {
        return Err(FrameError::Truncated);
    }
    let declared = u16::from_be_bytes([frame[0], frame[1]]) as usize;
    if declared != frame.len() {
        return Err(FrameError::SizeMismatch { declared, received: frame.len() });
    }
    let msg_type = u16::from_be_bytes([frame[2], frame[3]]);

    if msg_type == DHT_PUT {
        if frame.len() < PUT_PREFIX_LEN {
            return Err(FrameError::Truncated);
        }
        let ttl = u16::from_be_bytes([frame[4], frame[5]]);
        let replication = frame[6];
        // frame[7] is reserved
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&frame[8..PUT_PREFIX_LEN]);
        return Ok(ApiRequest::Put {
            ttl,
            replication,
            key,
            value: frame[PUT_PREFIX_LEN..].to_vec(),
        });
    }

    if msg_type == DHT_GET {
        if frame.len() != HEADER_LEN + KEY_LEN {
            return Err(FrameError::Truncated);
        }
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&frame[HEADER_LEN..]);
        return Ok(ApiRequest::Get { key });
    }

    Err(FrameError::UnknownType(msg_type))
}

pub fn encode_success(key: &[u8; KEY_LEN], value: &[u8]) -> Vec<u8> {
    let size = (HEADER_LEN + KEY_LEN + value.len()) as u16;
    let mut frame = Vec::with_capacity(size as usize);
    frame.extend_from_slice(&size.to_be_bytes());
    frame.extend_from_slice(&DHT_SUCCESS.to_be_bytes());
    frame.extend_from_slice(key);
    frame.extend_from_slice(value);
    frame
}

pub fn encode_failure(key: &[u8; KEY_LEN]) -> Vec<u8> {
    let size = (HEADER_LEN + KEY_LEN) as u16;
    let mut frame = Vec::with_capacity(size as usize);
    frame.extend_from_slice(&size.to_be_bytes());
    frame.extend_from_slice(&DHT_FAILURE.to_be_bytes());
    frame.extend_from_slice(key);
    frame
}

/// Serves one client connection. Malformed frames close the connection,
/// everything else is answered with a SUCC or FAIL frame.
pub async fn handle_client_connection(
    mut socket: TcpStream,
    grpc_address: &Address,
) -> Result<(), Box<dyn Error>> {
    loop {
        let mut size_buf = [0u8; 2];
        if socket.read_exact(&mut size_buf).await.is_err() {
            debug!("Client closed the connection");
            return Ok(());
        }
        let size = u16::from_be_bytes(size_buf) as usize;
        if size < HEADER_LEN {
            error!("Frame with impossible size {}, closing connection", size);
            return Ok(());
        }

        let mut frame = vec![0u8; size];
        frame[..2].copy_from_slice(&size_buf);
        socket.read_exact(&mut frame[2..]).await?;

        let request = match decode_request(&frame) {
            Ok(request) => request,
            Err(e) => {
                error!("Rejecting client frame: {}", e);
                return Ok(());
            }
        };

        let response = match request {
            ApiRequest::Put { ttl, replication, key, value } => {
                process_put(grpc_address, ttl, replication, &key, value).await
            }
            ApiRequest::Get { key } => process_get(grpc_address, &key).await,
        };
        socket.write_all(&response).await?;
    }
}

async fn process_put(
    grpc_address: &Address,
    ttl: u16,
    replication: u8,
    key: &[u8; KEY_LEN],
    value: Vec<u8>,
) -> Vec<u8> {
    info!("Received PUT for key {} with ttl {}", hex::encode(key), ttl);
    let mut client = match connect(grpc_address).await {
        Ok(client) => client,
        Err(e) => {
            error!("Local node unreachable: {}", e);
            return encode_failure(key);
        }
    };
    let request = PutKeyRequest {
        key: hex::encode(key),
        value: value.clone(),
        ttl: ttl as u64,
        replication: replication as u32,
    };
    match client.put_key(Request::new(request)).await {
        Ok(response) if response.get_ref().ok => encode_success(key, &value),
        Ok(_) => encode_failure(key),
        Err(e) => {
            error!("put_key failed: {}", e);
            encode_failure(key)
        }
    }
}

async fn process_get(grpc_address: &Address, key: &[u8; KEY_LEN]) -> Vec<u8> {
    info!("Received GET for key {}", hex::encode(key));
    let mut client = match connect(grpc_address).await {
        Ok(client) => client,
        Err(e) => {
            error!("Local node unreachable: {}", e);
            return encode_failure(key);
        }
    };
    let request = FindKeyRequest {
        key: hex::encode(key),
        hops: FIND_KEY_HOP_LIMIT,
        is_replica: false,
    };
    match client.find_key(Request::new(request)).await {
        Ok(response) => {
            let response = response.into_inner();
            if response.found {
                encode_success(key, &response.value)
            } else {
                encode_failure(key)
            }
        }
        Err(e) => {
            error!("find_key failed: {}", e);
            encode_failure(key)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn padded_key(name: &[u8]) -> [u8; KEY_LEN] {
        let mut key = [0u8; KEY_LEN];
        key[..name.len()].copy_from_slice(name);
        key
    }

    fn put_frame(ttl: u16, replication: u8, key: &[u8; KEY_LEN], value: &[u8]) -> Vec<u8> {
        let size = (PUT_PREFIX_LEN + value.len()) as u16;
        let mut frame = Vec::new();
        frame.extend_from_slice(&size.to_be_bytes());
        frame.extend_from_slice(&DHT_PUT.to_be_bytes());
        frame.extend_from_slice(&ttl.to_be_bytes());
        frame.push(replication);
        frame.push(0);
        frame.extend_from_slice(key);
        frame.extend_from_slice(value);
        frame
    }

    #[test]
    fn decodes_a_put_frame() {
        let key = padded_key(b"test_node");
        let frame = put_frame(3600, 0, &key, b"node_val");
        let request = decode_request(&frame).unwrap();
        assert_eq!(
            request,
            ApiRequest::Put { ttl: 3600, replication: 0, key, value: b"node_val".to_vec() }
        );
    }

    #[test]
    fn decodes_a_get_frame() {
        let key = padded_key(b"test_node");
        let mut frame = Vec::new();
        frame.extend_from_slice(&36u16.to_be_bytes());
        frame.extend_from_slice(&DHT_GET.to_be_bytes());
        frame.extend_from_slice(&key);
        assert_eq!(decode_request(&frame).unwrap(), ApiRequest::Get { key });
    }

    #[test]
    fn rejects_a_size_mismatch() {
        let key = padded_key(b"k");
        let mut frame = put_frame(60, 0, &key, b"v");
        frame[1] += 1;
        assert_eq!(
            decode_request(&frame),
            Err(FrameError::SizeMismatch { declared: frame.len() + 1, received: frame.len() })
        );
    }

    #[test]
    fn rejects_an_unknown_message_type() {
        let mut frame = Vec::new();
        frame.extend_from_slice(&4u16.to_be_bytes());
        frame.extend_from_slice(&999u16.to_be_bytes());
        assert_eq!(decode_request(&frame), Err(FrameError::UnknownType(999)));
    }

    #[test]
    fn failure_reply_echoes_the_queried_key() {
        let key = padded_key(b"random_key_23283");
        let frame = encode_failure(&key);
        assert_eq!(frame.len(), 36);
        assert_eq!(&frame[..2], &36u16.to_be_bytes()[..]);
        assert_eq!(&frame[2..4], &DHT_FAILURE.to_be_bytes()[..]);
        assert_eq!(&frame[4..], &key[..]);
    }

    #[test]
    fn success_reply_carries_key_and_value() {
        let key = padded_key(b"found");
        let frame = encode_success(&key, b"value");
        assert_eq!(frame.len(), 4 + 32 + 5);
        assert_eq!(&frame[..2], &((4 + 32 + 5) as u16).to_be_bytes()[..]);
        assert_eq!(&frame[2..4], &DHT_SUCCESS.to_be_bytes()[..]);
        assert_eq!(&frame[4..36], &key[..]);
        assert_eq!(&frame[36..], &b"value"[..]);
    }
}
