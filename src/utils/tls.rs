use std::env;
use std::error::Error;
use std::fs;
use std::path::PathBuf;

use tonic::transport::{Certificate, ClientTlsConfig, Identity, ServerTlsConfig};

use crate::utils::constants::TLS_DOMAIN;

/// Directory holding `ca.pem`, `node.pem` and `node.key`.
pub fn tls_dir() -> PathBuf {
    PathBuf::from(env::var("TLS_DIR").unwrap_or_else(|_| "tls".to_string()))
}

fn load_identity(dir: &PathBuf) -> Result<(Identity, Certificate), Box<dyn Error>> {
    let cert = fs::read_to_string(dir.join("node.pem"))?;
    let key = fs::read_to_string(dir.join("node.key"))?;
    let ca = fs::read_to_string(dir.join("ca.pem"))?;
    Ok((Identity::from_pem(cert, key), Certificate::from_pem(ca)))
}

/// Server side of the mutual TLS setup: own identity plus the CA that
/// peer certificates must chain to.
pub fn server_tls_config() -> Result<ServerTlsConfig, Box<dyn Error>> {
    let dir = tls_dir();
    let (identity, ca) = load_identity(&dir)?;
    Ok(ServerTlsConfig::new().identity(identity).client_ca_root(ca))
}

/// Client side: own identity for the server to verify, the CA to verify
/// the server, and the shared SAN all node certificates are issued with.
pub fn client_tls_config() -> Result<ClientTlsConfig, Box<dyn Error>> {
    let dir = tls_dir();
    let (identity, ca) = load_identity(&dir)?;
    Ok(ClientTlsConfig::new()
        .identity(identity)
        .ca_certificate(ca)
        .domain_name(TLS_DOMAIN))
}
