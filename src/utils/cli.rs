use clap::{ArgAction, Parser};

use crate::utils::types::Address;

#[derive(Parser, Debug)]
#[command(name = "chord-dht", about = "A Chord DHT node")]
pub struct Cli {
    /// host:port for the peer RPC service, overrides the config file
    #[arg(long = "dht-address")]
    pub dht_address: Option<Address>,

    /// host:port for the client API, overrides the config file
    #[arg(long = "api-address")]
    pub api_address: Option<Address>,

    /// address of an existing node to join, a new ring is created if absent
    #[arg(long = "bootstrap-node")]
    pub bootstrap_node: Option<Address>,

    /// whether to serve the client API
    #[arg(long = "start-api", action = ArgAction::Set, default_value_t = true)]
    pub start_api: bool,

    /// path to the ini configuration file
    #[arg(short, long, default_value = "config.ini")]
    pub config: String,

    /// enables the debugging RPCs
    #[arg(long = "dev-mode", default_value_t = false)]
    pub dev_mode: bool,
}
