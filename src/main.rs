use std::error::Error;
use std::process::exit;
use std::time::Duration;

use clap::Parser;
use log::{debug, error, info, warn, LevelFilter};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::sleep;
use tonic::transport::Server;
use tonic::Request;

use chord_dht::threads::chord::chord_proto::chord_server::ChordServer;
use chord_dht::threads::chord::chord_proto::Empty;
use chord_dht::threads::chord::{connect, ChordService};
use chord_dht::threads::setup::setup;
use chord_dht::threads::shutdown_handoff::shutdown_handoff;
use chord_dht::threads::tcp_service::handle_client_connection;
use chord_dht::utils::cli::Cli;
use chord_dht::utils::config::Config;
use chord_dht::utils::crypto::init_ring;
use chord_dht::utils::tls::server_tls_config;

pub mod chord_proto {
    pub(crate) const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("chord_descriptor");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Cli::parse();
    simple_logger::SimpleLogger::new().env().with_level(LevelFilter::Info).init().unwrap();

    let config = Config::load(&args.config)?;
    init_ring(config.finger_table_sz)?;
    let grpc_address = args.dht_address.clone().unwrap_or_else(|| config.listen_address.clone());
    let api_address = args.api_address.clone().unwrap_or_else(|| config.api_address.clone());
    let fix_interval = Duration::from_secs(config.fix_interval);
    config.install()?;

    let bootstrap_option = args.bootstrap_node.clone();
    let cloned_grpc_addr_1 = grpc_address.clone();
    let cloned_grpc_addr_2 = grpc_address.clone();

    let (tx_grpc, rx_grpc_service) = oneshot::channel();
    let (tx_shutdown, rx_shutdown_handoff) = oneshot::channel();

    let mut thread_handles = Vec::new();

    info!("Starting up setup thread");
    thread_handles.push(tokio::spawn(async move {
        setup(bootstrap_option, &cloned_grpc_addr_1, tx_grpc, tx_shutdown)
            .await
            .unwrap();
    }));

    if args.start_api {
        info!("Starting up tcp api thread on {}", api_address);
        let api_grpc_addr = grpc_address.clone();
        thread_handles.push(tokio::spawn(async move {
            let listener = TcpListener::bind(api_address).await.unwrap();
            loop {
                let grpc_address = api_grpc_addr.clone();
                let (socket, _) = listener.accept().await.unwrap();
                info!("New client connection established");
                tokio::spawn(async move {
                    if let Err(e) = handle_client_connection(socket, &grpc_address).await {
                        error!("Client connection failed: {}", e);
                    }
                });
            }
        }));
    }

    let dev_mode = args.dev_mode;
    thread_handles.push(tokio::spawn(async move {
        let chord_service = ChordServer::new(ChordService::new(rx_grpc_service, &cloned_grpc_addr_2, dev_mode).await);
        info!("Starting up gRPC service on {}", cloned_grpc_addr_2);

        let reflection_service = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(chord_proto::FILE_DESCRIPTOR_SET)
            .build()
            .unwrap();

        Server::builder()
            .tls_config(server_tls_config().unwrap())
            .unwrap()
            .add_service(chord_service)
            .add_service(reflection_service)
            .serve(cloned_grpc_addr_2.parse().unwrap())
            .await
            .unwrap();
    }));

    thread_handles.push(tokio::spawn(async move {
        shutdown_handoff(rx_shutdown_handoff).await.unwrap();
        exit(0)
    }));

    info!("Starting up periodic stabilize call");
    let stabilize_addr = grpc_address.clone();
    thread_handles.push(tokio::spawn(async move {
        let retry_connection_sleep_millis = 1000;
        loop {
            match connect(&stabilize_addr).await {
                Ok(mut client) => loop {
                    if let Err(e) = client.stabilize(Request::new(Empty {})).await {
                        warn!("stabilize tick failed: {}", e);
                        break;
                    }
                    sleep(fix_interval).await;
                },
                Err(_) => {
                    debug!("Failed connecting to local grpc service, retrying in {} millis", retry_connection_sleep_millis);
                    sleep(Duration::from_millis(retry_connection_sleep_millis)).await
                }
            }
        }
    }));

    info!("Starting up periodic fix_fingers call");
    let fix_fingers_addr = grpc_address.clone();
    thread_handles.push(tokio::spawn(async move {
        let retry_connection_sleep_millis = 1000;
        loop {
            match connect(&fix_fingers_addr).await {
                Ok(mut client) => loop {
                    if let Err(e) = client.fix_fingers(Request::new(Empty {})).await {
                        warn!("fix_fingers tick failed: {}", e);
                        break;
                    }
                    sleep(fix_interval).await;
                },
                Err(_) => {
                    debug!("Failed connecting to local grpc service, retrying in {} millis", retry_connection_sleep_millis);
                    sleep(Duration::from_millis(retry_connection_sleep_millis)).await
                }
            }
        }
    }));

    info!("Starting up periodic check_predecessor call");
    let check_predecessor_addr = grpc_address.clone();
    thread_handles.push(tokio::spawn(async move {
        let retry_connection_sleep_millis = 1000;
        loop {
            match connect(&check_predecessor_addr).await {
                Ok(mut client) => loop {
                    if let Err(e) = client.check_predecessor(Request::new(Empty {})).await {
                        warn!("check_predecessor tick failed: {}", e);
                        break;
                    }
                    sleep(fix_interval).await;
                },
                Err(_) => {
                    debug!("Failed connecting to local grpc service, retrying in {} millis", retry_connection_sleep_millis);
                    sleep(Duration::from_millis(retry_connection_sleep_millis)).await
                }
            }
        }
    }));

    for handle in thread_handles {
        handle.await?;
    }

    Ok(())
}
