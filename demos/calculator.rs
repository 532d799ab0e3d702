use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use clap::Parser;
use clap_derive::Parser;
use tokio::select;
use tracing::{info, warn, Level};

use duplexrpc::backlog::file_backlog::FileBacklog;
use duplexrpc::backlog::Backlog;
use duplexrpc::call::retry_strategy::RetryStrategy;
use duplexrpc::peer::client::{ClientConfig, RpcClient};
use duplexrpc::peer::server::{RpcServer, ServerConfig};
use duplexrpc::test_util::calculator::{decode_i64, encode_i64, CalculatorExecutor};

/// Runs a calculator server, or a client that sends it a stream of divisions
#[derive(Parser)]
struct Args {
    address: String,

    /// run as a client with this id instead of as a server
    #[clap(long)]
    client_id: Option<String>,

    /// directory for persisting pending calls
    #[clap(long)]
    backlog_dir: Option<String>,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .try_init()
        .ok();

    let addr: SocketAddr = args.address.parse()?;
    let backlog = args.backlog_dir
        .map(|dir| Arc::new(FileBacklog::new(dir)) as Arc<dyn Backlog>);

    match args.client_id {
        Some(client_id) => run_client(client_id, addr, backlog).await,
        None => run_server(addr, backlog).await,
    }
}

async fn run_server(addr: SocketAddr, backlog: Option<Arc<dyn Backlog>>) -> anyhow::Result<()> {
    let server = RpcServer::bind(ServerConfig::new(addr), Arc::new(CalculatorExecutor), backlog).await?;
    server.accept_loop().await
}

async fn run_client(client_id: String, addr: SocketAddr, backlog: Option<Arc<dyn Backlog>>) -> anyhow::Result<()> {
    let client = RpcClient::new(ClientConfig::new(client_id, addr), Arc::new(CalculatorExecutor), backlog).await?;

    select! {
        _ = client.run_loop() => Err(anyhow!("client loop terminated")),
        result = send_divisions(client.clone()) => result,
    }
}

async fn send_divisions(client: Arc<RpcClient>) -> anyhow::Result<()> {
    for divisor in (0..10).cycle() {
        let call = client.new_call("Divide", vec![encode_i64(1000), encode_i64(divisor)])?
            .with_retry_strategy(RetryStrategy::Retry)
            .with_timeout(Duration::from_secs(2));

        let result = client.run(call).await;
        match result.return_value() {
            Some(value) => info!("1000 / {} = {}", divisor, decode_i64(value)?),
            None => warn!("1000 / {} failed: {:?}", divisor, result),
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    Ok(())
}
