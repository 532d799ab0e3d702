use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::Level;

use duplexrpc::call::retry_strategy::RetryStrategy;
use duplexrpc::call::rpc_result::FailureKind;
use duplexrpc::channel::config::ChannelConfig;
use duplexrpc::channel::connection::MAX_FRAME_LEN;
use duplexrpc::peer::client::{ClientConfig, RpcClient};
use duplexrpc::peer::server::{RpcServer, ServerConfig};
use duplexrpc::test_util::calculator::{decode_i64, encode_i64, CalculatorExecutor};

#[ctor::ctor]
fn init_test_logging() {
    tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(Level::DEBUG)
        .try_init()
        .ok();
}


async fn start_server(bind_addr: SocketAddr) -> Arc<RpcServer> {
    let server = RpcServer::bind(ServerConfig::new(bind_addr), Arc::new(CalculatorExecutor), None).await.unwrap();
    {
        let server = server.clone();
        tokio::spawn(async move { server.accept_loop().await });
    }
    server
}

fn client_config(client_id: &str, server_addr: SocketAddr) -> ClientConfig {
    let mut config = ClientConfig::new(client_id, server_addr);
    config.initial_reconnect_delay = Duration::from_millis(20);
    config.max_reconnect_delay = Duration::from_millis(100);
    config
}

async fn start_client(config: ClientConfig) -> Arc<RpcClient> {
    let client = RpcClient::new(config, Arc::new(CalculatorExecutor), None).await.unwrap();
    {
        let client = client.clone();
        tokio::spawn(async move { client.run_loop().await });
    }
    client
}

async fn wait_for_client(server: &RpcServer, client_id: &str) {
    while !server.connected_clients().await.contains(&client_id.to_string()) {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}


#[tokio::test]
async fn test_round_trip_in_both_directions() {
    let server = start_server(SocketAddr::from_str("127.0.0.1:0").unwrap()).await;
    let client = start_client(client_config("c1", server.local_addr().unwrap())).await;

    let call = client.new_call("Divide", vec![encode_i64(10), encode_i64(2)]).unwrap()
        .with_timeout(Duration::from_millis(1000));
    let result = client.run(call).await;
    assert_eq!(decode_i64(result.return_value().unwrap()).unwrap(), 5);

    wait_for_client(&server, "c1").await;
    let call = server.new_call("c1", "Multiply", vec![encode_i64(6), encode_i64(7)]).unwrap();
    let result = server.run("c1", call).await;
    assert_eq!(decode_i64(result.return_value().unwrap()).unwrap(), 42);

    let call = server.new_call("c1", "Divide", vec![encode_i64(6), encode_i64(0)]).unwrap();
    assert_eq!(server.run("c1", call).await.failure_kind(), Some(FailureKind::RemoteException));

    client.shutdown();
    server.shutdown();
}

#[tokio::test]
async fn test_several_clients() {
    let server = start_server(SocketAddr::from_str("127.0.0.1:0").unwrap()).await;
    let clients = [
        start_client(client_config("a", server.local_addr().unwrap())).await,
        start_client(client_config("b", server.local_addr().unwrap())).await,
    ];

    for (i, client) in clients.iter().enumerate() {
        let call = client.new_call("Add", vec![encode_i64(i as i64), encode_i64(100)]).unwrap();
        assert_eq!(decode_i64(client.run(call).await.return_value().unwrap()).unwrap(), i as i64 + 100);
    }

    wait_for_client(&server, "a").await;
    wait_for_client(&server, "b").await;
    assert_eq!(server.connected_clients().await, vec!["a".to_string(), "b".to_string()]);
}

#[tokio::test]
async fn test_client_connects_once_server_is_up() {
    // reserve a port, then release it for the server that is started later
    let server_addr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let mut config = client_config("late", server_addr);
    let mut channel_config = ChannelConfig::new();
    channel_config.default_timeout = Duration::from_secs(5);
    config.channel = Arc::new(channel_config);
    let client = start_client(config).await;

    let call = client.new_call("Add", vec![encode_i64(1), encode_i64(1)]).unwrap()
        .with_retry_strategy(RetryStrategy::Retry);
    let pending = {
        let client = client.clone();
        tokio::spawn(async move { client.run(call).await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!client.is_connected());

    let _server = start_server(server_addr).await;
    let result = pending.await.unwrap();
    assert_eq!(decode_i64(result.return_value().unwrap()).unwrap(), 2);
    assert!(client.is_connected());
}

#[tokio::test]
async fn test_oversized_call_does_not_block_later_calls() {
    let server = start_server(SocketAddr::from_str("127.0.0.1:0").unwrap()).await;
    let client = start_client(client_config("big", server.local_addr().unwrap())).await;

    let oversized = client.new_call("Add", vec![Bytes::from(vec![0u8; MAX_FRAME_LEN + 1])]).unwrap()
        .with_retry_strategy(RetryStrategy::Retry);
    assert_eq!(client.run(oversized).await.failure_kind(), Some(FailureKind::Other));

    for i in 0..3 {
        let call = client.new_call("Add", vec![encode_i64(i), encode_i64(1)]).unwrap();
        assert_eq!(decode_i64(client.run(call).await.return_value().unwrap()).unwrap(), i + 1);
    }
    assert!(client.outbox().queue().is_empty().await);

    wait_for_client(&server, "big").await;
    assert!(client.is_connected());
}
