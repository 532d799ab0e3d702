use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Semaphore;
use tracing::Level;

use duplexrpc::backlog::file_backlog::FileBacklog;
use duplexrpc::backlog::Backlog;
use duplexrpc::call::call::Call;
use duplexrpc::call::method_invocation::MethodInvocation;
use duplexrpc::call::peer_info::{PeerId, PeerInfo};
use duplexrpc::call::retry_strategy::RetryStrategy;
use duplexrpc::call::rpc_result::{FailureKind, RpcResult};
use duplexrpc::channel::config::ChannelConfig;
use duplexrpc::channel::connection::{DuplexConnection, MemoryConnection};
use duplexrpc::channel::executed_calls::ExecutedCalls;
use duplexrpc::channel::executor::MethodExecutor;
use duplexrpc::channel::outbox::Outbox;
use duplexrpc::channel::peer_channel::PeerChannel;
use duplexrpc::test_util::calculator::{decode_i64, encode_i64, CalculatorExecutor};
use duplexrpc::test_util::channel::{connected_channels, ChannelSide, RunningChannel};
use duplexrpc::test_util::outcome::RecordingOutcomeListener;
use duplexrpc::util::id_generator::IdGenerator;

#[ctor::ctor]
fn init_test_logging() {
    tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(Level::DEBUG)
        .try_init()
        .ok();
}


/// counts executions, delegating to the calculator
#[derive(Default)]
struct CountingCalculator {
    executions: AtomicUsize,
}

#[async_trait]
impl MethodExecutor for CountingCalculator {
    async fn execute(&self, invocation: &MethodInvocation, calling_peer: &PeerInfo) -> anyhow::Result<Bytes> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        CalculatorExecutor.execute(invocation, calling_peer).await
    }
}

/// holds every execution until it is released
struct GatedExecutor {
    gate: Semaphore,
}

impl GatedExecutor {
    fn new() -> GatedExecutor {
        GatedExecutor { gate: Semaphore::new(0) }
    }
}

#[async_trait]
impl MethodExecutor for GatedExecutor {
    async fn execute(&self, _invocation: &MethodInvocation, _calling_peer: &PeerInfo) -> anyhow::Result<Bytes> {
        self.gate.acquire().await?.forget();
        Ok(Bytes::new())
    }
}

fn calculator_call(ids: &IdGenerator, target: PeerId, name: &str, a: i64, b: i64) -> Call {
    let invocation = MethodInvocation::new(ids.next_id(), name, vec![encode_i64(a), encode_i64(b)]).unwrap();
    Call::new(target, invocation)
}

async fn calculator_pair() -> (RunningChannel, RunningChannel) {
    connected_channels(
        "c1",
        ChannelSide::new(Arc::new(CalculatorExecutor)),
        ChannelSide::new(Arc::new(CalculatorExecutor)),
    ).await.unwrap()
}


#[tokio::test]
async fn test_divide_end_to_end() {
    let (client, server) = calculator_pair().await;
    let ids = IdGenerator::new();

    let call = calculator_call(&ids, PeerId::Server, "Divide", 10, 2)
        .with_timeout(Duration::from_millis(1000));
    let method_id = call.method_id();

    let result = client.channel.run(call).await;
    assert!(result.is_success(), "{:?}", result);
    assert_eq!(result.method_id, method_id);
    assert_eq!(decode_i64(result.return_value().unwrap()).unwrap(), 5);

    client.stop().await;
    server.stop().await;
}

#[tokio::test]
async fn test_calls_in_both_directions() {
    let (client, server) = calculator_pair().await;
    let ids = IdGenerator::new();

    let to_server = calculator_call(&ids, PeerId::Server, "Add", 1, 2);
    let to_client = calculator_call(&ids, PeerId::client("c1"), "Multiply", 3, 4);

    let (from_server, from_client) = tokio::join!(
        client.channel.run(to_server),
        server.channel.run(to_client),
    );
    assert_eq!(decode_i64(from_server.return_value().unwrap()).unwrap(), 3);
    assert_eq!(decode_i64(from_client.return_value().unwrap()).unwrap(), 12);
}

#[tokio::test]
async fn test_remote_exception_is_not_retried() {
    let executor = Arc::new(CountingCalculator::default());
    let (client, _server) = connected_channels(
        "c1",
        ChannelSide::new(Arc::new(CalculatorExecutor)),
        ChannelSide::new(executor.clone()),
    ).await.unwrap();
    let ids = IdGenerator::new();

    let call = calculator_call(&ids, PeerId::Server, "Divide", 1, 0)
        .with_retry_strategy(RetryStrategy::Retry);
    let method_id = call.method_id();

    let result = client.channel.run(call).await;
    assert_eq!(result, RpcResult::failure(method_id, FailureKind::RemoteException, "division by zero"));
    assert_eq!(executor.executions.load(Ordering::SeqCst), 1);
    assert!(client.channel.outbox().queue().is_empty().await);
}

#[tokio::test]
async fn test_outcome_listener_sees_every_terminal_outcome() {
    let listener = Arc::new(RecordingOutcomeListener::new());
    let mut client_side = ChannelSide::new(Arc::new(CalculatorExecutor));
    client_side.config.outcome_listener = Some(listener.clone());
    let (client, _server) = connected_channels("c1", client_side, ChannelSide::new(Arc::new(CalculatorExecutor))).await.unwrap();
    let ids = IdGenerator::new();

    let ok = calculator_call(&ids, PeerId::Server, "Subtract", 5, 7);
    let failing = calculator_call(&ids, PeerId::Server, "Divide", 5, 0);
    let (ok_id, failing_id) = (ok.method_id(), failing.method_id());

    client.channel.run(ok).await;
    client.channel.run(failing).await;

    let outcomes = listener.outcomes();
    assert_eq!(outcomes.len(), 2);
    assert_eq!(decode_i64(listener.outcome_for(ok_id).unwrap().return_value().unwrap()).unwrap(), -2);
    assert_eq!(listener.outcome_for(failing_id).unwrap().failure_kind(), Some(FailureKind::RemoteException));
}

#[tokio::test]
async fn test_queue_overflow() {
    let executor = Arc::new(GatedExecutor::new());
    let mut client_side = ChannelSide::new(Arc::new(CalculatorExecutor));
    client_side.config.max_queue_len = 2;
    let (client, _server) = connected_channels("c1", client_side, ChannelSide::new(executor.clone())).await.unwrap();
    let ids = IdGenerator::new();

    let pending = (0..2)
        .map(|_| {
            let channel = client.channel.clone();
            let call = calculator_call(&ids, PeerId::Server, "Add", 1, 1);
            tokio::spawn(async move { channel.run(call).await })
        })
        .collect::<Vec<_>>();
    while client.channel.outbox().queue().len().await < 2 {
        tokio::task::yield_now().await;
    }

    let rejected = client.channel.run(calculator_call(&ids, PeerId::Server, "Add", 1, 1)).await;
    assert_eq!(rejected.failure_kind(), Some(FailureKind::QueueOverflow));

    executor.gate.add_permits(2);
    for p in pending {
        assert!(p.await.unwrap().is_success());
    }
}

#[tokio::test]
async fn test_retried_call_is_executed_once_across_channels() {
    let executor = Arc::new(CountingCalculator::default());
    let executed_calls = Arc::new(ExecutedCalls::new(100));
    let config = Arc::new(ChannelConfig::new());

    let invocation = MethodInvocation::new(4711, "Add", vec![encode_i64(20), encode_i64(22)]).unwrap();
    let expected = RpcResult::success(4711, encode_i64(42));

    for _ in 0..2 {
        let (server_end, client_end) = MemoryConnection::pair();
        let outbox = Arc::new(Outbox::create(PeerId::client("c1"), None, config.clone()).await.unwrap());
        let channel = RunningChannel::spawn(Arc::new(PeerChannel::new(
            PeerInfo::client("c1", None),
            Arc::new(server_end),
            executor.clone(),
            outbox,
            executed_calls.clone(),
            Default::default(),
        )));

        client_end.send(invocation.encode()).await.unwrap();
        let frame = client_end.receive().await.unwrap().unwrap();
        assert_eq!(RpcResult::try_deser(&frame).unwrap(), expected);

        channel.stop().await;
    }

    assert_eq!(executor.executions.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_backlog_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let backlog: Arc<dyn Backlog> = Arc::new(FileBacklog::new(dir.path()));
    let ids = IdGenerator::new();

    // first process: the server never answers, the caller gives up
    let method_ids = {
        let (client_end, _unresponsive_server) = MemoryConnection::pair();
        let channel = PeerChannel::create(
            PeerInfo::server(None),
            Arc::new(client_end),
            Arc::new(CalculatorExecutor),
            Some(backlog.clone()),
            Arc::new(ChannelConfig::new()),
        ).await.unwrap();
        let client = RunningChannel::spawn(channel);

        let mut method_ids = Vec::new();
        for (a, b) in [(1, 2), (3, 4)] {
            let call = calculator_call(&ids, PeerId::Server, "Add", a, b)
                .with_retry_strategy(RetryStrategy::Retry)
                .with_timeout(Duration::from_millis(50));
            method_ids.push(call.method_id());
            assert_eq!(client.channel.run(call).await.failure_kind(), Some(FailureKind::Timeout));
        }
        client.stop().await;
        method_ids
    };
    assert_eq!(backlog.read_all(&PeerId::Server).await.unwrap().len(), 2);

    // second process: the calls are delivered from the backlog
    let listener = Arc::new(RecordingOutcomeListener::new());
    let mut client_side = ChannelSide::new(Arc::new(CalculatorExecutor));
    client_side.backlog = Some(backlog.clone());
    client_side.config.outcome_listener = Some(listener.clone());
    let (client, _server) = connected_channels("c1", client_side, ChannelSide::new(Arc::new(CalculatorExecutor))).await.unwrap();
    assert_eq!(client.channel.outbox().queue().method_ids().await, method_ids);

    client.channel.outbox().wake();
    while !client.channel.outbox().queue().is_empty().await {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(decode_i64(listener.outcome_for(method_ids[0]).unwrap().return_value().unwrap()).unwrap(), 3);
    assert_eq!(decode_i64(listener.outcome_for(method_ids[1]).unwrap().return_value().unwrap()).unwrap(), 7);
    assert!(backlog.read_all(&PeerId::Server).await.unwrap().is_empty());
}
