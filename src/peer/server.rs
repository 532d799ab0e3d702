use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use bytes::Bytes;
use rustc_hash::FxHashMap;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::backlog::Backlog;
use crate::call::call::Call;
use crate::call::method_invocation::MethodInvocation;
use crate::call::peer_info::{PeerId, PeerInfo};
use crate::call::rpc_result::{FailureKind, RpcResult};
use crate::channel::config::ChannelConfig;
use crate::channel::connection::DuplexConnection;
use crate::channel::executed_calls::ExecutedCalls;
use crate::channel::executor::MethodExecutor;
use crate::channel::outbox::Outbox;
use crate::channel::peer_channel::PeerChannel;
use crate::channel::tcp_connection::TcpConnection;
use crate::peer::hello::try_decode_hello;
use crate::util::id_generator::IdGenerator;


#[derive(Debug)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// a connection that does not identify its client within this time is closed
    pub hello_timeout: Duration,
    pub channel: Arc<ChannelConfig>,
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> ServerConfig {
        ServerConfig {
            bind_addr,
            hello_timeout: Duration::from_secs(5),
            channel: Arc::new(ChannelConfig::new()),
        }
    }
}


/// State per known client. It is created on first contact in either direction, and outlives
///  the client's connections. State created by [RpcServer::run] for a client that never
///  connected is dropped again once nothing is queued for that client.
struct ClientState {
    outbox: Arc<Outbox>,
    executed_calls: Arc<ExecutedCalls>,
    channel: Option<Arc<PeerChannel>>,
    has_connected: bool,
}


/// Accepts connections from clients, running a separate channel for each connected client.
pub struct RpcServer {
    config: ServerConfig,
    listener: TcpListener,
    executor: Arc<dyn MethodExecutor>,
    backlog: Option<Arc<dyn Backlog>>,
    id_generator: IdGenerator,
    clients: Mutex<FxHashMap<String, ClientState>>,
    cancel: CancellationToken,
}

impl RpcServer {
    pub async fn bind(config: ServerConfig, executor: Arc<dyn MethodExecutor>, backlog: Option<Arc<dyn Backlog>>) -> anyhow::Result<Arc<RpcServer>> {
        config.channel.validate()?;

        let listener = TcpListener::bind(config.bind_addr).await?;
        info!("bound server socket to {:?}", listener.local_addr()?);

        Ok(Arc::new(RpcServer {
            config,
            listener,
            executor,
            backlog,
            id_generator: IdGenerator::new(),
            clients: Default::default(),
            cancel: CancellationToken::new(),
        }))
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until [RpcServer::shutdown] is called
    pub async fn accept_loop(self: &Arc<Self>) -> anyhow::Result<()> {
        loop {
            let (stream, addr) = tokio::select! {
                _ = self.cancel.cancelled() => break,
                accepted = self.listener.accept() => accepted?,
            };

            let server = self.clone();
            tokio::spawn(async move {
                match server.handle_connection(stream, addr).await {
                    Ok(_) => {}
                    Err(e) => warn!("connection from {} broke with an error: {:#}", addr, e),
                }
            }.instrument(info_span!("accepted_connection", %addr)));
        }
        info!("server shut down");
        Ok(())
    }

    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) -> anyhow::Result<()> {
        debug!("received connection request");
        let connection = Arc::new(TcpConnection::from_stream(stream)?);

        let hello = tokio::time::timeout(self.config.hello_timeout, connection.receive()).await
            .map_err(|_| anyhow!("no hello received within {:?}", self.config.hello_timeout))??;
        let Some(hello) = hello else {
            debug!("connection closed before hello");
            return Ok(());
        };
        let client_id = try_decode_hello(&hello)?;
        debug!("connection is from client {:?}", client_id);

        let (outbox, executed_calls) = self.client_resources(&client_id).await?;
        let channel = Arc::new(PeerChannel::new(
            PeerInfo::client(client_id.clone(), Some(addr)),
            connection,
            self.executor.clone(),
            outbox,
            executed_calls,
            self.cancel.child_token(),
        ));

        let previous = self.clients.lock().await
            .get_mut(&client_id)
            .and_then(|state| {
                state.has_connected = true;
                state.channel.replace(channel.clone())
            });
        if let Some(previous) = previous {
            info!("client {:?} reconnected - stopping its previous channel", client_id);
            previous.stop();
        }

        channel.start().await;

        let mut clients = self.clients.lock().await;
        if let Some(state) = clients.get_mut(&client_id) {
            if state.channel.as_ref().is_some_and(|c| Arc::ptr_eq(c, &channel)) {
                state.channel = None;
            }
        }
        Ok(())
    }

    async fn client_resources(&self, client_id: &str) -> anyhow::Result<(Arc<Outbox>, Arc<ExecutedCalls>)> {
        let mut clients = self.clients.lock().await;
        if let Some(state) = clients.get(client_id) {
            return Ok((state.outbox.clone(), state.executed_calls.clone()));
        }

        let outbox = Arc::new(Outbox::create(PeerId::client(client_id), self.backlog.clone(), self.config.channel.clone()).await?);
        let executed_calls = Arc::new(ExecutedCalls::new(self.config.channel.executed_cache_size));
        clients.insert(client_id.to_string(), ClientState {
            outbox: outbox.clone(),
            executed_calls: executed_calls.clone(),
            channel: None,
            has_connected: false,
        });
        Ok((outbox, executed_calls))
    }

    /// A call to a client with a fresh method id
    pub fn new_call(&self, client_id: &str, method_name: &str, params: Vec<Bytes>) -> anyhow::Result<Call> {
        let invocation = MethodInvocation::new(self.id_generator.next_id(), method_name, params)?;
        Ok(Call::new(PeerId::client(client_id), invocation))
    }

    /// Sends a call to a client - see [Outbox::run]. If the client is not connected, the call
    ///  waits in the client's queue.
    pub async fn run(&self, client_id: &str, call: Call) -> RpcResult {
        let result = match self.client_resources(client_id).await {
            Ok((outbox, _)) => outbox.run(call).await,
            Err(e) => return RpcResult::failure(call.method_id(), FailureKind::Other, format!("{:#}", e)),
        };
        self.drop_unused_client_state(client_id).await;
        result
    }

    async fn drop_unused_client_state(&self, client_id: &str) {
        let mut clients = self.clients.lock().await;
        let Some(state) = clients.get(client_id) else {
            return;
        };
        // another caller holding the outbox may be about to enqueue into it
        if state.has_connected || Arc::strong_count(&state.outbox) > 1 || !state.outbox.queue().is_empty().await {
            return;
        }
        debug!("dropping state of client {:?} which never connected", client_id);
        clients.remove(client_id);
    }

    /// Discards everything the server keeps for a client that is currently not connected: its
    ///  queued calls (which remain in the backlog, if any) and its cache of executed calls.
    ///  Returns false if the client is connected or unknown.
    pub async fn forget_client(&self, client_id: &str) -> bool {
        let mut clients = self.clients.lock().await;
        let is_connected = match clients.get(client_id) {
            None => return false,
            Some(state) => state.channel.as_ref().is_some_and(|c| !c.is_stopped()),
        };
        if is_connected {
            return false;
        }
        info!("forgetting client {:?}", client_id);
        clients.remove(client_id);
        true
    }

    /// ids of all clients the server keeps state for, connected or not, sorted
    pub async fn known_clients(&self) -> Vec<String> {
        let mut result = self.clients.lock().await
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        result.sort();
        result
    }

    /// ids of clients with a live channel, sorted
    pub async fn connected_clients(&self) -> Vec<String> {
        let mut result = self.clients.lock().await
            .iter()
            .filter(|(_, state)| state.channel.as_ref().is_some_and(|c| !c.is_stopped()))
            .map(|(id, _)| id.clone())
            .collect::<Vec<_>>();
        result.sort();
        result
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}
