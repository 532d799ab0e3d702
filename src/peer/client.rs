use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::bail;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::backlog::Backlog;
use crate::call::call::Call;
use crate::call::method_invocation::MethodInvocation;
use crate::call::peer_info::{PeerId, PeerInfo};
use crate::call::rpc_result::RpcResult;
use crate::channel::config::ChannelConfig;
use crate::channel::connection::DuplexConnection;
use crate::channel::executed_calls::ExecutedCalls;
use crate::channel::executor::MethodExecutor;
use crate::channel::outbox::Outbox;
use crate::channel::peer_channel::PeerChannel;
use crate::channel::tcp_connection::TcpConnection;
use crate::peer::backoff::ReconnectBackoff;
use crate::peer::hello::encode_hello;
use crate::util::id_generator::IdGenerator;


#[derive(Debug)]
pub struct ClientConfig {
    pub client_id: String,
    pub server_addr: SocketAddr,

    pub initial_reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    pub reconnect_backoff_factor: u32,

    pub channel: Arc<ChannelConfig>,
}

impl ClientConfig {
    pub fn new(client_id: impl Into<String>, server_addr: SocketAddr) -> ClientConfig {
        ClientConfig {
            client_id: client_id.into(),
            server_addr,
            initial_reconnect_delay: Duration::from_millis(100),
            max_reconnect_delay: Duration::from_secs(10),
            reconnect_backoff_factor: 2,
            channel: Arc::new(ChannelConfig::new()),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        encode_hello(&self.client_id)?;
        if self.initial_reconnect_delay > self.max_reconnect_delay {
            bail!("initial reconnect delay must not be greater than the maximum reconnect delay");
        }
        self.channel.validate()
    }
}


/// The client side of the system: it keeps (re-)connecting to the server, one connection at a
///  time, and serves calls in both directions over it.
///
/// Calls to the server can be issued at any time. While there is no connection, they wait in the
///  queue and are sent once a connection is established.
pub struct RpcClient {
    config: ClientConfig,
    executor: Arc<dyn MethodExecutor>,
    outbox: Arc<Outbox>,
    executed_calls: Arc<ExecutedCalls>,
    id_generator: IdGenerator,
    current_channel: Mutex<Option<Arc<PeerChannel>>>,
    cancel: CancellationToken,
}

impl RpcClient {
    pub async fn new(config: ClientConfig, executor: Arc<dyn MethodExecutor>, backlog: Option<Arc<dyn Backlog>>) -> anyhow::Result<Arc<RpcClient>> {
        config.validate()?;

        let outbox = Arc::new(Outbox::create(PeerId::Server, backlog, config.channel.clone()).await?);
        let executed_calls = Arc::new(ExecutedCalls::new(config.channel.executed_cache_size));
        Ok(Arc::new(RpcClient {
            config,
            executor,
            outbox,
            executed_calls,
            id_generator: IdGenerator::new(),
            current_channel: Default::default(),
            cancel: CancellationToken::new(),
        }))
    }

    pub fn client_id(&self) -> &str {
        &self.config.client_id
    }

    pub fn is_connected(&self) -> bool {
        self.lock_channel().is_some()
    }

    /// A call to the server with a fresh method id
    pub fn new_call(&self, method_name: &str, params: Vec<Bytes>) -> anyhow::Result<Call> {
        let invocation = MethodInvocation::new(self.id_generator.next_id(), method_name, params)?;
        Ok(Call::new(PeerId::Server, invocation))
    }

    /// Sends a call to the server - see [Outbox::run]
    pub async fn run(&self, call: Call) -> RpcResult {
        self.outbox.run(call).await
    }

    pub fn outbox(&self) -> &Arc<Outbox> {
        &self.outbox
    }

    /// Connects to the server and keeps reconnecting until [RpcClient::shutdown] is called
    pub async fn run_loop(&self) {
        let span = info_span!("rpc_client", client_id = %self.config.client_id);
        async {
            let mut backoff = ReconnectBackoff::new(
                self.config.initial_reconnect_delay,
                self.config.max_reconnect_delay,
                self.config.reconnect_backoff_factor,
            );

            while !self.cancel.is_cancelled() {
                match self.connect().await {
                    Ok(channel) => {
                        info!("connected to {:?}", self.config.server_addr);
                        backoff.reset();

                        *self.lock_channel() = Some(channel.clone());
                        channel.start().await;
                        *self.lock_channel() = None;

                        if self.cancel.is_cancelled() {
                            break;
                        }
                        info!("connection to {:?} ended", self.config.server_addr);
                    }
                    Err(e) => {
                        warn!("connecting to {:?} failed: {:#}", self.config.server_addr, e);
                    }
                }

                let delay = backoff.on_failure();
                debug!("reconnecting in {:?} (attempt #{})", delay, backoff.failure_count());
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            info!("client shut down");
        }
            .instrument(span)
            .await
    }

    async fn connect(&self) -> anyhow::Result<Arc<PeerChannel>> {
        let connection = TcpConnection::connect(self.config.server_addr).await?;
        connection.send(encode_hello(&self.config.client_id)?).await?;

        Ok(Arc::new(PeerChannel::new(
            PeerInfo::server(Some(self.config.server_addr)),
            Arc::new(connection),
            self.executor.clone(),
            self.outbox.clone(),
            self.executed_calls.clone(),
            self.cancel.child_token(),
        )))
    }

    /// Stops the current channel and the reconnect loop. Pending calls stay in the backlog.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn lock_channel(&self) -> std::sync::MutexGuard<'_, Option<Arc<PeerChannel>>> {
        self.current_channel.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
