use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::backlog::Backlog;
use crate::call::peer_info::PeerInfo;
use crate::channel::config::ChannelConfig;
use crate::channel::connection::MemoryConnection;
use crate::channel::executor::MethodExecutor;
use crate::channel::peer_channel::PeerChannel;


/// One side of a pair of connected channels, with the task running it
pub struct RunningChannel {
    pub channel: Arc<PeerChannel>,
    pub handle: JoinHandle<()>,
}

impl RunningChannel {
    pub fn spawn(channel: Arc<PeerChannel>) -> RunningChannel {
        let handle = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.start().await })
        };
        RunningChannel { channel, handle }
    }

    pub async fn stop(self) {
        self.channel.stop();
        // the task only ends by returning, so there is nothing to report
        let _ = self.handle.await;
    }
}

/// What is needed to create one side of a connected channel pair
pub struct ChannelSide {
    pub executor: Arc<dyn MethodExecutor>,
    pub backlog: Option<Arc<dyn Backlog>>,
    pub config: ChannelConfig,
}

impl ChannelSide {
    pub fn new(executor: Arc<dyn MethodExecutor>) -> ChannelSide {
        ChannelSide {
            executor,
            backlog: None,
            config: ChannelConfig::new(),
        }
    }
}

/// Creates and starts a client channel and a server channel connected to each other in memory.
///  The client is the first element of the result.
pub async fn connected_channels(client_id: &str, client: ChannelSide, server: ChannelSide) -> anyhow::Result<(RunningChannel, RunningChannel)> {
    let (client_end, server_end) = MemoryConnection::pair();

    let client_channel = PeerChannel::create(
        PeerInfo::server(None),
        Arc::new(client_end),
        client.executor,
        client.backlog,
        Arc::new(client.config),
    ).await?;
    let server_channel = PeerChannel::create(
        PeerInfo::client(client_id, None),
        Arc::new(server_end),
        server.executor,
        server.backlog,
        Arc::new(server.config),
    ).await?;

    Ok((RunningChannel::spawn(client_channel), RunningChannel::spawn(server_channel)))
}
