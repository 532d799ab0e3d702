use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{bail, Context};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::channel::connection::{DuplexConnection, MAX_FRAME_LEN};


/// A [DuplexConnection] over TCP. Frames are prefixed with their length as u32 little endian.
///  Frames longer than [MAX_FRAME_LEN] are rejected in both directions: an outgoing one is not
///  sent, an incoming one closes the connection.
///
/// Reading and writing use the two halves of the socket independently, so a send never waits for
///  a pending receive.
pub struct TcpConnection {
    peer_addr: SocketAddr,
    open: AtomicBool,
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
}

impl TcpConnection {
    pub async fn connect(addr: SocketAddr) -> anyhow::Result<TcpConnection> {
        let stream = TcpStream::connect(addr).await
            .with_context(|| format!("connecting to {:?}", addr))?;
        TcpConnection::from_stream(stream)
    }

    pub fn from_stream(stream: TcpStream) -> anyhow::Result<TcpConnection> {
        let peer_addr = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();

        Ok(TcpConnection {
            peer_addr,
            open: AtomicBool::new(true),
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    fn mark_closed(&self) {
        self.open.store(false, Ordering::Release);
    }
}

#[async_trait]
impl DuplexConnection for TcpConnection {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn max_frame_len(&self) -> usize {
        MAX_FRAME_LEN
    }

    async fn send(&self, frame: Bytes) -> anyhow::Result<()> {
        if !self.is_open() {
            bail!("connection to {:?} is closed", self.peer_addr);
        }
        if frame.len() > MAX_FRAME_LEN {
            bail!("frame of {} bytes is longer than the maximum of {}", frame.len(), MAX_FRAME_LEN);
        }

        let frame_len = frame.len() as u32;
        let mut writer = self.writer.lock().await;
        let result = async {
            writer.write_all(&frame_len.to_le_bytes()).await?;
            writer.write_all(&frame).await?;
            writer.flush().await
        }.await;

        if let Err(e) = result {
            self.mark_closed();
            return Err(e).with_context(|| format!("sending to {:?}", self.peer_addr));
        }
        Ok(())
    }

    async fn receive(&self) -> anyhow::Result<Option<Bytes>> {
        let mut reader = self.reader.lock().await;

        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                debug!("connection closed by {:?}", self.peer_addr);
                self.mark_closed();
                return Ok(None);
            }
            Err(e) => {
                self.mark_closed();
                return Err(e.into());
            }
        }

        let frame_len = u32::from_le_bytes(len_buf) as usize;
        if frame_len > MAX_FRAME_LEN {
            self.mark_closed();
            bail!("received a frame of {} bytes from {:?}, which is longer than the maximum - closing connection", frame_len, self.peer_addr);
        }

        let mut frame = vec![0u8; frame_len];
        if let Err(e) = reader.read_exact(&mut frame).await {
            self.mark_closed();
            return Err(e).with_context(|| format!("receiving a frame of {} bytes from {:?}", frame_len, self.peer_addr));
        }
        trace!("received {} bytes from {:?}", frame_len, self.peer_addr);
        Ok(Some(frame.into()))
    }

    async fn close(&self) {
        self.mark_closed();
        if let Err(e) = self.writer.lock().await.shutdown().await {
            debug!("error shutting down connection to {:?}: {}", self.peer_addr, e);
        }
    }
}
