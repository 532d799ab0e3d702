use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::trace;


/// Default limit for the size of a single frame. A peer sending a longer frame is assumed to be
///  broken or compromised.
pub const MAX_FRAME_LEN: usize = 16*1024*1024;

/// A physical, message-oriented duplex connection to a single peer. This decouples the channel
///  engine from the specific transport.
///
/// `send` and `receive` may be called concurrently with each other, but neither is called
///  concurrently with itself.
#[async_trait]
pub trait DuplexConnection: Send + Sync + 'static {
    fn is_open(&self) -> bool;

    /// `send` rejects longer frames, leaving the connection open
    fn max_frame_len(&self) -> usize;

    async fn send(&self, frame: Bytes) -> anyhow::Result<()>;

    /// the next frame, or `None` if the connection was closed
    async fn receive(&self) -> anyhow::Result<Option<Bytes>>;

    async fn close(&self);
}


/// One end of an in-process connection. Closing either end (or dropping it) closes the connection
///  for both ends.
pub struct MemoryConnection {
    open: AtomicBool,
    max_frame_len: usize,
    sender: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<Bytes>>,
}

impl MemoryConnection {
    pub fn pair() -> (MemoryConnection, MemoryConnection) {
        MemoryConnection::pair_with_max_frame_len(MAX_FRAME_LEN)
    }

    pub fn pair_with_max_frame_len(max_frame_len: usize) -> (MemoryConnection, MemoryConnection) {
        let (sender_a, receiver_b) = mpsc::unbounded_channel();
        let (sender_b, receiver_a) = mpsc::unbounded_channel();
        (
            MemoryConnection::new(max_frame_len, sender_a, receiver_a),
            MemoryConnection::new(max_frame_len, sender_b, receiver_b),
        )
    }

    fn new(max_frame_len: usize, sender: mpsc::UnboundedSender<Bytes>, receiver: mpsc::UnboundedReceiver<Bytes>) -> MemoryConnection {
        MemoryConnection {
            open: AtomicBool::new(true),
            max_frame_len,
            sender: Mutex::new(Some(sender)),
            receiver: tokio::sync::Mutex::new(receiver),
        }
    }

    fn close_sender(&self) {
        self.open.store(false, Ordering::Release);
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
    }
}

#[async_trait]
impl DuplexConnection for MemoryConnection {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }

    async fn send(&self, frame: Bytes) -> anyhow::Result<()> {
        if frame.len() > self.max_frame_len {
            bail!("frame of {} bytes is longer than the maximum of {}", frame.len(), self.max_frame_len);
        }

        let sender = self.sender.lock()
            .map_err(|_| anyhow!("connection state is poisoned"))?
            .clone();

        let Some(sender) = sender else {
            return Err(anyhow!("connection is closed"));
        };
        if sender.send(frame).is_err() {
            self.close_sender();
            return Err(anyhow!("connection was closed by the peer"));
        }
        Ok(())
    }

    async fn receive(&self) -> anyhow::Result<Option<Bytes>> {
        let frame = self.receiver.lock().await
            .recv().await;
        if frame.is_none() {
            trace!("in-memory connection closed by the peer");
            self.close_sender();
        }
        Ok(frame)
    }

    async fn close(&self) {
        self.close_sender();
        self.receiver.lock().await
            .close();
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_go_both_ways() {
        let (a, b) = MemoryConnection::pair();

        a.send(Bytes::from_static(b"ping")).await.unwrap();
        assert_eq!(b.receive().await.unwrap(), Some(Bytes::from_static(b"ping")));

        b.send(Bytes::from_static(b"pong")).await.unwrap();
        b.send(Bytes::from_static(b"pong2")).await.unwrap();
        assert_eq!(a.receive().await.unwrap(), Some(Bytes::from_static(b"pong")));
        assert_eq!(a.receive().await.unwrap(), Some(Bytes::from_static(b"pong2")));
    }

    #[tokio::test]
    async fn test_close_is_seen_by_peer() {
        let (a, b) = MemoryConnection::pair();
        assert!(a.is_open());
        assert!(b.is_open());

        a.send(Bytes::from_static(b"last")).await.unwrap();
        a.close().await;
        assert!(!a.is_open());
        assert!(a.send(Bytes::from_static(b"x")).await.is_err());

        assert_eq!(b.receive().await.unwrap(), Some(Bytes::from_static(b"last")));
        assert_eq!(b.receive().await.unwrap(), None);
        assert!(!b.is_open());
    }

    #[tokio::test]
    async fn test_rejects_oversized_frame() {
        let (a, b) = MemoryConnection::pair_with_max_frame_len(4);
        assert_eq!(a.max_frame_len(), 4);

        assert!(a.send(Bytes::from_static(b"12345")).await.is_err());
        assert!(a.is_open());
        a.send(Bytes::from_static(b"1234")).await.unwrap();
        assert_eq!(b.receive().await.unwrap(), Some(Bytes::from_static(b"1234")));
    }

    #[tokio::test]
    async fn test_drop_closes_connection() {
        let (a, b) = MemoryConnection::pair();
        drop(a);
        assert_eq!(b.receive().await.unwrap(), None);
        assert!(b.send(Bytes::from_static(b"x")).await.is_err());
        assert!(!b.is_open());
    }
}
