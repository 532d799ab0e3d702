use std::fmt::{Debug, Display, Formatter};
use std::net::SocketAddr;


/// Identifies the remote end of a channel, and the target of a call. There is exactly one server,
///  while clients are told apart by an application-defined id.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum PeerId {
    Server,
    Client(String),
}

impl PeerId {
    pub fn client(id: impl Into<String>) -> PeerId {
        PeerId::Client(id.into())
    }

    pub fn is_server(&self) -> bool {
        matches!(self, PeerId::Server)
    }
}

impl Debug for PeerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerId::Server => write!(f, "server"),
            PeerId::Client(id) => write!(f, "client:{}", id),
        }
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}


/// Identity and network address of a remote peer, used for logging and for routing calls to a
///  specific client on a server
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct PeerInfo {
    pub peer_id: PeerId,
    pub addr: Option<SocketAddr>,
}

impl PeerInfo {
    pub fn server(addr: Option<SocketAddr>) -> PeerInfo {
        PeerInfo {
            peer_id: PeerId::Server,
            addr,
        }
    }

    pub fn client(id: impl Into<String>, addr: Option<SocketAddr>) -> PeerInfo {
        PeerInfo {
            peer_id: PeerId::client(id),
            addr,
        }
    }
}

impl Debug for PeerInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.addr {
            Some(addr) => write!(f, "[{:?}@{}]", self.peer_id, addr),
            None => write!(f, "[{:?}]", self.peer_id),
        }
    }
}
