//! Connection handling: the inbound byte queue, the outbound writer and the
//! [`HttpConnection`] that wires both to a transport and runs the request
//! loop over them.

mod http_connection;
mod input;
mod output;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

pub use http_connection::HttpConnection;
pub use input::{Consuming, ReadInterest, Ready, SocketInput};
pub use output::{OutputReceiver, ProduceEndType, SocketOutput};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Identity and endpoints of one connection, as seen by the application.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    id: u64,
    remote_addr: Option<SocketAddr>,
    local_addr: Option<SocketAddr>,
}

impl ConnectionInfo {
    /// Allocates a new, process-unique connection id.
    pub fn new(remote_addr: Option<SocketAddr>, local_addr: Option<SocketAddr>) -> Self {
        Self { id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed), remote_addr, local_addr }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

impl Default for ConnectionInfo {
    fn default() -> Self {
        Self::new(None, None)
    }
}
