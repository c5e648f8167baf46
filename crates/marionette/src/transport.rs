//! # Transport Abstraction
//!
//! A minimal, async interface for moving bytes between the controller and the
//! sandbox.
//!
//! ## Philosophy
//!
//! - **Byte-Oriented**: The Transport knows nothing about frames, operations or
//!   proxies. It moves opaque buffers.
//! - **Ordered**: Buffers arrive in the order they were sent. Per-root
//!   ordering of operations is built on this guarantee.

use tokio::sync::Mutex;
use tokio::sync::mpsc;

/// Errors that occur at the transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The other end is gone or the connection was dropped.
    ConnectionLost(String),
    /// Generic I/O error or internal transport failure.
    Io(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// A bidirectional, ordered byte pipe.
///
/// This trait is object-safe (`Arc<dyn Transport>`).
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends one buffer to the other end.
    async fn send(&self, payload: &[u8]) -> Result<()>;

    /// Receives the next buffer, or `Ok(None)` once the other end has hung up.
    async fn recv(&self) -> Result<Option<Vec<u8>>>;
}

/// In-process duplex pipe over unbounded tokio channels.
///
/// `Context::open` reaches its sandbox through one of these. Dropping one end
/// makes the other end's `recv` return `Ok(None)`.
pub struct ChannelTransport {
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
    incoming: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl ChannelTransport {
    fn joined(
        outgoing: mpsc::UnboundedSender<Vec<u8>>,
        incoming: mpsc::UnboundedReceiver<Vec<u8>>,
    ) -> Self {
        Self { outgoing, incoming: Mutex::new(incoming) }
    }

    /// Two ends wired back to back.
    pub fn pair() -> (Self, Self) {
        let (to_right, from_left) = mpsc::unbounded_channel();
        let (to_left, from_right) = mpsc::unbounded_channel();
        (Self::joined(to_right, from_right), Self::joined(to_left, from_left))
    }
}

#[async_trait::async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, payload: &[u8]) -> Result<()> {
        self.outgoing
            .send(payload.to_vec())
            .map_err(|_| Error::ConnectionLost("other end dropped".into()))
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.incoming.lock().await.recv().await)
    }
}
