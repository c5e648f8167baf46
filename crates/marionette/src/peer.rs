//! # Peer with Async Pump
//!
//! The controller's end of the wire. Requests are encoded and queued
//! synchronously, written by a single writer task in queue order, and their
//! replies are routed back by sequence number through a pump task.
//!
//! Submission is synchronous so that the order in which callers *issue*
//! operations is the order in which the sandbox *receives* them, even when
//! nobody awaits the returned handles.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::warn;

use cordrpc::Frame;
use cordrpc::Payload;
use cordrpc::Request;
use cordrpc::RequestFrame;

use crate::error::Error;
use crate::error::Result;
use crate::transport;
use crate::transport::Transport;

type Pending = DashMap<u64, oneshot::Sender<Result<Payload>>>;

/// A reply that has been asked for but not yet received.
#[must_use = "the request is already sent; await this to observe its outcome"]
pub struct PendingReply {
    seq: u64,
    rx: oneshot::Receiver<Result<Payload>>,
}

impl PendingReply {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub async fn wait(self) -> Result<Payload> {
        self.rx.await.map_err(|_| Error::Closed)?
    }
}

/// Request/reply peer over a `Transport`.
///
/// Each Peer owns its transport exclusively, so sequence numbers are scoped to
/// one connection. Peers are shared behind `Arc` by every proxy of a context.
pub struct Peer {
    peer_name: String,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    pending: Arc<Pending>,
    seq_gen: AtomicU64,
    closed: Arc<AtomicBool>,
    writer: JoinHandle<()>,
    pump: JoinHandle<()>,
}

impl Peer {
    /// Creates a new peer and spawns its writer and pump tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(peer_name: impl Into<String>, transport: Box<dyn Transport>) -> Self {
        let peer_name = peer_name.into();
        let transport: Arc<dyn Transport> = Arc::from(transport);
        let pending: Arc<Pending> = Arc::new(DashMap::new());
        let closed = Arc::new(AtomicBool::new(false));
        let (outbound, mut queue) = mpsc::unbounded_channel::<Vec<u8>>();

        let writer_transport = transport.clone();
        let writer_pending = pending.clone();
        let writer_closed = closed.clone();
        let writer_name = peer_name.clone();
        let writer = tokio::spawn(async move {
            while let Some(bytes) = queue.recv().await {
                if let Err(e) = writer_transport.send(&bytes).await {
                    warn!(peer = %writer_name, "Transport error in writer: {}", e);
                    writer_closed.store(true, Ordering::SeqCst);
                    Self::notify_all_pending(&writer_pending, Error::Transport(e));
                    break;
                }
            }
        });

        let pump_transport = transport;
        let pump_pending = pending.clone();
        let pump_closed = closed.clone();
        let pump_name = peer_name.clone();
        let pump = tokio::spawn(async move {
            let error = loop {
                match pump_transport.recv().await {
                    Ok(Some(msg)) => Self::handle_message(&pump_name, &msg, &pump_pending),
                    Ok(None) => {
                        debug!(peer = %pump_name, "Stream closed");
                        break Error::Closed;
                    }
                    Err(e) => {
                        warn!(peer = %pump_name, "Transport error in pump: {}", e);
                        break Error::Transport(e);
                    }
                }
            };

            pump_closed.store(true, Ordering::SeqCst);
            Self::notify_all_pending(&pump_pending, error);
        });

        Self {
            peer_name,
            outbound,
            pending,
            seq_gen: AtomicU64::new(1),
            closed,
            writer,
            pump,
        }
    }

    /// Returns the peer name used in logs.
    pub fn peer_name(&self) -> &str {
        &self.peer_name
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Fails every outstanding request and refuses new ones.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        Self::notify_all_pending(&self.pending, Error::Closed);
    }

    fn notify_all_pending(pending: &Pending, error: Error) {
        let keys: Vec<u64> = pending.iter().map(|e| *e.key()).collect();
        for key in keys {
            if let Some((_, tx)) = pending.remove(&key) {
                let _ = tx.send(Err(error.clone()));
            }
        }
    }

    fn handle_message(peer_name: &str, msg: &[u8], pending: &Pending) {
        let reply = match Frame::decode(msg) {
            Ok(Frame::Reply(reply)) => reply,
            Ok(Frame::Request(request)) => {
                warn!(peer = %peer_name, seq = request.seq, "Pump received a request frame; dropped");
                return;
            }
            Err(e) => {
                // Fail the one caller we can still identify; the rest keep waiting.
                match cordrpc::decode_seq(msg) {
                    Ok(seq) => {
                        if let Some((_, tx)) = pending.remove(&seq) {
                            let _ = tx.send(Err(Error::Codec(e)));
                        }
                    }
                    Err(_) => warn!(peer = %peer_name, "Undecodable reply dropped: {}", e),
                }
                return;
            }
        };

        let Some((_, tx)) = pending.remove(&reply.seq) else {
            warn!(peer = %peer_name, seq = reply.seq, "Reply for unknown sequence");
            return;
        };

        let _ = tx.send(reply.status.map_err(Error::Remote));
    }

    /// Queues a request for sending and returns a handle to its reply.
    ///
    /// The request is on its way when this returns; dropping the handle does
    /// not cancel it.
    pub fn submit(&self, request: Request) -> Result<PendingReply> {
        if self.is_closed() {
            return Err(Error::Closed);
        }

        let seq = self.seq_gen.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        debug!(peer = %self.peer_name, seq, kind = request.name(), "submit");

        let bytes = RequestFrame::new(seq, request).to_bytes()?;
        self.pending.insert(seq, tx);

        if self.outbound.send(bytes).is_err() {
            self.pending.remove(&seq);
            return Err(Error::Transport(transport::Error::ConnectionLost("Writer stopped".into())));
        }

        // The pump may have drained `pending` between the check above and the insert.
        if self.is_closed() && self.pending.remove(&seq).is_some() {
            return Err(Error::Closed);
        }

        Ok(PendingReply { seq, rx })
    }

    /// Sends a request and awaits its reply.
    pub async fn call(&self, request: Request) -> Result<Payload> {
        self.submit(request)?.wait().await
    }
}

impl Drop for Peer {
    fn drop(&mut self) {
        self.writer.abort();
        self.pump.abort();
    }
}
