//! # Sandbox
//!
//! The remote side of the bridge: a document of drawing surfaces reachable
//! only through a byte transport.
//!
//! The host loop owns the transport. Requests that address a root are queued
//! to that root's worker task, so operations on one root run one at a time
//! and in arrival order while different roots proceed concurrently.

pub mod executor;
pub mod object;
pub mod png;
pub mod registry;
pub mod resources;
pub mod surface;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use base64::Engine;
use dashmap::DashMap;
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

use cordrpc::CaptureEncoding;
use cordrpc::CaptureOptions;
use cordrpc::Failure;
use cordrpc::Frame;
use cordrpc::Payload;
use cordrpc::ReplyFrame;
use cordrpc::Request;
use cordrpc::RootId;
use cordrpc::Target;
use cordrpc::Value;

use crate::sandbox::object::ObjectRef;
use crate::sandbox::object::Slot;
use crate::sandbox::registry::Registry;
use crate::sandbox::resources::Fetch;
use crate::sandbox::surface::Canvas;
use crate::transport::Transport;

/// Largest width or height a surface may have unless configured otherwise.
pub const DEFAULT_MAX_SURFACE_DIM: u32 = 16384;

/// Sandbox settings, filled in by `ContextBuilder`.
pub struct Config {
    pub max_surface_dim: u32,
    /// Surfaces present in the document before any root is created.
    pub surfaces: Vec<(String, u32, u32)>,
    pub fetcher: Arc<dyn Fetch>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_surface_dim: DEFAULT_MAX_SURFACE_DIM,
            surfaces: Vec::new(),
            fetcher: Arc::new(resources::AssetStore::new()),
        }
    }
}

struct Job {
    seq: u64,
    request: Request,
}

/// The sandboxed document and its live roots.
pub struct Sandbox {
    max_surface_dim: u32,
    fetcher: Arc<dyn Fetch>,
    surfaces: DashMap<String, Result<Arc<Canvas>, String>>,
    roots: DashMap<RootId, mpsc::UnboundedSender<Job>>,
    workers: DashMap<RootId, JoinHandle<()>>,
    next_root_id: AtomicU64,
}

impl Sandbox {
    pub fn new(config: Config) -> Self {
        let surfaces = DashMap::new();
        for (name, width, height) in config.surfaces {
            let canvas = check_dimensions(width, height, config.max_surface_dim)
                .map(|()| Arc::new(Canvas::new(width, height, config.max_surface_dim)));
            surfaces.insert(name, canvas);
        }

        Self {
            max_surface_dim: config.max_surface_dim,
            fetcher: config.fetcher,
            surfaces,
            roots: DashMap::new(),
            workers: DashMap::new(),
            next_root_id: AtomicU64::new(1),
        }
    }

    pub fn root_count(&self) -> usize {
        self.roots.len()
    }

    /// Serves requests until the transport closes or a `Shutdown` arrives.
    pub async fn serve(self, transport: Arc<dyn Transport>) {
        info!("sandbox serving");
        loop {
            let msg = match transport.recv().await {
                Ok(Some(msg)) => msg,
                Ok(None) => {
                    debug!("controller hung up");
                    break;
                }
                Err(e) => {
                    warn!("Transport error in sandbox: {}", e);
                    break;
                }
            };

            let frame = match Frame::decode(&msg) {
                Ok(Frame::Request(frame)) => frame,
                Ok(Frame::Reply(reply)) => {
                    warn!(seq = reply.seq, "Sandbox received a reply frame; dropped");
                    continue;
                }
                Err(e) => {
                    match cordrpc::decode_seq(&msg) {
                        Ok(seq) => {
                            let reply = ReplyFrame::err(seq, Failure::Protocol(e.to_string()));
                            send_reply(transport.as_ref(), reply).await;
                        }
                        Err(_) => warn!("Undecodable request dropped: {}", e),
                    }
                    continue;
                }
            };

            let seq = frame.seq;
            match frame.request {
                Request::Shutdown => {
                    self.drain().await;
                    send_reply(transport.as_ref(), ReplyFrame::ok(seq, Payload::Unit)).await;
                    break;
                }
                Request::CreateRoot { width, height } => {
                    let status = check_dimensions(width, height, self.max_surface_dim)
                        .map_err(Failure::Init)
                        .map(|()| {
                            let canvas = Arc::new(Canvas::new(width, height, self.max_surface_dim));
                            Payload::Root(self.spawn_root(canvas, transport.clone()))
                        });
                    send_reply(transport.as_ref(), ReplyFrame { seq, status }).await;
                }
                Request::AttachRoot { name } => {
                    let status = match self.surfaces.get(&name).map(|e| e.value().clone()) {
                        Some(Ok(canvas)) => Ok(Payload::Root(self.spawn_root(canvas, transport.clone()))),
                        Some(Err(why)) => Err(Failure::Init(format!("surface '{}': {}", name, why))),
                        None => Err(Failure::Init(format!("no surface named '{}'", name))),
                    };
                    send_reply(transport.as_ref(), ReplyFrame { seq, status }).await;
                }
                request => {
                    let Some(root) = request.root() else { continue };
                    let queued = self
                        .roots
                        .get(&root)
                        .map(|tx| tx.send(Job { seq, request }).is_ok())
                        .unwrap_or(false);
                    if !queued {
                        let reply = ReplyFrame::err(seq, Failure::RegistryMiss { root, id: None });
                        send_reply(transport.as_ref(), reply).await;
                    }
                }
            }
        }
        self.drain().await;
        info!("sandbox stopped");
    }

    fn spawn_root(&self, canvas: Arc<Canvas>, transport: Arc<dyn Transport>) -> RootId {
        let id = RootId(self.next_root_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        let state = RootState {
            id,
            canvas,
            registry: Some(Registry::new()),
            fetcher: self.fetcher.clone(),
            max_surface_dim: self.max_surface_dim,
        };
        let worker = tokio::spawn(state.run(rx, transport));
        self.roots.insert(id, tx);
        self.workers.insert(id, worker);
        debug!(root = %id, "root created");
        id
    }

    /// Lets every root finish what is already queued, then stops its worker.
    async fn drain(&self) {
        self.roots.clear();
        let ids: Vec<RootId> = self.workers.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((_, worker)) = self.workers.remove(&id) {
                let _ = worker.await;
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        return s.to_string();
    }
    if let Some(s) = panic.downcast_ref::<String>() {
        return s.clone();
    }
    "unknown panic".to_string()
}

fn check_dimensions(width: u32, height: u32, max: u32) -> Result<(), String> {
    if width == 0 || height == 0 || width > max || height > max {
        return Err(format!("invalid surface size {}x{} (limit {})", width, height, max));
    }
    Ok(())
}

async fn send_reply(transport: &dyn Transport, reply: ReplyFrame) {
    let seq = reply.seq;
    let bytes = match reply.to_bytes() {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(seq, "Reply could not be encoded: {}", e);
            match ReplyFrame::err(seq, Failure::Protocol(e.to_string())).to_bytes() {
                Ok(bytes) => bytes,
                Err(_) => return,
            }
        }
    };
    if let Err(e) = transport.send(&bytes).await {
        warn!(seq, "Reply could not be sent: {}", e);
    }
}

/// One root: its surface and its reference registry.
struct RootState {
    id: RootId,
    canvas: Arc<Canvas>,
    /// `None` once released.
    registry: Option<Registry>,
    fetcher: Arc<dyn Fetch>,
    max_surface_dim: u32,
}

impl RootState {
    async fn run(mut self, mut jobs: mpsc::UnboundedReceiver<Job>, transport: Arc<dyn Transport>) {
        while let Some(Job { seq, request }) = jobs.recv().await {
            let kind = request.name();
            // A panic fails this request only; the root keeps serving.
            let status = match AssertUnwindSafe(self.handle(request)).catch_unwind().await {
                Ok(status) => status,
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    warn!(root = %self.id, seq, "{} panicked: {}", kind, message);
                    Err(Failure::thrown("InternalError", format!("{} failed: {}", kind, message)))
                }
            };
            if let Err(failure) = &status {
                debug!(root = %self.id, seq, "request failed: {}", failure);
            }
            send_reply(transport.as_ref(), ReplyFrame { seq, status }).await;
        }
    }

    fn registry(&mut self) -> Result<&mut Registry, Failure> {
        let root = self.id;
        self.registry.as_mut().ok_or(Failure::RegistryMiss { root, id: None })
    }

    async fn handle(&mut self, request: Request) -> Result<Payload, Failure> {
        let root = self.id;
        match request {
            Request::Invoke { target, op } => {
                let canvas: ObjectRef = self.canvas.clone();
                let registry = self.registry()?;
                let base = match &target {
                    Target::Root(_) => Slot::Object(canvas),
                    Target::Reference { id, .. } => Slot::Object(executor::lookup(registry, root, id)?),
                };
                let value = executor::execute(registry, root, base, op).await?;
                Ok(Payload::Value(value))
            }
            Request::Resolve { id, .. } => {
                let registry = self.registry()?;
                Ok(Payload::Value(executor::describe(registry, root, &id)?))
            }
            Request::Release { .. } => {
                if self.registry.take().is_some() {
                    debug!(%root, "registry released");
                }
                Ok(Payload::Unit)
            }
            Request::Capture { options, .. } => self.capture(options),
            Request::LoadImage { src, .. } => {
                self.registry()?;
                let image =
                    resources::load_image(self.fetcher.as_ref(), &src, self.max_surface_dim).await?;
                let id = self.registry()?.insert(Arc::new(image));
                Ok(Payload::Value(Value::Ref(id)))
            }
            Request::LoadFont { family, src, .. } => {
                self.registry()?;
                let font = resources::load_font(self.fetcher.as_ref(), &family, &src).await?;
                let id = self.registry()?.insert(Arc::new(font));
                Ok(Payload::Value(Value::Ref(id)))
            }
            other => Err(Failure::Protocol(format!("{} is not addressed to a root", other.name()))),
        }
    }

    fn capture(&self, options: CaptureOptions) -> Result<Payload, Failure> {
        let png = self.canvas.to_png(options.clip)?;
        let value = match options.encoding {
            CaptureEncoding::Binary => Value::Bytes(png),
            CaptureEncoding::Base64 => {
                Value::String(base64::engine::general_purpose::STANDARD.encode(png))
            }
        };
        Ok(Payload::Value(value))
    }
}
