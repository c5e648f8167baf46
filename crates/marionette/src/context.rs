//! # Context
//!
//! One live connection to one sandbox. Roots are created or attached through
//! the context, and every proxy derived from a root shares its peer.
//!
//! ```ignore
//! let ctx = Context::builder().surface("board", 400, 400).open();
//! let canvas = ctx.attach_root("board").await?;
//! let g = canvas.call("getContext", args!["2d"]).await?.into_proxy()?;
//! g.set("fillStyle", "#336699").await?;
//! g.call("fillRect", args![0, 0, 100, 100]).await?;
//! let png = ctx.capture(&canvas, CaptureOptions::default()).await?;
//! ctx.close().await?;
//! ```

use std::sync::Arc;

use base64::Engine;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;

use cordrpc::CaptureOptions;
use cordrpc::Payload;
use cordrpc::Request;
use cordrpc::RootId;
use cordrpc::Value;

use crate::transport::ChannelTransport;
use crate::error::Error;
use crate::error::Result;
use crate::peer::Peer;
use crate::proxy::Proxy;
use crate::resolve;
use crate::sandbox;
use crate::sandbox::Sandbox;
use crate::sandbox::resources::AssetStore;
use crate::sandbox::resources::Fetch;
use crate::transport::Transport;

/// A PNG snapshot, in the encoding that was asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capture {
    Binary(Vec<u8>),
    Base64(String),
}

impl Capture {
    /// The PNG bytes, decoding base64 if needed.
    pub fn to_png(&self) -> Result<Vec<u8>> {
        match self {
            Self::Binary(bytes) => Ok(bytes.clone()),
            Self::Base64(text) => base64::engine::general_purpose::STANDARD
                .decode(text)
                .map_err(|e| Error::UnexpectedReply(format!("capture is not base64: {}", e))),
        }
    }
}

/// Fluent configuration for a context and the sandbox it spawns.
pub struct ContextBuilder {
    peer_name: String,
    max_surface_dim: u32,
    surfaces: Vec<(String, u32, u32)>,
    assets: AssetStore,
    fetcher: Option<Arc<dyn Fetch>>,
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self {
            peer_name: "controller".to_string(),
            max_surface_dim: sandbox::DEFAULT_MAX_SURFACE_DIM,
            surfaces: Vec::new(),
            assets: AssetStore::new(),
            fetcher: None,
        }
    }
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn peer_name(mut self, name: impl Into<String>) -> Self {
        self.peer_name = name.into();
        self
    }

    /// Largest width or height accepted for any surface.
    pub fn max_surface_dim(mut self, dim: u32) -> Self {
        self.max_surface_dim = dim;
        self
    }

    /// Adds a named surface to the document, for `Context::attach_root`.
    pub fn surface(mut self, name: impl Into<String>, width: u32, height: u32) -> Self {
        self.surfaces.push((name.into(), width, height));
        self
    }

    /// Serves `bytes` to image and font loads of `name`.
    ///
    /// Ignored when a custom fetcher is installed.
    pub fn asset(mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.assets.insert(name, bytes.into());
        self
    }

    pub fn fetcher(mut self, fetcher: impl Fetch) -> Self {
        self.fetcher = Some(Arc::new(fetcher));
        self
    }

    /// Spawns the sandbox on the current runtime and connects to it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(self) -> Context {
        let fetcher: Arc<dyn Fetch> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(self.assets),
        };
        let config = sandbox::Config {
            max_surface_dim: self.max_surface_dim,
            surfaces: self.surfaces,
            fetcher,
        };
        let (local, remote) = ChannelTransport::pair();
        let host = tokio::spawn(Sandbox::new(config).serve(Arc::new(remote)));
        info!(peer = %self.peer_name, "context opened");
        Context {
            peer: Arc::new(Peer::new(self.peer_name, Box::new(local))),
            host: Some(host),
        }
    }
}

/// A connection to a sandbox.
pub struct Context {
    peer: Arc<Peer>,
    /// The in-process sandbox task, if this context spawned one.
    host: Option<JoinHandle<()>>,
}

impl Context {
    /// Opens a context over a fresh in-process sandbox with default settings.
    pub fn open() -> Self {
        ContextBuilder::new().open()
    }

    pub fn builder() -> ContextBuilder {
        ContextBuilder::new()
    }

    /// Connects to a sandbox served on the other end of `transport`.
    pub fn connect(peer_name: impl Into<String>, transport: Box<dyn Transport>) -> Self {
        Self {
            peer: Arc::new(Peer::new(peer_name, transport)),
            host: None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.peer.is_closed()
    }

    /// Creates a fresh surface and returns its root proxy.
    pub async fn create_root(&self, width: u32, height: u32) -> Result<Proxy> {
        let payload = self.peer.call(Request::CreateRoot { width, height }).await?;
        self.root_proxy(payload)
    }

    /// Links a root to a surface already present in the document.
    pub async fn attach_root(&self, name: impl Into<String>) -> Result<Proxy> {
        let payload = self.peer.call(Request::AttachRoot { name: name.into() }).await?;
        self.root_proxy(payload)
    }

    fn root_proxy(&self, payload: Payload) -> Result<Proxy> {
        match payload {
            Payload::Root(root) => {
                debug!(%root, "root ready");
                Ok(Proxy::root(self.peer.clone(), root))
            }
            other => Err(Error::UnexpectedReply(format!("expected a root, got {:?}", other))),
        }
    }

    fn own_root(&self, proxy: &Proxy) -> Result<RootId> {
        if !proxy.belongs_to(&self.peer) {
            return Err(Error::Unmarshalable(format!("{} belongs to another context", proxy)));
        }
        Ok(proxy.root_id())
    }

    /// Drops every reference held for the root of `proxy`.
    ///
    /// Later operations on that root fail with a registry miss. Releasing twice
    /// is harmless.
    pub async fn release(&self, proxy: &Proxy) -> Result<()> {
        let root = self.own_root(proxy)?;
        self.peer.call(Request::Release { root }).await?;
        Ok(())
    }

    /// PNG snapshot of the root's surface. Does not go through the registry.
    pub async fn capture(&self, proxy: &Proxy, options: CaptureOptions) -> Result<Capture> {
        let root = self.own_root(proxy)?;
        match self.peer.call(Request::Capture { root, options }).await? {
            Payload::Value(Value::Bytes(bytes)) => Ok(Capture::Binary(bytes)),
            Payload::Value(Value::String(text)) => Ok(Capture::Base64(text)),
            other => Err(Error::UnexpectedReply(format!("capture returned {:?}", other))),
        }
    }

    /// Loads an image inside the sandbox. The pixels never reach the controller.
    pub async fn load_image(&self, proxy: &Proxy, src: impl Into<String>) -> Result<Proxy> {
        let root = self.own_root(proxy)?;
        let payload = self.peer.call(Request::LoadImage { root, src: src.into() }).await?;
        resolve::resolve_object(&self.peer, root, payload).await
    }

    pub async fn load_font(
        &self,
        proxy: &Proxy,
        family: impl Into<String>,
        src: impl Into<String>,
    ) -> Result<Proxy> {
        let root = self.own_root(proxy)?;
        let request = Request::LoadFont {
            root,
            family: family.into(),
            src: src.into(),
        };
        let payload = self.peer.call(request).await?;
        resolve::resolve_object(&self.peer, root, payload).await
    }

    /// Shuts the sandbox down and invalidates every proxy of this context.
    pub async fn close(mut self) -> Result<()> {
        let shutdown = match self.peer.submit(Request::Shutdown) {
            Ok(reply) => reply.wait().await.map(|_| ()),
            Err(Error::Closed) => Ok(()),
            Err(e) => Err(e),
        };
        self.peer.close();
        if let Some(host) = self.host.take() {
            let _ = host.await;
        }
        info!(peer = %self.peer.peer_name(), "context closed");
        match shutdown {
            Err(Error::Closed) => Ok(()),
            other => other,
        }
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.peer.close();
        if let Some(host) = self.host.take() {
            host.abort();
        }
    }
}
