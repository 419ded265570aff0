//! Rendering resources shared between renderers
//!
//! This module does not draw anything itself. It manages the resources concrete
//! renderers (GL, Vulkan, software, ...) need to display buffers:
//!
//! - [`Renderer`] is a handle to a renderer implementation ([`RendererImpl`]),
//!   that can import [`Buffer`]s into [`Texture`]s.
//! - [`GpuRegistry`] tracks the renderers of every gpu in the system and the primary one.
//! - [`TextureSet`] caches a texture per renderer for a single buffer, importing the buffer
//!   directly where possible and falling back to a copy through system memory otherwise.
//! - [`ClientBuffer`] wraps a producer buffer and its texture set, applying damage in place.
//!
//! Every operation touching a renderer receives the [`CurrentContext`] register explicitly.
//! Operations that involve multiple renderers restore the context that was current
//! before they were called.
//!
//! ## Lifetimes
//!
//! Renderers may be destroyed at any time, e.g. when a gpu is unplugged, while textures
//! and texture sets still reference them. Long lived structures register for the
//! destruction through [`Renderer::on_destroy`] and drop their references when notified.
//!
//! Textures are released through the renderer that created them. Dropping a texture
//! only queues it, the renderer releases queued textures at the start of its next
//! operation, on [`Renderer::cleanup`] or on [`Renderer::destroy`].

use std::{
    cell::RefCell,
    fmt,
    rc::{Rc, Weak},
    sync::mpsc::{channel, Receiver, Sender},
};

use downcast_rs::{impl_downcast, Downcast};
use tracing::{info_span, trace};

use crate::backend::allocator::{Buffer, Fourcc};
use crate::utils::{
    AliveTracker, Buffer as BufferCoords, DeadResource, IsAlive, Rectangle, SignalToken, Signaler, Size,
};

pub mod client_buffer;
pub mod context;
pub mod multigpu;
pub mod texture;
pub mod texture_set;


pub use self::client_buffer::{ClientBuffer, ClientBufferError};
pub use self::context::{CurrentContext, GpuContext, SavedContext};
pub use self::multigpu::{GpuRegistry, RegistryError};
pub use self::texture::{Texture, TextureError};
pub use self::texture_set::{TextureSet, TextureSetError, INTERCHANGE_FORMAT};

crate::utils::ids::id_gen!(renderer_id);

/// Errors reported by renderer implementations
#[derive(Debug, thiserror::Error)]
pub enum RendererError {
    /// The renderer can not handle the buffer, its format or its modifier.
    ///
    /// This is an expected outcome of imports and never fatal.
    #[error("the renderer does not support this buffer")]
    Unsupported,
    /// The destination of a pixel read is too small
    #[error("pixel destination too small, expected {expected} bytes, got {got}")]
    InvalidPixels {
        /// Required amount of bytes
        expected: usize,
        /// Provided amount of bytes
        got: usize,
    },
    /// No buffer is bound for reading
    #[error("no buffer is bound")]
    NotBound,
    /// The renderer was destroyed
    #[error("the renderer was destroyed")]
    Destroyed(#[source] DeadResource),
    /// The renderer is already executing an operation
    #[error("the renderer is busy")]
    Busy,
    /// Implementation specific error
    #[error("renderer error: {0}")]
    Backend(#[source] Box<dyn std::error::Error>),
}

/// Renderer implementation driven by a [`Renderer`] handle
///
/// Every method receives the [`CurrentContext`] register and has to make its own
/// context current through it, before issuing any gpu commands.
pub trait RendererImpl: fmt::Debug {
    /// Import a buffer into a new texture
    ///
    /// Returns [`RendererError::Unsupported`] if the buffer can not be imported,
    /// e.g. because of its format, modifier or storage type.
    fn texture_from_buffer(
        &mut self,
        ctx: &mut CurrentContext,
        buffer: &Buffer,
    ) -> Result<Box<dyn TextureImpl>, RendererError>;

    /// Refresh the damaged regions of a texture from a buffer of the same size
    ///
    /// Damage is already validated against the size of the texture.
    fn update_texture(
        &mut self,
        ctx: &mut CurrentContext,
        texture: &mut dyn TextureImpl,
        buffer: &Buffer,
        damage: &[Rectangle<i32, BufferCoords>],
    ) -> Result<(), RendererError> {
        let _ = (ctx, texture, buffer, damage);
        Err(RendererError::Unsupported)
    }

    /// Bind a buffer as target of subsequent read operations
    fn bind(&mut self, ctx: &mut CurrentContext, buffer: &Buffer) -> Result<(), RendererError>;

    /// Release the currently bound buffer
    fn unbind(&mut self, ctx: &mut CurrentContext) -> Result<(), RendererError>;

    /// Format pixels of the bound buffer are read most efficiently in
    fn preferred_read_format(&mut self, ctx: &mut CurrentContext) -> Result<Fourcc, RendererError>;

    /// Read a region of the bound buffer into `dst`
    ///
    /// Rows are written `stride` bytes apart.
    fn read_pixels(
        &mut self,
        ctx: &mut CurrentContext,
        format: Fourcc,
        stride: u32,
        region: Rectangle<i32, BufferCoords>,
        dst: &mut [u8],
    ) -> Result<(), RendererError>;

    /// Release a texture previously created by this renderer
    fn destroy_texture(&mut self, ctx: &mut CurrentContext, texture: Box<dyn TextureImpl>) {
        let _ = ctx;
        std::mem::drop(texture);
    }
}

/// Texture storage of a renderer implementation
pub trait TextureImpl: Downcast + fmt::Debug {
    /// Size of the texture in pixels
    fn size(&self) -> Size<i32, BufferCoords>;

    /// Pixel format of the texture, if known
    fn format(&self) -> Option<Fourcc> {
        None
    }
}
impl_downcast!(TextureImpl);

type TextureQueue = (Sender<Box<dyn TextureImpl>>, Receiver<Box<dyn TextureImpl>>);

struct RendererInner {
    id: usize,
    span: tracing::Span,
    alive: AliveTracker,
    destroy: Signaler<()>,
    registry: RefCell<Weak<multigpu::RegistryInner>>,
    backend: RefCell<Option<Box<dyn RendererImpl>>>,
    destruction_callback: RefCell<Option<Receiver<Box<dyn TextureImpl>>>>,
    destruction_callback_sender: Sender<Box<dyn TextureImpl>>,
}

impl Drop for RendererInner {
    fn drop(&mut self) {
        renderer_id::remove(self.id);
    }
}

/// Handle to a renderer
///
/// Handles are cheap to clone and compare by identity.
#[derive(Clone)]
pub struct Renderer(Rc<RendererInner>);

impl fmt::Debug for Renderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Renderer")
            .field("id", &self.0.id)
            .field("alive", &self.0.alive.alive())
            .finish_non_exhaustive()
    }
}

impl PartialEq for Renderer {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for Renderer {}

impl IsAlive for Renderer {
    #[inline]
    fn alive(&self) -> bool {
        self.0.alive.alive()
    }
}

impl Renderer {
    /// Create a new renderer handle driving the given implementation
    pub fn new<R: RendererImpl + 'static>(backend: R) -> Renderer {
        let id = renderer_id::next();
        let span = info_span!("renderer", id);
        trace!(parent: &span, ?backend, "Created renderer");
        let (sender, receiver): TextureQueue = channel();

        Renderer(Rc::new(RendererInner {
            id,
            span,
            alive: AliveTracker::default(),
            destroy: Signaler::new(),
            registry: RefCell::new(Weak::new()),
            backend: RefCell::new(Some(Box::new(backend))),
            destruction_callback: RefCell::new(Some(receiver)),
            destruction_callback_sender: sender,
        }))
    }

    /// Unique id of this renderer
    pub fn id(&self) -> usize {
        self.0.id
    }

    /// Span all operations of this renderer are logged in
    pub fn span(&self) -> &tracing::Span {
        &self.0.span
    }

    /// Create a weak reference to this renderer
    pub fn downgrade(&self) -> WeakRenderer {
        WeakRenderer(Rc::downgrade(&self.0))
    }

    /// The registry this renderer is a member of, if any
    pub fn registry(&self) -> Option<GpuRegistry> {
        self.0.registry.borrow().upgrade().map(GpuRegistry)
    }

    pub(crate) fn set_registry(&self, registry: Weak<multigpu::RegistryInner>) {
        *self.0.registry.borrow_mut() = registry;
    }

    /// Register a callback invoked when this renderer is destroyed
    ///
    /// Callbacks run before the implementation is dropped. Textures released from
    /// within the callback are still released through this renderer.
    #[must_use = "the callback is unregistered when the token is dropped"]
    pub fn on_destroy<F: FnMut() + 'static>(&self, mut f: F) -> SignalToken {
        self.0.destroy.register(move |_| f())
    }

    /// Run an operation on the renderer implementation
    ///
    /// Textures queued for destruction are released first.
    pub fn with_backend<T, F>(&self, ctx: &mut CurrentContext, f: F) -> Result<T, RendererError>
    where
        F: FnOnce(&mut dyn RendererImpl, &mut CurrentContext) -> Result<T, RendererError>,
    {
        if !self.alive() {
            return Err(RendererError::Destroyed(DeadResource));
        }
        let _guard = self.0.span.enter();

        let mut backend = self.0.backend.try_borrow_mut().map_err(|_| RendererError::Busy)?;
        let backend = backend
            .as_deref_mut()
            .ok_or(RendererError::Destroyed(DeadResource))?;
        self.release_queued(ctx, backend);
        f(backend, ctx)
    }

    /// Release textures queued for destruction
    pub fn cleanup(&self, ctx: &mut CurrentContext) -> Result<(), RendererError> {
        self.with_backend(ctx, |_, _| Ok(()))
    }

    /// Tear down this renderer
    ///
    /// Detaches the renderer from its registry, notifies every callback registered
    /// through [`Renderer::on_destroy`], releases all queued textures and drops the
    /// implementation. Textures dropped afterwards are freed without involving the renderer.
    pub fn destroy(&self, ctx: &mut CurrentContext) {
        if !self.0.alive.destroy_notify() {
            return;
        }
        let _guard = self.0.span.enter();
        trace!("Destroying renderer");

        if let Some(registry) = self.registry() {
            registry.detach(self);
        }
        self.0.destroy.signal(());

        let receiver = self.0.destruction_callback.borrow_mut().take();
        let backend = self.0.backend.borrow_mut().take();
        if let (Some(mut backend), Some(receiver)) = (backend, receiver) {
            let mut ctx = ctx.save();
            for texture in receiver.try_iter() {
                backend.destroy_texture(&mut ctx, texture);
            }
        }
    }

    pub(crate) fn destruction_sender(&self) -> Sender<Box<dyn TextureImpl>> {
        self.0.destruction_callback_sender.clone()
    }

    fn release_queued(&self, ctx: &mut CurrentContext, backend: &mut dyn RendererImpl) {
        let receiver = self.0.destruction_callback.borrow();
        let Some(receiver) = receiver.as_ref() else {
            return;
        };
        for texture in receiver.try_iter() {
            trace!(?texture, "Releasing texture");
            backend.destroy_texture(ctx, texture);
        }
    }
}

/// Weak reference to a [`Renderer`]
#[derive(Clone)]
pub struct WeakRenderer(Weak<RendererInner>);

impl fmt::Debug for WeakRenderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WeakRenderer").field(&self.0.as_ptr()).finish()
    }
}

impl PartialEq for WeakRenderer {
    fn eq(&self, other: &Self) -> bool {
        Weak::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for WeakRenderer {}

impl WeakRenderer {
    /// Try to upgrade to a strong handle
    ///
    /// Returns `None` once every strong handle is gone or the renderer was destroyed.
    pub fn upgrade(&self) -> Option<Renderer> {
        self.0.upgrade().map(Renderer).filter(|renderer| renderer.alive())
    }
}
