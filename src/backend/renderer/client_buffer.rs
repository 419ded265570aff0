//! Buffers wrapping a producer buffer and its textures
//!
//! A [`ClientBuffer`] is created once a producer buffer, e.g. a client's surface
//! contents, has to be displayed. It imports the producer buffer into a [`TextureSet`]
//! and is itself a [`Buffer`], so it can be locked by whoever displays it.
//!
//! When the producer submits a new buffer of the same size, [`ClientBuffer::apply_damage`]
//! refreshes the existing textures in place instead of importing the new buffer. This is
//! only possible while no one else may still read the current contents.

use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::Rc,
};

use tracing::{debug, error, trace, warn};

use super::{CurrentContext, Renderer, Texture, TextureSet, TextureSetError};
use crate::backend::allocator::{dmabuf::Dmabuf, Buffer, BufferImpl};
use crate::utils::{Buffer as BufferCoords, DeadResource, IsAlive, Rectangle, SignalToken};

/// Errors of [`ClientBuffer`] operations
#[derive(Debug, thiserror::Error)]
pub enum ClientBufferError {
    /// The contents are still in use by more than one holder
    #[error("the buffer is still used by {locks} holders")]
    Busy {
        /// Number of locks held besides the client buffer's own
        locks: usize,
    },
    /// The client buffer was destroyed
    #[error("the client buffer was destroyed")]
    Destroyed(#[source] DeadResource),
    /// The texture set failed
    #[error(transparent)]
    TextureSet(#[from] TextureSetError),
}

struct ClientBufferState {
    source: RefCell<Option<Buffer>>,
    texture_set: RefCell<Option<TextureSet>>,
    n_ignore_locks: Cell<usize>,
    source_destroy: RefCell<Option<SignalToken>>,
}

impl fmt::Debug for ClientBufferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBufferState")
            .field("source", &self.source.borrow())
            .field("n_ignore_locks", &self.n_ignore_locks.get())
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct ClientBufferStorage {
    state: Rc<ClientBufferState>,
}

impl BufferImpl for ClientBufferStorage {
    fn dmabuf(&self) -> Option<Dmabuf> {
        let source = self.state.source.borrow().clone()?;
        source.get_dmabuf().ok()
    }
}

impl Drop for ClientBufferStorage {
    fn drop(&mut self) {
        trace!("Destroying client buffer");
        let source_destroy = self.state.source_destroy.borrow_mut().take();
        std::mem::drop(source_destroy);
        let texture_set = self.state.texture_set.borrow_mut().take();
        std::mem::drop(texture_set);
        self.state.source.borrow_mut().take();
    }
}

/// A producer buffer imported for display
///
/// The client buffer holds one lock on itself, which does not count as a user of its
/// contents. It is released with [`ClientBuffer::unlock_ignored`], once the owner does
/// not need the client buffer anymore. The client buffer is destroyed when the last lock
/// is gone, releasing its textures.
#[derive(Debug, Clone)]
pub struct ClientBuffer {
    buffer: Buffer,
    state: Rc<ClientBufferState>,
}

impl PartialEq for ClientBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.buffer == other.buffer
    }
}

impl ClientBuffer {
    /// Import a producer buffer for display
    ///
    /// Fails if no renderer can import the buffer.
    pub fn create(
        ctx: &mut CurrentContext,
        source: &Buffer,
        renderer: &Renderer,
    ) -> Result<ClientBuffer, ClientBufferError> {
        let texture_set = TextureSet::from_buffer(ctx, renderer, source).map_err(|err| {
            error!(?err, "Failed to create texture");
            err
        })?;

        let state = Rc::new(ClientBufferState {
            source: RefCell::new(Some(source.clone())),
            texture_set: RefCell::new(Some(texture_set)),
            n_ignore_locks: Cell::new(0),
            source_destroy: RefCell::new(None),
        });
        let buffer = Buffer::new(
            source.size(),
            ClientBufferStorage {
                state: state.clone(),
            },
        );

        let weak = Rc::downgrade(&state);
        let source_destroy = source.on_destroy(move || {
            let Some(state) = weak.upgrade() else {
                return;
            };
            trace!("Source buffer destroyed");
            state.source.borrow_mut().take();
            let token = state.source_destroy.borrow_mut().take();
            std::mem::drop(token);
        });
        *state.source_destroy.borrow_mut() = Some(source_destroy);

        let client_buffer = ClientBuffer { buffer, state };
        client_buffer.lock_ignored();
        client_buffer.buffer.drop_buffer();
        Ok(client_buffer)
    }

    /// Recover the client buffer from a generic buffer handle
    ///
    /// Returns `None` if the buffer is no client buffer or was destroyed.
    pub fn get(buffer: &Buffer) -> Option<ClientBuffer> {
        let storage = buffer.downcast_storage::<ClientBufferStorage>()?;
        Some(ClientBuffer {
            buffer: buffer.clone(),
            state: storage.state.clone(),
        })
    }

    /// The client buffer as generic buffer
    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    /// The producer buffer, if it was not destroyed yet
    pub fn source(&self) -> Option<Buffer> {
        self.state.source.borrow().clone()
    }

    /// Number of locks not counting as users of the contents
    pub fn n_ignore_locks(&self) -> usize {
        self.state.n_ignore_locks.get()
    }

    /// Take a lock that does not count as a user of the contents
    pub fn lock_ignored(&self) {
        self.buffer.lock();
        self.state.n_ignore_locks.set(self.state.n_ignore_locks.get() + 1);
    }

    /// Release a lock taken by [`ClientBuffer::lock_ignored`]
    pub fn unlock_ignored(&self) {
        let n_ignore_locks = self.state.n_ignore_locks.get();
        if n_ignore_locks == 0 {
            warn!("Releasing an ignored lock that was never taken");
            return;
        }
        self.state.n_ignore_locks.set(n_ignore_locks - 1);
        self.buffer.unlock();
    }

    /// Refresh the textures in place from the next buffer of the producer
    ///
    /// Refused with [`ClientBufferError::Busy`] while more than one holder may still
    /// read the current contents.
    pub fn apply_damage(
        &self,
        ctx: &mut CurrentContext,
        next: &Buffer,
        damage: &[Rectangle<i32, BufferCoords>],
    ) -> Result<(), ClientBufferError> {
        if !self.buffer.alive() {
            return Err(ClientBufferError::Destroyed(DeadResource));
        }
        let locks = self
            .buffer
            .n_locks()
            .saturating_sub(self.state.n_ignore_locks.get());
        if locks > 1 {
            debug!(locks, "Client buffer in use, not applying damage");
            return Err(ClientBufferError::Busy { locks });
        }

        self.with_texture_set(|set| set.update_from_buffer(ctx, next, damage))??;
        Ok(())
    }

    /// Get the texture of a renderer, see [`TextureSet::texture_for_renderer`]
    pub fn texture_for_renderer(
        &self,
        ctx: &mut CurrentContext,
        renderer: &Renderer,
    ) -> Result<Texture, ClientBufferError> {
        Ok(self.with_texture_set(|set| set.texture_for_renderer(ctx, renderer))??)
    }

    /// Get the texture of the primary renderer, see [`TextureSet::primary_texture`]
    pub fn primary_texture(&self, ctx: &mut CurrentContext) -> Result<Texture, ClientBufferError> {
        Ok(self.with_texture_set(|set| set.primary_texture(ctx))??)
    }

    /// The natively imported texture, see [`TextureSet::native_texture`]
    pub fn native_texture(&self) -> Option<Texture> {
        self.with_texture_set(|set| set.native_texture()).ok().flatten()
    }

    /// Access the texture set of this client buffer
    pub fn with_texture_set<T, F: FnOnce(&mut TextureSet) -> T>(&self, f: F) -> Result<T, ClientBufferError> {
        let mut texture_set = self.state.texture_set.borrow_mut();
        let texture_set = texture_set
            .as_mut()
            .ok_or(ClientBufferError::Destroyed(DeadResource))?;
        Ok(f(texture_set))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::allocator::{
        dmabuf::{tests::dummy_dmabuf, DmabufBuffer},
        readonly::ReadonlyDataBuffer,
        BufferError, Fourcc,
    };
    use crate::backend::renderer::{
        test::{DummyRenderer, DummyRendererConfig, DummyStats, DummyTexture},
        GpuRegistry, TextureError,
    };

    fn renderer(config: DummyRendererConfig) -> (Renderer, DummyStats) {
        crate::backend::renderer::test::init_logging();
        let dummy = DummyRenderer::new(config);
        let stats = dummy.stats();
        (Renderer::new(dummy), stats)
    }

    fn pixels(value: u8) -> Buffer {
        ReadonlyDataBuffer::create(Fourcc::Argb8888, 16, (4, 4), &[value; 64]).unwrap()
    }

    #[test]
    fn create_holds_own_lock() {
        let mut ctx = CurrentContext::new();
        let (r, _) = renderer(DummyRendererConfig::default());
        let source = pixels(0);

        let client_buffer = ClientBuffer::create(&mut ctx, &source, &r).unwrap();
        let buffer = client_buffer.buffer().clone();
        assert_eq!(buffer.n_locks(), 1);
        assert_eq!(client_buffer.n_ignore_locks(), 1);
        assert!(buffer.is_dropped());
        assert_eq!(source.n_locks(), 1);
        assert_eq!(client_buffer.source(), Some(source.clone()));

        assert_eq!(ClientBuffer::get(&buffer), Some(client_buffer.clone()));
        assert!(ClientBuffer::get(&source).is_none());
        assert!(client_buffer.native_texture().is_some());
    }

    #[test]
    fn create_fails_without_import() {
        let mut ctx = CurrentContext::new();
        let (r, _) = renderer(DummyRendererConfig {
            import_pixels: false,
            ..Default::default()
        });
        let source = pixels(0);

        let res = ClientBuffer::create(&mut ctx, &source, &r);
        assert!(matches!(
            res,
            Err(ClientBufferError::TextureSet(TextureSetError::ImportFailed))
        ));
        assert_eq!(source.n_locks(), 0);
    }

    #[test]
    fn damage_refused_while_shared() {
        let mut ctx = CurrentContext::new();
        let (r, stats) = renderer(DummyRendererConfig::default());
        let client_buffer = ClientBuffer::create(&mut ctx, &pixels(0), &r).unwrap();
        let damage = [Rectangle::from_loc_and_size((0, 0), (4, 4))];

        let plane = client_buffer.buffer().lock();
        let other_plane = client_buffer.buffer().lock();
        assert!(matches!(
            client_buffer.apply_damage(&mut ctx, &pixels(5), &damage),
            Err(ClientBufferError::Busy { locks: 2 })
        ));
        assert_eq!(stats.updates(), 0);
        let texture = client_buffer.native_texture().unwrap();
        assert!(texture
            .downcast_backend::<DummyTexture>()
            .unwrap()
            .data()
            .iter()
            .all(|b| *b == 0));

        other_plane.unlock();
        client_buffer.apply_damage(&mut ctx, &pixels(5), &damage).unwrap();
        assert_eq!(stats.updates(), 1);
        assert!(texture
            .downcast_backend::<DummyTexture>()
            .unwrap()
            .data()
            .iter()
            .all(|b| *b == 5));
        plane.unlock();
    }

    #[test]
    fn damage_out_of_bounds_is_rejected() {
        let mut ctx = CurrentContext::new();
        let (r, stats) = renderer(DummyRendererConfig::default());
        let client_buffer = ClientBuffer::create(&mut ctx, &pixels(0), &r).unwrap();

        let damage = [Rectangle::from_loc_and_size((-1, 0), (2, 2))];
        assert!(matches!(
            client_buffer.apply_damage(&mut ctx, &pixels(5), &damage),
            Err(ClientBufferError::TextureSet(TextureSetError::Texture(
                TextureError::DamageOutOfBounds { .. }
            )))
        ));
        assert_eq!(stats.updates(), 0);
    }

    #[test]
    fn ignored_locks_are_not_users() {
        let mut ctx = CurrentContext::new();
        let (r, _) = renderer(DummyRendererConfig::default());
        let client_buffer = ClientBuffer::create(&mut ctx, &pixels(0), &r).unwrap();
        let damage = [Rectangle::from_loc_and_size((0, 0), (1, 1))];

        client_buffer.lock_ignored();
        let plane = client_buffer.buffer().lock();
        client_buffer.apply_damage(&mut ctx, &pixels(1), &damage).unwrap();

        client_buffer.unlock_ignored();
        client_buffer.unlock_ignored();
        // no more ignored locks to release
        client_buffer.unlock_ignored();
        assert!(client_buffer.buffer().alive());
        plane.unlock();
        assert!(!client_buffer.buffer().alive());
    }

    #[test]
    fn destroy_releases_textures_and_source() {
        let mut ctx = CurrentContext::new();
        let registry = GpuRegistry::new();
        let (a, stats_a) = renderer(DummyRendererConfig::default());
        let (b, stats_b) = renderer(DummyRendererConfig {
            import_dmabuf: false,
            ..Default::default()
        });
        registry.add_renderer(&a).unwrap();
        registry.add_renderer(&b).unwrap();

        let source = DmabufBuffer::create(dummy_dmabuf((8, 8)));
        let client_buffer = ClientBuffer::create(&mut ctx, &source, &a).unwrap();
        assert!(client_buffer.buffer().get_dmabuf().is_ok());
        client_buffer.texture_for_renderer(&mut ctx, &b).unwrap();
        assert_eq!(stats_a.readbacks(), 1);

        // the producer gives up the source, the texture set keeps it alive
        source.drop_buffer();
        assert!(source.alive());

        client_buffer.unlock_ignored();
        assert!(!client_buffer.buffer().alive());
        assert!(!source.alive());
        assert!(client_buffer.source().is_none());
        assert!(matches!(
            client_buffer.buffer().get_dmabuf(),
            Err(BufferError::Destroyed(_))
        ));
        assert!(matches!(
            client_buffer.texture_for_renderer(&mut ctx, &a),
            Err(ClientBufferError::Destroyed(_))
        ));

        a.cleanup(&mut ctx).unwrap();
        b.cleanup(&mut ctx).unwrap();
        assert_eq!(stats_a.destroyed_textures(), 1);
        assert_eq!(stats_b.destroyed_textures(), 1);
    }

    #[test]
    fn primary_texture_through_client_buffer() {
        let mut ctx = CurrentContext::new();
        let registry = GpuRegistry::new();
        let (a, _) = renderer(DummyRendererConfig::default());
        let (b, stats_b) = renderer(DummyRendererConfig::default());
        registry.add_renderer(&a).unwrap();
        registry.add_renderer(&b).unwrap();
        registry.set_primary(&b);

        let client_buffer = ClientBuffer::create(&mut ctx, &pixels(3), &a).unwrap();
        let texture = client_buffer.primary_texture(&mut ctx).unwrap();
        assert_eq!(texture.renderer(), Some(b.clone()));
        assert_eq!(stats_b.uploads(), 1);
    }
}
