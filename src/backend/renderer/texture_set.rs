//! Per buffer cache of textures for multiple renderers
//!
//! A [`TextureSet`] locks a buffer and holds one slot per renderer that may display it:
//! the renderer it was created for and, if that renderer is member of a
//! [`GpuRegistry`], every other member of the registry at creation time.
//!
//! Textures are created on demand. The first request imports the buffer into the first
//! renderer able to do so, this import is *native* to the set. Requests for other renderers
//! try a direct import first. If that fails, the native texture is read back into system
//! memory once and the copy is uploaded into every renderer that needs it.
//!
//! Renderers may be destroyed while the set exists. Their slot is released and stays
//! empty for the rest of the set's lifetime.
//!
//! ```no_run
//! # use smithay_texture_sync::backend::{allocator::Buffer, renderer::*};
//! # fn draw(_: &Texture) {}
//! # fn example(ctx: &mut CurrentContext, primary: &Renderer, secondary: &Renderer, buffer: &Buffer) -> Result<(), TextureSetError> {
//! let mut set = TextureSet::from_buffer(ctx, primary, buffer)?;
//! // cheap after the first call
//! let texture = set.texture_for_renderer(ctx, secondary)?;
//! draw(&texture);
//! # Ok(())
//! # }
//! ```

use std::{cell::RefCell, fmt, rc::Rc};

use smallvec::SmallVec;
use tracing::{debug, trace, trace_span, warn};

use super::{CurrentContext, GpuRegistry, Renderer, RendererError, Texture, TextureError};
use crate::backend::allocator::{
    dmabuf::{Dmabuf, DmabufBuffer},
    format::min_stride,
    Buffer, Fourcc,
};
use crate::utils::{Buffer as BufferCoords, DeadResource, IsAlive, Rectangle, SignalToken, Size};

/// Format pixels are moved in between renderers that can not share a buffer
pub const INTERCHANGE_FORMAT: Fourcc = Fourcc::Argb8888;

/// Errors of [`TextureSet`] operations
#[derive(Debug, thiserror::Error)]
pub enum TextureSetError {
    /// No renderer of the set could import the buffer
    #[error("no renderer could import the buffer")]
    ImportFailed,
    /// The renderer has no slot in this set
    #[error("the renderer is not part of this texture set")]
    UnknownRenderer,
    /// The registry of the set has no primary renderer
    #[error("no primary renderer is set")]
    NoPrimary,
    /// The buffer was not imported yet or its native renderer is gone
    #[error("the buffer has no native texture")]
    NotImported,
    /// Reading back the native texture failed
    #[error("failed to read back the native texture")]
    Readback(#[source] RendererError),
    /// Creating or updating a texture failed
    #[error(transparent)]
    Texture(#[from] TextureError),
    /// The renderer or buffer was destroyed
    #[error("the renderer or buffer was destroyed")]
    Dead(#[source] DeadResource),
}

#[derive(Debug, Default)]
struct Slot {
    renderer: Option<Renderer>,
    texture: Option<Texture>,
}

struct Pairing {
    slot: Rc<RefCell<Slot>>,
    renderer_destroy: Option<SignalToken>,
}

impl fmt::Debug for Pairing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pairing").field("slot", &self.slot).finish()
    }
}

impl Pairing {
    fn new(renderer: Renderer) -> Pairing {
        let slot = Rc::new(RefCell::new(Slot {
            renderer: Some(renderer.clone()),
            texture: None,
        }));

        let weak = Rc::downgrade(&slot);
        let renderer_destroy = renderer.on_destroy(move || {
            let Some(slot) = weak.upgrade() else {
                return;
            };
            let mut slot = slot.borrow_mut();
            slot.renderer = None;
            if let Some(texture) = slot.texture.take() {
                trace!(?texture, "Renderer destroyed, releasing texture");
                texture.destroy();
            }
        });

        Pairing {
            slot,
            renderer_destroy: Some(renderer_destroy),
        }
    }

    fn renderer(&self) -> Option<Renderer> {
        self.slot.borrow().renderer.clone()
    }

    fn texture(&self) -> Option<Texture> {
        self.slot.borrow().texture.clone()
    }

    fn set_texture(&self, texture: Texture) {
        self.slot.borrow_mut().texture = Some(texture);
    }

    fn is_for(&self, renderer: &Renderer) -> bool {
        self.slot.borrow().renderer.as_ref() == Some(renderer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImportState {
    Pending,
    Native(usize),
    Failed,
}

struct LinearCopy {
    read_format: Fourcc,
    stride: u32,
    data: Vec<u8>,
}

impl fmt::Debug for LinearCopy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinearCopy")
            .field("read_format", &self.read_format)
            .field("stride", &self.stride)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Cache of the textures of a single buffer across renderers
#[derive(Debug)]
pub struct TextureSet {
    buffer: Buffer,
    registry: Option<GpuRegistry>,
    pairings: SmallVec<[Pairing; 2]>,
    state: ImportState,
    size: Size<i32, BufferCoords>,
    linear: Option<LinearCopy>,
    span: tracing::Span,
}

impl TextureSet {
    /// Create an empty set for a buffer
    ///
    /// The set gets a slot for `renderer` and, if it is member of a registry, for every
    /// other member. Nothing is imported until a texture is requested.
    /// The buffer stays locked until the set is dropped.
    pub fn for_renderer(renderer: &Renderer, buffer: &Buffer) -> Result<TextureSet, TextureSetError> {
        if !renderer.alive() || !buffer.alive() {
            return Err(TextureSetError::Dead(DeadResource));
        }

        let registry = renderer.registry();
        let mut renderers: SmallVec<[Renderer; 2]> = SmallVec::new();
        renderers.push(renderer.clone());
        if let Some(registry) = registry.as_ref() {
            renderers.extend(registry.renderers().into_iter().filter(|r| r != renderer));
        }

        let span = trace_span!(parent: renderer.span(), "texture_set", size = ?buffer.size());
        trace!(parent: &span, pairings = renderers.len(), "Creating texture set");

        Ok(TextureSet {
            buffer: buffer.lock(),
            registry,
            pairings: renderers.into_iter().map(Pairing::new).collect(),
            state: ImportState::Pending,
            size: buffer.size(),
            linear: None,
            span,
        })
    }

    /// Create a set for a buffer and import it right away
    ///
    /// Fails if no renderer of the set can import the buffer.
    #[profiling::function]
    pub fn from_buffer(
        ctx: &mut CurrentContext,
        renderer: &Renderer,
        buffer: &Buffer,
    ) -> Result<TextureSet, TextureSetError> {
        let mut set = TextureSet::for_renderer(renderer, buffer)?;
        let mut ctx = ctx.save();
        set.import(&mut ctx)?;
        Ok(set)
    }

    /// Create a set for a dmabuf and import it right away
    pub fn from_dmabuf(
        ctx: &mut CurrentContext,
        renderer: &Renderer,
        dmabuf: &Dmabuf,
    ) -> Result<TextureSet, TextureSetError> {
        let buffer = DmabufBuffer::create(dmabuf.clone());
        let set = TextureSet::from_buffer(ctx, renderer, &buffer);
        buffer.drop_buffer();
        set
    }

    /// The locked buffer of this set
    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    /// Size of the textures of this set
    pub fn size(&self) -> Size<i32, BufferCoords> {
        self.size
    }

    /// Number of renderer slots
    pub fn pairing_count(&self) -> usize {
        self.pairings.len()
    }

    /// Whether a copy of the native texture was read back into system memory
    pub fn has_linear_copy(&self) -> bool {
        self.linear.is_some()
    }

    /// Format the native renderer preferred for reading back its texture, if it was read back
    pub fn linear_read_format(&self) -> Option<Fourcc> {
        self.linear.as_ref().map(|linear| linear.read_format)
    }

    fn import(&mut self, ctx: &mut CurrentContext) -> Result<usize, TextureSetError> {
        match self.state {
            ImportState::Native(idx) => return Ok(idx),
            ImportState::Failed => return Err(TextureSetError::ImportFailed),
            ImportState::Pending => {}
        }

        let _guard = self.span.enter();
        for (idx, pairing) in self.pairings.iter().enumerate() {
            let Some(renderer) = pairing.renderer() else {
                continue;
            };
            match Texture::from_buffer(ctx, &renderer, &self.buffer) {
                Ok(texture) => {
                    trace!(renderer = renderer.id(), "Native import succeeded");
                    self.size = texture.size();
                    pairing.set_texture(texture);
                    self.state = ImportState::Native(idx);
                    return Ok(idx);
                }
                Err(err) => {
                    debug!(renderer = renderer.id(), ?err, "Renderer can not import buffer");
                }
            }
        }

        warn!("No renderer could import the buffer");
        self.state = ImportState::Failed;
        Err(TextureSetError::ImportFailed)
    }

    /// Get the texture of a renderer, creating it if necessary
    ///
    /// Imports the buffer on first use. Renderers unable to import it directly receive
    /// a copy of the native texture. The context current when calling is current again
    /// afterwards.
    #[profiling::function]
    pub fn texture_for_renderer(
        &mut self,
        ctx: &mut CurrentContext,
        renderer: &Renderer,
    ) -> Result<Texture, TextureSetError> {
        let mut ctx = ctx.save();
        let native = self.import(&mut ctx)?;

        let span = self.span.clone();
        let _guard = span.enter();
        if !renderer.alive() {
            return Err(TextureSetError::Dead(DeadResource));
        }
        let idx = self
            .pairings
            .iter()
            .position(|pairing| pairing.is_for(renderer))
            .ok_or(TextureSetError::UnknownRenderer)?;

        if let Some(texture) = self.pairings[idx].texture() {
            return Ok(texture);
        }

        match Texture::from_buffer(&mut ctx, renderer, &self.buffer) {
            Ok(texture) => {
                trace!(renderer = renderer.id(), "Imported buffer directly");
                self.pairings[idx].set_texture(texture.clone());
                return Ok(texture);
            }
            Err(err) => {
                debug!(renderer = renderer.id(), ?err, "Direct import failed, copying native texture");
            }
        }

        let size = self.size;
        let linear = self.linear_copy(&mut ctx, native)?;
        let texture = Texture::from_pixels(
            &mut ctx,
            renderer,
            INTERCHANGE_FORMAT,
            linear.stride,
            size,
            &linear.data,
        )?;
        self.pairings[idx].set_texture(texture.clone());
        Ok(texture)
    }

    fn linear_copy(&mut self, ctx: &mut CurrentContext, native: usize) -> Result<&LinearCopy, TextureSetError> {
        let linear = match self.linear.take() {
            Some(linear) => linear,
            None => self.read_native(ctx, native)?,
        };
        Ok(self.linear.insert(linear))
    }

    #[profiling::function]
    fn read_native(&self, ctx: &mut CurrentContext, native: usize) -> Result<LinearCopy, TextureSetError> {
        let renderer = self.pairings[native]
            .renderer()
            .ok_or(TextureSetError::NotImported)?;
        let stride = min_stride(INTERCHANGE_FORMAT, self.size.w as u32)
            .ok_or(TextureSetError::Readback(RendererError::Unsupported))?;
        let mut data = vec![0u8; stride as usize * self.size.h as usize];
        let region = Rectangle::from_size(self.size);
        debug!(renderer = renderer.id(), size = ?self.size, "Reading back native texture");

        let read_format = renderer
            .with_backend(ctx, |r, ctx| {
                r.bind(ctx, &self.buffer)?;
                let res = r.preferred_read_format(ctx).and_then(|read_format| {
                    r.read_pixels(ctx, INTERCHANGE_FORMAT, stride, region, &mut data)?;
                    Ok(read_format)
                });
                let unbind = r.unbind(ctx);
                let read_format = res?;
                unbind?;
                Ok(read_format)
            })
            .map_err(TextureSetError::Readback)?;

        Ok(LinearCopy {
            read_format,
            stride,
            data,
        })
    }

    /// The texture of the renderer the buffer was natively imported into
    ///
    /// Does not import the buffer. Returns `None` if it was not imported (yet)
    /// or the native renderer was destroyed.
    pub fn native_texture(&self) -> Option<Texture> {
        match self.state {
            ImportState::Native(idx) => self.pairings[idx].texture(),
            _ => None,
        }
    }

    /// The texture of the primary renderer
    ///
    /// Sets created without a registry return their native texture.
    pub fn primary_texture(&mut self, ctx: &mut CurrentContext) -> Result<Texture, TextureSetError> {
        match self.registry.as_ref() {
            Some(registry) => {
                let primary = registry.primary().ok_or(TextureSetError::NoPrimary)?;
                self.texture_for_renderer(ctx, &primary)
            }
            None => self.native_texture().ok_or(TextureSetError::NotImported),
        }
    }

    /// Refresh the damaged regions of every texture from a new buffer
    ///
    /// The buffer has to be of the same size as the set and the damage has to lie within
    /// the buffer, otherwise no texture is touched. Updates stop at the first failing
    /// texture, leaving textures updated before it ahead of the others.
    #[profiling::function]
    pub fn update_from_buffer(
        &mut self,
        ctx: &mut CurrentContext,
        next: &Buffer,
        damage: &[Rectangle<i32, BufferCoords>],
    ) -> Result<(), TextureSetError> {
        super::texture::check_damage(self.size, next, damage)?;

        let _guard = self.span.enter();
        let mut ctx = ctx.save();
        for pairing in &self.pairings {
            let Some(texture) = pairing.texture() else {
                continue;
            };
            if let Err(err) = texture.update_from_buffer(&mut ctx, next, damage) {
                debug!(?err, "Failed to update texture");
                return Err(err.into());
            }
        }
        Ok(())
    }
}

impl Drop for TextureSet {
    fn drop(&mut self) {
        let _guard = self.span.enter();
        trace!("Destroying texture set");
        self.linear = None;
        for pairing in &mut self.pairings {
            pairing.renderer_destroy.take();
            let texture = pairing.slot.borrow_mut().texture.take();
            if let Some(texture) = texture {
                texture.destroy();
            }
        }
        self.buffer.unlock();
    }
}
