//! Textures owned by a single renderer

use std::{
    cell::{Ref, RefCell},
    fmt,
    rc::Rc,
    sync::mpsc::Sender,
};

use tracing::{instrument, trace};

use super::{CurrentContext, Renderer, RendererError, TextureImpl, WeakRenderer};
use crate::backend::allocator::{
    dmabuf::{Dmabuf, DmabufBuffer},
    readonly::{ReadonlyDataBuffer, ReadonlyDataError},
    Buffer, Fourcc,
};
use crate::utils::{Buffer as BufferCoords, DeadResource, IsAlive, Rectangle, Size};

/// Errors of texture operations
#[derive(Debug, thiserror::Error)]
pub enum TextureError {
    /// The pixels passed to [`Texture::from_pixels`] are invalid
    #[error("invalid pixel data")]
    InvalidPixels(#[from] ReadonlyDataError),
    /// The buffer differs in size from the texture
    #[error("buffer size {buffer:?} does not match texture size {texture:?}")]
    SizeMismatch {
        /// Size of the texture
        texture: Size<i32, BufferCoords>,
        /// Size of the buffer
        buffer: Size<i32, BufferCoords>,
    },
    /// The damage extends past the buffer
    #[error("damage {damage:?} exceeds the buffer size {size:?}")]
    DamageOutOfBounds {
        /// Bounding box of the damage
        damage: Rectangle<i32, BufferCoords>,
        /// Size of the buffer
        size: Size<i32, BufferCoords>,
    },
    /// The texture was already destroyed
    #[error("the texture was destroyed")]
    Dead(#[source] DeadResource),
    /// The renderer failed
    #[error(transparent)]
    Renderer(#[from] RendererError),
}

impl TextureError {
    /// Whether this error is an expected incompatibility of the renderer
    pub fn is_unsupported(&self) -> bool {
        matches!(self, TextureError::Renderer(RendererError::Unsupported))
    }
}

struct TextureInner {
    renderer: WeakRenderer,
    size: Size<i32, BufferCoords>,
    format: Option<Fourcc>,
    backend: RefCell<Option<Box<dyn TextureImpl>>>,
    destruction_callback_sender: Sender<Box<dyn TextureImpl>>,
}

impl Drop for TextureInner {
    fn drop(&mut self) {
        if let Some(texture) = self.backend.get_mut().take() {
            // fails once the renderer was destroyed, freeing the texture right here
            let _ = self.destruction_callback_sender.send(texture);
        }
    }
}

/// Handle to a texture of a [`Renderer`]
///
/// Handles are cheap to clone and compare by identity. The texture is released
/// through its renderer when the last handle is dropped or [`Texture::destroy`] is called.
#[derive(Clone)]
pub struct Texture(Rc<TextureInner>);

impl fmt::Debug for Texture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Texture")
            .field("ptr", &Rc::as_ptr(&self.0))
            .field("size", &self.0.size)
            .field("format", &self.0.format)
            .field("alive", &self.alive())
            .finish()
    }
}

impl PartialEq for Texture {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for Texture {}

impl IsAlive for Texture {
    fn alive(&self) -> bool {
        self.0.backend.borrow().is_some()
    }
}

impl Texture {
    /// Import a buffer into a texture of the given renderer
    ///
    /// Fails with [`RendererError::Unsupported`] if the renderer can not import the buffer,
    /// which is an expected outcome. The buffer does not need to outlive the texture.
    #[instrument(level = "trace", parent = renderer.span(), skip_all)]
    #[profiling::function]
    pub fn from_buffer(
        ctx: &mut CurrentContext,
        renderer: &Renderer,
        buffer: &Buffer,
    ) -> Result<Texture, TextureError> {
        let backend = renderer.with_backend(ctx, |r, ctx| r.texture_from_buffer(ctx, buffer))?;
        let size = backend.size();
        let format = backend.format();
        trace!(?size, ?format, "Imported buffer");

        Ok(Texture(Rc::new(TextureInner {
            renderer: renderer.downgrade(),
            size,
            format,
            backend: RefCell::new(Some(backend)),
            destruction_callback_sender: renderer.destruction_sender(),
        })))
    }

    /// Upload pixels into a new texture of the given renderer
    ///
    /// The pixels are copied into a temporary buffer, which is imported and dropped again.
    pub fn from_pixels(
        ctx: &mut CurrentContext,
        renderer: &Renderer,
        format: Fourcc,
        stride: u32,
        size: impl Into<Size<i32, BufferCoords>>,
        data: &[u8],
    ) -> Result<Texture, TextureError> {
        let buffer = ReadonlyDataBuffer::create(format, stride, size, data)?;
        let texture = Texture::from_buffer(ctx, renderer, &buffer);
        buffer.drop_buffer();
        texture
    }

    /// Import a dmabuf into a new texture of the given renderer
    pub fn from_dmabuf(
        ctx: &mut CurrentContext,
        renderer: &Renderer,
        dmabuf: &Dmabuf,
    ) -> Result<Texture, TextureError> {
        let buffer = DmabufBuffer::create(dmabuf.clone());
        let texture = Texture::from_buffer(ctx, renderer, &buffer);
        buffer.drop_buffer();
        texture
    }

    /// Size of the texture in pixels
    pub fn size(&self) -> Size<i32, BufferCoords> {
        self.0.size
    }

    /// Width of the texture in pixels
    pub fn width(&self) -> i32 {
        self.0.size.w
    }

    /// Height of the texture in pixels
    pub fn height(&self) -> i32 {
        self.0.size.h
    }

    /// Pixel format of the texture, if known
    pub fn format(&self) -> Option<Fourcc> {
        self.0.format
    }

    /// The renderer owning this texture, if it still exists
    pub fn renderer(&self) -> Option<Renderer> {
        self.0.renderer.upgrade()
    }

    /// Access the implementation of this texture
    ///
    /// Returns `None` if the texture was destroyed or is of a different type.
    pub fn downcast_backend<T: TextureImpl>(&self) -> Option<Ref<'_, T>> {
        Ref::filter_map(self.0.backend.borrow(), |backend| {
            backend.as_ref().and_then(|backend| backend.as_any().downcast_ref::<T>())
        })
        .ok()
    }

    /// Refresh the damaged regions of this texture from a buffer
    ///
    /// The buffer has to be of the same size as the texture and the damage has to
    /// lie within the buffer, otherwise the texture is left untouched.
    #[profiling::function]
    pub fn update_from_buffer(
        &self,
        ctx: &mut CurrentContext,
        buffer: &Buffer,
        damage: &[Rectangle<i32, BufferCoords>],
    ) -> Result<(), TextureError> {
        if !self.alive() {
            return Err(TextureError::Dead(DeadResource));
        }
        check_damage(self.size(), buffer, damage)?;

        let renderer = self.renderer().ok_or(RendererError::Destroyed(DeadResource))?;
        renderer.with_backend(ctx, |r, ctx| {
            let mut backend = self.0.backend.borrow_mut();
            match backend.as_deref_mut() {
                Some(texture) => r.update_texture(ctx, texture, buffer, damage),
                None => Ok(()),
            }
        })?;
        Ok(())
    }

    /// Release this texture
    ///
    /// The renderer side resources are freed with the next operation of the renderer.
    /// Every handle of this texture reports it as dead afterwards.
    pub fn destroy(&self) {
        let texture = self.0.backend.borrow_mut().take();
        if let Some(texture) = texture {
            trace!(?texture, "Destroying texture");
            let _ = self.0.destruction_callback_sender.send(texture);
        }
    }
}

/// Validate a damaged buffer against the size of a texture
pub(crate) fn check_damage(
    size: Size<i32, BufferCoords>,
    buffer: &Buffer,
    damage: &[Rectangle<i32, BufferCoords>],
) -> Result<(), TextureError> {
    if buffer.size() != size {
        return Err(TextureError::SizeMismatch {
            texture: size,
            buffer: buffer.size(),
        });
    }
    if damage.is_empty() {
        return Ok(());
    }
    if let Some(rect) = damage
        .iter()
        .find(|rect| rect.size.w < 0 || rect.size.h < 0)
    {
        return Err(TextureError::DamageOutOfBounds {
            damage: *rect,
            size: buffer.size(),
        });
    }
    let bbox = Rectangle::bounding_box(damage.iter().copied());
    if !Rectangle::from_size(buffer.size()).contains_rect(bbox) {
        return Err(TextureError::DamageOutOfBounds {
            damage: bbox,
            size: buffer.size(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::allocator::dmabuf::tests::dummy_dmabuf;
    use crate::backend::renderer::test::{DummyRenderer, DummyRendererConfig, DummyTexture};

    fn renderer(config: DummyRendererConfig) -> (Renderer, crate::backend::renderer::test::DummyStats) {
        crate::backend::renderer::test::init_logging();
        let dummy = DummyRenderer::new(config);
        let stats = dummy.stats();
        (Renderer::new(dummy), stats)
    }

    #[test]
    fn from_pixels_validates_input() {
        let mut ctx = CurrentContext::new();
        let (renderer, stats) = renderer(DummyRendererConfig::default());

        let res = Texture::from_pixels(&mut ctx, &renderer, Fourcc::Argb8888, 4, (0, 2), &[0; 8]);
        assert!(matches!(res, Err(TextureError::InvalidPixels(ReadonlyDataError::InvalidSize(_)))));
        let res = Texture::from_pixels(&mut ctx, &renderer, Fourcc::Argb8888, 4, (2, 2), &[0; 16]);
        assert!(matches!(res, Err(TextureError::InvalidPixels(ReadonlyDataError::InvalidStride { .. }))));
        assert_eq!(stats.uploads(), 0);

        let texture = Texture::from_pixels(&mut ctx, &renderer, Fourcc::Argb8888, 8, (2, 2), &[7; 16])
            .expect("valid pixels");
        assert_eq!(texture.size(), Size::from((2, 2)));
        assert_eq!(texture.renderer(), Some(renderer.clone()));
        assert_eq!(stats.uploads(), 1);
        let backend = texture.downcast_backend::<DummyTexture>().expect("dummy texture");
        assert!(backend.data().iter().all(|b| *b == 7));
    }

    #[test]
    fn unsupported_import_is_expected() {
        let mut ctx = CurrentContext::new();
        let (renderer, _) = renderer(DummyRendererConfig {
            import_dmabuf: false,
            ..Default::default()
        });
        let err = Texture::from_dmabuf(&mut ctx, &renderer, &dummy_dmabuf((8, 8))).unwrap_err();
        assert!(err.is_unsupported());
    }

    #[test]
    fn dmabuf_import_reads_plane_layout() {
        use crate::backend::allocator::{dmabuf::DmabufFlags, Modifier};
        use std::fs::File;

        fn dmabuf(flags: DmabufFlags, offset: u32, stride: u32) -> Dmabuf {
            let fd = File::open("/dev/null").expect("open /dev/null").into();
            let mut builder = Dmabuf::builder((8, 4), Fourcc::Argb8888, flags);
            assert!(builder.add_plane(fd, 0, offset, stride, Modifier::Linear));
            builder.build().expect("one plane")
        }

        let mut ctx = CurrentContext::new();
        let (renderer, stats) = renderer(DummyRendererConfig::default());

        let texture =
            Texture::from_dmabuf(&mut ctx, &renderer, &dmabuf(DmabufFlags::Y_INVERT, 0, 64)).expect("importable");
        assert_eq!(texture.size(), Size::from((8, 4)));
        assert!(texture
            .downcast_backend::<DummyTexture>()
            .expect("dummy texture")
            .y_inverted());

        let short_stride = Texture::from_dmabuf(&mut ctx, &renderer, &dmabuf(DmabufFlags::empty(), 0, 16));
        assert!(short_stride.unwrap_err().is_unsupported());
        let offset = Texture::from_dmabuf(&mut ctx, &renderer, &dmabuf(DmabufFlags::empty(), 128, 32));
        assert!(offset.unwrap_err().is_unsupported());
        assert_eq!(stats.imports(), 1);
        assert_eq!(stats.failed_imports(), 2);
    }

    #[test]
    fn update_checks_size_and_damage() {
        let mut ctx = CurrentContext::new();
        let (renderer, stats) = renderer(DummyRendererConfig::default());
        let texture = Texture::from_pixels(&mut ctx, &renderer, Fourcc::Argb8888, 16, (4, 4), &[0; 64])
            .expect("valid pixels");

        let smaller = ReadonlyDataBuffer::create(Fourcc::Argb8888, 8, (2, 2), &[1; 16]).unwrap();
        assert!(matches!(
            texture.update_from_buffer(&mut ctx, &smaller, &[]),
            Err(TextureError::SizeMismatch { .. })
        ));

        let next = ReadonlyDataBuffer::create(Fourcc::Argb8888, 16, (4, 4), &[1; 64]).unwrap();
        let damage = [
            Rectangle::from_loc_and_size((0, 0), (2, 2)),
            Rectangle::from_loc_and_size((3, 3), (2, 2)),
        ];
        assert!(matches!(
            texture.update_from_buffer(&mut ctx, &next, &damage),
            Err(TextureError::DamageOutOfBounds { .. })
        ));
        assert_eq!(stats.updates(), 0);

        let damage = [Rectangle::from_loc_and_size((0, 0), (2, 1))];
        texture.update_from_buffer(&mut ctx, &next, &damage).expect("valid damage");
        assert_eq!(stats.updates(), 1);
        let backend = texture.downcast_backend::<DummyTexture>().expect("dummy texture");
        assert_eq!(&backend.data()[..8], &[1; 8]);
        assert_eq!(&backend.data()[8..16], &[0; 8]);
    }

    #[test]
    fn overflowing_damage_is_out_of_bounds() {
        let mut ctx = CurrentContext::new();
        let (renderer, stats) = renderer(DummyRendererConfig::default());
        let texture = Texture::from_pixels(&mut ctx, &renderer, Fourcc::Argb8888, 16, (4, 4), &[0; 64])
            .expect("valid pixels");
        let next = ReadonlyDataBuffer::create(Fourcc::Argb8888, 16, (4, 4), &[1; 64]).unwrap();
        let mut negative = Rectangle::from_loc_and_size((3, 3), (0, 1));
        negative.size.w = -2;

        for damage in [
            Rectangle::from_loc_and_size((i32::MAX, 0), (1, 1)),
            Rectangle::from_loc_and_size((0, i32::MAX), (1, 1)),
            Rectangle::from_loc_and_size((2, 2), (i32::MAX, i32::MAX)),
            Rectangle::from_loc_and_size((i32::MIN, 0), (i32::MAX, 1)),
            negative,
        ] {
            assert!(matches!(
                check_damage((4, 4).into(), &next, &[damage]),
                Err(TextureError::DamageOutOfBounds { .. })
            ));
            assert!(matches!(
                texture.update_from_buffer(&mut ctx, &next, &[Rectangle::from_size((1, 1).into()), damage]),
                Err(TextureError::DamageOutOfBounds { .. })
            ));
        }
        assert_eq!(stats.updates(), 0);
        let backend = texture.downcast_backend::<DummyTexture>().expect("dummy texture");
        assert!(backend.data().iter().all(|b| *b == 0));
    }

    #[test]
    fn destroy_is_shared_between_handles() {
        let mut ctx = CurrentContext::new();
        let (renderer, stats) = renderer(DummyRendererConfig::default());
        let texture = Texture::from_pixels(&mut ctx, &renderer, Fourcc::Argb8888, 16, (4, 4), &[0; 64])
            .expect("valid pixels");
        let other = texture.clone();

        texture.destroy();
        assert!(!other.alive());
        texture.destroy();
        drop(other);
        drop(texture);

        renderer.cleanup(&mut ctx).unwrap();
        assert_eq!(stats.destroyed_textures(), 1);
    }
}
