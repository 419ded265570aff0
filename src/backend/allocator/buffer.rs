//! Reference counted pixel buffers
//!
//! A [`Buffer`] is the producer side handle of some pixel storage: a client's shared memory,
//! a dmabuf or a temporary copy of pixels. Its storage is provided by a [`BufferImpl`].
//!
//! Consumers which need the storage to stay valid call [`Buffer::lock`] and release
//! it with [`Buffer::unlock`]. The producer gives up its own reference with
//! [`Buffer::drop_buffer`]. The storage is released, once the buffer was dropped and
//! the last lock is gone. Right before that happens, every callback registered
//! through [`Buffer::on_destroy`] is invoked.
//!
//! Handles can be cloned freely, cloning does not lock the buffer.

use std::{
    cell::{Cell, Ref, RefCell},
    fmt,
    rc::Rc,
};

use downcast_rs::{impl_downcast, Downcast};
use tracing::{trace, warn};

use super::{dmabuf::Dmabuf, Fourcc};
use crate::utils::{
    AliveTracker, Buffer as BufferCoords, DeadResource, IsAlive, SignalToken, Signaler, Size,
};

/// Errors returned by [`Buffer`] accessors
#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    /// The buffer was already destroyed
    #[error("the buffer was destroyed")]
    Destroyed(#[source] DeadResource),
    /// The storage of this buffer can not be exported as a dmabuf
    #[error("the buffer is not backed by a dmabuf")]
    NotDmabuf,
    /// The storage of this buffer does not allow direct access to its pixels
    #[error("the buffer does not allow direct pixel access")]
    NoDataAccess,
}

/// Direct view into the pixels of a buffer
#[derive(Debug, Clone, Copy)]
pub struct BufferData<'a> {
    /// Raw pixel data, `stride * height` bytes
    pub data: &'a [u8],
    /// Pixel format of the data
    pub format: Fourcc,
    /// Bytes per row
    pub stride: u32,
}

/// Storage of a [`Buffer`]
///
/// Implemented by every buffer variant. The storage is dropped, when the buffer is destroyed.
pub trait BufferImpl: Downcast + fmt::Debug {
    /// Dmabuf backing this storage, if any
    fn dmabuf(&self) -> Option<Dmabuf> {
        None
    }

    /// Direct access to the pixels of this storage, if possible
    fn data(&self) -> Option<BufferData<'_>> {
        None
    }
}
impl_downcast!(BufferImpl);

struct BufferInner {
    size: Size<i32, BufferCoords>,
    n_locks: Cell<usize>,
    dropped: Cell<bool>,
    alive: AliveTracker,
    destroy: Signaler<()>,
    storage: RefCell<Option<Box<dyn BufferImpl>>>,
}

/// Handle to a reference counted pixel buffer
#[derive(Clone)]
pub struct Buffer(Rc<BufferInner>);

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("ptr", &Rc::as_ptr(&self.0))
            .field("size", &self.0.size)
            .field("n_locks", &self.0.n_locks.get())
            .field("dropped", &self.0.dropped.get())
            .field("alive", &self.0.alive.alive())
            .finish()
    }
}

impl PartialEq for Buffer {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for Buffer {}

impl IsAlive for Buffer {
    #[inline]
    fn alive(&self) -> bool {
        self.0.alive.alive()
    }
}

impl Buffer {
    /// Create a new buffer of the given size with the given storage
    ///
    /// The new buffer is not locked and not dropped.
    pub fn new(size: impl Into<Size<i32, BufferCoords>>, storage: impl BufferImpl) -> Buffer {
        Buffer(Rc::new(BufferInner {
            size: size.into(),
            n_locks: Cell::new(0),
            dropped: Cell::new(false),
            alive: AliveTracker::default(),
            destroy: Signaler::new(),
            storage: RefCell::new(Some(Box::new(storage))),
        }))
    }

    /// Size of the buffer in pixels
    pub fn size(&self) -> Size<i32, BufferCoords> {
        self.0.size
    }

    /// Width of the buffer in pixels
    pub fn width(&self) -> i32 {
        self.0.size.w
    }

    /// Height of the buffer in pixels
    pub fn height(&self) -> i32 {
        self.0.size.h
    }

    /// Current amount of locks held on this buffer
    pub fn n_locks(&self) -> usize {
        self.0.n_locks.get()
    }

    /// Whether the producer already gave up its reference
    pub fn is_dropped(&self) -> bool {
        self.0.dropped.get()
    }

    /// Lock the buffer, keeping its storage valid until [`Buffer::unlock`] is called
    ///
    /// Returns a handle to the same buffer.
    pub fn lock(&self) -> Buffer {
        if !self.alive() {
            warn!(buffer = ?Rc::as_ptr(&self.0), "Locking a destroyed buffer");
        }
        self.0.n_locks.set(self.0.n_locks.get() + 1);
        self.clone()
    }

    /// Release a lock previously acquired by [`Buffer::lock`]
    ///
    /// Destroys the buffer, if this was the last lock and the buffer was already dropped.
    pub fn unlock(&self) {
        let n_locks = self.0.n_locks.get();
        if n_locks == 0 {
            warn!(buffer = ?Rc::as_ptr(&self.0), "Unlocking a buffer without locks");
            return;
        }
        self.0.n_locks.set(n_locks - 1);
        self.maybe_destroy();
    }

    /// Give up the producers reference to this buffer
    ///
    /// The buffer is destroyed immediately if it is not locked, otherwise
    /// once the last lock is released.
    pub fn drop_buffer(&self) {
        if self.0.dropped.replace(true) {
            warn!(buffer = ?Rc::as_ptr(&self.0), "Buffer dropped twice");
            return;
        }
        self.maybe_destroy();
    }

    fn maybe_destroy(&self) {
        if !self.0.dropped.get() || self.0.n_locks.get() > 0 {
            return;
        }
        if !self.0.alive.destroy_notify() {
            return;
        }

        trace!(buffer = ?Rc::as_ptr(&self.0), "Destroying buffer");
        self.0.destroy.signal(());
        // the storage may hold other buffers, release it outside of the borrow
        let storage = self.0.storage.borrow_mut().take();
        std::mem::drop(storage);
    }

    /// Register a callback invoked right before the buffer is destroyed
    ///
    /// The callback stays registered for as long as the returned token is alive.
    /// No methods of this buffer should be used after the notification, they
    /// will report the buffer as destroyed.
    #[must_use = "the callback is unregistered when the token is dropped"]
    pub fn on_destroy<F: FnMut() + 'static>(&self, mut f: F) -> SignalToken {
        self.0.destroy.register(move |_| f())
    }

    /// Retrieve the dmabuf backing this buffer
    pub fn get_dmabuf(&self) -> Result<Dmabuf, BufferError> {
        let storage = self.storage()?;
        storage.dmabuf().ok_or(BufferError::NotDmabuf)
    }

    /// Access the pixels of this buffer directly
    pub fn with_data<T, F: FnOnce(BufferData<'_>) -> T>(&self, f: F) -> Result<T, BufferError> {
        let storage = self.storage()?;
        let data = storage.data().ok_or(BufferError::NoDataAccess)?;
        Ok(f(data))
    }

    /// Access the storage of this buffer as a concrete buffer variant
    ///
    /// Returns `None` if the buffer is destroyed or the storage is of a different type.
    pub fn downcast_storage<T: BufferImpl>(&self) -> Option<Ref<'_, T>> {
        let storage = self.0.storage.borrow();
        Ref::filter_map(storage, |storage| {
            storage.as_ref().and_then(|storage| storage.as_any().downcast_ref::<T>())
        })
        .ok()
    }

    fn storage(&self) -> Result<Ref<'_, dyn BufferImpl>, BufferError> {
        let storage = self.0.storage.borrow();
        Ref::filter_map(storage, |storage| storage.as_deref())
            .map_err(|_| BufferError::Destroyed(DeadResource))
    }
}
