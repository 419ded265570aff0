//! Buffer handling.
//!
//! Collection of the reference counted [`Buffer`] handle and the buffer
//! variants this crate provides itself.
//!
//! Buffer types supported:
//! - [DmaBufs](dmabuf::Dmabuf) through [`DmabufBuffer`](dmabuf::DmabufBuffer)
//! - Copies of raw pixels through [`ReadonlyDataBuffer`](readonly::ReadonlyDataBuffer)
//!
//! Other variants, like buffers of wayland clients, implement [`BufferImpl`] outside of this crate.

pub mod buffer;
pub mod dmabuf;
pub mod format;
pub mod readonly;

pub use buffer::{Buffer, BufferData, BufferError, BufferImpl};

pub use drm_fourcc::{
    DrmFormat as Format, DrmFourcc as Fourcc, DrmModifier as Modifier, DrmVendor as Vendor,
    UnrecognizedFourcc, UnrecognizedVendor,
};
