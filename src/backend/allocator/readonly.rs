//! Buffers wrapping a copy of caller provided pixels
//!
//! Used to feed raw pixel data through the same import path as any other buffer,
//! see [`Texture::from_pixels`](crate::backend::renderer::Texture::from_pixels).

use super::{
    buffer::{Buffer, BufferData, BufferImpl},
    format::min_stride,
    Fourcc,
};
use crate::utils::{Buffer as BufferCoords, Size};

/// Errors creating a [`ReadonlyDataBuffer`]
#[derive(Debug, thiserror::Error)]
pub enum ReadonlyDataError {
    /// Width or height are not positive
    #[error("invalid buffer size {0:?}")]
    InvalidSize(Size<i32, BufferCoords>),
    /// The stride is too small for the width and format or the format is unknown
    #[error("stride {stride} is invalid for {width} pixels of {format}")]
    InvalidStride {
        /// Provided stride
        stride: u32,
        /// Provided width
        width: i32,
        /// Provided format
        format: Fourcc,
    },
    /// Less than `stride * height` bytes were provided
    #[error("expected at least {expected} bytes of pixel data, got {got}")]
    NotEnoughData {
        /// Required amount of bytes
        expected: usize,
        /// Provided amount of bytes
        got: usize,
    },
}

/// Buffer storage holding a private copy of pixel data
#[derive(Debug)]
pub struct ReadonlyDataBuffer {
    format: Fourcc,
    stride: u32,
    data: Vec<u8>,
}

impl ReadonlyDataBuffer {
    /// Copy the given pixels into a new unlocked [`Buffer`]
    ///
    /// `data` has to contain at least `stride * height` bytes. The buffer owns its copy,
    /// so renderers may keep it locked past the lifetime of `data`.
    pub fn create(
        format: Fourcc,
        stride: u32,
        size: impl Into<Size<i32, BufferCoords>>,
        data: &[u8],
    ) -> Result<Buffer, ReadonlyDataError> {
        let size = size.into();
        if size.w <= 0 || size.h <= 0 {
            return Err(ReadonlyDataError::InvalidSize(size));
        }
        match min_stride(format, size.w as u32) {
            Some(min) if stride >= min => {}
            _ => {
                return Err(ReadonlyDataError::InvalidStride {
                    stride,
                    width: size.w,
                    format,
                })
            }
        }
        let expected = stride as usize * size.h as usize;
        if data.len() < expected {
            return Err(ReadonlyDataError::NotEnoughData {
                expected,
                got: data.len(),
            });
        }

        Ok(Buffer::new(
            size,
            ReadonlyDataBuffer {
                format,
                stride,
                data: data[..expected].to_vec(),
            },
        ))
    }
}

impl BufferImpl for ReadonlyDataBuffer {
    fn data(&self) -> Option<BufferData<'_>> {
        Some(BufferData {
            data: &self.data,
            format: self.format,
            stride: self.stride,
        })
    }
}
