//! Format info tables for DRM formats.
//!
//! Only formats a renderer may hand out as pixel data are listed: the linear
//! readback path needs to know how many bytes a pixel row occupies.
//!
//! ```
//! # use smithay_texture_sync::backend::allocator::Fourcc;
//! # use smithay_texture_sync::backend::allocator::format::{get_bpp, get_opaque, has_alpha};
//! assert_eq!(get_bpp(Fourcc::Argb8888), Some(32));
//! assert_eq!(Some(Fourcc::Xrgb8888), get_opaque(Fourcc::Argb8888));
//! assert!(!has_alpha(Fourcc::Xrgb8888));
//! ```

use super::Fourcc;

macro_rules! format_tables {
    (
        $($fourcc: ident {
            $(opaque: $opaque: ident,)?
            alpha: $alpha: expr,
            bpp: $bpp: expr $(,)?
        }),* $(,)?
    ) => {
        /// Returns the opaque alternative of the specified format.
        ///
        /// Unknown formats will always return [`None`].
        pub const fn get_opaque(fourcc: Fourcc) -> Option<Fourcc> {
            match fourcc {
                $($(Fourcc::$fourcc => Some(Fourcc::$opaque),)?)*
                _ => None,
            }
        }

        /// Returns true if the format has an alpha channel.
        ///
        /// Unknown formats will always return `false`.
        pub const fn has_alpha(fourcc: Fourcc) -> bool {
            match fourcc {
                $(Fourcc::$fourcc => $alpha,)*
                _ => false,
            }
        }

        /// Returns the bits per pixel of the specified format.
        ///
        /// Unknown formats will always return [`None`].
        pub const fn get_bpp(fourcc: Fourcc) -> Option<usize> {
            match fourcc {
                $(Fourcc::$fourcc => Some($bpp),)*
                _ => None,
            }
        }

        #[cfg(test)]
        fn _impl_formats() -> &'static [Fourcc] {
            &[$(Fourcc::$fourcc,)*]
        }
    };
}

format_tables! {
    Rgb565 { alpha: false, bpp: 16 },

    Rgb888 { alpha: false, bpp: 24 },
    Bgr888 { alpha: false, bpp: 24 },

    Argb8888 { opaque: Xrgb8888, alpha: true, bpp: 32 },
    Xrgb8888 { alpha: false, bpp: 32 },
    Abgr8888 { opaque: Xbgr8888, alpha: true, bpp: 32 },
    Xbgr8888 { alpha: false, bpp: 32 },
    Rgba8888 { opaque: Rgbx8888, alpha: true, bpp: 32 },
    Rgbx8888 { alpha: false, bpp: 32 },
    Bgra8888 { opaque: Bgrx8888, alpha: true, bpp: 32 },
    Bgrx8888 { alpha: false, bpp: 32 },

    Argb2101010 { opaque: Xrgb2101010, alpha: true, bpp: 32 },
    Xrgb2101010 { alpha: false, bpp: 32 },
    Abgr2101010 { opaque: Xbgr2101010, alpha: true, bpp: 32 },
    Xbgr2101010 { alpha: false, bpp: 32 },
}

/// Smallest stride in bytes a row of `width` pixels of the given format occupies.
///
/// Returns `None` for unknown formats, formats with sub-byte pixels or on overflow.
pub fn min_stride(fourcc: Fourcc, width: u32) -> Option<u32> {
    let bpp = get_bpp(fourcc)?;
    if bpp % 8 != 0 {
        return None;
    }
    width.checked_mul((bpp / 8) as u32)
}
