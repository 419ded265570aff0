//! Graphics resource management
//!
//! - [`allocator`] provides buffers and their storage variants
//! - [`renderer`] turns buffers into textures of one or more renderers

pub mod allocator;
pub mod renderer;
