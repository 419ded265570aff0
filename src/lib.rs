#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

//! # Texture synchronization for multi-gpu wayland compositors
//!
//! This crate manages the gpu resources a compositor needs to display buffers of its clients:
//! importing buffers into textures, sharing them between the renderers of multiple gpus
//! and keeping them up to date as clients damage and resubmit their buffers.
//!
//! ## Structure of the crate
//!
//! - [`backend::allocator`] contains the reference counted [`Buffer`](backend::allocator::Buffer)
//!   handle, dmabufs and pixel formats.
//! - [`backend::renderer`] contains the renderer contract, textures, the gpu registry,
//!   the per buffer texture cache and client buffers.
//! - [`utils`] contains geometry types and the destruction notification primitives.
//!
//! Concrete renderers (GL, Vulkan, software) are not provided, they plug in by implementing
//! [`RendererImpl`](backend::renderer::RendererImpl).
//!
//! ## Threading
//!
//! Everything in this crate lives on the compositor's main thread. Handles are reference
//! counted with [`Rc`](std::rc::Rc) and are neither `Send` nor `Sync`.
//!
//! ## Logging
//!
//! This crate makes extensive use of [`tracing`] for its internal logging.
//!
//! For release builds it is recommended to limit the log level during compile time.
//! This can be done by adding a dependency to [`tracing`] and enabling the corresponding features.
//! For example to enable `trace` messages for debug builds, but limit release builds to `debug` add
//! the following in your binary crate `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! tracing = { version = "0.1", features = ["max_level_trace", "release_max_level_debug"] }
//! ```
//!
//! Expensive operations, like reading back textures, are annotated for [`profiling`].

pub mod backend;
pub mod utils;
