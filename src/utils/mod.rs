//! Various utilities functions and types

mod alive_tracker;
mod geometry;
pub(crate) mod ids;
pub mod signaling;

pub use self::alive_tracker::{AliveTracker, IsAlive};
pub use self::geometry::{Buffer, Coordinate, Point, Rectangle, Size};
pub use self::signaling::{SignalToken, Signaler};

/// This resource has been destroyed and can no longer be used.
#[derive(Debug)]
pub struct DeadResource;

impl std::fmt::Display for DeadResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("This resource has been destroyed and can no longer be used.")
    }
}

impl std::error::Error for DeadResource {}
