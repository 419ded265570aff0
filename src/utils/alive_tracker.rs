//! Utilities to track object's life cycle

use std::cell::Cell;

/// Util to track the life time of explicitly destroyed objects
///
/// Buffers, renderers and textures outlive their destruction as long as
/// handles to them exist. The tracker records whether the destruction
/// already happened.
#[derive(Debug)]
pub struct AliveTracker {
    is_alive: Cell<bool>,
}

impl Default for AliveTracker {
    fn default() -> Self {
        Self {
            is_alive: Cell::new(true),
        }
    }
}

impl AliveTracker {
    /// Notify the tracker that object is dead
    ///
    /// Returns `true` if the object was alive before this call.
    pub fn destroy_notify(&self) -> bool {
        self.is_alive.replace(false)
    }

    /// Check if object is alive
    #[inline]
    pub fn alive(&self) -> bool {
        self.is_alive.get()
    }
}

/// Trait that is implemented on objects with an explicit destruction
pub trait IsAlive {
    /// Check if object is alive
    fn alive(&self) -> bool;
}

impl<T: IsAlive> IsAlive for &T {
    #[inline]
    fn alive(&self) -> bool {
        IsAlive::alive(*self)
    }
}
