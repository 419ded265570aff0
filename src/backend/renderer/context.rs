//! Tracking of the current GPU context
//!
//! Graphics apis like EGL keep a per-thread "current context". Operations that
//! touch several renderers switch it behind the back of whoever was drawing
//! before. Instead of relying on that implicit state, every renderer operation
//! receives the [`CurrentContext`] register explicitly and switches contexts
//! through it.
//!
//! Operations spanning multiple renderer calls take a snapshot with
//! [`CurrentContext::save`]. The returned [`SavedContext`] restores the previous
//! context when it goes out of scope, regardless of how the operation exits.

use std::{
    fmt,
    ops::{Deref, DerefMut},
    rc::Rc,
};

use tracing::warn;

use super::RendererError;

/// A GPU context that can be made current on the calling thread
pub trait GpuContext: fmt::Debug {
    /// Make this context the current one
    fn make_current(&self) -> Result<(), RendererError>;
    /// Release this context, leaving no context current
    fn unbind(&self) -> Result<(), RendererError>;
}

fn same_context(a: &Rc<dyn GpuContext>, b: &Rc<dyn GpuContext>) -> bool {
    Rc::as_ptr(a) as *const () == Rc::as_ptr(b) as *const ()
}

/// Register holding the context that is currently made current
#[derive(Debug, Default)]
pub struct CurrentContext {
    current: Option<Rc<dyn GpuContext>>,
}

impl CurrentContext {
    /// Create a register with no context current
    pub fn new() -> CurrentContext {
        CurrentContext::default()
    }

    /// The context currently made current, if any
    pub fn current(&self) -> Option<&Rc<dyn GpuContext>> {
        self.current.as_ref()
    }

    /// Returns true if the given context is the current one
    pub fn is_current(&self, context: &Rc<dyn GpuContext>) -> bool {
        self.current
            .as_ref()
            .map(|current| same_context(current, context))
            .unwrap_or(false)
    }

    /// Make the given context current
    ///
    /// Does nothing if it already is the current context.
    pub fn make_current(&mut self, context: &Rc<dyn GpuContext>) -> Result<(), RendererError> {
        if self.is_current(context) {
            return Ok(());
        }
        context.make_current()?;
        self.current = Some(context.clone());
        Ok(())
    }

    /// Release the current context, if any
    pub fn unbind(&mut self) -> Result<(), RendererError> {
        if let Some(current) = self.current.take() {
            current.unbind()?;
        }
        Ok(())
    }

    /// Take a snapshot of the current context
    ///
    /// The snapshot is restored once the returned guard is dropped.
    pub fn save(&mut self) -> SavedContext<'_> {
        let saved = self.current.clone();
        SavedContext { ctx: self, saved }
    }

    fn restore(&mut self, saved: Option<Rc<dyn GpuContext>>) {
        let res = match saved {
            Some(saved) => self.make_current(&saved),
            None => self.unbind(),
        };
        if let Err(err) = res {
            warn!(?err, "Failed to restore previous GPU context");
        }
    }
}

/// Guard restoring a previously current context, see [`CurrentContext::save`]
///
/// The guard dereferences to the [`CurrentContext`] it borrows, so the saved sequence
/// keeps passing it to renderer operations while the restore stays pending.
pub struct SavedContext<'a> {
    ctx: &'a mut CurrentContext,
    saved: Option<Rc<dyn GpuContext>>,
}

impl fmt::Debug for SavedContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SavedContext")
            .field("current", &self.ctx.current)
            .field("saved", &self.saved)
            .finish()
    }
}

impl Deref for SavedContext<'_> {
    type Target = CurrentContext;

    fn deref(&self) -> &CurrentContext {
        self.ctx
    }
}

impl DerefMut for SavedContext<'_> {
    fn deref_mut(&mut self) -> &mut CurrentContext {
        self.ctx
    }
}

impl Drop for SavedContext<'_> {
    fn drop(&mut self) {
        let saved = self.saved.take();
        self.ctx.restore(saved);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::renderer::test::DummyContext;

    #[test]
    fn save_restores_on_drop() {
        let drawing: Rc<dyn GpuContext> = Rc::new(DummyContext::default());
        let other: Rc<dyn GpuContext> = Rc::new(DummyContext::default());

        let mut ctx = CurrentContext::new();
        ctx.make_current(&drawing).unwrap();
        {
            let mut saved = ctx.save();
            saved.make_current(&other).unwrap();
            assert!(saved.is_current(&other));
        }
        assert!(ctx.is_current(&drawing));
    }

    #[test]
    fn save_restores_nothing_current() {
        let other = Rc::new(DummyContext::default());
        let other_dyn: Rc<dyn GpuContext> = other.clone();

        let mut ctx = CurrentContext::new();
        {
            let mut saved = ctx.save();
            saved.make_current(&other_dyn).unwrap();
        }
        assert!(ctx.current().is_none());
        assert_eq!(other.unbinds(), 1);
    }

    #[test]
    fn make_current_is_idempotent() {
        let context = Rc::new(DummyContext::default());
        let context_dyn: Rc<dyn GpuContext> = context.clone();

        let mut ctx = CurrentContext::new();
        ctx.make_current(&context_dyn).unwrap();
        ctx.make_current(&context_dyn).unwrap();
        assert_eq!(context.activations(), 1);
    }
}
