//! Tracking of the renderers of every gpu in the system
//!
//! A [`GpuRegistry`] is populated by the hardware backend, once per discovered gpu,
//! and designates one renderer as the primary one. Texture sets created against a
//! member renderer get a slot for every member, so the same buffer can be displayed
//! on outputs driven by different gpus.
//!
//! The registry does not own its renderers. Destroying a renderer removes it
//! from its registry.

use std::{
    cell::RefCell,
    fmt,
    rc::{Rc, Weak},
};

use tracing::{debug, info_span, trace};

use super::{Renderer, WeakRenderer};
use crate::utils::{DeadResource, IsAlive};

/// Errors of registry operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The renderer is already member of a different registry
    #[error("the renderer is already registered with another registry")]
    AlreadyRegistered,
    /// The renderer was destroyed
    #[error("the renderer was destroyed")]
    Destroyed(#[source] DeadResource),
}

pub(crate) struct RegistryInner {
    span: tracing::Span,
    primary: RefCell<Option<WeakRenderer>>,
    renderers: RefCell<Vec<Renderer>>,
}

/// Registry of the renderers present in the system
#[derive(Clone)]
pub struct GpuRegistry(pub(crate) Rc<RegistryInner>);

impl fmt::Debug for GpuRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuRegistry")
            .field("primary", &self.primary())
            .field("renderers", &self.0.renderers.borrow())
            .finish()
    }
}

impl PartialEq for GpuRegistry {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for GpuRegistry {}

impl Default for GpuRegistry {
    fn default() -> Self {
        GpuRegistry::new()
    }
}

impl GpuRegistry {
    /// Create an empty registry
    pub fn new() -> GpuRegistry {
        GpuRegistry(Rc::new(RegistryInner {
            span: info_span!("gpu_registry"),
            primary: RefCell::new(None),
            renderers: RefCell::new(Vec::new()),
        }))
    }

    /// Add a renderer to this registry
    ///
    /// Members are tried in insertion order when importing buffers.
    /// Adding a member again does nothing.
    pub fn add_renderer(&self, renderer: &Renderer) -> Result<(), RegistryError> {
        let _guard = self.0.span.enter();
        if !renderer.alive() {
            return Err(RegistryError::Destroyed(DeadResource));
        }
        match renderer.registry() {
            Some(registry) if registry == *self => return Ok(()),
            Some(_) => return Err(RegistryError::AlreadyRegistered),
            None => {}
        }

        debug!(renderer = renderer.id(), "Adding renderer");
        renderer.set_registry(Rc::downgrade(&self.0));
        self.0.renderers.borrow_mut().push(renderer.clone());
        Ok(())
    }

    /// Remove a renderer from this registry
    ///
    /// Existing texture sets keep their slot for the renderer.
    /// Returns `false` if the renderer was no member.
    pub fn remove_renderer(&self, renderer: &Renderer) -> bool {
        let _guard = self.0.span.enter();
        if !self.detach(renderer) {
            return false;
        }
        debug!(renderer = renderer.id(), "Removed renderer");
        true
    }

    pub(crate) fn detach(&self, renderer: &Renderer) -> bool {
        let mut renderers = self.0.renderers.borrow_mut();
        let Some(idx) = renderers.iter().position(|r| r == renderer) else {
            return false;
        };
        renderers.remove(idx);
        renderer.set_registry(Weak::new());

        let mut primary = self.0.primary.borrow_mut();
        if primary.as_ref() == Some(&renderer.downgrade()) {
            trace!(renderer = renderer.id(), "Primary renderer left the registry");
            *primary = None;
        }
        true
    }

    /// Designate the primary renderer
    ///
    /// The renderer does not need to be a member of this registry.
    pub fn set_primary(&self, renderer: &Renderer) {
        let _guard = self.0.span.enter();
        debug!(renderer = renderer.id(), "Setting primary renderer");
        *self.0.primary.borrow_mut() = Some(renderer.downgrade());
    }

    /// The primary renderer, if one was set and it is still alive
    pub fn primary(&self) -> Option<Renderer> {
        self.0.primary.borrow().as_ref().and_then(WeakRenderer::upgrade)
    }

    /// Snapshot of the member renderers in insertion order
    pub fn renderers(&self) -> Vec<Renderer> {
        self.0.renderers.borrow().clone()
    }

    /// Whether the renderer is a member of this registry
    pub fn contains(&self, renderer: &Renderer) -> bool {
        self.0.renderers.borrow().iter().any(|r| r == renderer)
    }

    /// Number of member renderers
    pub fn len(&self) -> usize {
        self.0.renderers.borrow().len()
    }

    /// Whether the registry has no members
    pub fn is_empty(&self) -> bool {
        self.0.renderers.borrow().is_empty()
    }
}
