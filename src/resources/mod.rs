//! Resource ownership.
//!
//! [`ResourceManager`] owns every registered GPU resource and hands out opaque
//! [`ResourceHandle`]s. Handles are never reused, so a released handle can
//! never alias a newer resource.

mod layer;

use std::any::Any;
use std::collections::HashMap;

pub use layer::{LayerGpuResource, LayerImage, LayerVertex};

use crate::error::{GraphicsError, GraphicsResult};

/// Opaque identifier for a resource owned by a [`ResourceManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceHandle(u32);

impl ResourceHandle {
    pub fn id(&self) -> u32 {
        self.0
    }
}

/// A resource that can be stored in a [`ResourceManager`].
pub trait GpuResource: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Short description used in diagnostics.
    fn kind(&self) -> &'static str;
}

/// Table of owned GPU resources keyed by handle.
///
/// Resources are destroyed immediately on [`ResourceManager::release`]; the
/// caller must ensure the GPU no longer uses them.
#[derive(Default)]
pub struct ResourceManager {
    resources: HashMap<ResourceHandle, Box<dyn GpuResource>>,
    next_id: u32,
    exhausted: bool,
}

impl ResourceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of `resource` and return its handle.
    pub fn add<R: GpuResource>(&mut self, resource: R) -> GraphicsResult<ResourceHandle> {
        if self.exhausted {
            return Err(GraphicsError::HandleSpaceExhausted);
        }

        let handle = ResourceHandle(self.next_id);
        match self.next_id.checked_add(1) {
            Some(next) => self.next_id = next,
            None => self.exhausted = true,
        }

        log::trace!("Registered {} as handle {}", resource.kind(), handle.0);
        self.resources.insert(handle, Box::new(resource));
        Ok(handle)
    }

    /// Borrow the resource behind `handle` as `T`.
    ///
    /// Returns `None` for unknown or released handles. Asking for the wrong
    /// type is an internal defect and asserts in debug builds.
    pub fn get<T: GpuResource>(&self, handle: ResourceHandle) -> Option<&T> {
        let resource = self.resources.get(&handle)?;
        let kind = resource.kind();
        let typed = resource.as_any().downcast_ref::<T>();
        if typed.is_none() {
            wrong_type(handle, kind);
        }
        typed
    }

    pub fn get_mut<T: GpuResource>(&mut self, handle: ResourceHandle) -> Option<&mut T> {
        let resource = self.resources.get_mut(&handle)?;
        let kind = resource.kind();
        let typed = resource.as_any_mut().downcast_mut::<T>();
        if typed.is_none() {
            wrong_type(handle, kind);
        }
        typed
    }

    /// Destroy the resource behind `handle`. Returns `false` if it was unknown.
    pub fn release(&mut self, handle: ResourceHandle) -> bool {
        match self.resources.remove(&handle) {
            Some(resource) => {
                log::trace!("Released {} handle {}", resource.kind(), handle.0);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, handle: ResourceHandle) -> bool {
        self.resources.contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Destroy every resource. Handles issued so far stay retired.
    pub fn clear(&mut self) {
        self.resources.clear();
    }
}

fn wrong_type(handle: ResourceHandle, kind: &str) {
    log::error!(
        "Resource handle {} holds a {}, not the requested type",
        handle.0,
        kind
    );
    debug_assert!(false, "resource handle {} queried with wrong type", handle.0);
}
