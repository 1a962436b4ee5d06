//! Presentable surface creation.

use std::ffi::c_char;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::error::{GraphicsError, GraphicsResult};

/// Source of the presentable surface the device renders into.
///
/// The windowing toolkit implements this; every `raw-window-handle` window
/// does so automatically.
pub trait SurfaceProvider {
    /// Instance extensions the surface needs.
    fn required_instance_extensions(&self) -> GraphicsResult<Vec<*const c_char>>;

    /// Create the surface for `instance`.
    ///
    /// # Safety
    ///
    /// The underlying window must outlive the returned surface.
    unsafe fn create_surface(
        &self,
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> GraphicsResult<vk::SurfaceKHR>;
}

impl<W> SurfaceProvider for W
where
    W: HasDisplayHandle + HasWindowHandle + ?Sized,
{
    fn required_instance_extensions(&self) -> GraphicsResult<Vec<*const c_char>> {
        let display_handle = self
            .display_handle()
            .map_err(|e| GraphicsError::SurfaceCreationFailed(e.to_string()))?;

        let extensions = ash_window::enumerate_required_extensions(display_handle.as_raw())
            .map_err(|e| GraphicsError::SurfaceCreationFailed(format!("{e:?}")))?;

        Ok(extensions.to_vec())
    }

    unsafe fn create_surface(
        &self,
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> GraphicsResult<vk::SurfaceKHR> {
        let display_handle = self
            .display_handle()
            .map_err(|e| GraphicsError::SurfaceCreationFailed(e.to_string()))?;
        let window_handle = self
            .window_handle()
            .map_err(|e| GraphicsError::SurfaceCreationFailed(e.to_string()))?;

        unsafe {
            ash_window::create_surface(
                entry,
                instance,
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            )
        }
        .map_err(|e| GraphicsError::SurfaceCreationFailed(format!("{e:?}")))
    }
}
