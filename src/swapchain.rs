//! Swapchain management.
//!
//! The swapchain is either valid or invalid. It becomes invalid on an explicit
//! resize request or when acquire/present report the surface as out of date
//! or suboptimal, and it is rebuilt wholesale before the next acquire.

use std::sync::Arc;

use ash::prelude::VkResult;
use ash::vk;

use crate::device::DeviceContext;
use crate::error::{GraphicsError, GraphicsResult};
use crate::render_target::RenderTarget;

/// Validity of the current swapchain generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapchainState {
    Valid,
    Invalid,
}

impl SwapchainState {
    /// Move to `Invalid`. Returns `false` when already invalid.
    pub fn invalidate(&mut self) -> bool {
        let changed = *self == Self::Valid;
        *self = Self::Invalid;
        changed
    }
}

/// Result of acquiring a swapchain image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired(u32),
    /// An image was acquired and its semaphore will be signalled, but the
    /// swapchain no longer matches the surface.
    Suboptimal(u32),
    OutOfDate,
}

/// Result of presenting a swapchain image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

pub fn classify_acquire(result: VkResult<(u32, bool)>) -> GraphicsResult<AcquireOutcome> {
    match result {
        Ok((index, false)) => Ok(AcquireOutcome::Acquired(index)),
        Ok((index, true)) => Ok(AcquireOutcome::Suboptimal(index)),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
        Err(e) => Err(GraphicsError::from_vk(e, GraphicsError::SubmissionFailed)),
    }
}

pub fn classify_present(result: VkResult<bool>) -> GraphicsResult<PresentOutcome> {
    match result {
        Ok(false) => Ok(PresentOutcome::Presented),
        Ok(true) => Ok(PresentOutcome::Suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
        Err(e) => Err(GraphicsError::from_vk(e, GraphicsError::PresentFailed)),
    }
}

/// Prefer 8-bit BGRA sRGB, otherwise the first reported format.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

/// Prefer MAILBOX unless vsync is forced; FIFO is always supported.
pub fn choose_present_mode(modes: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if !vsync && modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Use the surface's current extent when it is defined, otherwise clamp the
/// requested extent to the supported range.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    requested: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: requested.width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: requested.height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

/// One more than the minimum, capped by the maximum when there is one.
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        desired.min(capabilities.max_image_count)
    } else {
        desired
    }
}

/// Presentable images for the device's surface.
pub struct Swapchain {
    context: Arc<DeviceContext>,
    surface: vk::SurfaceKHR,
    handle: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    requested_extent: vk::Extent2D,
    vsync: bool,
    state: SwapchainState,
    generation: u64,
}

impl Swapchain {
    pub(crate) fn new(
        context: Arc<DeviceContext>,
        surface: vk::SurfaceKHR,
        requested_extent: vk::Extent2D,
        vsync: bool,
    ) -> GraphicsResult<Self> {
        let mut swapchain = Self {
            context,
            surface,
            handle: vk::SwapchainKHR::null(),
            images: Vec::new(),
            views: Vec::new(),
            format: vk::SurfaceFormatKHR::default(),
            present_mode: vk::PresentModeKHR::FIFO,
            extent: vk::Extent2D::default(),
            requested_extent,
            vsync,
            state: SwapchainState::Invalid,
            generation: 0,
        };

        if !swapchain.rebuild()? {
            log::warn!("Surface has zero extent, swapchain creation deferred");
        }
        Ok(swapchain)
    }

    pub fn state(&self) -> SwapchainState {
        self.state
    }

    pub fn is_valid(&self) -> bool {
        self.state == SwapchainState::Valid
    }

    /// Mark the swapchain for rebuild. No-op when already invalid.
    pub fn mark_invalid(&mut self) {
        if self.state.invalidate() {
            log::debug!("Swapchain marked invalid (generation {})", self.generation);
        }
    }

    /// Record a new target extent (window resize) and invalidate.
    pub fn request_extent(&mut self, width: u32, height: u32) {
        self.requested_extent = vk::Extent2D { width, height };
        self.mark_invalid();
    }

    pub fn requested_extent(&self) -> vk::Extent2D {
        self.requested_extent
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn format(&self) -> vk::Format {
        self.format.format
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Number of successful (re)creations so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Render target for an acquired image index of the current generation.
    pub fn render_target(&self, image_index: u32) -> Option<RenderTarget> {
        let index = image_index as usize;
        Some(RenderTarget {
            image: *self.images.get(index)?,
            view: *self.views.get(index)?,
            format: self.format.format,
            extent: self.extent,
        })
    }

    /// Recreate the swapchain against the current surface state.
    ///
    /// Returns `Ok(false)` when the surface has zero area (for example a
    /// minimized window); the swapchain then stays invalid.
    pub fn rebuild(&mut self) -> GraphicsResult<bool> {
        let context = Arc::clone(&self.context);
        let surface_loader = context.surface_loader();
        let physical_device = context.physical_device();

        context.wait_idle()?;

        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, self.surface)
        }
        .map_err(|e| GraphicsError::from_vk(e, GraphicsError::SwapchainCreationFailed))?;

        let extent = choose_extent(&capabilities, self.requested_extent);
        if extent.width == 0 || extent.height == 0 {
            self.state = SwapchainState::Invalid;
            return Ok(false);
        }

        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, self.surface)
        }
        .map_err(|e| GraphicsError::from_vk(e, GraphicsError::SwapchainCreationFailed))?;

        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, self.surface)
        }
        .map_err(|e| GraphicsError::from_vk(e, GraphicsError::SwapchainCreationFailed))?;

        let format = choose_surface_format(&formats).ok_or_else(|| {
            GraphicsError::SwapchainCreationFailed("Surface reports no formats".to_string())
        })?;
        let present_mode = choose_present_mode(&present_modes, self.vsync);
        let image_count = choose_image_count(&capabilities);

        let queue_families = context.queue_families();
        let family_indices = queue_families.unique();
        let sharing_mode = if queue_families.is_unified() {
            vk::SharingMode::EXCLUSIVE
        } else {
            vk::SharingMode::CONCURRENT
        };

        let old_swapchain = self.handle;

        let mut create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC)
            .image_sharing_mode(sharing_mode)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);
        if sharing_mode == vk::SharingMode::CONCURRENT {
            create_info = create_info.queue_family_indices(&family_indices);
        }

        let loader = context.swapchain_loader();
        let new_swapchain = unsafe { loader.create_swapchain(&create_info, None) }
            .map_err(|e| GraphicsError::from_vk(e, GraphicsError::SwapchainCreationFailed))?;

        // The old generation is only torn down once its replacement exists.
        self.destroy_views();
        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe { loader.destroy_swapchain(old_swapchain, None) };
        }
        self.handle = new_swapchain;
        self.images.clear();

        self.images = unsafe { loader.get_swapchain_images(new_swapchain) }
            .map_err(|e| GraphicsError::from_vk(e, GraphicsError::SwapchainCreationFailed))?;

        for &image in &self.images {
            let view = context.create_image_view(image, format.format)?;
            self.views.push(view);
        }

        self.format = format;
        self.present_mode = present_mode;
        self.extent = extent;
        self.state = SwapchainState::Valid;
        self.generation += 1;

        log::info!(
            "Swapchain generation {}: {}x{}, {} images, {:?}, {:?}",
            self.generation,
            extent.width,
            extent.height,
            self.images.len(),
            format.format,
            present_mode
        );

        Ok(true)
    }

    /// Acquire the next image, signalling `semaphore` when it is ready.
    ///
    /// Out-of-date and suboptimal results mark the swapchain invalid.
    pub fn acquire_next_image(&mut self, semaphore: vk::Semaphore) -> GraphicsResult<AcquireOutcome> {
        if !self.is_valid() {
            return Err(GraphicsError::SurfaceOutdated);
        }

        let result = unsafe {
            self.context.swapchain_loader().acquire_next_image(
                self.handle,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };

        let outcome = classify_acquire(result)?;
        if !matches!(outcome, AcquireOutcome::Acquired(_)) {
            self.mark_invalid();
        }
        Ok(outcome)
    }

    /// Present `image_index` once `wait_semaphore` is signalled.
    ///
    /// Out-of-date and suboptimal results mark the swapchain invalid; any
    /// other failure is returned.
    pub fn present(
        &mut self,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> GraphicsResult<PresentOutcome> {
        if !self.is_valid() {
            return Err(GraphicsError::SurfaceOutdated);
        }

        let wait_semaphores = [wait_semaphore];
        let swapchains = [self.handle];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            self.context
                .swapchain_loader()
                .queue_present(self.context.present_queue(), &present_info)
        };

        let outcome = classify_present(result)?;
        if outcome != PresentOutcome::Presented {
            self.mark_invalid();
        }
        Ok(outcome)
    }

    fn destroy_views(&mut self) {
        let device = self.context.device();
        for view in self.views.drain(..) {
            unsafe { device.destroy_image_view(view, None) };
        }
    }

    /// Destroy views and the swapchain. Safe to call more than once.
    pub(crate) fn destroy(&mut self) {
        self.destroy_views();
        self.images.clear();
        if self.handle != vk::SwapchainKHR::null() {
            unsafe {
                self.context
                    .swapchain_loader()
                    .destroy_swapchain(self.handle, None)
            };
            self.handle = vk::SwapchainKHR::null();
        }
        self.state = SwapchainState::Invalid;
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(current: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_invalidate_is_idempotent() {
        let mut state = SwapchainState::Valid;
        assert!(state.invalidate());
        assert_eq!(state, SwapchainState::Invalid);
        assert!(!state.invalidate());
        assert_eq!(state, SwapchainState::Invalid);
    }

    #[test]
    fn test_prefers_bgra_srgb_format() {
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];
        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn test_falls_back_to_first_format() {
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
            },
        ];
        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::R8G8B8A8_UNORM);
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn test_present_mode_preference() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&modes, false), vk::PresentModeKHR::MAILBOX);
        assert_eq!(choose_present_mode(&modes, true), vk::PresentModeKHR::FIFO);
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE], false),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_extent_uses_current_extent_when_defined() {
        let caps = capabilities((800, 600));
        let extent = choose_extent(
            &caps,
            vk::Extent2D {
                width: 1024,
                height: 768,
            },
        );
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn test_extent_clamps_requested_when_undefined() {
        let caps = capabilities((u32::MAX, u32::MAX));
        let extent = choose_extent(
            &caps,
            vk::Extent2D {
                width: 8000,
                height: 0,
            },
        );
        assert_eq!((extent.width, extent.height), (4096, 1));
    }

    #[test]
    fn test_image_count_is_capped() {
        assert_eq!(choose_image_count(&capabilities((1, 1))), 3);

        let mut caps = capabilities((1, 1));
        caps.max_image_count = 2;
        assert_eq!(choose_image_count(&caps), 2);

        caps.max_image_count = 0;
        assert_eq!(choose_image_count(&caps), 3);
    }

    #[test]
    fn test_acquire_classification() {
        assert_eq!(classify_acquire(Ok((2, false))), Ok(AcquireOutcome::Acquired(2)));
        assert_eq!(classify_acquire(Ok((1, true))), Ok(AcquireOutcome::Suboptimal(1)));
        assert_eq!(
            classify_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)),
            Ok(AcquireOutcome::OutOfDate)
        );
        assert_eq!(
            classify_acquire(Err(vk::Result::ERROR_DEVICE_LOST)),
            Err(GraphicsError::DeviceLost)
        );
    }

    #[test]
    fn test_present_classification() {
        assert_eq!(classify_present(Ok(false)), Ok(PresentOutcome::Presented));
        assert_eq!(classify_present(Ok(true)), Ok(PresentOutcome::Suboptimal));
        assert_eq!(
            classify_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)),
            Ok(PresentOutcome::OutOfDate)
        );
        assert_eq!(
            classify_present(Err(vk::Result::ERROR_SURFACE_LOST_KHR)),
            Err(GraphicsError::SurfaceLost)
        );
        assert!(matches!(
            classify_present(Err(vk::Result::ERROR_VALIDATION_FAILED_EXT)),
            Err(GraphicsError::PresentFailed(_))
        ));
    }
}
