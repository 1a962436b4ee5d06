//! Graphics device: instance, adapter, queues, allocator and the swapchain.
//!
//! [`GraphicsDevice`] is created once at startup and passed explicitly to
//! everything that needs it. Device-level objects live in a shared
//! [`DeviceContext`]; every GPU resource keeps an `Arc` to it, so the logical
//! device is only destroyed after the last resource is gone.

mod adapter;
mod allocator;
mod barrier;
mod command;
mod config;
mod debug;
mod instance;
mod memory;
mod surface;

use std::mem::ManuallyDrop;
use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::Allocator;
use parking_lot::Mutex;

pub use adapter::{adapter_rank, select_queue_families, QueueFamilyIndices};
pub use barrier::{transition_masks, ImageLayout, TransitionMasks};
pub use config::DeviceConfig;
pub use memory::{GpuBuffer, GpuImage};
pub use surface::SurfaceProvider;

use crate::error::{GraphicsError, GraphicsResult};
use crate::swapchain::Swapchain;
use debug::DebugMessenger;

/// Device-level Vulkan objects shared by every resource.
///
/// All methods must be called from the thread driving the frame loop; the
/// command pool is not externally synchronized.
pub struct DeviceContext {
    _entry: ash::Entry,
    instance: ash::Instance,
    debug: Option<DebugMessenger>,
    surface_loader: ash::khr::surface::Instance,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    swapchain_loader: ash::khr::swapchain::Device,
    push_descriptor: ash::khr::push_descriptor::Device,
    queue_families: QueueFamilyIndices,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    command_pool: vk::CommandPool,
    allocator: ManuallyDrop<Mutex<Allocator>>,
    adapter_name: String,
}

impl DeviceContext {
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn surface_loader(&self) -> &ash::khr::surface::Instance {
        &self.surface_loader
    }

    pub fn swapchain_loader(&self) -> &ash::khr::swapchain::Device {
        &self.swapchain_loader
    }

    pub fn push_descriptor(&self) -> &ash::khr::push_descriptor::Device {
        &self.push_descriptor
    }

    pub fn queue_families(&self) -> QueueFamilyIndices {
        self.queue_families
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    pub fn command_pool(&self) -> vk::CommandPool {
        self.command_pool
    }

    pub fn allocator(&self) -> &Mutex<Allocator> {
        &self.allocator
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    /// Block until the graphics queue has no pending work.
    pub fn wait_graphics_idle(&self) -> GraphicsResult<()> {
        unsafe { self.device.queue_wait_idle(self.graphics_queue) }
            .map_err(|e| GraphicsError::from_vk(e, GraphicsError::SubmissionFailed))
    }

    /// Block until the whole device is idle.
    pub fn wait_idle(&self) -> GraphicsResult<()> {
        unsafe { self.device.device_wait_idle() }
            .map_err(|e| GraphicsError::from_vk(e, GraphicsError::SubmissionFailed))
    }

    /// Create a binary semaphore.
    pub fn create_semaphore(&self) -> GraphicsResult<vk::Semaphore> {
        let create_info = vk::SemaphoreCreateInfo::default();
        unsafe { self.device.create_semaphore(&create_info, None) }
            .map_err(|e| GraphicsError::from_vk(e, GraphicsError::SubmissionFailed))
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            // The allocator frees its memory blocks through the device.
            ManuallyDrop::drop(&mut self.allocator);

            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_device(None);

            if let Some(debug) = self.debug.take() {
                debug.destroy();
            }
            self.instance.destroy_instance(None);
        }
        log::info!("Graphics device destroyed");
    }
}

/// The process-wide graphics device.
///
/// Owns the presentation surface and the swapchain. Create it once with
/// [`GraphicsDevice::new`] and tear it down with [`GraphicsDevice::teardown`]
/// (or by dropping it) after the frame loop has stopped.
pub struct GraphicsDevice {
    swapchain: Swapchain,
    surface: vk::SurfaceKHR,
    context: Arc<DeviceContext>,
}

impl GraphicsDevice {
    /// Connect to the GPU and build the initial swapchain.
    ///
    /// Setup failures are fatal for the process: objects created before the
    /// failing step are not unwound.
    pub fn new<P>(config: &DeviceConfig, provider: &P) -> GraphicsResult<Self>
    where
        P: SurfaceProvider + ?Sized,
    {
        let entry = unsafe { ash::Entry::load() }.map_err(|e| {
            GraphicsError::InitializationFailed(format!("Failed to load Vulkan: {}", e))
        })?;

        let surface_extensions = provider.required_instance_extensions()?;
        let (instance, debug) = instance::create_instance(&entry, config, &surface_extensions)?;

        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);
        let surface = unsafe { provider.create_surface(&entry, &instance) }?;

        let adapter = adapter::select_physical_device(
            &instance,
            &surface_loader,
            surface,
            config.allow_integrated,
            config.allow_software,
        )?;

        let properties =
            unsafe { instance.get_physical_device_properties(adapter.physical_device) };
        let adapter_name = properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());

        let device = adapter::create_logical_device(&instance, &adapter, &config.device_extensions)?;

        let queue_families = adapter.queue_families;
        let graphics_queue = unsafe { device.get_device_queue(queue_families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(queue_families.present, 0) };

        let allocator =
            allocator::create_allocator(&instance, &device, adapter.physical_device)?;
        let command_pool = command::create_command_pool(&device, queue_families.graphics)?;

        let swapchain_loader = ash::khr::swapchain::Device::new(&instance, &device);
        let push_descriptor = ash::khr::push_descriptor::Device::new(&instance, &device);

        let context = Arc::new(DeviceContext {
            _entry: entry,
            instance,
            debug,
            surface_loader,
            physical_device: adapter.physical_device,
            device,
            swapchain_loader,
            push_descriptor,
            queue_families,
            graphics_queue,
            present_queue,
            command_pool,
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            adapter_name,
        });

        log::info!(
            "Graphics device ready on {} (graphics family {}, present family {})",
            context.adapter_name(),
            queue_families.graphics,
            queue_families.present
        );

        let swapchain = Swapchain::new(
            Arc::clone(&context),
            surface,
            vk::Extent2D {
                width: config.initial_width,
                height: config.initial_height,
            },
            config.vsync,
        )?;

        Ok(Self {
            swapchain,
            surface,
            context,
        })
    }

    /// Shared device context for creating resources.
    pub fn context(&self) -> &Arc<DeviceContext> {
        &self.context
    }

    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    pub fn swapchain_mut(&mut self) -> &mut Swapchain {
        &mut self.swapchain
    }

    /// Forward a window resize; the swapchain is rebuilt on the next tick.
    pub fn notify_resized(&mut self, width: u32, height: u32) {
        self.swapchain.request_extent(width, height);
    }

    /// Wait for the GPU and destroy the swapchain and surface.
    ///
    /// Device-level objects follow once every resource holding the context
    /// has been dropped.
    pub fn teardown(self) {
        drop(self);
    }
}

impl Drop for GraphicsDevice {
    fn drop(&mut self) {
        if let Err(e) = self.context.wait_idle() {
            log::warn!("Device wait failed during teardown: {}", e);
        }
        self.swapchain.destroy();
        unsafe {
            self.context
                .surface_loader()
                .destroy_surface(self.surface, None)
        };
        log::info!("Surface and swapchain destroyed");
    }
}
