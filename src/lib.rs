//! Canvas GPU - a Vulkan engine for compositing a layered 2D canvas.
//!
//! The crate owns the GPU side of an image-editor board:
//! - [`GraphicsDevice`]: instance, adapter, queues, allocator and swapchain
//! - [`ResourceManager`]: handle-keyed ownership of layer resources
//! - [`LayerGpuResource`]: a texture plus quad geometry, uploaded once
//! - [`CanvasCompositor`]: records the ordered layers into a color target
//! - [`FrameOrchestrator`]: acquire, record, submit and present, one frame at
//!   a time
//!
//! # Example
//!
//! ```no_run
//! use canvas_gpu::*;
//!
//! fn main() -> GraphicsResult<()> {
//!     window::run(
//!         "Canvas",
//!         800,
//!         600,
//!         |window| {
//!             let device = GraphicsDevice::new(&DeviceConfig::default(), window.window())?;
//!             let compositor =
//!                 CanvasCompositor::new(device.context(), device.swapchain().format())?;
//!             let frames = FrameOrchestrator::new(device.context())?;
//!             Ok((ResourceManager::new(), frames, compositor, device))
//!         },
//!         |window, (resources, frames, compositor, device)| {
//!             if let Some((width, height)) = window.take_resize() {
//!                 device.notify_resized(width, height);
//!                 compositor.set_region(0, 0, width, height);
//!             }
//!             frames.tick(device, compositor, resources, None)?;
//!             Ok(())
//!         },
//!     )
//! }
//! ```

pub mod compositor;
pub mod device;
pub mod error;
pub mod frame;
pub mod render_target;
pub mod resources;
pub mod swapchain;
pub mod window;

pub use compositor::{CanvasCompositor, CanvasTransform, DrawStats, Region};
pub use device::{DeviceConfig, DeviceContext, GraphicsDevice, SurfaceProvider};
pub use error::{GraphicsError, GraphicsResult};
pub use frame::{FrameOrchestrator, FrameOutcome, FrameOverlay, FrameStats};
pub use render_target::RenderTarget;
pub use resources::{
    GpuResource, LayerGpuResource, LayerImage, LayerVertex, ResourceHandle, ResourceManager,
};
pub use swapchain::{AcquireOutcome, PresentOutcome, Swapchain, SwapchainState};
pub use window::Window;
