//! Frame lifecycle against a real window.
//!
//! Renders one layer into an 800x600 swapchain, then signals a resize and
//! checks the swapchain is rebuilt before the next acquire. Skips when no
//! display or suitable GPU is available.
//!
//! ```bash
//! cargo test --test frame_test
//! ```

mod common;

use rstest::rstest;
use winit::dpi::PhysicalSize;
use winit::window::Window;

use canvas_gpu::{
    CanvasCompositor, CanvasTransform, FrameOrchestrator, FrameOutcome, GraphicsDevice,
    LayerGpuResource, LayerImage, LayerVertex, Region, ResourceManager,
};
use common::{assert_passed, run_scenario, Scenario};

/// Acquire may report the fresh swapchain as stale a few times while the
/// window manager settles.
const MAX_ATTEMPTS: u32 = 20;

enum Stage {
    Setup,
    FirstFrame,
    Resize,
    AfterResize { generation: u64 },
}

struct FrameScenario {
    // Dropped in field order, before the harness drops the device.
    resources: ResourceManager,
    frames: Option<FrameOrchestrator>,
    compositor: Option<CanvasCompositor>,
    stage: Stage,
    attempts: u32,
}

impl FrameScenario {
    fn new() -> Self {
        Self {
            resources: ResourceManager::new(),
            frames: None,
            compositor: None,
            stage: Stage::Setup,
            attempts: 0,
        }
    }

    fn setup(&mut self, device: &GraphicsDevice) -> Result<(), String> {
        let context = device.context();
        let mut compositor = CanvasCompositor::new(context, device.swapchain().format())
            .map_err(|e| e.to_string())?;
        compositor.set_canvas_size(800, 600);
        compositor.set_region(0, 0, 800, 600);

        let image = LayerImage::solid([30, 120, 200, 255], 100, 100);
        let (vertices, indices) = LayerVertex::quad(0.0, 0.0, 800.0, 600.0);
        let layer = LayerGpuResource::create_from_image(context, &image, &vertices, &indices)
            .map_err(|e| e.to_string())?;
        let handle = self.resources.add(layer).map_err(|e| e.to_string())?;
        compositor.add_layer(handle);

        self.frames = Some(FrameOrchestrator::new(context).map_err(|e| e.to_string())?);
        self.compositor = Some(compositor);
        Ok(())
    }

    fn tick(&mut self, device: &mut GraphicsDevice) -> Result<FrameOutcome, String> {
        let (Some(frames), Some(compositor)) = (&mut self.frames, &mut self.compositor) else {
            return Err("scenario not set up".to_string());
        };
        frames
            .tick(device, compositor, &self.resources, None)
            .map_err(|e| format!("frame tick failed: {e}"))
    }

    fn retry(&mut self, what: &str) -> Result<bool, String> {
        self.attempts += 1;
        if self.attempts >= MAX_ATTEMPTS {
            return Err(format!("{what}: no frame presented after {MAX_ATTEMPTS} attempts"));
        }
        Ok(false)
    }
}

impl Scenario for FrameScenario {
    fn step(&mut self, window: &Window, device: &mut GraphicsDevice) -> Result<bool, String> {
        match self.stage {
            Stage::Setup => {
                self.setup(device)?;
                self.stage = Stage::FirstFrame;
                Ok(false)
            }
            Stage::FirstFrame => match self.tick(device)? {
                FrameOutcome::Presented(stats) => {
                    if !device.swapchain().is_valid() {
                        return Err("swapchain invalid after a clean present".to_string());
                    }
                    if stats.draws.index_counts != vec![6] {
                        return Err(format!("expected one draw of 6 indices, got {:?}", stats.draws));
                    }
                    self.attempts = 0;
                    self.stage = Stage::Resize;
                    Ok(false)
                }
                FrameOutcome::PresentedOutOfDate(stats) => {
                    // Absorbed: the frame still recorded its draw.
                    if stats.draws.index_counts != vec![6] {
                        return Err(format!("expected one draw of 6 indices, got {:?}", stats.draws));
                    }
                    self.attempts = 0;
                    self.stage = Stage::Resize;
                    Ok(false)
                }
                FrameOutcome::AcquireOutOfDate | FrameOutcome::SurfaceUnavailable => {
                    self.retry("first frame")
                }
            },
            Stage::Resize => {
                let generation = device.swapchain().generation();
                let _ = window.request_inner_size(PhysicalSize::new(1024, 768));
                device.notify_resized(1024, 768);

                if device.swapchain().is_valid() {
                    return Err("resize did not invalidate the swapchain".to_string());
                }
                // Marking twice is harmless.
                device.swapchain_mut().mark_invalid();

                self.stage = Stage::AfterResize { generation };
                Ok(false)
            }
            Stage::AfterResize { generation } => {
                let outcome = self.tick(device)?;
                if outcome == FrameOutcome::SurfaceUnavailable {
                    return self.retry("resize");
                }

                let swapchain = device.swapchain();
                if swapchain.generation() <= generation {
                    return Err(format!(
                        "swapchain not rebuilt: generation {} after {}",
                        swapchain.generation(),
                        generation
                    ));
                }
                let extent = swapchain.extent();
                if extent.width == 0 || extent.height == 0 {
                    return Err("rebuilt swapchain has zero extent".to_string());
                }
                if let Some(stats) = outcome.stats() {
                    if stats.swapchain_generation <= generation {
                        return Err("frame recorded against the old swapchain".to_string());
                    }
                }

                // The viewport region is independent of the swapchain extent.
                let compositor = self.compositor.as_ref().ok_or("compositor missing")?;
                if compositor.region() != Region::new(0, 0, 800, 600) {
                    return Err("region changed without set_region".to_string());
                }
                if compositor.transform() != CanvasTransform::fit(800, 600, Region::default()) {
                    return Err("transform changed without region update".to_string());
                }

                Ok(true)
            }
        }
    }
}

#[rstest]
fn test_present_and_resize() {
    assert_passed(run_scenario(800, 600, FrameScenario::new()));
}

#[rstest]
fn test_harness_accepts_fallback_adapters() {
    let config = common::test_device_config(800, 600);
    assert!(config.allow_integrated);
    assert!(config.allow_software);
    assert_eq!((config.initial_width, config.initial_height), (800, 600));
}
