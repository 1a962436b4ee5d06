//! Shared harness for GPU integration tests.
//!
//! Opens a real window, creates a [`GraphicsDevice`] for it and drives a
//! [`Scenario`] one step per event-loop iteration.
//!
//! # CI Compatibility
//!
//! Any Vulkan adapter is accepted, including integrated GPUs and software
//! rasterizers such as lavapipe. If the event loop, the window or the device
//! still cannot be created (no display, no Vulkan driver), the harness reports
//! [`HarnessResult::Skipped`], prints the reason to stderr and the calling
//! test passes. Set `CANVAS_GPU_REQUIRE_DEVICE=1` to turn skips into
//! failures on machines that are expected to render.

use std::time::Duration;

use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::platform::pump_events::{EventLoopExtPumpEvents, PumpStatus};
#[cfg(target_os = "windows")]
use winit::platform::windows::EventLoopBuilderExtWindows;
#[cfg(target_os = "linux")]
use winit::platform::x11::EventLoopBuilderExtX11;
use winit::window::{Window, WindowId};

use canvas_gpu::{DeviceConfig, GraphicsDevice};

/// Iterations before a scenario is considered hung.
const MAX_ITERATIONS: u32 = 1000;

const REQUIRE_DEVICE_VAR: &str = "CANVAS_GPU_REQUIRE_DEVICE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HarnessResult {
    Running,
    Passed,
    Skipped(String),
    Failed(String),
}

/// A multi-step GPU test.
pub trait Scenario {
    /// Run one step. Return `Ok(true)` when finished.
    fn step(&mut self, window: &Window, device: &mut GraphicsDevice) -> Result<bool, String>;
}

struct HarnessApp<S> {
    size: (u32, u32),
    scenario: Option<S>,
    device: Option<GraphicsDevice>,
    window: Option<Window>,
    result: HarnessResult,
}

impl<S: Scenario> HarnessApp<S> {
    fn finish(&mut self, event_loop: &ActiveEventLoop, result: HarnessResult) {
        self.result = result;
        // GPU state first, then the device, then the window it presents to.
        self.scenario = None;
        self.device = None;
        self.window = None;
        event_loop.exit();
    }
}

impl<S: Scenario> ApplicationHandler for HarnessApp<S> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() || self.result != HarnessResult::Running {
            return;
        }

        let attributes = Window::default_attributes()
            .with_title("canvas-gpu test")
            .with_inner_size(PhysicalSize::new(self.size.0, self.size.1))
            .with_visible(true);

        let window = match event_loop.create_window(attributes) {
            Ok(window) => window,
            Err(e) => {
                return self.finish(event_loop, HarnessResult::Skipped(format!("window: {e}")));
            }
        };

        let config = test_device_config(self.size.0, self.size.1);
        match GraphicsDevice::new(&config, &window) {
            Ok(device) => {
                log::info!("Test device: {}", device.context().adapter_name());
                self.device = Some(device);
                self.window = Some(window);
            }
            Err(e) => {
                drop(window);
                self.finish(event_loop, HarnessResult::Skipped(format!("device: {e}")));
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        if let WindowEvent::CloseRequested = event {
            self.finish(
                event_loop,
                HarnessResult::Failed("window closed unexpectedly".to_string()),
            );
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let (Some(window), Some(device), Some(scenario)) =
            (&self.window, &mut self.device, &mut self.scenario)
        else {
            return;
        };

        match scenario.step(window, device) {
            Ok(false) => {}
            Ok(true) => self.finish(event_loop, HarnessResult::Passed),
            Err(message) => self.finish(event_loop, HarnessResult::Failed(message)),
        }
    }
}

/// Device settings for GPU tests: validation on, any adapter accepted.
pub fn test_device_config(width: u32, height: u32) -> DeviceConfig {
    DeviceConfig::default()
        .with_app_name("canvas-gpu tests")
        .with_extent(width, height)
        .with_validation(true)
        .with_integrated_fallback(true)
        .with_software_fallback(true)
}

fn create_event_loop() -> Result<EventLoop<()>, String> {
    // Tests run off the main thread.
    #[cfg(any(target_os = "windows", target_os = "linux"))]
    let event_loop = EventLoop::builder().with_any_thread(true).build();

    #[cfg(target_os = "macos")]
    #[allow(clippy::redundant_closure)]
    let event_loop = std::panic::catch_unwind(|| EventLoop::new())
        .map_err(|_| "event loop requires the main thread on macOS".to_string())?;

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    let event_loop = EventLoop::new();

    event_loop.map_err(|e| e.to_string())
}

/// Run `scenario` against a fresh window and device.
pub fn run_scenario<S: Scenario>(width: u32, height: u32, scenario: S) -> HarnessResult {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .is_test(true)
        .try_init();

    let mut event_loop = match create_event_loop() {
        Ok(event_loop) => event_loop,
        Err(e) => return HarnessResult::Skipped(format!("event loop: {e}")),
    };

    let mut app = HarnessApp {
        size: (width, height),
        scenario: Some(scenario),
        device: None,
        window: None,
        result: HarnessResult::Running,
    };

    let mut iterations = 0;
    loop {
        let status = event_loop.pump_app_events(Some(Duration::ZERO), &mut app);
        if let PumpStatus::Exit(_) = status {
            break;
        }
        if app.result != HarnessResult::Running {
            break;
        }

        iterations += 1;
        if iterations >= MAX_ITERATIONS {
            app.result = HarnessResult::Failed(format!("timed out after {iterations} iterations"));
            break;
        }
        std::thread::sleep(Duration::from_millis(1));
    }

    app.scenario = None;
    app.device = None;
    app.window = None;
    app.result
}

fn device_required() -> bool {
    std::env::var(REQUIRE_DEVICE_VAR).is_ok_and(|value| !value.is_empty() && value != "0")
}

/// Assert a harness result.
///
/// Skips pass unless `CANVAS_GPU_REQUIRE_DEVICE` is set, and are always
/// reported on stderr so they show up in test output.
pub fn assert_passed(result: HarnessResult) {
    match result {
        HarnessResult::Passed => log::info!("Scenario passed"),
        HarnessResult::Skipped(reason) if device_required() => {
            panic!("Scenario skipped but {REQUIRE_DEVICE_VAR} is set: {reason}")
        }
        HarnessResult::Skipped(reason) => {
            eprintln!("SKIPPED: GPU scenario did not run: {reason}");
            log::warn!("Scenario skipped: {reason}");
        }
        HarnessResult::Failed(message) => panic!("Scenario failed: {message}"),
        HarnessResult::Running => panic!("Scenario never finished"),
    }
}
