//! Window management using winit.
//!
//! A thin wrapper that tracks resize and close requests, plus [`run`], which
//! drives an event loop and calls a per-frame callback between event batches.

use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window as WinitWindow, WindowId};

use crate::error::{GraphicsError, GraphicsResult};

/// Wrapper around a winit window with resize and close tracking.
pub struct Window {
    window: WinitWindow,
    width: u32,
    height: u32,
    resized: bool,
    close_requested: bool,
}

impl Window {
    /// Create a window on an active event loop.
    pub fn new(
        event_loop: &ActiveEventLoop,
        title: &str,
        width: u32,
        height: u32,
    ) -> GraphicsResult<Self> {
        let attributes = WinitWindow::default_attributes()
            .with_title(title)
            .with_inner_size(PhysicalSize::new(width, height));

        let window = event_loop.create_window(attributes).map_err(|e| {
            GraphicsError::SurfaceCreationFailed(format!("Failed to create window: {e}"))
        })?;

        let size = window.inner_size();
        Ok(Self {
            window,
            width: size.width,
            height: size.height,
            resized: false,
            close_requested: false,
        })
    }

    /// The raw window, usable as a surface provider.
    pub fn window(&self) -> &WinitWindow {
        &self.window
    }

    /// Current inner size in physical pixels.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Return the new size once per resize, clearing the flag.
    pub fn take_resize(&mut self) -> Option<(u32, u32)> {
        std::mem::take(&mut self.resized).then_some((self.width, self.height))
    }

    pub fn should_close(&self) -> bool {
        self.close_requested
    }

    /// Ask [`run`] to stop after the current frame.
    pub fn request_close(&mut self) {
        self.close_requested = true;
    }

    pub fn handle_event(&mut self, event: &WindowEvent) {
        match event {
            WindowEvent::Resized(size) => {
                self.width = size.width;
                self.height = size.height;
                self.resized = true;
            }
            WindowEvent::CloseRequested => {
                self.close_requested = true;
            }
            _ => {}
        }
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }
}

struct Runner<S, I, F> {
    title: String,
    size: (u32, u32),
    init: Option<I>,
    frame: F,
    state: Option<S>,
    window: Option<Window>,
    error: Option<GraphicsError>,
}

impl<S, I, F> Runner<S, I, F>
where
    I: FnOnce(&Window) -> GraphicsResult<S>,
    F: FnMut(&mut Window, &mut S) -> GraphicsResult<()>,
{
    fn fail(&mut self, event_loop: &ActiveEventLoop, error: GraphicsError) {
        log::error!("Stopping event loop: {}", error);
        self.error = Some(error);
        event_loop.exit();
    }
}

impl<S, I, F> ApplicationHandler for Runner<S, I, F>
where
    I: FnOnce(&Window) -> GraphicsResult<S>,
    F: FnMut(&mut Window, &mut S) -> GraphicsResult<()>,
{
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        let Some(init) = self.init.take() else {
            return;
        };

        let window = match Window::new(event_loop, &self.title, self.size.0, self.size.1) {
            Ok(window) => window,
            Err(e) => return self.fail(event_loop, e),
        };

        match init(&window) {
            Ok(state) => {
                self.state = Some(state);
                self.window = Some(window);
            }
            Err(e) => self.fail(event_loop, e),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        if let Some(window) = &mut self.window {
            window.handle_event(&event);
            if window.should_close() {
                event_loop.exit();
            }
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let (Some(window), Some(state)) = (&mut self.window, &mut self.state) else {
            return;
        };
        if window.should_close() {
            return;
        }

        if let Err(e) = (self.frame)(window, state) {
            return self.fail(event_loop, e);
        }
        if window.should_close() {
            event_loop.exit();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        // State holds GPU objects that reference the window's surface.
        self.state = None;
        self.window = None;
    }
}

/// Open a window and run until it is closed or a callback fails.
///
/// `init` runs once the window exists; `frame` runs after every batch of
/// events with the window and the state `init` produced. State is dropped
/// before the window.
pub fn run<S, I, F>(title: &str, width: u32, height: u32, init: I, frame: F) -> GraphicsResult<()>
where
    I: FnOnce(&Window) -> GraphicsResult<S>,
    F: FnMut(&mut Window, &mut S) -> GraphicsResult<()>,
{
    let event_loop = EventLoop::new().map_err(|e| {
        GraphicsError::InitializationFailed(format!("Failed to create event loop: {e}"))
    })?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = Runner {
        title: title.to_string(),
        size: (width, height),
        init: Some(init),
        frame,
        state: None,
        window: None,
        error: None,
    };

    event_loop
        .run_app(&mut runner)
        .map_err(|e| GraphicsError::InitializationFailed(format!("Event loop failed: {e}")))?;

    match runner.error.take() {
        Some(error) => Err(error),
        None => Ok(()),
    }
}
