//! Per-frame acquire, record, submit and present.
//!
//! One frame is in flight at most: each tick starts by waiting for the
//! graphics queue to drain, so a single command buffer and one pair of
//! semaphores are enough.

use std::sync::Arc;

use ash::vk;

use crate::compositor::{CanvasCompositor, DrawStats};
use crate::device::{DeviceContext, GraphicsDevice, ImageLayout};
use crate::error::{GraphicsError, GraphicsResult};
use crate::render_target::RenderTarget;
use crate::resources::ResourceManager;
use crate::swapchain::{AcquireOutcome, PresentOutcome};

/// Draws on top of the composited canvas, such as a UI layer.
///
/// Called every tick after the compositor, against the same target. The
/// target already holds the canvas, so implementations must load rather than
/// clear it (see [`RenderTarget::overlay_attachment`]).
pub trait FrameOverlay {
    fn record(
        &mut self,
        context: &DeviceContext,
        cmd: vk::CommandBuffer,
        target: &RenderTarget,
    ) -> GraphicsResult<()>;
}

/// Details of a submitted frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameStats {
    pub image_index: u32,
    pub swapchain_generation: u64,
    pub extent: vk::Extent2D,
    pub draws: DrawStats,
}

/// How a tick ended. Everything except `Presented` means the swapchain is now
/// invalid and will be rebuilt on the next tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented(FrameStats),
    /// The frame was submitted but present reported the swapchain as out of
    /// date or suboptimal.
    PresentedOutOfDate(FrameStats),
    /// Acquire reported the swapchain as out of date or suboptimal; nothing
    /// was recorded.
    AcquireOutOfDate,
    /// The surface has zero area, typically a minimized window.
    SurfaceUnavailable,
}

impl FrameOutcome {
    pub fn stats(&self) -> Option<&FrameStats> {
        match self {
            Self::Presented(stats) | Self::PresentedOutOfDate(stats) => Some(stats),
            Self::AcquireOutOfDate | Self::SurfaceUnavailable => None,
        }
    }

    pub fn was_presented(&self) -> bool {
        self.stats().is_some()
    }
}

/// Semaphores left with a pending signal by a suboptimal acquire.
///
/// The presentation engine signals them on its own schedule, which no queue
/// wait covers. Each one is instead waited on by the next submitted batch and
/// destroyed once that batch has completed.
#[derive(Debug, Default)]
struct RetiredSemaphores {
    /// Not yet waited on by any submission.
    pending: Vec<vk::Semaphore>,
    /// Waited on by the last submission.
    in_flight: Vec<vk::Semaphore>,
}

impl RetiredSemaphores {
    fn retire(&mut self, semaphore: vk::Semaphore) {
        self.pending.push(semaphore);
    }

    /// Semaphores the next submission must wait on. They count as in flight
    /// from here.
    fn take_for_submit(&mut self) -> Vec<vk::Semaphore> {
        let waits = std::mem::take(&mut self.pending);
        self.in_flight.extend_from_slice(&waits);
        waits
    }

    /// Semaphores whose waiting batch has completed. Call only after the
    /// graphics queue is idle.
    fn take_completed(&mut self) -> Vec<vk::Semaphore> {
        std::mem::take(&mut self.in_flight)
    }

    fn take_all(&mut self) -> Vec<vk::Semaphore> {
        let mut all = std::mem::take(&mut self.in_flight);
        all.append(&mut self.pending);
        all
    }
}

/// Drives one present cycle per [`FrameOrchestrator::tick`].
pub struct FrameOrchestrator {
    context: Arc<DeviceContext>,
    command_buffer: vk::CommandBuffer,
    image_available: vk::Semaphore,
    render_finished: vk::Semaphore,
    retired: RetiredSemaphores,
    frame_count: u64,
}

impl FrameOrchestrator {
    pub fn new(context: &Arc<DeviceContext>) -> GraphicsResult<Self> {
        let command_buffer = context.allocate_command_buffer()?;

        let mut orchestrator = Self {
            context: Arc::clone(context),
            command_buffer,
            image_available: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            retired: RetiredSemaphores::default(),
            frame_count: 0,
        };
        orchestrator.image_available = context.create_semaphore()?;
        orchestrator.render_finished = context.create_semaphore()?;

        Ok(orchestrator)
    }

    /// Number of frames submitted so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Run one frame.
    ///
    /// Out-of-date and suboptimal swapchains are absorbed into the returned
    /// outcome; only unrecoverable failures are returned as errors.
    pub fn tick(
        &mut self,
        device: &mut GraphicsDevice,
        compositor: &mut CanvasCompositor,
        resources: &ResourceManager,
        overlay: Option<&mut dyn FrameOverlay>,
    ) -> GraphicsResult<FrameOutcome> {
        self.context.wait_graphics_idle()?;
        let completed = self.retired.take_completed();
        self.destroy_semaphores(completed);

        let swapchain = device.swapchain_mut();
        if !swapchain.is_valid() && !swapchain.rebuild()? {
            return Ok(FrameOutcome::SurfaceUnavailable);
        }

        let image_index = match swapchain.acquire_next_image(self.image_available)? {
            AcquireOutcome::Acquired(index) => index,
            AcquireOutcome::Suboptimal(_) => {
                // The semaphore will be signalled with nothing waiting on it
                // this tick.
                self.replace_image_available()?;
                return Ok(FrameOutcome::AcquireOutOfDate);
            }
            AcquireOutcome::OutOfDate => return Ok(FrameOutcome::AcquireOutOfDate),
        };

        let target = swapchain.render_target(image_index).ok_or_else(|| {
            GraphicsError::SubmissionFailed(format!(
                "Acquired image {} is outside the swapchain",
                image_index
            ))
        })?;

        let draws = self.record(compositor, resources, overlay, &target)?;
        self.submit()?;
        self.frame_count += 1;

        let stats = FrameStats {
            image_index,
            swapchain_generation: swapchain.generation(),
            extent: target.extent,
            draws,
        };

        match swapchain.present(image_index, self.render_finished)? {
            PresentOutcome::Presented => Ok(FrameOutcome::Presented(stats)),
            PresentOutcome::Suboptimal | PresentOutcome::OutOfDate => {
                log::debug!("Present reported stale swapchain, rebuilding next frame");
                Ok(FrameOutcome::PresentedOutOfDate(stats))
            }
        }
    }

    fn record(
        &self,
        compositor: &mut CanvasCompositor,
        resources: &ResourceManager,
        overlay: Option<&mut dyn FrameOverlay>,
        target: &RenderTarget,
    ) -> GraphicsResult<DrawStats> {
        let device = self.context.device();
        let cmd = self.command_buffer;

        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .map_err(|e| GraphicsError::from_vk(e, GraphicsError::SubmissionFailed))?;
            device
                .begin_command_buffer(cmd, &begin_info)
                .map_err(|e| GraphicsError::from_vk(e, GraphicsError::SubmissionFailed))?;
        }

        self.context.transition_image_layout(
            cmd,
            target.image,
            ImageLayout::Undefined,
            ImageLayout::ColorAttachment,
        );

        let draws = compositor.record_draw_commands(cmd, target, resources)?;

        if let Some(overlay) = overlay {
            overlay.record(&self.context, cmd, target)?;
        }

        self.context.transition_image_layout(
            cmd,
            target.image,
            ImageLayout::ColorAttachment,
            ImageLayout::PresentSrc,
        );

        unsafe { device.end_command_buffer(cmd) }
            .map_err(|e| GraphicsError::from_vk(e, GraphicsError::SubmissionFailed))?;

        Ok(draws)
    }

    fn submit(&mut self) -> GraphicsResult<()> {
        let mut wait_semaphores = vec![self.image_available];
        wait_semaphores.extend(self.retired.take_for_submit());
        let wait_stages =
            vec![vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT; wait_semaphores.len()];
        let command_buffers = [self.command_buffer];
        let signal_semaphores = [self.render_finished];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.context.device().queue_submit(
                self.context.graphics_queue(),
                &[submit_info],
                vk::Fence::null(),
            )
        }
        .map_err(|e| GraphicsError::from_vk(e, GraphicsError::SubmissionFailed))
    }

    fn replace_image_available(&mut self) -> GraphicsResult<()> {
        let fresh = self.context.create_semaphore()?;
        let signalled = std::mem::replace(&mut self.image_available, fresh);
        self.retired.retire(signalled);
        Ok(())
    }

    fn destroy_semaphores(&self, semaphores: Vec<vk::Semaphore>) {
        let device = self.context.device();
        for semaphore in semaphores {
            unsafe { device.destroy_semaphore(semaphore, None) };
        }
    }
}

impl Drop for FrameOrchestrator {
    fn drop(&mut self) {
        if let Err(e) = self.context.wait_idle() {
            log::warn!("Device wait failed while dropping frame state: {}", e);
        }
        // Semaphores never waited on may still have a pending signal; at
        // shutdown the device is idle and that is accepted.
        let retired = self.retired.take_all();
        self.destroy_semaphores(retired);

        let device = self.context.device();
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            self.context.free_command_buffer(self.command_buffer);
        }
    }
}
