//! Command pool and one-shot command buffers.

use ash::vk;

use super::DeviceContext;
use crate::error::{GraphicsError, GraphicsResult};

/// Create a resettable command pool on the graphics family.
pub fn create_command_pool(
    device: &ash::Device,
    queue_family_index: u32,
) -> GraphicsResult<vk::CommandPool> {
    let create_info = vk::CommandPoolCreateInfo::default()
        .queue_family_index(queue_family_index)
        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

    unsafe { device.create_command_pool(&create_info, None) }.map_err(|e| {
        GraphicsError::InitializationFailed(format!("Failed to create command pool: {:?}", e))
    })
}

impl DeviceContext {
    /// Allocate one primary command buffer from the device pool.
    pub fn allocate_command_buffer(&self) -> GraphicsResult<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffers = unsafe { self.device().allocate_command_buffers(&alloc_info) }.map_err(
            |e| GraphicsError::from_vk(e, GraphicsError::SubmissionFailed),
        )?;

        buffers.into_iter().next().ok_or_else(|| {
            GraphicsError::SubmissionFailed("Driver returned no command buffer".to_string())
        })
    }

    /// Return a command buffer to the device pool.
    ///
    /// # Safety
    ///
    /// `cmd` must come from [`Self::allocate_command_buffer`] and must not be pending.
    pub unsafe fn free_command_buffer(&self, cmd: vk::CommandBuffer) {
        unsafe { self.device().free_command_buffers(self.command_pool, &[cmd]) };
    }

    /// Allocate a command buffer and begin it for a single submission.
    pub fn begin_one_shot(&self) -> GraphicsResult<vk::CommandBuffer> {
        let cmd = self.allocate_command_buffer()?;

        let begin_info =
            vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        if let Err(e) = unsafe { self.device().begin_command_buffer(cmd, &begin_info) } {
            unsafe { self.free_command_buffer(cmd) };
            return Err(GraphicsError::from_vk(e, GraphicsError::SubmissionFailed));
        }

        Ok(cmd)
    }

    /// End `cmd`, submit it to the graphics queue and block until it completes.
    ///
    /// The command buffer is freed whether or not submission succeeds.
    pub fn submit_one_shot(&self, cmd: vk::CommandBuffer) -> GraphicsResult<()> {
        let result = self.submit_and_wait(cmd);
        unsafe { self.free_command_buffer(cmd) };
        result
    }

    fn submit_and_wait(&self, cmd: vk::CommandBuffer) -> GraphicsResult<()> {
        let device = self.device();
        unsafe {
            device
                .end_command_buffer(cmd)
                .map_err(|e| GraphicsError::from_vk(e, GraphicsError::SubmissionFailed))?;

            let command_buffers = [cmd];
            let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);

            device
                .queue_submit(self.graphics_queue, &[submit_info], vk::Fence::null())
                .map_err(|e| GraphicsError::from_vk(e, GraphicsError::SubmissionFailed))?;

            device
                .queue_wait_idle(self.graphics_queue)
                .map_err(|e| GraphicsError::from_vk(e, GraphicsError::SubmissionFailed))?;
        }
        Ok(())
    }

    /// Record commands with `record` and run them to completion.
    pub fn immediate_submit<F>(&self, record: F) -> GraphicsResult<()>
    where
        F: FnOnce(vk::CommandBuffer),
    {
        let cmd = self.begin_one_shot()?;
        record(cmd);
        self.submit_one_shot(cmd)
    }
}
