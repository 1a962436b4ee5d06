//! Error types for the canvas engine.

use ash::vk;
use thiserror::Error;

/// Errors produced by device setup, resource creation and frame submission.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphicsError {
    #[error("initialization failed: {0}")]
    InitializationFailed(String),
    #[error("failed to create surface: {0}")]
    SurfaceCreationFailed(String),
    #[error("no suitable GPU found: {0}")]
    NoSuitableAdapter(String),
    #[error("no queue family supports {0}")]
    NoQueueFamily(&'static str),
    #[error("failed to create swapchain: {0}")]
    SwapchainCreationFailed(String),
    #[error("failed to create buffer: {0}")]
    BufferCreationFailed(String),
    #[error("failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("failed to create pipeline: {0}")]
    PipelineCreationFailed(String),
    #[error("shader compilation failed: {0}")]
    ShaderCompilationFailed(String),
    #[error("command submission failed: {0}")]
    SubmissionFailed(String),
    #[error("failed to present: {0}")]
    PresentFailed(String),
    #[error("invalid layer data: {0}")]
    InvalidLayerData(String),
    #[error("resource handle space exhausted")]
    HandleSpaceExhausted,
    #[error("surface outdated, needs reconfiguration")]
    SurfaceOutdated,
    #[error("surface lost")]
    SurfaceLost,
    #[error("out of GPU memory")]
    OutOfMemory,
    #[error("GPU device lost")]
    DeviceLost,
}

pub type GraphicsResult<T> = Result<T, GraphicsError>;

impl GraphicsError {
    /// Map a raw Vulkan result into an error, keeping the dedicated variants
    /// for conditions callers may want to match on.
    pub fn from_vk(result: vk::Result, context: impl FnOnce(String) -> GraphicsError) -> Self {
        match result {
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost,
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
                Self::OutOfMemory
            }
            vk::Result::ERROR_SURFACE_LOST_KHR => Self::SurfaceLost,
            vk::Result::ERROR_OUT_OF_DATE_KHR => Self::SurfaceOutdated,
            other => context(format!("{other:?}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GraphicsError::OutOfMemory;
        assert_eq!(err.to_string(), "out of GPU memory");

        let err = GraphicsError::NoQueueFamily("presentation");
        assert_eq!(err.to_string(), "no queue family supports presentation");

        let err = GraphicsError::InitializationFailed("no Vulkan loader".to_string());
        assert_eq!(err.to_string(), "initialization failed: no Vulkan loader");
    }

    #[test]
    fn test_from_vk_keeps_dedicated_variants() {
        let err = GraphicsError::from_vk(
            vk::Result::ERROR_DEVICE_LOST,
            GraphicsError::SubmissionFailed,
        );
        assert_eq!(err, GraphicsError::DeviceLost);

        let err = GraphicsError::from_vk(
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
            GraphicsError::BufferCreationFailed,
        );
        assert_eq!(err, GraphicsError::OutOfMemory);

        let err = GraphicsError::from_vk(
            vk::Result::ERROR_INITIALIZATION_FAILED,
            GraphicsError::SubmissionFailed,
        );
        assert_eq!(
            err,
            GraphicsError::SubmissionFailed("ERROR_INITIALIZATION_FAILED".to_string())
        );
    }
}
