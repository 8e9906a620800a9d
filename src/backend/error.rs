// Error taxonomy for the GPU backend
//
// Every variant names the operation that failed so a fatal log line is enough
// to locate the problem. Only `OutOfDate` is recoverable (recreate the swapchain).

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

use super::command::QueueRole;

#[derive(Debug, Error)]
pub enum GpuError {
    /// No adapter, queue family, extension or surface support fits our needs
    #[error("capability query failed ({operation}): {reason}")]
    Capability {
        operation: &'static str,
        reason: String,
    },

    /// The Vulkan loader could not be found or opened
    #[error("failed to load the Vulkan library: {0}")]
    Loading(#[from] ash::LoadingError),

    /// Instance, messenger, surface, device or pool creation failed
    #[error("{operation} failed: {result}")]
    Context {
        operation: &'static str,
        result: vk::Result,
    },

    /// Surface negotiation, swapchain or image-view creation failed
    #[error("{operation} failed: {result}")]
    Swapchain {
        operation: &'static str,
        result: vk::Result,
    },

    /// Shader module, layout or pipeline creation failed
    #[error("{operation} failed: {reason}")]
    Pipeline {
        operation: &'static str,
        reason: String,
    },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Fence/semaphore creation, wait, submit or present failed
    #[error("{operation} failed: {result}")]
    Sync {
        operation: &'static str,
        result: vk::Result,
    },

    /// The swapchain no longer matches the surface and must be recreated
    #[error("swapchain out of date during {operation}")]
    OutOfDate { operation: &'static str },

    #[error("command buffer allocated for the {allocated:?} role cannot be used for {requested:?}")]
    RoleMismatch {
        allocated: QueueRole,
        requested: QueueRole,
    },

    #[error("no barrier mapping for image layout transition {from:?} -> {to:?}")]
    UnsupportedTransition {
        from: vk::ImageLayout,
        to: vk::ImageLayout,
    },
}

pub type GpuResult<T> = Result<T, GpuError>;

impl GpuError {
    /// True for the one class of per-frame failures the caller recovers from
    pub fn is_out_of_date(&self) -> bool {
        matches!(self, GpuError::OutOfDate { .. })
    }

    pub(crate) fn context(operation: &'static str) -> impl FnOnce(vk::Result) -> GpuError {
        move |result| GpuError::Context { operation, result }
    }

    pub(crate) fn swapchain(operation: &'static str) -> impl FnOnce(vk::Result) -> GpuError {
        move |result| GpuError::Swapchain { operation, result }
    }

    pub(crate) fn sync(operation: &'static str) -> impl FnOnce(vk::Result) -> GpuError {
        move |result| GpuError::Sync { operation, result }
    }

    pub(crate) fn capability(operation: &'static str, reason: impl Into<String>) -> GpuError {
        GpuError::Capability {
            operation,
            reason: reason.into(),
        }
    }

    pub(crate) fn pipeline(operation: &'static str, reason: impl ToString) -> GpuError {
        GpuError::Pipeline {
            operation,
            reason: reason.to_string(),
        }
    }
}
