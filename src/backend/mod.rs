// Backend module - Vulkan abstraction layer
//
// Design: Thin wrapper around ash; every object that owns Vulkan handles holds an
// Arc<GpuContext> and destroys them in Drop

pub mod barrier;
pub mod capability;
pub mod command;
pub mod device;
pub mod diagnostics;
pub mod error;
pub mod pipeline;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use command::{CommandBuffer, CommandPools, QueueRole};
pub use device::{ContextDesc, GpuContext};
pub use diagnostics::{DiagnosticSink, DiagnosticsDesc, MessageSeverity, ShaderInstrumentation};
pub use error::{GpuError, GpuResult};
pub use pipeline::{Pipeline, PipelineDesc, PipelineTarget};
pub use surface::{HeadlessTarget, PresentationTarget, WindowTarget};
pub use swapchain::{AcquiredImage, Swapchain};
pub use sync::{FrameSync, PresentStatus};
