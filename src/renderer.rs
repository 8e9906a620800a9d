// =============================================================================
// RENDERER - Owns every GPU object and drives one frame at a time
// =============================================================================
//
// FRAME FLOW:
// 1. begin_frame   wait for the previous frame, acquire a swapchain image
// 2. record_frame  barrier, clear, full-screen triangle, overlay, barrier
// 3. end_frame     submit to the graphics queue, present on the present queue
//
// An out-of-date or suboptimal swapchain is reported as NeedsRecreate; the
// caller decides when to call recreate_swapchain.

use ash::vk;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::backend::barrier::{transition_image, Access};
use crate::backend::{
    CommandBuffer, CommandPools, ContextDesc, DiagnosticSink, DiagnosticsDesc, FrameSync, GpuContext, GpuError,
    GpuResult, Pipeline, PipelineDesc, PipelineTarget, PresentStatus, PresentationTarget, QueueRole, Swapchain,
};

/// Everything needed to bring the renderer up
#[derive(Debug, Clone)]
pub struct RendererParams {
    pub app_name: String,
    pub diagnostics: DiagnosticsDesc,
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
    pub clear_color: [f32; 4],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    /// The swapchain is stale; call `recreate_swapchain` before the next frame
    NeedsRecreate,
}

/// An acquired swapchain image, valid until `end_frame`
#[derive(Debug)]
pub struct Frame {
    pub image_index: u32,
    pub suboptimal: bool,
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub extent: vk::Extent2D,
}

/// IMPORTANT: Field order is teardown order. Children go first, the context last.
pub struct Renderer {
    frame_sync: FrameSync,
    command_buffer: CommandBuffer,
    pipeline: Pipeline,
    command_pools: CommandPools,
    swapchain: Option<Swapchain>,
    pipeline_format: vk::Format,
    vertex_shader: PathBuf,
    fragment_shader: PathBuf,
    clear_color: [f32; 4],
    context: Arc<GpuContext>,
}

/// Relative shader paths are taken from the crate root
pub fn resolve(path: &Path) -> PathBuf {
    if path.is_relative() {
        Path::new(env!("CARGO_MANIFEST_DIR")).join(path)
    } else {
        path.to_path_buf()
    }
}

/// Stale-swapchain results become NeedsRecreate; everything else fatal propagates
pub fn fold_outcome(acquired_suboptimal: bool, presented: GpuResult<PresentStatus>) -> GpuResult<FrameOutcome> {
    match presented {
        Ok(PresentStatus::Optimal) if !acquired_suboptimal => Ok(FrameOutcome::Presented),
        Ok(_) => Ok(FrameOutcome::NeedsRecreate),
        Err(e) if e.is_out_of_date() => Ok(FrameOutcome::NeedsRecreate),
        Err(e) => Err(e),
    }
}

impl Renderer {
    pub fn new(params: &RendererParams, target: &dyn PresentationTarget) -> GpuResult<Self> {
        let context = GpuContext::new(
            &ContextDesc {
                app_name: params.app_name.clone(),
                diagnostics: params.diagnostics,
            },
            target,
        )?;

        let swapchain = Swapchain::new(Arc::clone(&context), target.framebuffer_size())?;
        let command_pools = CommandPools::new(Arc::clone(&context))?;
        let command_buffer = command_pools.allocate(QueueRole::Graphics, vk::CommandBufferLevel::PRIMARY)?;

        let vertex_shader = resolve(&params.vertex_shader);
        let fragment_shader = resolve(&params.fragment_shader);
        let pipeline_format = swapchain.format.format;
        let pipeline = Self::create_pipeline(&context, &vertex_shader, &fragment_shader, pipeline_format)?;

        let frame_sync = FrameSync::new(Arc::clone(&context))?;

        log::info!("Renderer ready");
        Ok(Self {
            frame_sync,
            command_buffer,
            pipeline,
            command_pools,
            swapchain: Some(swapchain),
            pipeline_format,
            vertex_shader,
            fragment_shader,
            clear_color: params.clear_color,
            context,
        })
    }

    fn create_pipeline(
        context: &Arc<GpuContext>,
        vertex_shader: &Path,
        fragment_shader: &Path,
        format: vk::Format,
    ) -> GpuResult<Pipeline> {
        let color_formats = [format];
        Pipeline::new(
            Arc::clone(context),
            &PipelineDesc {
                vertex_shader,
                fragment_shader,
                target: PipelineTarget::DynamicRendering {
                    color_formats: &color_formats,
                },
            },
        )
    }

    pub fn context(&self) -> &Arc<GpuContext> {
        &self.context
    }

    /// Message counters of the validation layer (all zero when it is off)
    pub fn diagnostics(&self) -> Arc<DiagnosticSink> {
        self.context.diagnostics()
    }

    // =========================================================================
    // FRAME LOOP
    // =========================================================================

    /// Wait for the previous frame and acquire the next image
    pub fn begin_frame(&mut self) -> GpuResult<Frame> {
        // A failed recreation leaves no swapchain; ask for another attempt
        let swapchain = self.swapchain.as_ref().ok_or(GpuError::OutOfDate {
            operation: "begin_frame",
        })?;

        let acquired = self.frame_sync.begin_frame(swapchain, u64::MAX)?;
        let index = acquired.index as usize;

        Ok(Frame {
            image_index: acquired.index,
            suboptimal: acquired.suboptimal,
            image: swapchain.images[index],
            view: swapchain.image_views[index],
            extent: swapchain.extent,
        })
    }

    /// Record the frame's commands. `overlay` runs inside the rendering block,
    /// after the triangle.
    pub fn record_frame<F>(&self, frame: &Frame, overlay: F) -> GpuResult<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let device = &self.context.device;
        let cmd = self.command_buffer.expect_role(QueueRole::Graphics)?;

        let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .map_err(GpuError::context("vkResetCommandBuffer"))?;
            device
                .begin_command_buffer(cmd, &begin_info)
                .map_err(GpuError::context("vkBeginCommandBuffer"))?;
        }

        transition_image(
            device,
            cmd,
            frame.image,
            (vk::ImageLayout::UNDEFINED, Access::NONE),
            (vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, Access::WRITE),
        )?;

        let color_attachments = [vk::RenderingAttachmentInfo::builder()
            .image_view(frame.view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            })
            .build()];

        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: frame.extent,
        };
        let rendering_info = vk::RenderingInfo::builder()
            .render_area(render_area)
            .layer_count(1)
            .color_attachments(&color_attachments);

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: frame.extent.width as f32,
            height: frame.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };

        unsafe {
            device.cmd_begin_rendering(cmd, &rendering_info);
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline.pipeline);
            device.cmd_set_viewport(cmd, 0, &[viewport]);
            device.cmd_set_scissor(cmd, 0, &[render_area]);
            device.cmd_draw(cmd, 3, 1, 0, 0);
        }

        overlay(device, cmd);

        unsafe { device.cmd_end_rendering(cmd) };

        transition_image(
            device,
            cmd,
            frame.image,
            (vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, Access::READ_WRITE),
            (vk::ImageLayout::PRESENT_SRC_KHR, Access::NONE),
        )?;

        unsafe { device.end_command_buffer(cmd) }.map_err(GpuError::context("vkEndCommandBuffer"))
    }

    /// Submit and present a recorded frame
    pub fn end_frame(&mut self, frame: Frame) -> GpuResult<FrameOutcome> {
        let swapchain = self.swapchain.as_ref().ok_or(GpuError::OutOfDate { operation: "end_frame" })?;

        let presented = self.frame_sync.end_frame(swapchain, frame.image_index, &self.command_buffer);
        fold_outcome(frame.suboptimal, presented)
    }

    /// begin_frame + record_frame + end_frame
    pub fn render_frame<F>(&mut self, overlay: F) -> GpuResult<FrameOutcome>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let frame = match self.begin_frame() {
            Ok(frame) => frame,
            Err(e) if e.is_out_of_date() => return Ok(FrameOutcome::NeedsRecreate),
            Err(e) => return Err(e),
        };
        self.record_frame(&frame, overlay)?;
        self.end_frame(frame)
    }

    // =========================================================================
    // SWAPCHAIN RECREATION
    // =========================================================================

    /// Rebuild the swapchain for a new drawable size. Zero-area sizes
    /// (minimised windows) are ignored.
    pub fn recreate_swapchain(&mut self, desired: vk::Extent2D) -> GpuResult<()> {
        if desired.width == 0 || desired.height == 0 {
            log::debug!("Skipping swapchain recreation for {}x{}", desired.width, desired.height);
            return Ok(());
        }

        // Wait for GPU to finish all work before destroying resources
        self.context.wait_idle()?;

        let swapchain = match self.swapchain.take() {
            Some(old) => old.recreate(desired)?,
            None => Swapchain::new(Arc::clone(&self.context), desired)?,
        };

        let format = swapchain.format.format;
        self.swapchain = Some(swapchain);

        if format != self.pipeline_format {
            log::info!("Swapchain format changed {:?} -> {:?}, rebuilding pipeline", self.pipeline_format, format);
            self.pipeline = Self::create_pipeline(&self.context, &self.vertex_shader, &self.fragment_shader, format)?;
            self.pipeline_format = format;
        }

        Ok(())
    }

    // =========================================================================
    // CLEANUP
    // =========================================================================

    /// Wait for the device and tear everything down
    pub fn shutdown(self) -> GpuResult<()> {
        log::info!("Shutting down renderer...");
        let idle = self.context.wait_idle();
        drop(self);
        idle
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.context.wait_idle() {
            log::error!("{}", e);
        }
        self.command_pools.free(&self.command_buffer);
        log::info!("Renderer destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_shader_paths_resolve_against_crate_root() {
        let resolved = resolve(Path::new("shaders/triangle.vert.spv"));
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("shaders/triangle.vert.spv"));
        assert!(resolved.starts_with(env!("CARGO_MANIFEST_DIR")));
    }

    #[test]
    fn optimal_present_after_clean_acquire_is_presented() {
        let outcome = fold_outcome(false, Ok(PresentStatus::Optimal)).unwrap();
        assert_eq!(outcome, FrameOutcome::Presented);
    }

    #[test]
    fn suboptimal_acquire_or_present_needs_recreate() {
        assert_eq!(
            fold_outcome(true, Ok(PresentStatus::Optimal)).unwrap(),
            FrameOutcome::NeedsRecreate
        );
        assert_eq!(
            fold_outcome(false, Ok(PresentStatus::Suboptimal)).unwrap(),
            FrameOutcome::NeedsRecreate
        );
    }

    #[test]
    fn out_of_date_present_needs_recreate() {
        let stale = Err(GpuError::OutOfDate {
            operation: "vkQueuePresentKHR",
        });
        assert_eq!(fold_outcome(false, stale).unwrap(), FrameOutcome::NeedsRecreate);
    }

    #[test]
    fn fatal_present_errors_propagate() {
        let lost = Err(GpuError::Sync {
            operation: "vkQueuePresentKHR",
            result: vk::Result::ERROR_DEVICE_LOST,
        });
        match fold_outcome(false, lost) {
            Err(GpuError::Sync { result, .. }) => assert_eq!(result, vk::Result::ERROR_DEVICE_LOST),
            other => panic!("expected the device-lost error, got {:?}", other),
        }
    }

    #[test]
    fn absolute_shader_paths_are_kept() {
        let path = std::env::temp_dir().join("custom.spv");
        assert_eq!(resolve(&path), path);
    }
}
