// Graphics pipeline creation
//
// One fixed-function configuration: a vertex + fragment pair with no vertex
// input, drawn as a triangle list into one or more color attachments with
// alpha-over blending. Viewport and scissor are dynamic so the pipeline
// survives swapchain resizes.

use ash::vk;
use std::path::Path;
use std::sync::Arc;

use super::error::{GpuError, GpuResult};
use super::shader::ShaderModule;
use super::GpuContext;

const ENTRY_POINT: &std::ffi::CStr = c"main";

/// What the pipeline renders into
#[derive(Debug, Clone, Copy)]
pub enum PipelineTarget<'a> {
    /// vkCmdBeginRendering with these color attachment formats
    DynamicRendering { color_formats: &'a [vk::Format] },
    /// A classic render pass; blending is set up for a single color attachment
    RenderPass { render_pass: vk::RenderPass, subpass: u32 },
}

impl PipelineTarget<'_> {
    fn color_attachment_count(&self) -> usize {
        match self {
            PipelineTarget::DynamicRendering { color_formats } => color_formats.len(),
            PipelineTarget::RenderPass { .. } => 1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineDesc<'a> {
    pub vertex_shader: &'a Path,
    pub fragment_shader: &'a Path,
    pub target: PipelineTarget<'a>,
}

pub struct Pipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    context: Arc<GpuContext>,
}

/// src-alpha / one-minus-src-alpha for color, alpha passed through
pub fn alpha_over_blend() -> vk::PipelineColorBlendAttachmentState {
    vk::PipelineColorBlendAttachmentState::builder()
        .blend_enable(true)
        .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
        .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
        .color_blend_op(vk::BlendOp::ADD)
        .src_alpha_blend_factor(vk::BlendFactor::ONE)
        .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
        .alpha_blend_op(vk::BlendOp::ADD)
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .build()
}

impl Pipeline {
    pub fn new(context: Arc<GpuContext>, desc: &PipelineDesc) -> GpuResult<Self> {
        if let PipelineTarget::DynamicRendering { color_formats: [] } = desc.target {
            return Err(GpuError::pipeline(
                "create graphics pipeline",
                "dynamic rendering needs at least one color attachment format",
            ));
        }

        let device = &context.device;

        // Guards; destroyed once the pipeline call has returned, whatever the outcome
        let vertex = ShaderModule::from_file(device, desc.vertex_shader)?;
        let fragment = ShaderModule::from_file(device, desc.fragment_shader)?;

        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex.module)
                .name(ENTRY_POINT)
                .build(),
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment.module)
                .name(ENTRY_POINT)
                .build(),
        ];

        // Vertices come from gl_VertexIndex
        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder();

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let color_blend_attachments = vec![alpha_over_blend(); desc.target.color_attachment_count()];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let layout_info = vk::PipelineLayoutCreateInfo::builder();
        let layout = unsafe { device.create_pipeline_layout(&layout_info, None) }
            .map_err(|e| GpuError::pipeline("vkCreatePipelineLayout", e))?;

        let color_formats = match desc.target {
            PipelineTarget::DynamicRendering { color_formats } => color_formats,
            PipelineTarget::RenderPass { .. } => &[],
        };
        let mut rendering_info = vk::PipelineRenderingCreateInfo::builder().color_attachment_formats(color_formats);

        let mut pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout);

        if !color_formats.is_empty() {
            pipeline_info = pipeline_info.push_next(&mut rendering_info);
        }
        if let PipelineTarget::RenderPass { render_pass, subpass } = desc.target {
            pipeline_info = pipeline_info.render_pass(render_pass).subpass(subpass);
        }

        let result = unsafe {
            device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info.build()], None)
        };

        let pipeline = match result {
            Ok(pipelines) => pipelines[0],
            Err((_, e)) => {
                unsafe { device.destroy_pipeline_layout(layout, None) };
                return Err(GpuError::pipeline("vkCreateGraphicsPipelines", e));
            }
        };

        log::info!(
            "Graphics pipeline created ({}, {})",
            desc.vertex_shader.display(),
            desc.fragment_shader.display()
        );

        drop(vertex);
        drop(fragment);

        Ok(Self {
            pipeline,
            layout,
            context,
        })
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.context.device.destroy_pipeline(self.pipeline, None);
            self.context.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blend_is_alpha_over() {
        let blend = alpha_over_blend();
        assert_eq!(blend.blend_enable, vk::TRUE);
        assert_eq!(blend.src_color_blend_factor, vk::BlendFactor::SRC_ALPHA);
        assert_eq!(blend.dst_color_blend_factor, vk::BlendFactor::ONE_MINUS_SRC_ALPHA);
        assert_eq!(blend.src_alpha_blend_factor, vk::BlendFactor::ONE);
        assert_eq!(blend.dst_alpha_blend_factor, vk::BlendFactor::ZERO);
        assert_eq!(blend.color_write_mask, vk::ColorComponentFlags::RGBA);
    }

    #[test]
    fn one_blend_state_per_attachment() {
        let formats = [vk::Format::B8G8R8A8_SRGB, vk::Format::R16G16B16A16_SFLOAT];
        let target = PipelineTarget::DynamicRendering { color_formats: &formats };
        assert_eq!(target.color_attachment_count(), 2);

        let target = PipelineTarget::RenderPass {
            render_pass: vk::RenderPass::null(),
            subpass: 0,
        };
        assert_eq!(target.color_attachment_count(), 1);
    }
}
