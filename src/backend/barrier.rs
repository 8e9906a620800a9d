// Image layout transitions for swapchain images
//
// Only the two transitions a frame needs are mapped:
//   UNDEFINED -> COLOR_ATTACHMENT_OPTIMAL      (before rendering)
//   COLOR_ATTACHMENT_OPTIMAL -> PRESENT_SRC_KHR (before presenting)

use ash::vk;

use super::error::{GpuError, GpuResult};

/// How an image is touched on one side of a barrier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Access {
    pub read: bool,
    pub write: bool,
}

impl Access {
    pub const NONE: Access = Access { read: false, write: false };
    pub const READ: Access = Access { read: true, write: false };
    pub const WRITE: Access = Access { read: false, write: true };
    pub const READ_WRITE: Access = Access { read: true, write: true };

    fn color_attachment_mask(self) -> vk::AccessFlags {
        let mut mask = vk::AccessFlags::empty();
        if self.read {
            mask |= vk::AccessFlags::COLOR_ATTACHMENT_READ;
        }
        if self.write {
            mask |= vk::AccessFlags::COLOR_ATTACHMENT_WRITE;
        }
        mask
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierParams {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub aspect: vk::ImageAspectFlags,
}

/// Stage and access masks for a supported transition, `None` otherwise
pub fn barrier_params(
    old_layout: vk::ImageLayout,
    src: Access,
    new_layout: vk::ImageLayout,
    dst: Access,
) -> Option<BarrierParams> {
    match (old_layout, new_layout) {
        // Source stage matches the acquire semaphore's wait stage so the
        // transition is ordered after the presentation engine releases the image
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL) => Some(BarrierParams {
            src_access: vk::AccessFlags::empty(),
            dst_access: dst.color_attachment_mask(),
            src_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            aspect: vk::ImageAspectFlags::COLOR,
        }),
        (vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, vk::ImageLayout::PRESENT_SRC_KHR) => Some(BarrierParams {
            src_access: src.color_attachment_mask(),
            dst_access: vk::AccessFlags::empty(),
            src_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_stage: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            aspect: vk::ImageAspectFlags::COLOR,
        }),
        _ => None,
    }
}

/// Record a layout transition of the first mip/layer of `image`
pub fn transition_image(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    (old_layout, src): (vk::ImageLayout, Access),
    (new_layout, dst): (vk::ImageLayout, Access),
) -> GpuResult<()> {
    let params = barrier_params(old_layout, src, new_layout, dst).ok_or(GpuError::UnsupportedTransition {
        from: old_layout,
        to: new_layout,
    })?;

    let barrier = vk::ImageMemoryBarrier::builder()
        .src_access_mask(params.src_access)
        .dst_access_mask(params.dst_access)
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: params.aspect,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        })
        .build();

    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            params.src_stage,
            params.dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undefined_to_color_attachment() {
        let params = barrier_params(
            vk::ImageLayout::UNDEFINED,
            Access::NONE,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            Access::WRITE,
        )
        .unwrap();

        assert_eq!(params.src_stage, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(params.dst_stage, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(params.src_access, vk::AccessFlags::empty());
        assert_eq!(params.dst_access, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
        assert_eq!(params.aspect, vk::ImageAspectFlags::COLOR);
    }

    #[test]
    fn acquire_transition_waits_at_the_semaphore_stage() {
        let params = barrier_params(
            vk::ImageLayout::UNDEFINED,
            Access::NONE,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            Access::WRITE,
        )
        .unwrap();

        assert!(params.src_stage.contains(crate::backend::sync::ACQUIRE_WAIT_STAGE));
    }

    #[test]
    fn color_attachment_to_present() {
        let params = barrier_params(
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            Access::READ_WRITE,
            vk::ImageLayout::PRESENT_SRC_KHR,
            Access::NONE,
        )
        .unwrap();

        assert_eq!(params.src_stage, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(params.dst_stage, vk::PipelineStageFlags::BOTTOM_OF_PIPE);
        assert_eq!(
            params.src_access,
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        );
        assert_eq!(params.dst_access, vk::AccessFlags::empty());
    }

    #[test]
    fn other_transitions_are_unmapped() {
        assert_eq!(
            barrier_params(
                vk::ImageLayout::UNDEFINED,
                Access::NONE,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                Access::WRITE,
            ),
            None
        );
        assert_eq!(
            barrier_params(
                vk::ImageLayout::PRESENT_SRC_KHR,
                Access::READ,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                Access::WRITE,
            ),
            None
        );
    }
}
