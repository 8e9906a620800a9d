// Frame synchronization
//
// A single frame in flight:
//   image_available  acquire -> submit (GPU-GPU)
//   render_finished  submit  -> present (GPU-GPU)
//   in_flight_fence  submit  -> next begin_frame (GPU-CPU)

use ash::vk;
use std::sync::Arc;

use super::command::{CommandBuffer, QueueRole};
use super::error::{GpuError, GpuResult};
use super::swapchain::{AcquiredImage, Swapchain};
use super::GpuContext;

/// Stage at which submitted work waits for the acquired image
pub const ACQUIRE_WAIT_STAGE: vk::PipelineStageFlags = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Recording { image_index: u32 },
}

impl FrameState {
    /// Fails unless a frame was begun for exactly `image_index`
    pub fn expect_recording(self, image_index: u32) -> GpuResult<()> {
        match self {
            FrameState::Recording { image_index: acquired } if acquired == image_index => Ok(()),
            FrameState::Recording { .. } => Err(GpuError::Sync {
                operation: "end_frame (image index does not match the acquired image)",
                result: vk::Result::ERROR_UNKNOWN,
            }),
            FrameState::Idle => Err(GpuError::Sync {
                operation: "end_frame (no frame in progress)",
                result: vk::Result::NOT_READY,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentStatus {
    Optimal,
    /// Presented, but the swapchain no longer matches the surface exactly
    Suboptimal,
}

impl From<bool> for PresentStatus {
    /// From the suboptimal flag returned by vkQueuePresentKHR
    fn from(suboptimal: bool) -> Self {
        if suboptimal {
            PresentStatus::Suboptimal
        } else {
            PresentStatus::Optimal
        }
    }
}

/// Everything end_frame checks before it touches a queue
pub fn validate_submission(
    state: FrameState,
    image_index: u32,
    command_buffer: &CommandBuffer,
) -> GpuResult<vk::CommandBuffer> {
    state.expect_recording(image_index)?;
    command_buffer.expect_role(QueueRole::Graphics)
}

pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
    state: FrameState,
    context: Arc<GpuContext>,
}

impl FrameSync {
    pub fn new(context: Arc<GpuContext>) -> GpuResult<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        // Start signaled so the first begin_frame doesn't wait forever
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        // Null handles are ignored by vkDestroy*, so Drop can clean up a partial set
        let mut this = Self {
            image_available: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            in_flight_fence: vk::Fence::null(),
            state: FrameState::Idle,
            context,
        };

        let device = &this.context.device;
        unsafe {
            this.image_available = device
                .create_semaphore(&semaphore_info, None)
                .map_err(GpuError::sync("vkCreateSemaphore"))?;
            this.render_finished = device
                .create_semaphore(&semaphore_info, None)
                .map_err(GpuError::sync("vkCreateSemaphore"))?;
            this.in_flight_fence = device
                .create_fence(&fence_info, None)
                .map_err(GpuError::sync("vkCreateFence"))?;
        }

        Ok(this)
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Wait for the previous frame, then acquire the next swapchain image.
    /// The fence is only reset once an image has actually been acquired.
    pub fn begin_frame(&mut self, swapchain: &Swapchain, timeout: u64) -> GpuResult<AcquiredImage> {
        let device = &self.context.device;
        let fences = [self.in_flight_fence];

        unsafe { device.wait_for_fences(&fences, true, timeout) }.map_err(GpuError::sync("vkWaitForFences"))?;

        let acquired = swapchain.acquire_next_image(u64::MAX, self.image_available)?;

        unsafe { device.reset_fences(&fences) }.map_err(GpuError::sync("vkResetFences"))?;

        self.state = FrameState::Recording {
            image_index: acquired.index,
        };
        Ok(acquired)
    }

    /// Submit the recorded graphics work and present the acquired image
    pub fn end_frame(
        &mut self,
        swapchain: &Swapchain,
        image_index: u32,
        command_buffer: &CommandBuffer,
    ) -> GpuResult<PresentStatus> {
        let cmd = validate_submission(self.state, image_index, command_buffer)?;

        let wait_semaphores = [self.image_available];
        let wait_stages = [ACQUIRE_WAIT_STAGE];
        let signal_semaphores = [self.render_finished];
        let command_buffers = [cmd];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        unsafe {
            self.context.device.queue_submit(
                self.context.queue(QueueRole::Graphics),
                &[submit_info],
                self.in_flight_fence,
            )
        }
        .map_err(GpuError::sync("vkQueueSubmit"))?;

        self.state = FrameState::Idle;

        let suboptimal = swapchain.present(
            self.context.queue(QueueRole::Present),
            image_index,
            &signal_semaphores,
        )?;

        Ok(PresentStatus::from(suboptimal))
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        let device = &self.context.device;
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight_fence, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn buffer(role: QueueRole) -> CommandBuffer {
        CommandBuffer::new(role, vk::CommandBuffer::from_raw(0x1))
    }

    #[test]
    fn submission_needs_a_frame_in_progress() {
        let err = validate_submission(FrameState::Idle, 0, &buffer(QueueRole::Graphics)).unwrap_err();
        assert!(matches!(err, GpuError::Sync { .. }));
    }

    #[test]
    fn submission_needs_the_acquired_image_index() {
        let state = FrameState::Recording { image_index: 1 };
        let err = validate_submission(state, 2, &buffer(QueueRole::Graphics)).unwrap_err();
        assert!(matches!(err, GpuError::Sync { .. }));
    }

    #[test]
    fn submission_needs_a_graphics_buffer() {
        let state = FrameState::Recording { image_index: 0 };
        match validate_submission(state, 0, &buffer(QueueRole::Transfer)) {
            Err(GpuError::RoleMismatch { allocated, requested }) => {
                assert_eq!(allocated, QueueRole::Transfer);
                assert_eq!(requested, QueueRole::Graphics);
            }
            other => panic!("expected a role mismatch, got {:?}", other),
        }
    }

    #[test]
    fn matching_graphics_submission_passes() {
        let state = FrameState::Recording { image_index: 2 };
        let cmd = validate_submission(state, 2, &buffer(QueueRole::Graphics)).unwrap();
        assert_eq!(cmd.as_raw(), 0x1);
    }

    #[test]
    fn present_status_follows_suboptimal_flag() {
        assert_eq!(PresentStatus::from(false), PresentStatus::Optimal);
        assert_eq!(PresentStatus::from(true), PresentStatus::Suboptimal);
    }
}
