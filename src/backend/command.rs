// Command pools - one per queue role
//
// Buffers remember the role they were allocated for, so a buffer can only be
// returned to the pool it came from.

use ash::vk;
use std::sync::Arc;

use super::error::{GpuError, GpuResult};
use super::GpuContext;

/// Logical purpose assigned to a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueRole {
    Graphics,
    Compute,
    Transfer,
    Present,
}

impl QueueRole {
    pub const ALL: [QueueRole; 4] = [
        QueueRole::Graphics,
        QueueRole::Compute,
        QueueRole::Transfer,
        QueueRole::Present,
    ];

    pub(crate) fn slot(self) -> usize {
        match self {
            QueueRole::Graphics => 0,
            QueueRole::Compute => 1,
            QueueRole::Transfer => 2,
            QueueRole::Present => 3,
        }
    }
}

/// A command buffer tagged with the role of the pool it was allocated from
#[derive(Debug)]
pub struct CommandBuffer {
    role: QueueRole,
    raw: vk::CommandBuffer,
}

impl CommandBuffer {
    pub(crate) fn new(role: QueueRole, raw: vk::CommandBuffer) -> Self {
        Self { role, raw }
    }

    pub fn role(&self) -> QueueRole {
        self.role
    }

    pub fn raw(&self) -> vk::CommandBuffer {
        self.raw
    }

    /// Fails unless the buffer was allocated for `role`
    pub fn expect_role(&self, role: QueueRole) -> GpuResult<vk::CommandBuffer> {
        if self.role == role {
            Ok(self.raw)
        } else {
            Err(GpuError::RoleMismatch {
                allocated: self.role,
                requested: role,
            })
        }
    }
}

pub struct CommandPools {
    pools: [vk::CommandPool; 4],
    context: Arc<GpuContext>,
}

impl CommandPools {
    pub fn new(context: Arc<GpuContext>) -> GpuResult<Self> {
        let families = context.adapter.families;
        let mut pools = [vk::CommandPool::null(); 4];

        for role in QueueRole::ALL {
            let pool_info = vk::CommandPoolCreateInfo::builder()
                .queue_family_index(families.index(role))
                .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

            match unsafe { context.device.create_command_pool(&pool_info, None) } {
                Ok(pool) => pools[role.slot()] = pool,
                Err(e) => {
                    for pool in pools.iter().filter(|pool| **pool != vk::CommandPool::null()) {
                        unsafe { context.device.destroy_command_pool(*pool, None) };
                    }
                    return Err(GpuError::context("vkCreateCommandPool")(e));
                }
            }
        }

        log::debug!("Created command pools for families {:?}", families);
        Ok(Self { pools, context })
    }

    pub fn pool(&self, role: QueueRole) -> vk::CommandPool {
        self.pools[role.slot()]
    }

    /// Allocate exactly one command buffer from the pool of `role`
    pub fn allocate(&self, role: QueueRole, level: vk::CommandBufferLevel) -> GpuResult<CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.pool(role))
            .level(level)
            .command_buffer_count(1);

        let buffers = unsafe { self.context.device.allocate_command_buffers(&alloc_info) }
            .map_err(GpuError::context("vkAllocateCommandBuffers"))?;

        let raw = buffers.first().copied().ok_or(GpuError::Context {
            operation: "vkAllocateCommandBuffers",
            result: vk::Result::ERROR_UNKNOWN,
        })?;

        Ok(CommandBuffer::new(role, raw))
    }

    /// Return a buffer to the pool of the role it was allocated for
    pub fn free(&self, buffer: &CommandBuffer) {
        unsafe {
            self.context
                .device
                .free_command_buffers(self.pool(buffer.role), &[buffer.raw]);
        }
    }
}

impl Drop for CommandPools {
    fn drop(&mut self) {
        // Destroying a pool releases any buffer still allocated from it
        unsafe {
            for &pool in &self.pools {
                self.context.device.destroy_command_pool(pool, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_map_to_distinct_slots() {
        let mut slots: Vec<_> = QueueRole::ALL.iter().map(|role| role.slot()).collect();
        slots.sort_unstable();
        assert_eq!(slots, vec![0, 1, 2, 3]);
    }

    #[test]
    fn buffers_reject_foreign_roles() {
        let buffer = CommandBuffer {
            role: QueueRole::Compute,
            raw: vk::CommandBuffer::null(),
        };

        assert!(buffer.expect_role(QueueRole::Compute).is_ok());
        match buffer.expect_role(QueueRole::Graphics) {
            Err(GpuError::RoleMismatch { allocated, requested }) => {
                assert_eq!(allocated, QueueRole::Compute);
                assert_eq!(requested, QueueRole::Graphics);
            }
            other => panic!("expected a role mismatch, got {:?}", other),
        }
    }
}
