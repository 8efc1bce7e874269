// Synchronization primitives
//
// One command buffer + fence per frame in flight. Frames render offscreen
// and nothing is presented, so there are no semaphores.

use anyhow::{Context, Result};
use ash::vk;

/// Frame slot: the fence guards reuse of the command buffer
pub struct FrameSync {
    pub command_buffer: vk::CommandBuffer,
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    pub fn new(device: &ash::Device, pool: vk::CommandPool) -> Result<Self> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED); // Start signaled

        unsafe {
            let command_buffer = device
                .allocate_command_buffers(&alloc_info)
                .context("Failed to allocate frame command buffer")?
                .into_iter()
                .next()
                .context("Driver returned no command buffer")?;

            Ok(Self {
                command_buffer,
                in_flight_fence: device
                    .create_fence(&fence_info, None)
                    .context("Failed to create frame fence")?,
            })
        }
    }

    /// Block until the GPU is done with this slot, then re-arm the fence
    pub fn wait_and_reset(&self, device: &ash::Device) -> Result<()> {
        unsafe {
            device
                .wait_for_fences(&[self.in_flight_fence], true, u64::MAX)
                .context("Failed waiting for frame fence")?;
            device
                .reset_fences(&[self.in_flight_fence])
                .context("Failed to reset frame fence")?;
        }
        Ok(())
    }

    /// Command buffer is freed with its pool
    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_fence(self.in_flight_fence, None);
        }
    }
}
