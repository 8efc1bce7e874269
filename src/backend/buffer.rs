// Buffer utilities for vertex, index, uniform and readback buffers
//
// Provides a GPU buffer that owns its allocation and, for host-visible
// memory, exposes the persistently mapped pointer

use anyhow::{Context, Result};
use ash::vk;
use bytemuck::Pod;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

use super::VulkanDevice;

/// GPU buffer with its memory allocation
pub struct Buffer {
    pub buffer: vk::Buffer,
    pub size: vk::DeviceSize,
    allocation: Option<Allocation>,
    device: Arc<VulkanDevice>,
}

impl Buffer {
    /// Create a buffer with the given usage in the given memory location
    pub fn new(
        device: &Arc<VulkanDevice>,
        name: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> Result<Self> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }
            .with_context(|| format!("Failed to create buffer '{}'", name))?;

        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

        let allocation = device
            .allocator
            .lock()
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .with_context(|| format!("Failed to allocate memory for buffer '{}'", name));

        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let bound = unsafe {
            device
                .device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        };

        let buffer = Self {
            buffer,
            size,
            allocation: Some(allocation),
            device: device.clone(),
        };
        bound.with_context(|| format!("Failed to bind memory for buffer '{}'", name))?;

        Ok(buffer)
    }

    /// Create a host-visible buffer and fill it with data
    pub fn with_data<T: Pod>(
        device: &Arc<VulkanDevice>,
        name: &str,
        usage: vk::BufferUsageFlags,
        data: &[T],
    ) -> Result<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let mut buffer = Self::new(
            device,
            name,
            bytes.len() as vk::DeviceSize,
            usage,
            MemoryLocation::CpuToGpu,
        )?;
        buffer.write(data)?;
        Ok(buffer)
    }

    /// Create a device-local buffer and upload data through a staging buffer
    pub fn device_local_with_data<T: Pod>(
        device: &Arc<VulkanDevice>,
        name: &str,
        usage: vk::BufferUsageFlags,
        data: &[T],
    ) -> Result<Self> {
        let staging = Self::with_data(
            device,
            &format!("{} (staging)", name),
            vk::BufferUsageFlags::TRANSFER_SRC,
            data,
        )?;

        let buffer = Self::new(
            device,
            name,
            staging.size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuOnly,
        )?;

        device.immediate_submit(|raw, cmd| {
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size: staging.size,
            };
            unsafe { raw.cmd_copy_buffer(cmd, staging.buffer, buffer.buffer, &[region]) };
            Ok(())
        })?;

        Ok(buffer)
    }

    /// Copy a slice into the mapped memory
    pub fn write<T: Pod>(&mut self, data: &[T]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let size = self.size;
        let mapped = self
            .allocation
            .as_mut()
            .and_then(|allocation| allocation.mapped_slice_mut())
            .context("Buffer is not host-visible")?;

        if bytes.len() as vk::DeviceSize > size || bytes.len() > mapped.len() {
            anyhow::bail!(
                "Write of {} bytes exceeds buffer size of {} bytes",
                bytes.len(),
                size
            );
        }

        mapped[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Mapped contents, for readback buffers
    pub fn mapped_bytes(&self) -> Result<&[u8]> {
        let mapped = self
            .allocation
            .as_ref()
            .and_then(|allocation| allocation.mapped_slice())
            .context("Buffer is not host-visible")?;
        Ok(&mapped[..self.size as usize])
    }

    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: self.buffer,
            offset: 0,
            range: self.size,
        }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_buffer(self.buffer, None) };
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.device.allocator.lock().free(allocation) {
                log::error!("Failed to free buffer memory: {}", e);
            }
        }
    }
}
