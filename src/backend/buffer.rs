// Buffer utilities for vertex, index, and uniform buffers
//
// All buffers here are host visible and written through their persistent
// mapping. Nothing is staged into device-local memory.

use ash::vk;
use bytemuck::Pod;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

use super::VulkanDevice;
use crate::error::{FrameError, FrameResult};

pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub size: vk::DeviceSize,
    allocation: Option<Allocation>,
    device: Arc<VulkanDevice>,
}

impl GpuBuffer {
    pub fn new(
        device: Arc<VulkanDevice>,
        name: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> FrameResult<Self> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }?;

        let mut this = Self {
            buffer,
            size,
            allocation: None,
            device,
        };

        let requirements = unsafe { this.device.device.get_buffer_memory_requirements(buffer) };
        let allocation = this.device.allocator.lock().allocate(&AllocationCreateDesc {
            name,
            requirements,
            location: MemoryLocation::CpuToGpu,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?;

        let bind = unsafe {
            this.device
                .device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        };
        this.allocation = Some(allocation);
        bind?;

        Ok(this)
    }

    /// Create a buffer sized for `data` and fill it
    pub fn with_data<T: Pod>(
        device: Arc<VulkanDevice>,
        name: &str,
        usage: vk::BufferUsageFlags,
        data: &[T],
    ) -> FrameResult<Self> {
        let size = std::mem::size_of_val(data) as vk::DeviceSize;
        let mut buffer = Self::new(device, name, size, usage)?;
        buffer.write(data)?;
        Ok(buffer)
    }

    /// Copy `data` to the start of the buffer through its persistent mapping.
    pub fn write<T: Pod>(&mut self, data: &[T]) -> FrameResult<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let mapped = self
            .allocation
            .as_mut()
            .and_then(|a| a.mapped_slice_mut())
            .ok_or(FrameError::UnmappedBuffer)?;

        if bytes.len() > mapped.len() {
            return Err(FrameError::IndexOutOfRange {
                index: bytes.len(),
                count: mapped.len(),
            });
        }
        mapped[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_buffer(self.buffer, None) };
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.device.allocator.lock().free(allocation) {
                log::warn!("Failed to free buffer memory: {}", e);
            }
        }
    }
}
