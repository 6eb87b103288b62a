// Descriptor sets for per-frame uniform data
//
// One set per frame slot, each pointing at that slot's uniform buffer. The
// layout and sets do not depend on the swapchain, so they survive recreation.

use ash::vk;
use std::sync::Arc;

use super::buffer::GpuBuffer;
use super::VulkanDevice;
use crate::error::FrameResult;

pub struct FrameDescriptors {
    pub layout: vk::DescriptorSetLayout,
    pub sets: Vec<vk::DescriptorSet>,
    pool: vk::DescriptorPool,
    device: Arc<VulkanDevice>,
}

impl FrameDescriptors {
    /// Binding 0: uniform buffer visible to the vertex stage.
    pub fn new(device: Arc<VulkanDevice>, uniform_buffers: &[GpuBuffer]) -> FrameResult<Self> {
        let count = uniform_buffers.len() as u32;

        let bindings = [vk::DescriptorSetLayoutBinding::builder()
            .binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::VERTEX)
            .build()];
        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
        let layout = unsafe { device.device.create_descriptor_set_layout(&layout_info, None) }?;

        let mut this = Self {
            layout,
            sets: Vec::new(),
            pool: vk::DescriptorPool::null(),
            device,
        };

        let pool_sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: count,
        }];
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&pool_sizes)
            .max_sets(count);
        this.pool = unsafe { this.device.device.create_descriptor_pool(&pool_info, None) }?;

        let layouts = vec![layout; uniform_buffers.len()];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(this.pool)
            .set_layouts(&layouts);
        this.sets = unsafe { this.device.device.allocate_descriptor_sets(&alloc_info) }?;

        for (&set, buffer) in this.sets.iter().zip(uniform_buffers) {
            let buffer_info = [vk::DescriptorBufferInfo {
                buffer: buffer.buffer,
                offset: 0,
                range: buffer.size,
            }];
            let write = vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(0)
                .dst_array_element(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(&buffer_info)
                .build();
            unsafe { this.device.device.update_descriptor_sets(&[write], &[]) };
        }

        Ok(this)
    }
}

impl Drop for FrameDescriptors {
    fn drop(&mut self) {
        unsafe {
            // Destroying the pool frees its sets
            if self.pool != vk::DescriptorPool::null() {
                self.device.device.destroy_descriptor_pool(self.pool, None);
            }
            self.device
                .device
                .destroy_descriptor_set_layout(self.layout, None);
        }
    }
}
