// Dependent resource chain - everything whose shape follows the swapchain
//
// Built against one swapchain generation and released as a whole, in reverse
// creation order, before a replacement is built. Framebuffers and pipeline
// both use the render pass, so there is no partial rebuild.

use ash::vk;
use std::sync::Arc;

use crate::backend::depth::DepthTarget;
use crate::backend::pipeline::{self, ShaderStages};
use crate::backend::{Swapchain, VulkanDevice};
use crate::error::{FrameError, FrameResult};

/// Long-lived objects the chain is built from.
#[derive(Debug, Clone, Copy)]
pub struct ChainInputs {
    pub shaders: ShaderStages,
    pub pipeline_layout: vk::PipelineLayout,
    pub command_pool: vk::CommandPool,
    /// One command buffer per frame slot, not per swapchain image.
    pub slot_count: usize,
}

pub struct DependentResourceChain {
    pub render_pass: vk::RenderPass,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub pipeline: vk::Pipeline,
    pub command_buffers: Vec<vk::CommandBuffer>,
    pub extent: vk::Extent2D,
    pub surface_generation: u64,
    depth: Option<DepthTarget>,
    command_pool: vk::CommandPool,
    device: Arc<VulkanDevice>,
}

impl DependentResourceChain {
    pub fn build(
        device: Arc<VulkanDevice>,
        surface: &Swapchain,
        inputs: &ChainInputs,
    ) -> FrameResult<Self> {
        let depth = DepthTarget::new(device.clone(), surface.extent)?;
        let depth_format = depth.format;
        let depth_view = depth.view;

        // Partially built chains are released by Drop
        let mut chain = Self {
            render_pass: vk::RenderPass::null(),
            framebuffers: Vec::new(),
            pipeline: vk::Pipeline::null(),
            command_buffers: Vec::new(),
            extent: surface.extent,
            surface_generation: surface.generation,
            depth: Some(depth),
            command_pool: inputs.command_pool,
            device,
        };

        chain.render_pass = pipeline::create_render_pass(&chain.device, surface.format, depth_format)?;

        chain.framebuffers = pipeline::create_framebuffers(
            &chain.device,
            &surface.image_views,
            depth_view,
            chain.render_pass,
            surface.extent,
        )?;

        chain.pipeline = pipeline::create_graphics_pipeline(
            &chain.device,
            chain.render_pass,
            surface.extent,
            inputs.pipeline_layout,
            &inputs.shaders,
        )?;

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(inputs.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(inputs.slot_count as u32);
        chain.command_buffers = unsafe { chain.device.device.allocate_command_buffers(&alloc_info) }?;

        log::debug!(
            "Built resource chain for generation {}: {} framebuffers, {} command buffers",
            chain.surface_generation,
            chain.framebuffers.len(),
            chain.command_buffers.len()
        );
        Ok(chain)
    }

    /// Release `old` completely, then build against `surface`.
    ///
    /// The caller must have waited for the device to go idle: `old` may be
    /// referenced by command buffers still in flight otherwise.
    pub fn rebuild(
        old: Option<Self>,
        device: Arc<VulkanDevice>,
        surface: &Swapchain,
        inputs: &ChainInputs,
    ) -> FrameResult<Self> {
        if let Some(mut old) = old {
            old.release();
        }
        Self::build(device, surface, inputs)
    }

    pub fn ensure_generation(&self, surface: &Swapchain) -> FrameResult<()> {
        check_generation(self.surface_generation, surface.generation)
    }

    pub fn command_buffer(&self, slot: usize) -> FrameResult<vk::CommandBuffer> {
        indexed(&self.command_buffers, slot)
    }

    pub fn framebuffer(&self, image_index: u32) -> FrameResult<vk::Framebuffer> {
        indexed(&self.framebuffers, image_index as usize)
    }

    /// Reverse creation order. Safe to call more than once.
    pub fn release(&mut self) {
        let dev = &self.device.device;
        unsafe {
            if !self.command_buffers.is_empty() {
                dev.free_command_buffers(self.command_pool, &self.command_buffers);
                self.command_buffers.clear();
            }
            if self.pipeline != vk::Pipeline::null() {
                dev.destroy_pipeline(self.pipeline, None);
                self.pipeline = vk::Pipeline::null();
            }
            for fb in self.framebuffers.drain(..) {
                dev.destroy_framebuffer(fb, None);
            }
            if self.render_pass != vk::RenderPass::null() {
                dev.destroy_render_pass(self.render_pass, None);
                self.render_pass = vk::RenderPass::null();
            }
        }
        if self.depth.take().is_some() {
            log::debug!("Released resource chain for generation {}", self.surface_generation);
        }
    }
}

impl Drop for DependentResourceChain {
    fn drop(&mut self) {
        self.release();
    }
}

fn check_generation(chain: u64, surface: u64) -> FrameResult<()> {
    if chain == surface {
        Ok(())
    } else {
        Err(FrameError::GenerationMismatch { chain, surface })
    }
}

fn indexed<T: Copy>(items: &[T], index: usize) -> FrameResult<T> {
    items.get(index).copied().ok_or(FrameError::IndexOutOfRange {
        index,
        count: items.len(),
    })
}
