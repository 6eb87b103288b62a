// =============================================================================
// VULKAN RENDERER - the GPU side of the frame loop
// =============================================================================
//
// Owns everything the frame loop sequences. Long-lived objects (frame slots,
// command pool, mesh and uniform buffers, descriptors, pipeline layout,
// shader modules, window surface) are created once. The swapchain and its
// dependent chain are replaced as a pair whenever the loop recreates.
//
// Destruction order (see Drop):
//   idle -> chain -> swapchain -> pool -> slots -> layout/shaders
//   -> descriptors/buffers -> window surface -> device

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;
use std::time::Instant;

use crate::backend::buffer::GpuBuffer;
use crate::backend::descriptor::FrameDescriptors;
use crate::backend::pipeline::{self, ShaderStages};
use crate::backend::shader;
use crate::backend::surface::Surface;
use crate::backend::swapchain::{AcquireOutcome, PresentOutcome};
use crate::backend::sync::{FrameSlotSet, WaitTimeout};
use crate::backend::{Swapchain, VulkanDevice};
use crate::config::Config;
use crate::error::{FrameError, FrameResult};
use crate::frame::{
    ChainInputs, ClearValues, CommandRecorder, DependentResourceChain, DrawState, FrameBackend,
};
use crate::scene::{Mesh, UniformData};

pub struct VulkanRenderer {
    // ─────────────────────────────────────────────────────────────────────────
    // PER SURFACE GENERATION
    // ─────────────────────────────────────────────────────────────────────────
    chain: Option<DependentResourceChain>,
    swapchain: Option<Swapchain>,
    next_generation: u64,
    preferred_present_mode: vk::PresentModeKHR,

    // ─────────────────────────────────────────────────────────────────────────
    // SCENE
    // ─────────────────────────────────────────────────────────────────────────
    descriptors: FrameDescriptors,
    uniform_buffers: Vec<GpuBuffer>,
    vertex_buffer: GpuBuffer,
    index_buffer: GpuBuffer,
    index_count: u32,
    clear: ClearValues,
    started: Instant,

    // ─────────────────────────────────────────────────────────────────────────
    // LONG-LIVED VULKAN OBJECTS
    // ─────────────────────────────────────────────────────────────────────────
    slots: FrameSlotSet,
    command_pool: vk::CommandPool,
    pipeline_layout: vk::PipelineLayout,
    shaders: ShaderStages,
    /// Acquire semaphore is waited on right before color output
    wait_stages: [vk::PipelineStageFlags; 1],

    surface: Surface,
    device: Arc<VulkanDevice>,
}

impl VulkanRenderer {
    pub fn new(
        device: Arc<VulkanDevice>,
        surface: Surface,
        window_extent: vk::Extent2D,
        config: &Config,
    ) -> Result<Self> {
        let slot_count = config.frames_in_flight();

        let mesh = Mesh::cube();
        let vertex_buffer = GpuBuffer::with_data(
            device.clone(),
            "cube vertices",
            vk::BufferUsageFlags::VERTEX_BUFFER,
            &mesh.vertices,
        )?;
        let index_buffer = GpuBuffer::with_data(
            device.clone(),
            "cube indices",
            vk::BufferUsageFlags::INDEX_BUFFER,
            &mesh.indices,
        )?;

        let uniform_buffers = (0..slot_count)
            .map(|slot| {
                GpuBuffer::new(
                    device.clone(),
                    &format!("uniforms slot {}", slot),
                    std::mem::size_of::<UniformData>() as vk::DeviceSize,
                    vk::BufferUsageFlags::UNIFORM_BUFFER,
                )
            })
            .collect::<FrameResult<Vec<_>>>()?;
        let descriptors = FrameDescriptors::new(device.clone(), &uniform_buffers)?;

        let slots = FrameSlotSet::create(&device, slot_count)?;

        // From here on a failure is cleaned up by Drop; vkDestroy* ignores
        // null handles
        let mut renderer = Self {
            chain: None,
            swapchain: None,
            next_generation: 1,
            preferred_present_mode: config.present_mode(),
            descriptors,
            uniform_buffers,
            vertex_buffer,
            index_buffer,
            index_count: mesh.index_count(),
            clear: ClearValues {
                color: config.graphics.clear_color,
                depth: config.graphics.clear_depth,
            },
            started: Instant::now(),
            slots,
            command_pool: vk::CommandPool::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            shaders: ShaderStages {
                vertex: vk::ShaderModule::null(),
                fragment: vk::ShaderModule::null(),
            },
            wait_stages: [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
            surface,
            device,
        };

        // RESET_COMMAND_BUFFER: each slot's buffer is re-recorded every tick
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(renderer.device.graphics_queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        renderer.command_pool = unsafe { renderer.device.device.create_command_pool(&pool_info, None) }
            .context("Failed to create command pool")?;

        renderer.pipeline_layout =
            pipeline::create_pipeline_layout(&renderer.device, renderer.descriptors.layout)?;

        renderer.shaders.vertex = shader::load_shader_module(&renderer.device, &config.shaders.vertex)?;
        renderer.shaders.fragment =
            shader::load_shader_module(&renderer.device, &config.shaders.fragment)?;

        renderer
            .create_surface(window_extent)
            .context("Failed to create swapchain")?;
        renderer
            .build_chain()
            .context("Failed to build swapchain resources")?;

        log::info!("Renderer ready with {} frame slots", slot_count);
        Ok(renderer)
    }

    pub fn set_clear_color(&mut self, color: [f32; 4]) {
        self.clear.color = color;
    }

    /// Returns true when the mode differs from the current preference; the
    /// caller must then recreate for it to take effect.
    pub fn set_preferred_present_mode(&mut self, mode: vk::PresentModeKHR) -> bool {
        if self.preferred_present_mode == mode {
            return false;
        }
        self.preferred_present_mode = mode;
        true
    }

    /// Present mode actually negotiated for the current swapchain
    pub fn present_mode(&self) -> Option<vk::PresentModeKHR> {
        self.swapchain.as_ref().map(|s| s.present_mode)
    }

    fn current_swapchain(&self) -> FrameResult<&Swapchain> {
        self.swapchain.as_ref().ok_or(FrameError::MissingSurface)
    }

    fn current_chain(&self) -> FrameResult<&DependentResourceChain> {
        self.chain.as_ref().ok_or(FrameError::MissingSurface)
    }
}

impl FrameBackend for VulkanRenderer {
    fn slot_count(&self) -> usize {
        self.slots.len()
    }

    fn wait_for_slot(&mut self, slot: usize, timeout: WaitTimeout) -> FrameResult<()> {
        self.slots.get(slot)?.wait(&self.device.device, timeout)
    }

    fn acquire_image(&mut self, slot: usize, timeout: WaitTimeout) -> FrameResult<AcquireOutcome> {
        let sync = self.slots.get(slot)?;
        self.current_swapchain()?
            .acquire_next_image(timeout.as_nanos(), sync.image_available)
    }

    fn discard_acquired(&mut self, slot: usize) -> FrameResult<()> {
        let sync = self.slots.get(slot)?;
        let wait_semaphores = [sync.image_available];

        // No command buffers and no fence: the slot's fence stays signaled and
        // the idle wait before recreation covers this batch
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&self.wait_stages);

        unsafe {
            self.device.device.queue_submit(
                self.device.graphics_queue,
                &[submit_info.build()],
                vk::Fence::null(),
            )
        }
        .map_err(FrameError::SubmitFailed)
    }

    fn reset_slot(&mut self, slot: usize) -> FrameResult<()> {
        self.slots.get(slot)?.reset(&self.device.device)
    }

    fn update_frame_data(&mut self, slot: usize) -> FrameResult<()> {
        let extent = self.current_swapchain()?.extent;
        let uniforms = UniformData::animated(self.started.elapsed().as_secs_f32(), extent);

        let count = self.uniform_buffers.len();
        self.uniform_buffers
            .get_mut(slot)
            .ok_or(FrameError::IndexOutOfRange { index: slot, count })?
            .write(&[uniforms])
    }

    fn record(&mut self, slot: usize, image_index: u32) -> FrameResult<()> {
        let chain = self.current_chain()?;
        let swapchain = self.current_swapchain()?;
        let buffer = chain.command_buffer(slot)?;

        let descriptor_set = *self
            .descriptors
            .sets
            .get(slot)
            .ok_or(FrameError::IndexOutOfRange {
                index: slot,
                count: self.descriptors.sets.len(),
            })?;
        let draw = DrawState {
            vertex_buffer: self.vertex_buffer.buffer,
            index_buffer: self.index_buffer.buffer,
            index_count: self.index_count,
            pipeline_layout: self.pipeline_layout,
            descriptor_set,
        };

        CommandRecorder::record(
            &self.device.device,
            buffer,
            image_index,
            chain,
            swapchain,
            &draw,
            &self.clear,
        )
    }

    fn submit(&mut self, slot: usize) -> FrameResult<()> {
        let sync = self.slots.get(slot)?;
        let command_buffers = [self.current_chain()?.command_buffer(slot)?];
        let wait_semaphores = [sync.image_available];
        let signal_semaphores = [sync.render_finished];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&self.wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device.device.queue_submit(
                self.device.graphics_queue,
                &[submit_info.build()],
                sync.in_flight_fence,
            )
        }
        .map_err(FrameError::SubmitFailed)
    }

    fn present(&mut self, slot: usize, image_index: u32) -> FrameResult<PresentOutcome> {
        let sync = self.slots.get(slot)?;
        self.current_swapchain()?.present(
            self.device.graphics_queue,
            image_index,
            &[sync.render_finished],
        )
    }

    fn wait_idle(&mut self, timeout: WaitTimeout) -> FrameResult<()> {
        // Bounded wait first so a hung GPU surfaces as DeadlineExceeded
        self.slots.wait_all(&self.device.device, timeout)?;
        self.device.wait_idle()
    }

    fn release_chain(&mut self) {
        if let Some(mut chain) = self.chain.take() {
            chain.release();
        }
    }

    fn release_surface(&mut self) {
        if let Some(mut swapchain) = self.swapchain.take() {
            swapchain.release();
        }
    }

    fn create_surface(&mut self, window_extent: vk::Extent2D) -> FrameResult<()> {
        let generation = self.next_generation;
        self.next_generation += 1;

        let swapchain = Swapchain::new(
            self.device.clone(),
            &self.surface,
            window_extent,
            self.preferred_present_mode,
            generation,
        )?;
        self.swapchain = Some(swapchain);
        Ok(())
    }

    fn build_chain(&mut self) -> FrameResult<()> {
        let inputs = ChainInputs {
            shaders: self.shaders,
            pipeline_layout: self.pipeline_layout,
            command_pool: self.command_pool,
            slot_count: self.slots.len(),
        };
        let swapchain = self.swapchain.as_ref().ok_or(FrameError::MissingSurface)?;
        let chain =
            DependentResourceChain::rebuild(self.chain.take(), self.device.clone(), swapchain, &inputs)?;
        self.chain = Some(chain);
        Ok(())
    }
}

impl Drop for VulkanRenderer {
    fn drop(&mut self) {
        log::info!("Cleaning up renderer resources...");

        // Unbounded: nothing below may be destroyed while the GPU uses it
        if let Err(e) = self.device.wait_idle() {
            log::error!("Device wait failed during cleanup: {}", e);
        }

        self.release_chain();
        self.release_surface();

        let dev = &self.device.device;
        unsafe {
            // Also frees any command buffers still allocated from it
            dev.destroy_command_pool(self.command_pool, None);
            self.slots.destroy(dev);
            dev.destroy_pipeline_layout(self.pipeline_layout, None);
            dev.destroy_shader_module(self.shaders.vertex, None);
            dev.destroy_shader_module(self.shaders.fragment, None);
        }
        // Remaining fields drop in declaration order: descriptors, buffers,
        // window surface, then the device reference
    }
}
