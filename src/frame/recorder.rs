// Command recorder - fills one frame slot's command buffer

use ash::vk;

use super::chain::DependentResourceChain;
use crate::backend::Swapchain;
use crate::error::{FrameError, FrameResult};

/// Clear values for the color and depth attachments.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearValues {
    pub color: [f32; 4],
    pub depth: f32,
}

impl ClearValues {
    fn as_vk(&self) -> [vk::ClearValue; 2] {
        [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: self.depth,
                    stencil: 0,
                },
            },
        ]
    }
}

/// Device-resident scene state bound for one draw.
#[derive(Debug, Clone, Copy)]
pub struct DrawState {
    pub vertex_buffer: vk::Buffer,
    pub index_buffer: vk::Buffer,
    pub index_count: u32,
    pub pipeline_layout: vk::PipelineLayout,
    /// Descriptor set of the frame slot being recorded, not of the image.
    pub descriptor_set: vk::DescriptorSet,
}

pub struct CommandRecorder;

impl CommandRecorder {
    /// Record one complete frame into `buffer`, targeting swapchain image
    /// `image_index`. Only `buffer` is touched; nothing is submitted.
    pub fn record(
        device: &ash::Device,
        buffer: vk::CommandBuffer,
        image_index: u32,
        chain: &DependentResourceChain,
        surface: &Swapchain,
        draw: &DrawState,
        clear: &ClearValues,
    ) -> FrameResult<()> {
        chain.ensure_generation(surface)?;
        let framebuffer = chain.framebuffer(image_index)?;

        // Implicit reset: the pool allows per-buffer reset
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { device.begin_command_buffer(buffer, &begin_info) }
            .map_err(FrameError::FailedToBeginBuffer)?;

        let clear_values = clear.as_vk();
        let render_pass_info = vk::RenderPassBeginInfo::builder()
            .render_pass(chain.render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: chain.extent,
            })
            .clear_values(&clear_values);

        unsafe {
            device.cmd_begin_render_pass(buffer, &render_pass_info, vk::SubpassContents::INLINE);

            device.cmd_bind_pipeline(buffer, vk::PipelineBindPoint::GRAPHICS, chain.pipeline);
            device.cmd_bind_vertex_buffers(buffer, 0, &[draw.vertex_buffer], &[0]);
            device.cmd_bind_index_buffer(buffer, draw.index_buffer, 0, vk::IndexType::UINT32);
            device.cmd_bind_descriptor_sets(
                buffer,
                vk::PipelineBindPoint::GRAPHICS,
                draw.pipeline_layout,
                0,
                &[draw.descriptor_set],
                &[],
            );

            device.cmd_draw_indexed(buffer, draw.index_count, 1, 0, 0, 0);

            device.cmd_end_render_pass(buffer);
        }

        unsafe { device.end_command_buffer(buffer) }.map_err(FrameError::FailedToEndBuffer)?;

        log::trace!("Recorded frame for image {}", image_index);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_values_carry_color_and_depth() {
        let clear = ClearValues {
            color: [0.1, 0.2, 0.3, 1.0],
            depth: 1.0,
        };
        let values = clear.as_vk();
        unsafe {
            assert_eq!(values[0].color.float32, [0.1, 0.2, 0.3, 1.0]);
            assert_eq!(values[1].depth_stencil.depth, 1.0);
            assert_eq!(values[1].depth_stencil.stencil, 0);
        }
    }
}
