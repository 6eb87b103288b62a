// Depth target for the swapchain-sized render pass
//
// Sized to the current surface extent, so it lives in the dependent
// resource chain and is rebuilt with every surface generation.

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

use super::VulkanDevice;
use crate::error::{FrameError, FrameResult};

/// Probed in order; the first format the GPU can attach wins.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Pick the first candidate whose properties for `tiling` contain `features`.
pub fn select_supported_format<F>(
    candidates: &[vk::Format],
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
    mut properties_of: F,
) -> Option<vk::Format>
where
    F: FnMut(vk::Format) -> vk::FormatProperties,
{
    candidates.iter().copied().find(|&format| {
        let props = properties_of(format);
        match tiling {
            vk::ImageTiling::LINEAR => props.linear_tiling_features.contains(features),
            vk::ImageTiling::OPTIMAL => props.optimal_tiling_features.contains(features),
            _ => false,
        }
    })
}

pub struct DepthTarget {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub format: vk::Format,
    allocation: Option<Allocation>,
    device: Arc<VulkanDevice>,
}

impl DepthTarget {
    pub fn new(device: Arc<VulkanDevice>, extent: vk::Extent2D) -> FrameResult<Self> {
        let format = device
            .find_supported_format(
                &DEPTH_FORMAT_CANDIDATES,
                vk::ImageTiling::OPTIMAL,
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            )
            .ok_or(FrameError::NoSupportedDepthFormat)?;

        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = unsafe { device.device.create_image(&image_info, None) }?;

        // From here on, partially built state is torn down by Drop
        let mut target = Self {
            image,
            view: vk::ImageView::null(),
            format,
            allocation: None,
            device,
        };

        let requirements = unsafe { target.device.device.get_image_memory_requirements(image) };
        let allocation = target.device.allocator.lock().allocate(&AllocationCreateDesc {
            name: "depth target",
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?;

        let bind = unsafe {
            target
                .device
                .device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        };
        target.allocation = Some(allocation);
        bind?;

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::DEPTH,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        target.view = unsafe { target.device.device.create_image_view(&view_info, None) }?;

        log::debug!(
            "Depth target {:?} {}x{}",
            format,
            extent.width,
            extent.height
        );
        Ok(target)
    }
}

impl Drop for DepthTarget {
    fn drop(&mut self) {
        unsafe {
            if self.view != vk::ImageView::null() {
                self.device.device.destroy_image_view(self.view, None);
            }
            self.device.device.destroy_image(self.image, None);
        }
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.device.allocator.lock().free(allocation) {
                log::warn!("Failed to free depth target memory: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(optimal: vk::FormatFeatureFlags) -> vk::FormatProperties {
        vk::FormatProperties {
            linear_tiling_features: vk::FormatFeatureFlags::empty(),
            optimal_tiling_features: optimal,
            buffer_features: vk::FormatFeatureFlags::empty(),
        }
    }

    #[test]
    fn picks_first_supported_candidate() {
        let chosen = select_supported_format(
            &DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            |format| {
                if format == vk::Format::D32_SFLOAT {
                    props(vk::FormatFeatureFlags::empty())
                } else {
                    props(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
                }
            },
        );
        assert_eq!(chosen, Some(vk::Format::D32_SFLOAT_S8_UINT));
    }

    #[test]
    fn none_when_nothing_matches() {
        let chosen = select_supported_format(
            &DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            |_| props(vk::FormatFeatureFlags::SAMPLED_IMAGE),
        );
        assert_eq!(chosen, None);
    }

    #[test]
    fn linear_tiling_reads_linear_features() {
        let chosen = select_supported_format(
            &DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::LINEAR,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            |_| props(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT),
        );
        assert_eq!(chosen, None);
    }
}
