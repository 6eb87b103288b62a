// Swapchain - Window presentation
//
// One Swapchain value is one surface generation: negotiated format, extent,
// present mode and the presentable images. It is never mutated in place;
// recreation releases it and negotiates a new one.

use ash::vk;
use std::sync::Arc;

use super::surface::Surface;
use super::VulkanDevice;
use crate::error::{FrameError, FrameResult};

/// Formats accepted as "8-bit sRGB"; first hit in the surface's list wins.
const PREFERRED_FORMATS: [vk::Format; 2] = [vk::Format::R8G8B8A8_SRGB, vk::Format::B8G8R8A8_SRGB];

/// `current_extent` value meaning the swapchain picks the size.
const EXTENT_FROM_SWAPCHAIN: u32 = u32::MAX;

/// Result of asking the swapchain for an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Ready(u32),
    /// Usable but no longer matching the surface. The semaphore will still be
    /// signaled, so something must wait on it before it is reused.
    Suboptimal(u32),
    /// Out of date; nothing was acquired and the surface must be rebuilt.
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    /// Suboptimal or out of date; the surface must be rebuilt.
    Stale,
}

/// Everything negotiated for one surface generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceConfig {
    pub image_count: u32,
    pub format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
}

impl SurfaceConfig {
    pub fn negotiate(
        window_extent: vk::Extent2D,
        capabilities: &vk::SurfaceCapabilitiesKHR,
        formats: &[vk::SurfaceFormatKHR],
        present_modes: &[vk::PresentModeKHR],
        preferred_present_mode: vk::PresentModeKHR,
    ) -> FrameResult<Self> {
        let image_count = choose_image_count(capabilities);
        let format = choose_surface_format(formats)?;
        let extent = choose_extent(window_extent, capabilities);
        let present_mode = choose_present_mode(present_modes, preferred_present_mode);
        check_transform_and_alpha(capabilities)?;

        Ok(Self {
            image_count,
            format,
            extent,
            present_mode,
        })
    }
}

/// One more than the minimum so acquire rarely waits on the driver,
/// but never above a nonzero maximum.
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let wanted = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 && wanted > capabilities.max_image_count {
        capabilities.max_image_count
    } else {
        wanted
    }
}

pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> FrameResult<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            PREFERRED_FORMATS.contains(&f.format)
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
        .ok_or(FrameError::NoSurfaceFormat)
}

/// Only the upper bound is enforced; a current extent below
/// `min_image_extent` is passed through unchanged.
pub fn choose_extent(
    window_extent: vk::Extent2D,
    capabilities: &vk::SurfaceCapabilitiesKHR,
) -> vk::Extent2D {
    let current = if capabilities.current_extent.width == EXTENT_FROM_SWAPCHAIN {
        window_extent
    } else {
        capabilities.current_extent
    };

    vk::Extent2D {
        width: current.width.min(capabilities.max_image_extent.width),
        height: current.height.min(capabilities.max_image_extent.height),
    }
}

/// FIFO is the one mode every implementation must support.
pub fn choose_present_mode(
    present_modes: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if present_modes.contains(&preferred) {
        preferred
    } else {
        vk::PresentModeKHR::FIFO
    }
}

fn check_transform_and_alpha(capabilities: &vk::SurfaceCapabilitiesKHR) -> FrameResult<()> {
    if !capabilities
        .supported_transforms
        .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
    {
        return Err(FrameError::UnsupportedSurfaceConfig(
            "identity transform not supported",
        ));
    }
    if !capabilities
        .supported_composite_alpha
        .contains(vk::CompositeAlphaFlagsKHR::OPAQUE)
    {
        return Err(FrameError::UnsupportedSurfaceConfig(
            "opaque composite alpha not supported",
        ));
    }
    Ok(())
}

/// Map the raw `vkAcquireNextImageKHR` result; timeouts become deadline errors.
fn acquire_outcome(result: Result<(u32, bool), vk::Result>) -> FrameResult<AcquireOutcome> {
    match result {
        Ok((index, false)) => Ok(AcquireOutcome::Ready(index)),
        Ok((index, true)) => Ok(AcquireOutcome::Suboptimal(index)),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::Stale),
        Err(vk::Result::TIMEOUT) | Err(vk::Result::NOT_READY) => Err(FrameError::DeadlineExceeded),
        Err(e) => Err(FrameError::AcquireFailed(e)),
    }
}

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: ash::extensions::khr::Swapchain,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    pub generation: u64,
    device: Arc<VulkanDevice>,
}

impl Swapchain {
    pub fn new(
        device: Arc<VulkanDevice>,
        surface: &Surface,
        window_extent: vk::Extent2D,
        preferred_present_mode: vk::PresentModeKHR,
        generation: u64,
    ) -> FrameResult<Self> {
        let support = surface.query_support()?;
        let config = SurfaceConfig::negotiate(
            window_extent,
            &support.capabilities,
            &support.formats,
            &support.present_modes,
            preferred_present_mode,
        )?;

        log::info!(
            "Creating swapchain generation {}: {}x{} {:?} {:?}, {} images",
            generation,
            config.extent.width,
            config.extent.height,
            config.format.format,
            config.present_mode,
            config.image_count
        );

        let swapchain_loader =
            ash::extensions::khr::Swapchain::new(&device.instance, &device.device);

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.handle)
            .min_image_count(config.image_count)
            .image_format(config.format.format)
            .image_color_space(config.format.color_space)
            .image_extent(config.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(vk::SurfaceTransformFlagsKHR::IDENTITY)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(config.present_mode)
            .clipped(true);

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }?;

        // Anything that fails below is released by Drop
        let mut this = Self {
            swapchain,
            swapchain_loader,
            images: Vec::new(),
            image_views: Vec::new(),
            format: config.format.format,
            extent: config.extent,
            present_mode: config.present_mode,
            generation,
            device,
        };

        this.images = unsafe { this.swapchain_loader.get_swapchain_images(swapchain) }?;

        for &image in &this.images {
            let create_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(this.format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });

            let view = unsafe { this.device.device.create_image_view(&create_info, None) }?;
            this.image_views.push(view);
        }

        if this.images.len() != this.image_views.len()
            || this.images.len() < config.image_count as usize
        {
            return Err(FrameError::ImageCountMismatch {
                images: this.images.len(),
                views: this.image_views.len(),
                min: config.image_count,
            });
        }

        log::debug!("Swapchain generation {} has {} images", generation, this.images.len());
        Ok(this)
    }

    /// Acquire next image for rendering, signaling `semaphore` when it is ready.
    pub fn acquire_next_image(
        &self,
        timeout: u64,
        semaphore: vk::Semaphore,
    ) -> FrameResult<AcquireOutcome> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                timeout,
                semaphore,
                vk::Fence::null(),
            )
        };

        acquire_outcome(result)
    }

    /// Present rendered image to screen
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> FrameResult<PresentOutcome> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.swapchain_loader.queue_present(queue, &present_info) };

        match result {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::Stale),
            Err(e) => Err(FrameError::PresentFailed(e)),
        }
    }

    /// Destroy views, then the swapchain. Safe to call more than once.
    pub fn release(&mut self) {
        if self.swapchain == vk::SwapchainKHR::null() {
            return;
        }
        unsafe {
            for view in self.image_views.drain(..) {
                self.device.device.destroy_image_view(view, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
        self.images.clear();
        self.swapchain = vk::SwapchainKHR::null();
        log::debug!("Released swapchain generation {}", self.generation);
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.release();
    }
}
