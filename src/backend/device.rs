// Vulkan Device - execution context for everything else
//
// Instance, optional validation messenger, the chosen GPU, one logical device
// with a single graphics queue (also used for present), and the memory
// allocator. Shared through Arc; every other backend object holds a clone.

use anyhow::{Context, Result};
use ash::{vk, Entry};
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use parking_lot::Mutex;
use std::ffi::{CStr, CString};
use std::mem::ManuallyDrop;
use std::os::raw::c_char;
use std::sync::Arc;

use super::depth::select_supported_format;
use crate::error::{FrameError, FrameResult};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

type DebugMessenger = (ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT);

pub struct VulkanDevice {
    // Dropped by hand before the device is destroyed
    pub allocator: ManuallyDrop<Mutex<Allocator>>,
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub instance: ash::Instance,
    /// Kept loaded for the lifetime of the instance; surfaces reuse it.
    pub entry: Entry,
    pub graphics_queue: vk::Queue,
    pub graphics_queue_family: u32,
    debug_messenger: Option<DebugMessenger>,
}

impl VulkanDevice {
    pub fn new(app_name: &str, enable_validation: bool) -> Result<Arc<Self>> {
        log::info!("Creating Vulkan device for {}", app_name);

        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        let instance = create_instance(&entry, app_name, enable_validation)?;
        let debug_messenger = if enable_validation {
            Some(create_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        let (physical_device, graphics_queue_family) = pick_physical_device(&instance)?;
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        log::info!(
            "Selected GPU: {} ({:?}, Vulkan {}.{}.{})",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy(),
            properties.device_type,
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );

        let device = create_logical_device(&instance, physical_device, graphics_queue_family)?;
        let graphics_queue = unsafe { device.get_device_queue(graphics_queue_family, 0) };

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .context("Failed to create GPU allocator")?;

        Ok(Arc::new(Self {
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            device,
            physical_device,
            instance,
            entry,
            graphics_queue,
            graphics_queue_family,
            debug_messenger,
        }))
    }

    /// First candidate usable with `tiling` and `features` on this GPU.
    pub fn find_supported_format(
        &self,
        candidates: &[vk::Format],
        tiling: vk::ImageTiling,
        features: vk::FormatFeatureFlags,
    ) -> Option<vk::Format> {
        select_supported_format(candidates, tiling, features, |format| unsafe {
            self.instance
                .get_physical_device_format_properties(self.physical_device, format)
        })
    }

    /// Unbounded wait for all queues to drain.
    pub fn wait_idle(&self) -> FrameResult<()> {
        unsafe { self.device.device_wait_idle() }.map_err(FrameError::from)
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        if let Err(e) = self.wait_idle() {
            log::warn!("Device wait failed during teardown: {}", e);
        }

        unsafe {
            // Allocator frees its memory blocks through the device
            ManuallyDrop::drop(&mut self.allocator);

            if let Some((debug_utils, messenger)) = self.debug_messenger.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

// =============================================================================
// INSTANCE
// =============================================================================

fn create_instance(entry: &Entry, app_name: &str, enable_validation: bool) -> Result<ash::Instance> {
    let app_name = CString::new(app_name)?;
    let app_info = vk::ApplicationInfo::builder()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(c"Frame Loop")
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(vk::API_VERSION_1_2);

    let available = entry
        .enumerate_instance_extension_properties(None)
        .context("Failed to enumerate instance extensions")?;
    let available: Vec<&CStr> = available
        .iter()
        .map(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) })
        .collect();

    let extensions = filter_available(&wanted_instance_extensions(enable_validation), &available);
    if !extensions.contains(&ash::extensions::khr::Surface::name()) {
        anyhow::bail!("VK_KHR_surface is not available");
    }
    let extension_ptrs: Vec<*const c_char> = extensions.iter().map(|e| e.as_ptr()).collect();

    let layers: Vec<*const c_char> = if enable_validation {
        vec![VALIDATION_LAYER.as_ptr()]
    } else {
        Vec::new()
    };

    let create_info = vk::InstanceCreateInfo::builder()
        .application_info(&app_info)
        .enabled_extension_names(&extension_ptrs)
        .enabled_layer_names(&layers);

    unsafe { entry.create_instance(&create_info, None) }.context("Failed to create Vulkan instance")
}

fn wanted_instance_extensions(enable_validation: bool) -> Vec<&'static CStr> {
    let mut names = vec![ash::extensions::khr::Surface::name()];

    #[cfg(target_os = "windows")]
    names.push(ash::extensions::khr::Win32Surface::name());

    #[cfg(all(unix, not(target_os = "macos"), not(target_os = "android")))]
    {
        names.push(ash::extensions::khr::XlibSurface::name());
        names.push(ash::extensions::khr::WaylandSurface::name());
    }

    if enable_validation {
        names.push(ash::extensions::ext::DebugUtils::name());
    }
    names
}

/// Keep the wanted extensions the loader offers, in wanted order.
fn filter_available<'a>(wanted: &[&'a CStr], available: &[&CStr]) -> Vec<&'a CStr> {
    wanted
        .iter()
        .copied()
        .filter(|name| {
            let found = available.contains(name);
            if !found {
                log::debug!("Instance extension {:?} not available", name);
            }
            found
        })
        .collect()
}

fn create_debug_messenger(entry: &Entry, instance: &ash::Instance) -> Result<DebugMessenger> {
    let debug_utils = ash::extensions::ext::DebugUtils::new(entry, instance);

    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback));

    let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
        .context("Failed to create debug messenger")?;

    Ok((debug_utils, messenger))
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    kind: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if data.is_null() || (*data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*data).p_message).to_string_lossy();

    let level = if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::Level::Error
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::Level::Warn
    } else {
        log::Level::Debug
    };
    log::log!(target: "vulkan", level, "[{:?}] {}", kind, message);

    vk::FALSE
}

// =============================================================================
// PHYSICAL AND LOGICAL DEVICE
// =============================================================================

/// Higher is better; `None` when the GPU has no graphics queue.
fn score_device(
    device_type: vk::PhysicalDeviceType,
    queue_families: &[vk::QueueFamilyProperties],
) -> Option<(u32, u32)> {
    let family = queue_families
        .iter()
        .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))?;

    let score = match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        _ => 1,
    };
    Some((score, family as u32))
}

fn pick_physical_device(instance: &ash::Instance) -> Result<(vk::PhysicalDevice, u32)> {
    let devices = unsafe { instance.enumerate_physical_devices() }
        .context("Failed to enumerate GPUs")?;
    if devices.is_empty() {
        anyhow::bail!("No Vulkan-capable GPU found");
    }

    devices
        .into_iter()
        .filter_map(|device| {
            let props = unsafe { instance.get_physical_device_properties(device) };
            let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
            score_device(props.device_type, &families).map(|(score, family)| (score, device, family))
        })
        .max_by_key(|&(score, _, _)| score)
        .map(|(_, device, family)| (device, family))
        .context("No GPU with a graphics queue found")
}

fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    graphics_queue_family: u32,
) -> Result<ash::Device> {
    let priorities = [1.0];
    let queue_infos = [vk::DeviceQueueCreateInfo::builder()
        .queue_family_index(graphics_queue_family)
        .queue_priorities(&priorities)
        .build()];

    let extensions = [ash::extensions::khr::Swapchain::name().as_ptr()];
    let features = vk::PhysicalDeviceFeatures::default();

    let create_info = vk::DeviceCreateInfo::builder()
        .queue_create_infos(&queue_infos)
        .enabled_extension_names(&extensions)
        .enabled_features(&features);

    unsafe { instance.create_device(physical_device, &create_info, None) }
        .context("Failed to create logical device")
}
