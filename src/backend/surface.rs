// Window surface - platform-specific connection between Vulkan and a window

use anyhow::{Context, Result};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use std::sync::Arc;

use super::VulkanDevice;
use crate::error::FrameResult;

/// What the surface currently allows; re-queried for every swapchain generation.
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

pub struct Surface {
    pub handle: vk::SurfaceKHR,
    pub loader: ash::extensions::khr::Surface,
    device: Arc<VulkanDevice>,
}

impl Surface {
    pub fn new<W>(device: Arc<VulkanDevice>, window: &W) -> Result<Self>
    where
        W: HasWindowHandle + HasDisplayHandle,
    {
        let loader = ash::extensions::khr::Surface::new(&device.entry, &device.instance);

        let window_handle = window
            .window_handle()
            .context("Failed to get window handle")?
            .as_raw();
        let display_handle = window
            .display_handle()
            .context("Failed to get display handle")?
            .as_raw();

        let handle = unsafe { create_platform_surface(&device, display_handle, window_handle)? };

        // The single queue must be able to present to this surface
        let supported = unsafe {
            loader.get_physical_device_surface_support(
                device.physical_device,
                device.graphics_queue_family,
                handle,
            )
        };

        match supported {
            Ok(true) => {}
            Ok(false) => {
                unsafe { loader.destroy_surface(handle, None) };
                anyhow::bail!("GPU doesn't support presenting to this surface");
            }
            Err(e) => {
                unsafe { loader.destroy_surface(handle, None) };
                return Err(e).context("Failed to query surface support");
            }
        }

        Ok(Self {
            handle,
            loader,
            device,
        })
    }

    pub fn query_support(&self) -> FrameResult<SurfaceSupport> {
        let physical = self.device.physical_device;
        unsafe {
            Ok(SurfaceSupport {
                capabilities: self
                    .loader
                    .get_physical_device_surface_capabilities(physical, self.handle)?,
                formats: self
                    .loader
                    .get_physical_device_surface_formats(physical, self.handle)?,
                present_modes: self
                    .loader
                    .get_physical_device_surface_present_modes(physical, self.handle)?,
            })
        }
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe { self.loader.destroy_surface(self.handle, None) };
    }
}

#[allow(unused_variables)]
unsafe fn create_platform_surface(
    device: &VulkanDevice,
    display_handle: RawDisplayHandle,
    window_handle: RawWindowHandle,
) -> Result<vk::SurfaceKHR> {
    match (display_handle, window_handle) {
        #[cfg(target_os = "windows")]
        (RawDisplayHandle::Windows(_), RawWindowHandle::Win32(handle)) => {
            let hinstance = handle.hinstance.map(|h| h.get()).unwrap_or(0) as *const std::ffi::c_void;
            let hwnd = handle.hwnd.get() as *const std::ffi::c_void;
            let create_info = vk::Win32SurfaceCreateInfoKHR::builder()
                .hinstance(hinstance)
                .hwnd(hwnd);
            let loader = ash::extensions::khr::Win32Surface::new(&device.entry, &device.instance);
            loader
                .create_win32_surface(&create_info, None)
                .context("Failed to create Win32 surface")
        }

        #[cfg(all(unix, not(target_os = "macos"), not(target_os = "android")))]
        (RawDisplayHandle::Xlib(display), RawWindowHandle::Xlib(handle)) => {
            let dpy = display
                .display
                .map(|d| d.as_ptr())
                .unwrap_or(std::ptr::null_mut());
            let create_info = vk::XlibSurfaceCreateInfoKHR::builder()
                .dpy(dpy as *mut vk::Display)
                .window(handle.window as vk::Window);
            let loader = ash::extensions::khr::XlibSurface::new(&device.entry, &device.instance);
            loader
                .create_xlib_surface(&create_info, None)
                .context("Failed to create Xlib surface")
        }

        #[cfg(all(unix, not(target_os = "macos"), not(target_os = "android")))]
        (RawDisplayHandle::Wayland(display), RawWindowHandle::Wayland(handle)) => {
            let create_info = vk::WaylandSurfaceCreateInfoKHR::builder()
                .display(display.display.as_ptr())
                .surface(handle.surface.as_ptr());
            let loader = ash::extensions::khr::WaylandSurface::new(&device.entry, &device.instance);
            loader
                .create_wayland_surface(&create_info, None)
                .context("Failed to create Wayland surface")
        }

        _ => anyhow::bail!("Unsupported window handle type"),
    }
}
