// Backend module - Vulkan abstraction layer
//
// Thin RAII wrappers around ash. Every handle-owning type releases itself on
// Drop; the device outlives them through Arc.

pub mod buffer;
pub mod depth;
pub mod descriptor;
pub mod device;
pub mod pipeline;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use device::VulkanDevice;
pub use swapchain::Swapchain;
