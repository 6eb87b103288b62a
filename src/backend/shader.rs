// Shader module loading
//
// Vulkan consumes SPIR-V bytecode; build.rs compiles the GLSL sources and the
// renderer loads the result from disk at startup.

use anyhow::{Context, Result};
use ash::vk;
use std::io::Cursor;
use std::path::Path;

use super::VulkanDevice;

/// Create a shader module from SPIR-V bytes
pub fn create_shader_module(device: &VulkanDevice, code: &[u8]) -> Result<vk::ShaderModule> {
    // read_spv copies into u32 words, so unaligned input is fine
    let words = ash::util::read_spv(&mut Cursor::new(code)).context("Invalid SPIR-V")?;

    let create_info = vk::ShaderModuleCreateInfo::builder().code(&words);

    unsafe {
        device
            .device
            .create_shader_module(&create_info, None)
            .context("Failed to create shader module")
    }
}

pub fn load_shader_module<P: AsRef<Path>>(device: &VulkanDevice, path: P) -> Result<vk::ShaderModule> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read shader {:?} (is glslc installed?)", path))?;
    log::debug!("Loaded shader {:?} ({} bytes)", path, bytes.len());
    create_shader_module(device, &bytes)
}

