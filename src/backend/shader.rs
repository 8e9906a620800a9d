// Shader module loading
//
// Vulkan consumes SPIR-V bytecode. Modules only need to live until the
// pipeline that uses them has been created, so they come wrapped in a guard
// that destroys them on scope exit.

use ash::vk;
use std::fs::File;
use std::path::Path;

use super::error::{GpuError, GpuResult};

/// Read a SPIR-V file as 32-bit words
pub fn load_spirv(path: &Path) -> GpuResult<Vec<u32>> {
    let mut file = File::open(path).map_err(|source| GpuError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    // read_spv checks the size and magic number and fixes up alignment
    ash::util::read_spv(&mut file).map_err(|e| GpuError::pipeline("read SPIR-V", format!("{}: {}", path.display(), e)))
}

/// A shader module destroyed when dropped
pub struct ShaderModule<'a> {
    device: &'a ash::Device,
    pub module: vk::ShaderModule,
}

impl<'a> ShaderModule<'a> {
    pub fn from_file(device: &'a ash::Device, path: &Path) -> GpuResult<Self> {
        let code = load_spirv(path)?;
        let create_info = vk::ShaderModuleCreateInfo::builder().code(&code);

        let module = unsafe { device.create_shader_module(&create_info, None) }
            .map_err(|e| GpuError::pipeline("vkCreateShaderModule", format!("{}: {}", path.display(), e)))?;

        log::debug!("Loaded shader {} ({} words)", path.display(), code.len());
        Ok(Self { device, module })
    }
}

impl Drop for ShaderModule<'_> {
    fn drop(&mut self) {
        unsafe { self.device.destroy_shader_module(self.module, None) };
    }
}
