// Shader modules
//
// SPIR-V is loaded at runtime; `build.rs` compiles `shaders/` with glslc.

use ash::vk;
use std::path::Path;

use crate::error::{RenderError, Result, VkResultExt};

/// Reinterpret SPIR-V bytes as words. Copies, so the input needs no alignment.
pub fn spirv_words(code: &[u8]) -> Result<Vec<u32>> {
    if code.len() % 4 != 0 {
        return Err(RenderError::InvalidParameter(format!(
            "SPIR-V length {} is not a multiple of 4",
            code.len()
        )));
    }
    Ok(code
        .chunks_exact(4)
        .map(|word| u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
        .collect())
}

/// Create a shader module from SPIR-V bytes.
pub fn create_shader_module(device: &ash::Device, code: &[u8]) -> Result<vk::ShaderModule> {
    let words = spirv_words(code)?;
    let create_info = vk::ShaderModuleCreateInfo::builder().code(&words);
    unsafe { device.create_shader_module(&create_info, None).op("vkCreateShaderModule") }
}

/// Read a compiled `.spv` file.
pub fn read_spirv(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    let path = path.as_ref();
    std::fs::read(path).map_err(|e| RenderError::ResourceCreation {
        resource: "shader module",
        reason: format!("cannot read {}: {}", path.display(), e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_are_little_endian() {
        let bytes = [0x03, 0x02, 0x23, 0x07, 0x00, 0x00, 0x01, 0x00];
        assert_eq!(spirv_words(&bytes).unwrap(), vec![0x0723_0203, 0x0001_0000]);
    }

    #[test]
    fn rejects_truncated_code() {
        assert!(matches!(spirv_words(&[1, 2, 3]), Err(RenderError::InvalidParameter(_))));
    }
}
