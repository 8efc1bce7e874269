// Shader module loading and management
//
// Vulkan uses SPIR-V bytecode for shaders. WGSL sources are compiled at
// runtime with naga; stages WGSL cannot express (tessellation, input
// attachments, specialization constants) are GLSL compiled by build.rs.

use anyhow::{anyhow, Context, Result};
use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;

/// Compile one WGSL entry point to SPIR-V words
pub fn compile_wgsl(source: &str, stage: naga::ShaderStage, entry_point: &str) -> Result<Vec<u32>> {
    let module = naga::front::wgsl::parse_str(source)
        .map_err(|e| anyhow!("WGSL parse error: {}", e.emit_to_string(source)))?;

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    );
    let info = validator
        .validate(&module)
        .map_err(|e| anyhow!("WGSL validation error: {e}"))?;

    if !module
        .entry_points
        .iter()
        .any(|ep| ep.name == entry_point && ep.stage == stage)
    {
        anyhow::bail!("Entry point '{}' not found for stage {:?}", entry_point, stage);
    }

    // No coordinate adjustment: shaders are written for Vulkan clip space
    let options = naga::back::spv::Options {
        lang_version: (1, 0),
        flags: naga::back::spv::WriterFlags::empty(),
        ..Default::default()
    };

    let pipeline_options = naga::back::spv::PipelineOptions {
        shader_stage: stage,
        entry_point: entry_point.to_string(),
    };

    naga::back::spv::write_vec(&module, &info, &options, Some(&pipeline_options))
        .map_err(|e| anyhow!("SPIR-V generation error: {e}"))
}

/// SPIR-V bytes (glslc output) to words. An empty blob is returned as an
/// empty vector: build.rs writes one when glslc is unavailable.
pub fn spirv_words(bytes: &[u8]) -> Result<Vec<u32>> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    ash::util::read_spv(&mut std::io::Cursor::new(bytes)).context("Invalid SPIR-V blob")
}

/// Embed a GLSL shader compiled by build.rs
macro_rules! glsl_spirv {
    ($name:literal) => {
        include_bytes!(concat!(env!("OUT_DIR"), "/", $name, ".spv"))
    };
}
pub(crate) use glsl_spirv;

pub struct ShaderModule {
    pub module: vk::ShaderModule,
    device: Arc<VulkanDevice>,
}

impl ShaderModule {
    pub fn new(device: &Arc<VulkanDevice>, code: &[u32]) -> Result<Self> {
        let create_info = vk::ShaderModuleCreateInfo::default().code(code);

        let module = unsafe { device.device.create_shader_module(&create_info, None) }
            .context("Failed to create shader module")?;

        Ok(Self {
            module,
            device: device.clone(),
        })
    }

    /// Compile and load a WGSL entry point
    pub fn wgsl(
        device: &Arc<VulkanDevice>,
        source: &str,
        stage: naga::ShaderStage,
        entry_point: &str,
    ) -> Result<Self> {
        let code = compile_wgsl(source, stage, entry_point)
            .with_context(|| format!("Failed to compile WGSL entry point '{}'", entry_point))?;
        Self::new(device, &code)
    }

    /// Load glslc output; `Ok(None)` when the blob is an empty placeholder
    pub fn spirv(device: &Arc<VulkanDevice>, bytes: &[u8]) -> Result<Option<Self>> {
        let code = spirv_words(bytes)?;
        if code.is_empty() {
            return Ok(None);
        }
        Self::new(device, &code).map(Some)
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_shader_module(self.module, None) };
    }
}
