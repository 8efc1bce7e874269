// =============================================================================
// SAMPLES - Registry, shared context and the per-sample contract
// =============================================================================
//
// Every sample builds its resources once in its constructor, then records
// one frame at a time into a command buffer owned by the runner. The final
// image is left in TRANSFER_SRC_OPTIMAL so it can be captured.

pub mod cubemap;
pub mod deferred;
pub mod multisampling;
pub mod offscreen;
pub mod runner;
pub mod shaders;
pub mod specialization;
pub mod subpasses;
pub mod tessellation;

use anyhow::Result;
use ash::vk;
use std::sync::Arc;
use thiserror::Error;

use crate::backend::device::clamp_sample_count;
use crate::backend::{DeviceFeature, Image, ShaderModule, VulkanDevice};
use crate::config::{Config, SamplesConfig};
use crate::graph::{AttachmentDesc, FinalUsage};

pub use runner::{FrameStats, SampleRunner};

/// Timing of the frame being recorded
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameInfo {
    pub index: u32,
    /// Frame-in-flight slot
    pub slot: usize,
    /// Seconds since the sample started
    pub time: f32,
    /// Seconds since the previous frame
    pub delta: f32,
}

pub trait Sample {
    /// CPU-side animation before recording
    fn update(&mut self, _frame: &FrameInfo) -> Result<()> {
        Ok(())
    }

    /// Record the whole frame into `cmd` (already begun)
    fn record(&mut self, cmd: vk::CommandBuffer, frame: &FrameInfo) -> Result<()>;

    /// Final color image, in TRANSFER_SRC_OPTIMAL after each frame
    fn output(&self) -> &Image;
}

#[derive(Debug, Error)]
pub enum SampleError {
    #[error("unknown sample '{name}' (available: {available})")]
    Unknown { name: String, available: String },

    #[error("sample '{sample}' requires {feature:?}, which the device does not support")]
    Unsupported {
        sample: &'static str,
        feature: DeviceFeature,
    },

    #[error("sample '{sample}' needs GLSL shaders that were not compiled; install glslc and rebuild")]
    MissingShaders { sample: &'static str },
}

/// Everything a sample constructor needs
pub struct SampleContext {
    pub device: Arc<VulkanDevice>,
    pub extent: vk::Extent2D,
    pub color_format: vk::Format,
    pub depth_format: vk::Format,
    pub clear_color: [f32; 4],
    /// Requested MSAA count, clamped to the device limit
    pub msaa_samples: vk::SampleCountFlags,
    pub anisotropy: Option<f32>,
    pub settings: SamplesConfig,
}

impl SampleContext {
    pub fn new(device: Arc<VulkanDevice>, config: &Config) -> Result<Self> {
        let depth_format = device.depth_format()?;
        let msaa_samples = clamp_sample_count(config.msaa_sample_flags(), device.max_sample_count());
        if msaa_samples != config.msaa_sample_flags() {
            log::warn!(
                "Requested {} MSAA samples, device supports at most {:?}",
                config.graphics.msaa_samples,
                msaa_samples
            );
        }
        let anisotropy = device.max_anisotropy(config.graphics.anisotropy);

        Ok(Self {
            device,
            extent: config.extent(),
            color_format: vk::Format::R8G8B8A8_UNORM,
            depth_format,
            clear_color: config.graphics.clear_color,
            msaa_samples,
            anisotropy,
            settings: config.samples.clone(),
        })
    }

    pub fn aspect(&self) -> f32 {
        self.extent.width as f32 / self.extent.height as f32
    }

    /// Captured color output of a sample
    pub fn output_attachment(&self) -> AttachmentDesc {
        AttachmentDesc::color("output", self.color_format)
            .final_usage(FinalUsage::TransferSrc)
            .clear_color(self.clear_color)
    }

    pub fn depth_attachment(&self) -> AttachmentDesc {
        AttachmentDesc::depth("depth", self.depth_format)
    }

    pub fn wgsl(&self, source: &str, stage: naga::ShaderStage, entry_point: &str) -> Result<ShaderModule> {
        ShaderModule::wgsl(&self.device, source, stage, entry_point)
    }

    /// GLSL module compiled by build.rs, or `MissingShaders` when it was not
    pub fn glsl(&self, sample: &'static str, spirv: &[u8]) -> Result<ShaderModule> {
        ShaderModule::spirv(&self.device, spirv)?
            .ok_or_else(|| SampleError::MissingShaders { sample }.into())
    }
}

type Constructor = fn(&SampleContext) -> Result<Box<dyn Sample>>;

#[derive(Debug)]
pub struct SampleEntry {
    pub name: &'static str,
    pub description: &'static str,
    /// Sample is skipped without these
    pub required: &'static [DeviceFeature],
    /// Used when available
    pub optional: &'static [DeviceFeature],
    pub create: Constructor,
}

impl SampleEntry {
    /// First required feature the device lacks
    pub fn check(&self, device: &VulkanDevice) -> Result<(), SampleError> {
        match self.required.iter().find(|&&feature| !device.supports(feature)) {
            Some(&feature) => Err(SampleError::Unsupported {
                sample: self.name,
                feature,
            }),
            None => Ok(()),
        }
    }
}

pub const SAMPLES: &[SampleEntry] = &[
    SampleEntry {
        name: "offscreen",
        description: "Mirror reflection rendered into an offscreen framebuffer",
        required: &[],
        optional: &[DeviceFeature::SamplerAnisotropy],
        create: offscreen::Offscreen::create,
    },
    SampleEntry {
        name: "deferred",
        description: "G-buffer pass followed by a fullscreen lighting pass with moving lights",
        required: &[],
        optional: &[],
        create: deferred::Deferred::create,
    },
    SampleEntry {
        name: "multisampling",
        description: "MSAA color and depth resolved into a single-sampled image",
        required: &[],
        optional: &[DeviceFeature::SampleRateShading],
        create: multisampling::Multisampling::create,
    },
    SampleEntry {
        name: "cubemap",
        description: "Procedural sky rendered into a cube map, used for a skybox and reflections",
        required: &[],
        optional: &[DeviceFeature::SamplerAnisotropy],
        create: cubemap::Cubemap::create,
    },
    SampleEntry {
        name: "subpasses",
        description: "G-buffer, composition and transparency as three subpasses of one render pass",
        required: &[],
        optional: &[],
        create: subpasses::Subpasses::create,
    },
    SampleEntry {
        name: "specialization",
        description: "One fragment shader specialized into three lighting models",
        required: &[],
        optional: &[],
        create: specialization::Specialization::create,
    },
    SampleEntry {
        name: "tessellation",
        description: "Pass-through versus PN-triangle tessellation of a coarse sphere",
        required: &[DeviceFeature::TessellationShader],
        optional: &[DeviceFeature::FillModeNonSolid],
        create: tessellation::Tessellation::create,
    },
];

pub fn available_names() -> String {
    SAMPLES
        .iter()
        .map(|entry| entry.name)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Resolve sample names in the given order; an empty list selects all
pub fn select(names: &[String]) -> Result<Vec<&'static SampleEntry>, SampleError> {
    if names.is_empty() {
        return Ok(SAMPLES.iter().collect());
    }

    let mut selected: Vec<&'static SampleEntry> = Vec::new();
    for name in names {
        let entry = SAMPLES
            .iter()
            .find(|entry| entry.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| SampleError::Unknown {
                name: name.clone(),
                available: available_names(),
            })?;
        if !selected.iter().any(|s| s.name == entry.name) {
            selected.push(entry);
        }
    }
    Ok(selected)
}

/// Device features to request for the selected samples
pub fn wanted_features(entries: &[&SampleEntry]) -> Vec<DeviceFeature> {
    let mut features = Vec::new();
    for entry in entries {
        for &feature in entry.required.iter().chain(entry.optional) {
            if !features.contains(&feature) {
                features.push(feature);
            }
        }
    }
    features
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_selection_runs_everything() {
        let selected = select(&[]).unwrap();
        assert_eq!(selected.len(), SAMPLES.len());
        assert_eq!(selected.len(), 7);
    }

    #[test]
    fn selection_keeps_order_and_drops_duplicates() {
        let names = vec![
            "cubemap".to_string(),
            "Deferred".to_string(),
            "cubemap".to_string(),
        ];
        let selected: Vec<_> = select(&names).unwrap().iter().map(|e| e.name).collect();
        assert_eq!(selected, vec!["cubemap", "deferred"]);
    }

    #[test]
    fn unknown_names_list_alternatives() {
        let err = select(&["raytracing".to_string()]).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("raytracing"));
        assert!(message.contains("tessellation"));
    }

    #[test]
    fn names_are_unique() {
        for (i, a) in SAMPLES.iter().enumerate() {
            assert!(SAMPLES[i + 1..].iter().all(|b| b.name != a.name));
        }
    }

    #[test]
    fn features_are_merged_without_duplicates() {
        let selected = select(&[
            "offscreen".to_string(),
            "cubemap".to_string(),
            "tessellation".to_string(),
        ])
        .unwrap();
        let features = wanted_features(&selected);
        assert_eq!(
            features,
            vec![
                DeviceFeature::SamplerAnisotropy,
                DeviceFeature::TessellationShader,
                DeviceFeature::FillModeNonSolid,
            ]
        );
    }

    #[test]
    fn only_tessellation_has_hard_requirements() {
        let strict: Vec<_> = SAMPLES
            .iter()
            .filter(|e| !e.required.is_empty())
            .map(|e| e.name)
            .collect();
        assert_eq!(strict, vec!["tessellation"]);
    }
}
