// Backend module - Vulkan abstraction layer
//
// Design: Thin wrapper around ash with safety and ergonomics
// Every wrapper owns its handle and destroys it on drop

pub mod buffer;
pub mod descriptor;
pub mod device;
pub mod image;
pub mod pipeline;
pub mod shader;
pub mod sync;

pub use buffer::Buffer;
pub use descriptor::{DescriptorPool, DescriptorSetLayout, DescriptorWriter};
pub use device::{DeviceFeature, VulkanDevice};
pub use image::{Image, ImageDesc, Sampler};
pub use pipeline::{
    GraphicsPipelineDesc, Pipeline, PipelineLayout, ShaderStage, SpecializationConstants,
    VertexLayout,
};
pub use shader::ShaderModule;
pub use sync::FrameSync;
