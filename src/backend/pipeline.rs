// Graphics pipeline creation and management
//
// The graphics pipeline defines how vertices are processed and rasterized.
// It includes: vertex input, shaders, tessellation, rasterization,
// multisampling, depth/stencil and blending. Viewport and scissor are
// dynamic so one pipeline serves targets of any size.

use anyhow::{Context, Result};
use ash::vk;
use bytemuck::Pod;
use std::ffi::CStr;
use std::sync::Arc;

use super::shader::ShaderModule;
use super::VulkanDevice;

// =============================================================================
// PIPELINE LAYOUT
// =============================================================================

pub struct PipelineLayout {
    pub layout: vk::PipelineLayout,
    push_stages: vk::ShaderStageFlags,
    device: Arc<VulkanDevice>,
}

/// Push-constant range for one `T` at offset 0
pub fn push_range<T: Pod>(stages: vk::ShaderStageFlags) -> vk::PushConstantRange {
    vk::PushConstantRange {
        stage_flags: stages,
        offset: 0,
        size: std::mem::size_of::<T>() as u32,
    }
}

impl PipelineLayout {
    pub fn new(
        device: &Arc<VulkanDevice>,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constants: &[vk::PushConstantRange],
    ) -> Result<Self> {
        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(set_layouts)
            .push_constant_ranges(push_constants);

        let layout = unsafe { device.device.create_pipeline_layout(&layout_info, None) }
            .context("Failed to create pipeline layout")?;

        let push_stages = push_constants
            .iter()
            .fold(vk::ShaderStageFlags::empty(), |acc, range| acc | range.stage_flags);

        Ok(Self {
            layout,
            push_stages,
            device: device.clone(),
        })
    }

    /// Push one value at offset 0 to every stage that declared push constants
    pub fn push<T: Pod>(&self, cmd: vk::CommandBuffer, value: &T) {
        unsafe {
            self.device.device.cmd_push_constants(
                cmd,
                self.layout,
                self.push_stages,
                0,
                bytemuck::bytes_of(value),
            );
        }
    }

    pub fn bind_set(&self, cmd: vk::CommandBuffer, index: u32, set: vk::DescriptorSet) {
        unsafe {
            self.device.device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.layout,
                index,
                &[set],
                &[],
            );
        }
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_pipeline_layout(self.layout, None) };
    }
}

// =============================================================================
// SPECIALIZATION CONSTANTS
// =============================================================================

/// Constant ids with their packed values
///
/// Every supported constant type is 4 bytes wide, so entries sit at
/// consecutive 4-byte offsets in insertion order.
#[derive(Debug, Clone, Default)]
pub struct SpecializationConstants {
    entries: Vec<vk::SpecializationMapEntry>,
    data: Vec<u8>,
}

impl SpecializationConstants {
    pub fn new() -> Self {
        Self::default()
    }

    fn set_raw(mut self, constant_id: u32, bytes: [u8; 4]) -> Self {
        if let Some(entry) = self.entries.iter().find(|e| e.constant_id == constant_id) {
            let offset = entry.offset as usize;
            self.data[offset..offset + 4].copy_from_slice(&bytes);
            return self;
        }

        self.entries.push(vk::SpecializationMapEntry {
            constant_id,
            offset: self.data.len() as u32,
            size: 4,
        });
        self.data.extend_from_slice(&bytes);
        self
    }

    pub fn add_u32(self, constant_id: u32, value: u32) -> Self {
        self.set_raw(constant_id, value.to_ne_bytes())
    }

    pub fn add_i32(self, constant_id: u32, value: i32) -> Self {
        self.set_raw(constant_id, value.to_ne_bytes())
    }

    pub fn add_f32(self, constant_id: u32, value: f32) -> Self {
        self.set_raw(constant_id, value.to_ne_bytes())
    }

    /// Booleans are VkBool32
    pub fn add_bool(self, constant_id: u32, value: bool) -> Self {
        let value = if value { vk::TRUE } else { vk::FALSE };
        self.set_raw(constant_id, value.to_ne_bytes())
    }

    pub fn entries(&self) -> &[vk::SpecializationMapEntry] {
        &self.entries
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn info(&self) -> vk::SpecializationInfo<'_> {
        vk::SpecializationInfo::default()
            .map_entries(&self.entries)
            .data(&self.data)
    }
}

// =============================================================================
// VERTEX INPUT
// =============================================================================

/// Single interleaved vertex binding
#[derive(Debug, Clone)]
pub struct VertexLayout {
    pub stride: u32,
    /// (location, format, offset)
    pub attributes: Vec<(u32, vk::Format, u32)>,
}

impl VertexLayout {
    pub fn bindings(&self) -> [vk::VertexInputBindingDescription; 1] {
        [vk::VertexInputBindingDescription {
            binding: 0,
            stride: self.stride,
            input_rate: vk::VertexInputRate::VERTEX,
        }]
    }

    pub fn attribute_descriptions(&self) -> Vec<vk::VertexInputAttributeDescription> {
        self.attributes
            .iter()
            .map(|&(location, format, offset)| vk::VertexInputAttributeDescription {
                location,
                binding: 0,
                format,
                offset,
            })
            .collect()
    }
}

// =============================================================================
// GRAPHICS PIPELINE
// =============================================================================

pub const ENTRY_MAIN: &CStr = c"main";

/// One programmable stage
#[derive(Clone, Copy)]
pub struct ShaderStage<'a> {
    pub stage: vk::ShaderStageFlags,
    pub module: &'a ShaderModule,
    pub entry: &'a CStr,
    pub specialization: Option<&'a SpecializationConstants>,
}

impl<'a> ShaderStage<'a> {
    pub fn new(stage: vk::ShaderStageFlags, module: &'a ShaderModule, entry: &'a CStr) -> Self {
        Self {
            stage,
            module,
            entry,
            specialization: None,
        }
    }

    pub fn vertex(module: &'a ShaderModule, entry: &'a CStr) -> Self {
        Self::new(vk::ShaderStageFlags::VERTEX, module, entry)
    }

    pub fn fragment(module: &'a ShaderModule, entry: &'a CStr) -> Self {
        Self::new(vk::ShaderStageFlags::FRAGMENT, module, entry)
    }

    pub fn specialized(mut self, constants: &'a SpecializationConstants) -> Self {
        self.specialization = Some(constants);
        self
    }
}

/// Check that the stage set and topology agree with each other
pub fn check_stages(stages: vk::ShaderStageFlags, topology: vk::PrimitiveTopology) -> Result<()> {
    if !stages.contains(vk::ShaderStageFlags::VERTEX) {
        anyhow::bail!("Graphics pipeline needs a vertex stage");
    }

    let tessellation = vk::ShaderStageFlags::TESSELLATION_CONTROL
        | vk::ShaderStageFlags::TESSELLATION_EVALUATION;
    let has_tessellation = stages.intersects(tessellation);

    if has_tessellation && !stages.contains(tessellation) {
        anyhow::bail!("Tessellation needs both control and evaluation stages");
    }
    if has_tessellation != (topology == vk::PrimitiveTopology::PATCH_LIST) {
        anyhow::bail!("Patch list topology and tessellation stages must be used together");
    }
    Ok(())
}

/// Fixed-function state plus stages for one pipeline
#[derive(Clone)]
pub struct GraphicsPipelineDesc<'a> {
    stages: Vec<ShaderStage<'a>>,
    vertex_layout: Option<VertexLayout>,
    topology: vk::PrimitiveTopology,
    patch_control_points: u32,
    polygon_mode: vk::PolygonMode,
    cull_mode: vk::CullModeFlags,
    front_face: vk::FrontFace,
    depth_test: bool,
    depth_write: bool,
    depth_compare: vk::CompareOp,
    color_attachments: u32,
    alpha_blend: bool,
    samples: vk::SampleCountFlags,
    min_sample_shading: Option<f32>,
}

impl<'a> Default for GraphicsPipelineDesc<'a> {
    fn default() -> Self {
        Self {
            stages: Vec::new(),
            vertex_layout: None,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            patch_control_points: 0,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_test: true,
            depth_write: true,
            depth_compare: vk::CompareOp::LESS, // Closer objects win
            color_attachments: 1,
            alpha_blend: false,
            samples: vk::SampleCountFlags::TYPE_1,
            min_sample_shading: None,
        }
    }
}

impl<'a> GraphicsPipelineDesc<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(mut self, stage: ShaderStage<'a>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn vertex_layout(mut self, layout: VertexLayout) -> Self {
        self.vertex_layout = Some(layout);
        self
    }

    /// Patch list with the given number of control points
    pub fn patches(mut self, control_points: u32) -> Self {
        self.topology = vk::PrimitiveTopology::PATCH_LIST;
        self.patch_control_points = control_points;
        self
    }

    pub fn polygon_mode(mut self, mode: vk::PolygonMode) -> Self {
        self.polygon_mode = mode;
        self
    }

    pub fn cull_mode(mut self, mode: vk::CullModeFlags) -> Self {
        self.cull_mode = mode;
        self
    }

    pub fn front_face(mut self, face: vk::FrontFace) -> Self {
        self.front_face = face;
        self
    }

    pub fn depth(mut self, test: bool, write: bool) -> Self {
        self.depth_test = test;
        self.depth_write = write;
        self
    }

    pub fn depth_compare(mut self, op: vk::CompareOp) -> Self {
        self.depth_compare = op;
        self
    }

    pub fn color_attachments(mut self, count: u32) -> Self {
        self.color_attachments = count;
        self
    }

    /// Standard src-alpha / one-minus-src-alpha blending on every attachment
    pub fn alpha_blend(mut self) -> Self {
        self.alpha_blend = true;
        self
    }

    pub fn samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
        self
    }

    pub fn sample_shading(mut self, min_fraction: f32) -> Self {
        self.min_sample_shading = Some(min_fraction);
        self
    }

    fn blend_attachment(&self) -> vk::PipelineColorBlendAttachmentState {
        let state = vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA);
        if !self.alpha_blend {
            return state.blend_enable(false);
        }
        state
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .alpha_blend_op(vk::BlendOp::ADD)
    }

    pub fn build(
        &self,
        device: &Arc<VulkanDevice>,
        layout: &PipelineLayout,
        render_pass: vk::RenderPass,
        subpass: u32,
    ) -> Result<Pipeline> {
        let stage_flags = self
            .stages
            .iter()
            .fold(vk::ShaderStageFlags::empty(), |acc, s| acc | s.stage);
        check_stages(stage_flags, self.topology)?;

        // Shader stages (specialization infos must outlive the create infos)
        let specialization_infos: Vec<Option<vk::SpecializationInfo>> = self
            .stages
            .iter()
            .map(|s| s.specialization.map(|constants| constants.info()))
            .collect();

        let shader_stages: Vec<_> = self
            .stages
            .iter()
            .zip(&specialization_infos)
            .map(|(stage, specialization)| {
                let info = vk::PipelineShaderStageCreateInfo::default()
                    .stage(stage.stage)
                    .module(stage.module.module)
                    .name(stage.entry);
                match specialization {
                    Some(specialization) => info.specialization_info(specialization),
                    None => info,
                }
            })
            .collect();

        // Vertex input (none for fullscreen passes)
        let bindings = self.vertex_layout.as_ref().map(|l| l.bindings());
        let attributes = self
            .vertex_layout
            .as_ref()
            .map(|l| l.attribute_descriptions())
            .unwrap_or_default();
        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(bindings.as_ref().map_or(&[][..], |b| &b[..]))
            .vertex_attribute_descriptions(&attributes);

        // Input assembly
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(self.topology)
            .primitive_restart_enable(false);

        let tessellation_state = vk::PipelineTessellationStateCreateInfo::default()
            .patch_control_points(self.patch_control_points);

        // Viewport and scissor are set while recording
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        // Rasterization
        let rasterizer = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(self.polygon_mode)
            .line_width(1.0)
            .cull_mode(self.cull_mode)
            .front_face(self.front_face)
            .depth_bias_enable(false);

        // Multisampling
        let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(self.min_sample_shading.is_some())
            .min_sample_shading(self.min_sample_shading.unwrap_or(0.0))
            .rasterization_samples(self.samples);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(self.depth_test)
            .depth_write_enable(self.depth_write)
            .depth_compare_op(self.depth_compare)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let color_blend_attachments = vec![self.blend_attachment(); self.color_attachments as usize];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let mut pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout.layout)
            .render_pass(render_pass)
            .subpass(subpass);

        if self.topology == vk::PrimitiveTopology::PATCH_LIST {
            pipeline_info = pipeline_info.tessellation_state(&tessellation_state);
        }

        let pipelines = unsafe {
            device
                .device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
                .map_err(|(_, e)| e)
                .context("Failed to create graphics pipeline")?
        };

        let pipeline = pipelines
            .into_iter()
            .next()
            .context("Driver returned no pipeline")?;

        Ok(Pipeline {
            pipeline,
            device: device.clone(),
        })
    }
}

pub struct Pipeline {
    pub pipeline: vk::Pipeline,
    device: Arc<VulkanDevice>,
}

impl Pipeline {
    pub fn bind(&self, cmd: vk::CommandBuffer) {
        unsafe {
            self.device
                .device
                .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline)
        };
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_pipeline(self.pipeline, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn constants_pack_at_consecutive_offsets() {
        let constants = SpecializationConstants::new()
            .add_i32(0, 2)
            .add_f32(1, 4.0)
            .add_bool(5, true);

        let offsets: Vec<_> = constants.entries().iter().map(|e| (e.constant_id, e.offset, e.size)).collect();
        assert_eq!(offsets, vec![(0, 0, 4), (1, 4, 4), (5, 8, 4)]);
        assert_eq!(constants.data().len(), 12);
        assert_eq!(&constants.data()[4..8], &4.0f32.to_ne_bytes());
        assert_eq!(&constants.data()[8..12], &1u32.to_ne_bytes());
    }

    #[test]
    fn re_adding_an_id_replaces_its_value() {
        let constants = SpecializationConstants::new()
            .add_u32(3, 1)
            .add_u32(4, 7)
            .add_u32(3, 9);

        assert_eq!(constants.entries().len(), 2);
        assert_eq!(&constants.data()[0..4], &9u32.to_ne_bytes());
        assert_eq!(&constants.data()[4..8], &7u32.to_ne_bytes());
    }

    #[test]
    fn info_points_at_packed_data() {
        let constants = SpecializationConstants::new().add_f32(0, 3.0);
        let info = constants.info();
        assert_eq!(info.map_entry_count, 1);
        assert_eq!(info.data_size, 4);
    }

    #[test]
    fn vertex_layout_uses_binding_zero() {
        let layout = VertexLayout {
            stride: 20,
            attributes: vec![(0, vk::Format::R32G32B32_SFLOAT, 0), (1, vk::Format::R32G32_SFLOAT, 12)],
        };
        assert_eq!(layout.bindings()[0].stride, 20);
        let attributes = layout.attribute_descriptions();
        assert_eq!(attributes[1].location, 1);
        assert_eq!(attributes[1].offset, 12);
        assert!(attributes.iter().all(|a| a.binding == 0));
    }

    #[test]
    fn push_range_matches_type_size() {
        let range = push_range::<[f32; 32]>(vk::ShaderStageFlags::VERTEX);
        assert_eq!(range.size, 128);
        assert_eq!(range.offset, 0);
    }

    const VS: vk::ShaderStageFlags = vk::ShaderStageFlags::VERTEX;
    const FS: vk::ShaderStageFlags = vk::ShaderStageFlags::FRAGMENT;
    const TC: vk::ShaderStageFlags = vk::ShaderStageFlags::TESSELLATION_CONTROL;
    const TE: vk::ShaderStageFlags = vk::ShaderStageFlags::TESSELLATION_EVALUATION;

    #[rstest]
    #[case::plain(VS.as_raw() | FS.as_raw(), vk::PrimitiveTopology::TRIANGLE_LIST, true)]
    #[case::tessellated(VS.as_raw() | TC.as_raw() | TE.as_raw() | FS.as_raw(), vk::PrimitiveTopology::PATCH_LIST, true)]
    #[case::no_vertex(FS.as_raw(), vk::PrimitiveTopology::TRIANGLE_LIST, false)]
    #[case::patches_without_tessellation(VS.as_raw() | FS.as_raw(), vk::PrimitiveTopology::PATCH_LIST, false)]
    #[case::tessellation_without_patches(VS.as_raw() | TC.as_raw() | TE.as_raw(), vk::PrimitiveTopology::TRIANGLE_LIST, false)]
    #[case::control_only(VS.as_raw() | TC.as_raw(), vk::PrimitiveTopology::PATCH_LIST, false)]
    fn stage_sets_are_checked(
        #[case] stages: u32,
        #[case] topology: vk::PrimitiveTopology,
        #[case] ok: bool,
    ) {
        let stages = vk::ShaderStageFlags::from_raw(stages);
        assert_eq!(check_stages(stages, topology).is_ok(), ok);
    }
}
