// Specialization constants
//
// A single fragment shader with a `LIGHTING_MODEL` constant is compiled
// into three pipelines (Phong, toon and procedural checker), drawn side by
// side. The branch on the constant is resolved when each pipeline is
// created, so none of them pays for the others' code.

use anyhow::Result;
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};
use std::sync::Arc;

use super::{shaders, FrameInfo, Sample, SampleContext};
use crate::backend::pipeline::{push_range, ENTRY_MAIN};
use crate::backend::shader::glsl_spirv;
use crate::backend::{
    Buffer, DescriptorPool, DescriptorSetLayout, DescriptorWriter, GraphicsPipelineDesc, Image,
    Pipeline, PipelineLayout, ShaderStage, SpecializationConstants, VulkanDevice,
};
use crate::graph::{columns, set_viewport, AttachmentId, OffscreenTarget, RenderPassDesc, SubpassDesc};
use crate::scene::{DrawPush, Mesh, MeshData, OrbitCamera, Vertex};

const NAME: &str = "specialization";

const LIGHTING_MODEL_ID: u32 = 0;
const TOON_BANDS_ID: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum LightingModel {
    Phong = 0,
    Toon = 1,
    Checker = 2,
}

impl LightingModel {
    pub const ALL: [LightingModel; 3] = [LightingModel::Phong, LightingModel::Toon, LightingModel::Checker];

    pub fn constants(self, toon_bands: f32) -> SpecializationConstants {
        SpecializationConstants::new()
            .add_i32(LIGHTING_MODEL_ID, self as i32)
            .add_f32(TOON_BANDS_ID, toon_bands)
    }
}

/// Static scene uniforms; the camera does not move in this sample
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct SceneBlock {
    pub view_pos: Vec4,
    pub light_pos: Vec4,
}

pub struct Specialization {
    pipelines: Vec<Pipeline>,
    layout: PipelineLayout,
    _set_layout: DescriptorSetLayout,
    _pool: DescriptorPool,
    scene_set: vk::DescriptorSet,
    _scene: Buffer,
    target: OffscreenTarget,
    output: AttachmentId,
    sphere: Mesh,
    camera: OrbitCamera,
    device: Arc<VulkanDevice>,
}

impl Specialization {
    pub fn create(ctx: &SampleContext) -> Result<Box<dyn Sample>> {
        let device = &ctx.device;

        let mut desc = RenderPassDesc::new();
        let output = desc.attachment(ctx.output_attachment());
        let depth = desc.attachment(ctx.depth_attachment());
        desc.subpass(SubpassDesc::new("scene").color(&[output]).depth(depth));
        let target = OffscreenTarget::new(device, &desc, ctx.extent)?;

        let camera = OrbitCamera::new(Vec3::ZERO, 3.2)
            .with_pitch(0.3)
            .with_rotation_speed(0.0);
        let scene = Buffer::with_data(
            device,
            "specialization scene",
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            &[SceneBlock {
                view_pos: camera.position().extend(1.0),
                light_pos: Vec4::new(2.0, 3.0, 3.0, 1.0),
            }],
        )?;

        let set_layout = DescriptorSetLayout::new(
            device,
            &[(0, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::FRAGMENT)],
        )?;
        let pool = DescriptorPool::new(device, &[&set_layout], 1)?;
        let scene_set = pool.allocate(&set_layout)?;
        DescriptorWriter::new()
            .uniform_buffer(0, scene.descriptor_info())
            .write(device, scene_set);

        let layout = PipelineLayout::new(
            device,
            &[set_layout.layout],
            &[push_range::<DrawPush>(vk::ShaderStageFlags::VERTEX)],
        )?;

        let vs = ctx.wgsl(shaders::MESH, naga::ShaderStage::Vertex, "vs_main")?;
        let fs = ctx.glsl(NAME, glsl_spirv!("specialization.frag"))?;

        // Same shaders, three sets of constants
        let toon_bands = ctx.settings.toon_bands;
        let constants: Vec<_> = LightingModel::ALL
            .iter()
            .map(|model| model.constants(toon_bands))
            .collect();
        let pipelines = constants
            .iter()
            .map(|constants| {
                GraphicsPipelineDesc::new()
                    .stage(ShaderStage::vertex(&vs, c"vs_main"))
                    .stage(ShaderStage::fragment(&fs, ENTRY_MAIN).specialized(constants))
                    .vertex_layout(Vertex::layout())
                    .build(device, &layout, target.render_pass, 0)
            })
            .collect::<Result<Vec<_>>>()?;

        let sphere = Mesh::upload(
            device,
            "sphere",
            &MeshData::uv_sphere(1.0, 48, 24, [0.85, 0.45, 0.2]),
        )?;

        Ok(Box::new(Self {
            pipelines,
            layout,
            _set_layout: set_layout,
            _pool: pool,
            scene_set,
            _scene: scene,
            target,
            output,
            sphere,
            camera,
            device: device.clone(),
        }))
    }
}

impl Sample for Specialization {
    fn record(&mut self, cmd: vk::CommandBuffer, frame: &FrameInfo) -> Result<()> {
        let device = &self.device.device;
        let model = Mat4::from_rotation_y(frame.time * 0.6) * Mat4::from_rotation_x(0.3);

        self.target.begin(cmd, 0)?;
        self.layout.bind_set(cmd, 0, self.scene_set);

        let viewports = columns(self.target.extent, self.pipelines.len() as u32);
        for (pipeline, area) in self.pipelines.iter().zip(viewports) {
            set_viewport(device, cmd, area);
            let aspect = area.extent.width as f32 / area.extent.height.max(1) as f32;

            pipeline.bind(cmd);
            self.layout
                .push(cmd, &DrawPush::new(self.camera.view_projection(aspect), model));
            self.sphere.draw(device, cmd);
        }

        self.target.end(cmd);
        Ok(())
    }

    fn output(&self) -> &Image {
        self.target.image(self.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(LightingModel::Phong, 0)]
    #[case(LightingModel::Toon, 1)]
    #[case(LightingModel::Checker, 2)]
    fn lighting_model_selects_branch(#[case] model: LightingModel, #[case] expected: i32) {
        let constants = model.constants(4.0);
        let entries = constants.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].constant_id, LIGHTING_MODEL_ID);

        let offset = entries[0].offset as usize;
        let value = i32::from_ne_bytes(constants.data()[offset..offset + 4].try_into().unwrap());
        assert_eq!(value, expected);
    }

    #[test]
    fn toon_bands_are_passed_as_float() {
        let constants = LightingModel::Toon.constants(6.0);
        let entry = constants.entries()[1];
        assert_eq!(entry.constant_id, TOON_BANDS_ID);
        assert_eq!(entry.size, 4);

        let offset = entry.offset as usize;
        let value = f32::from_ne_bytes(constants.data()[offset..offset + 4].try_into().unwrap());
        assert_eq!(value, 6.0);
    }

    #[test]
    fn scene_block_is_std140_sized() {
        assert_eq!(std::mem::size_of::<SceneBlock>(), 32);
    }
}
