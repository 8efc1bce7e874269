// Deferred shading
//
// The geometry pass writes albedo, normal and position into a G-buffer
// target whose images end up shader-readable. A second target runs one
// fullscreen triangle that lights every pixel from the G-buffer.

use anyhow::Result;
use ash::vk;
use glam::{Mat4, Vec3};
use std::sync::Arc;

use super::{shaders, FrameInfo, Sample, SampleContext};
use crate::backend::pipeline::push_range;
use crate::backend::{
    Buffer, DescriptorPool, DescriptorSetLayout, DescriptorWriter, GraphicsPipelineDesc, Image,
    Pipeline, PipelineLayout, Sampler, ShaderStage, VulkanDevice,
};
use crate::graph::{AttachmentDesc, AttachmentId, FinalUsage, OffscreenTarget, RenderPassDesc, SubpassDesc};
use crate::scene::{CompositionPush, DrawPush, LightBlock, Mesh, MeshData, OrbitCamera, Vertex};

pub const NORMAL_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;
pub const POSITION_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;

/// G-buffer normal; the cleared w = 0 marks background pixels for the
/// lighting pass
pub fn normal_attachment() -> AttachmentDesc {
    AttachmentDesc::color("normal", NORMAL_FORMAT).clear_color([0.0; 4])
}

/// Attachment ids of the G-buffer pass
#[derive(Debug, Clone, Copy)]
pub struct GbufferAttachments {
    pub albedo: AttachmentId,
    pub normal: AttachmentId,
    pub position: AttachmentId,
    pub depth: AttachmentId,
}

/// Geometry pass whose color attachments end up shader-readable
pub fn gbuffer_layout(
    albedo_format: vk::Format,
    background: [f32; 4],
    depth: AttachmentDesc,
) -> (RenderPassDesc, GbufferAttachments) {
    let mut desc = RenderPassDesc::new();
    let ids = GbufferAttachments {
        albedo: desc.attachment(
            AttachmentDesc::color("albedo", albedo_format)
                .final_usage(FinalUsage::Sampled)
                .clear_color(background),
        ),
        normal: desc.attachment(normal_attachment().final_usage(FinalUsage::Sampled)),
        position: desc.attachment(
            AttachmentDesc::color("position", POSITION_FORMAT).final_usage(FinalUsage::Sampled),
        ),
        depth: desc.attachment(depth),
    };
    desc.subpass(
        SubpassDesc::new("geometry")
            .color(&[ids.albedo, ids.normal, ids.position])
            .depth(ids.depth),
    );
    (desc, ids)
}

/// Scene shared by the deferred samples: a floor and a grid of objects
pub(crate) struct LitScene {
    pub floor: Mesh,
    pub cube: Mesh,
    pub sphere: Mesh,
}

impl LitScene {
    pub fn upload(device: &Arc<VulkanDevice>) -> Result<Self> {
        Ok(Self {
            floor: Mesh::upload(device, "floor", &MeshData::plane(12.0, 8, [0.7, 0.7, 0.7]))?,
            cube: Mesh::upload(device, "cube", &MeshData::cube(0.8, [0.85, 0.8, 0.75]))?,
            sphere: Mesh::upload(device, "sphere", &MeshData::uv_sphere(0.45, 32, 16, [0.9, 0.9, 0.9]))?,
        })
    }

    /// Opaque objects with their transforms at `time`
    pub fn objects(&self, time: f32) -> Vec<(&Mesh, Mat4)> {
        let mut objects = vec![(&self.floor, Mat4::IDENTITY)];
        for x in -1..=1 {
            for z in -1..=1 {
                let position = Vec3::new(x as f32 * 2.2, 0.0, z as f32 * 2.2);
                if (x + z) % 2 == 0 {
                    let spin = Mat4::from_rotation_y(time * 0.5 + (x * 3 + z) as f32);
                    objects.push((
                        &self.cube,
                        Mat4::from_translation(position + Vec3::Y * 0.4) * spin,
                    ));
                } else {
                    objects.push((&self.sphere, Mat4::from_translation(position + Vec3::Y * 0.45)));
                }
            }
        }
        objects
    }
}

pub struct Deferred {
    gbuffer_pipeline: Pipeline,
    composition_pipeline: Pipeline,
    gbuffer_layout: PipelineLayout,
    composition_layout: PipelineLayout,
    _set_layout: DescriptorSetLayout,
    _pool: DescriptorPool,
    composition_set: vk::DescriptorSet,
    _sampler: Sampler,
    _lights: Buffer,
    gbuffer: OffscreenTarget,
    composition: OffscreenTarget,
    output: AttachmentId,
    scene: LitScene,
    camera: OrbitCamera,
    aspect: f32,
    device: Arc<VulkanDevice>,
}

impl Deferred {
    pub fn create(ctx: &SampleContext) -> Result<Box<dyn Sample>> {
        let device = &ctx.device;

        // Step 1: G-buffer, sampled by the composition pass
        let (gbuffer_desc, ids) =
            gbuffer_layout(ctx.color_format, ctx.clear_color, ctx.depth_attachment());
        let GbufferAttachments {
            albedo,
            normal,
            position,
            ..
        } = ids;
        let gbuffer = OffscreenTarget::new(device, &gbuffer_desc, ctx.extent)?;

        let mut composition_desc = RenderPassDesc::new();
        let output = composition_desc.attachment(ctx.output_attachment());
        composition_desc.subpass(SubpassDesc::new("composition").color(&[output]));
        let composition = OffscreenTarget::new(device, &composition_desc, ctx.extent)?;

        // Step 2: Lights and G-buffer bindings
        let light_block = LightBlock::demo(ctx.settings.light_count);
        let lights = Buffer::with_data(
            device,
            "deferred lights",
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            &[light_block],
        )?;
        log::debug!("Deferred lighting with {} lights", light_block.count());

        let set_layout = DescriptorSetLayout::new(
            device,
            &[
                (0, vk::DescriptorType::SAMPLED_IMAGE, vk::ShaderStageFlags::FRAGMENT),
                (1, vk::DescriptorType::SAMPLED_IMAGE, vk::ShaderStageFlags::FRAGMENT),
                (2, vk::DescriptorType::SAMPLED_IMAGE, vk::ShaderStageFlags::FRAGMENT),
                (3, vk::DescriptorType::SAMPLER, vk::ShaderStageFlags::FRAGMENT),
                (4, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::FRAGMENT),
            ],
        )?;
        let pool = DescriptorPool::new(device, &[&set_layout], 1)?;
        let composition_set = pool.allocate(&set_layout)?;
        // Same resolution as the output, so texel fetches stay exact
        let sampler = Sampler::new(device, vk::SamplerAddressMode::CLAMP_TO_EDGE, None)?;
        DescriptorWriter::new()
            .sampled_image(0, gbuffer.image(albedo).view)
            .sampled_image(1, gbuffer.image(normal).view)
            .sampled_image(2, gbuffer.image(position).view)
            .sampler(3, sampler.sampler)
            .uniform_buffer(4, lights.descriptor_info())
            .write(device, composition_set);

        // Step 3: Pipelines
        let gbuffer_layout = PipelineLayout::new(
            device,
            &[],
            &[push_range::<DrawPush>(vk::ShaderStageFlags::VERTEX)],
        )?;
        let composition_layout = PipelineLayout::new(
            device,
            &[set_layout.layout],
            &[push_range::<CompositionPush>(vk::ShaderStageFlags::FRAGMENT)],
        )?;

        let gbuffer_vs = ctx.wgsl(shaders::GBUFFER, naga::ShaderStage::Vertex, "vs_main")?;
        let gbuffer_fs = ctx.wgsl(shaders::GBUFFER, naga::ShaderStage::Fragment, "fs_main")?;
        let fullscreen_vs = ctx.wgsl(shaders::COMPOSITION, naga::ShaderStage::Vertex, "vs_fullscreen")?;
        let composition_fs = ctx.wgsl(shaders::COMPOSITION, naga::ShaderStage::Fragment, "fs_main")?;

        let gbuffer_pipeline = GraphicsPipelineDesc::new()
            .stage(ShaderStage::vertex(&gbuffer_vs, c"vs_main"))
            .stage(ShaderStage::fragment(&gbuffer_fs, c"fs_main"))
            .vertex_layout(Vertex::layout())
            .color_attachments(3)
            .build(device, &gbuffer_layout, gbuffer.render_pass, 0)?;

        let composition_pipeline = GraphicsPipelineDesc::new()
            .stage(ShaderStage::vertex(&fullscreen_vs, c"vs_fullscreen"))
            .stage(ShaderStage::fragment(&composition_fs, c"fs_main"))
            .cull_mode(vk::CullModeFlags::NONE)
            .depth(false, false)
            .build(device, &composition_layout, composition.render_pass, 0)?;

        Ok(Box::new(Self {
            gbuffer_pipeline,
            composition_pipeline,
            gbuffer_layout,
            composition_layout,
            _set_layout: set_layout,
            _pool: pool,
            composition_set,
            _sampler: sampler,
            _lights: lights,
            gbuffer,
            composition,
            output,
            scene: LitScene::upload(device)?,
            camera: OrbitCamera::new(Vec3::ZERO, 9.0)
                .with_pitch(0.6)
                .with_rotation_speed(0.15),
            aspect: ctx.aspect(),
            device: device.clone(),
        }))
    }
}

impl Sample for Deferred {
    fn update(&mut self, frame: &FrameInfo) -> Result<()> {
        self.camera.update(frame.delta);
        Ok(())
    }

    fn record(&mut self, cmd: vk::CommandBuffer, frame: &FrameInfo) -> Result<()> {
        let device = &self.device.device;
        let view_proj = self.camera.view_projection(self.aspect);

        // Pass 1: G-buffer
        self.gbuffer.begin(cmd, 0)?;
        self.gbuffer_pipeline.bind(cmd);
        for (mesh, model) in self.scene.objects(frame.time) {
            self.gbuffer_layout.push(cmd, &DrawPush::new(view_proj, model));
            mesh.draw(device, cmd);
        }
        self.gbuffer.end(cmd);

        // Pass 2: lighting
        self.composition.begin(cmd, 0)?;
        self.composition_pipeline.bind(cmd);
        self.composition_layout.bind_set(cmd, 0, self.composition_set);
        self.composition_layout
            .push(cmd, &CompositionPush::new(self.camera.position(), frame.time));
        unsafe { device.cmd_draw(cmd, 3, 1, 0, 0) };
        self.composition.end(cmd);

        Ok(())
    }

    fn output(&self) -> &Image {
        self.composition.image(self.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ClearValue;

    const BACKGROUND: [f32; 4] = [0.1, 0.2, 0.3, 1.0];

    fn layout() -> (RenderPassDesc, GbufferAttachments) {
        gbuffer_layout(
            vk::Format::R8G8B8A8_UNORM,
            BACKGROUND,
            AttachmentDesc::depth("depth", vk::Format::D32_SFLOAT),
        )
    }

    #[test]
    fn gbuffer_formats() {
        let (desc, ids) = layout();
        assert_eq!(desc.get(ids.albedo).unwrap().format, vk::Format::R8G8B8A8_UNORM);
        assert_eq!(desc.get(ids.normal).unwrap().format, NORMAL_FORMAT);
        assert_eq!(desc.get(ids.position).unwrap().format, POSITION_FORMAT);
        assert_eq!(desc.get(ids.depth).unwrap().format, vk::Format::D32_SFLOAT);
    }

    #[test]
    fn color_attachments_are_sampled_afterwards() {
        let (desc, ids) = layout();
        for id in [ids.albedo, ids.normal, ids.position] {
            assert_eq!(desc.get(id).unwrap().final_usage, FinalUsage::Sampled);
        }
        let compiled = desc.compile().unwrap();
        for id in [ids.albedo, ids.normal, ids.position] {
            assert_eq!(
                compiled.attachments[id.0].final_layout,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
            );
        }
    }

    #[test]
    fn background_keeps_albedo_and_has_no_normal() {
        let (desc, ids) = layout();
        let compiled = desc.compile().unwrap();

        assert_eq!(compiled.clear_values[ids.albedo.0], ClearValue::Color(BACKGROUND));
        match compiled.clear_values[ids.normal.0] {
            ClearValue::Color(normal) => assert!(normal[3] < 0.5),
            other => panic!("normal clears to {:?}", other),
        }
    }
}
