// Subpasses: deferred shading inside a single render pass
//
// Subpass 0 fills the G-buffer, subpass 1 lights it by reading the G-buffer
// through input attachments, and subpass 2 blends transparent geometry over
// the result against the G-buffer's depth. The G-buffer never leaves tile
// memory on hardware that supports it.

use anyhow::Result;
use ash::vk;
use glam::{Mat4, Vec3};
use std::sync::Arc;

use super::deferred::{normal_attachment, LitScene, POSITION_FORMAT};
use super::{shaders, FrameInfo, Sample, SampleContext};
use crate::backend::pipeline::{push_range, ENTRY_MAIN};
use crate::backend::shader::glsl_spirv;
use crate::backend::{
    Buffer, DescriptorPool, DescriptorSetLayout, DescriptorWriter, GraphicsPipelineDesc, Image,
    Pipeline, PipelineLayout, ShaderStage, VulkanDevice,
};
use crate::graph::{
    AttachmentDesc, AttachmentId, FinalUsage, OffscreenTarget, RenderPassDesc, SubpassDesc,
};
use crate::scene::{CompositionPush, DrawPush, LightBlock, Mesh, MeshData, OrbitCamera, Vertex};

const NAME: &str = "subpasses";

pub const GBUFFER_SUBPASS: u32 = 0;
pub const COMPOSITION_SUBPASS: u32 = 1;
pub const TRANSPARENT_SUBPASS: u32 = 2;

/// Attachment ids of the three-subpass layout
#[derive(Debug, Clone, Copy)]
pub struct SubpassAttachments {
    pub output: AttachmentId,
    pub albedo: AttachmentId,
    pub normal: AttachmentId,
    pub position: AttachmentId,
    pub depth: AttachmentId,
}

/// G-buffer, composition and transparency sharing one depth buffer
pub fn subpass_layout(output: AttachmentDesc, depth: AttachmentDesc) -> (RenderPassDesc, SubpassAttachments) {
    let mut desc = RenderPassDesc::new();
    let ids = SubpassAttachments {
        output: desc.attachment(output.clone()),
        // Background pixels show the albedo clear color
        albedo: desc.attachment(AttachmentDesc {
            name: "albedo".to_string(),
            ..output.final_usage(FinalUsage::Attachment)
        }),
        normal: desc.attachment(normal_attachment()),
        position: desc.attachment(AttachmentDesc::color("position", POSITION_FORMAT)),
        depth: desc.attachment(depth),
    };

    desc.subpass(
        SubpassDesc::new("gbuffer")
            .color(&[ids.albedo, ids.normal, ids.position])
            .depth(ids.depth),
    );
    desc.subpass(
        SubpassDesc::new("composition")
            .color(&[ids.output])
            .inputs(&[ids.albedo, ids.normal, ids.position]),
    );
    desc.subpass(
        SubpassDesc::new("transparent")
            .color(&[ids.output])
            .depth(ids.depth),
    );
    (desc, ids)
}

pub struct Subpasses {
    gbuffer_pipeline: Pipeline,
    composition_pipeline: Pipeline,
    transparent_pipeline: Pipeline,
    mesh_layout: PipelineLayout,
    composition_layout: PipelineLayout,
    _set_layout: DescriptorSetLayout,
    _pool: DescriptorPool,
    composition_set: vk::DescriptorSet,
    _lights: Buffer,
    target: OffscreenTarget,
    output: AttachmentId,
    scene: LitScene,
    glass: Mesh,
    camera: OrbitCamera,
    aspect: f32,
    device: Arc<VulkanDevice>,
}

impl Subpasses {
    pub fn create(ctx: &SampleContext) -> Result<Box<dyn Sample>> {
        let device = &ctx.device;

        // Step 1: One render pass, three subpasses
        let (desc, ids) = subpass_layout(ctx.output_attachment(), ctx.depth_attachment());
        let target = OffscreenTarget::new(device, &desc, ctx.extent)?;

        // Step 2: Input attachments and lights for the composition subpass
        let lights = Buffer::with_data(
            device,
            "subpass lights",
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            &[LightBlock::demo(ctx.settings.light_count)],
        )?;

        let set_layout = DescriptorSetLayout::new(
            device,
            &[
                (0, vk::DescriptorType::INPUT_ATTACHMENT, vk::ShaderStageFlags::FRAGMENT),
                (1, vk::DescriptorType::INPUT_ATTACHMENT, vk::ShaderStageFlags::FRAGMENT),
                (2, vk::DescriptorType::INPUT_ATTACHMENT, vk::ShaderStageFlags::FRAGMENT),
                (3, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::FRAGMENT),
            ],
        )?;
        let pool = DescriptorPool::new(device, &[&set_layout], 1)?;
        let composition_set = pool.allocate(&set_layout)?;
        let read_layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
        DescriptorWriter::new()
            .input_attachment(0, target.image(ids.albedo).view, read_layout)
            .input_attachment(1, target.image(ids.normal).view, read_layout)
            .input_attachment(2, target.image(ids.position).view, read_layout)
            .uniform_buffer(3, lights.descriptor_info())
            .write(device, composition_set);

        // Step 3: One pipeline per subpass
        let mesh_layout = PipelineLayout::new(
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
        // WGSL has no input attachments
        let composition_fs = ctx.glsl(NAME, glsl_spirv!("subpass_composition.frag"))?;
        let mesh_vs = ctx.wgsl(shaders::MESH, naga::ShaderStage::Vertex, "vs_main")?;
        let glass_fs = ctx.wgsl(shaders::MESH, naga::ShaderStage::Fragment, "fs_glass")?;

        let gbuffer_pipeline = GraphicsPipelineDesc::new()
            .stage(ShaderStage::vertex(&gbuffer_vs, c"vs_main"))
            .stage(ShaderStage::fragment(&gbuffer_fs, c"fs_main"))
            .vertex_layout(Vertex::layout())
            .color_attachments(3)
            .build(device, &mesh_layout, target.render_pass, GBUFFER_SUBPASS)?;

        let composition_pipeline = GraphicsPipelineDesc::new()
            .stage(ShaderStage::vertex(&fullscreen_vs, c"vs_fullscreen"))
            .stage(ShaderStage::fragment(&composition_fs, ENTRY_MAIN))
            .cull_mode(vk::CullModeFlags::NONE)
            .depth(false, false)
            .build(device, &composition_layout, target.render_pass, COMPOSITION_SUBPASS)?;

        // Tested against the G-buffer depth but never written
        let transparent_pipeline = GraphicsPipelineDesc::new()
            .stage(ShaderStage::vertex(&mesh_vs, c"vs_main"))
            .stage(ShaderStage::fragment(&glass_fs, c"fs_glass"))
            .vertex_layout(Vertex::layout())
            .depth(true, false)
            .alpha_blend()
            .build(device, &mesh_layout, target.render_pass, TRANSPARENT_SUBPASS)?;

        let glass = Mesh::upload(device, "glass", &MeshData::cube(1.2, [0.4, 0.8, 1.0]))?;

        Ok(Box::new(Self {
            gbuffer_pipeline,
            composition_pipeline,
            transparent_pipeline,
            mesh_layout,
            composition_layout,
            _set_layout: set_layout,
            _pool: pool,
            composition_set,
            _lights: lights,
            target,
            output: ids.output,
            scene: LitScene::upload(device)?,
            glass,
            camera: OrbitCamera::new(Vec3::ZERO, 9.0)
                .with_pitch(0.6)
                .with_rotation_speed(0.15),
            aspect: ctx.aspect(),
            device: device.clone(),
        }))
    }

    /// Glass blocks between the grid cells
    fn glass_models(time: f32) -> [Mat4; 2] {
        let bob = (time * 1.5).sin() * 0.2;
        [
            Mat4::from_translation(Vec3::new(-1.1, 1.4 + bob, 1.1)),
            Mat4::from_translation(Vec3::new(1.1, 1.4 - bob, -1.1)),
        ]
    }
}

impl Sample for Subpasses {
    fn update(&mut self, frame: &FrameInfo) -> Result<()> {
        self.camera.update(frame.delta);
        Ok(())
    }

    fn record(&mut self, cmd: vk::CommandBuffer, frame: &FrameInfo) -> Result<()> {
        let device = &self.device.device;
        let view_proj = self.camera.view_projection(self.aspect);

        self.target.begin(cmd, 0)?;

        // Subpass 0: G-buffer
        self.gbuffer_pipeline.bind(cmd);
        for (mesh, model) in self.scene.objects(frame.time) {
            self.mesh_layout.push(cmd, &DrawPush::new(view_proj, model));
            mesh.draw(device, cmd);
        }

        // Subpass 1: lighting from input attachments
        self.target.next_subpass(cmd);
        self.composition_pipeline.bind(cmd);
        self.composition_layout.bind_set(cmd, 0, self.composition_set);
        self.composition_layout
            .push(cmd, &CompositionPush::new(self.camera.position(), frame.time));
        unsafe { device.cmd_draw(cmd, 3, 1, 0, 0) };

        // Subpass 2: transparent objects
        self.target.next_subpass(cmd);
        self.transparent_pipeline.bind(cmd);
        for model in Self::glass_models(frame.time) {
            self.mesh_layout.push(cmd, &DrawPush::new(view_proj, model));
            self.glass.draw(device, cmd);
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
    use crate::graph::ClearValue;

    fn layout() -> (RenderPassDesc, SubpassAttachments) {
        subpass_layout(
            AttachmentDesc::color("output", vk::Format::R8G8B8A8_UNORM)
                .final_usage(FinalUsage::TransferSrc)
                .clear_color([0.0, 0.0, 0.2, 1.0]),
            AttachmentDesc::depth("depth", vk::Format::D32_SFLOAT),
        )
    }

    #[test]
    fn layout_compiles_with_subpass_chain() {
        let (desc, _) = layout();
        let compiled = desc.compile().unwrap();

        assert_eq!(compiled.subpasses.len(), 3);
        assert!(compiled
            .dependency(GBUFFER_SUBPASS, COMPOSITION_SUBPASS)
            .is_some());
        assert!(compiled
            .dependency(COMPOSITION_SUBPASS, TRANSPARENT_SUBPASS)
            .is_some());
    }

    #[test]
    fn albedo_clears_to_the_background_color() {
        let (desc, ids) = layout();
        let albedo = desc.get(ids.albedo).unwrap();
        assert_eq!(albedo.clear, desc.get(ids.output).unwrap().clear);
        assert_eq!(albedo.final_usage, FinalUsage::Attachment);
        assert_eq!(albedo.name, "albedo");
    }

    #[test]
    fn normal_clear_marks_background() {
        let (desc, ids) = layout();
        let compiled = desc.compile().unwrap();
        match compiled.clear_values[ids.normal.0] {
            ClearValue::Color(normal) => assert_eq!(normal[3], 0.0),
            other => panic!("normal clears to {:?}", other),
        }
    }

    #[test]
    fn composition_reads_the_gbuffer_in_order() {
        let (desc, ids) = layout();
        let compiled = desc.compile().unwrap();
        let inputs: Vec<u32> = compiled.subpasses[COMPOSITION_SUBPASS as usize]
            .input
            .iter()
            .map(|r| r.attachment)
            .collect();
        assert_eq!(
            inputs,
            vec![ids.albedo.0 as u32, ids.normal.0 as u32, ids.position.0 as u32]
        );
    }
}
