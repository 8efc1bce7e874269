// Offscreen rendering: planar mirror
//
// Pass 1 renders the scene mirrored about the floor plane into a sampled
// color target. Pass 2 renders the scene normally and draws the floor with
// the first pass's image projected onto it in screen space.

use anyhow::Result;
use ash::vk;
use glam::{Mat4, Vec3};
use std::sync::Arc;

use super::{shaders, FrameInfo, Sample, SampleContext};
use crate::backend::pipeline::push_range;
use crate::backend::{
    DescriptorPool, DescriptorSetLayout, DescriptorWriter, GraphicsPipelineDesc, Image, Pipeline,
    PipelineLayout, Sampler, ShaderStage, VulkanDevice,
};
use crate::graph::{AttachmentDesc, AttachmentId, FinalUsage, OffscreenTarget, RenderPassDesc, SubpassDesc};
use crate::scene::camera::mirror_y;
use crate::scene::{DrawPush, Mesh, MeshData, OrbitCamera, Vertex};

const MIRROR_HEIGHT: f32 = 0.0;

pub struct Offscreen {
    // Pipelines reference the layouts and targets, so they are dropped first
    scene_pipeline: Pipeline,
    mirrored_pipeline: Pipeline,
    mirror_pipeline: Pipeline,
    mesh_layout: PipelineLayout,
    mirror_layout: PipelineLayout,
    _set_layout: DescriptorSetLayout,
    _pool: DescriptorPool,
    mirror_set: vk::DescriptorSet,
    _sampler: Sampler,
    reflection: OffscreenTarget,
    main: OffscreenTarget,
    output: AttachmentId,
    cube: Mesh,
    sphere: Mesh,
    floor: Mesh,
    camera: OrbitCamera,
    aspect: f32,
    time: f32,
    device: Arc<VulkanDevice>,
}

impl Offscreen {
    pub fn create(ctx: &SampleContext) -> Result<Box<dyn Sample>> {
        let device = &ctx.device;

        // Step 1: Targets
        let mut reflection_desc = RenderPassDesc::new();
        let reflection_color = reflection_desc.attachment(
            AttachmentDesc::color("reflection", ctx.color_format)
                .final_usage(FinalUsage::Sampled)
                .clear_color(ctx.clear_color),
        );
        let reflection_depth = reflection_desc.attachment(ctx.depth_attachment());
        reflection_desc.subpass(
            SubpassDesc::new("mirrored scene")
                .color(&[reflection_color])
                .depth(reflection_depth),
        );
        let size = ctx.settings.offscreen_size;
        let reflection = OffscreenTarget::new(
            device,
            &reflection_desc,
            vk::Extent2D {
                width: size,
                height: size,
            },
        )?;

        let mut main_desc = RenderPassDesc::new();
        let output = main_desc.attachment(ctx.output_attachment());
        let depth = main_desc.attachment(ctx.depth_attachment());
        main_desc.subpass(SubpassDesc::new("scene").color(&[output]).depth(depth));
        let main = OffscreenTarget::new(device, &main_desc, ctx.extent)?;

        // Step 2: Reflection texture binding
        let set_layout = DescriptorSetLayout::new(
            device,
            &[
                (0, vk::DescriptorType::SAMPLED_IMAGE, vk::ShaderStageFlags::FRAGMENT),
                (1, vk::DescriptorType::SAMPLER, vk::ShaderStageFlags::FRAGMENT),
            ],
        )?;
        let pool = DescriptorPool::new(device, &[&set_layout], 1)?;
        let mirror_set = pool.allocate(&set_layout)?;
        let sampler = Sampler::new(device, vk::SamplerAddressMode::CLAMP_TO_EDGE, ctx.anisotropy)?;
        DescriptorWriter::new()
            .sampled_image(0, reflection.image(reflection_color).view)
            .sampler(1, sampler.sampler)
            .write(device, mirror_set);

        // Step 3: Pipelines
        let mesh_layout = PipelineLayout::new(
            device,
            &[],
            &[push_range::<DrawPush>(vk::ShaderStageFlags::VERTEX)],
        )?;
        let mirror_layout = PipelineLayout::new(
            device,
            &[set_layout.layout],
            &[push_range::<DrawPush>(vk::ShaderStageFlags::VERTEX)],
        )?;

        let mesh_vs = ctx.wgsl(shaders::MESH, naga::ShaderStage::Vertex, "vs_main")?;
        let mesh_fs = ctx.wgsl(shaders::MESH, naga::ShaderStage::Fragment, "fs_main")?;
        let mirror_vs = ctx.wgsl(shaders::MIRROR, naga::ShaderStage::Vertex, "vs_main")?;
        let mirror_fs = ctx.wgsl(shaders::MIRROR, naga::ShaderStage::Fragment, "fs_main")?;

        let scene = GraphicsPipelineDesc::new()
            .stage(ShaderStage::vertex(&mesh_vs, c"vs_main"))
            .stage(ShaderStage::fragment(&mesh_fs, c"fs_main"))
            .vertex_layout(Vertex::layout());
        let scene_pipeline = scene.clone().build(device, &mesh_layout, main.render_pass, 0)?;
        // Reflecting about a plane reverses triangle winding
        let mirrored_pipeline = scene
            .front_face(vk::FrontFace::CLOCKWISE)
            .build(device, &mesh_layout, reflection.render_pass, 0)?;

        let mirror_pipeline = GraphicsPipelineDesc::new()
            .stage(ShaderStage::vertex(&mirror_vs, c"vs_main"))
            .stage(ShaderStage::fragment(&mirror_fs, c"fs_main"))
            .vertex_layout(Vertex::layout())
            .build(device, &mirror_layout, main.render_pass, 0)?;

        // Step 4: Meshes
        let cube = Mesh::upload(device, "cube", &MeshData::cube(1.0, [0.9, 0.35, 0.2]))?;
        let sphere = Mesh::upload(device, "sphere", &MeshData::uv_sphere(0.5, 32, 16, [0.2, 0.6, 0.9]))?;
        let floor = Mesh::upload(device, "mirror", &MeshData::plane(6.0, 1, [0.1, 0.1, 0.1]))?;

        Ok(Box::new(Self {
            scene_pipeline,
            mirrored_pipeline,
            mirror_pipeline,
            mesh_layout,
            mirror_layout,
            _set_layout: set_layout,
            _pool: pool,
            mirror_set,
            _sampler: sampler,
            reflection,
            main,
            output,
            cube,
            sphere,
            floor,
            camera: OrbitCamera::new(Vec3::new(0.0, 0.6, 0.0), 6.0)
                .with_pitch(0.45)
                .with_rotation_speed(0.3),
            aspect: ctx.aspect(),
            time: 0.0,
            device: device.clone(),
        }))
    }

    /// Objects floating above the mirror
    fn objects(&self) -> [(&Mesh, Mat4); 2] {
        let cube = Mat4::from_translation(Vec3::new(0.0, 1.0, 0.0))
            * Mat4::from_rotation_y(self.time * 0.8)
            * Mat4::from_rotation_x(0.4);
        let angle = self.time * 1.2;
        let sphere = Mat4::from_translation(Vec3::new(1.8 * angle.cos(), 0.9, 1.8 * angle.sin()));
        [(&self.cube, cube), (&self.sphere, sphere)]
    }
}

impl Sample for Offscreen {
    fn update(&mut self, frame: &FrameInfo) -> Result<()> {
        self.camera.update(frame.delta);
        self.time = frame.time;
        Ok(())
    }

    fn record(&mut self, cmd: vk::CommandBuffer, _frame: &FrameInfo) -> Result<()> {
        let device = &self.device.device;
        // Both passes share the camera so screen positions line up
        let view_proj = self.camera.view_projection(self.aspect);
        let mirror = mirror_y(MIRROR_HEIGHT);

        // Pass 1: mirrored scene
        self.reflection.begin(cmd, 0)?;
        self.mirrored_pipeline.bind(cmd);
        for (mesh, model) in self.objects() {
            self.mesh_layout.push(cmd, &DrawPush::new(view_proj, mirror * model));
            mesh.draw(device, cmd);
        }
        self.reflection.end(cmd);

        // Pass 2: scene plus mirror
        self.main.begin(cmd, 0)?;
        self.scene_pipeline.bind(cmd);
        for (mesh, model) in self.objects() {
            self.mesh_layout.push(cmd, &DrawPush::new(view_proj, model));
            mesh.draw(device, cmd);
        }

        self.mirror_pipeline.bind(cmd);
        self.mirror_layout.bind_set(cmd, 0, self.mirror_set);
        self.mirror_layout.push(
            cmd,
            &DrawPush::new(view_proj, Mat4::from_translation(Vec3::Y * MIRROR_HEIGHT)),
        );
        self.floor.draw(device, cmd);
        self.main.end(cmd);

        Ok(())
    }

    fn output(&self) -> &Image {
        self.main.image(self.output)
    }
}
