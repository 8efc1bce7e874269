// Cube maps: render-to-cube plus skybox and reflections
//
// A procedural sky is rendered once into the six faces of a cube image,
// one framebuffer per face. Every frame then draws that cube map as a
// background and reflects it off a sphere.

use anyhow::Result;
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat3, Mat4, UVec4, Vec3, Vec4};
use std::sync::Arc;

use super::{shaders, FrameInfo, Sample, SampleContext};
use crate::backend::pipeline::push_range;
use crate::backend::{
    DescriptorPool, DescriptorSetLayout, DescriptorWriter, GraphicsPipelineDesc, Image, Pipeline,
    PipelineLayout, Sampler, ShaderStage, VulkanDevice,
};
use crate::graph::{
    AttachmentDesc, AttachmentId, FinalUsage, OffscreenTarget, RenderPassDesc, SubpassDesc,
    TargetOptions,
};
use crate::scene::{Mesh, MeshData, OrbitCamera, Vertex};

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct SkyPush {
    /// x: face index
    pub face: UVec4,
    /// xyz: sun direction, w: sun intensity
    pub sun: Vec4,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct SkyboxPush {
    pub inv_view_proj: Mat4,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ReflectPush {
    pub view_proj: Mat4,
    pub camera_pos: Vec4,
    /// x: reflectivity
    pub params: Vec4,
}

/// Maps the far plane back to world-space view rays, ignoring translation
pub fn skybox_inverse(view: Mat4, projection: Mat4) -> Mat4 {
    let rotation = Mat4::from_mat3(Mat3::from_mat4(view));
    (projection * rotation).inverse()
}

pub struct Cubemap {
    skybox_pipeline: Pipeline,
    reflect_pipeline: Pipeline,
    skybox_layout: PipelineLayout,
    reflect_layout: PipelineLayout,
    _set_layout: DescriptorSetLayout,
    _pool: DescriptorPool,
    environment_set: vk::DescriptorSet,
    _sampler: Sampler,
    _environment: OffscreenTarget,
    target: OffscreenTarget,
    output: AttachmentId,
    sphere: Mesh,
    camera: OrbitCamera,
    aspect: f32,
    reflectivity: f32,
    device: Arc<VulkanDevice>,
}

impl Cubemap {
    pub fn create(ctx: &SampleContext) -> Result<Box<dyn Sample>> {
        let device = &ctx.device;

        // Step 1: Environment cube, rendered face by face
        let mut environment_desc = RenderPassDesc::new();
        let environment_color = environment_desc.attachment(
            AttachmentDesc::color("environment", ctx.color_format).final_usage(FinalUsage::Sampled),
        );
        environment_desc.subpass(SubpassDesc::new("sky").color(&[environment_color]));
        let size = ctx.settings.cubemap_size;
        let environment = OffscreenTarget::with_options(
            device,
            &environment_desc,
            vk::Extent2D {
                width: size,
                height: size,
            },
            TargetOptions::cube(&[environment_color]),
        )?;
        render_sky(ctx, &environment)?;

        // Step 2: Main target
        let mut desc = RenderPassDesc::new();
        let output = desc.attachment(ctx.output_attachment());
        let depth = desc.attachment(ctx.depth_attachment());
        desc.subpass(SubpassDesc::new("scene").color(&[output]).depth(depth));
        let target = OffscreenTarget::new(device, &desc, ctx.extent)?;

        // Step 3: Cube map binding, shared by both pipelines
        let set_layout = DescriptorSetLayout::new(
            device,
            &[
                (0, vk::DescriptorType::SAMPLED_IMAGE, vk::ShaderStageFlags::FRAGMENT),
                (1, vk::DescriptorType::SAMPLER, vk::ShaderStageFlags::FRAGMENT),
            ],
        )?;
        let pool = DescriptorPool::new(device, &[&set_layout], 1)?;
        let environment_set = pool.allocate(&set_layout)?;
        let sampler = Sampler::new(device, vk::SamplerAddressMode::CLAMP_TO_EDGE, ctx.anisotropy)?;
        DescriptorWriter::new()
            .sampled_image(0, environment.image(environment_color).view)
            .sampler(1, sampler.sampler)
            .write(device, environment_set);

        // Step 4: Pipelines
        let skybox_layout = PipelineLayout::new(
            device,
            &[set_layout.layout],
            &[push_range::<SkyboxPush>(vk::ShaderStageFlags::FRAGMENT)],
        )?;
        let reflect_layout = PipelineLayout::new(
            device,
            &[set_layout.layout],
            &[push_range::<ReflectPush>(
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            )],
        )?;

        let skybox_vs = ctx.wgsl(shaders::SKYBOX, naga::ShaderStage::Vertex, "vs_main")?;
        let skybox_fs = ctx.wgsl(shaders::SKYBOX, naga::ShaderStage::Fragment, "fs_main")?;
        let reflect_vs = ctx.wgsl(shaders::REFLECT, naga::ShaderStage::Vertex, "vs_main")?;
        let reflect_fs = ctx.wgsl(shaders::REFLECT, naga::ShaderStage::Fragment, "fs_main")?;

        let skybox_pipeline = GraphicsPipelineDesc::new()
            .stage(ShaderStage::vertex(&skybox_vs, c"vs_main"))
            .stage(ShaderStage::fragment(&skybox_fs, c"fs_main"))
            .cull_mode(vk::CullModeFlags::NONE)
            .depth(true, false)
            .depth_compare(vk::CompareOp::LESS_OR_EQUAL)
            .build(device, &skybox_layout, target.render_pass, 0)?;

        let reflect_pipeline = GraphicsPipelineDesc::new()
            .stage(ShaderStage::vertex(&reflect_vs, c"vs_main"))
            .stage(ShaderStage::fragment(&reflect_fs, c"fs_main"))
            .vertex_layout(Vertex::layout())
            .build(device, &reflect_layout, target.render_pass, 0)?;

        let sphere = Mesh::upload(
            device,
            "reflective sphere",
            &MeshData::uv_sphere(1.0, 64, 32, [0.75, 0.75, 0.8]),
        )?;

        Ok(Box::new(Self {
            skybox_pipeline,
            reflect_pipeline,
            skybox_layout,
            reflect_layout,
            _set_layout: set_layout,
            _pool: pool,
            environment_set,
            _sampler: sampler,
            _environment: environment,
            target,
            output,
            sphere,
            camera: OrbitCamera::new(Vec3::ZERO, 3.5)
                .with_pitch(0.15)
                .with_rotation_speed(0.35),
            aspect: ctx.aspect(),
            reflectivity: 0.85,
            device: device.clone(),
        }))
    }
}

/// One fullscreen draw per cube face
fn render_sky(ctx: &SampleContext, environment: &OffscreenTarget) -> Result<()> {
    let device = &ctx.device;
    let layout = PipelineLayout::new(
        device,
        &[],
        &[push_range::<SkyPush>(vk::ShaderStageFlags::FRAGMENT)],
    )?;
    let vs = ctx.wgsl(shaders::SKY, naga::ShaderStage::Vertex, "vs_fullscreen")?;
    let fs = ctx.wgsl(shaders::SKY, naga::ShaderStage::Fragment, "fs_face")?;
    let pipeline = GraphicsPipelineDesc::new()
        .stage(ShaderStage::vertex(&vs, c"vs_fullscreen"))
        .stage(ShaderStage::fragment(&fs, c"fs_face"))
        .cull_mode(vk::CullModeFlags::NONE)
        .depth(false, false)
        .build(device, &layout, environment.render_pass, 0)?;

    let sun = Vec3::new(0.4, 0.35, -0.6).normalize().extend(4.0);

    device.immediate_submit(|raw, cmd| {
        for face in 0..environment.layer_count() {
            environment.begin(cmd, face)?;
            pipeline.bind(cmd);
            layout.push(
                cmd,
                &SkyPush {
                    face: UVec4::new(face, 0, 0, 0),
                    sun,
                },
            );
            unsafe { raw.cmd_draw(cmd, 3, 1, 0, 0) };
            environment.end(cmd);
        }
        Ok(())
    })?;

    log::debug!(
        "Rendered {} cube faces at {}x{}",
        environment.layer_count(),
        environment.extent.width,
        environment.extent.height
    );
    Ok(())
}

impl Sample for Cubemap {
    fn update(&mut self, frame: &FrameInfo) -> Result<()> {
        self.camera.update(frame.delta);
        Ok(())
    }

    fn record(&mut self, cmd: vk::CommandBuffer, _frame: &FrameInfo) -> Result<()> {
        let device = &self.device.device;
        let projection = self.camera.projection(self.aspect);
        let view = self.camera.view();

        self.target.begin(cmd, 0)?;

        self.reflect_pipeline.bind(cmd);
        self.reflect_layout.bind_set(cmd, 0, self.environment_set);
        self.reflect_layout.push(
            cmd,
            &ReflectPush {
                view_proj: projection * view,
                camera_pos: self.camera.position().extend(1.0),
                params: Vec4::new(self.reflectivity, 0.0, 0.0, 0.0),
            },
        );
        self.sphere.draw(device, cmd);

        // Background last, only where the sphere left the far depth
        self.skybox_pipeline.bind(cmd);
        self.skybox_layout.bind_set(cmd, 0, self.environment_set);
        self.skybox_layout.push(
            cmd,
            &SkyboxPush {
                inv_view_proj: skybox_inverse(view, projection),
            },
        );
        unsafe { device.cmd_draw(cmd, 3, 1, 0, 0) };

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

    #[test]
    fn push_blocks_match_shader_layouts() {
        assert_eq!(std::mem::size_of::<SkyPush>(), 32);
        assert_eq!(std::mem::size_of::<SkyboxPush>(), 64);
        assert_eq!(std::mem::size_of::<ReflectPush>(), 96);
    }

    #[test]
    fn skybox_rays_ignore_camera_position() {
        let camera = OrbitCamera::new(Vec3::new(3.0, 1.0, -2.0), 5.0).with_pitch(0.3);
        let projection = camera.projection(16.0 / 9.0);
        let inverse = skybox_inverse(camera.view(), projection);

        // Screen centre looks from the camera towards its target
        let far = inverse * Vec4::new(0.0, 0.0, 1.0, 1.0);
        let ray = (far.truncate() / far.w).normalize();
        let expected = (camera.target - camera.position()).normalize();
        assert!(ray.abs_diff_eq(expected, 1e-4), "{ray} vs {expected}");
    }
}
