// Multisample anti-aliasing
//
// Color and depth are rendered multisampled, and the color attachment is
// resolved into the single-sampled output at the end of the subpass. At one
// sample the resolve is dropped and the scene renders straight into the
// output.

use anyhow::Result;
use ash::vk;
use glam::{Mat4, Vec3};
use std::sync::Arc;

use super::{shaders, FrameInfo, Sample, SampleContext};
use crate::backend::pipeline::push_range;
use crate::backend::{
    DeviceFeature, GraphicsPipelineDesc, Image, Pipeline, PipelineLayout, ShaderStage, VulkanDevice,
};
use crate::graph::{
    AttachmentDesc, AttachmentId, FinalUsage, OffscreenTarget, RenderPassDesc, SubpassDesc,
};
use crate::scene::{DrawPush, Mesh, MeshData, OrbitCamera, Vertex};

/// Minimum fraction of samples shaded individually when sample shading is on
const MIN_SAMPLE_SHADING: f32 = 1.0;

/// Scene pass rendering at `samples` into `output`; returns the output's id
pub fn msaa_pass(
    output: AttachmentDesc,
    depth: AttachmentDesc,
    samples: vk::SampleCountFlags,
) -> (RenderPassDesc, AttachmentId) {
    let mut desc = RenderPassDesc::new();

    if samples == vk::SampleCountFlags::TYPE_1 {
        let output = desc.attachment(output);
        let depth = desc.attachment(depth);
        desc.subpass(SubpassDesc::new("scene").color(&[output]).depth(depth));
        return (desc, output);
    }

    let color = desc.attachment(AttachmentDesc {
        name: "msaa color".to_string(),
        samples,
        final_usage: FinalUsage::Attachment,
        ..output.clone()
    });
    let depth = desc.attachment(depth.samples(samples));
    let output = desc.attachment(output);
    desc.subpass(
        SubpassDesc::new("scene")
            .color(&[color])
            .depth(depth)
            .resolve(&[output]),
    );
    (desc, output)
}

pub struct Multisampling {
    pipeline: Pipeline,
    layout: PipelineLayout,
    target: OffscreenTarget,
    output: AttachmentId,
    blade: Mesh,
    camera: OrbitCamera,
    aspect: f32,
    device: Arc<VulkanDevice>,
}

impl Multisampling {
    pub fn create(ctx: &SampleContext) -> Result<Box<dyn Sample>> {
        let device = &ctx.device;
        let samples = ctx.msaa_samples;

        // Step 1: Target
        let (desc, output) = msaa_pass(ctx.output_attachment(), ctx.depth_attachment(), samples);
        let target = OffscreenTarget::new(device, &desc, ctx.extent)?;

        // Step 2: Pipeline
        let layout = PipelineLayout::new(
            device,
            &[],
            &[push_range::<DrawPush>(vk::ShaderStageFlags::VERTEX)],
        )?;
        let vs = ctx.wgsl(shaders::MESH, naga::ShaderStage::Vertex, "vs_main")?;
        let fs = ctx.wgsl(shaders::MESH, naga::ShaderStage::Fragment, "fs_main")?;

        let mut pipeline_desc = GraphicsPipelineDesc::new()
            .stage(ShaderStage::vertex(&vs, c"vs_main"))
            .stage(ShaderStage::fragment(&fs, c"fs_main"))
            .vertex_layout(Vertex::layout())
            .samples(samples);
        let sample_shading =
            samples != vk::SampleCountFlags::TYPE_1 && device.supports(DeviceFeature::SampleRateShading);
        if sample_shading {
            pipeline_desc = pipeline_desc.sample_shading(MIN_SAMPLE_SHADING);
        }
        let pipeline = pipeline_desc.build(device, &layout, target.render_pass, 0)?;

        log::info!(
            "Multisampling with {:?} (sample shading {})",
            samples,
            if sample_shading { "on" } else { "off" }
        );

        // Step 3: Thin geometry that aliases badly without MSAA
        let blade = Mesh::upload(device, "blade", &MeshData::cube(1.0, [0.95, 0.75, 0.3]))?;

        Ok(Box::new(Self {
            pipeline,
            layout,
            target,
            output,
            blade,
            camera: OrbitCamera::new(Vec3::ZERO, 5.0)
                .with_pitch(0.3)
                .with_rotation_speed(0.2),
            aspect: ctx.aspect(),
            device: device.clone(),
        }))
    }
}

impl Sample for Multisampling {
    fn update(&mut self, frame: &FrameInfo) -> Result<()> {
        self.camera.update(frame.delta);
        Ok(())
    }

    fn record(&mut self, cmd: vk::CommandBuffer, frame: &FrameInfo) -> Result<()> {
        let device = &self.device.device;
        let view_proj = self.camera.view_projection(self.aspect);

        self.target.begin(cmd, 0)?;
        self.pipeline.bind(cmd);

        // A fan of long thin slats, slowly turning
        const SLATS: u32 = 24;
        for i in 0..SLATS {
            let angle = i as f32 / SLATS as f32 * std::f32::consts::PI + frame.time * 0.2;
            let model = Mat4::from_rotation_z(angle) * Mat4::from_scale(Vec3::new(3.2, 0.03, 0.2));
            self.layout.push(cmd, &DrawPush::new(view_proj, model));
            self.blade.draw(device, cmd);
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

    fn attachments() -> (AttachmentDesc, AttachmentDesc) {
        (
            AttachmentDesc::color("output", vk::Format::R8G8B8A8_UNORM)
                .final_usage(FinalUsage::TransferSrc)
                .clear_color([0.1, 0.2, 0.3, 1.0]),
            AttachmentDesc::depth("depth", vk::Format::D32_SFLOAT),
        )
    }

    #[test]
    fn single_sample_renders_straight_into_output() {
        let (output, depth) = attachments();
        let (desc, id) = msaa_pass(output, depth, vk::SampleCountFlags::TYPE_1);
        let compiled = desc.compile().unwrap();

        assert_eq!(desc.attachments().len(), 2);
        assert_eq!(compiled.subpasses[0].color[0].attachment, id.0 as u32);
        assert!(compiled.subpasses[0].resolve.is_empty());
    }

    #[rstest]
    #[case(vk::SampleCountFlags::TYPE_2)]
    #[case(vk::SampleCountFlags::TYPE_4)]
    #[case(vk::SampleCountFlags::TYPE_8)]
    fn multisampled_color_resolves_into_output(#[case] samples: vk::SampleCountFlags) {
        let (output, depth) = attachments();
        let (desc, id) = msaa_pass(output, depth, samples);
        let compiled = desc.compile().unwrap();

        let color = &desc.attachments()[0];
        assert_eq!(color.samples, samples);
        assert_eq!(color.final_usage, FinalUsage::Attachment);
        // The multisampled image clears to the same color as the output
        assert_eq!(color.clear, desc.get(id).unwrap().clear);
        assert_eq!(desc.get(id).unwrap().samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(compiled.subpasses[0].resolve[0].attachment, id.0 as u32);
    }
}
