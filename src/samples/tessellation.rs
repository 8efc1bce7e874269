// Tessellation: flat subdivision versus PN triangles
//
// A coarse sphere is drawn as a list of 3-point patches twice, side by side.
// The left pipeline subdivides each triangle in its plane, the right one
// evaluates a curved PN-triangle patch from the corner normals. Both share
// the control stage, whose level comes from a specialization constant.

use anyhow::Result;
use ash::vk;
use glam::{Mat4, Vec3};
use std::sync::Arc;

use super::{shaders, FrameInfo, Sample, SampleContext};
use crate::backend::pipeline::{push_range, ENTRY_MAIN};
use crate::backend::shader::glsl_spirv;
use crate::backend::{
    DeviceFeature, GraphicsPipelineDesc, Image, Pipeline, PipelineLayout, ShaderStage,
    SpecializationConstants, VulkanDevice,
};
use crate::graph::{columns, set_viewport, AttachmentId, OffscreenTarget, RenderPassDesc, SubpassDesc};
use crate::scene::{DrawPush, Mesh, MeshData, OrbitCamera, Vertex};

const NAME: &str = "tessellation";

const TESS_LEVEL_ID: u32 = 0;

/// Upper bound every implementation supports (`maxTessellationGenerationLevel`)
pub const MAX_TESS_LEVEL: f32 = 64.0;

pub fn tessellation_constants(level: f32) -> SpecializationConstants {
    SpecializationConstants::new().add_f32(TESS_LEVEL_ID, level.clamp(1.0, MAX_TESS_LEVEL))
}

/// Line rasterization needs `fillModeNonSolid`
pub fn polygon_mode(wireframe: bool, supported: bool) -> vk::PolygonMode {
    if wireframe && supported {
        vk::PolygonMode::LINE
    } else {
        vk::PolygonMode::FILL
    }
}

pub struct Tessellation {
    /// Flat, then PN
    pipelines: [Pipeline; 2],
    layout: PipelineLayout,
    target: OffscreenTarget,
    output: AttachmentId,
    sphere: Mesh,
    camera: OrbitCamera,
    device: Arc<VulkanDevice>,
}

impl Tessellation {
    pub fn create(ctx: &SampleContext) -> Result<Box<dyn Sample>> {
        let device = &ctx.device;

        let mut desc = RenderPassDesc::new();
        let output = desc.attachment(ctx.output_attachment());
        let depth = desc.attachment(ctx.depth_attachment());
        desc.subpass(SubpassDesc::new("scene").color(&[output]).depth(depth));
        let target = OffscreenTarget::new(device, &desc, ctx.extent)?;

        // Transforms are applied after tessellation
        let layout = PipelineLayout::new(
            device,
            &[],
            &[push_range::<DrawPush>(vk::ShaderStageFlags::TESSELLATION_EVALUATION)],
        )?;

        let vs = ctx.glsl(NAME, glsl_spirv!("tessellation.vert"))?;
        let tesc = ctx.glsl(NAME, glsl_spirv!("tessellation.tesc"))?;
        let flat_tese = ctx.glsl(NAME, glsl_spirv!("passthrough.tese"))?;
        let pn_tese = ctx.glsl(NAME, glsl_spirv!("pn_triangles.tese"))?;
        let fs = ctx.wgsl(shaders::MESH, naga::ShaderStage::Fragment, "fs_main")?;

        let settings = &ctx.settings;
        let constants = tessellation_constants(settings.tessellation_level);
        let mode = polygon_mode(
            settings.tessellation_wireframe,
            device.supports(DeviceFeature::FillModeNonSolid),
        );
        if settings.tessellation_wireframe && mode == vk::PolygonMode::FILL {
            log::warn!("Wireframe requested but fillModeNonSolid is unsupported, drawing filled");
        }

        let base = GraphicsPipelineDesc::new()
            .stage(ShaderStage::vertex(&vs, ENTRY_MAIN))
            .stage(
                ShaderStage::new(vk::ShaderStageFlags::TESSELLATION_CONTROL, &tesc, ENTRY_MAIN)
                    .specialized(&constants),
            )
            .stage(ShaderStage::fragment(&fs, c"fs_main"))
            .vertex_layout(Vertex::layout())
            .patches(3)
            .polygon_mode(mode)
            .cull_mode(vk::CullModeFlags::NONE);

        let evaluation = vk::ShaderStageFlags::TESSELLATION_EVALUATION;
        let flat = base
            .clone()
            .stage(ShaderStage::new(evaluation, &flat_tese, ENTRY_MAIN))
            .build(device, &layout, target.render_pass, 0)?;
        let pn = base
            .stage(ShaderStage::new(evaluation, &pn_tese, ENTRY_MAIN))
            .build(device, &layout, target.render_pass, 0)?;

        log::info!(
            "Tessellation level {} ({:?})",
            settings.tessellation_level,
            mode
        );

        // Coarse enough that the PN curvature is obvious
        let sphere = Mesh::upload(device, "coarse sphere", &MeshData::uv_sphere(1.0, 8, 5, [0.3, 0.8, 0.5]))?;

        Ok(Box::new(Self {
            pipelines: [flat, pn],
            layout,
            target,
            output,
            sphere,
            camera: OrbitCamera::new(Vec3::ZERO, 3.0)
                .with_pitch(0.25)
                .with_rotation_speed(0.3),
            device: device.clone(),
        }))
    }
}

impl Sample for Tessellation {
    fn update(&mut self, frame: &FrameInfo) -> Result<()> {
        self.camera.update(frame.delta);
        Ok(())
    }

    fn record(&mut self, cmd: vk::CommandBuffer, _frame: &FrameInfo) -> Result<()> {
        let device = &self.device.device;

        self.target.begin(cmd, 0)?;
        let halves = columns(self.target.extent, 2);
        for (pipeline, area) in self.pipelines.iter().zip(halves) {
            set_viewport(device, cmd, area);
            let aspect = area.extent.width as f32 / area.extent.height.max(1) as f32;

            pipeline.bind(cmd);
            self.layout.push(
                cmd,
                &DrawPush::new(self.camera.view_projection(aspect), Mat4::IDENTITY),
            );
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
    #[case(3.0, 3.0)]
    #[case(0.0, 1.0)]
    #[case(500.0, MAX_TESS_LEVEL)]
    fn level_is_clamped(#[case] requested: f32, #[case] expected: f32) {
        let constants = tessellation_constants(requested);
        assert_eq!(constants.entries()[0].constant_id, TESS_LEVEL_ID);
        assert_eq!(constants.data(), expected.to_ne_bytes().as_slice());
    }

    #[rstest]
    #[case(true, true, vk::PolygonMode::LINE)]
    #[case(true, false, vk::PolygonMode::FILL)]
    #[case(false, true, vk::PolygonMode::FILL)]
    fn wireframe_needs_device_support(
        #[case] wireframe: bool,
        #[case] supported: bool,
        #[case] expected: vk::PolygonMode,
    ) {
        assert_eq!(polygon_mode(wireframe, supported), expected);
    }
}
