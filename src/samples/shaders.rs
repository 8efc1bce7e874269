// WGSL sources embedded at compile time
//
// GLSL stages are embedded separately with `glsl_spirv!` since they are
// compiled by build.rs.

pub const MESH: &str = include_str!("../../shaders/mesh.wgsl");
pub const MIRROR: &str = include_str!("../../shaders/mirror.wgsl");
pub const GBUFFER: &str = include_str!("../../shaders/gbuffer.wgsl");
pub const COMPOSITION: &str = include_str!("../../shaders/composition.wgsl");
pub const SKY: &str = include_str!("../../shaders/sky.wgsl");
pub const SKYBOX: &str = include_str!("../../shaders/skybox.wgsl");
pub const REFLECT: &str = include_str!("../../shaders/reflect.wgsl");

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::shader::compile_wgsl;
    use naga::ShaderStage;
    use rstest::rstest;

    #[rstest]
    #[case::mesh_vs(MESH, ShaderStage::Vertex, "vs_main")]
    #[case::mesh_fs(MESH, ShaderStage::Fragment, "fs_main")]
    #[case::mesh_glass(MESH, ShaderStage::Fragment, "fs_glass")]
    #[case::mirror_vs(MIRROR, ShaderStage::Vertex, "vs_main")]
    #[case::mirror_fs(MIRROR, ShaderStage::Fragment, "fs_main")]
    #[case::gbuffer_vs(GBUFFER, ShaderStage::Vertex, "vs_main")]
    #[case::gbuffer_fs(GBUFFER, ShaderStage::Fragment, "fs_main")]
    #[case::composition_vs(COMPOSITION, ShaderStage::Vertex, "vs_fullscreen")]
    #[case::composition_fs(COMPOSITION, ShaderStage::Fragment, "fs_main")]
    #[case::sky_vs(SKY, ShaderStage::Vertex, "vs_fullscreen")]
    #[case::sky_fs(SKY, ShaderStage::Fragment, "fs_face")]
    #[case::skybox_vs(SKYBOX, ShaderStage::Vertex, "vs_main")]
    #[case::skybox_fs(SKYBOX, ShaderStage::Fragment, "fs_main")]
    #[case::reflect_vs(REFLECT, ShaderStage::Vertex, "vs_main")]
    #[case::reflect_fs(REFLECT, ShaderStage::Fragment, "fs_main")]
    fn entry_points_compile(#[case] source: &str, #[case] stage: ShaderStage, #[case] entry: &str) {
        let words = compile_wgsl(source, stage, entry).unwrap();
        assert_eq!(words[0], 0x0723_0203);
    }
}
