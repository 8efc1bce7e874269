// Scene data shared by the samples
//
// Procedural meshes, the orbit camera, the light block and the push-constant
// blocks every pipeline layout in the crate is built around.

pub mod camera;
pub mod lights;
pub mod mesh;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};

pub use camera::OrbitCamera;
pub use lights::LightBlock;
pub use mesh::{Mesh, MeshData, Vertex};

/// Per-draw transforms (128 bytes, the guaranteed push-constant minimum)
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct DrawPush {
    pub view_proj: Mat4,
    pub model: Mat4,
}

impl DrawPush {
    pub fn new(view_proj: Mat4, model: Mat4) -> Self {
        Self { view_proj, model }
    }
}

/// Per-frame data for fullscreen lighting passes
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CompositionPush {
    /// Camera position, w unused
    pub view_pos: Vec4,
    /// x: time in seconds
    pub params: Vec4,
}

impl CompositionPush {
    pub fn new(view_pos: glam::Vec3, time: f32) -> Self {
        Self {
            view_pos: view_pos.extend(1.0),
            params: Vec4::new(time, 0.0, 0.0, 0.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_blocks_fit_minimum_push_constant_size() {
        assert_eq!(std::mem::size_of::<DrawPush>(), 128);
        assert!(std::mem::size_of::<CompositionPush>() <= 128);
        assert_eq!(std::mem::size_of::<CompositionPush>() % 16, 0);
    }
}
