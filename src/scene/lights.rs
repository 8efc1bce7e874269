// Point lights
//
// Uploaded once as a uniform block; shaders move each light along its orbit
// using the frame time from push constants, so the buffer is never written
// while frames are in flight.

use bytemuck::{Pod, Zeroable};
use glam::Vec4;

pub const MAX_LIGHTS: usize = 6;

/// std140 layout: three vec4s
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Light {
    /// xyz: orbit centre, w: attenuation radius
    pub position: Vec4,
    /// rgb: color, a: intensity
    pub color: Vec4,
    /// x: orbit radius, y: angular speed (rad/s), z: phase, w unused.
    /// At time t the light sits at centre + radius * (cos a, 0, sin a)
    /// with a = speed * t + phase.
    pub orbit: Vec4,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct LightBlock {
    pub lights: [Light; MAX_LIGHTS],
    /// x: active light count, y: ambient term
    pub params: Vec4,
}

const PALETTE: [[f32; 3]; MAX_LIGHTS] = [
    [1.0, 0.85, 0.7],
    [1.0, 0.2, 0.2],
    [0.2, 0.4, 1.0],
    [0.3, 1.0, 0.4],
    [1.0, 0.8, 0.1],
    [0.8, 0.3, 1.0],
];

impl LightBlock {
    /// `count` lights (clamped to `MAX_LIGHTS`) spread evenly around the origin
    pub fn demo(count: usize) -> Self {
        let count = count.min(MAX_LIGHTS);
        let mut lights = [Light::zeroed(); MAX_LIGHTS];

        for (index, light) in lights.iter_mut().take(count).enumerate() {
            let phase = index as f32 / count as f32 * std::f32::consts::TAU;
            let [r, g, b] = PALETTE[index];
            // Alternate direction and height so the lights cross paths
            let direction = if index % 2 == 0 { 1.0 } else { -1.0 };
            *light = Light {
                position: Vec4::new(0.0, 1.0 + 0.5 * (index % 3) as f32, 0.0, 8.0),
                color: Vec4::new(r, g, b, 1.5),
                orbit: Vec4::new(2.0 + 0.5 * index as f32, 0.6 * direction, phase, 0.0),
            };
        }

        Self {
            lights,
            params: Vec4::new(count as f32, 0.08, 0.0, 0.0),
        }
    }

    pub fn count(&self) -> usize {
        self.params.x as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_is_std140_sized() {
        assert_eq!(std::mem::size_of::<Light>(), 48);
        assert_eq!(std::mem::size_of::<LightBlock>(), 48 * MAX_LIGHTS + 16);
    }

    #[test]
    fn demo_clamps_and_zeroes_unused_slots() {
        let block = LightBlock::demo(MAX_LIGHTS + 4);
        assert_eq!(block.count(), MAX_LIGHTS);

        let block = LightBlock::demo(2);
        assert_eq!(block.count(), 2);
        assert!(block.lights[..2].iter().all(|l| l.color.w > 0.0));
        assert!(block.lights[2..].iter().all(|l| *l == Light::zeroed()));
    }

    #[test]
    fn neighbours_orbit_in_opposite_directions() {
        let block = LightBlock::demo(3);
        assert!(block.lights[0].orbit.y > 0.0);
        assert!(block.lights[1].orbit.y < 0.0);
        assert!(block.lights[1].orbit.x > block.lights[0].orbit.x);
    }

    #[test]
    fn zero_lights_is_valid() {
        let block = LightBlock::demo(0);
        assert_eq!(block.count(), 0);
    }
}
