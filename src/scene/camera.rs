// Camera math
//
// Right-handed world, Y up. Projections target Vulkan clip space: Y points
// down and depth runs 0..1.

use glam::{Mat4, Vec3};

/// Perspective projection for Vulkan clip space
pub fn vulkan_perspective(fov_y: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
    let mut projection = Mat4::perspective_rh(fov_y, aspect, near, far);
    projection.y_axis.y *= -1.0;
    projection
}

/// Reflection through the horizontal plane `y = height`
pub fn mirror_y(height: f32) -> Mat4 {
    Mat4::from_translation(Vec3::new(0.0, height, 0.0))
        * Mat4::from_scale(Vec3::new(1.0, -1.0, 1.0))
        * Mat4::from_translation(Vec3::new(0.0, -height, 0.0))
}

/// Camera circling a target point
#[derive(Debug, Clone, Copy)]
pub struct OrbitCamera {
    pub target: Vec3,
    pub distance: f32,
    /// Radians around +Y, 0 looks down -Z
    pub yaw: f32,
    /// Radians above the horizon
    pub pitch: f32,
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
    /// Radians per second
    pub rotation_speed: f32,
}

impl OrbitCamera {
    pub fn new(target: Vec3, distance: f32) -> Self {
        Self {
            target,
            distance,
            yaw: 0.0,
            pitch: 0.35,
            fov_y: 60f32.to_radians(),
            near: 0.1,
            far: 100.0,
            rotation_speed: 0.4,
        }
    }

    pub fn with_pitch(mut self, pitch: f32) -> Self {
        self.pitch = pitch;
        self
    }

    pub fn with_rotation_speed(mut self, speed: f32) -> Self {
        self.rotation_speed = speed;
        self
    }

    /// Advance the orbit by `delta` seconds
    pub fn update(&mut self, delta: f32) {
        self.yaw = (self.yaw + self.rotation_speed * delta) % std::f32::consts::TAU;
    }

    pub fn position(&self) -> Vec3 {
        let (sin_yaw, cos_yaw) = self.yaw.sin_cos();
        let (sin_pitch, cos_pitch) = self.pitch.sin_cos();
        self.target + self.distance * Vec3::new(cos_pitch * sin_yaw, sin_pitch, cos_pitch * cos_yaw)
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.position(), self.target, Vec3::Y)
    }

    pub fn projection(&self, aspect: f32) -> Mat4 {
        vulkan_perspective(self.fov_y, aspect, self.near, self.far)
    }

    pub fn view_projection(&self, aspect: f32) -> Mat4 {
        self.projection(aspect) * self.view()
    }
}

/// Direction through texel coordinate (s, t) in 0..1 of a cube face, faces
/// ordered +X, -X, +Y, -Y, +Z, -Z as Vulkan array layers
pub fn cube_face_direction(face: u32, s: f32, t: f32) -> Vec3 {
    let (u, v) = (2.0 * s - 1.0, 2.0 * t - 1.0);
    let direction = match face {
        0 => Vec3::new(1.0, -v, -u),
        1 => Vec3::new(-1.0, -v, u),
        2 => Vec3::new(u, 1.0, v),
        3 => Vec3::new(u, -1.0, -v),
        4 => Vec3::new(u, -v, 1.0),
        _ => Vec3::new(-u, -v, -1.0),
    };
    direction.normalize()
}

/// Face and (s, t) a sampler picks for a direction, per the cube map face
/// selection rules
pub fn cube_face_for_direction(direction: Vec3) -> (u32, f32, f32) {
    let abs = direction.abs();
    let (face, sc, tc, ma) = if abs.x >= abs.y && abs.x >= abs.z {
        if direction.x >= 0.0 {
            (0, -direction.z, -direction.y, abs.x)
        } else {
            (1, direction.z, -direction.y, abs.x)
        }
    } else if abs.y >= abs.z {
        if direction.y >= 0.0 {
            (2, direction.x, direction.z, abs.y)
        } else {
            (3, direction.x, -direction.z, abs.y)
        }
    } else if direction.z >= 0.0 {
        (4, direction.x, -direction.y, abs.z)
    } else {
        (5, -direction.x, -direction.y, abs.z)
    };
    (face, 0.5 * (sc / ma + 1.0), 0.5 * (tc / ma + 1.0))
}
