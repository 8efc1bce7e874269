// Procedural meshes
//
// All generators produce counter-clockwise triangles with outward normals,
// matching the pipelines' COUNTER_CLOCKWISE front face.

use anyhow::Result;
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use std::f32::consts::PI;
use std::mem::{offset_of, size_of};
use std::sync::Arc;

use crate::backend::pipeline::VertexLayout;
use crate::backend::{Buffer, VulkanDevice};

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
    pub color: [f32; 3],
}

impl Vertex {
    /// Locations: 0 position, 1 normal, 2 uv, 3 color
    pub fn layout() -> VertexLayout {
        VertexLayout {
            stride: size_of::<Vertex>() as u32,
            attributes: vec![
                (0, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, position) as u32),
                (1, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, normal) as u32),
                (2, vk::Format::R32G32_SFLOAT, offset_of!(Vertex, uv) as u32),
                (3, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, color) as u32),
            ],
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    /// Axis-aligned cube centred on the origin, 4 vertices per face
    pub fn cube(size: f32, color: [f32; 3]) -> Self {
        let half = size * 0.5;
        // (normal, u, v) with u x v = normal
        let faces = [
            (Vec3::X, Vec3::NEG_Z, Vec3::Y),
            (Vec3::NEG_X, Vec3::Z, Vec3::Y),
            (Vec3::Y, Vec3::X, Vec3::NEG_Z),
            (Vec3::NEG_Y, Vec3::X, Vec3::Z),
            (Vec3::Z, Vec3::X, Vec3::Y),
            (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
        ];
        let corners = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];
        let uvs = [[0.0, 1.0], [1.0, 1.0], [1.0, 0.0], [0.0, 0.0]];

        let mut mesh = Self::default();
        for (normal, u, v) in faces {
            let base = mesh.vertices.len() as u32;
            for ((cu, cv), uv) in corners.into_iter().zip(uvs) {
                let position = (normal + u * cu + v * cv) * half;
                mesh.vertices.push(Vertex {
                    position: position.to_array(),
                    normal: normal.to_array(),
                    uv,
                    color,
                });
            }
            mesh.indices
                .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }
        mesh
    }

    /// Latitude/longitude sphere; `sectors` around, `stacks` pole to pole
    pub fn uv_sphere(radius: f32, sectors: u32, stacks: u32, color: [f32; 3]) -> Self {
        let sectors = sectors.max(3);
        let stacks = stacks.max(2);
        let mut mesh = Self::default();

        for i in 0..=stacks {
            let phi = PI / 2.0 - i as f32 * PI / stacks as f32;
            let (y, ring) = (phi.sin(), phi.cos());
            for j in 0..=sectors {
                let theta = j as f32 * 2.0 * PI / sectors as f32;
                let normal = Vec3::new(ring * theta.cos(), y, ring * theta.sin());
                mesh.vertices.push(Vertex {
                    position: (normal * radius).to_array(),
                    normal: normal.to_array(),
                    uv: [j as f32 / sectors as f32, i as f32 / stacks as f32],
                    color,
                });
            }
        }

        for i in 0..stacks {
            let k1 = i * (sectors + 1);
            let k2 = k1 + sectors + 1;
            for j in 0..sectors {
                let (k1, k2) = (k1 + j, k2 + j);
                // The first and last rings collapse into the poles
                if i != 0 {
                    mesh.indices.extend_from_slice(&[k1, k1 + 1, k2]);
                }
                if i != stacks - 1 {
                    mesh.indices.extend_from_slice(&[k1 + 1, k2 + 1, k2]);
                }
            }
        }
        mesh
    }

    /// Flat square in the XZ plane facing +Y, split into `divisions`^2 quads
    pub fn plane(size: f32, divisions: u32, color: [f32; 3]) -> Self {
        let divisions = divisions.max(1);
        let step = size / divisions as f32;
        let half = size * 0.5;
        let mut mesh = Self::default();

        for z in 0..=divisions {
            for x in 0..=divisions {
                mesh.vertices.push(Vertex {
                    position: [x as f32 * step - half, 0.0, z as f32 * step - half],
                    normal: [0.0, 1.0, 0.0],
                    uv: [x as f32 / divisions as f32, z as f32 / divisions as f32],
                    color,
                });
            }
        }

        let row = divisions + 1;
        for z in 0..divisions {
            for x in 0..divisions {
                let a = z * row + x; // (x0, z0)
                let b = a + row; // (x0, z1)
                let c = a + 1; // (x1, z0)
                let d = b + 1; // (x1, z1)
                mesh.indices.extend_from_slice(&[a, b, c, c, b, d]);
            }
        }
        mesh
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

/// Mesh uploaded to device-local buffers
pub struct Mesh {
    vertex_buffer: Buffer,
    index_buffer: Buffer,
    pub index_count: u32,
}

impl Mesh {
    pub fn upload(device: &Arc<VulkanDevice>, name: &str, data: &MeshData) -> Result<Self> {
        let vertex_buffer = Buffer::device_local_with_data(
            device,
            &format!("{} vertices", name),
            vk::BufferUsageFlags::VERTEX_BUFFER,
            &data.vertices,
        )?;
        let index_buffer = Buffer::device_local_with_data(
            device,
            &format!("{} indices", name),
            vk::BufferUsageFlags::INDEX_BUFFER,
            &data.indices,
        )?;

        log::debug!(
            "Uploaded mesh '{}': {} vertices, {} triangles",
            name,
            data.vertices.len(),
            data.triangle_count()
        );

        Ok(Self {
            vertex_buffer,
            index_buffer,
            index_count: data.indices.len() as u32,
        })
    }

    pub fn draw(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        unsafe {
            device.cmd_bind_vertex_buffers(cmd, 0, &[self.vertex_buffer.buffer], &[0]);
            device.cmd_bind_index_buffer(cmd, self.index_buffer.buffer, 0, vk::IndexType::UINT32);
            device.cmd_draw_indexed(cmd, self.index_count, 1, 0, 0, 0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_well_formed(mesh: &MeshData) {
        assert_eq!(mesh.indices.len() % 3, 0);
        let count = mesh.vertices.len() as u32;
        assert!(mesh.indices.iter().all(|&i| i < count));
        for vertex in &mesh.vertices {
            let length = Vec3::from(vertex.normal).length();
            assert!((length - 1.0).abs() < 1e-4, "normal length {}", length);
        }
    }

    /// Counter-clockwise triangles whose face normal points away from the origin
    fn assert_outward(mesh: &MeshData) {
        for triangle in mesh.indices.chunks(3) {
            let [a, b, c] = [0, 1, 2].map(|k| Vec3::from(mesh.vertices[triangle[k] as usize].position));
            let face_normal = (b - a).cross(c - a);
            let centroid = (a + b + c) / 3.0;
            assert!(
                face_normal.dot(centroid) > 0.0,
                "triangle {:?} faces inwards",
                triangle
            );
        }
    }

    #[test]
    fn vertex_layout_matches_struct() {
        let layout = Vertex::layout();
        assert_eq!(layout.stride, 44);
        let offsets: Vec<u32> = layout.attributes.iter().map(|a| a.2).collect();
        assert_eq!(offsets, vec![0, 12, 24, 32]);
    }

    #[test]
    fn cube_is_closed_and_outward() {
        let cube = MeshData::cube(2.0, [1.0, 1.0, 1.0]);
        assert_eq!(cube.vertices.len(), 24);
        assert_eq!(cube.triangle_count(), 12);
        assert_well_formed(&cube);
        assert_outward(&cube);
        assert!(cube
            .vertices
            .iter()
            .all(|v| v.position.iter().all(|c| c.abs() == 1.0)));
    }

    #[test]
    fn sphere_is_outward_without_degenerate_triangles() {
        let sphere = MeshData::uv_sphere(1.5, 16, 8, [1.0, 0.0, 0.0]);
        assert_well_formed(&sphere);
        assert_outward(&sphere);
        // Two triangles per quad, minus one per quad on each pole ring
        assert_eq!(sphere.triangle_count(), (16 * 8 * 2 - 2 * 16) as usize);
        for triangle in sphere.indices.chunks(3) {
            let [a, b, c] = [0, 1, 2].map(|k| Vec3::from(sphere.vertices[triangle[k] as usize].position));
            assert!((b - a).cross(c - a).length() > 1e-6);
        }
    }

    #[test]
    fn plane_faces_up() {
        let plane = MeshData::plane(4.0, 3, [0.5, 0.5, 0.5]);
        assert_eq!(plane.vertices.len(), 16);
        assert_eq!(plane.triangle_count(), 18);
        assert_well_formed(&plane);
        for triangle in plane.indices.chunks(3) {
            let [a, b, c] = [0, 1, 2].map(|k| Vec3::from(plane.vertices[triangle[k] as usize].position));
            let n = (b - a).cross(c - a).normalize();
            assert!((n - Vec3::Y).length() < 1e-5);
        }
    }
}
