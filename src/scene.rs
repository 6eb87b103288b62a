// Scene data - the mesh and per-frame uniforms the renderer draws
//
// Mesh decoding is not part of this renderer; the scene is a built-in
// vertex-colored cube.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub color: [f32; 3],
}

impl Vertex {
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription::builder()
            .binding(0)
            .stride(std::mem::size_of::<Vertex>() as u32)
            .input_rate(vk::VertexInputRate::VERTEX)
            .build()
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 2] {
        [
            // Position (location 0)
            vk::VertexInputAttributeDescription::builder()
                .binding(0)
                .location(0)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(0)
                .build(),
            // Color (location 1), after 3 floats
            vk::VertexInputAttributeDescription::builder()
                .binding(0)
                .location(1)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(std::mem::size_of::<[f32; 3]>() as u32)
                .build(),
        ]
    }
}

pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl Mesh {
    /// Unit cube centered on the origin, one color per corner.
    pub fn cube() -> Self {
        let corners = [
            ([-0.5, -0.5, -0.5], [0.0, 0.0, 0.0]),
            ([0.5, -0.5, -0.5], [1.0, 0.0, 0.0]),
            ([0.5, 0.5, -0.5], [1.0, 1.0, 0.0]),
            ([-0.5, 0.5, -0.5], [0.0, 1.0, 0.0]),
            ([-0.5, -0.5, 0.5], [0.0, 0.0, 1.0]),
            ([0.5, -0.5, 0.5], [1.0, 0.0, 1.0]),
            ([0.5, 0.5, 0.5], [1.0, 1.0, 1.0]),
            ([-0.5, 0.5, 0.5], [0.0, 1.0, 1.0]),
        ];
        let vertices = corners
            .iter()
            .map(|&(position, color)| Vertex { position, color })
            .collect();

        // Counter-clockwise when seen from outside
        let indices = vec![
            0, 3, 2, 2, 1, 0, // -Z
            4, 5, 6, 6, 7, 4, // +Z
            0, 1, 5, 5, 4, 0, // -Y
            3, 7, 6, 6, 2, 3, // +Y
            0, 4, 7, 7, 3, 0, // -X
            1, 2, 6, 6, 5, 1, // +X
        ];

        Self { vertices, indices }
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }
}

/// Uniform block read by the vertex shader, one copy per frame slot.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct UniformData {
    pub model: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
}

impl UniformData {
    /// Spin about Z at 90 degrees per second, viewed from (2, 2, 2).
    pub fn animated(elapsed_secs: f32, extent: vk::Extent2D) -> Self {
        let model = Mat4::from_rotation_z(elapsed_secs * 90f32.to_radians());
        let view = Mat4::look_at_rh(Vec3::splat(2.0), Vec3::ZERO, Vec3::Z);

        let aspect = extent.width as f32 / extent.height.max(1) as f32;
        let mut proj = Mat4::perspective_rh(45f32.to_radians(), aspect, 0.1, 10.0);
        // Vulkan clip space has Y pointing down
        proj.y_axis.y *= -1.0;

        Self { model, view, proj }
    }
}
