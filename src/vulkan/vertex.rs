use std::mem::size_of;
use vulkanalia::prelude::v1_0::*;

pub type Vec2 = cgmath::Vector2<f32>;
pub type Vec3 = cgmath::Vector3<f32>;
pub type Vec4 = cgmath::Vector4<f32>;
pub type Mat4 = cgmath::Matrix4<f32>;

/// "Representation C" indicates that the struct should use the C ABI for its
/// memory layout, so the fields land exactly where the vertex attribute
/// descriptions below say they do.
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct Vertex {
    pub position: Vec4,
    pub color: Vec4,
    pub tex_coord: Vec2,
}

impl Vertex {
    pub const fn new(position: Vec4, color: Vec4, tex_coord: Vec2) -> Self {
        Self {
            position,
            color,
            tex_coord,
        }
    }

    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription::builder()
            .binding(0)
            .stride(size_of::<Vertex>() as u32)
            .input_rate(vk::VertexInputRate::VERTEX)
            .build()
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 3] {
        let position = vk::VertexInputAttributeDescription::builder()
            .binding(0)
            .location(0)
            .format(vk::Format::R32G32B32A32_SFLOAT)
            .offset(0)
            .build();

        let color = vk::VertexInputAttributeDescription::builder()
            .binding(0)
            .location(1)
            .format(vk::Format::R32G32B32A32_SFLOAT)
            .offset(size_of::<Vec4>() as u32)
            .build();

        let tex_coord = vk::VertexInputAttributeDescription::builder()
            .binding(0)
            .location(2)
            .format(vk::Format::R32G32_SFLOAT)
            .offset((size_of::<Vec4>() * 2) as u32)
            .build();

        [position, color, tex_coord]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attributes_cover_the_struct_in_order() {
        let attributes = Vertex::attribute_descriptions();

        assert_eq!(attributes[0].offset, 0);
        assert_eq!(attributes[1].offset, 16);
        assert_eq!(attributes[2].offset, 32);
        assert_eq!(Vertex::binding_description().stride, 40);

        for (location, attribute) in attributes.iter().enumerate() {
            assert_eq!(attribute.binding, 0);
            assert_eq!(attribute.location, location as u32);
        }
    }
}
