// Format helpers
//
// Byte sizes for the formats vertex attributes are declared with.

use ash::vk;

/// Size in bytes of a single element of `format`, or `None` for formats
/// that never appear as vertex attributes (compressed, depth, planar...).
pub fn format_size_bytes(format: vk::Format) -> Option<u32> {
    let size = match format {
        vk::Format::R8_UNORM
        | vk::Format::R8_SNORM
        | vk::Format::R8_UINT
        | vk::Format::R8_SINT => 1,

        vk::Format::R8G8_UNORM
        | vk::Format::R8G8_SNORM
        | vk::Format::R8G8_UINT
        | vk::Format::R8G8_SINT
        | vk::Format::R16_UNORM
        | vk::Format::R16_SNORM
        | vk::Format::R16_UINT
        | vk::Format::R16_SINT
        | vk::Format::R16_SFLOAT => 2,

        vk::Format::R8G8B8_UNORM
        | vk::Format::R8G8B8_SNORM
        | vk::Format::R8G8B8_UINT
        | vk::Format::R8G8B8_SINT => 3,

        vk::Format::R8G8B8A8_UNORM
        | vk::Format::R8G8B8A8_SNORM
        | vk::Format::R8G8B8A8_UINT
        | vk::Format::R8G8B8A8_SINT
        | vk::Format::R8G8B8A8_SRGB
        | vk::Format::B8G8R8A8_UNORM
        | vk::Format::B8G8R8A8_SRGB
        | vk::Format::A2B10G10R10_UNORM_PACK32
        | vk::Format::R16G16_UNORM
        | vk::Format::R16G16_SNORM
        | vk::Format::R16G16_UINT
        | vk::Format::R16G16_SINT
        | vk::Format::R16G16_SFLOAT
        | vk::Format::R32_UINT
        | vk::Format::R32_SINT
        | vk::Format::R32_SFLOAT => 4,

        vk::Format::R16G16B16_UNORM
        | vk::Format::R16G16B16_SNORM
        | vk::Format::R16G16B16_UINT
        | vk::Format::R16G16B16_SINT
        | vk::Format::R16G16B16_SFLOAT => 6,

        vk::Format::R16G16B16A16_UNORM
        | vk::Format::R16G16B16A16_SNORM
        | vk::Format::R16G16B16A16_UINT
        | vk::Format::R16G16B16A16_SINT
        | vk::Format::R16G16B16A16_SFLOAT
        | vk::Format::R32G32_UINT
        | vk::Format::R32G32_SINT
        | vk::Format::R32G32_SFLOAT => 8,

        vk::Format::R32G32B32_UINT
        | vk::Format::R32G32B32_SINT
        | vk::Format::R32G32B32_SFLOAT => 12,

        vk::Format::R32G32B32A32_UINT
        | vk::Format::R32G32B32A32_SINT
        | vk::Format::R32G32B32A32_SFLOAT
        | vk::Format::R64G64_SFLOAT => 16,

        vk::Format::R64G64B64_SFLOAT => 24,
        vk::Format::R64G64B64A64_SFLOAT => 32,

        _ => return None,
    };
    Some(size)
}

/// Whether a depth format also carries a stencil aspect.
pub fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
            | vk::Format::S8_UINT
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_vector_sizes() {
        assert_eq!(format_size_bytes(vk::Format::R32_SFLOAT), Some(4));
        assert_eq!(format_size_bytes(vk::Format::R32G32_SFLOAT), Some(8));
        assert_eq!(format_size_bytes(vk::Format::R32G32B32_SFLOAT), Some(12));
        assert_eq!(format_size_bytes(vk::Format::R32G32B32A32_SFLOAT), Some(16));
    }

    #[test]
    fn non_vertex_formats_have_no_size() {
        assert_eq!(format_size_bytes(vk::Format::UNDEFINED), None);
        assert_eq!(format_size_bytes(vk::Format::BC1_RGB_UNORM_BLOCK), None);
        assert_eq!(format_size_bytes(vk::Format::D32_SFLOAT), None);
    }

    #[test]
    fn stencil_aspect() {
        assert!(has_stencil(vk::Format::D24_UNORM_S8_UINT));
        assert!(!has_stencil(vk::Format::D32_SFLOAT));
    }
}
