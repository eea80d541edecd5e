use ash::vk;

use crate::backend::format::format_size_bytes;
use crate::backend::pipeline::{VertexAttributeDesc, VertexBindingDesc};
use crate::error::{RenderError, Result};
use crate::program::VertexAttribute;

/// Pack `attributes` tightly, in declaration order, into vertex binding 0.
pub fn vertex_input_layout(attributes: &[VertexAttribute]) -> Result<(Vec<VertexAttributeDesc>, VertexBindingDesc)> {
    let mut offset = 0;
    let mut descs = Vec::with_capacity(attributes.len());
    for attribute in attributes {
        let size = format_size_bytes(attribute.format).ok_or(RenderError::UnsupportedFormat(attribute.format))?;
        descs.push(VertexAttributeDesc {
            location: attribute.location,
            binding: attribute.binding,
            format: attribute.format,
            offset,
        });
        offset += size;
    }

    let binding = VertexBindingDesc {
        binding: 0,
        stride: offset,
        input_rate: vk::VertexInputRate::VERTEX,
    };
    Ok((descs, binding))
}
