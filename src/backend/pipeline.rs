// Graphics pipeline description and creation
//
// A `PipelineDesc` is the full, hashable state a graphics pipeline is built
// from: vertex input, topology, rasterization, depth, blending, shaders,
// render pass and layout. The pipeline selector caches pipelines by it.

use ash::vk;
use std::ffi::CString;
use std::hash::{Hash, Hasher};

use crate::error::{RenderError, Result, VkResultExt};

/// One vertex attribute as the pipeline sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttributeDesc {
    pub location: u32,
    pub binding: u32,
    pub format: vk::Format,
    pub offset: u32,
}

impl VertexAttributeDesc {
    pub fn to_vk(&self) -> vk::VertexInputAttributeDescription {
        vk::VertexInputAttributeDescription {
            location: self.location,
            binding: self.binding,
            format: self.format,
            offset: self.offset,
        }
    }
}

/// One vertex buffer binding as the pipeline sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexBindingDesc {
    pub binding: u32,
    pub stride: u32,
    pub input_rate: vk::VertexInputRate,
}

impl VertexBindingDesc {
    pub fn to_vk(&self) -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: self.binding,
            stride: self.stride,
            input_rate: self.input_rate,
        }
    }
}

/// Depth bias state. Compared and hashed bitwise so it can live in a cache key.
#[derive(Debug, Clone, Copy, Default)]
pub struct DepthBias {
    pub enable: bool,
    pub slope_factor: f32,
    pub constant_factor: f32,
    pub clamp: f32,
}

impl PartialEq for DepthBias {
    fn eq(&self, other: &Self) -> bool {
        self.enable == other.enable
            && self.slope_factor.to_bits() == other.slope_factor.to_bits()
            && self.constant_factor.to_bits() == other.constant_factor.to_bits()
            && self.clamp.to_bits() == other.clamp.to_bits()
    }
}

impl Eq for DepthBias {}

impl Hash for DepthBias {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.enable.hash(state);
        self.slope_factor.to_bits().hash(state);
        self.constant_factor.to_bits().hash(state);
        self.clamp.to_bits().hash(state);
    }
}

/// Blend state of one color attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendAttachment {
    pub enable: bool,
    pub src_color: vk::BlendFactor,
    pub dst_color: vk::BlendFactor,
    pub color_op: vk::BlendOp,
    pub src_alpha: vk::BlendFactor,
    pub dst_alpha: vk::BlendFactor,
    pub alpha_op: vk::BlendOp,
    pub write_mask: vk::ColorComponentFlags,
}

impl BlendAttachment {
    /// Blending off, all channels written.
    pub fn opaque() -> Self {
        Self {
            enable: false,
            src_color: vk::BlendFactor::ONE,
            dst_color: vk::BlendFactor::ZERO,
            color_op: vk::BlendOp::ADD,
            src_alpha: vk::BlendFactor::ONE,
            dst_alpha: vk::BlendFactor::ZERO,
            alpha_op: vk::BlendOp::ADD,
            write_mask: vk::ColorComponentFlags::RGBA,
        }
    }

    /// Standard non-premultiplied alpha blending.
    pub fn alpha() -> Self {
        Self {
            enable: true,
            src_color: vk::BlendFactor::SRC_ALPHA,
            dst_color: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
            color_op: vk::BlendOp::ADD,
            src_alpha: vk::BlendFactor::ONE,
            dst_alpha: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
            alpha_op: vk::BlendOp::ADD,
            write_mask: vk::ColorComponentFlags::RGBA,
        }
    }

    /// Alpha blending for premultiplied colors.
    pub fn premultiplied() -> Self {
        Self {
            src_color: vk::BlendFactor::ONE,
            ..Self::alpha()
        }
    }

    pub fn to_vk(&self) -> vk::PipelineColorBlendAttachmentState {
        vk::PipelineColorBlendAttachmentState::builder()
            .blend_enable(self.enable)
            .src_color_blend_factor(self.src_color)
            .dst_color_blend_factor(self.dst_color)
            .color_blend_op(self.color_op)
            .src_alpha_blend_factor(self.src_alpha)
            .dst_alpha_blend_factor(self.dst_alpha)
            .alpha_blend_op(self.alpha_op)
            .color_write_mask(self.write_mask)
            .build()
    }
}

impl Default for BlendAttachment {
    fn default() -> Self {
        Self::opaque()
    }
}

/// A compiled shader stage of a program.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderStageDesc {
    pub stage: vk::ShaderStageFlags,
    pub module: vk::ShaderModule,
    pub entry_point: String,
}

/// Everything a graphics pipeline is built from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineDesc {
    pub topology: vk::PrimitiveTopology,
    pub vertex_attributes: Vec<VertexAttributeDesc>,
    pub vertex_bindings: Vec<VertexBindingDesc>,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub depth_bias: DepthBias,
    pub rasterization_samples: vk::SampleCountFlags,
    pub depth_test: bool,
    pub depth_write: bool,
    pub color_blend_attachments: Vec<BlendAttachment>,
    pub shader_stages: Vec<ShaderStageDesc>,
    pub render_pass: vk::RenderPass,
    pub subpass: u32,
    pub layout: vk::PipelineLayout,
}

/// Create a graphics pipeline from a description.
///
/// Viewport and scissor are dynamic state so one pipeline serves every
/// framebuffer size.
pub fn create_graphics_pipeline(device: &ash::Device, desc: &PipelineDesc) -> Result<vk::Pipeline> {
    // Entry point names must outlive the create info
    let entry_points = desc
        .shader_stages
        .iter()
        .map(|stage| {
            CString::new(stage.entry_point.as_str()).map_err(|e| RenderError::ResourceCreation {
                resource: "pipeline",
                reason: format!("invalid entry point {:?}: {}", stage.entry_point, e),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let shader_stages: Vec<_> = desc
        .shader_stages
        .iter()
        .zip(&entry_points)
        .map(|(stage, name)| {
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(stage.stage)
                .module(stage.module)
                .name(name)
                .build()
        })
        .collect();

    // Vertex input
    let bindings: Vec<_> = desc.vertex_bindings.iter().map(VertexBindingDesc::to_vk).collect();
    let attributes: Vec<_> = desc.vertex_attributes.iter().map(VertexAttributeDesc::to_vk).collect();
    let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder()
        .vertex_binding_descriptions(&bindings)
        .vertex_attribute_descriptions(&attributes);

    // Input assembly
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(desc.topology)
        .primitive_restart_enable(false);

    // Viewport and scissor are set while recording
    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewport_count(1)
        .scissor_count(1);
    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

    // Rasterization
    let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(desc.cull_mode)
        .front_face(desc.front_face)
        .depth_bias_enable(desc.depth_bias.enable)
        .depth_bias_constant_factor(desc.depth_bias.constant_factor)
        .depth_bias_clamp(desc.depth_bias.clamp)
        .depth_bias_slope_factor(desc.depth_bias.slope_factor);

    let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
        .sample_shading_enable(false)
        .rasterization_samples(desc.rasterization_samples);

    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
        .depth_test_enable(desc.depth_test)
        .depth_write_enable(desc.depth_write)
        .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL)
        .depth_bounds_test_enable(false)
        .stencil_test_enable(false);

    let color_blend_attachments: Vec<_> = desc
        .color_blend_attachments
        .iter()
        .map(BlendAttachment::to_vk)
        .collect();
    let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
        .logic_op_enable(false)
        .attachments(&color_blend_attachments);

    let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(&shader_stages)
        .vertex_input_state(&vertex_input_info)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterizer)
        .multisample_state(&multisampling)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blending)
        .dynamic_state(&dynamic_state)
        .layout(desc.layout)
        .render_pass(desc.render_pass)
        .subpass(desc.subpass)
        .build();

    let pipelines = unsafe {
        device
            .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
            .map_err(|(_, e)| e)
            .op("vkCreateGraphicsPipelines")?
    };

    pipelines.into_iter().next().ok_or_else(|| RenderError::ResourceCreation {
        resource: "pipeline",
        reason: "driver returned no pipeline".to_string(),
    })
}

/// Create a single-subpass render pass with a presentable color attachment
/// and an optional depth/stencil attachment.
pub fn create_render_pass(
    device: &ash::Device,
    color_format: vk::Format,
    depth: Option<(vk::Format, vk::SampleCountFlags)>,
) -> Result<vk::RenderPass> {
    // Color attachment (the swapchain image)
    let color_attachment = vk::AttachmentDescription::builder()
        .format(color_format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .build();

    let color_attachment_ref = vk::AttachmentReference::builder()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .build();

    let depth_attachment_ref = vk::AttachmentReference::builder()
        .attachment(1)
        .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
        .build();

    let mut attachments = vec![color_attachment];
    if let Some((format, samples)) = depth {
        attachments.push(
            vk::AttachmentDescription::builder()
                .format(format)
                .samples(samples)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .stencil_load_op(vk::AttachmentLoadOp::CLEAR)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .build(),
        );
    }

    let color_attachments = [color_attachment_ref];
    let mut subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_attachments);
    if depth.is_some() {
        subpass = subpass.depth_stencil_attachment(&depth_attachment_ref);
    }
    let subpasses = [subpass.build()];

    let dependency = vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
        .build();
    let dependencies = [dependency];

    let render_pass_info = vk::RenderPassCreateInfo::builder()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    unsafe { device.create_render_pass(&render_pass_info, None).op("vkCreateRenderPass") }
}

/// Create framebuffers for each swapchain image, sharing one depth view.
pub fn create_framebuffers(
    device: &ash::Device,
    image_views: &[vk::ImageView],
    depth_image_view: Option<vk::ImageView>,
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
) -> Result<Vec<vk::Framebuffer>> {
    image_views
        .iter()
        .map(|&image_view| {
            let mut attachments = vec![image_view];
            attachments.extend(depth_image_view);
            let framebuffer_info = vk::FramebufferCreateInfo::builder()
                .render_pass(render_pass)
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);

            unsafe { device.create_framebuffer(&framebuffer_info, None).op("vkCreateFramebuffer") }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn depth_bias_compares_bitwise() {
        let a = DepthBias {
            enable: true,
            slope_factor: 1.5,
            constant_factor: 0.25,
            clamp: 0.0,
        };
        let b = a;
        assert_eq!(a, b);

        let c = DepthBias { clamp: -0.0, ..a };
        assert_ne!(a, c);
    }

    #[test]
    fn identical_descs_hash_together() {
        let desc = PipelineDesc {
            topology: vk::PrimitiveTopology::TRIANGLE_STRIP,
            vertex_attributes: vec![VertexAttributeDesc {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32B32A32_SFLOAT,
                offset: 0,
            }],
            vertex_bindings: vec![VertexBindingDesc {
                binding: 0,
                stride: 16,
                input_rate: vk::VertexInputRate::VERTEX,
            }],
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_bias: DepthBias::default(),
            rasterization_samples: vk::SampleCountFlags::TYPE_1,
            depth_test: false,
            depth_write: false,
            color_blend_attachments: vec![BlendAttachment::alpha()],
            shader_stages: Vec::new(),
            render_pass: vk::RenderPass::null(),
            subpass: 0,
            layout: vk::PipelineLayout::null(),
        };

        let mut set = HashSet::new();
        set.insert(desc.clone());
        assert!(set.contains(&desc));

        let mut other = desc.clone();
        other.depth_write = true;
        assert!(!set.contains(&other));
    }

    #[test]
    fn premultiplied_only_changes_source_color_factor() {
        let alpha = BlendAttachment::alpha();
        let premult = BlendAttachment::premultiplied();
        assert_eq!(premult.src_color, vk::BlendFactor::ONE);
        assert_eq!(premult.dst_color, alpha.dst_color);
        assert!(premult.enable);
    }
}
