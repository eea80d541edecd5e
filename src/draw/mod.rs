// Immediate-mode quad helpers.
//
// `draw` records a textured rectangle and `draw_solid_rect` a flat one,
// both with the context's bound shader and state. Each helper keeps its own
// unit-quad vertex buffer and `DrawCache` in the context. The pipeline
// layout and descriptor bindings are rebuilt only when the shader (or
// texture) changes; the pipeline itself is selected on every call from the
// backend's cache, so raster state changes between draws take effect.
//
// Per-draw values reach the shader as members of the push-constant block
// `ciBlock0`. Members the shader does not declare are skipped.

pub mod cache;
pub mod vertex;

use ash::vk;
use glam::{Vec2, Vec4};
use std::sync::Arc;

use crate::backend::pipeline::PipelineDesc;
use crate::backend::{GpuBackend, VertexBuffer};
use crate::context::RenderContext;
use crate::error::{RenderError, Result};
use crate::program::ShaderProgram;
use crate::rect::Rect;
use crate::texture::Texture2d;
use crate::transient::{Transient, TransientQueue};
use crate::uniform::{DescriptorSetView, UniformSet};

pub use cache::{CacheEntry, CacheKey, DrawCache};
pub use vertex::vertex_input_layout;

pub const MODEL_VIEW_PROJECTION: &str = "ciBlock0.ciModelViewProjection";
pub const RECT: &str = "ciBlock0.ciRect";
pub const TEX_COORD: &str = "ciBlock0.ciTexCoord";
pub const COLOR: &str = "ciBlock0.ciColor";

/// Triangle strip covering the unit square, `vec4` positions.
pub const UNIT_QUAD: [f32; 16] = [
    0.0, 0.0, 0.0, 1.0, //
    0.0, 1.0, 0.0, 1.0, //
    1.0, 0.0, 0.0, 1.0, //
    1.0, 1.0, 0.0, 1.0,
];

/// Per-helper state owned by the context.
#[derive(Debug, Default)]
pub struct QuadDrawState {
    textured_cache: DrawCache,
    textured_quad: Option<VertexBuffer>,
    solid_cache: DrawCache,
    solid_quad: Option<VertexBuffer>,
}

impl QuadDrawState {
    pub fn textured_cache(&self) -> &DrawCache {
        &self.textured_cache
    }

    pub fn solid_cache(&self) -> &DrawCache {
        &self.solid_cache
    }

    pub fn textured_quad(&self) -> Option<&VertexBuffer> {
        self.textured_quad.as_ref()
    }

    pub fn solid_quad(&self) -> Option<&VertexBuffer> {
        self.solid_quad.as_ref()
    }

    /// A new recording started; both helpers bind their sets again.
    pub(crate) fn mark_bindings_dirty(&mut self) {
        self.textured_cache.mark_bindings_dirty();
        self.solid_cache.mark_bindings_dirty();
    }

    pub(crate) fn invalidate(&mut self) {
        self.textured_cache.invalidate();
        self.solid_cache.invalidate();
    }

    /// Drop cached state and the vertex buffers.
    pub(crate) fn release(&mut self) {
        self.invalidate();
        self.textured_quad = None;
        self.solid_quad = None;
    }
}

/// Build a program with the quad interface of `shaders/quad.vert`: a `vec4`
/// position at location 0 and the `ciBlock0` push constants. With
/// `texture_uniform`, a combined image sampler at set 0, binding 0 is
/// declared for the fragment stage.
pub fn quad_shader(
    vertex: vk::ShaderModule,
    fragment: vk::ShaderModule,
    texture_uniform: Option<&str>,
) -> Result<ShaderProgram> {
    let mut builder = ShaderProgram::builder()
        .stage(vk::ShaderStageFlags::VERTEX, vertex, "main")
        .stage(vk::ShaderStageFlags::FRAGMENT, fragment, "main")
        .attribute("ciPosition", 0, 0, vk::Format::R32G32B32A32_SFLOAT)
        .push_constant_block(
            "ciBlock0",
            vk::ShaderStageFlags::VERTEX,
            &[
                ("ciModelViewProjection", 0, 64),
                ("ciRect", 64, 16),
                ("ciTexCoord", 80, 16),
                ("ciColor", 96, 16),
            ],
        );
    if let Some(name) = texture_uniform {
        builder = builder.uniform(
            name,
            0,
            0,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            vk::ShaderStageFlags::FRAGMENT,
        );
    }
    builder.build()
}

/// Draw `texture` into `rect`, binding it to the shader uniform named
/// `uniform_name`.
pub fn draw(ctx: &mut RenderContext, texture: &Arc<Texture2d>, rect: &Rect, uniform_name: &str) -> Result<()> {
    record_quad(
        ctx,
        QuadKind::Textured { texture, uniform_name },
        rect,
        [Vec2::ZERO, Vec2::ONE],
    )
}

/// Draw `rect` with the context's color. `upper_left_tex_coord` and
/// `lower_right_tex_coord` are passed through to the shader.
pub fn draw_solid_rect(
    ctx: &mut RenderContext,
    rect: &Rect,
    upper_left_tex_coord: Vec2,
    lower_right_tex_coord: Vec2,
) -> Result<()> {
    record_quad(ctx, QuadKind::Solid, rect, [upper_left_tex_coord, lower_right_tex_coord])
}

enum QuadKind<'a> {
    Textured {
        texture: &'a Arc<Texture2d>,
        uniform_name: &'a str,
    },
    Solid,
}

fn record_quad(ctx: &mut RenderContext, kind: QuadKind<'_>, rect: &Rect, tex_coords: [Vec2; 2]) -> Result<()> {
    let shader = ctx.shader.clone().ok_or(RenderError::NoShaderBound)?;
    if ctx.recorder.is_none() {
        return Err(RenderError::NoCommandBuffer);
    }
    let render_pass = ctx.render_pass.as_ref().ok_or(RenderError::NoRenderPass)?.handle;
    let samples = ctx.subpass_samples()?;

    let (cache, quad) = match kind {
        QuadKind::Textured { .. } => (&mut ctx.quads.textured_cache, &mut ctx.quads.textured_quad),
        QuadKind::Solid => (&mut ctx.quads.solid_cache, &mut ctx.quads.solid_quad),
    };

    let vertex_buffer = match quad.as_ref().map(VertexBuffer::buffer) {
        Some(buffer) => buffer,
        None => {
            log::debug!("Creating unit quad vertex buffer");
            let created = VertexBuffer::new(ctx.backend.clone(), bytemuck::cast_slice(&UNIT_QUAD))?;
            quad.insert(created).buffer()
        }
    };

    let texture = match &kind {
        QuadKind::Textured { texture, .. } => Some(Arc::clone(texture)),
        QuadKind::Solid => None,
    };
    let backend = &ctx.backend;
    let transients = &mut ctx.transients;
    let entry = cache.lookup_or_build(CacheKey::new(shader.clone(), texture), |key| match &kind {
        QuadKind::Textured { texture, uniform_name } => {
            build_textured(backend, transients, key.shader(), texture, uniform_name)
        }
        QuadKind::Solid => build_solid(backend, key.shader()),
    })?;
    let pipeline_layout = entry.pipeline_layout;

    let (vertex_attributes, vertex_binding) = vertex_input_layout(shader.active_attributes())?;
    let desc = PipelineDesc {
        topology: vk::PrimitiveTopology::TRIANGLE_STRIP,
        vertex_attributes,
        vertex_bindings: vec![vertex_binding],
        cull_mode: ctx.raster.cull_mode,
        front_face: ctx.raster.front_face,
        depth_bias: ctx.raster.depth_bias,
        rasterization_samples: samples,
        depth_test: ctx.raster.depth_test,
        depth_write: ctx.raster.depth_write,
        color_blend_attachments: ctx.raster.blend_attachments.clone(),
        shader_stages: shader.stages().to_vec(),
        render_pass,
        subpass: ctx.subpass,
        layout: pipeline_layout,
    };
    let pipeline = ctx.backend.select_pipeline(&desc)?;
    entry.pipeline = pipeline;

    let descriptor_sets: Vec<vk::DescriptorSet> = entry
        .descriptors
        .as_ref()
        .map(|view| view.descriptor_sets().to_vec())
        .unwrap_or_default();
    let bind_descriptors = cache.take_bindings_dirty();

    let mvp = ctx.model_view_projection();
    let color: Vec4 = ctx.color;
    let recorder = ctx.recorder.as_deref_mut().ok_or(RenderError::NoCommandBuffer)?;

    if bind_descriptors {
        for (index, &set) in descriptor_sets.iter().enumerate() {
            recorder.bind_descriptor_set(pipeline_layout, index as u32, set);
        }
    }

    let constants: [(&'static str, &[u8]); 4] = [
        (MODEL_VIEW_PROJECTION, bytemuck::bytes_of(&mvp)),
        (RECT, bytemuck::bytes_of(rect)),
        (TEX_COORD, bytemuck::bytes_of(&tex_coords)),
        (COLOR, bytemuck::bytes_of(&color)),
    ];
    for (name, data) in constants {
        let Some(range) = shader.push_constant_range(name) else {
            continue;
        };
        if range.size as usize > data.len() {
            return Err(RenderError::PushConstantSize {
                name,
                expected: range.size,
                actual: data.len(),
            });
        }
        recorder.push_constants(pipeline_layout, range.stages, range.offset, &data[..range.size as usize]);
    }

    recorder.bind_vertex_buffer(0, vertex_buffer, 0);
    recorder.bind_pipeline(pipeline);
    recorder.draw(4, 1, 0, 0);

    Ok(())
}

fn build_textured(
    backend: &Arc<dyn GpuBackend>,
    transients: &mut TransientQueue,
    shader: &Arc<ShaderProgram>,
    texture: &Arc<Texture2d>,
    uniform_name: &str,
) -> Result<CacheEntry> {
    let mut uniform_set = UniformSet::new(shader.uniform_layout().clone());
    uniform_set.uniform(uniform_name, texture.clone())?;
    let uniform_set = Arc::new(uniform_set);

    let set_layouts = backend.select_descriptor_set_layouts(&uniform_set.descriptor_set_layout_descs())?;
    let descriptors = Arc::new(DescriptorSetView::create(
        backend.clone(),
        uniform_set.clone(),
        &set_layouts,
    )?);
    let pipeline_layout = backend.select_pipeline_layout(&set_layouts, shader.push_constant_ranges())?;

    transients.push(Transient::UniformSet(uniform_set));
    transients.push(Transient::DescriptorSetView(descriptors.clone()));

    Ok(CacheEntry {
        pipeline_layout,
        pipeline: vk::Pipeline::null(),
        descriptors: Some(descriptors),
    })
}

fn build_solid(backend: &Arc<dyn GpuBackend>, shader: &Arc<ShaderProgram>) -> Result<CacheEntry> {
    let pipeline_layout = backend.select_pipeline_layout(&[], shader.push_constant_ranges())?;
    Ok(CacheEntry {
        pipeline_layout,
        pipeline: vk::Pipeline::null(),
        descriptors: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_quad_is_a_triangle_strip_over_the_unit_square() {
        let corners: Vec<(f32, f32)> = UNIT_QUAD.chunks(4).map(|v| (v[0], v[1])).collect();
        assert_eq!(corners, vec![(0.0, 0.0), (0.0, 1.0), (1.0, 0.0), (1.0, 1.0)]);
        assert!(UNIT_QUAD.chunks(4).all(|v| v[2] == 0.0 && v[3] == 1.0));
    }

    #[test]
    fn quad_shader_declares_the_block() {
        let program = quad_shader(vk::ShaderModule::null(), vk::ShaderModule::null(), Some("uTex0")).unwrap();
        for name in [MODEL_VIEW_PROJECTION, RECT, TEX_COORD, COLOR] {
            assert!(program.push_constant_range(name).is_some(), "{}", name);
        }
        assert!(program.uniform_layout().binding("uTex0").is_some());
        assert_eq!(program.push_constant_ranges()[0].size, 112);
    }
}
