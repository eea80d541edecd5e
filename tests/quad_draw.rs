use ash::vk::{self, Handle};
use glam::{Vec2, Vec4};
use std::sync::Arc;

use quad_renderer::backend::{DummyBackend, RecordedCommand, RecordingCommandBuffer};
use quad_renderer::draw::{quad_shader, COLOR, MODEL_VIEW_PROJECTION, RECT, TEX_COORD, UNIT_QUAD};
use quad_renderer::{draw, draw_solid_rect, Rect, RenderContext, RenderError, RenderPassInfo, ShaderProgram, Texture2d};

const UNIFORM: &str = "uTex0";

struct Harness {
    backend: Arc<DummyBackend>,
    ctx: RenderContext,
    cmd: RecordingCommandBuffer,
}

impl Harness {
    fn new() -> Self {
        let backend = Arc::new(DummyBackend::new());
        let mut ctx = RenderContext::new(backend.clone(), 2);
        let cmd = RecordingCommandBuffer::new();
        ctx.begin_recording(Box::new(cmd.clone()));
        ctx.set_render_pass(RenderPassInfo {
            handle: vk::RenderPass::from_raw(0xdead),
            subpass_samples: vec![vk::SampleCountFlags::TYPE_1],
        });
        Self { backend, ctx, cmd }
    }

    fn texture(&self) -> Arc<Texture2d> {
        Arc::new(Texture2d::from_rgba8(self.backend.clone(), 2, 2, &[255; 16]).unwrap())
    }
}

fn textured_shader() -> Arc<ShaderProgram> {
    Arc::new(quad_shader(vk::ShaderModule::null(), vk::ShaderModule::null(), Some(UNIFORM)).unwrap())
}

fn solid_shader() -> Arc<ShaderProgram> {
    Arc::new(quad_shader(vk::ShaderModule::null(), vk::ShaderModule::null(), None).unwrap())
}

fn rect() -> Rect {
    Rect::new(10.0, 20.0, 110.0, 70.0)
}

fn descriptor_binds(commands: &[RecordedCommand]) -> usize {
    commands
        .iter()
        .filter(|c| matches!(c, RecordedCommand::BindDescriptorSet { .. }))
        .count()
}

fn pushes(commands: &[RecordedCommand]) -> Vec<(u32, Vec<u8>)> {
    commands
        .iter()
        .filter_map(|c| match c {
            RecordedCommand::PushConstants { offset, data, .. } => Some((*offset, data.clone())),
            _ => None,
        })
        .collect()
}

fn bound_pipelines(commands: &[RecordedCommand]) -> Vec<vk::Pipeline> {
    commands
        .iter()
        .filter_map(|c| match c {
            RecordedCommand::BindPipeline(pipeline) => Some(*pipeline),
            _ => None,
        })
        .collect()
}

#[test]
fn textured_draw_records_a_full_quad() {
    let mut h = Harness::new();
    let texture = h.texture();
    h.ctx.bind_shader(textured_shader());

    draw(&mut h.ctx, &texture, &rect(), UNIFORM).unwrap();

    let commands = h.cmd.commands();
    assert_eq!(descriptor_binds(&commands), 1);
    assert!(matches!(
        commands.last(),
        Some(RecordedCommand::Draw {
            vertex_count: 4,
            instance_count: 1,
            first_vertex: 0,
            first_instance: 0
        })
    ));
    let quad = h.ctx.quad_draw_state().textured_quad().unwrap().buffer();
    assert!(commands.contains(&RecordedCommand::BindVertexBuffer {
        binding: 0,
        buffer: quad,
        offset: 0
    }));
    assert_eq!(h.backend.stats().descriptor_writes, 1);
}

#[test]
fn unchanged_identity_reuses_layout_and_bindings() {
    let mut h = Harness::new();
    let texture = h.texture();
    h.ctx.bind_shader(textured_shader());

    draw(&mut h.ctx, &texture, &rect(), UNIFORM).unwrap();
    h.cmd.clear();
    draw(&mut h.ctx, &texture, &Rect::new(0.0, 0.0, 5.0, 5.0), UNIFORM).unwrap();

    assert_eq!(descriptor_binds(&h.cmd.commands()), 0);
    assert_eq!(h.ctx.quad_draw_state().textured_cache().rebuild_count(), 1);
    let stats = h.backend.stats();
    assert_eq!(stats.descriptor_sets_allocated, 1);
    assert_eq!(stats.pipeline_layout_selects, 1);
}

#[test]
fn new_texture_rebuilds_once_and_rebinds() {
    let mut h = Harness::new();
    let first = h.texture();
    let second = h.texture();
    h.ctx.bind_shader(textured_shader());

    draw(&mut h.ctx, &first, &rect(), UNIFORM).unwrap();
    h.cmd.clear();
    draw(&mut h.ctx, &second, &rect(), UNIFORM).unwrap();
    assert_eq!(descriptor_binds(&h.cmd.commands()), 1);

    h.cmd.clear();
    draw(&mut h.ctx, &second, &rect(), UNIFORM).unwrap();
    assert_eq!(descriptor_binds(&h.cmd.commands()), 0);
    let cache = h.ctx.quad_draw_state().textured_cache();
    assert_eq!(cache.rebuild_count(), 2);
    let key_texture = cache.key().and_then(|key| key.texture()).unwrap();
    assert!(Arc::ptr_eq(key_texture, &second));
}

#[test]
fn equal_but_distinct_shaders_are_different_keys() {
    let mut h = Harness::new();
    h.ctx.bind_shader(solid_shader());
    draw_solid_rect(&mut h.ctx, &rect(), Vec2::ZERO, Vec2::ONE).unwrap();

    h.ctx.bind_shader(solid_shader());
    draw_solid_rect(&mut h.ctx, &rect(), Vec2::ZERO, Vec2::ONE).unwrap();

    let cache = h.ctx.quad_draw_state().solid_cache();
    assert_eq!(cache.rebuild_count(), 2);
    // Same push-constant ranges, so the selector hands back the same layout
    assert_eq!(h.backend.stats().pipeline_layouts_created, 1);
}

#[test]
fn helpers_keep_separate_caches() {
    let mut h = Harness::new();
    let texture = h.texture();

    h.ctx.bind_shader(textured_shader());
    draw(&mut h.ctx, &texture, &rect(), UNIFORM).unwrap();
    h.ctx.bind_shader(solid_shader());
    draw_solid_rect(&mut h.ctx, &rect(), Vec2::ZERO, Vec2::ONE).unwrap();

    let state = h.ctx.quad_draw_state();
    assert_eq!(state.textured_cache().rebuild_count(), 1);
    assert_eq!(state.solid_cache().rebuild_count(), 1);
    assert!(state.solid_cache().entry().unwrap().descriptors.is_none());
}

#[test]
fn unit_quad_is_uploaded_once_per_helper() {
    let mut h = Harness::new();
    let texture = h.texture();

    h.ctx.bind_shader(solid_shader());
    for _ in 0..3 {
        draw_solid_rect(&mut h.ctx, &rect(), Vec2::ZERO, Vec2::ONE).unwrap();
    }
    h.ctx.bind_shader(textured_shader());
    for _ in 0..3 {
        draw(&mut h.ctx, &texture, &rect(), UNIFORM).unwrap();
    }

    assert_eq!(h.backend.stats().vertex_buffers_created, 2);
    let state = h.ctx.quad_draw_state();
    let expected: &[u8] = bytemuck::cast_slice(&UNIT_QUAD);
    for quad in [state.solid_quad().unwrap(), state.textured_quad().unwrap()] {
        assert_eq!(h.backend.vertex_data(quad.buffer()).unwrap(), expected);
    }
}

#[test]
fn push_constants_follow_the_declared_block() {
    let mut h = Harness::new();
    h.ctx.bind_shader(solid_shader());
    h.ctx.set_color(Vec4::new(0.25, 0.5, 0.75, 1.0));
    let (upper_left, lower_right) = (Vec2::new(0.1, 0.2), Vec2::new(0.9, 0.8));

    draw_solid_rect(&mut h.ctx, &rect(), upper_left, lower_right).unwrap();

    let shader = h.ctx.shader().unwrap().clone();
    let pushed = pushes(&h.cmd.commands());
    let offsets: Vec<u32> = pushed.iter().map(|(offset, _)| *offset).collect();
    let expected: Vec<u32> = [MODEL_VIEW_PROJECTION, RECT, TEX_COORD, COLOR]
        .iter()
        .map(|name| shader.push_constant_range(name).unwrap().offset)
        .collect();
    assert_eq!(offsets, expected);

    assert_eq!(pushed[1].1, bytemuck::bytes_of(&rect()));
    assert_eq!(pushed[2].1, bytemuck::bytes_of(&[upper_left, lower_right]));
    assert_eq!(pushed[3].1, bytemuck::bytes_of(&Vec4::new(0.25, 0.5, 0.75, 1.0)));
}

#[test]
fn undeclared_members_are_not_pushed() {
    let mut h = Harness::new();
    let shader = ShaderProgram::builder()
        .stage(vk::ShaderStageFlags::VERTEX, vk::ShaderModule::null(), "main")
        .stage(vk::ShaderStageFlags::FRAGMENT, vk::ShaderModule::null(), "main")
        .attribute("ciPosition", 0, 0, vk::Format::R32G32B32A32_SFLOAT)
        .push_constant_block("ciBlock0", vk::ShaderStageFlags::VERTEX, &[("ciColor", 0, 16)])
        .build()
        .unwrap();
    h.ctx.bind_shader(Arc::new(shader));
    h.ctx.set_color(Vec4::new(1.0, 0.0, 0.0, 1.0));

    draw_solid_rect(&mut h.ctx, &rect(), Vec2::ZERO, Vec2::ONE).unwrap();

    let pushed = pushes(&h.cmd.commands());
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0].0, 0);
    assert_eq!(pushed[0].1, bytemuck::bytes_of(&Vec4::new(1.0, 0.0, 0.0, 1.0)));
}

#[test]
fn oversized_member_is_an_error() {
    let mut h = Harness::new();
    let shader = ShaderProgram::builder()
        .stage(vk::ShaderStageFlags::VERTEX, vk::ShaderModule::null(), "main")
        .attribute("ciPosition", 0, 0, vk::Format::R32G32B32A32_SFLOAT)
        .push_constant_block("ciBlock0", vk::ShaderStageFlags::VERTEX, &[("ciColor", 0, 32)])
        .build()
        .unwrap();
    h.ctx.bind_shader(Arc::new(shader));

    let result = draw_solid_rect(&mut h.ctx, &rect(), Vec2::ZERO, Vec2::ONE);
    assert!(matches!(
        result,
        Err(RenderError::PushConstantSize {
            name: COLOR,
            expected: 32,
            actual: 16
        })
    ));
}

#[test]
fn pipeline_is_selected_on_every_draw() {
    let mut h = Harness::new();
    h.ctx.bind_shader(solid_shader());

    draw_solid_rect(&mut h.ctx, &rect(), Vec2::ZERO, Vec2::ONE).unwrap();
    draw_solid_rect(&mut h.ctx, &rect(), Vec2::ZERO, Vec2::ONE).unwrap();
    let stats = h.backend.stats();
    assert_eq!(stats.pipeline_selects, 2);
    assert_eq!(stats.pipelines_created, 1);

    h.ctx.set_cull_mode(vk::CullModeFlags::BACK);
    draw_solid_rect(&mut h.ctx, &rect(), Vec2::ZERO, Vec2::ONE).unwrap();
    h.ctx.set_cull_mode(vk::CullModeFlags::NONE);
    draw_solid_rect(&mut h.ctx, &rect(), Vec2::ZERO, Vec2::ONE).unwrap();

    let pipelines = bound_pipelines(&h.cmd.commands());
    assert_eq!(pipelines.len(), 4);
    assert_eq!(pipelines[0], pipelines[1]);
    assert_ne!(pipelines[1], pipelines[2]);
    assert_eq!(pipelines[0], pipelines[3]);
    assert_eq!(h.backend.stats().pipelines_created, 2);
    // Raster changes never touch the layout
    assert_eq!(h.ctx.quad_draw_state().solid_cache().rebuild_count(), 1);
}

#[test]
fn blending_change_selects_another_pipeline() {
    let mut h = Harness::new();
    h.ctx.bind_shader(solid_shader());

    draw_solid_rect(&mut h.ctx, &rect(), Vec2::ZERO, Vec2::ONE).unwrap();
    h.ctx.enable_alpha_blending(false);
    draw_solid_rect(&mut h.ctx, &rect(), Vec2::ZERO, Vec2::ONE).unwrap();

    let pipelines = bound_pipelines(&h.cmd.commands());
    assert_ne!(pipelines[0], pipelines[1]);
}

#[test]
fn new_command_buffer_rebinds_without_rebuilding() {
    let mut h = Harness::new();
    let texture = h.texture();
    h.ctx.bind_shader(textured_shader());
    draw(&mut h.ctx, &texture, &rect(), UNIFORM).unwrap();

    let next = RecordingCommandBuffer::new();
    h.ctx.begin_recording(Box::new(next.clone()));
    draw(&mut h.ctx, &texture, &rect(), UNIFORM).unwrap();

    assert_eq!(descriptor_binds(&next.commands()), 1);
    assert_eq!(h.ctx.quad_draw_state().textured_cache().rebuild_count(), 1);
}

#[test]
fn rerecorded_command_buffer_binds_again() {
    let backend = Arc::new(DummyBackend::new());
    let mut ctx = RenderContext::new(backend.clone(), 1);
    ctx.set_render_pass(RenderPassInfo {
        handle: vk::RenderPass::from_raw(0xdead),
        subpass_samples: vec![vk::SampleCountFlags::TYPE_1],
    });
    let texture = Arc::new(Texture2d::from_rgba8(backend.clone(), 1, 1, &[255; 4]).unwrap());
    ctx.bind_shader(textured_shader());
    let cmd = RecordingCommandBuffer::new();

    ctx.begin_recording(Box::new(cmd.clone()));
    draw(&mut ctx, &texture, &rect(), UNIFORM).unwrap();
    ctx.end_recording();
    assert_eq!(descriptor_binds(&cmd.commands()), 1);

    // Same handle, reset and recorded again
    cmd.clear();
    ctx.begin_frame();
    ctx.begin_recording(Box::new(cmd.clone()));
    draw(&mut ctx, &texture, &rect(), UNIFORM).unwrap();
    draw(&mut ctx, &texture, &rect(), UNIFORM).unwrap();

    assert_eq!(descriptor_binds(&cmd.commands()), 1);
    assert_eq!(ctx.quad_draw_state().textured_cache().rebuild_count(), 1);
}

#[test]
fn missing_state_is_reported() {
    let backend = Arc::new(DummyBackend::new());
    let mut ctx = RenderContext::new(backend.clone(), 2);
    let r = rect();

    let result = draw_solid_rect(&mut ctx, &r, Vec2::ZERO, Vec2::ONE);
    assert!(matches!(result, Err(RenderError::NoShaderBound)));

    ctx.bind_shader(solid_shader());
    let result = draw_solid_rect(&mut ctx, &r, Vec2::ZERO, Vec2::ONE);
    assert!(matches!(result, Err(RenderError::NoCommandBuffer)));

    ctx.begin_recording(Box::new(RecordingCommandBuffer::new()));
    let result = draw_solid_rect(&mut ctx, &r, Vec2::ZERO, Vec2::ONE);
    assert!(matches!(result, Err(RenderError::NoRenderPass)));

    // Nothing was created on the way
    assert_eq!(backend.stats().vertex_buffers_created, 0);
}

#[test]
fn unknown_uniform_leaves_the_cache_empty() {
    let mut h = Harness::new();
    let texture = h.texture();
    h.ctx.bind_shader(textured_shader());

    let result = draw(&mut h.ctx, &texture, &rect(), "uMissing");
    assert!(matches!(result, Err(RenderError::UnknownUniform(name)) if name == "uMissing"));
    assert!(h.ctx.quad_draw_state().textured_cache().is_empty());
    assert!(h.cmd.commands().is_empty());

    draw(&mut h.ctx, &texture, &rect(), UNIFORM).unwrap();
    assert_eq!(descriptor_binds(&h.cmd.commands()), 1);
}

#[test]
fn unsupported_attribute_format_is_an_error() {
    let mut h = Harness::new();
    let shader = ShaderProgram::builder()
        .stage(vk::ShaderStageFlags::VERTEX, vk::ShaderModule::null(), "main")
        .attribute("ciPosition", 0, 0, vk::Format::BC1_RGB_UNORM_BLOCK)
        .build()
        .unwrap();
    h.ctx.bind_shader(Arc::new(shader));

    let result = draw_solid_rect(&mut h.ctx, &rect(), Vec2::ZERO, Vec2::ONE);
    assert!(matches!(
        result,
        Err(RenderError::UnsupportedFormat(vk::Format::BC1_RGB_UNORM_BLOCK))
    ));
}
