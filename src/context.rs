// Rendering context.
//
// `RenderContext` holds the state the draw helpers read: the bound shader,
// the command recorder, the render pass and subpass, raster and blend state,
// the current color and the model/view/projection matrices. It also owns the
// quad draw caches, the transient queue and the registry of swapchains
// created against it.
//
// The context is single-threaded: every mutating call takes `&mut self`.

use ash::vk;
use glam::{Mat4, Vec4};
use std::sync::Arc;

use crate::backend::command::CommandRecorder;
use crate::backend::pipeline::{BlendAttachment, DepthBias};
use crate::backend::swapchain::{SwapchainRef, SwapchainRegistry};
use crate::backend::GpuBackend;
use crate::draw::QuadDrawState;
use crate::error::{RenderError, Result};
use crate::program::ShaderProgram;
use crate::transient::{Transient, TransientQueue};

/// Raster, depth and blend state pipelines are built with.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterState {
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub depth_bias: DepthBias,
    pub depth_test: bool,
    pub depth_write: bool,
    pub blend_attachments: Vec<BlendAttachment>,
}

impl Default for RasterState {
    fn default() -> Self {
        Self {
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_bias: DepthBias::default(),
            depth_test: false,
            depth_write: false,
            blend_attachments: vec![BlendAttachment::opaque()],
        }
    }
}

/// The render pass commands are being recorded into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderPassInfo {
    pub handle: vk::RenderPass,
    /// Rasterization samples of each subpass.
    pub subpass_samples: Vec<vk::SampleCountFlags>,
}

pub struct RenderContext {
    pub(crate) backend: Arc<dyn GpuBackend>,
    frames_in_flight: u32,

    pub(crate) shader: Option<Arc<ShaderProgram>>,
    pub(crate) color: Vec4,
    model_matrices: Vec<Mat4>,
    view_matrix: Mat4,
    projection_matrix: Mat4,
    pub(crate) raster: RasterState,

    pub(crate) render_pass: Option<RenderPassInfo>,
    pub(crate) subpass: u32,
    pub(crate) recorder: Option<Box<dyn CommandRecorder>>,

    pub(crate) transients: TransientQueue,
    swapchains: Arc<SwapchainRegistry>,
    pub(crate) quads: QuadDrawState,
}

impl RenderContext {
    /// Create a context. Transients outlive their last use by
    /// `frames_in_flight` frames.
    pub fn new(backend: Arc<dyn GpuBackend>, frames_in_flight: u32) -> Self {
        Self {
            backend,
            frames_in_flight: frames_in_flight.max(1),
            shader: None,
            color: Vec4::ONE,
            model_matrices: vec![Mat4::IDENTITY],
            view_matrix: Mat4::IDENTITY,
            projection_matrix: Mat4::IDENTITY,
            raster: RasterState::default(),
            render_pass: None,
            subpass: 0,
            recorder: None,
            transients: TransientQueue::new(frames_in_flight),
            swapchains: Arc::new(SwapchainRegistry::new()),
            quads: QuadDrawState::default(),
        }
    }

    pub fn backend(&self) -> &Arc<dyn GpuBackend> {
        &self.backend
    }

    pub fn frames_in_flight(&self) -> u32 {
        self.frames_in_flight
    }

    // Frames

    /// Mark a frame boundary. Call once the GPU has finished the oldest
    /// frame in flight (after waiting on its fence).
    pub fn begin_frame(&mut self) {
        self.transients.advance_frame();
    }

    /// Keep `transient` alive until the frames that may use it retire.
    pub fn add_transient(&mut self, transient: Transient) {
        self.transients.push(transient);
    }

    pub fn transients(&self) -> &TransientQueue {
        &self.transients
    }

    // Shader

    pub fn bind_shader(&mut self, shader: Arc<ShaderProgram>) {
        self.shader = Some(shader);
    }

    pub fn unbind_shader(&mut self) {
        self.shader = None;
    }

    pub fn shader(&self) -> Option<&Arc<ShaderProgram>> {
        self.shader.as_ref()
    }

    // Recording

    /// Record subsequent draws into `recorder`. Bindings from earlier
    /// recordings are not assumed, even when the handle is reused.
    pub fn begin_recording(&mut self, recorder: Box<dyn CommandRecorder>) {
        self.quads.mark_bindings_dirty();
        self.recorder = Some(recorder);
    }

    pub fn end_recording(&mut self) -> Option<Box<dyn CommandRecorder>> {
        self.recorder.take()
    }

    pub fn recorder_mut(&mut self) -> Result<&mut (dyn CommandRecorder + 'static)> {
        self.recorder.as_deref_mut().ok_or(RenderError::NoCommandBuffer)
    }

    /// Use `render_pass` for subsequent draws and reset to subpass 0.
    pub fn set_render_pass(&mut self, render_pass: RenderPassInfo) {
        self.render_pass = Some(render_pass);
        self.subpass = 0;
    }

    pub fn clear_render_pass(&mut self) {
        self.render_pass = None;
        self.subpass = 0;
    }

    pub fn render_pass(&self) -> Option<&RenderPassInfo> {
        self.render_pass.as_ref()
    }

    pub fn set_subpass(&mut self, subpass: u32) -> Result<()> {
        let render_pass = self.render_pass.as_ref().ok_or(RenderError::NoRenderPass)?;
        if subpass as usize >= render_pass.subpass_samples.len() {
            return Err(RenderError::InvalidSubpass(subpass));
        }
        self.subpass = subpass;
        Ok(())
    }

    pub fn subpass(&self) -> u32 {
        self.subpass
    }

    /// Rasterization samples of the active subpass.
    pub fn subpass_samples(&self) -> Result<vk::SampleCountFlags> {
        let render_pass = self.render_pass.as_ref().ok_or(RenderError::NoRenderPass)?;
        render_pass
            .subpass_samples
            .get(self.subpass as usize)
            .copied()
            .ok_or(RenderError::InvalidSubpass(self.subpass))
    }

    // Raster state

    pub fn raster_state(&self) -> &RasterState {
        &self.raster
    }

    pub fn set_raster_state(&mut self, raster: RasterState) {
        self.raster = raster;
    }

    pub fn set_cull_mode(&mut self, cull_mode: vk::CullModeFlags) {
        self.raster.cull_mode = cull_mode;
    }

    pub fn set_front_face(&mut self, front_face: vk::FrontFace) {
        self.raster.front_face = front_face;
    }

    pub fn set_depth_bias(&mut self, depth_bias: DepthBias) {
        self.raster.depth_bias = depth_bias;
    }

    pub fn set_depth_test(&mut self, enable: bool) {
        self.raster.depth_test = enable;
    }

    pub fn set_depth_write(&mut self, enable: bool) {
        self.raster.depth_write = enable;
    }

    pub fn set_blend_attachments(&mut self, attachments: Vec<BlendAttachment>) {
        self.raster.blend_attachments = attachments;
    }

    pub fn enable_alpha_blending(&mut self, premultiplied: bool) {
        let blend = if premultiplied {
            BlendAttachment::premultiplied()
        } else {
            BlendAttachment::alpha()
        };
        self.raster.blend_attachments = vec![blend];
    }

    pub fn disable_alpha_blending(&mut self) {
        self.raster.blend_attachments = vec![BlendAttachment::opaque()];
    }

    // Color and matrices

    pub fn set_color(&mut self, color: Vec4) {
        self.color = color;
    }

    pub fn color(&self) -> Vec4 {
        self.color
    }

    pub fn model_matrix(&self) -> Mat4 {
        self.model_matrices.last().copied().unwrap_or(Mat4::IDENTITY)
    }

    pub fn set_model_matrix(&mut self, matrix: Mat4) {
        match self.model_matrices.last_mut() {
            Some(top) => *top = matrix,
            None => self.model_matrices.push(matrix),
        }
    }

    /// Duplicate the current model matrix onto the stack.
    pub fn push_model_matrix(&mut self) {
        let top = self.model_matrix();
        self.model_matrices.push(top);
    }

    /// The bottom entry is never popped.
    pub fn pop_model_matrix(&mut self) {
        if self.model_matrices.len() > 1 {
            self.model_matrices.pop();
        }
    }

    pub fn multiply_model_matrix(&mut self, matrix: Mat4) {
        let top = self.model_matrix() * matrix;
        self.set_model_matrix(top);
    }

    pub fn set_view_matrix(&mut self, matrix: Mat4) {
        self.view_matrix = matrix;
    }

    pub fn set_projection_matrix(&mut self, matrix: Mat4) {
        self.projection_matrix = matrix;
    }

    /// Pixel coordinates with the origin at the upper left, y down.
    pub fn set_matrices_window(&mut self, width: u32, height: u32) {
        self.view_matrix = Mat4::IDENTITY;
        self.projection_matrix = Mat4::orthographic_rh(0.0, width as f32, 0.0, height as f32, -1.0, 1.0);
    }

    pub fn model_view_projection(&self) -> Mat4 {
        self.projection_matrix * self.view_matrix * self.model_matrix()
    }

    // Swapchains

    pub fn swapchain_registry(&self) -> &Arc<SwapchainRegistry> {
        &self.swapchains
    }

    /// Destroy `swapchain` now and stop tracking it.
    pub fn destroy_swapchain(&self, swapchain: &SwapchainRef) {
        swapchain.destroy(true);
    }

    // Draw caches

    /// Drop the quad helpers' cached state. The next draw rebuilds it.
    pub fn invalidate_draw_caches(&mut self) {
        self.quads.invalidate();
    }

    pub fn quad_draw_state(&self) -> &QuadDrawState {
        &self.quads
    }

    /// Release everything the context tracks: swapchains, draw state and
    /// transients. The caller must make sure the GPU is idle.
    pub fn teardown(&mut self) {
        let live = self.swapchains.live();
        if !live.is_empty() {
            log::debug!("Destroying {} tracked swapchains", live.len());
        }
        for swapchain in &live {
            swapchain.destroy(false);
        }
        self.swapchains.clear();
        drop(live);

        self.quads.release();
        let released = self.transients.flush_all();
        if released > 0 {
            log::debug!("Released {} transient objects at teardown", released);
        }
        self.recorder = None;
        self.shader = None;
    }
}

impl Drop for RenderContext {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use glam::Vec3;

    fn context() -> RenderContext {
        RenderContext::new(Arc::new(DummyBackend::new()), 2)
    }

    #[test]
    fn window_matrices_map_pixels_to_clip_space() {
        let mut ctx = context();
        ctx.set_matrices_window(200, 100);
        let mvp = ctx.model_view_projection();

        let upper_left = mvp.project_point3(Vec3::new(0.0, 0.0, 0.0));
        let lower_right = mvp.project_point3(Vec3::new(200.0, 100.0, 0.0));
        assert!((upper_left.x + 1.0).abs() < 1e-6 && (upper_left.y + 1.0).abs() < 1e-6);
        assert!((lower_right.x - 1.0).abs() < 1e-6 && (lower_right.y - 1.0).abs() < 1e-6);
    }

    #[test]
    fn model_stack_keeps_its_base() {
        let mut ctx = context();
        ctx.push_model_matrix();
        ctx.multiply_model_matrix(Mat4::from_translation(Vec3::X));
        assert_eq!(ctx.model_matrix(), Mat4::from_translation(Vec3::X));

        ctx.pop_model_matrix();
        ctx.pop_model_matrix();
        assert_eq!(ctx.model_matrix(), Mat4::IDENTITY);
    }

    #[test]
    fn subpass_must_exist() {
        let mut ctx = context();
        assert!(matches!(ctx.set_subpass(0), Err(RenderError::NoRenderPass)));

        ctx.set_render_pass(RenderPassInfo {
            handle: vk::RenderPass::null(),
            subpass_samples: vec![vk::SampleCountFlags::TYPE_1, vk::SampleCountFlags::TYPE_4],
        });
        ctx.set_subpass(1).unwrap();
        assert_eq!(ctx.subpass_samples().unwrap(), vk::SampleCountFlags::TYPE_4);
        assert!(matches!(ctx.set_subpass(2), Err(RenderError::InvalidSubpass(2))));
    }

    #[test]
    fn recorder_is_required() {
        let mut ctx = context();
        assert!(matches!(ctx.recorder_mut(), Err(RenderError::NoCommandBuffer)));
    }
}
