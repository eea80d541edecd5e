// =============================================================================
// QUAD DEMO - Swapchain + cached quad drawing
// =============================================================================
//
// Opens a window, wraps its surface in a `Swapchain` tracked by a
// `RenderContext`, and draws a few solid and textured rectangles per frame
// through the cached quad helpers.
//
// FRAME FLOW:
// 1. Acquire swapchain image
// 2. Wait for the frame slot's fence, retire transients
// 3. Record: render pass, viewport, quads
// 4. Submit
// 5. Present
//
// Keys: ESC quits, F11 toggles fullscreen, B toggles alpha blending.
//
// =============================================================================

use anyhow::{Context, Result};
use ash::vk;
use glam::{UVec2, Vec2, Vec4};
use quad_renderer::backend::pipeline::{create_framebuffers, create_render_pass};
use quad_renderer::backend::shader::read_spirv;
use quad_renderer::backend::sync::FrameSync;
use quad_renderer::backend::{CommandRecorder, GpuBackend, VulkanBackend, VulkanCommandBuffer, VulkanDevice};
use quad_renderer::config::Config;
use quad_renderer::draw::quad_shader;
use quad_renderer::{
    draw, draw_solid_rect, Rect, RenderContext, RenderError, RenderPassInfo, ShaderProgram, Swapchain, SwapchainRef,
    Texture2d,
};
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Fullscreen, Window, WindowAttributes},
};

const TEXTURE_UNIFORM: &str = "uTex0";
const CHECKER_SIZE: u32 = 64;

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let config = Config::load();

    init_logging(&config);
    log::info!("Starting quad demo");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );
    log::info!("Present mode: {}", config.graphics.present_mode);

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    Ok(())
}

/// RUST_LOG still wins over the configured level.
fn init_logging(config: &Config) {
    env_logger::Builder::new()
        .filter_level(config.log_level())
        .parse_default_env()
        .init();
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Everything created once per window.
struct Renderer {
    device: Arc<VulkanDevice>,
    backend: Arc<VulkanBackend>,
    context: RenderContext,

    swapchain: SwapchainRef,
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,

    command_pool: vk::CommandPool,
    /// One per frame in flight, re-recorded every frame
    command_buffers: Vec<VulkanCommandBuffer>,
    frame_sync: Vec<FrameSync>,
    current_frame: usize,

    textured_shader: Arc<ShaderProgram>,
    solid_shader: Arc<ShaderProgram>,
    checker: Arc<Texture2d>,
}

struct App {
    config: Config,
    // Dropped before the window: the backend owns the window's surface
    renderer: Option<Renderer>,
    window: Option<Arc<Window>>,
    is_fullscreen: bool,
    blending: bool,

    /// Set when the window is resized or the chain reports out of date
    needs_resize: bool,
    /// Window has zero area, skip rendering
    is_minimized: bool,

    started: Instant,
    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        let is_fullscreen = config.window.fullscreen;
        let now = Instant::now();
        Self {
            config,
            renderer: None,
            window: None,
            is_fullscreen,
            blending: true,
            needs_resize: false,
            is_minimized: false,
            started: now,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    // =========================================================================
    // INITIALIZATION
    // =========================================================================

    fn init_vulkan(&self, window: &Window) -> Result<Renderer> {
        log::info!("Initializing Vulkan...");

        let enable_validation = cfg!(debug_assertions) && self.config.debug.validation_layers;
        let display = window.raw_display_handle();
        let device = VulkanDevice::new(&self.config.window.title, enable_validation, display)?;

        let backend = Arc::new(VulkanBackend::new(
            device.clone(),
            display,
            window.raw_window_handle(),
            self.config.present_mode(),
        )?);
        let mut context = RenderContext::new(
            backend.clone() as Arc<dyn GpuBackend>,
            self.config.frames_in_flight() as u32,
        );
        if self.blending {
            context.enable_alpha_blending(false);
        }

        let size = window.inner_size();
        let swapchain = Swapchain::create(
            UVec2::new(size.width.max(1), size.height.max(1)),
            self.config.graphics.depth_stencil,
            self.depth_stencil_samples(),
            &context,
        )?;
        let render_pass = create_render_pass(&device.device, swapchain.color_format(), depth_of(&swapchain))?;
        let framebuffers = create_framebuffers(
            &device.device,
            &swapchain.color_attachments(),
            swapchain.depth_stencil_attachment(),
            render_pass,
            swapchain.extent(),
        )?;

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(device.graphics_queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe { device.device.create_command_pool(&pool_info, None)? };

        let frames = self.config.frames_in_flight();
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(frames as u32);
        let command_buffers = unsafe { device.device.allocate_command_buffers(&alloc_info)? }
            .into_iter()
            .map(|cmd| VulkanCommandBuffer::new(device.device.clone(), cmd))
            .collect();
        let frame_sync = (0..frames)
            .map(|_| FrameSync::new(&device.device))
            .collect::<quad_renderer::Result<Vec<_>>>()?;

        let (textured_shader, solid_shader) = load_shaders(&backend)?;
        let checker = Arc::new(checkerboard(backend.clone())?);

        log::info!("Vulkan initialized successfully!");
        Ok(Renderer {
            device,
            backend,
            context,
            swapchain,
            render_pass,
            framebuffers,
            command_pool,
            command_buffers,
            frame_sync,
            current_frame: 0,
            textured_shader,
            solid_shader,
            checker,
        })
    }

    fn depth_stencil_samples(&self) -> vk::SampleCountFlags {
        let samples = self.config.depth_stencil_samples();
        if samples != vk::SampleCountFlags::TYPE_1 {
            // The color target is the single-sampled swapchain image
            log::warn!("Depth/stencil samples {:?} don't match the color target, using 1", samples);
        }
        vk::SampleCountFlags::TYPE_1
    }

    /// Replace the swapchain and its framebuffers after a resize.
    fn recreate_swapchain(&mut self) -> Result<()> {
        let samples = self.depth_stencil_samples();
        let depth_stencil = self.config.graphics.depth_stencil;
        let (Some(window), Some(renderer)) = (self.window.as_ref(), self.renderer.as_mut()) else {
            return Ok(());
        };

        let size = window.inner_size();
        if size.width == 0 || size.height == 0 {
            self.is_minimized = true;
            return Ok(());
        }
        self.is_minimized = false;

        renderer.device.wait_idle()?;
        renderer.destroy_framebuffers();

        // The surface can only hold one swapchain at a time
        renderer.context.destroy_swapchain(&renderer.swapchain);
        let swapchain = Swapchain::create(
            UVec2::new(size.width, size.height),
            depth_stencil,
            samples,
            &renderer.context,
        )?;

        renderer.framebuffers = create_framebuffers(
            &renderer.device.device,
            &swapchain.color_attachments(),
            swapchain.depth_stencil_attachment(),
            renderer.render_pass,
            swapchain.extent(),
        )?;
        renderer.swapchain = swapchain;
        self.needs_resize = false;
        Ok(())
    }

    // =========================================================================
    // RENDER LOOP
    // =========================================================================

    /// Render a single frame. Returns false when nothing was presented.
    fn render_frame(&mut self) -> Result<bool> {
        if self.is_minimized {
            return Ok(false);
        }
        if self.needs_resize {
            self.recreate_swapchain()?;
            if self.is_minimized {
                return Ok(false);
            }
        }

        let clear_color = self.config.graphics.clear_color;
        let time = self.started.elapsed().as_secs_f32();
        let Some(renderer) = self.renderer.as_mut() else {
            return Ok(false);
        };

        let frame = renderer.current_frame;
        let image_available = renderer.frame_sync[frame].image_available;
        let render_finished = renderer.frame_sync[frame].render_finished;
        let in_flight_fence = renderer.frame_sync[frame].in_flight_fence;

        let acquired = match renderer.swapchain.acquire_next_image(image_available) {
            Ok(acquired) => acquired,
            Err(RenderError::SwapchainOutOfDate) => {
                self.needs_resize = true;
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };
        if acquired.suboptimal {
            self.needs_resize = true;
        }

        renderer.frame_sync[frame].wait_and_reset(&renderer.device.device)?;
        renderer.context.begin_frame();

        let cmd = renderer.command_buffers[frame].clone();
        cmd.begin()?;
        let mut clear_values = vec![vk::ClearValue {
            color: vk::ClearColorValue { float32: clear_color },
        }];
        if renderer.swapchain.has_depth_stencil() {
            clear_values.push(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
            });
        }
        let extent = renderer.swapchain.extent();
        cmd.begin_render_pass(
            renderer.render_pass,
            renderer.framebuffers[acquired.index as usize],
            extent,
            &clear_values,
        );

        renderer.record_scene(cmd.clone(), extent, time)?;

        cmd.end_render_pass();
        cmd.end()?;

        renderer.backend.submit(
            cmd.handle(),
            image_available,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            render_finished,
            in_flight_fence,
        )?;

        match renderer.swapchain.present(&[render_finished]) {
            Ok(true) => self.needs_resize = true,
            Ok(false) => {}
            Err(e) => {
                log::warn!("Present failed: {}", e);
                self.needs_resize = true;
            }
        }

        renderer.current_frame = (frame + 1) % renderer.frame_sync.len();
        Ok(true)
    }

    // =========================================================================
    // INPUT
    // =========================================================================

    fn toggle_fullscreen(&mut self) {
        if let Some(ref window) = self.window {
            self.is_fullscreen = !self.is_fullscreen;

            if self.is_fullscreen {
                window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                log::info!("Entered fullscreen mode");
            } else {
                window.set_fullscreen(None);
                log::info!("Exited fullscreen mode");
            }

            self.needs_resize = true;
        }
    }

    fn toggle_blending(&mut self) {
        self.blending = !self.blending;
        if let Some(renderer) = self.renderer.as_mut() {
            if self.blending {
                renderer.context.enable_alpha_blending(false);
            } else {
                renderer.context.disable_alpha_blending();
            }
        }
        log::info!("Alpha blending {}", if self.blending { "on" } else { "off" });
    }

    // =========================================================================
    // FPS TRACKING
    // =========================================================================

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.frame_count += 1;

        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;

            if let Some(ref window) = self.window {
                let pipelines = self.renderer.as_ref().map_or(0, |r| r.backend.pipeline_count());
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms) [{} pipelines]",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0,
                    pipelines
                ));
            }

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }
}

impl Renderer {
    /// Record the demo's quads into `cmd`, which is inside the render pass.
    fn record_scene(&mut self, cmd: VulkanCommandBuffer, extent: vk::Extent2D, time: f32) -> Result<()> {
        let ctx = &mut self.context;
        ctx.begin_recording(Box::new(cmd));
        ctx.set_render_pass(RenderPassInfo {
            handle: self.render_pass,
            subpass_samples: vec![vk::SampleCountFlags::TYPE_1],
        });
        ctx.set_matrices_window(extent.width, extent.height);

        let recorder = ctx.recorder_mut()?;
        recorder.set_viewport(vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        });
        recorder.set_scissor(vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        });

        let result = draw_scene(ctx, &self.solid_shader, &self.textured_shader, &self.checker, extent, time);
        ctx.end_recording();
        ctx.clear_render_pass();
        result
    }

    fn destroy_framebuffers(&mut self) {
        for framebuffer in self.framebuffers.drain(..) {
            unsafe { self.device.device.destroy_framebuffer(framebuffer, None) };
        }
    }
}

fn draw_scene(
    ctx: &mut RenderContext,
    solid_shader: &Arc<ShaderProgram>,
    textured_shader: &Arc<ShaderProgram>,
    checker: &Arc<Texture2d>,
    extent: vk::Extent2D,
    time: f32,
) -> Result<()> {
    let (width, height) = (extent.width as f32, extent.height as f32);

    // Background bands
    ctx.bind_shader(solid_shader.clone());
    for i in 0..4 {
        let t = i as f32 / 4.0;
        ctx.set_color(Vec4::new(0.2 + 0.6 * t, 0.3, 0.8 - 0.6 * t, 1.0));
        let rect = Rect::new(0.0, height * t, width, height * (t + 0.25));
        draw_solid_rect(ctx, &rect, Vec2::ZERO, Vec2::ONE)?;
    }

    // Orbiting translucent square
    let center = Vec2::new(width * 0.5, height * 0.5) + Vec2::new(time.cos(), time.sin()) * height * 0.25;
    ctx.set_color(Vec4::new(1.0, 1.0, 1.0, 0.5));
    draw_solid_rect(
        ctx,
        &Rect::from_corners(center - Vec2::splat(60.0), center + Vec2::splat(60.0)),
        Vec2::ZERO,
        Vec2::ONE,
    )?;

    // Textured quad in the middle
    ctx.bind_shader(textured_shader.clone());
    ctx.set_color(Vec4::ONE);
    let size = Vec2::splat(height * 0.4);
    let origin = Vec2::new(width, height) * 0.5 - size * 0.5;
    draw(ctx, checker, &Rect::from_origin_size(origin, size), TEXTURE_UNIFORM)?;

    Ok(())
}

fn depth_of(swapchain: &Swapchain) -> Option<(vk::Format, vk::SampleCountFlags)> {
    swapchain
        .has_depth_stencil()
        .then(|| (swapchain.depth_stencil_format(), swapchain.depth_stencil_samples()))
}

fn load_shaders(backend: &VulkanBackend) -> Result<(Arc<ShaderProgram>, Arc<ShaderProgram>)> {
    let shader_dir = concat!(env!("CARGO_MANIFEST_DIR"), "/shaders");
    let load = |name: &str| -> Result<vk::ShaderModule> {
        let path = format!("{}/{}.spv", shader_dir, name);
        let code = read_spirv(&path).with_context(|| format!("Failed to load {} (is glslc installed?)", path))?;
        Ok(backend.load_shader_module(&code)?)
    };

    let vertex = load("quad.vert")?;
    let textured = quad_shader(vertex, load("textured.frag")?, Some(TEXTURE_UNIFORM))?;
    let solid = quad_shader(vertex, load("solid.frag")?, None)?;
    Ok((Arc::new(textured), Arc::new(solid)))
}

fn checkerboard(backend: Arc<VulkanBackend>) -> quad_renderer::Result<Texture2d> {
    let mut pixels = Vec::with_capacity((CHECKER_SIZE * CHECKER_SIZE * 4) as usize);
    for y in 0..CHECKER_SIZE {
        for x in 0..CHECKER_SIZE {
            let light = ((x / 8) + (y / 8)) % 2 == 0;
            let value = if light { 235 } else { 40 };
            pixels.extend_from_slice(&[value, value, value, 255]);
        }
    }
    Texture2d::from_rgba8(backend, CHECKER_SIZE, CHECKER_SIZE, &pixels)
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));
        if self.config.window.fullscreen {
            window_attributes = window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                event_loop.exit();
                return;
            }
        };

        match self.init_vulkan(&window) {
            Ok(renderer) => self.renderer = Some(renderer),
            Err(e) => {
                log::error!("Failed to initialize Vulkan: {:?}", e);
                event_loop.exit();
                return;
            }
        }

        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: winit::window::WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                if let Some(ref renderer) = self.renderer {
                    let _ = renderer.device.wait_idle();
                }
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);

                if size.width == 0 || size.height == 0 {
                    self.is_minimized = true;
                } else {
                    self.is_minimized = false;
                    self.needs_resize = true;
                }
            }

            WindowEvent::RedrawRequested => match self.render_frame() {
                Ok(true) => self.update_fps(),
                Ok(false) => {}
                Err(e) => log::error!("Render error: {:?}", e),
            },

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() {
                    if let PhysicalKey::Code(key) = event.physical_key {
                        match key {
                            KeyCode::Escape => {
                                log::info!("ESC pressed, exiting...");
                                event_loop.exit();
                            }
                            KeyCode::F11 => self.toggle_fullscreen(),
                            KeyCode::KeyB => self.toggle_blending(),
                            _ => {}
                        }
                    }
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws.
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

// =============================================================================
// CLEANUP
// =============================================================================

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");
        let _ = self.device.wait_idle();

        // Context-tracked objects first: swapchains, cached descriptors and
        // the quad vertex buffers all go back through the backend.
        self.context.teardown();
        self.destroy_framebuffers();

        unsafe {
            for sync in &self.frame_sync {
                sync.destroy(&self.device.device);
            }
            // Also frees the command buffers
            self.device.device.destroy_command_pool(self.command_pool, None);
            self.device.device.destroy_render_pass(self.render_pass, None);
        }

        // Remaining fields drop in declaration order: the backend goes once
        // the context and texture release their references, then the device.
        log::info!("Cleanup complete");
    }
}
