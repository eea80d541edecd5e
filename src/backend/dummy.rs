// Backend without a GPU.
//
// `DummyBackend` hands out unique fake handles and keeps enough
// bookkeeping (creation counters, live objects, uploaded vertex data) to
// observe what the renderer asked for. Its selectors cache exactly like the
// native ones, so identical state yields identical handles.
// `RecordingCommandBuffer` captures recorded commands instead of issuing
// them.

use ash::vk::{self, Handle};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::command::CommandRecorder;
use super::pipeline::PipelineDesc;
use super::selectors::PipelineLayoutKey;
use super::traits::{
    AcquiredImage, DescriptorSetLayoutDesc, DescriptorWrite, GpuBackend, NativeSwapchain, PushConstantRange,
};
use crate::error::{RenderError, Result};

/// Creation and destruction counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DummyStats {
    pub vertex_buffers_created: usize,
    pub buffers_destroyed: usize,
    pub textures_created: usize,
    pub textures_destroyed: usize,
    pub set_layouts_created: usize,
    pub descriptor_sets_allocated: usize,
    pub descriptor_sets_freed: usize,
    pub descriptor_writes: usize,
    pub pipeline_layouts_created: usize,
    pub pipeline_layout_selects: usize,
    pub pipelines_created: usize,
    pub pipeline_selects: usize,
    pub swapchains_created: usize,
    pub swapchains_destroyed: usize,
    pub depth_stencils_created: usize,
    pub images_acquired: usize,
    pub images_presented: usize,
}

#[derive(Default)]
struct DummyState {
    next_handle: u64,
    stats: DummyStats,
    vertex_data: HashMap<vk::Buffer, Vec<u8>>,
    set_layouts: HashMap<DescriptorSetLayoutDesc, vk::DescriptorSetLayout>,
    pipeline_layouts: HashMap<PipelineLayoutKey, vk::PipelineLayout>,
    pipelines: HashMap<PipelineDesc, vk::Pipeline>,
    descriptor_sets: HashSet<vk::DescriptorSet>,
    image_views: HashSet<vk::ImageView>,
    swapchains: HashSet<vk::SwapchainKHR>,
    next_image: u32,
    fail_next_swapchain: bool,
    fail_next_depth_stencil: bool,
    out_of_date: bool,
}

impl DummyState {
    fn handle<H: Handle>(&mut self) -> H {
        self.next_handle += 1;
        H::from_raw(self.next_handle)
    }
}

pub struct DummyBackend {
    image_count: u32,
    state: Mutex<DummyState>,
}

impl DummyBackend {
    pub fn new() -> Self {
        Self::with_image_count(3)
    }

    /// Swapchains created by this backend will have `image_count` images.
    pub fn with_image_count(image_count: u32) -> Self {
        Self {
            image_count,
            state: Mutex::new(DummyState::default()),
        }
    }

    pub fn stats(&self) -> DummyStats {
        self.state.lock().stats.clone()
    }

    /// Bytes uploaded into a live vertex buffer.
    pub fn vertex_data(&self, buffer: vk::Buffer) -> Option<Vec<u8>> {
        self.state.lock().vertex_data.get(&buffer).cloned()
    }

    pub fn live_buffers(&self) -> usize {
        self.state.lock().vertex_data.len()
    }

    pub fn live_descriptor_sets(&self) -> usize {
        self.state.lock().descriptor_sets.len()
    }

    pub fn live_image_views(&self) -> usize {
        self.state.lock().image_views.len()
    }

    pub fn live_swapchains(&self) -> usize {
        self.state.lock().swapchains.len()
    }

    /// Make the next `create_swapchain` fail.
    pub fn fail_next_swapchain(&self) {
        self.state.lock().fail_next_swapchain = true;
    }

    /// Make the next `create_depth_stencil` fail.
    pub fn fail_next_depth_stencil(&self) {
        self.state.lock().fail_next_depth_stencil = true;
    }

    /// Report every acquire as out of date while set.
    pub fn set_out_of_date(&self, out_of_date: bool) {
        self.state.lock().out_of_date = out_of_date;
    }
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuBackend for DummyBackend {
    fn create_vertex_buffer(&self, data: &[u8]) -> Result<vk::Buffer> {
        let mut state = self.state.lock();
        let buffer = state.handle();
        state.vertex_data.insert(buffer, data.to_vec());
        state.stats.vertex_buffers_created += 1;
        Ok(buffer)
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        let mut state = self.state.lock();
        if state.vertex_data.remove(&buffer).is_some() {
            state.stats.buffers_destroyed += 1;
        }
    }

    fn create_texture_rgba8(&self, width: u32, height: u32, pixels: &[u8]) -> Result<(vk::ImageView, vk::Sampler)> {
        if pixels.len() != (width as usize) * (height as usize) * 4 {
            return Err(RenderError::InvalidParameter(format!(
                "{}x{} RGBA8 texture needs {} bytes, got {}",
                width,
                height,
                width as usize * height as usize * 4,
                pixels.len()
            )));
        }
        let mut state = self.state.lock();
        let view = state.handle();
        let sampler = state.handle();
        state.image_views.insert(view);
        state.stats.textures_created += 1;
        Ok((view, sampler))
    }

    fn destroy_texture(&self, view: vk::ImageView, _sampler: vk::Sampler) {
        let mut state = self.state.lock();
        if state.image_views.remove(&view) {
            state.stats.textures_destroyed += 1;
        }
    }

    fn select_descriptor_set_layouts(&self, sets: &[DescriptorSetLayoutDesc]) -> Result<Vec<vk::DescriptorSetLayout>> {
        let mut state = self.state.lock();
        let mut layouts = Vec::with_capacity(sets.len());
        for bindings in sets {
            let layout = match state.set_layouts.get(bindings) {
                Some(&layout) => layout,
                None => {
                    let layout = state.handle();
                    state.set_layouts.insert(bindings.clone(), layout);
                    state.stats.set_layouts_created += 1;
                    layout
                }
            };
            layouts.push(layout);
        }
        Ok(layouts)
    }

    fn allocate_descriptor_sets(&self, layouts: &[vk::DescriptorSetLayout]) -> Result<Vec<vk::DescriptorSet>> {
        let mut state = self.state.lock();
        let sets: Vec<vk::DescriptorSet> = layouts.iter().map(|_| state.handle()).collect();
        state.descriptor_sets.extend(sets.iter().copied());
        state.stats.descriptor_sets_allocated += sets.len();
        Ok(sets)
    }

    fn write_descriptor_sets(&self, writes: &[DescriptorWrite]) {
        self.state.lock().stats.descriptor_writes += writes.len();
    }

    fn free_descriptor_sets(&self, sets: &[vk::DescriptorSet]) {
        let mut state = self.state.lock();
        for set in sets {
            if state.descriptor_sets.remove(set) {
                state.stats.descriptor_sets_freed += 1;
            }
        }
    }

    fn select_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[PushConstantRange],
    ) -> Result<vk::PipelineLayout> {
        let mut state = self.state.lock();
        state.stats.pipeline_layout_selects += 1;
        let key = (set_layouts.to_vec(), push_constant_ranges.to_vec());
        if let Some(&layout) = state.pipeline_layouts.get(&key) {
            return Ok(layout);
        }
        let layout = state.handle();
        state.pipeline_layouts.insert(key, layout);
        state.stats.pipeline_layouts_created += 1;
        Ok(layout)
    }

    fn select_pipeline(&self, desc: &PipelineDesc) -> Result<vk::Pipeline> {
        let mut state = self.state.lock();
        state.stats.pipeline_selects += 1;
        if let Some(&pipeline) = state.pipelines.get(desc) {
            return Ok(pipeline);
        }
        let pipeline = state.handle();
        state.pipelines.insert(desc.clone(), pipeline);
        state.stats.pipelines_created += 1;
        Ok(pipeline)
    }

    fn create_swapchain(&self, extent: vk::Extent2D) -> Result<NativeSwapchain> {
        let mut state = self.state.lock();
        if std::mem::take(&mut state.fail_next_swapchain) {
            return Err(RenderError::Vulkan {
                operation: "vkCreateSwapchainKHR",
                code: vk::Result::ERROR_INITIALIZATION_FAILED,
            });
        }
        let handle = state.handle();
        let images = (0..self.image_count).map(|_| state.handle()).collect();
        state.swapchains.insert(handle);
        state.stats.swapchains_created += 1;
        Ok(NativeSwapchain {
            handle,
            images,
            format: vk::Format::B8G8R8A8_UNORM,
            extent,
        })
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut state = self.state.lock();
        if state.swapchains.remove(&swapchain) {
            state.stats.swapchains_destroyed += 1;
        }
    }

    fn create_color_view(&self, _image: vk::Image, _format: vk::Format) -> Result<vk::ImageView> {
        let mut state = self.state.lock();
        let view = state.handle();
        state.image_views.insert(view);
        Ok(view)
    }

    fn depth_stencil_format(&self) -> vk::Format {
        vk::Format::D24_UNORM_S8_UINT
    }

    fn create_depth_stencil(
        &self,
        _extent: vk::Extent2D,
        _format: vk::Format,
        _samples: vk::SampleCountFlags,
    ) -> Result<vk::ImageView> {
        let mut state = self.state.lock();
        if std::mem::take(&mut state.fail_next_depth_stencil) {
            return Err(RenderError::ResourceCreation {
                resource: "depth/stencil attachment",
                reason: "injected failure".to_string(),
            });
        }
        let view = state.handle();
        state.image_views.insert(view);
        state.stats.depth_stencils_created += 1;
        Ok(view)
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.state.lock().image_views.remove(&view);
    }

    fn acquire_next_image(&self, swapchain: vk::SwapchainKHR, _signal: vk::Semaphore) -> Result<AcquiredImage> {
        let mut state = self.state.lock();
        if !state.swapchains.contains(&swapchain) {
            return Err(RenderError::SwapchainDestroyed);
        }
        if state.out_of_date {
            return Err(RenderError::SwapchainOutOfDate);
        }
        let index = state.next_image;
        state.next_image = (index + 1) % self.image_count.max(1);
        state.stats.images_acquired += 1;
        Ok(AcquiredImage {
            index,
            suboptimal: false,
        })
    }

    fn present(&self, swapchain: vk::SwapchainKHR, _image_index: u32, _wait: &[vk::Semaphore]) -> Result<bool> {
        let mut state = self.state.lock();
        if !state.swapchains.contains(&swapchain) {
            return Err(RenderError::SwapchainDestroyed);
        }
        state.stats.images_presented += 1;
        Ok(false)
    }
}

/// A command as captured by [`RecordingCommandBuffer`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    BindDescriptorSet {
        layout: vk::PipelineLayout,
        set_index: u32,
        set: vk::DescriptorSet,
    },
    PushConstants {
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: Vec<u8>,
    },
    BindVertexBuffer {
        binding: u32,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
    },
    BindPipeline(vk::Pipeline),
    /// x, y, width, height, min depth, max depth
    SetViewport([f32; 6]),
    /// x, y, width, height
    SetScissor(i32, i32, u32, u32),
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
}

static NEXT_COMMAND_BUFFER: AtomicU64 = AtomicU64::new(1);

/// Command recorder that stores commands in a shared log.
///
/// Clones share the log and the handle, so a test can hand one clone to the
/// context and inspect the other.
#[derive(Clone)]
pub struct RecordingCommandBuffer {
    handle: vk::CommandBuffer,
    log: Arc<Mutex<Vec<RecordedCommand>>>,
}

impl RecordingCommandBuffer {
    pub fn new() -> Self {
        Self {
            handle: vk::CommandBuffer::from_raw(NEXT_COMMAND_BUFFER.fetch_add(1, Ordering::Relaxed)),
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn commands(&self) -> Vec<RecordedCommand> {
        self.log.lock().clone()
    }

    pub fn clear(&self) {
        self.log.lock().clear();
    }

    fn record(&self, command: RecordedCommand) {
        self.log.lock().push(command);
    }
}

impl Default for RecordingCommandBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRecorder for RecordingCommandBuffer {
    fn handle(&self) -> vk::CommandBuffer {
        self.handle
    }

    fn bind_descriptor_set(&mut self, layout: vk::PipelineLayout, set_index: u32, set: vk::DescriptorSet) {
        self.record(RecordedCommand::BindDescriptorSet { layout, set_index, set });
    }

    fn push_constants(&mut self, layout: vk::PipelineLayout, stages: vk::ShaderStageFlags, offset: u32, data: &[u8]) {
        self.record(RecordedCommand::PushConstants {
            layout,
            stages,
            offset,
            data: data.to_vec(),
        });
    }

    fn bind_vertex_buffer(&mut self, binding: u32, buffer: vk::Buffer, offset: vk::DeviceSize) {
        self.record(RecordedCommand::BindVertexBuffer { binding, buffer, offset });
    }

    fn bind_pipeline(&mut self, pipeline: vk::Pipeline) {
        self.record(RecordedCommand::BindPipeline(pipeline));
    }

    fn set_viewport(&mut self, viewport: vk::Viewport) {
        self.record(RecordedCommand::SetViewport([
            viewport.x,
            viewport.y,
            viewport.width,
            viewport.height,
            viewport.min_depth,
            viewport.max_depth,
        ]));
    }

    fn set_scissor(&mut self, scissor: vk::Rect2D) {
        self.record(RecordedCommand::SetScissor(
            scissor.offset.x,
            scissor.offset.y,
            scissor.extent.width,
            scissor.extent.height,
        ));
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        self.record(RecordedCommand::Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_unique() {
        let backend = DummyBackend::new();
        let a = backend.create_vertex_buffer(&[0; 4]).unwrap();
        let b = backend.create_vertex_buffer(&[0; 4]).unwrap();
        assert_ne!(a, b);
        assert_ne!(a, vk::Buffer::null());
    }

    #[test]
    fn pipeline_layouts_are_cached() {
        let backend = DummyBackend::new();
        let ranges = [PushConstantRange {
            stages: vk::ShaderStageFlags::VERTEX,
            offset: 0,
            size: 64,
        }];
        let a = backend.select_pipeline_layout(&[], &ranges).unwrap();
        let b = backend.select_pipeline_layout(&[], &ranges).unwrap();
        assert_eq!(a, b);
        assert_eq!(backend.stats().pipeline_layouts_created, 1);
        assert_eq!(backend.stats().pipeline_layout_selects, 2);
    }

    #[test]
    fn acquire_cycles_through_images() {
        let backend = DummyBackend::with_image_count(2);
        let chain = backend
            .create_swapchain(vk::Extent2D { width: 4, height: 4 })
            .unwrap();
        let indices: Vec<u32> = (0..3)
            .map(|_| {
                backend
                    .acquire_next_image(chain.handle, vk::Semaphore::null())
                    .unwrap()
                    .index
            })
            .collect();
        assert_eq!(indices, vec![0, 1, 0]);
    }

    #[test]
    fn recording_clones_share_a_log() {
        let recorder = RecordingCommandBuffer::new();
        let mut clone = recorder.clone();
        clone.draw(4, 1, 0, 0);
        assert_eq!(clone.handle(), recorder.handle());
        assert_eq!(
            recorder.commands(),
            vec![RecordedCommand::Draw {
                vertex_count: 4,
                instance_count: 1,
                first_vertex: 0,
                first_instance: 0,
            }]
        );
    }
}
