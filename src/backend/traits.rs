// Core backend abstraction.
//
// `GpuBackend` is the seam between the renderer and the native graphics
// API. The helpers, the swapchain and the resource wrappers only ever talk
// to a backend through this trait, which lets the same code run against
// Vulkan (`VulkanBackend`) or without a GPU
// (`DummyBackend`).

use ash::vk;

use super::pipeline::PipelineDesc;
use crate::error::Result;

/// One binding of a descriptor set layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SetLayoutBinding {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub count: u32,
    pub stages: vk::ShaderStageFlags,
}

impl SetLayoutBinding {
    pub fn to_vk(&self) -> vk::DescriptorSetLayoutBinding {
        vk::DescriptorSetLayoutBinding::builder()
            .binding(self.binding)
            .descriptor_type(self.descriptor_type)
            .descriptor_count(self.count)
            .stage_flags(self.stages)
            .build()
    }
}

/// Bindings of one descriptor set, ordered by binding number.
pub type DescriptorSetLayoutDesc = Vec<SetLayoutBinding>;

/// A push constant range of a pipeline layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PushConstantRange {
    pub stages: vk::ShaderStageFlags,
    pub offset: u32,
    pub size: u32,
}

impl PushConstantRange {
    pub fn to_vk(&self) -> vk::PushConstantRange {
        vk::PushConstantRange {
            stage_flags: self.stages,
            offset: self.offset,
            size: self.size,
        }
    }
}

/// A resource written into a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorResource {
    CombinedImageSampler {
        view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
    },
}

/// A single descriptor update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorWrite {
    pub set: vk::DescriptorSet,
    pub binding: u32,
    pub resource: DescriptorResource,
}

/// A freshly created native swapchain.
#[derive(Debug, Clone)]
pub struct NativeSwapchain {
    pub handle: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

/// Result of acquiring a swapchain image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredImage {
    pub index: u32,
    /// The chain still works but no longer matches the surface exactly.
    pub suboptimal: bool,
}

/// Native services the renderer needs from a GPU.
///
/// Selection methods (`select_*`) are expected to cache: asking twice for the
/// same state returns the same handle.
pub trait GpuBackend: Send + Sync {
    // Buffers

    /// Create a host-visible vertex buffer filled with `data`.
    fn create_vertex_buffer(&self, data: &[u8]) -> Result<vk::Buffer>;

    fn destroy_buffer(&self, buffer: vk::Buffer);

    // Textures

    /// Create a sampled RGBA8 texture; returns its view and sampler.
    fn create_texture_rgba8(&self, width: u32, height: u32, pixels: &[u8]) -> Result<(vk::ImageView, vk::Sampler)>;

    fn destroy_texture(&self, view: vk::ImageView, sampler: vk::Sampler);

    // Descriptors

    /// Select (create or reuse) one layout per descriptor set.
    fn select_descriptor_set_layouts(&self, sets: &[DescriptorSetLayoutDesc]) -> Result<Vec<vk::DescriptorSetLayout>>;

    fn allocate_descriptor_sets(&self, layouts: &[vk::DescriptorSetLayout]) -> Result<Vec<vk::DescriptorSet>>;

    fn write_descriptor_sets(&self, writes: &[DescriptorWrite]);

    fn free_descriptor_sets(&self, sets: &[vk::DescriptorSet]);

    // Pipelines

    /// Select (create or reuse) a pipeline layout.
    fn select_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[PushConstantRange],
    ) -> Result<vk::PipelineLayout>;

    /// Select (create or reuse) a graphics pipeline.
    fn select_pipeline(&self, desc: &PipelineDesc) -> Result<vk::Pipeline>;

    // Presentation

    fn create_swapchain(&self, extent: vk::Extent2D) -> Result<NativeSwapchain>;

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);

    /// Create a view onto a swapchain-owned color image.
    fn create_color_view(&self, image: vk::Image, format: vk::Format) -> Result<vk::ImageView>;

    /// Depth/stencil format attachments are created with.
    fn depth_stencil_format(&self) -> vk::Format;

    /// Create a depth/stencil image and return its view. The image is owned
    /// by the view and released with it.
    fn create_depth_stencil(
        &self,
        extent: vk::Extent2D,
        format: vk::Format,
        samples: vk::SampleCountFlags,
    ) -> Result<vk::ImageView>;

    /// Destroy a view, and the image behind it if the backend owns one.
    fn destroy_image_view(&self, view: vk::ImageView);

    fn acquire_next_image(&self, swapchain: vk::SwapchainKHR, signal: vk::Semaphore) -> Result<AcquiredImage>;

    /// Queue `image_index` for presentation. Returns `true` when suboptimal.
    fn present(&self, swapchain: vk::SwapchainKHR, image_index: u32, wait: &[vk::Semaphore]) -> Result<bool>;
}
