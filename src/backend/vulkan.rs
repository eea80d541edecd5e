// Vulkan backend
//
// `VulkanBackend` implements `GpuBackend` on top of a `VulkanDevice` and a
// window surface. It owns:
// - the state selectors (set layouts, pipeline layouts, pipelines)
// - a descriptor pool the descriptor set views allocate from
// - memory of every buffer and image it hands out, keyed by handle
// - shader modules loaded through it, kept until the backend is dropped
//
// Queue access (uploads, submits, presents) is serialized by one lock.

use ash::extensions::khr;
use ash::vk;
use gpu_allocator::vulkan::Allocation;
use parking_lot::Mutex;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::collections::HashMap;
use std::sync::Arc;

use super::buffer;
use super::device::VulkanDevice;
use super::format::has_stencil;
use super::pipeline::PipelineDesc;
use super::selectors::{DescriptorSetLayoutSelector, PipelineLayoutSelector, PipelineSelector};
use super::shader::create_shader_module;
use super::traits::{
    AcquiredImage, DescriptorResource, DescriptorSetLayoutDesc, DescriptorWrite, GpuBackend, NativeSwapchain,
    PushConstantRange,
};
use crate::error::{RenderError, Result, VkResultExt};

const DESCRIPTOR_POOL_SETS: u32 = 256;
const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

pub struct VulkanBackend {
    device: Arc<VulkanDevice>,
    surface_loader: khr::Surface,
    surface: vk::SurfaceKHR,
    swapchain_loader: khr::Swapchain,
    present_mode: vk::PresentModeKHR,

    set_layouts: DescriptorSetLayoutSelector,
    pipeline_layouts: PipelineLayoutSelector,
    pipelines: PipelineSelector,

    descriptor_pool: Mutex<vk::DescriptorPool>,
    upload_pool: Mutex<vk::CommandPool>,
    queue: Mutex<()>,

    buffers: Mutex<HashMap<vk::Buffer, Allocation>>,
    images: Mutex<HashMap<vk::ImageView, (vk::Image, Allocation)>>,
    shader_modules: Mutex<Vec<vk::ShaderModule>>,
}

impl VulkanBackend {
    /// Create a backend presenting to the given window.
    ///
    /// `present_mode` is a preference; FIFO is used when the surface does
    /// not support it.
    pub fn new(
        device: Arc<VulkanDevice>,
        display: RawDisplayHandle,
        window: RawWindowHandle,
        present_mode: vk::PresentModeKHR,
    ) -> Result<Self> {
        let surface_loader = khr::Surface::new(&device.entry, &device.instance);
        let surface = unsafe {
            ash_window::create_surface(&device.entry, &device.instance, display, window, None)
                .op("vkCreateSurfaceKHR")?
        };

        let supported = unsafe {
            surface_loader.get_physical_device_surface_support(
                device.physical_device,
                device.graphics_queue_family,
                surface,
            )
        };
        match supported {
            Ok(true) => {}
            Ok(false) => {
                unsafe { surface_loader.destroy_surface(surface, None) };
                return Err(RenderError::ResourceCreation {
                    resource: "surface",
                    reason: "GPU doesn't support presenting to this surface".to_string(),
                });
            }
            Err(code) => {
                unsafe { surface_loader.destroy_surface(surface, None) };
                return Err(RenderError::Vulkan {
                    operation: "vkGetPhysicalDeviceSurfaceSupportKHR",
                    code,
                });
            }
        }

        let pools = Self::create_pools(&device);
        let (descriptor_pool, upload_pool) = match pools {
            Ok(pools) => pools,
            Err(e) => {
                unsafe { surface_loader.destroy_surface(surface, None) };
                return Err(e);
            }
        };

        let swapchain_loader = khr::Swapchain::new(&device.instance, &device.device);

        Ok(Self {
            set_layouts: DescriptorSetLayoutSelector::new(device.device.clone()),
            pipeline_layouts: PipelineLayoutSelector::new(device.device.clone()),
            pipelines: PipelineSelector::new(device.device.clone()),
            device,
            surface_loader,
            surface,
            swapchain_loader,
            present_mode,
            descriptor_pool: Mutex::new(descriptor_pool),
            upload_pool: Mutex::new(upload_pool),
            queue: Mutex::new(()),
            buffers: Mutex::new(HashMap::new()),
            images: Mutex::new(HashMap::new()),
            shader_modules: Mutex::new(Vec::new()),
        })
    }

    fn create_pools(device: &VulkanDevice) -> Result<(vk::DescriptorPool, vk::CommandPool)> {
        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: DESCRIPTOR_POOL_SETS,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: DESCRIPTOR_POOL_SETS,
            },
        ];
        let descriptor_pool_info = vk::DescriptorPoolCreateInfo::builder()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(DESCRIPTOR_POOL_SETS)
            .pool_sizes(&pool_sizes);
        let descriptor_pool = unsafe {
            device
                .device
                .create_descriptor_pool(&descriptor_pool_info, None)
                .op("vkCreateDescriptorPool")?
        };

        let command_pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(device.graphics_queue_family)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let upload_pool = unsafe { device.device.create_command_pool(&command_pool_info, None) };
        match upload_pool {
            Ok(upload_pool) => Ok((descriptor_pool, upload_pool)),
            Err(code) => {
                unsafe { device.device.destroy_descriptor_pool(descriptor_pool, None) };
                Err(RenderError::Vulkan {
                    operation: "vkCreateCommandPool",
                    code,
                })
            }
        }
    }

    pub fn device(&self) -> &Arc<VulkanDevice> {
        &self.device
    }

    /// Number of distinct pipelines created so far.
    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    /// Create a shader module owned by this backend.
    ///
    /// Modules live as long as the backend so their handles are never
    /// reused while a pipeline description still names them.
    pub fn load_shader_module(&self, spirv: &[u8]) -> Result<vk::ShaderModule> {
        let module = create_shader_module(&self.device.device, spirv)?;
        self.shader_modules.lock().push(module);
        Ok(module)
    }

    /// Submit one command buffer to the graphics queue.
    pub fn submit(
        &self,
        command_buffer: vk::CommandBuffer,
        wait: vk::Semaphore,
        wait_stage: vk::PipelineStageFlags,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> Result<()> {
        let wait_semaphores = [wait];
        let wait_stages = [wait_stage];
        let command_buffers = [command_buffer];
        let signal_semaphores = [signal];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        let _queue = self.queue.lock();
        unsafe {
            self.device
                .device
                .queue_submit(self.device.graphics_queue, &[submit_info], fence)
                .op("vkQueueSubmit")
        }
    }

    /// Record with `record` into a one-shot command buffer and wait for it.
    fn immediate_submit(&self, record: impl FnOnce(vk::CommandBuffer)) -> Result<()> {
        let device = &self.device.device;
        let pool = self.upload_pool.lock();

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(*pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = unsafe {
            device
                .allocate_command_buffers(&alloc_info)
                .op("vkAllocateCommandBuffers")?
        }
        .into_iter()
        .next()
        .ok_or_else(|| RenderError::ResourceCreation {
            resource: "command buffer",
            reason: "driver returned no command buffer".to_string(),
        })?;

        let result = (|| -> Result<()> {
            let begin_info =
                vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            unsafe {
                device
                    .begin_command_buffer(command_buffer, &begin_info)
                    .op("vkBeginCommandBuffer")?;
            }
            record(command_buffer);
            unsafe {
                device.end_command_buffer(command_buffer).op("vkEndCommandBuffer")?;
            }

            let command_buffers = [command_buffer];
            let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers).build();
            let _queue = self.queue.lock();
            unsafe {
                device
                    .queue_submit(self.device.graphics_queue, &[submit_info], vk::Fence::null())
                    .op("vkQueueSubmit")?;
                device
                    .queue_wait_idle(self.device.graphics_queue)
                    .op("vkQueueWaitIdle")
            }
        })();

        unsafe { device.free_command_buffers(*pool, &[command_buffer]) };
        result
    }

    fn upload_texture(&self, staging: vk::Buffer, extent: vk::Extent2D) -> Result<(vk::ImageView, vk::Sampler)> {
        let (image, allocation) = buffer::create_image(
            &self.device,
            "texture",
            extent,
            TEXTURE_FORMAT,
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
            vk::SampleCountFlags::TYPE_1,
        )?;

        let built = (|| -> Result<(vk::ImageView, vk::Sampler)> {
            self.immediate_submit(|command_buffer| {
                record_texture_copy(&self.device.device, command_buffer, staging, image, extent)
            })?;
            let view = buffer::create_image_view(&self.device.device, image, TEXTURE_FORMAT, vk::ImageAspectFlags::COLOR)?;
            match self.create_sampler() {
                Ok(sampler) => Ok((view, sampler)),
                Err(e) => {
                    unsafe { self.device.device.destroy_image_view(view, None) };
                    Err(e)
                }
            }
        })();

        match built {
            Ok((view, sampler)) => {
                self.images.lock().insert(view, (image, allocation));
                Ok((view, sampler))
            }
            Err(e) => {
                buffer::free_image(&self.device, image, allocation);
                Err(e)
            }
        }
    }

    fn create_sampler(&self) -> Result<vk::Sampler> {
        let sampler_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .anisotropy_enable(false)
            .max_lod(0.0);
        unsafe { self.device.device.create_sampler(&sampler_info, None).op("vkCreateSampler") }
    }

    fn choose_present_mode(&self) -> Result<vk::PresentModeKHR> {
        let present_modes = unsafe {
            self.surface_loader
                .get_physical_device_surface_present_modes(self.device.physical_device, self.surface)
                .op("vkGetPhysicalDeviceSurfacePresentModesKHR")?
        };
        if present_modes.contains(&self.present_mode) {
            Ok(self.present_mode)
        } else {
            log::warn!("Present mode {:?} not supported, using FIFO", self.present_mode);
            Ok(vk::PresentModeKHR::FIFO)
        }
    }
}

fn record_texture_copy(
    device: &ash::Device,
    command_buffer: vk::CommandBuffer,
    staging: vk::Buffer,
    image: vk::Image,
    extent: vk::Extent2D,
) {
    let subresource_range = vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    };

    let to_transfer = vk::ImageMemoryBarrier::builder()
        .src_access_mask(vk::AccessFlags::empty())
        .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
        .old_layout(vk::ImageLayout::UNDEFINED)
        .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(subresource_range)
        .build();

    let region = vk::BufferImageCopy::builder()
        .image_subresource(vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        })
        .image_extent(vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        })
        .build();

    let to_shader_read = vk::ImageMemoryBarrier::builder()
        .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
        .dst_access_mask(vk::AccessFlags::SHADER_READ)
        .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(subresource_range)
        .build();

    unsafe {
        device.cmd_pipeline_barrier(
            command_buffer,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[to_transfer],
        );
        device.cmd_copy_buffer_to_image(
            command_buffer,
            staging,
            image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[region],
        );
        device.cmd_pipeline_barrier(
            command_buffer,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[to_shader_read],
        );
    }
}

impl GpuBackend for VulkanBackend {
    fn create_vertex_buffer(&self, data: &[u8]) -> Result<vk::Buffer> {
        let (buffer, allocation) =
            buffer::create_buffer_with_data(&self.device, "vertex buffer", vk::BufferUsageFlags::VERTEX_BUFFER, data)?;
        self.buffers.lock().insert(buffer, allocation);
        Ok(buffer)
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        let allocation = self.buffers.lock().remove(&buffer);
        match allocation {
            Some(allocation) => buffer::free_buffer(&self.device, buffer, allocation),
            None => log::warn!("Destroying unknown buffer {:?}", buffer),
        }
    }

    fn create_texture_rgba8(&self, width: u32, height: u32, pixels: &[u8]) -> Result<(vk::ImageView, vk::Sampler)> {
        let expected = width as usize * height as usize * 4;
        if width == 0 || height == 0 || pixels.len() != expected {
            return Err(RenderError::InvalidParameter(format!(
                "{}x{} RGBA8 texture needs {} bytes, got {}",
                width,
                height,
                expected,
                pixels.len()
            )));
        }

        log::debug!("Uploading {}x{} texture", width, height);
        let (staging, staging_allocation) =
            buffer::create_buffer_with_data(&self.device, "texture staging", vk::BufferUsageFlags::TRANSFER_SRC, pixels)?;
        let result = self.upload_texture(staging, vk::Extent2D { width, height });
        buffer::free_buffer(&self.device, staging, staging_allocation);
        result
    }

    fn destroy_texture(&self, view: vk::ImageView, sampler: vk::Sampler) {
        unsafe { self.device.device.destroy_sampler(sampler, None) };
        self.destroy_image_view(view);
    }

    fn select_descriptor_set_layouts(&self, sets: &[DescriptorSetLayoutDesc]) -> Result<Vec<vk::DescriptorSetLayout>> {
        self.set_layouts.select(sets)
    }

    fn allocate_descriptor_sets(&self, layouts: &[vk::DescriptorSetLayout]) -> Result<Vec<vk::DescriptorSet>> {
        if layouts.is_empty() {
            return Ok(Vec::new());
        }
        let pool = self.descriptor_pool.lock();
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(*pool)
            .set_layouts(layouts);
        unsafe {
            self.device
                .device
                .allocate_descriptor_sets(&alloc_info)
                .op("vkAllocateDescriptorSets")
        }
    }

    fn write_descriptor_sets(&self, writes: &[DescriptorWrite]) {
        let image_infos: Vec<[vk::DescriptorImageInfo; 1]> = writes
            .iter()
            .map(|write| match write.resource {
                DescriptorResource::CombinedImageSampler { view, sampler, layout } => [vk::DescriptorImageInfo {
                    sampler,
                    image_view: view,
                    image_layout: layout,
                }],
            })
            .collect();

        let vk_writes: Vec<_> = writes
            .iter()
            .zip(&image_infos)
            .map(|(write, image_info)| {
                vk::WriteDescriptorSet::builder()
                    .dst_set(write.set)
                    .dst_binding(write.binding)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(image_info)
                    .build()
            })
            .collect();

        unsafe { self.device.device.update_descriptor_sets(&vk_writes, &[]) };
    }

    fn free_descriptor_sets(&self, sets: &[vk::DescriptorSet]) {
        if sets.is_empty() {
            return;
        }
        let pool = self.descriptor_pool.lock();
        if let Err(e) = unsafe { self.device.device.free_descriptor_sets(*pool, sets) } {
            log::warn!("vkFreeDescriptorSets failed: {}", e);
        }
    }

    fn select_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[PushConstantRange],
    ) -> Result<vk::PipelineLayout> {
        self.pipeline_layouts.select(set_layouts, push_constant_ranges)
    }

    fn select_pipeline(&self, desc: &PipelineDesc) -> Result<vk::Pipeline> {
        self.pipelines.select(desc)
    }

    fn create_swapchain(&self, extent: vk::Extent2D) -> Result<NativeSwapchain> {
        let physical_device = self.device.physical_device;
        let surface_caps = unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(physical_device, self.surface)
                .op("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?
        };
        let formats = unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(physical_device, self.surface)
                .op("vkGetPhysicalDeviceSurfaceFormatsKHR")?
        };

        // Prefer SRGB
        let surface_format = formats
            .iter()
            .find(|f| f.format == vk::Format::B8G8R8A8_SRGB && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
            .or_else(|| formats.first())
            .copied()
            .ok_or_else(|| RenderError::ResourceCreation {
                resource: "swapchain",
                reason: "no suitable surface format".to_string(),
            })?;

        let present_mode = self.choose_present_mode()?;
        log::info!("Present mode: {:?}", present_mode);

        let extent = if surface_caps.current_extent.width != u32::MAX {
            surface_caps.current_extent
        } else {
            vk::Extent2D {
                width: extent
                    .width
                    .clamp(surface_caps.min_image_extent.width, surface_caps.max_image_extent.width),
                height: extent
                    .height
                    .clamp(surface_caps.min_image_extent.height, surface_caps.max_image_extent.height),
            }
        };

        let mut image_count = surface_caps.min_image_count + 1;
        if surface_caps.max_image_count > 0 && image_count > surface_caps.max_image_count {
            image_count = surface_caps.max_image_count;
        }

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(surface_caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let handle = unsafe {
            self.swapchain_loader
                .create_swapchain(&create_info, None)
                .op("vkCreateSwapchainKHR")?
        };

        let images = unsafe { self.swapchain_loader.get_swapchain_images(handle) };
        let images = match images {
            Ok(images) => images,
            Err(code) => {
                unsafe { self.swapchain_loader.destroy_swapchain(handle, None) };
                return Err(RenderError::Vulkan {
                    operation: "vkGetSwapchainImagesKHR",
                    code,
                });
            }
        };

        Ok(NativeSwapchain {
            handle,
            images,
            format: surface_format.format,
            extent,
        })
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) };
    }

    fn create_color_view(&self, image: vk::Image, format: vk::Format) -> Result<vk::ImageView> {
        buffer::create_image_view(&self.device.device, image, format, vk::ImageAspectFlags::COLOR)
    }

    fn depth_stencil_format(&self) -> vk::Format {
        self.device.depth_stencil_format
    }

    fn create_depth_stencil(
        &self,
        extent: vk::Extent2D,
        format: vk::Format,
        samples: vk::SampleCountFlags,
    ) -> Result<vk::ImageView> {
        let (image, allocation) = buffer::create_image(
            &self.device,
            "depth/stencil attachment",
            extent,
            format,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            samples,
        )?;

        let mut aspect = vk::ImageAspectFlags::DEPTH;
        if has_stencil(format) {
            aspect |= vk::ImageAspectFlags::STENCIL;
        }

        match buffer::create_image_view(&self.device.device, image, format, aspect) {
            Ok(view) => {
                self.images.lock().insert(view, (image, allocation));
                Ok(view)
            }
            Err(e) => {
                buffer::free_image(&self.device, image, allocation);
                Err(e)
            }
        }
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.device.destroy_image_view(view, None) };
        let owned = self.images.lock().remove(&view);
        if let Some((image, allocation)) = owned {
            buffer::free_image(&self.device, image, allocation);
        }
    }

    fn acquire_next_image(&self, swapchain: vk::SwapchainKHR, signal: vk::Semaphore) -> Result<AcquiredImage> {
        let result = unsafe {
            self.swapchain_loader
                .acquire_next_image(swapchain, u64::MAX, signal, vk::Fence::null())
        };
        match result {
            Ok((index, suboptimal)) => Ok(AcquiredImage { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(RenderError::SwapchainOutOfDate),
            Err(code) => Err(RenderError::Vulkan {
                operation: "vkAcquireNextImageKHR",
                code,
            }),
        }
    }

    fn present(&self, swapchain: vk::SwapchainKHR, image_index: u32, wait: &[vk::Semaphore]) -> Result<bool> {
        let swapchains = [swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let _queue = self.queue.lock();
        let result = unsafe {
            self.swapchain_loader
                .queue_present(self.device.graphics_queue, &present_info)
        };
        match result {
            Ok(suboptimal) => Ok(suboptimal),
            // Still presented nothing, but the caller only needs to rebuild
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(code) => Err(RenderError::Vulkan {
                operation: "vkQueuePresentKHR",
                code,
            }),
        }
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan backend...");
        let _ = self.device.wait_idle();

        let device = &self.device.device;
        unsafe {
            self.pipelines.destroy();
            self.pipeline_layouts.destroy();
            self.set_layouts.destroy();

            device.destroy_descriptor_pool(*self.descriptor_pool.get_mut(), None);
            device.destroy_command_pool(*self.upload_pool.get_mut(), None);

            for module in self.shader_modules.get_mut().drain(..) {
                device.destroy_shader_module(module, None);
            }
        }

        let buffers: Vec<_> = self.buffers.get_mut().drain().collect();
        if !buffers.is_empty() {
            log::warn!("{} buffers still alive at backend teardown", buffers.len());
        }
        for (buffer, allocation) in buffers {
            buffer::free_buffer(&self.device, buffer, allocation);
        }

        let images: Vec<_> = self.images.get_mut().drain().collect();
        if !images.is_empty() {
            log::warn!("{} images still alive at backend teardown", images.len());
        }
        for (view, (image, allocation)) in images {
            unsafe { self.device.device.destroy_image_view(view, None) };
            buffer::free_image(&self.device, image, allocation);
        }

        unsafe { self.surface_loader.destroy_surface(self.surface, None) };
    }
}
