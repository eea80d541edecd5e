// Buffer and image memory
//
// Native buffers and images are bound to memory from the device's
// gpu-allocator. `VertexBuffer` is the backend-agnostic owner the draw
// helpers keep their unit quad in.

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

use super::device::VulkanDevice;
use super::traits::GpuBackend;
use crate::error::{RenderError, Result, VkResultExt};

/// Create a buffer and bind it to freshly allocated memory.
pub fn create_buffer(
    device: &VulkanDevice,
    name: &str,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    location: MemoryLocation,
) -> Result<(vk::Buffer, Allocation)> {
    let buffer_info = vk::BufferCreateInfo::builder()
        .size(size)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    let buffer = unsafe { device.device.create_buffer(&buffer_info, None).op("vkCreateBuffer")? };
    let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

    let allocation = device.allocator.lock().allocate(&AllocationCreateDesc {
        name,
        requirements,
        location,
        linear: true,
        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
    });
    let allocation = match allocation {
        Ok(allocation) => allocation,
        Err(e) => {
            unsafe { device.device.destroy_buffer(buffer, None) };
            return Err(e.into());
        }
    };

    let bound = unsafe {
        device
            .device
            .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
            .op("vkBindBufferMemory")
    };
    if let Err(e) = bound {
        free_buffer(device, buffer, allocation);
        return Err(e);
    }

    Ok((buffer, allocation))
}

/// Create a host-visible buffer and copy `data` into it.
pub fn create_buffer_with_data(
    device: &VulkanDevice,
    name: &str,
    usage: vk::BufferUsageFlags,
    data: &[u8],
) -> Result<(vk::Buffer, Allocation)> {
    let (buffer, mut allocation) = create_buffer(device, name, data.len() as vk::DeviceSize, usage, MemoryLocation::CpuToGpu)?;

    match allocation.mapped_slice_mut() {
        Some(mapped) => {
            mapped[..data.len()].copy_from_slice(data);
            Ok((buffer, allocation))
        }
        None => {
            free_buffer(device, buffer, allocation);
            Err(RenderError::ResourceCreation {
                resource: "buffer",
                reason: format!("{} memory is not host visible", name),
            })
        }
    }
}

pub fn free_buffer(device: &VulkanDevice, buffer: vk::Buffer, allocation: Allocation) {
    if let Err(e) = device.allocator.lock().free(allocation) {
        log::warn!("Failed to free buffer memory: {}", e);
    }
    unsafe { device.device.destroy_buffer(buffer, None) };
}

/// Create a 2D image bound to device-local memory.
pub fn create_image(
    device: &VulkanDevice,
    name: &str,
    extent: vk::Extent2D,
    format: vk::Format,
    usage: vk::ImageUsageFlags,
    samples: vk::SampleCountFlags,
) -> Result<(vk::Image, Allocation)> {
    let image_info = vk::ImageCreateInfo::builder()
        .image_type(vk::ImageType::TYPE_2D)
        .extent(vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        })
        .mip_levels(1)
        .array_layers(1)
        .format(format)
        .tiling(vk::ImageTiling::OPTIMAL)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .usage(usage)
        .samples(samples)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    let image = unsafe { device.device.create_image(&image_info, None).op("vkCreateImage")? };
    let requirements = unsafe { device.device.get_image_memory_requirements(image) };

    let allocation = device.allocator.lock().allocate(&AllocationCreateDesc {
        name,
        requirements,
        location: MemoryLocation::GpuOnly,
        linear: false,
        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
    });
    let allocation = match allocation {
        Ok(allocation) => allocation,
        Err(e) => {
            unsafe { device.device.destroy_image(image, None) };
            return Err(e.into());
        }
    };

    let bound = unsafe {
        device
            .device
            .bind_image_memory(image, allocation.memory(), allocation.offset())
            .op("vkBindImageMemory")
    };
    if let Err(e) = bound {
        free_image(device, image, allocation);
        return Err(e);
    }

    Ok((image, allocation))
}

pub fn free_image(device: &VulkanDevice, image: vk::Image, allocation: Allocation) {
    if let Err(e) = device.allocator.lock().free(allocation) {
        log::warn!("Failed to free image memory: {}", e);
    }
    unsafe { device.device.destroy_image(image, None) };
}

/// Create a single-level 2D view of `image`.
pub fn create_image_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
    aspect_mask: vk::ImageAspectFlags,
) -> Result<vk::ImageView> {
    let view_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping::default())
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });

    unsafe { device.create_image_view(&view_info, None).op("vkCreateImageView") }
}

/// A vertex buffer owned through a backend; released on drop.
pub struct VertexBuffer {
    buffer: vk::Buffer,
    size: usize,
    backend: Arc<dyn GpuBackend>,
}

impl VertexBuffer {
    pub fn new(backend: Arc<dyn GpuBackend>, data: &[u8]) -> Result<Self> {
        let buffer = backend.create_vertex_buffer(data)?;
        Ok(Self {
            buffer,
            size: data.len(),
            backend,
        })
    }

    pub fn buffer(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

impl Drop for VertexBuffer {
    fn drop(&mut self) {
        self.backend.destroy_buffer(self.buffer);
    }
}

impl std::fmt::Debug for VertexBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VertexBuffer")
            .field("buffer", &self.buffer)
            .field("size", &self.size)
            .finish()
    }
}
