// Command recording
//
// `CommandRecorder` is the set of commands the draw helpers record. The
// Vulkan implementation forwards straight to `vkCmd*`.

use ash::vk;

use crate::error::{Result, VkResultExt};

/// Sink for the commands the draw helpers issue.
pub trait CommandRecorder {
    /// Native handle of the command buffer being recorded.
    fn handle(&self) -> vk::CommandBuffer;

    fn bind_descriptor_set(&mut self, layout: vk::PipelineLayout, set_index: u32, set: vk::DescriptorSet);

    fn push_constants(&mut self, layout: vk::PipelineLayout, stages: vk::ShaderStageFlags, offset: u32, data: &[u8]);

    fn bind_vertex_buffer(&mut self, binding: u32, buffer: vk::Buffer, offset: vk::DeviceSize);

    fn bind_pipeline(&mut self, pipeline: vk::Pipeline);

    fn set_viewport(&mut self, viewport: vk::Viewport);

    fn set_scissor(&mut self, scissor: vk::Rect2D);

    fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32);
}

/// A primary command buffer recorded through `ash`.
#[derive(Clone)]
pub struct VulkanCommandBuffer {
    device: ash::Device,
    command_buffer: vk::CommandBuffer,
}

impl VulkanCommandBuffer {
    pub fn new(device: ash::Device, command_buffer: vk::CommandBuffer) -> Self {
        Self { device, command_buffer }
    }

    /// Reset and begin a one-time-submit recording.
    pub fn begin(&self) -> Result<()> {
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device
                .reset_command_buffer(self.command_buffer, vk::CommandBufferResetFlags::empty())
                .op("vkResetCommandBuffer")?;
            self.device
                .begin_command_buffer(self.command_buffer, &begin_info)
                .op("vkBeginCommandBuffer")
        }
    }

    pub fn end(&self) -> Result<()> {
        unsafe { self.device.end_command_buffer(self.command_buffer).op("vkEndCommandBuffer") }
    }

    pub fn begin_render_pass(
        &self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[vk::ClearValue],
    ) {
        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(clear_values);
        unsafe {
            self.device
                .cmd_begin_render_pass(self.command_buffer, &begin_info, vk::SubpassContents::INLINE);
        }
    }

    pub fn end_render_pass(&self) {
        unsafe { self.device.cmd_end_render_pass(self.command_buffer) }
    }
}

impl CommandRecorder for VulkanCommandBuffer {
    fn handle(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    fn bind_descriptor_set(&mut self, layout: vk::PipelineLayout, set_index: u32, set: vk::DescriptorSet) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                self.command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                set_index,
                &[set],
                &[],
            );
        }
    }

    fn push_constants(&mut self, layout: vk::PipelineLayout, stages: vk::ShaderStageFlags, offset: u32, data: &[u8]) {
        unsafe {
            self.device
                .cmd_push_constants(self.command_buffer, layout, stages, offset, data);
        }
    }

    fn bind_vertex_buffer(&mut self, binding: u32, buffer: vk::Buffer, offset: vk::DeviceSize) {
        unsafe {
            self.device
                .cmd_bind_vertex_buffers(self.command_buffer, binding, &[buffer], &[offset]);
        }
    }

    fn bind_pipeline(&mut self, pipeline: vk::Pipeline) {
        unsafe {
            self.device
                .cmd_bind_pipeline(self.command_buffer, vk::PipelineBindPoint::GRAPHICS, pipeline);
        }
    }

    fn set_viewport(&mut self, viewport: vk::Viewport) {
        unsafe { self.device.cmd_set_viewport(self.command_buffer, 0, &[viewport]) }
    }

    fn set_scissor(&mut self, scissor: vk::Rect2D) {
        unsafe { self.device.cmd_set_scissor(self.command_buffer, 0, &[scissor]) }
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        unsafe {
            self.device.cmd_draw(
                self.command_buffer,
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            );
        }
    }
}
