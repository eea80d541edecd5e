// Backend module - Vulkan abstraction layer
//
// `GpuBackend` is the seam: `VulkanBackend` drives a real device through ash,
// `DummyBackend` stands in without a GPU.

pub mod buffer;
pub mod command;
pub mod device;
pub mod dummy;
pub mod format;
pub mod pipeline;
pub mod selectors;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod traits;
pub mod vulkan;

pub use buffer::VertexBuffer;
pub use command::{CommandRecorder, VulkanCommandBuffer};
pub use device::VulkanDevice;
pub use dummy::{DummyBackend, RecordedCommand, RecordingCommandBuffer};
pub use pipeline::{BlendAttachment, DepthBias, PipelineDesc};
pub use swapchain::{Swapchain, SwapchainId, SwapchainRef, SwapchainRegistry};
pub use traits::GpuBackend;
pub use vulkan::VulkanBackend;
