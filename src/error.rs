// Renderer error types.

use ash::vk;
use thiserror::Error;

/// Errors reported by the renderer and its backends.
#[derive(Error, Debug)]
pub enum RenderError {
    /// A native Vulkan call failed.
    #[error("{operation} failed: {code}")]
    Vulkan {
        operation: &'static str,
        code: vk::Result,
    },
    #[error("failed to create {resource}: {reason}")]
    ResourceCreation {
        resource: &'static str,
        reason: String,
    },
    #[error("GPU memory allocation failed: {0}")]
    Allocation(#[from] gpu_allocator::AllocationError),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("swapchain is out of date")]
    SwapchainOutOfDate,
    #[error("swapchain has been destroyed")]
    SwapchainDestroyed,
    #[error("no swapchain image has been acquired")]
    NoAcquiredImage,
    #[error("no shader program is bound")]
    NoShaderBound,
    #[error("no command buffer is being recorded")]
    NoCommandBuffer,
    #[error("no render pass is active")]
    NoRenderPass,
    #[error("subpass {0} does not exist in the active render pass")]
    InvalidSubpass(u32),
    #[error("shader has no uniform named `{0}`")]
    UnknownUniform(String),
    #[error("push constant `{name}` spans {expected} bytes but only {actual} were supplied")]
    PushConstantSize {
        name: &'static str,
        expected: u32,
        actual: usize,
    },
    #[error("unsupported vertex attribute format {0:?}")]
    UnsupportedFormat(vk::Format),
}

pub type Result<T, E = RenderError> = std::result::Result<T, E>;

/// Tags a raw `vk::Result` failure with the operation that produced it.
pub(crate) trait VkResultExt<T> {
    fn op(self, operation: &'static str) -> Result<T>;
}

impl<T> VkResultExt<T> for std::result::Result<T, vk::Result> {
    fn op(self, operation: &'static str) -> Result<T> {
        self.map_err(|code| RenderError::Vulkan { operation, code })
    }
}
