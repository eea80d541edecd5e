// Swapchain management and cached quad drawing on Vulkan.
//
// The crate is organized around a `RenderContext` that carries the state the
// two quad helpers, `draw` and `draw_solid_rect`, read on every call. Native
// work goes through the `GpuBackend` trait, implemented by `VulkanBackend`
// and, for tests and headless use, `DummyBackend`.

pub mod backend;
pub mod config;
pub mod context;
pub mod draw;
pub mod error;
pub mod program;
pub mod rect;
pub mod texture;
pub mod transient;
pub mod uniform;

pub use backend::{Swapchain, SwapchainRef};
pub use context::{RasterState, RenderContext, RenderPassInfo};
pub use draw::{draw, draw_solid_rect};
pub use error::{RenderError, Result};
pub use program::ShaderProgram;
pub use rect::Rect;
pub use texture::Texture2d;
