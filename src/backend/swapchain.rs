// Swapchain
//
// Owns a presentable image chain, one color attachment view per image and an
// optional depth/stencil attachment. Every swapchain is tracked by the
// registry of the context it was created with so the context can release all
// of them at teardown.

use ash::vk;
use glam::UVec2;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use super::traits::{AcquiredImage, GpuBackend};
use crate::context::RenderContext;
use crate::error::{RenderError, Result};

pub type SwapchainRef = Arc<Swapchain>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SwapchainId(u64);

/// Swapchains created against one context.
///
/// Entries are weak: the registry never keeps a swapchain alive.
#[derive(Default)]
pub struct SwapchainRegistry {
    next_id: AtomicU64,
    entries: Mutex<Vec<(SwapchainId, Weak<Swapchain>)>>,
}

impl SwapchainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> SwapchainId {
        SwapchainId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn register(&self, swapchain: &SwapchainRef) {
        self.entries.lock().push((swapchain.id, Arc::downgrade(swapchain)));
    }

    fn remove(&self, id: SwapchainId) {
        self.entries.lock().retain(|(entry, _)| *entry != id);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn contains(&self, id: SwapchainId) -> bool {
        self.entries.lock().iter().any(|(entry, _)| *entry == id)
    }

    /// Strong references to every swapchain still alive.
    pub(crate) fn live(&self) -> Vec<SwapchainRef> {
        self.entries.lock().iter().filter_map(|(_, weak)| weak.upgrade()).collect()
    }

    pub(crate) fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[derive(Default)]
struct SwapchainState {
    handle: vk::SwapchainKHR,
    extent: vk::Extent2D,
    color_format: vk::Format,
    color_attachments: Vec<vk::ImageView>,
    depth_stencil_format: vk::Format,
    depth_stencil_attachment: Option<vk::ImageView>,
    current_image: Option<u32>,
    destroyed: bool,
}

pub struct Swapchain {
    id: SwapchainId,
    backend: Arc<dyn GpuBackend>,
    registry: Weak<SwapchainRegistry>,
    requested_size: UVec2,
    has_depth: bool,
    depth_stencil_samples: vk::SampleCountFlags,
    state: Mutex<SwapchainState>,
}

impl Swapchain {
    /// Create and initialize a swapchain, tracked by `context`.
    ///
    /// On failure everything built so far is released and nothing is
    /// registered.
    pub fn create(
        size: UVec2,
        depth_stencil: bool,
        depth_stencil_samples: vk::SampleCountFlags,
        context: &RenderContext,
    ) -> Result<SwapchainRef> {
        if size.x == 0 || size.y == 0 {
            return Err(RenderError::InvalidParameter(format!(
                "swapchain size must be non-zero, got {}x{}",
                size.x, size.y
            )));
        }

        let registry = context.swapchain_registry();
        let swapchain = Arc::new(Self {
            id: registry.next_id(),
            backend: context.backend().clone(),
            registry: Arc::downgrade(registry),
            requested_size: size,
            has_depth: depth_stencil,
            depth_stencil_samples,
            state: Mutex::new(SwapchainState::default()),
        });

        if let Err(e) = swapchain.initialize() {
            swapchain.destroy(false);
            return Err(e);
        }

        registry.register(&swapchain);
        Ok(swapchain)
    }

    fn initialize(&self) -> Result<()> {
        log::info!("Creating swapchain: {}x{}", self.requested_size.x, self.requested_size.y);

        let native = self.backend.create_swapchain(vk::Extent2D {
            width: self.requested_size.x,
            height: self.requested_size.y,
        })?;
        let image_count = native.images.len();

        {
            let mut state = self.state.lock();
            state.handle = native.handle;
            state.extent = native.extent;
            state.color_format = native.format;
        }

        if image_count == 0 {
            return Err(RenderError::ResourceCreation {
                resource: "swapchain",
                reason: "swapchain has no images".to_string(),
            });
        }

        self.init_color_buffers(&native.images)?;
        if self.has_depth {
            self.init_depth_stencil_buffers()?;
        }

        log::info!("Created swapchain with {} images", image_count);
        Ok(())
    }

    fn init_color_buffers(&self, images: &[vk::Image]) -> Result<()> {
        let mut state = self.state.lock();
        let format = state.color_format;
        for &image in images {
            let view = self.backend.create_color_view(image, format)?;
            state.color_attachments.push(view);
        }
        Ok(())
    }

    fn init_depth_stencil_buffers(&self) -> Result<()> {
        let format = self.backend.depth_stencil_format();
        let mut state = self.state.lock();
        let view = self
            .backend
            .create_depth_stencil(state.extent, format, self.depth_stencil_samples)?;
        state.depth_stencil_format = format;
        state.depth_stencil_attachment = Some(view);
        Ok(())
    }

    /// Release attachments and the native chain.
    ///
    /// `remove_from_tracking` is false when the owning context tears down
    /// and clears its whole registry itself. Calling again is a no-op.
    pub(crate) fn destroy(&self, remove_from_tracking: bool) {
        {
            let mut state = self.state.lock();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            state.current_image = None;

            if let Some(view) = state.depth_stencil_attachment.take() {
                self.backend.destroy_image_view(view);
            }
            for view in state.color_attachments.drain(..) {
                self.backend.destroy_image_view(view);
            }
            if state.handle != vk::SwapchainKHR::null() {
                self.backend.destroy_swapchain(state.handle);
                state.handle = vk::SwapchainKHR::null();
            }
        }

        if remove_from_tracking {
            if let Some(registry) = self.registry.upgrade() {
                registry.remove(self.id);
            }
        }
    }

    pub fn id(&self) -> SwapchainId {
        self.id
    }

    pub fn is_destroyed(&self) -> bool {
        self.state.lock().destroyed
    }

    pub fn swapchain(&self) -> vk::SwapchainKHR {
        self.state.lock().handle
    }

    pub fn image_count(&self) -> u32 {
        self.state.lock().color_attachments.len() as u32
    }

    pub fn width(&self) -> u32 {
        self.state.lock().extent.width
    }

    pub fn height(&self) -> u32 {
        self.state.lock().extent.height
    }

    pub fn size(&self) -> UVec2 {
        let extent = self.state.lock().extent;
        UVec2::new(extent.width, extent.height)
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.state.lock().extent
    }

    pub fn color_format(&self) -> vk::Format {
        self.state.lock().color_format
    }

    pub fn color_attachments(&self) -> Vec<vk::ImageView> {
        self.state.lock().color_attachments.clone()
    }

    pub fn has_depth_stencil(&self) -> bool {
        self.has_depth
    }

    /// `vk::Format::UNDEFINED` without a depth/stencil attachment.
    pub fn depth_stencil_format(&self) -> vk::Format {
        self.state.lock().depth_stencil_format
    }

    pub fn depth_stencil_attachment(&self) -> Option<vk::ImageView> {
        self.state.lock().depth_stencil_attachment
    }

    pub fn depth_stencil_samples(&self) -> vk::SampleCountFlags {
        self.depth_stencil_samples
    }

    /// Index of the image acquired last, until it is presented.
    pub fn current_image_index(&self) -> Option<u32> {
        self.state.lock().current_image
    }

    /// Acquire the next image, signaling `signal` when it is ready.
    pub fn acquire_next_image(&self, signal: vk::Semaphore) -> Result<AcquiredImage> {
        let handle = {
            let state = self.state.lock();
            if state.destroyed {
                return Err(RenderError::SwapchainDestroyed);
            }
            state.handle
        };

        match self.backend.acquire_next_image(handle, signal) {
            Ok(acquired) => {
                self.state.lock().current_image = Some(acquired.index);
                Ok(acquired)
            }
            Err(e) => {
                self.state.lock().current_image = None;
                Err(e)
            }
        }
    }

    /// Present the acquired image once `wait` is signaled. Returns `true`
    /// when the chain should be recreated.
    pub fn present(&self, wait: &[vk::Semaphore]) -> Result<bool> {
        let (handle, index) = {
            let mut state = self.state.lock();
            if state.destroyed {
                return Err(RenderError::SwapchainDestroyed);
            }
            let index = state.current_image.take().ok_or(RenderError::NoAcquiredImage)?;
            (state.handle, index)
        };
        self.backend.present(handle, index, wait)
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy(true);
    }
}

impl std::fmt::Debug for Swapchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Swapchain")
            .field("id", &self.id)
            .field("handle", &state.handle)
            .field("extent", &state.extent)
            .field("images", &state.color_attachments.len())
            .field("depth_stencil", &state.depth_stencil_attachment.is_some())
            .field("destroyed", &state.destroyed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyBackend;

    fn context(backend: &Arc<DummyBackend>) -> RenderContext {
        RenderContext::new(backend.clone(), 2)
    }

    #[test]
    fn color_attachments_match_image_count() {
        let backend = Arc::new(DummyBackend::with_image_count(3));
        let ctx = context(&backend);
        let swapchain = Swapchain::create(UVec2::new(640, 480), false, vk::SampleCountFlags::TYPE_1, &ctx).unwrap();

        assert_eq!(swapchain.image_count(), 3);
        assert_eq!(swapchain.color_attachments().len(), 3);
        assert_eq!(swapchain.size(), UVec2::new(640, 480));
        assert!(swapchain.depth_stencil_attachment().is_none());
        assert_eq!(swapchain.depth_stencil_format(), vk::Format::UNDEFINED);
    }

    #[test]
    fn depth_attachment_present_iff_requested() {
        let backend = Arc::new(DummyBackend::new());
        let ctx = context(&backend);
        let swapchain = Swapchain::create(UVec2::new(32, 32), true, vk::SampleCountFlags::TYPE_4, &ctx).unwrap();

        assert!(swapchain.depth_stencil_attachment().is_some());
        assert_eq!(swapchain.depth_stencil_format(), vk::Format::D24_UNORM_S8_UINT);
        assert_eq!(swapchain.depth_stencil_samples(), vk::SampleCountFlags::TYPE_4);
        assert_eq!(backend.stats().depth_stencils_created, 1);
    }

    #[test]
    fn destroy_without_tracking_keeps_registry() {
        let backend = Arc::new(DummyBackend::new());
        let ctx = context(&backend);
        let swapchain = Swapchain::create(UVec2::new(8, 8), true, vk::SampleCountFlags::TYPE_1, &ctx).unwrap();

        swapchain.destroy(false);
        assert!(swapchain.is_destroyed());
        assert!(ctx.swapchain_registry().contains(swapchain.id()));
        assert_eq!(backend.live_image_views(), 0);
        assert_eq!(backend.live_swapchains(), 0);
    }

    #[test]
    fn destroy_with_tracking_removes_only_itself() {
        let backend = Arc::new(DummyBackend::new());
        let ctx = context(&backend);
        let a = Swapchain::create(UVec2::new(8, 8), false, vk::SampleCountFlags::TYPE_1, &ctx).unwrap();
        let b = Swapchain::create(UVec2::new(8, 8), false, vk::SampleCountFlags::TYPE_1, &ctx).unwrap();
        assert_eq!(ctx.swapchain_registry().len(), 2);

        a.destroy(true);
        assert!(!ctx.swapchain_registry().contains(a.id()));
        assert!(ctx.swapchain_registry().contains(b.id()));
        assert_eq!(ctx.swapchain_registry().len(), 1);
    }

    #[test]
    fn destroy_is_idempotent() {
        let backend = Arc::new(DummyBackend::new());
        let ctx = context(&backend);
        let swapchain = Swapchain::create(UVec2::new(8, 8), false, vk::SampleCountFlags::TYPE_1, &ctx).unwrap();

        swapchain.destroy(true);
        swapchain.destroy(true);
        assert_eq!(backend.stats().swapchains_destroyed, 1);
    }

    #[test]
    fn failed_depth_creation_releases_everything() {
        let backend = Arc::new(DummyBackend::new());
        let ctx = context(&backend);
        backend.fail_next_depth_stencil();

        let result = Swapchain::create(UVec2::new(8, 8), true, vk::SampleCountFlags::TYPE_1, &ctx);
        assert!(result.is_err());
        assert_eq!(backend.live_image_views(), 0);
        assert_eq!(backend.live_swapchains(), 0);
        assert!(ctx.swapchain_registry().is_empty());
    }

    #[test]
    fn present_requires_an_acquired_image() {
        let backend = Arc::new(DummyBackend::with_image_count(2));
        let ctx = context(&backend);
        let swapchain = Swapchain::create(UVec2::new(8, 8), false, vk::SampleCountFlags::TYPE_1, &ctx).unwrap();

        assert!(matches!(swapchain.present(&[]), Err(RenderError::NoAcquiredImage)));

        let acquired = swapchain.acquire_next_image(vk::Semaphore::null()).unwrap();
        assert_eq!(swapchain.current_image_index(), Some(acquired.index));
        assert!(!swapchain.present(&[]).unwrap());
        assert_eq!(swapchain.current_image_index(), None);
    }

    #[test]
    fn out_of_date_is_reported() {
        let backend = Arc::new(DummyBackend::new());
        let ctx = context(&backend);
        let swapchain = Swapchain::create(UVec2::new(8, 8), false, vk::SampleCountFlags::TYPE_1, &ctx).unwrap();

        backend.set_out_of_date(true);
        assert!(matches!(
            swapchain.acquire_next_image(vk::Semaphore::null()),
            Err(RenderError::SwapchainOutOfDate)
        ));
    }
}
