use ash::vk;
use std::sync::Arc;

use crate::backend::GpuBackend;
use crate::error::{RenderError, Result};

/// A sampled 2D texture. Shared as `Arc<Texture2d>`; the textured draw
/// helper caches by pointer identity.
pub struct Texture2d {
    view: vk::ImageView,
    sampler: vk::Sampler,
    width: u32,
    height: u32,
    backend: Arc<dyn GpuBackend>,
}

impl Texture2d {
    /// Upload tightly packed RGBA8 pixels.
    pub fn from_rgba8(backend: Arc<dyn GpuBackend>, width: u32, height: u32, pixels: &[u8]) -> Result<Self> {
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

        let (view, sampler) = backend.create_texture_rgba8(width, height, pixels)?;
        Ok(Self {
            view,
            sampler,
            width,
            height,
            backend,
        })
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn sampler(&self) -> vk::Sampler {
        self.sampler
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

impl Drop for Texture2d {
    fn drop(&mut self) {
        self.backend.destroy_texture(self.view, self.sampler);
    }
}

impl std::fmt::Debug for Texture2d {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture2d")
            .field("view", &self.view)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;

    #[test]
    fn pixel_count_must_match() {
        let backend = Arc::new(DummyBackend::new());
        let err = Texture2d::from_rgba8(backend.clone(), 2, 2, &[0; 12]).unwrap_err();
        assert!(matches!(err, RenderError::InvalidParameter(_)));
        assert_eq!(backend.stats().textures_created, 0);
    }

    #[test]
    fn drop_releases_the_texture() {
        let backend = Arc::new(DummyBackend::new());
        let texture = Texture2d::from_rgba8(backend.clone(), 2, 2, &[255; 16]).unwrap();
        assert_eq!((texture.width(), texture.height()), (2, 2));
        drop(texture);
        assert_eq!(backend.stats().textures_destroyed, 1);
    }
}
