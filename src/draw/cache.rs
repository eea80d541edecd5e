// Draw cache
//
// Remembers which shader (and texture) a quad helper drew with last and the
// state derived from them. Keys compare by pointer: two programs with equal
// contents are still different keys.

use ash::vk;
use std::sync::Arc;

use crate::error::{RenderError, Result};
use crate::program::ShaderProgram;
use crate::texture::Texture2d;
use crate::uniform::DescriptorSetView;

#[derive(Debug, Clone)]
pub struct CacheKey {
    shader: Arc<ShaderProgram>,
    texture: Option<Arc<Texture2d>>,
}

impl CacheKey {
    pub fn new(shader: Arc<ShaderProgram>, texture: Option<Arc<Texture2d>>) -> Self {
        Self { shader, texture }
    }

    pub fn shader(&self) -> &Arc<ShaderProgram> {
        &self.shader
    }

    pub fn texture(&self) -> Option<&Arc<Texture2d>> {
        self.texture.as_ref()
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        let same_texture = match (&self.texture, &other.texture) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        Arc::ptr_eq(&self.shader, &other.shader) && same_texture
    }
}

impl Eq for CacheKey {}

/// State derived from a cache key.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub pipeline_layout: vk::PipelineLayout,
    /// Pipeline selected by the most recent draw.
    pub pipeline: vk::Pipeline,
    pub descriptors: Option<Arc<DescriptorSetView>>,
}

#[derive(Debug, Default)]
pub struct DrawCache {
    key: Option<CacheKey>,
    entry: Option<CacheEntry>,
    bindings_dirty: bool,
    rebuilds: usize,
}

impl DrawCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the entry for `key`, building it when the key differs from the
    /// cached one. A rebuild marks the bindings dirty. When `build` fails the
    /// cache is left empty.
    pub fn lookup_or_build(
        &mut self,
        key: CacheKey,
        build: impl FnOnce(&CacheKey) -> Result<CacheEntry>,
    ) -> Result<&mut CacheEntry> {
        let hit = self.entry.is_some() && self.key.as_ref() == Some(&key);
        if !hit {
            self.invalidate();
            let entry = build(&key)?;
            log::debug!("Rebuilt quad draw state (layout {:?})", entry.pipeline_layout);
            self.key = Some(key);
            self.entry = Some(entry);
            self.bindings_dirty = true;
            self.rebuilds += 1;
        }
        self.entry.as_mut().ok_or_else(|| RenderError::ResourceCreation {
            resource: "quad draw state",
            reason: "cache entry missing after build".to_string(),
        })
    }

    /// Descriptor bindings belong to a recording. A reset buffer keeps its
    /// handle but loses them, so every new recording binds again.
    pub fn mark_bindings_dirty(&mut self) {
        self.bindings_dirty = true;
    }

    /// Whether bindings need recording; clears the flag.
    pub fn take_bindings_dirty(&mut self) -> bool {
        std::mem::take(&mut self.bindings_dirty)
    }

    pub fn bindings_dirty(&self) -> bool {
        self.bindings_dirty
    }

    pub fn invalidate(&mut self) {
        self.key = None;
        self.entry = None;
    }

    pub fn is_empty(&self) -> bool {
        self.entry.is_none()
    }

    pub fn key(&self) -> Option<&CacheKey> {
        self.key.as_ref()
    }

    pub fn entry(&self) -> Option<&CacheEntry> {
        self.entry.as_ref()
    }

    /// Number of times the derived state was built.
    pub fn rebuild_count(&self) -> usize {
        self.rebuilds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn program() -> Arc<ShaderProgram> {
        Arc::new(
            ShaderProgram::builder()
                .stage(vk::ShaderStageFlags::VERTEX, vk::ShaderModule::null(), "main")
                .build()
                .unwrap(),
        )
    }

    fn entry(raw: u64) -> CacheEntry {
        CacheEntry {
            pipeline_layout: vk::PipelineLayout::from_raw(raw),
            pipeline: vk::Pipeline::null(),
            descriptors: None,
        }
    }

    #[test]
    fn identity_not_contents_decides_hits() {
        let a = program();
        let b = program();
        assert_eq!(CacheKey::new(a.clone(), None), CacheKey::new(a.clone(), None));
        assert_ne!(CacheKey::new(a, None), CacheKey::new(b, None));
    }

    #[test]
    fn rebuilds_only_on_key_change() {
        let shader = program();
        let mut cache = DrawCache::new();

        cache.lookup_or_build(CacheKey::new(shader.clone(), None), |_| Ok(entry(1))).unwrap();
        assert!(cache.take_bindings_dirty());

        let layout = cache
            .lookup_or_build(CacheKey::new(shader, None), |_| panic!("unexpected rebuild"))
            .unwrap()
            .pipeline_layout;
        assert_eq!(layout, vk::PipelineLayout::from_raw(1));
        assert!(!cache.take_bindings_dirty());
        assert_eq!(cache.rebuild_count(), 1);

        cache.lookup_or_build(CacheKey::new(program(), None), |_| Ok(entry(2))).unwrap();
        assert!(cache.take_bindings_dirty());
        assert_eq!(cache.rebuild_count(), 2);
    }

    #[test]
    fn failed_build_leaves_cache_empty() {
        let shader = program();
        let mut cache = DrawCache::new();
        cache.lookup_or_build(CacheKey::new(shader.clone(), None), |_| Ok(entry(1))).unwrap();

        let result = cache.lookup_or_build(CacheKey::new(program(), None), |_| Err(RenderError::NoRenderPass));
        assert!(result.is_err());
        assert!(cache.is_empty());
        assert!(cache.key().is_none());
    }

    #[test]
    fn marked_bindings_survive_until_taken() {
        let mut cache = DrawCache::new();
        cache.lookup_or_build(CacheKey::new(program(), None), |_| Ok(entry(1))).unwrap();
        assert!(cache.take_bindings_dirty());

        cache.mark_bindings_dirty();
        assert!(cache.bindings_dirty());
        assert!(cache.take_bindings_dirty());
        assert!(!cache.bindings_dirty());
        assert_eq!(cache.rebuild_count(), 1);
    }
}
