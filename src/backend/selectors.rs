// State selectors
//
// Descriptor set layouts, pipeline layouts and pipelines are created once per
// distinct state and reused afterwards. Each selector is a `HandleCache`
// keyed by the full state the object is built from.

use ash::vk;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;

use super::pipeline::{create_graphics_pipeline, PipelineDesc};
use super::traits::{DescriptorSetLayoutDesc, PushConstantRange, SetLayoutBinding};
use crate::error::{Result, VkResultExt};

/// Thread-safe map from a state key to a native handle.
pub struct HandleCache<K, V> {
    entries: Mutex<HashMap<K, V>>,
}

impl<K: Eq + Hash + Clone, V: Copy> HandleCache<K, V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached handle for `key`, creating it with `create` on a miss.
    /// A failed creation caches nothing.
    pub fn get_or_try_insert_with<E>(&self, key: &K, create: impl FnOnce() -> Result<V, E>) -> Result<V, E> {
        let mut entries = self.entries.lock();
        if let Some(&value) = entries.get(key) {
            return Ok(value);
        }
        let value = create()?;
        entries.insert(key.clone(), value);
        Ok(value)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Remove and return every cached handle.
    pub fn drain(&self) -> Vec<V> {
        self.entries.lock().drain().map(|(_, value)| value).collect()
    }
}

impl<K: Eq + Hash + Clone, V: Copy> Default for HandleCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

pub type PipelineLayoutKey = (Vec<vk::DescriptorSetLayout>, Vec<PushConstantRange>);

/// Selects descriptor set layouts by their bindings.
pub struct DescriptorSetLayoutSelector {
    device: ash::Device,
    cache: HandleCache<DescriptorSetLayoutDesc, vk::DescriptorSetLayout>,
}

impl DescriptorSetLayoutSelector {
    pub fn new(device: ash::Device) -> Self {
        Self {
            device,
            cache: HandleCache::new(),
        }
    }

    pub fn select(&self, sets: &[DescriptorSetLayoutDesc]) -> Result<Vec<vk::DescriptorSetLayout>> {
        sets.iter()
            .map(|bindings| self.cache.get_or_try_insert_with(bindings, || self.create(bindings)))
            .collect()
    }

    fn create(&self, bindings: &[SetLayoutBinding]) -> Result<vk::DescriptorSetLayout> {
        log::debug!("Creating descriptor set layout with {} bindings", bindings.len());
        let vk_bindings: Vec<_> = bindings.iter().map(SetLayoutBinding::to_vk).collect();
        let create_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&vk_bindings);
        unsafe {
            self.device
                .create_descriptor_set_layout(&create_info, None)
                .op("vkCreateDescriptorSetLayout")
        }
    }

    /// # Safety
    /// No pipeline layout or descriptor set built from these layouts may be in use.
    pub unsafe fn destroy(&self) {
        for layout in self.cache.drain() {
            self.device.destroy_descriptor_set_layout(layout, None);
        }
    }
}

/// Selects pipeline layouts by set layouts and push constant ranges.
pub struct PipelineLayoutSelector {
    device: ash::Device,
    cache: HandleCache<PipelineLayoutKey, vk::PipelineLayout>,
}

impl PipelineLayoutSelector {
    pub fn new(device: ash::Device) -> Self {
        Self {
            device,
            cache: HandleCache::new(),
        }
    }

    pub fn select(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[PushConstantRange],
    ) -> Result<vk::PipelineLayout> {
        let key = (set_layouts.to_vec(), push_constant_ranges.to_vec());
        self.cache.get_or_try_insert_with(&key, || {
            log::debug!(
                "Creating pipeline layout: {} sets, {} push constant ranges",
                set_layouts.len(),
                push_constant_ranges.len()
            );
            let ranges: Vec<_> = push_constant_ranges.iter().map(PushConstantRange::to_vk).collect();
            let create_info = vk::PipelineLayoutCreateInfo::builder()
                .set_layouts(set_layouts)
                .push_constant_ranges(&ranges);
            unsafe {
                self.device
                    .create_pipeline_layout(&create_info, None)
                    .op("vkCreatePipelineLayout")
            }
        })
    }

    /// # Safety
    /// No pipeline built with these layouts may be in use.
    pub unsafe fn destroy(&self) {
        for layout in self.cache.drain() {
            self.device.destroy_pipeline_layout(layout, None);
        }
    }
}

/// Selects graphics pipelines by their full description.
pub struct PipelineSelector {
    device: ash::Device,
    cache: HandleCache<PipelineDesc, vk::Pipeline>,
}

impl PipelineSelector {
    pub fn new(device: ash::Device) -> Self {
        Self {
            device,
            cache: HandleCache::new(),
        }
    }

    pub fn select(&self, desc: &PipelineDesc) -> Result<vk::Pipeline> {
        self.cache.get_or_try_insert_with(desc, || {
            log::debug!(
                "Creating graphics pipeline ({} attributes, subpass {})",
                desc.vertex_attributes.len(),
                desc.subpass
            );
            create_graphics_pipeline(&self.device, desc)
        })
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// # Safety
    /// None of the cached pipelines may be in use.
    pub unsafe fn destroy(&self) {
        for pipeline in self.cache.drain() {
            self.device.destroy_pipeline(pipeline, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn creates_once_per_key() {
        let cache: HandleCache<u32, u64> = HandleCache::new();
        let calls = Cell::new(0);

        let create = || {
            calls.set(calls.get() + 1);
            Ok::<_, ()>(calls.get() as u64 * 10)
        };
        assert_eq!(cache.get_or_try_insert_with(&1, create), Ok(10));
        assert_eq!(cache.get_or_try_insert_with(&1, create), Ok(10));
        assert_eq!(cache.get_or_try_insert_with(&2, create), Ok(20));
        assert_eq!(calls.get(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn failed_creation_is_not_cached() {
        let cache: HandleCache<&'static str, u64> = HandleCache::new();
        assert_eq!(cache.get_or_try_insert_with(&"a", || Err("boom")), Err("boom"));
        assert!(cache.is_empty());
        assert_eq!(cache.get_or_try_insert_with(&"a", || Ok::<_, &str>(7)), Ok(7));
    }

    #[test]
    fn drain_empties_the_cache() {
        let cache: HandleCache<u8, u8> = HandleCache::new();
        for i in 0..4 {
            cache.get_or_try_insert_with(&i, || Ok::<_, ()>(i)).ok();
        }
        let mut drained = cache.drain();
        drained.sort();
        assert_eq!(drained, vec![0, 1, 2, 3]);
        assert!(cache.is_empty());
    }
}
