// Uniform sets and their descriptor sets.
//
// A `UniformSet` assigns resources to the uniforms of a program's
// `UniformLayout`. A `DescriptorSetView` is the native descriptor sets
// allocated and written for one uniform set; dropping it frees them.

use ash::vk;
use std::sync::Arc;

use crate::backend::traits::{DescriptorResource, DescriptorSetLayoutDesc, DescriptorWrite};
use crate::backend::GpuBackend;
use crate::error::{RenderError, Result};
use crate::program::UniformLayout;
use crate::texture::Texture2d;

#[derive(Debug)]
pub struct UniformSet {
    layout: UniformLayout,
    textures: Vec<(String, Arc<Texture2d>)>,
}

impl UniformSet {
    pub fn new(layout: UniformLayout) -> Self {
        Self {
            layout,
            textures: Vec::new(),
        }
    }

    /// Bind `texture` to the uniform called `name`, replacing any earlier
    /// assignment.
    pub fn uniform(&mut self, name: &str, texture: Arc<Texture2d>) -> Result<()> {
        let binding = self
            .layout
            .binding(name)
            .ok_or_else(|| RenderError::UnknownUniform(name.to_string()))?;
        if binding.descriptor_type != vk::DescriptorType::COMBINED_IMAGE_SAMPLER {
            return Err(RenderError::InvalidParameter(format!(
                "uniform `{}` is a {:?}, not a sampler",
                name, binding.descriptor_type
            )));
        }

        match self.textures.iter_mut().find(|(existing, _)| existing == name) {
            Some(entry) => entry.1 = texture,
            None => self.textures.push((name.to_string(), texture)),
        }
        Ok(())
    }

    pub fn texture(&self, name: &str) -> Option<&Arc<Texture2d>> {
        self.textures
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, texture)| texture)
    }

    pub fn layout(&self) -> &UniformLayout {
        &self.layout
    }

    pub fn descriptor_set_layout_descs(&self) -> Vec<DescriptorSetLayoutDesc> {
        self.layout.set_layouts()
    }
}

/// Descriptor sets written from a uniform set.
pub struct DescriptorSetView {
    sets: Vec<vk::DescriptorSet>,
    // Keeps the bound resources alive as long as the sets reference them
    _uniform_set: Arc<UniformSet>,
    backend: Arc<dyn GpuBackend>,
}

impl DescriptorSetView {
    /// Allocate one descriptor set per layout and write every assigned
    /// uniform into it.
    pub fn create(
        backend: Arc<dyn GpuBackend>,
        uniform_set: Arc<UniformSet>,
        set_layouts: &[vk::DescriptorSetLayout],
    ) -> Result<Self> {
        let sets = backend.allocate_descriptor_sets(set_layouts)?;
        let view = Self {
            sets,
            _uniform_set: uniform_set.clone(),
            backend,
        };

        let mut writes = Vec::with_capacity(uniform_set.textures.len());
        for (name, texture) in &uniform_set.textures {
            let binding = uniform_set
                .layout
                .binding(name)
                .ok_or_else(|| RenderError::UnknownUniform(name.clone()))?;
            let set = *view.sets.get(binding.set as usize).ok_or_else(|| {
                RenderError::InvalidParameter(format!(
                    "uniform `{}` lives in set {} but only {} sets were allocated",
                    name,
                    binding.set,
                    view.sets.len()
                ))
            })?;
            writes.push(DescriptorWrite {
                set,
                binding: binding.binding,
                resource: DescriptorResource::CombinedImageSampler {
                    view: texture.view(),
                    sampler: texture.sampler(),
                    layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                },
            });
        }
        view.backend.write_descriptor_sets(&writes);

        Ok(view)
    }

    pub fn descriptor_sets(&self) -> &[vk::DescriptorSet] {
        &self.sets
    }
}

impl Drop for DescriptorSetView {
    fn drop(&mut self) {
        self.backend.free_descriptor_sets(&self.sets);
    }
}

impl std::fmt::Debug for DescriptorSetView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorSetView").field("sets", &self.sets).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use crate::program::ShaderProgram;

    fn layout() -> UniformLayout {
        ShaderProgram::builder()
            .stage(vk::ShaderStageFlags::FRAGMENT, vk::ShaderModule::null(), "main")
            .uniform(
                "uTex0",
                0,
                0,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                vk::ShaderStageFlags::FRAGMENT,
            )
            .build()
            .unwrap()
            .uniform_layout()
            .clone()
    }

    #[test]
    fn unknown_uniform_is_an_error() {
        let backend = Arc::new(DummyBackend::new());
        let texture = Arc::new(Texture2d::from_rgba8(backend, 1, 1, &[0; 4]).unwrap());
        let mut set = UniformSet::new(layout());
        assert!(matches!(
            set.uniform("uTex9", texture),
            Err(RenderError::UnknownUniform(name)) if name == "uTex9"
        ));
    }

    #[test]
    fn view_writes_and_frees_sets() {
        let backend = Arc::new(DummyBackend::new());
        let texture = Arc::new(Texture2d::from_rgba8(backend.clone(), 1, 1, &[0; 4]).unwrap());

        let mut set = UniformSet::new(layout());
        set.uniform("uTex0", texture).unwrap();
        let set = Arc::new(set);

        let layouts = backend
            .select_descriptor_set_layouts(&set.descriptor_set_layout_descs())
            .unwrap();
        let view = DescriptorSetView::create(backend.clone(), set, &layouts).unwrap();
        assert_eq!(view.descriptor_sets().len(), 1);
        assert_eq!(backend.stats().descriptor_writes, 1);
        assert_eq!(backend.live_descriptor_sets(), 1);

        drop(view);
        assert_eq!(backend.live_descriptor_sets(), 0);
    }
}
