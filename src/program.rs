// Shader program description.
//
// A `ShaderProgram` bundles compiled stages with the interface the draw
// helpers need to know about: active vertex attributes, push-constant block
// members and the uniform (descriptor) layout. Programs are shared as
// `Arc<ShaderProgram>`; the draw caches compare them by pointer.

use ash::vk;
use std::collections::BTreeMap;

use crate::backend::pipeline::ShaderStageDesc;
use crate::backend::traits::{DescriptorSetLayoutDesc, PushConstantRange, SetLayoutBinding};
use crate::error::{RenderError, Result};

/// An active vertex attribute, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexAttribute {
    pub name: String,
    pub location: u32,
    pub binding: u32,
    pub format: vk::Format,
}

/// A member of a push-constant block. `name` is qualified with the block
/// name, e.g. `ciBlock0.ciColor`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushConstantMember {
    pub name: String,
    pub range: PushConstantRange,
}

/// A descriptor the program reads, addressed by uniform name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformBinding {
    pub name: String,
    pub set: u32,
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub stages: vk::ShaderStageFlags,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UniformLayout {
    bindings: Vec<UniformBinding>,
}

impl UniformLayout {
    pub fn bindings(&self) -> &[UniformBinding] {
        &self.bindings
    }

    pub fn binding(&self, name: &str) -> Option<&UniformBinding> {
        self.bindings.iter().find(|binding| binding.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Bindings grouped per set, sets `0..=max`. A set index nothing uses
    /// gets an empty layout.
    pub fn set_layouts(&self) -> Vec<DescriptorSetLayoutDesc> {
        let Some(max_set) = self.bindings.iter().map(|binding| binding.set).max() else {
            return Vec::new();
        };

        let mut sets = vec![Vec::new(); max_set as usize + 1];
        for binding in &self.bindings {
            sets[binding.set as usize].push(SetLayoutBinding {
                binding: binding.binding,
                descriptor_type: binding.descriptor_type,
                count: 1,
                stages: binding.stages,
            });
        }
        for set in &mut sets {
            set.sort_by_key(|binding| binding.binding);
        }
        sets
    }
}

#[derive(Debug)]
pub struct ShaderProgram {
    stages: Vec<ShaderStageDesc>,
    attributes: Vec<VertexAttribute>,
    push_constant_members: Vec<PushConstantMember>,
    push_constant_ranges: Vec<PushConstantRange>,
    uniform_layout: UniformLayout,
}

impl ShaderProgram {
    pub fn builder() -> ShaderProgramBuilder {
        ShaderProgramBuilder::default()
    }

    pub fn stages(&self) -> &[ShaderStageDesc] {
        &self.stages
    }

    pub fn active_attributes(&self) -> &[VertexAttribute] {
        &self.attributes
    }

    pub fn push_constant_members(&self) -> &[PushConstantMember] {
        &self.push_constant_members
    }

    /// One range per distinct stage combination, covering all members
    /// declared for those stages.
    pub fn push_constant_ranges(&self) -> &[PushConstantRange] {
        &self.push_constant_ranges
    }

    /// Range of a single block member, if the program declares it.
    pub fn push_constant_range(&self, name: &str) -> Option<PushConstantRange> {
        self.push_constant_members
            .iter()
            .find(|member| member.name == name)
            .map(|member| member.range)
    }

    pub fn uniform_layout(&self) -> &UniformLayout {
        &self.uniform_layout
    }
}

#[derive(Debug, Default)]
pub struct ShaderProgramBuilder {
    stages: Vec<ShaderStageDesc>,
    attributes: Vec<VertexAttribute>,
    push_constant_members: Vec<PushConstantMember>,
    uniforms: Vec<UniformBinding>,
}

impl ShaderProgramBuilder {
    pub fn stage(mut self, stage: vk::ShaderStageFlags, module: vk::ShaderModule, entry_point: &str) -> Self {
        self.stages.push(ShaderStageDesc {
            stage,
            module,
            entry_point: entry_point.to_string(),
        });
        self
    }

    pub fn attribute(mut self, name: &str, location: u32, binding: u32, format: vk::Format) -> Self {
        self.attributes.push(VertexAttribute {
            name: name.to_string(),
            location,
            binding,
            format,
        });
        self
    }

    /// Declare a push-constant block. `members` are `(name, offset, size)`.
    pub fn push_constant_block(mut self, block: &str, stages: vk::ShaderStageFlags, members: &[(&str, u32, u32)]) -> Self {
        for &(name, offset, size) in members {
            self.push_constant_members.push(PushConstantMember {
                name: format!("{}.{}", block, name),
                range: PushConstantRange { stages, offset, size },
            });
        }
        self
    }

    pub fn uniform(
        mut self,
        name: &str,
        set: u32,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        stages: vk::ShaderStageFlags,
    ) -> Self {
        self.uniforms.push(UniformBinding {
            name: name.to_string(),
            set,
            binding,
            descriptor_type,
            stages,
        });
        self
    }

    pub fn build(self) -> Result<ShaderProgram> {
        if self.stages.is_empty() {
            return Err(RenderError::InvalidParameter("shader program has no stages".to_string()));
        }

        for (i, attribute) in self.attributes.iter().enumerate() {
            if self.attributes[..i].iter().any(|other| other.location == attribute.location) {
                return Err(RenderError::InvalidParameter(format!(
                    "attribute `{}` reuses location {}",
                    attribute.name, attribute.location
                )));
            }
        }

        for (i, uniform) in self.uniforms.iter().enumerate() {
            let clash = self.uniforms[..i]
                .iter()
                .any(|other| other.name == uniform.name || (other.set, other.binding) == (uniform.set, uniform.binding));
            if clash {
                return Err(RenderError::InvalidParameter(format!(
                    "uniform `{}` clashes with an earlier declaration",
                    uniform.name
                )));
            }
        }

        if let Some(member) = self.push_constant_members.iter().find(|member| member.range.size == 0) {
            return Err(RenderError::InvalidParameter(format!(
                "push constant `{}` has zero size",
                member.name
            )));
        }

        let push_constant_ranges = merge_push_constant_ranges(&self.push_constant_members);

        Ok(ShaderProgram {
            stages: self.stages,
            attributes: self.attributes,
            push_constant_members: self.push_constant_members,
            push_constant_ranges,
            uniform_layout: UniformLayout { bindings: self.uniforms },
        })
    }
}

fn merge_push_constant_ranges(members: &[PushConstantMember]) -> Vec<PushConstantRange> {
    // Keyed by raw flags so the output order is stable
    let mut spans: BTreeMap<u32, (u32, u32)> = BTreeMap::new();
    for member in members {
        let start = member.range.offset;
        let end = start + member.range.size;
        spans
            .entry(member.range.stages.as_raw())
            .and_modify(|(lo, hi)| {
                *lo = (*lo).min(start);
                *hi = (*hi).max(end);
            })
            .or_insert((start, end));
    }

    spans
        .into_iter()
        .map(|(stages, (lo, hi))| PushConstantRange {
            stages: vk::ShaderStageFlags::from_raw(stages),
            offset: lo,
            size: hi - lo,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> ShaderProgramBuilder {
        ShaderProgram::builder().stage(vk::ShaderStageFlags::VERTEX, vk::ShaderModule::null(), "main")
    }

    #[test]
    fn members_are_qualified_and_merged() {
        let program = builder()
            .push_constant_block(
                "ciBlock0",
                vk::ShaderStageFlags::VERTEX,
                &[("ciModelViewProjection", 0, 64), ("ciRect", 64, 16), ("ciColor", 96, 16)],
            )
            .build()
            .unwrap();

        let rect = program.push_constant_range("ciBlock0.ciRect").unwrap();
        assert_eq!((rect.offset, rect.size), (64, 16));
        assert!(program.push_constant_range("ciRect").is_none());

        assert_eq!(
            program.push_constant_ranges(),
            &[PushConstantRange {
                stages: vk::ShaderStageFlags::VERTEX,
                offset: 0,
                size: 112,
            }]
        );
    }

    #[test]
    fn ranges_split_by_stage() {
        let program = builder()
            .push_constant_block("a", vk::ShaderStageFlags::VERTEX, &[("m", 0, 16)])
            .push_constant_block("b", vk::ShaderStageFlags::FRAGMENT, &[("n", 16, 16)])
            .build()
            .unwrap();
        assert_eq!(program.push_constant_ranges().len(), 2);
    }

    #[test]
    fn set_layouts_fill_gaps() {
        let program = builder()
            .uniform(
                "uTex1",
                1,
                2,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                vk::ShaderStageFlags::FRAGMENT,
            )
            .uniform(
                "uTex0",
                1,
                0,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                vk::ShaderStageFlags::FRAGMENT,
            )
            .build()
            .unwrap();

        let sets = program.uniform_layout().set_layouts();
        assert_eq!(sets.len(), 2);
        assert!(sets[0].is_empty());
        assert_eq!(sets[1].iter().map(|b| b.binding).collect::<Vec<_>>(), vec![0, 2]);
    }

    #[test]
    fn rejects_invalid_programs() {
        assert!(ShaderProgram::builder().build().is_err());
        assert!(builder()
            .attribute("a", 0, 0, vk::Format::R32_SFLOAT)
            .attribute("b", 0, 0, vk::Format::R32_SFLOAT)
            .build()
            .is_err());
        assert!(builder()
            .uniform("u", 0, 0, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, vk::ShaderStageFlags::FRAGMENT)
            .uniform("v", 0, 0, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, vk::ShaderStageFlags::FRAGMENT)
            .build()
            .is_err());
    }
}
