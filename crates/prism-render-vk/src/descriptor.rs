// SPDX-License-Identifier: CEPL-1.0
//! Declarative set layouts, the shared descriptor pool and batched writes.
use crate::device::Device;
use anyhow::{Context, Result};
use ash::vk;

pub const POOL_UNIFORM_BUFFERS: u32 = 100;
pub const POOL_SAMPLERS: u32 = 100;
pub const POOL_MAX_SETS: u32 = 200;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DescriptorType {
    Uniform,
    Sampler,
}

impl DescriptorType {
    pub fn raw(self) -> vk::DescriptorType {
        match self {
            Self::Uniform => vk::DescriptorType::UNIFORM_BUFFER,
            Self::Sampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageSelection {
    Vertex,
    Fragment,
    VertexFragment,
    All,
}

impl StageSelection {
    pub fn raw(self) -> vk::ShaderStageFlags {
        match self {
            Self::Vertex => vk::ShaderStageFlags::VERTEX,
            Self::Fragment => vk::ShaderStageFlags::FRAGMENT,
            Self::VertexFragment => vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            Self::All => vk::ShaderStageFlags::ALL,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescriptorBinding {
    pub ty: DescriptorType,
    pub stages: StageSelection,
}

impl DescriptorBinding {
    pub const fn new(ty: DescriptorType, stages: StageSelection) -> Self {
        Self { ty, stages }
    }
}

/// Binding index is the position in `bindings`.
pub fn layout_bindings(bindings: &[DescriptorBinding]) -> Vec<vk::DescriptorSetLayoutBinding<'static>> {
    bindings
        .iter()
        .enumerate()
        .map(|(i, b)| vk::DescriptorSetLayoutBinding {
            binding: i as u32,
            descriptor_type: b.ty.raw(),
            descriptor_count: 1,
            stage_flags: b.stages.raw(),
            ..Default::default()
        })
        .collect()
}

/// `(offset, range)` of each per-frame copy inside one padded buffer.
pub fn uniform_ranges(
    count: usize,
    size: vk::DeviceSize,
    padded: vk::DeviceSize,
) -> Vec<(vk::DeviceSize, vk::DeviceSize)> {
    (0..count as vk::DeviceSize).map(|i| (padded * i, size)).collect()
}

pub struct SetLayout {
    device: ash::Device,
    handle: vk::DescriptorSetLayout,
}

impl SetLayout {
    pub fn new(device: &Device, bindings: &[DescriptorBinding]) -> Result<Self> {
        let raw = layout_bindings(bindings);
        let ci = vk::DescriptorSetLayoutCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
            binding_count: raw.len() as u32,
            p_bindings: raw.as_ptr(),
            ..Default::default()
        };
        let handle = unsafe { device.raw().create_descriptor_set_layout(&ci, None) }
            .context("create_descriptor_set_layout")?;
        Ok(Self {
            device: device.raw().clone(),
            handle,
        })
    }

    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.handle
    }
}

impl Drop for SetLayout {
    fn drop(&mut self) {
        unsafe { self.device.destroy_descriptor_set_layout(self.handle, None) };
    }
}

/// Shared by every per-frame and per-material set. Destroying the pool
/// releases all sets allocated from it.
pub struct DescriptorPool {
    device: ash::Device,
    handle: vk::DescriptorPool,
}

impl DescriptorPool {
    pub fn new(device: &Device) -> Result<Self> {
        let sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: POOL_UNIFORM_BUFFERS,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: POOL_SAMPLERS,
            },
        ];
        let ci = vk::DescriptorPoolCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
            flags: vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET,
            max_sets: POOL_MAX_SETS,
            pool_size_count: sizes.len() as u32,
            p_pool_sizes: sizes.as_ptr(),
            ..Default::default()
        };
        let handle = unsafe { device.raw().create_descriptor_pool(&ci, None) }
            .context("create_descriptor_pool")?;
        Ok(Self {
            device: device.raw().clone(),
            handle,
        })
    }

    pub fn handle(&self) -> vk::DescriptorPool {
        self.handle
    }

    pub fn allocate(&self, layout: vk::DescriptorSetLayout, count: usize) -> Result<Vec<vk::DescriptorSet>> {
        let layouts = vec![layout; count];
        let ai = vk::DescriptorSetAllocateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
            descriptor_pool: self.handle,
            descriptor_set_count: layouts.len() as u32,
            p_set_layouts: layouts.as_ptr(),
            ..Default::default()
        };
        unsafe { self.device.allocate_descriptor_sets(&ai) }.context("allocate_descriptor_sets")
    }

    pub fn free(&self, sets: &[vk::DescriptorSet]) -> Result<()> {
        if sets.is_empty() {
            return Ok(());
        }
        unsafe { self.device.free_descriptor_sets(self.handle, sets) }.context("free_descriptor_sets")
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe { self.device.destroy_descriptor_pool(self.handle, None) };
    }
}

/// Points set `i` at the `i`-th padded slice of `buffer`, one batched update.
pub fn write_uniform_sets(
    device: &ash::Device,
    sets: &[vk::DescriptorSet],
    binding: u32,
    buffer: vk::Buffer,
    size: vk::DeviceSize,
    padded: vk::DeviceSize,
) {
    // Infos must stay put until update_descriptor_sets returns.
    let infos: Vec<vk::DescriptorBufferInfo> = uniform_ranges(sets.len(), size, padded)
        .into_iter()
        .map(|(offset, range)| vk::DescriptorBufferInfo {
            buffer,
            offset,
            range,
        })
        .collect();
    let writes: Vec<vk::WriteDescriptorSet> = sets
        .iter()
        .zip(&infos)
        .map(|(&set, info)| vk::WriteDescriptorSet {
            s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
            dst_set: set,
            dst_binding: binding,
            dst_array_element: 0,
            descriptor_count: 1,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            p_buffer_info: info,
            ..Default::default()
        })
        .collect();
    unsafe { device.update_descriptor_sets(&writes, &[]) };
}

pub fn write_sampler(
    device: &ash::Device,
    set: vk::DescriptorSet,
    binding: u32,
    view: vk::ImageView,
    sampler: vk::Sampler,
) {
    let info = vk::DescriptorImageInfo {
        sampler,
        image_view: view,
        image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    };
    let write = vk::WriteDescriptorSet {
        s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
        dst_set: set,
        dst_binding: binding,
        dst_array_element: 0,
        descriptor_count: 1,
        descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        p_image_info: &info,
        ..Default::default()
    };
    unsafe { device.update_descriptor_sets(std::slice::from_ref(&write), &[]) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_index_follows_list_position() {
        let list = [
            DescriptorBinding::new(DescriptorType::Uniform, StageSelection::VertexFragment),
            DescriptorBinding::new(DescriptorType::Sampler, StageSelection::Fragment),
            DescriptorBinding::new(DescriptorType::Sampler, StageSelection::All),
        ];
        let raw = layout_bindings(&list);
        assert_eq!(raw.len(), 3);
        for (i, b) in raw.iter().enumerate() {
            assert_eq!(b.binding, i as u32);
            assert_eq!(b.descriptor_count, 1);
        }
        assert_eq!(raw[0].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(
            raw[0].stage_flags,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        );
        assert_eq!(raw[1].descriptor_type, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
        assert_eq!(raw[1].stage_flags, vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(raw[2].stage_flags, vk::ShaderStageFlags::ALL);
    }

    #[test]
    fn uniform_ranges_step_by_padded_size() {
        let r = uniform_ranges(2, 96, 256);
        assert_eq!(r, vec![(0, 96), (256, 96)]);
        assert!(uniform_ranges(0, 96, 256).is_empty());
    }

    #[test]
    fn ranges_never_overlap() {
        let (size, padded) = (200, 256);
        let r = uniform_ranges(4, size, padded);
        for w in r.windows(2) {
            assert!(w[0].0 + w[0].1 <= w[1].0);
        }
    }
}
