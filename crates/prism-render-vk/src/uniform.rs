// SPDX-License-Identifier: CEPL-1.0
use crate::descriptor::{write_uniform_sets, DescriptorPool};
use crate::device::Device;
use crate::resource::GpuBuffer;
use anyhow::{ensure, Result};
use ash::vk;
use prism_math::GlobalUbo;

/// Offset of frame `frame`'s copy in a buffer of padded strides.
pub const fn frame_offset(frame: usize, padded: vk::DeviceSize) -> vk::DeviceSize {
    frame as vk::DeviceSize * padded
}

/// Per-frame global data: one buffer holding `frames` aligned copies of
/// [`GlobalUbo`], and one descriptor set per copy.
pub struct GlobalUniforms {
    buffer: GpuBuffer,
    sets: Vec<vk::DescriptorSet>,
    padded: vk::DeviceSize,
}

impl GlobalUniforms {
    pub fn new(
        device: &Device,
        pool: &DescriptorPool,
        layout: vk::DescriptorSetLayout,
        frames: usize,
    ) -> Result<Self> {
        let size = std::mem::size_of::<GlobalUbo>() as vk::DeviceSize;
        let padded = device.pad_uniform_buffer_size(size);
        let buffer = device.create_buffer(
            frame_offset(frames, padded),
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        let sets = pool.allocate(layout, frames)?;
        write_uniform_sets(device.raw(), &sets, 0, buffer.handle(), size, padded);
        Ok(Self {
            buffer,
            sets,
            padded,
        })
    }

    /// Safe only once `frame`'s fence has been waited on.
    pub fn update(&self, frame: usize, ubo: &GlobalUbo) -> Result<()> {
        ensure!(frame < self.sets.len(), "frame {frame} out of range");
        self.buffer
            .write(frame_offset(frame, self.padded), bytemuck::bytes_of(ubo))
    }

    pub fn set(&self, frame: usize) -> vk::DescriptorSet {
        self.sets[frame]
    }

    pub fn stride(&self) -> vk::DeviceSize {
        self.padded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::align_up;

    #[test]
    fn frame_copies_start_on_alignment_boundaries() {
        let size = std::mem::size_of::<GlobalUbo>() as vk::DeviceSize;
        for align in [16, 64, 256] {
            let padded = align_up(size, align);
            for frame in 0..3 {
                let off = frame_offset(frame, padded);
                assert_eq!(off % align, 0);
                if frame > 0 {
                    assert!(off - frame_offset(frame - 1, padded) >= size);
                }
            }
        }
    }
}
