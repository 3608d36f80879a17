// SPDX-License-Identifier: CEPL-1.0
//! Staged uploads for meshes, textures and materials. Everything here
//! blocks on the graphics queue, so call it outside the frame loop.
use crate::descriptor::{write_sampler, write_uniform_sets, DescriptorPool};
use crate::device::{Device, ImageDesc};
use crate::error::VkError;
use crate::resource::{GpuBuffer, GpuImage};
use anyhow::{ensure, Context, Result};
use ash::vk;
use prism_math::{MaterialUbo, Vertex};
use tracing::debug;

pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// Length of the full mip chain down to 1x1.
pub fn mip_levels(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

fn host_buffer(device: &Device, usage: vk::BufferUsageFlags, bytes: &[u8]) -> Result<GpuBuffer> {
    let buf = device.create_buffer(
        bytes.len() as vk::DeviceSize,
        usage,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    )?;
    buf.write(0, bytes)?;
    Ok(buf)
}

/// Device-local buffer filled through a throwaway staging buffer.
pub fn upload_buffer(device: &Device, usage: vk::BufferUsageFlags, bytes: &[u8]) -> Result<GpuBuffer> {
    ensure!(!bytes.is_empty(), "refusing to upload an empty buffer");
    let staging = host_buffer(device, vk::BufferUsageFlags::TRANSFER_SRC, bytes)?;
    let dst = device.create_buffer(
        staging.size(),
        usage | vk::BufferUsageFlags::TRANSFER_DST,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )?;
    device.copy_buffer(staging.handle(), dst.handle(), staging.size())?;
    Ok(dst)
}

pub struct Mesh {
    vertices: GpuBuffer,
    indices: GpuBuffer,
    index_count: u32,
}

impl Mesh {
    pub fn new(device: &Device, vertices: &[Vertex], indices: &[u32]) -> Result<Self> {
        let vb = upload_buffer(
            device,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            bytemuck::cast_slice(vertices),
        )
        .context("vertex buffer")?;
        let ib = upload_buffer(
            device,
            vk::BufferUsageFlags::INDEX_BUFFER,
            bytemuck::cast_slice(indices),
        )
        .context("index buffer")?;
        debug!("mesh uploaded: {} vertices, {} indices", vertices.len(), indices.len());
        Ok(Self {
            vertices: vb,
            indices: ib,
            index_count: indices.len() as u32,
        })
    }

    pub fn vertex_buffer(&self) -> vk::Buffer {
        self.vertices.handle()
    }

    pub fn index_buffer(&self) -> vk::Buffer {
        self.indices.handle()
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }
}

pub struct Texture {
    device: ash::Device,
    image: GpuImage,
    sampler: vk::Sampler,
}

impl Texture {
    /// Tightly packed RGBA8 pixels, sRGB encoded. The full mip chain is
    /// generated on the GPU.
    pub fn from_rgba8(device: &Device, width: u32, height: u32, pixels: &[u8]) -> Result<Self> {
        ensure!(width > 0 && height > 0, "texture must not be empty");
        ensure!(
            pixels.len() == width as usize * height as usize * 4,
            "expected {}x{} RGBA8 pixels, got {} bytes",
            width,
            height,
            pixels.len()
        );
        let features = device.format_properties(TEXTURE_FORMAT).optimal_tiling_features;
        if !features.contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR) {
            return Err(VkError::NoLinearBlit(TEXTURE_FORMAT).into());
        }

        let levels = mip_levels(width, height);
        let staging = host_buffer(device, vk::BufferUsageFlags::TRANSFER_SRC, pixels)?;
        let image = device.create_image(&ImageDesc {
            extent: vk::Extent2D { width, height },
            mip_levels: levels,
            samples: vk::SampleCountFlags::TYPE_1,
            format: TEXTURE_FORMAT,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST
                | vk::ImageUsageFlags::SAMPLED,
            memory: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            aspect: vk::ImageAspectFlags::COLOR,
        })?;

        device.transition_image_layout(
            image.image(),
            TEXTURE_FORMAT,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            levels,
        )?;
        device.copy_buffer_to_image(staging.handle(), image.image(), width, height)?;
        generate_mipmaps(device, image.image(), width, height, levels)?;

        let mut out = Self {
            device: device.raw().clone(),
            image,
            sampler: vk::Sampler::null(),
        };
        out.sampler = create_sampler(device, levels)?;
        Ok(out)
    }

    /// 1x1 opaque white, bound wherever a material has no map.
    pub fn white(device: &Device) -> Result<Self> {
        Self::from_rgba8(device, 1, 1, &[255; 4])
    }

    pub fn view(&self) -> vk::ImageView {
        self.image.view()
    }

    pub fn sampler(&self) -> vk::Sampler {
        self.sampler
    }

    pub fn mip_levels(&self) -> u32 {
        self.image.mip_levels()
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        unsafe { self.device.destroy_sampler(self.sampler, None) };
    }
}

fn create_sampler(device: &Device, levels: u32) -> Result<vk::Sampler> {
    let ci = vk::SamplerCreateInfo {
        s_type: vk::StructureType::SAMPLER_CREATE_INFO,
        mag_filter: vk::Filter::LINEAR,
        min_filter: vk::Filter::LINEAR,
        mipmap_mode: vk::SamplerMipmapMode::LINEAR,
        address_mode_u: vk::SamplerAddressMode::REPEAT,
        address_mode_v: vk::SamplerAddressMode::REPEAT,
        address_mode_w: vk::SamplerAddressMode::REPEAT,
        anisotropy_enable: vk::TRUE,
        max_anisotropy: device.limits().max_sampler_anisotropy,
        border_color: vk::BorderColor::INT_OPAQUE_BLACK,
        compare_op: vk::CompareOp::ALWAYS,
        min_lod: 0.0,
        max_lod: levels as f32,
        ..Default::default()
    };
    unsafe { device.raw().create_sampler(&ci, None) }.context("create_sampler")
}

/// Blits each level from the previous one and leaves the whole chain in
/// SHADER_READ_ONLY_OPTIMAL. Expects every level in TRANSFER_DST_OPTIMAL.
fn generate_mipmaps(device: &Device, image: vk::Image, width: u32, height: u32, levels: u32) -> Result<()> {
    device.one_shot(|d, cmd| {
        let mut barrier = vk::ImageMemoryBarrier {
            s_type: vk::StructureType::IMAGE_MEMORY_BARRIER,
            src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            image,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        };
        let barrier_to = |cmd, b: &vk::ImageMemoryBarrier, src, dst| unsafe {
            d.cmd_pipeline_barrier(
                cmd,
                src,
                dst,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                std::slice::from_ref(b),
            );
        };

        let (mut w, mut h) = (width as i32, height as i32);
        for level in 1..levels {
            barrier.subresource_range.base_mip_level = level - 1;
            barrier.old_layout = vk::ImageLayout::TRANSFER_DST_OPTIMAL;
            barrier.new_layout = vk::ImageLayout::TRANSFER_SRC_OPTIMAL;
            barrier.src_access_mask = vk::AccessFlags::TRANSFER_WRITE;
            barrier.dst_access_mask = vk::AccessFlags::TRANSFER_READ;
            barrier_to(
                cmd,
                &barrier,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::TRANSFER,
            );

            let (nw, nh) = ((w / 2).max(1), (h / 2).max(1));
            let layers = |mip_level| vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level,
                base_array_layer: 0,
                layer_count: 1,
            };
            let blit = vk::ImageBlit {
                src_subresource: layers(level - 1),
                src_offsets: [vk::Offset3D::default(), vk::Offset3D { x: w, y: h, z: 1 }],
                dst_subresource: layers(level),
                dst_offsets: [vk::Offset3D::default(), vk::Offset3D { x: nw, y: nh, z: 1 }],
            };
            unsafe {
                d.cmd_blit_image(
                    cmd,
                    image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    std::slice::from_ref(&blit),
                    vk::Filter::LINEAR,
                );
            }

            barrier.old_layout = vk::ImageLayout::TRANSFER_SRC_OPTIMAL;
            barrier.new_layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
            barrier.src_access_mask = vk::AccessFlags::TRANSFER_READ;
            barrier.dst_access_mask = vk::AccessFlags::SHADER_READ;
            barrier_to(
                cmd,
                &barrier,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
            );
            (w, h) = (nw, nh);
        }

        // Last level was only ever written.
        barrier.subresource_range.base_mip_level = levels - 1;
        barrier.old_layout = vk::ImageLayout::TRANSFER_DST_OPTIMAL;
        barrier.new_layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
        barrier.src_access_mask = vk::AccessFlags::TRANSFER_WRITE;
        barrier.dst_access_mask = vk::AccessFlags::SHADER_READ;
        barrier_to(
            cmd,
            &barrier,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        );
    })
}

/// Material constants plus diffuse/specular maps, bound as set 1.
pub struct Material {
    ubo: GpuBuffer,
    set: vk::DescriptorSet,
}

impl Material {
    pub fn new(
        device: &Device,
        pool: &DescriptorPool,
        layout: vk::DescriptorSetLayout,
        params: &MaterialUbo,
        diffuse: &Texture,
        specular: &Texture,
    ) -> Result<Self> {
        let bytes = bytemuck::bytes_of(params);
        let ubo = host_buffer(device, vk::BufferUsageFlags::UNIFORM_BUFFER, bytes)?;
        let set = pool.allocate(layout, 1)?[0];
        let d = device.raw();
        write_uniform_sets(d, &[set], 0, ubo.handle(), ubo.size(), ubo.size());
        write_sampler(d, set, 1, diffuse.view(), diffuse.sampler());
        write_sampler(d, set, 2, specular.view(), specular.sampler());
        Ok(Self { ubo, set })
    }

    pub fn set(&self) -> vk::DescriptorSet {
        self.set
    }

    pub fn update(&self, params: &MaterialUbo) -> Result<()> {
        self.ubo.write(0, bytemuck::bytes_of(params))
    }

    /// Hands the descriptor set back to `pool`; the buffer goes with `self`.
    pub fn release(self, pool: &DescriptorPool) -> Result<()> {
        pool.free(&[self.set])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_chain_lengths() {
        assert_eq!(mip_levels(1, 1), 1);
        assert_eq!(mip_levels(2, 1), 2);
        assert_eq!(mip_levels(256, 256), 9);
        assert_eq!(mip_levels(512, 100), 10);
        assert_eq!(mip_levels(1000, 3), 10);
    }

    #[test]
    fn degenerate_size_still_has_one_level() {
        assert_eq!(mip_levels(0, 0), 1);
    }
}
