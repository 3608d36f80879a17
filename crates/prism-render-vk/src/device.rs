// SPDX-License-Identifier: CEPL-1.0
//! Logical device context: queues, the shared command pool, memory-type
//! lookup and the blocking upload helpers.
use crate::error::VkError;
use crate::instance::InstanceContext;
use crate::physical::{max_usable_sample_count, PhysicalDeviceInfo};
use crate::resource::{GpuBuffer, GpuImage};
use anyhow::{Context, Result};
use ash::khr::swapchain;
use ash::vk;
use std::ffi::c_char;
use tracing::info;

/// Rounds `size` up to a multiple of `alignment` (a power of two, or 0 for none).
pub const fn align_up(size: vk::DeviceSize, alignment: vk::DeviceSize) -> vk::DeviceSize {
    if alignment > 0 {
        (size + alignment - 1) & !(alignment - 1)
    } else {
        size
    }
}

/// First memory type allowed by `type_bits` whose flags include `required`.
pub fn memory_type_index(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..props.memory_type_count).find(|&i| {
        (type_bits & (1 << i)) != 0
            && props.memory_types[i as usize]
                .property_flags
                .contains(required)
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransitionMasks {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

/// Barrier masks for the layout changes the uploader performs.
pub fn transition_masks(
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> std::result::Result<TransitionMasks, VkError> {
    use vk::ImageLayout as L;
    match (old, new) {
        (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => Ok(TransitionMasks {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::TRANSFER_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
        }),
        (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => Ok(TransitionMasks {
            src_access: vk::AccessFlags::TRANSFER_WRITE,
            dst_access: vk::AccessFlags::SHADER_READ,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
        }),
        (L::UNDEFINED, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) => Ok(TransitionMasks {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        }),
        (old, new) => Err(VkError::UnsupportedLayoutTransition { old, new }),
    }
}

pub fn has_stencil(format: vk::Format) -> bool {
    format == vk::Format::D32_SFLOAT_S8_UINT || format == vk::Format::D24_UNORM_S8_UINT
}

/// Aspect mask a barrier into `new` must cover for an image of `format`.
pub fn transition_aspect(new: vk::ImageLayout, format: vk::Format) -> vk::ImageAspectFlags {
    if new == vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL {
        if has_stencil(format) {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        } else {
            vk::ImageAspectFlags::DEPTH
        }
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

pub const DEPTH_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Parameters for [`Device::create_image`].
#[derive(Clone, Copy, Debug)]
pub struct ImageDesc {
    pub extent: vk::Extent2D,
    pub mip_levels: u32,
    pub samples: vk::SampleCountFlags,
    pub format: vk::Format,
    pub tiling: vk::ImageTiling,
    pub usage: vk::ImageUsageFlags,
    pub memory: vk::MemoryPropertyFlags,
    pub aspect: vk::ImageAspectFlags,
}

pub struct Device {
    raw: ash::Device,
    instance: ash::Instance,
    phys: vk::PhysicalDevice,
    swapchain_loader: swapchain::Device,
    graphics_family: u32,
    present_family: u32,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    command_pool: vk::CommandPool,
    msaa_samples: vk::SampleCountFlags,
    properties: vk::PhysicalDeviceProperties,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    name: String,
}

impl Device {
    pub fn new(ctx: &InstanceContext, info: &PhysicalDeviceInfo, max_msaa: u32) -> Result<Self> {
        let (graphics_family, present_family) = match (info.queues.graphics, info.queues.present)
        {
            (Some(g), Some(p)) => (g, p),
            _ => return Err(VkError::NoSuitableDevice.into()),
        };

        let priorities = [1.0_f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = info
            .queues
            .unique()
            .into_iter()
            .map(|family| vk::DeviceQueueCreateInfo {
                s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
                queue_family_index: family,
                queue_count: 1,
                p_queue_priorities: priorities.as_ptr(),
                ..Default::default()
            })
            .collect();

        let features = vk::PhysicalDeviceFeatures {
            sampler_anisotropy: vk::TRUE,
            fill_mode_non_solid: vk::TRUE,
            ..Default::default()
        };
        let device_exts: [*const c_char; 1] = [swapchain::NAME.as_ptr()];

        let dinfo = vk::DeviceCreateInfo {
            s_type: vk::StructureType::DEVICE_CREATE_INFO,
            queue_create_info_count: queue_infos.len() as u32,
            p_queue_create_infos: queue_infos.as_ptr(),
            enabled_extension_count: device_exts.len() as u32,
            pp_enabled_extension_names: device_exts.as_ptr(),
            p_enabled_features: &features,
            ..Default::default()
        };

        // SAFETY: phys was enumerated from this instance; create infos outlive the call.
        let raw = unsafe { ctx.instance.create_device(info.phys, &dinfo, None) }
            .context("create_device")?;

        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: graphics_family,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            ..Default::default()
        };
        let command_pool = match unsafe { raw.create_command_pool(&pool_info, None) } {
            Ok(p) => p,
            Err(e) => {
                unsafe { raw.destroy_device(None) };
                return Err(e).context("create_command_pool");
            }
        };

        let (graphics_queue, present_queue) = unsafe {
            (
                raw.get_device_queue(graphics_family, 0),
                raw.get_device_queue(present_family, 0),
            )
        };
        let memory_properties =
            unsafe { ctx.instance.get_physical_device_memory_properties(info.phys) };
        let msaa_samples = max_usable_sample_count(&info.properties.limits, max_msaa);
        let swapchain_loader = swapchain::Device::new(&ctx.instance, &raw);

        info!(
            "device: {} graphics_family={} present_family={} msaa={:?} ubo_align={}",
            info.name,
            graphics_family,
            present_family,
            msaa_samples,
            info.properties.limits.min_uniform_buffer_offset_alignment
        );

        Ok(Self {
            raw,
            instance: ctx.instance.clone(),
            phys: info.phys,
            swapchain_loader,
            graphics_family,
            present_family,
            graphics_queue,
            present_queue,
            command_pool,
            msaa_samples,
            properties: info.properties,
            memory_properties,
            name: info.name.clone(),
        })
    }

    pub fn raw(&self) -> &ash::Device {
        &self.raw
    }

    pub fn physical(&self) -> vk::PhysicalDevice {
        self.phys
    }

    pub fn swapchain_loader(&self) -> &swapchain::Device {
        &self.swapchain_loader
    }

    pub fn graphics_family(&self) -> u32 {
        self.graphics_family
    }

    pub fn present_family(&self) -> u32 {
        self.present_family
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    pub fn command_pool(&self) -> vk::CommandPool {
        self.command_pool
    }

    pub fn msaa_samples(&self) -> vk::SampleCountFlags {
        self.msaa_samples
    }

    pub fn limits(&self) -> &vk::PhysicalDeviceLimits {
        &self.properties.limits
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.raw.device_wait_idle() }.context("device_wait_idle")
    }

    pub fn find_memory_type(
        &self,
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    ) -> Result<u32> {
        memory_type_index(&self.memory_properties, type_bits, required).ok_or_else(|| {
            VkError::NoMemoryType {
                type_bits,
                flags: required,
            }
            .into()
        })
    }

    pub fn pad_uniform_buffer_size(&self, size: vk::DeviceSize) -> vk::DeviceSize {
        align_up(size, self.properties.limits.min_uniform_buffer_offset_alignment)
    }

    pub fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.instance
                .get_physical_device_format_properties(self.phys, format)
        }
    }

    pub fn find_depth_format(&self) -> Result<vk::Format> {
        DEPTH_CANDIDATES
            .into_iter()
            .find(|&f| {
                self.format_properties(f)
                    .optimal_tiling_features
                    .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
            })
            .ok_or_else(|| VkError::NoDepthFormat.into())
    }

    /// Buffer, memory and bind as one step.
    pub fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        props: vk::MemoryPropertyFlags,
    ) -> Result<GpuBuffer> {
        let bci = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        let d = &self.raw;
        let buffer = unsafe { d.create_buffer(&bci, None) }.context("create_buffer")?;
        let mut out = GpuBuffer::adopt(d, buffer, size);

        let req = unsafe { d.get_buffer_memory_requirements(buffer) };
        let mai = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: req.size,
            memory_type_index: self.find_memory_type(req.memory_type_bits, props)?,
            ..Default::default()
        };
        out.memory = unsafe { d.allocate_memory(&mai, None) }.context("allocate_memory(buffer)")?;
        unsafe { d.bind_buffer_memory(buffer, out.memory, 0) }.context("bind_buffer_memory")?;
        Ok(out)
    }

    /// Image, memory, bind and a matching view.
    pub fn create_image(&self, desc: &ImageDesc) -> Result<GpuImage> {
        let ici = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            image_type: vk::ImageType::TYPE_2D,
            format: desc.format,
            extent: vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            },
            mip_levels: desc.mip_levels,
            array_layers: 1,
            samples: desc.samples,
            tiling: desc.tiling,
            usage: desc.usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        let d = &self.raw;
        let image = unsafe { d.create_image(&ici, None) }.context("create_image")?;
        let mut out = GpuImage::adopt(d, image, desc.format, desc.extent, desc.mip_levels);

        let req = unsafe { d.get_image_memory_requirements(image) };
        let mai = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: req.size,
            memory_type_index: self.find_memory_type(req.memory_type_bits, desc.memory)?,
            ..Default::default()
        };
        out.memory = unsafe { d.allocate_memory(&mai, None) }.context("allocate_memory(image)")?;
        unsafe { d.bind_image_memory(image, out.memory, 0) }.context("bind_image_memory")?;
        out.view = self.create_image_view(image, desc.format, desc.aspect, desc.mip_levels)?;
        Ok(out)
    }

    pub fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
        mip_levels: u32,
    ) -> Result<vk::ImageView> {
        let ci = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: mip_levels,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        };
        unsafe { self.raw.create_image_view(&ci, None) }.context("create_image_view")
    }

    pub fn create_shader_module(&self, code: &[u32]) -> Result<vk::ShaderModule> {
        let ci = vk::ShaderModuleCreateInfo {
            s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
            p_code: code.as_ptr(),
            code_size: std::mem::size_of_val(code),
            ..Default::default()
        };
        unsafe { self.raw.create_shader_module(&ci, None) }.context("create_shader_module")
    }

    pub fn begin_single_time_commands(&self) -> Result<vk::CommandBuffer> {
        let ai = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.command_pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: 1,
            ..Default::default()
        };
        let cmd = unsafe { self.raw.allocate_command_buffers(&ai) }
            .context("allocate_command_buffers(one-shot)")?[0];
        let bi = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        if let Err(e) = unsafe { self.raw.begin_command_buffer(cmd, &bi) } {
            unsafe { self.raw.free_command_buffers(self.command_pool, &[cmd]) };
            return Err(e).context("begin_command_buffer(one-shot)");
        }
        Ok(cmd)
    }

    /// Ends, submits and waits for the queue to drain, then frees `cmd`
    /// whatever the outcome. Blocking: keep out of the per-frame path.
    pub fn end_single_time_commands(&self, cmd: vk::CommandBuffer) -> Result<()> {
        let d = &self.raw;
        let res = unsafe {
            d.end_command_buffer(cmd)
                .and_then(|_| {
                    let si = vk::SubmitInfo {
                        s_type: vk::StructureType::SUBMIT_INFO,
                        command_buffer_count: 1,
                        p_command_buffers: &cmd,
                        ..Default::default()
                    };
                    d.queue_submit(self.graphics_queue, &[si], vk::Fence::null())
                })
                .and_then(|_| d.queue_wait_idle(self.graphics_queue))
        };
        unsafe { d.free_command_buffers(self.command_pool, &[cmd]) };
        res.context("one-shot submit")
    }

    /// Records `f` into a one-shot command buffer and runs it to completion.
    pub fn one_shot(&self, f: impl FnOnce(&ash::Device, vk::CommandBuffer)) -> Result<()> {
        let cmd = self.begin_single_time_commands()?;
        f(&self.raw, cmd);
        self.end_single_time_commands(cmd)
    }

    pub fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) -> Result<()> {
        self.one_shot(|d, cmd| {
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size,
            };
            unsafe { d.cmd_copy_buffer(cmd, src, dst, std::slice::from_ref(&region)) };
        })
    }

    pub fn transition_image_layout(
        &self,
        image: vk::Image,
        format: vk::Format,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
        mip_levels: u32,
    ) -> Result<()> {
        // Reject before touching the queue.
        let masks = transition_masks(old, new)?;
        let barrier = vk::ImageMemoryBarrier {
            s_type: vk::StructureType::IMAGE_MEMORY_BARRIER,
            old_layout: old,
            new_layout: new,
            src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            image,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: transition_aspect(new, format),
                base_mip_level: 0,
                level_count: mip_levels,
                base_array_layer: 0,
                layer_count: 1,
            },
            src_access_mask: masks.src_access,
            dst_access_mask: masks.dst_access,
            ..Default::default()
        };
        self.one_shot(|d, cmd| unsafe {
            d.cmd_pipeline_barrier(
                cmd,
                masks.src_stage,
                masks.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                std::slice::from_ref(&barrier),
            );
        })
    }

    pub fn copy_buffer_to_image(
        &self,
        buffer: vk::Buffer,
        image: vk::Image,
        width: u32,
        height: u32,
    ) -> Result<()> {
        let region = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
            image_extent: vk::Extent3D {
                width,
                height,
                depth: 1,
            },
        };
        self.one_shot(|d, cmd| unsafe {
            d.cmd_copy_buffer_to_image(
                cmd,
                buffer,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                std::slice::from_ref(&region),
            );
        })
    }
}

// Everything created from this device is gone by now; the pool goes before
// the device itself.
impl Drop for Device {
    fn drop(&mut self) {
        tracing::debug!("dropping device {}", self.name);
        unsafe {
            self.raw.destroy_command_pool(self.command_pool, None);
            self.raw.destroy_device(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem_props(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut p = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (i, &f) in flags.iter().enumerate() {
            p.memory_types[i].property_flags = f;
        }
        p
    }

    #[test]
    fn padding_example_from_device_limits() {
        assert_eq!(align_up(96, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(257, 256), 512);
        assert_eq!(align_up(0, 64), 0);
    }

    #[test]
    fn padding_is_aligned_and_never_shrinks() {
        for align in [1u64, 4, 16, 64, 256] {
            for size in 0..1024u64 {
                let p = align_up(size, align);
                assert_eq!(p % align, 0, "size {size} align {align}");
                assert!(p >= size);
                assert!(p - size < align);
            }
        }
    }

    #[test]
    fn zero_alignment_means_unpadded() {
        assert_eq!(align_up(123, 0), 123);
    }

    #[test]
    fn memory_type_respects_mask_and_flags() {
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let props = mem_props(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            host,
            vk::MemoryPropertyFlags::DEVICE_LOCAL | host,
        ]);
        assert_eq!(memory_type_index(&props, 0b111, host), Some(1));
        assert_eq!(memory_type_index(&props, 0b100, host), Some(2));
        assert_eq!(
            memory_type_index(&props, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            Some(0)
        );
        assert_eq!(memory_type_index(&props, 0b001, host), None);
        assert_eq!(
            memory_type_index(&props, 0b111, vk::MemoryPropertyFlags::LAZILY_ALLOCATED),
            None
        );
    }

    #[test]
    fn supported_transitions() {
        let m = transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
        .unwrap();
        assert_eq!(m.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(m.dst_stage, vk::PipelineStageFlags::TRANSFER);
        assert_eq!(m.dst_access, vk::AccessFlags::TRANSFER_WRITE);

        let m = transition_masks(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        assert_eq!(m.src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(m.dst_access, vk::AccessFlags::SHADER_READ);
        assert_eq!(m.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);

        let m = transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        )
        .unwrap();
        assert_eq!(m.dst_stage, vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS);
        assert!(m
            .dst_access
            .contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE));
    }

    #[test]
    fn unsupported_transition_is_an_error() {
        let err = transition_masks(
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
        .unwrap_err();
        assert!(matches!(err, VkError::UnsupportedLayoutTransition { .. }));
    }

    #[test]
    fn depth_aspect_includes_stencil_when_present() {
        let l = vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL;
        assert_eq!(
            transition_aspect(l, vk::Format::D32_SFLOAT),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            transition_aspect(l, vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(
            transition_aspect(
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::Format::R8G8B8A8_SRGB
            ),
            vk::ImageAspectFlags::COLOR
        );
    }

    #[test]
    fn depth_candidates_start_with_pure_depth() {
        assert_eq!(DEPTH_CANDIDATES[0], vk::Format::D32_SFLOAT);
        assert!(DEPTH_CANDIDATES[1..].iter().all(|&f| has_stencil(f)));
    }
}
