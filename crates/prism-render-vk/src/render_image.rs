// SPDX-License-Identifier: CEPL-1.0
use crate::device::{Device, ImageDesc};
use crate::resource::GpuImage;
use anyhow::Result;
use ash::vk;

/// Multisampled color and depth attachments sized to the swapchain extent.
/// Rebuilt in lockstep with the swapchain.
pub struct RenderTargets {
    pub color: GpuImage,
    pub depth: GpuImage,
}

pub fn color_target_desc(
    extent: vk::Extent2D,
    format: vk::Format,
    samples: vk::SampleCountFlags,
) -> ImageDesc {
    ImageDesc {
        extent,
        mip_levels: 1,
        samples,
        format,
        tiling: vk::ImageTiling::OPTIMAL,
        usage: vk::ImageUsageFlags::TRANSIENT_ATTACHMENT | vk::ImageUsageFlags::COLOR_ATTACHMENT,
        memory: vk::MemoryPropertyFlags::DEVICE_LOCAL,
        aspect: vk::ImageAspectFlags::COLOR,
    }
}

pub fn depth_target_desc(
    extent: vk::Extent2D,
    format: vk::Format,
    samples: vk::SampleCountFlags,
) -> ImageDesc {
    ImageDesc {
        extent,
        mip_levels: 1,
        samples,
        format,
        tiling: vk::ImageTiling::OPTIMAL,
        usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        memory: vk::MemoryPropertyFlags::DEVICE_LOCAL,
        aspect: vk::ImageAspectFlags::DEPTH,
    }
}

impl RenderTargets {
    pub fn new(
        device: &Device,
        extent: vk::Extent2D,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> Result<Self> {
        let samples = device.msaa_samples();
        let color = device.create_image(&color_target_desc(extent, color_format, samples))?;
        let depth = device.create_image(&depth_target_desc(extent, depth_format, samples))?;
        device.transition_image_layout(
            depth.image(),
            depth_format,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            1,
        )?;
        Ok(Self { color, depth })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_share_extent_and_samples() {
        let extent = vk::Extent2D {
            width: 640,
            height: 480,
        };
        let s = vk::SampleCountFlags::TYPE_8;
        let c = color_target_desc(extent, vk::Format::B8G8R8A8_SRGB, s);
        let d = depth_target_desc(extent, vk::Format::D32_SFLOAT, s);
        assert_eq!((c.extent.width, c.extent.height), (640, 480));
        assert_eq!((d.extent.width, d.extent.height), (640, 480));
        assert_eq!(c.samples, s);
        assert_eq!(d.samples, s);
        assert!(c.usage.contains(vk::ImageUsageFlags::TRANSIENT_ATTACHMENT));
        assert_eq!(d.aspect, vk::ImageAspectFlags::DEPTH);
        assert_eq!(c.memory, vk::MemoryPropertyFlags::DEVICE_LOCAL);
    }
}
