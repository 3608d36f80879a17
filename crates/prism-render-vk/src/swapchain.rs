// SPDX-License-Identifier: CEPL-1.0
//! Presentation surface negotiation and the chain of presentable images.
use crate::device::Device;
use crate::error::VkError;
use crate::instance::InstanceContext;
use anyhow::{Context, Result};
use ash::khr::swapchain;
use ash::vk;
use prism_render::RenderSize;
use tracing::info;

pub const PREFERRED_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_SRGB,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Preferred (format, color space) when advertised, else the first entry.
/// Callers guarantee a non-empty list (device selection rejects empty ones).
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    formats
        .iter()
        .copied()
        .find(|f| f.format == PREFERRED_FORMAT.format && f.color_space == PREFERRED_FORMAT.color_space)
        .or_else(|| formats.first().copied())
        .unwrap_or(PREFERRED_FORMAT)
}

/// FIFO with vsync, IMMEDIATE without; no other modes are considered.
pub fn choose_present_mode(vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        vk::PresentModeKHR::FIFO
    } else {
        vk::PresentModeKHR::IMMEDIATE
    }
}

/// Fixed surface extent verbatim, or the window size clamped into the
/// surface's min/max when the surface reports the "any size" sentinel.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, window: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: window
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: window
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum, capped by the maximum (0 = unbounded).
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let want = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        want.min(caps.max_image_count)
    } else {
        want
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquired {
    Image { index: u32, suboptimal: bool },
    OutOfDate,
}

pub fn classify_acquire(res: Result<(u32, bool), vk::Result>) -> Result<Acquired, VkError> {
    match res {
        Ok((index, suboptimal)) => Ok(Acquired::Image { index, suboptimal }),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquired::OutOfDate),
        Err(result) => Err(VkError::Surface {
            what: "acquire_next_image",
            result,
        }),
    }
}

/// `Ok(true)` when the swapchain must be rebuilt.
pub fn classify_present(res: Result<bool, vk::Result>) -> Result<bool, VkError> {
    match res {
        Ok(suboptimal) => Ok(suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
        Err(result) => Err(VkError::Surface {
            what: "queue_present",
            result,
        }),
    }
}

pub struct Swapchain {
    device: ash::Device,
    loader: swapchain::Device,
    handle: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    framebuffers: Vec<vk::Framebuffer>,
    format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
}

impl Swapchain {
    pub fn new(
        device: &Device,
        ctx: &InstanceContext,
        window: RenderSize,
        vsync: bool,
    ) -> Result<Self> {
        let surf = &ctx.surface_loader;
        let phys = device.physical();
        // SAFETY: read-only surface queries against a live surface.
        let (caps, formats) = unsafe {
            (
                surf.get_physical_device_surface_capabilities(phys, ctx.surface)
                    .context("get_physical_device_surface_capabilities")?,
                surf.get_physical_device_surface_formats(phys, ctx.surface)
                    .context("get_physical_device_surface_formats")?,
            )
        };

        let format = choose_surface_format(&formats);
        let present_mode = choose_present_mode(vsync);
        let extent = choose_extent(&caps, window);
        let image_count = choose_image_count(&caps);

        let families = [device.graphics_family(), device.present_family()];
        let (sharing_mode, family_count) = if families[0] != families[1] {
            (vk::SharingMode::CONCURRENT, 2)
        } else {
            (vk::SharingMode::EXCLUSIVE, 0)
        };

        let ci = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: ctx.surface,
            min_image_count: image_count,
            image_format: format.format,
            image_color_space: format.color_space,
            image_extent: extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: sharing_mode,
            queue_family_index_count: family_count,
            p_queue_family_indices: families.as_ptr(),
            pre_transform: caps.current_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode,
            clipped: vk::TRUE,
            old_swapchain: vk::SwapchainKHR::null(),
            ..Default::default()
        };

        let loader = device.swapchain_loader().clone();
        let handle = unsafe { loader.create_swapchain(&ci, None) }.context("create_swapchain")?;
        let mut out = Self {
            device: device.raw().clone(),
            loader,
            handle,
            images: Vec::new(),
            views: Vec::new(),
            framebuffers: Vec::new(),
            format,
            present_mode,
            extent,
        };

        out.images =
            unsafe { out.loader.get_swapchain_images(handle) }.context("get_swapchain_images")?;
        for &img in &out.images {
            let view =
                device.create_image_view(img, format.format, vk::ImageAspectFlags::COLOR, 1)?;
            out.views.push(view);
        }

        info!(
            "swapchain: format={:?}/{:?} present_mode={:?} extent={}x{} images={} (min={} max={}) sharing={:?}",
            format.format,
            format.color_space,
            present_mode,
            extent.width,
            extent.height,
            out.images.len(),
            caps.min_image_count,
            caps.max_image_count,
            sharing_mode,
        );
        Ok(out)
    }

    /// One framebuffer per image: [msaa color, depth, presentable (resolve)].
    pub fn create_framebuffers(
        &mut self,
        render_pass: vk::RenderPass,
        color_view: vk::ImageView,
        depth_view: vk::ImageView,
    ) -> Result<()> {
        self.destroy_framebuffers();
        for &view in &self.views {
            let attachments = [color_view, depth_view, view];
            let ci = vk::FramebufferCreateInfo {
                s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
                render_pass,
                attachment_count: attachments.len() as u32,
                p_attachments: attachments.as_ptr(),
                width: self.extent.width,
                height: self.extent.height,
                layers: 1,
                ..Default::default()
            };
            let fb = unsafe { self.device.create_framebuffer(&ci, None) }
                .context("create_framebuffer")?;
            self.framebuffers.push(fb);
        }
        Ok(())
    }

    /// Blocks until an image is available or the surface goes stale.
    pub fn acquire_next_image(&self, signal: vk::Semaphore) -> Result<Acquired> {
        let res = unsafe {
            self.loader
                .acquire_next_image(self.handle, u64::MAX, signal, vk::Fence::null())
        };
        Ok(classify_acquire(res)?)
    }

    /// Returns true when the swapchain should be rebuilt.
    pub fn present(&self, queue: vk::Queue, wait: vk::Semaphore, index: u32) -> Result<bool> {
        let info = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait,
            swapchain_count: 1,
            p_swapchains: &self.handle,
            p_image_indices: &index,
            ..Default::default()
        };
        let res = unsafe { self.loader.queue_present(queue, &info) };
        Ok(classify_present(res)?)
    }

    pub fn format(&self) -> vk::Format {
        self.format.format
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn framebuffer(&self, index: u32) -> vk::Framebuffer {
        self.framebuffers[index as usize]
    }

    pub fn destroy_framebuffers(&mut self) {
        for fb in self.framebuffers.drain(..) {
            unsafe { self.device.destroy_framebuffer(fb, None) };
        }
    }

    pub fn destroy_views(&mut self) {
        for view in self.views.drain(..) {
            unsafe { self.device.destroy_image_view(view, None) };
        }
    }

    /// Images belong to the swapchain and go with it.
    pub fn destroy_swapchain(&mut self) {
        if self.handle != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(self.handle, None) };
            self.handle = vk::SwapchainKHR::null();
        }
        self.images.clear();
    }
}

// STRICT ORDER: framebuffers -> views -> swapchain. Each step is a no-op once done.
impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy_framebuffers();
        self.destroy_views();
        self.destroy_swapchain();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sf(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    fn caps(current: (u32, u32), min: (u32, u32), max: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: min.0,
                height: min.1,
            },
            max_image_extent: vk::Extent2D {
                width: max.0,
                height: max.1,
            },
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        }
    }

    fn key(f: vk::SurfaceFormatKHR) -> (vk::Format, vk::ColorSpaceKHR) {
        (f.format, f.color_space)
    }

    #[test]
    fn preferred_format_wins_wherever_it_sits() {
        let srgb = vk::ColorSpaceKHR::SRGB_NONLINEAR;
        let lists = [
            vec![PREFERRED_FORMAT, sf(vk::Format::R8G8B8A8_UNORM, srgb)],
            vec![
                sf(vk::Format::R8G8B8A8_UNORM, srgb),
                sf(vk::Format::B8G8R8A8_UNORM, srgb),
                PREFERRED_FORMAT,
            ],
        ];
        for list in lists {
            assert_eq!(key(choose_surface_format(&list)), key(PREFERRED_FORMAT));
        }
    }

    #[test]
    fn falls_back_to_first_advertised() {
        let list = [
            sf(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            // right format, wrong color space: not the preferred pair
            sf(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT),
        ];
        assert_eq!(key(choose_surface_format(&list)), key(list[0]));
    }

    #[test]
    fn vsync_selects_fifo() {
        assert_eq!(choose_present_mode(true), vk::PresentModeKHR::FIFO);
        assert_eq!(choose_present_mode(false), vk::PresentModeKHR::IMMEDIATE);
    }

    #[test]
    fn fixed_extent_ignores_window() {
        let c = caps((1280, 720), (1, 1), (4096, 4096));
        for (w, h) in [(1, 1), (800, 600), (5000, 5000)] {
            let e = choose_extent(&c, RenderSize { width: w, height: h });
            assert_eq!((e.width, e.height), (1280, 720));
        }
    }

    #[test]
    fn sentinel_extent_clamps_window() {
        let c = caps((u32::MAX, u32::MAX), (100, 50), (1920, 1080));
        let e = choose_extent(&c, RenderSize { width: 800, height: 600 });
        assert_eq!((e.width, e.height), (800, 600));
        let e = choose_extent(&c, RenderSize { width: 10, height: 4000 });
        assert_eq!((e.width, e.height), (100, 1080));
        let e = choose_extent(&c, RenderSize { width: 3000, height: 20 });
        assert_eq!((e.width, e.height), (1920, 50));
    }

    #[test]
    fn image_count_is_min_plus_one_capped() {
        let mut c = caps((1, 1), (1, 1), (1, 1));
        assert_eq!(choose_image_count(&c), 3);
        c.max_image_count = 2;
        assert_eq!(choose_image_count(&c), 2);
        c.max_image_count = 8;
        assert_eq!(choose_image_count(&c), 3);
    }

    #[test]
    fn acquire_results() {
        assert_eq!(
            classify_acquire(Ok((2, false))).unwrap(),
            Acquired::Image { index: 2, suboptimal: false }
        );
        assert_eq!(
            classify_acquire(Ok((0, true))).unwrap(),
            Acquired::Image { index: 0, suboptimal: true }
        );
        assert_eq!(
            classify_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            Acquired::OutOfDate
        );
        assert!(classify_acquire(Err(vk::Result::ERROR_DEVICE_LOST)).is_err());
    }

    #[test]
    fn present_results() {
        assert!(!classify_present(Ok(false)).unwrap());
        assert!(classify_present(Ok(true)).unwrap());
        assert!(classify_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap());
        assert!(classify_present(Err(vk::Result::ERROR_SURFACE_LOST_KHR)).is_err());
    }
}
