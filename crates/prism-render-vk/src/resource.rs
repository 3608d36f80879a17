// SPDX-License-Identifier: CEPL-1.0
//! Scoped GPU allocations. Each wrapper releases its handles together on
//! drop, including on early-return error paths during construction.
use anyhow::{Context, Result};
use ash::vk;

/// Buffer plus its backing memory.
pub struct GpuBuffer {
    device: ash::Device,
    pub(crate) buffer: vk::Buffer,
    pub(crate) memory: vk::DeviceMemory,
    size: vk::DeviceSize,
}

impl GpuBuffer {
    /// Wraps a freshly created buffer; memory is attached afterwards so a
    /// failed allocation still destroys the buffer.
    pub(crate) fn adopt(device: &ash::Device, buffer: vk::Buffer, size: vk::DeviceSize) -> Self {
        Self {
            device: device.clone(),
            buffer,
            memory: vk::DeviceMemory::null(),
            size,
        }
    }

    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Map, copy, unmap. Only valid for HOST_VISIBLE memory.
    pub fn write(&self, offset: vk::DeviceSize, bytes: &[u8]) -> Result<()> {
        let len = bytes.len() as vk::DeviceSize;
        anyhow::ensure!(
            offset + len <= self.size,
            "write of {len} bytes at {offset} overflows buffer of {}",
            self.size
        );
        // SAFETY: range checked above; memory is host-visible by contract.
        unsafe {
            let ptr = self
                .device
                .map_memory(self.memory, offset, len, vk::MemoryMapFlags::empty())
                .context("map_memory")?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr as *mut u8, bytes.len());
            self.device.unmap_memory(self.memory);
        }
        Ok(())
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

/// Image, its memory and (once created) a view over it.
pub struct GpuImage {
    device: ash::Device,
    pub(crate) image: vk::Image,
    pub(crate) memory: vk::DeviceMemory,
    pub(crate) view: vk::ImageView,
    pub(crate) format: vk::Format,
    pub(crate) extent: vk::Extent2D,
    pub(crate) mip_levels: u32,
}

impl GpuImage {
    pub(crate) fn adopt(
        device: &ash::Device,
        image: vk::Image,
        format: vk::Format,
        extent: vk::Extent2D,
        mip_levels: u32,
    ) -> Self {
        Self {
            device: device.clone(),
            image,
            memory: vk::DeviceMemory::null(),
            view: vk::ImageView::null(),
            format,
            extent,
            mip_levels,
        }
    }

    pub fn image(&self) -> vk::Image {
        self.image
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }
}

// View before image, image before its memory.
impl Drop for GpuImage {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image_view(self.view, None);
            self.device.destroy_image(self.image, None);
            self.device.free_memory(self.memory, None);
        }
    }
}
