// SPDX-License-Identifier: CEPL-1.0
//! Physical device selection: queue family discovery, suitability checks,
//! scoring and multisample limits.
use crate::error::VkError;
use crate::instance::InstanceContext;
use anyhow::{Context, Result};
use ash::khr::swapchain;
use ash::vk;
use std::ffi::CStr;
use tracing::{debug, info};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    /// First graphics-capable family and first family that can present;
    /// they may coincide.
    pub fn from_families(
        families: &[vk::QueueFamilyProperties],
        mut can_present: impl FnMut(u32) -> bool,
    ) -> Self {
        let mut out = Self::default();
        for (i, family) in families.iter().enumerate() {
            let i = i as u32;
            if out.graphics.is_none()
                && family.queue_count > 0
                && family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
            {
                out.graphics = Some(i);
            }
            if out.present.is_none() && can_present(i) {
                out.present = Some(i);
            }
            if out.is_complete() {
                break;
            }
        }
        out
    }

    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    /// Distinct families, graphics first; one queue create info per entry.
    pub fn unique(&self) -> Vec<u32> {
        let mut v: Vec<u32> = self.graphics.into_iter().collect();
        if let Some(p) = self.present {
            if !v.contains(&p) {
                v.push(p);
            }
        }
        v
    }
}

/// Everything the selector needs to know about one device, gathered up front
/// so the decision itself is a pure function.
#[derive(Clone, Debug)]
pub struct DeviceCandidate {
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub queues: QueueFamilyIndices,
    pub has_swapchain_ext: bool,
    pub format_count: usize,
    pub present_mode_count: usize,
    pub sampler_anisotropy: bool,
}

impl DeviceCandidate {
    pub fn is_suitable(&self) -> bool {
        self.queues.is_complete()
            && self.has_swapchain_ext
            && self.format_count > 0
            && self.present_mode_count > 0
            && self.sampler_anisotropy
    }
}

/// None for unsuitable devices; otherwise higher is better.
pub fn rate_device(c: &DeviceCandidate) -> Option<u32> {
    if !c.is_suitable() {
        return None;
    }
    Some(match c.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 10,
        vk::PhysicalDeviceType::CPU => 1,
        _ => 0,
    })
}

/// Index of the best-rated candidate; ties keep enumeration order.
pub fn best_candidate(cands: &[DeviceCandidate]) -> Option<usize> {
    let mut best: Option<(usize, u32)> = None;
    for (i, c) in cands.iter().enumerate() {
        if let Some(score) = rate_device(c) {
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((i, score));
            }
        }
    }
    best.map(|(i, _)| i)
}

/// Highest single sample count present in `flags`, capped at `cap` samples.
pub fn sample_count_from_flags(flags: vk::SampleCountFlags, cap: u32) -> vk::SampleCountFlags {
    const ORDER: [(vk::SampleCountFlags, u32); 7] = [
        (vk::SampleCountFlags::TYPE_64, 64),
        (vk::SampleCountFlags::TYPE_32, 32),
        (vk::SampleCountFlags::TYPE_16, 16),
        (vk::SampleCountFlags::TYPE_8, 8),
        (vk::SampleCountFlags::TYPE_4, 4),
        (vk::SampleCountFlags::TYPE_2, 2),
        (vk::SampleCountFlags::TYPE_1, 1),
    ];
    ORDER
        .into_iter()
        .find(|&(bit, n)| n <= cap.max(1) && flags.contains(bit))
        .map(|(bit, _)| bit)
        .unwrap_or(vk::SampleCountFlags::TYPE_1)
}

/// MSAA level usable for both color and depth framebuffer attachments.
pub fn max_usable_sample_count(limits: &vk::PhysicalDeviceLimits, cap: u32) -> vk::SampleCountFlags {
    sample_count_from_flags(
        limits.framebuffer_color_sample_counts & limits.framebuffer_depth_sample_counts,
        cap,
    )
}

pub struct PhysicalDeviceInfo {
    pub phys: vk::PhysicalDevice,
    pub queues: QueueFamilyIndices,
    pub properties: vk::PhysicalDeviceProperties,
    pub name: String,
}

unsafe fn describe(ctx: &InstanceContext, phys: vk::PhysicalDevice) -> Result<DeviceCandidate> {
    let inst = &ctx.instance;
    let props = unsafe { inst.get_physical_device_properties(phys) };
    let features = unsafe { inst.get_physical_device_features(phys) };
    let families = unsafe { inst.get_physical_device_queue_family_properties(phys) };

    let queues = QueueFamilyIndices::from_families(&families, |i| unsafe {
        ctx.surface_loader
            .get_physical_device_surface_support(phys, i, ctx.surface)
            .unwrap_or(false)
    });

    let exts = unsafe { inst.enumerate_device_extension_properties(phys) }
        .context("enumerate_device_extension_properties")?;
    let has_swapchain_ext = exts
        .iter()
        .any(|e| e.extension_name_as_c_str().is_ok_and(|n| n == swapchain::NAME));

    // Surface queries are only meaningful once the swapchain extension exists.
    let (format_count, present_mode_count) = if has_swapchain_ext {
        let formats = unsafe {
            ctx.surface_loader
                .get_physical_device_surface_formats(phys, ctx.surface)
        }
        .unwrap_or_default();
        let modes = unsafe {
            ctx.surface_loader
                .get_physical_device_surface_present_modes(phys, ctx.surface)
        }
        .unwrap_or_default();
        (formats.len(), modes.len())
    } else {
        (0, 0)
    };

    Ok(DeviceCandidate {
        name: device_name(&props),
        device_type: props.device_type,
        queues,
        has_swapchain_ext,
        format_count,
        present_mode_count,
        sampler_anisotropy: features.sampler_anisotropy == vk::TRUE,
    })
}

pub fn device_name(props: &vk::PhysicalDeviceProperties) -> String {
    props
        .device_name_as_c_str()
        .map(CStr::to_string_lossy)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| "<unnamed>".into())
}

pub fn pick_physical_device(ctx: &InstanceContext) -> Result<PhysicalDeviceInfo> {
    // SAFETY: read-only queries against a live instance and surface.
    let devices = unsafe { ctx.instance.enumerate_physical_devices() }
        .context("enumerate_physical_devices")?;

    let mut cands = Vec::with_capacity(devices.len());
    for &phys in &devices {
        let c = unsafe { describe(ctx, phys)? };
        debug!(
            "candidate {} ({:?}): suitable={} queues={:?}",
            c.name,
            c.device_type,
            c.is_suitable(),
            c.queues
        );
        cands.push(c);
    }

    let idx = best_candidate(&cands).ok_or(VkError::NoSuitableDevice)?;
    let phys = devices[idx];
    let properties = unsafe { ctx.instance.get_physical_device_properties(phys) };
    let name = cands[idx].name.clone();
    info!(
        "gpu: {} ({:?}), api {}.{}.{}",
        name,
        properties.device_type,
        vk::api_version_major(properties.api_version),
        vk::api_version_minor(properties.api_version),
        vk::api_version_patch(properties.api_version),
    );

    Ok(PhysicalDeviceInfo {
        phys,
        queues: cands[idx].queues,
        properties,
        name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    fn candidate(device_type: vk::PhysicalDeviceType) -> DeviceCandidate {
        DeviceCandidate {
            name: format!("{device_type:?}"),
            device_type,
            queues: QueueFamilyIndices {
                graphics: Some(0),
                present: Some(0),
            },
            has_swapchain_ext: true,
            format_count: 2,
            present_mode_count: 1,
            sampler_anisotropy: true,
        }
    }

    #[test]
    fn graphics_and_present_may_share_a_family() {
        let fams = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)];
        let q = QueueFamilyIndices::from_families(&fams, |_| true);
        assert_eq!(q.graphics, Some(0));
        assert_eq!(q.present, Some(0));
        assert_eq!(q.unique(), vec![0]);
    }

    #[test]
    fn separate_present_family_is_found() {
        let fams = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::COMPUTE),
        ];
        let q = QueueFamilyIndices::from_families(&fams, |i| i == 2);
        assert!(q.is_complete());
        assert_eq!(q.unique(), vec![1, 2]);
    }

    #[test]
    fn incomplete_without_present() {
        let fams = [family(vk::QueueFlags::GRAPHICS)];
        let q = QueueFamilyIndices::from_families(&fams, |_| false);
        assert!(!q.is_complete());
    }

    #[test]
    fn each_requirement_rejects() {
        let ok = candidate(vk::PhysicalDeviceType::DISCRETE_GPU);
        assert!(ok.is_suitable());

        let mut c = ok.clone();
        c.queues.present = None;
        assert!(rate_device(&c).is_none());

        let mut c = ok.clone();
        c.has_swapchain_ext = false;
        assert!(rate_device(&c).is_none());

        let mut c = ok.clone();
        c.format_count = 0;
        assert!(rate_device(&c).is_none());

        let mut c = ok.clone();
        c.present_mode_count = 0;
        assert!(rate_device(&c).is_none());

        let mut c = ok;
        c.sampler_anisotropy = false;
        assert!(rate_device(&c).is_none());
    }

    #[test]
    fn discrete_preferred_over_integrated() {
        let cands = [
            candidate(vk::PhysicalDeviceType::INTEGRATED_GPU),
            candidate(vk::PhysicalDeviceType::DISCRETE_GPU),
        ];
        assert_eq!(best_candidate(&cands), Some(1));
    }

    #[test]
    fn unsuitable_discrete_loses_to_suitable_integrated() {
        let mut discrete = candidate(vk::PhysicalDeviceType::DISCRETE_GPU);
        discrete.sampler_anisotropy = false;
        let cands = [discrete, candidate(vk::PhysicalDeviceType::INTEGRATED_GPU)];
        assert_eq!(best_candidate(&cands), Some(1));
    }

    #[test]
    fn nothing_suitable_yields_none() {
        let mut c = candidate(vk::PhysicalDeviceType::DISCRETE_GPU);
        c.format_count = 0;
        assert_eq!(best_candidate(&[c]), None);
        assert_eq!(best_candidate(&[]), None);
    }

    #[test]
    fn sample_count_takes_highest_common_bit() {
        let limits = vk::PhysicalDeviceLimits {
            framebuffer_color_sample_counts: vk::SampleCountFlags::TYPE_1
                | vk::SampleCountFlags::TYPE_2
                | vk::SampleCountFlags::TYPE_4
                | vk::SampleCountFlags::TYPE_8,
            framebuffer_depth_sample_counts: vk::SampleCountFlags::TYPE_1
                | vk::SampleCountFlags::TYPE_2
                | vk::SampleCountFlags::TYPE_4,
            ..Default::default()
        };
        assert_eq!(max_usable_sample_count(&limits, 64), vk::SampleCountFlags::TYPE_4);
        assert_eq!(max_usable_sample_count(&limits, 2), vk::SampleCountFlags::TYPE_2);
    }

    #[test]
    fn sample_count_falls_back_to_one() {
        assert_eq!(
            sample_count_from_flags(vk::SampleCountFlags::empty(), 64),
            vk::SampleCountFlags::TYPE_1
        );
        assert_eq!(
            sample_count_from_flags(vk::SampleCountFlags::TYPE_8, 0),
            vk::SampleCountFlags::TYPE_1
        );
    }
}
