// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use thiserror::Error;

/// Conditions the engine cannot recover from. Out-of-date and suboptimal
/// surfaces are not errors; the frame scheduler absorbs them.
#[derive(Debug, Error)]
pub enum VkError {
    #[error("no physical device supports graphics+present, swapchain and anisotropic sampling")]
    NoSuitableDevice,

    #[error("no memory type matches bits {type_bits:#b} with {flags:?}")]
    NoMemoryType {
        type_bits: u32,
        flags: vk::MemoryPropertyFlags,
    },

    #[error("unsupported image layout transition {old:?} -> {new:?}")]
    UnsupportedLayoutTransition {
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },

    #[error("no depth format supports depth/stencil attachment on optimal tiling")]
    NoDepthFormat,

    #[error("format {0:?} does not support linear blits for mip generation")]
    NoLinearBlit(vk::Format),

    #[error("queue_submit failed: {0:?}")]
    Submit(vk::Result),

    #[error("{what} failed: {result:?}")]
    Surface {
        what: &'static str,
        result: vk::Result,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_failure() {
        let e = VkError::UnsupportedLayoutTransition {
            old: vk::ImageLayout::GENERAL,
            new: vk::ImageLayout::PRESENT_SRC_KHR,
        };
        let msg = e.to_string();
        assert!(msg.contains("GENERAL"), "{msg}");
        assert!(msg.contains("PRESENT_SRC_KHR"), "{msg}");

        let e = VkError::Surface {
            what: "queue_present",
            result: vk::Result::ERROR_DEVICE_LOST,
        };
        assert!(e.to_string().starts_with("queue_present failed"));

        let e = VkError::Submit(vk::Result::ERROR_DEVICE_LOST);
        assert!(e.to_string().starts_with("queue_submit failed"), "{e}");
    }

    #[test]
    fn converts_into_anyhow() {
        let err: anyhow::Error = VkError::NoSuitableDevice.into();
        assert!(matches!(
            err.downcast_ref::<VkError>(),
            Some(VkError::NoSuitableDevice)
        ));
    }
}
