// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
//! Vulkan backend: device selection, swapchain lifecycle, frames in flight,
//! pipelines and resource uploads.

pub mod descriptor;
pub mod device;
pub mod error;
pub mod frame;
pub mod instance;
pub mod physical;
pub mod pipeline;
pub mod render_image;
pub mod render_pass;
pub mod renderer;
pub mod resource;
pub mod shader;
pub mod swapchain;
pub mod teardown;
pub mod uniform;
pub mod upload;

pub use device::Device;
pub use error::VkError;
pub use frame::{FrameScheduler, FrameTicket};
pub use renderer::VkRenderer;
pub use upload::{Material, Mesh, Texture};

/// Frames the CPU may record ahead of the GPU.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;
