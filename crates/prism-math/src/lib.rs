// SPDX-License-Identifier: CEPL-1.0
//! Plain-old-data layouts shared between the CPU and the shaders, plus the
//! camera math that feeds them.
pub mod camera;
pub mod layout;

pub use camera::Camera;
pub use glam;
pub use layout::{
    GlobalUbo, Light, LightKind, MaterialUbo, PushConstants, Vertex, MAX_LIGHTS,
};
