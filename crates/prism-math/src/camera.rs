// SPDX-License-Identifier: CEPL-1.0
use glam::{Mat4, Vec3};

/// Orbit camera around a target point, producing Vulkan-convention matrices
/// (depth in [0, 1], Y pointing down in clip space).
#[derive(Clone, Copy, Debug)]
pub struct Camera {
    pub target: Vec3,
    pub distance: f32,
    pub yaw: f32,
    pub pitch: f32,
    pub fov_y_deg: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            target: Vec3::ZERO,
            distance: 3.0,
            yaw: 0.6,
            pitch: 0.4,
            fov_y_deg: 45.0,
            aspect: 4.0 / 3.0,
            near: 0.01,
            far: 100.0,
        }
    }
}

impl Camera {
    pub fn eye(&self) -> Vec3 {
        let (sy, cy) = self.yaw.sin_cos();
        let (sp, cp) = self.pitch.sin_cos();
        self.target + self.distance * Vec3::new(cp * sy, sp, cp * cy)
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye(), self.target, Vec3::Y)
    }

    pub fn projection(&self) -> Mat4 {
        let mut proj =
            Mat4::perspective_rh(self.fov_y_deg.to_radians(), self.aspect, self.near, self.far);
        proj.y_axis.y *= -1.0;
        proj
    }

    /// Ignores degenerate sizes so a minimised window keeps the last aspect.
    pub fn set_viewport(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.aspect = width as f32 / height as f32;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn eye_sits_at_distance_from_target() {
        let cam = Camera {
            target: Vec3::new(1.0, 0.0, -2.0),
            distance: 5.0,
            ..Default::default()
        };
        assert!((cam.eye().distance(cam.target) - 5.0).abs() < 1e-4);
    }

    #[test]
    fn projection_flips_y_and_maps_near_to_zero() {
        let cam = Camera::default();
        let p = cam.projection();
        assert!(p.y_axis.y < 0.0);
        let clip = p * Vec4::new(0.0, 0.0, -cam.near, 1.0);
        assert!((clip.z / clip.w).abs() < 1e-4);
    }

    #[test]
    fn zero_viewport_keeps_aspect() {
        let mut cam = Camera::default();
        cam.set_viewport(1600, 900);
        cam.set_viewport(0, 0);
        assert!((cam.aspect - 16.0 / 9.0).abs() < 1e-6);
    }
}
