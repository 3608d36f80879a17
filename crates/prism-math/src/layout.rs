// SPDX-License-Identifier: CEPL-1.0
use bytemuck::{Pod, Zeroable};
use glam::{IVec4, Mat4, Vec3, Vec4};

pub const MAX_LIGHTS: usize = 8;

/// Interleaved vertex as consumed by binding 0 (locations 0..=3).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub normal: [f32; 3],
    pub color: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    pub const fn new(pos: [f32; 3], normal: [f32; 3], color: [f32; 3], uv: [f32; 2]) -> Self {
        Self {
            pos,
            normal,
            color,
            uv,
        }
    }
}

/// Per-draw data pushed to the vertex stage at offset 0.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct PushConstants {
    pub model: Mat4,
    /// Inverse-transpose of the model's upper 3x3, one padded column per Vec4.
    pub normal: [Vec4; 3],
}

impl PushConstants {
    pub fn from_model(model: Mat4) -> Self {
        let n = model.inverse().transpose();
        Self {
            model,
            normal: [
                n.x_axis.truncate().extend(0.0),
                n.y_axis.truncate().extend(0.0),
                n.z_axis.truncate().extend(0.0),
            ],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LightKind {
    Directional,
    Point,
    Spot,
}

/// One light slot. Unused channels stay zero.
///
/// `attenuation` is (constant, linear, quadratic, _) and `cut_off` holds the
/// cosines of the inner and outer spot cones in x/y.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Light {
    pub position: Vec4,
    pub direction: Vec4,
    pub ambient: Vec4,
    pub diffuse: Vec4,
    pub specular: Vec4,
    pub attenuation: Vec4,
    pub cut_off: Vec4,
}

impl Light {
    pub fn directional(direction: Vec3, ambient: Vec3, diffuse: Vec3, specular: Vec3) -> Self {
        Self {
            direction: direction.normalize_or_zero().extend(0.0),
            ambient: ambient.extend(1.0),
            diffuse: diffuse.extend(1.0),
            specular: specular.extend(1.0),
            ..Default::default()
        }
    }

    pub fn point(position: Vec3, color: Vec3, constant: f32, linear: f32, quadratic: f32) -> Self {
        Self {
            position: position.extend(1.0),
            ambient: color.extend(1.0),
            diffuse: color.extend(1.0),
            specular: color.extend(1.0),
            attenuation: Vec4::new(constant, linear, quadratic, 0.0),
            ..Default::default()
        }
    }

    /// `inner_deg`/`outer_deg` are half-angles of the cone in degrees.
    pub fn spot(
        position: Vec3,
        direction: Vec3,
        color: Vec3,
        attenuation: Vec3,
        inner_deg: f32,
        outer_deg: f32,
    ) -> Self {
        Self {
            position: position.extend(1.0),
            direction: direction.normalize_or_zero().extend(0.0),
            ambient: color.extend(1.0),
            diffuse: color.extend(1.0),
            specular: color.extend(1.0),
            attenuation: attenuation.extend(0.0),
            cut_off: Vec4::new(
                inner_deg.to_radians().cos(),
                outer_deg.to_radians().cos(),
                0.0,
                0.0,
            ),
        }
    }
}

/// Frame-global uniform block (set 0, binding 0).
///
/// Lights are packed by kind: directional first, then point, then spot;
/// `num_lights` holds the count of each in x/y/z.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct GlobalUbo {
    pub view: Mat4,
    pub proj: Mat4,
    pub viewproj: Mat4,
    pub view_pos: Vec4,
    pub lights: [Light; MAX_LIGHTS],
    pub num_lights: IVec4,
}

impl GlobalUbo {
    pub fn new(view: Mat4, proj: Mat4) -> Self {
        Self {
            view,
            proj,
            viewproj: proj * view,
            view_pos: view.inverse().w_axis,
            lights: [Light::default(); MAX_LIGHTS],
            num_lights: IVec4::ZERO,
        }
    }

    /// Replaces the light table. Lights beyond `MAX_LIGHTS` are dropped;
    /// returns how many were written.
    pub fn set_lights(&mut self, lights: &[(LightKind, Light)]) -> usize {
        self.lights = [Light::default(); MAX_LIGHTS];
        self.num_lights = IVec4::ZERO;

        let mut slot = 0;
        for (lane, kind) in [LightKind::Directional, LightKind::Point, LightKind::Spot]
            .into_iter()
            .enumerate()
        {
            for (_, light) in lights.iter().filter(|(k, _)| *k == kind) {
                if slot == MAX_LIGHTS {
                    return slot;
                }
                self.lights[slot] = *light;
                self.num_lights[lane] += 1;
                slot += 1;
            }
        }
        slot
    }
}

/// Material block (set 1, binding 0).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct MaterialUbo {
    pub diffuse: Vec4,
    pub specular: Vec4,
    pub ambient: Vec4,
    pub emissive: Vec4,
    pub shininess: f32,
    pub _pad: [f32; 3],
}

impl Default for MaterialUbo {
    fn default() -> Self {
        Self {
            diffuse: Vec4::ONE,
            specular: Vec4::ZERO,
            ambient: Vec4::new(0.1, 0.1, 0.1, 1.0),
            emissive: Vec4::ZERO,
            shininess: 32.0,
            _pad: [0.0; 3],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-5;

    fn assert_vec4_approx_eq(a: Vec4, b: Vec4) {
        assert!((a - b).abs().max_element() < EPSILON, "{a:?} != {b:?}");
    }

    #[test]
    fn layouts_have_std140_friendly_sizes() {
        assert_eq!(std::mem::size_of::<Vertex>(), 44);
        assert_eq!(std::mem::size_of::<Light>(), 112);
        assert_eq!(std::mem::size_of::<GlobalUbo>(), 3 * 64 + 16 + 8 * 112 + 16);
        assert_eq!(std::mem::size_of::<MaterialUbo>(), 80);
        // Vulkan guarantees at least 128 bytes of push constants.
        assert!(std::mem::size_of::<PushConstants>() <= 128);
    }

    #[test]
    fn normal_matrix_undoes_non_uniform_scale() {
        let pc = PushConstants::from_model(Mat4::from_scale(Vec3::new(2.0, 4.0, 8.0)));
        assert_vec4_approx_eq(pc.normal[0], Vec4::new(0.5, 0.0, 0.0, 0.0));
        assert_vec4_approx_eq(pc.normal[1], Vec4::new(0.0, 0.25, 0.0, 0.0));
        assert_vec4_approx_eq(pc.normal[2], Vec4::new(0.0, 0.0, 0.125, 0.0));
    }

    #[test]
    fn normal_matrix_of_rotation_is_the_rotation() {
        let model = Mat4::from_rotation_y(0.7) * Mat4::from_translation(Vec3::new(3.0, 1.0, 2.0));
        let pc = PushConstants::from_model(model);
        assert_vec4_approx_eq(pc.normal[0], model.x_axis.truncate().extend(0.0));
        assert_vec4_approx_eq(pc.normal[1], model.y_axis.truncate().extend(0.0));
        assert_vec4_approx_eq(pc.normal[2], model.z_axis.truncate().extend(0.0));
    }

    #[test]
    fn view_position_is_camera_origin() {
        let eye = Vec3::new(1.0, 2.0, 3.0);
        let view = Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y);
        let ubo = GlobalUbo::new(view, Mat4::IDENTITY);
        assert_vec4_approx_eq(ubo.view_pos, eye.extend(1.0));
    }

    #[test]
    fn lights_are_grouped_by_kind() {
        let sun = Light::directional(-Vec3::ONE, Vec3::splat(0.1), Vec3::splat(0.1), Vec3::splat(0.1));
        let bulb = Light::point(Vec3::Y, Vec3::ONE, 1.0, 1.4, 3.6);
        let torch = Light::spot(Vec3::Y, -Vec3::Y, Vec3::ONE, Vec3::new(1.0, 1.4, 3.6), 12.5, 17.5);

        let mut ubo = GlobalUbo::new(Mat4::IDENTITY, Mat4::IDENTITY);
        let written = ubo.set_lights(&[
            (LightKind::Spot, torch),
            (LightKind::Point, bulb),
            (LightKind::Directional, sun),
        ]);

        assert_eq!(written, 3);
        assert_eq!(ubo.num_lights, IVec4::new(1, 1, 1, 0));
        assert_eq!(ubo.lights[0], sun);
        assert_eq!(ubo.lights[1], bulb);
        assert_eq!(ubo.lights[2], torch);
        assert_eq!(ubo.lights[3], Light::default());
    }

    #[test]
    fn light_table_truncates_at_capacity() {
        let bulb = Light::point(Vec3::ZERO, Vec3::ONE, 1.0, 0.0, 0.0);
        let many = vec![(LightKind::Point, bulb); MAX_LIGHTS + 3];
        let mut ubo = GlobalUbo::new(Mat4::IDENTITY, Mat4::IDENTITY);
        assert_eq!(ubo.set_lights(&many), MAX_LIGHTS);
        assert_eq!(ubo.num_lights.y, MAX_LIGHTS as i32);
    }

    #[test]
    fn spot_cutoffs_are_cosines() {
        let l = Light::spot(Vec3::ZERO, -Vec3::Y, Vec3::ONE, Vec3::ONE, 60.0, 90.0);
        assert!((l.cut_off.x - 0.5).abs() < EPSILON);
        assert!(l.cut_off.y.abs() < EPSILON);
    }
}
