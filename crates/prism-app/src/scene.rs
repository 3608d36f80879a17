// SPDX-License-Identifier: CEPL-1.0
//! Demo content: a unit cube, a checker texture and a small light rig.
use prism_math::glam::Vec3;
use prism_math::{Light, LightKind, Vertex};

const FACES: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
    // normal, u axis, v axis
    ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
    ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
    ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
    ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
    ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
    ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
];

/// Four vertices per face so every face keeps a flat normal.
pub fn cube() -> (Vec<Vertex>, Vec<u32>) {
    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (n, u, v) in FACES {
        let (n, u, v) = (Vec3::from(n), Vec3::from(u), Vec3::from(v));
        let base = vertices.len() as u32;
        let tint = (n.abs() * 0.5 + Vec3::splat(0.5)).to_array();
        for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
            let p = (n + u * su + v * sv) * 0.5;
            let uv = [(su + 1.0) * 0.5, 1.0 - (sv + 1.0) * 0.5];
            vertices.push(Vertex::new(p.to_array(), n.to_array(), tint, uv));
        }
        indices.extend([base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    (vertices, indices)
}

/// `cells` x `cells` checkerboard, `size` pixels square, RGBA8.
pub fn checker(size: u32, cells: u32) -> Vec<u8> {
    let cell = (size / cells.max(1)).max(1);
    (0..size * size)
        .flat_map(|i| {
            let (x, y) = (i % size, i / size);
            let on = ((x / cell) + (y / cell)) % 2 == 0;
            if on {
                [235, 235, 235, 255]
            } else {
                [40, 40, 48, 255]
            }
        })
        .collect()
}

pub fn lights() -> Vec<(LightKind, Light)> {
    vec![
        (
            LightKind::Directional,
            Light::directional(
                Vec3::new(-0.4, -1.0, -0.3),
                Vec3::splat(0.15),
                Vec3::splat(0.6),
                Vec3::splat(0.5),
            ),
        ),
        (
            LightKind::Point,
            Light::point(Vec3::new(1.5, 1.0, 1.5), Vec3::new(1.0, 0.6, 0.3), 1.0, 0.09, 0.032),
        ),
        (
            LightKind::Spot,
            Light::spot(
                Vec3::new(0.0, 3.0, 0.0),
                Vec3::NEG_Y,
                Vec3::new(0.3, 0.5, 1.0),
                Vec3::new(1.0, 0.09, 0.032),
                12.5,
                17.5,
            ),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_faces_wind_counter_clockwise_from_outside() {
        let (v, i) = cube();
        assert_eq!(v.len(), 24);
        assert_eq!(i.len(), 36);
        for tri in i.chunks(3) {
            let [a, b, c] = [tri[0], tri[1], tri[2]].map(|k| Vec3::from(v[k as usize].pos));
            let face_n = (b - a).cross(c - a).normalize();
            let n = Vec3::from(v[tri[0] as usize].normal);
            assert!(face_n.dot(n) > 0.99, "{face_n} vs {n}");
        }
    }

    #[test]
    fn cube_fits_unit_box() {
        let (v, _) = cube();
        for p in v.iter().flat_map(|v| v.pos) {
            assert!((p.abs() - 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn checker_has_expected_size_and_alternates() {
        let px = checker(8, 2);
        assert_eq!(px.len(), 8 * 8 * 4);
        assert_ne!(px[0], px[4 * 4]);
        assert_eq!(px[3], 255);
    }
}
