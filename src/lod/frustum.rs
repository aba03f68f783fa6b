use crate::octree::aabb::Aabb;
use glam::{DMat4, DVec3};

/// A view frustum for culling node boxes.
#[derive(Debug, Clone, Copy)]
pub struct Frustum {
    /// Left, right, bottom, top, near and far planes as (normal, distance),
    /// normals pointing inside.
    planes: [(DVec3, f64); 6],
}

impl Frustum {
    /// Extract the planes of a view-projection matrix.
    ///
    /// Clip space depth is expected in `[0, 1]`, as produced by glam's
    /// `perspective_rh` and `orthographic_rh`.
    pub fn from_matrix(vp: DMat4) -> Self {
        let m = vp.to_cols_array_2d();
        let plane = |k: usize, sign: f64| {
            Self::normalize_plane(
                m[0][3] + sign * m[0][k],
                m[1][3] + sign * m[1][k],
                m[2][3] + sign * m[2][k],
                m[3][3] + sign * m[3][k],
            )
        };

        Self {
            planes: [
                plane(0, 1.0),
                plane(0, -1.0),
                plane(1, 1.0),
                plane(1, -1.0),
                // near: z >= 0
                Self::normalize_plane(m[0][2], m[1][2], m[2][2], m[3][2]),
                plane(2, -1.0),
            ],
        }
    }

    fn normalize_plane(a: f64, b: f64, c: f64, d: f64) -> (DVec3, f64) {
        let normal = DVec3::new(a, b, c);
        let length = normal.length();
        if length > 0.0 {
            (normal / length, d / length)
        } else {
            (DVec3::ZERO, 0.0)
        }
    }

    /// Whether any part of `aabb` may be inside the frustum.
    ///
    /// Conservative: boxes near a frustum corner can pass without intersecting.
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        self.planes.iter().all(|&(normal, distance)| {
            // corner furthest along the normal
            let positive = DVec3::select(normal.cmpge(DVec3::ZERO), aabb.max, aabb.min);
            normal.dot(positive) + distance >= 0.0
        })
    }

    pub fn contains_point(&self, point: DVec3) -> bool {
        self.planes
            .iter()
            .all(|&(normal, distance)| normal.dot(point) + distance >= 0.0)
    }
}
