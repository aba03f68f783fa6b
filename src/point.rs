use crate::octree::aabb::Aabb;
use glam::{DVec3, Vec3};

/// Decoded points of one node, one array per attribute.
///
/// Positions are relative to `origin`; `tight_bounding_box` and `mean` are in the
/// same frame as `positions`.
#[derive(Clone, Debug, Default)]
pub struct PointBatch {
    pub origin: DVec3,
    pub positions: Vec<Vec3>,
    pub colors: Option<Vec<[u8; 4]>>,
    pub intensities: Option<Vec<u16>>,
    pub classifications: Option<Vec<u8>>,
    pub return_numbers: Option<Vec<u8>>,
    pub number_of_returns: Option<Vec<u8>>,
    pub source_ids: Option<Vec<u16>>,
    pub normals: Option<Vec<Vec3>>,
    pub spacings: Option<Vec<f32>>,
    pub gps_times: Option<Vec<f64>>,
    /// Sequential `0..len` index per point, used for picking.
    pub indices: Vec<u32>,
    pub tight_bounding_box: Aabb,
    pub mean: DVec3,
}

impl PointBatch {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Approximate heap footprint in bytes.
    pub fn byte_size(&self) -> usize {
        fn opt<T>(v: &Option<Vec<T>>) -> usize {
            v.as_ref().map_or(0, |v| v.len() * size_of::<T>())
        }

        self.positions.len() * size_of::<Vec3>()
            + self.indices.len() * size_of::<u32>()
            + opt(&self.colors)
            + opt(&self.intensities)
            + opt(&self.classifications)
            + opt(&self.return_numbers)
            + opt(&self.number_of_returns)
            + opt(&self.source_ids)
            + opt(&self.normals)
            + opt(&self.spacings)
            + opt(&self.gps_times)
    }

    /// Tight bounding box in the frame `origin` is expressed in.
    pub fn absolute_tight_bounding_box(&self) -> Aabb {
        self.tight_bounding_box.translated(self.origin)
    }
}

/// Accumulates the tight box and running mean while a decoder walks the points.
#[derive(Debug, Clone)]
pub(crate) struct BatchStats {
    bounding_box: Aabb,
    mean: DVec3,
    inverse_count: f64,
}

impl BatchStats {
    pub(crate) fn new(num_points: usize) -> Self {
        Self {
            bounding_box: Aabb::EMPTY,
            mean: DVec3::ZERO,
            inverse_count: if num_points == 0 {
                0.0
            } else {
                1.0 / num_points as f64
            },
        }
    }

    pub(crate) fn add(&mut self, position: DVec3) {
        self.bounding_box.expand_by_point(position);
        self.mean += position * self.inverse_count;
    }

    pub(crate) fn finish(self) -> (Aabb, DVec3) {
        (self.bounding_box, self.mean)
    }
}

pub(crate) fn sequential_indices(num_points: usize) -> Vec<u32> {
    (0..num_points as u32).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_accumulate_box_and_mean() {
        let mut stats = BatchStats::new(4);
        for p in [
            DVec3::new(0.0, 0.0, 0.0),
            DVec3::new(2.0, 0.0, 0.0),
            DVec3::new(0.0, 4.0, 0.0),
            DVec3::new(2.0, 4.0, 8.0),
        ] {
            stats.add(p);
        }
        let (aabb, mean) = stats.finish();
        assert_eq!(aabb, Aabb::new(DVec3::ZERO, DVec3::new(2.0, 4.0, 8.0)));
        assert_eq!(mean, DVec3::new(1.0, 2.0, 2.0));
    }

    #[test]
    fn empty_stats() {
        let (aabb, mean) = BatchStats::new(0).finish();
        assert!(aabb.is_empty());
        assert_eq!(mean, DVec3::ZERO);
    }

    #[test]
    fn byte_size_counts_present_arrays() {
        let batch = PointBatch {
            positions: vec![Vec3::ZERO; 2],
            indices: sequential_indices(2),
            intensities: Some(vec![0; 2]),
            ..Default::default()
        };
        assert_eq!(batch.byte_size(), 2 * 12 + 2 * 4 + 2 * 2);
        assert_eq!(batch.indices, vec![0, 1]);
    }
}
