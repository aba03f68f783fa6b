use crate::arena::ArenaSource;
use crate::greyhound::GreyhoundSource;
use crate::hierarchy::{hierarchy_url, node_base_url};
use crate::octree::aabb::Aabb;
use crate::octree::point_attributes::PointAttributes;
use crate::version::Version;
use glam::DVec3;

/// Encoding of the per-node point payloads of an octree dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PointFormat {
    Binary(PointAttributes),
    Las,
    Laz,
}

impl PointFormat {
    pub fn extension(&self, version: Version) -> &'static str {
        match self {
            PointFormat::Binary(_) if version.equal_or_higher((1, 4)) => ".bin",
            PointFormat::Binary(_) => "",
            PointFormat::Las => ".las",
            PointFormat::Laz => ".laz",
        }
    }
}

/// Where and how node payloads are fetched.
#[derive(Debug, Clone, PartialEq)]
pub enum Backend {
    /// Static files laid out by the octree converter.
    Octree {
        octree_dir: String,
        format: PointFormat,
    },
    Greyhound(GreyhoundSource),
    Arena(ArenaSource),
}

/// Immutable description of a point cloud dataset.
///
/// Node boxes are relative to `offset`, so the root box starts at the origin.
#[derive(Debug, Clone, PartialEq)]
pub struct OctreeGeometry {
    pub version: Version,
    /// Point spacing of the root node.
    pub spacing: f64,
    pub bounding_box: Aabb,
    pub tight_bounding_box: Option<Aabb>,
    pub offset: DVec3,
    /// Quantization unit of integer coordinates.
    pub scale: f64,
    /// Levels revealed by one hierarchy block; 0 when the whole hierarchy is
    /// known up front.
    pub hierarchy_step_size: u32,
    pub projection: Option<String>,
    pub backend: Backend,
}

impl OctreeGeometry {
    pub fn point_attributes(&self) -> Option<&PointAttributes> {
        match &self.backend {
            Backend::Octree {
                format: PointFormat::Binary(attributes),
                ..
            } => Some(attributes),
            _ => None,
        }
    }

    /// Full URL of the point payload of an octree node.
    pub fn node_url(&self, name: &str) -> Option<String> {
        match &self.backend {
            Backend::Octree { octree_dir, format } => Some(format!(
                "{}{}",
                node_base_url(octree_dir, self.version, self.hierarchy_step_size, name),
                format.extension(self.version)
            )),
            _ => None,
        }
    }

    /// URL of the hierarchy block rooted at an octree node.
    pub fn hierarchy_url(&self, name: &str) -> Option<String> {
        match &self.backend {
            Backend::Octree { octree_dir, .. } => {
                Some(hierarchy_url(octree_dir, self.hierarchy_step_size, name))
            }
            _ => None,
        }
    }

    /// Nominal spacing of nodes at `level`.
    pub fn spacing_at(&self, level: u32) -> f64 {
        self.spacing / 2f64.powi(level as i32)
    }
}
