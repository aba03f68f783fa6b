use crate::hierarchy::{HierarchyEntry, HierarchyError, flat_hierarchy_entries};
use crate::octree::aabb::Aabb;
use crate::octree::geometry::{Backend, OctreeGeometry, PointFormat};
use crate::octree::point_attributes::{PointAttributes, UnknownAttributeError};
use crate::version::{Version, VersionError};
use glam::DVec3;
use serde::Deserialize;
use thiserror::Error;

/// Scale assumed by manifests that predate the `scale` field.
pub const DEFAULT_SCALE: f64 = 0.01;

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Invalid json: {0}")]
    JsonError(#[from] serde_json::error::Error),

    #[error("Invalid version: {0}")]
    Version(#[from] VersionError),

    #[error("{0}")]
    UnknownAttribute(#[from] UnknownAttributeError),

    #[error("Unknown point format: {0}")]
    UnknownPointFormat(String),

    #[error("Missing field {0} required by version {1}")]
    MissingField(&'static str, Version),

    #[error("Bounding box is empty or inverted")]
    InvalidBoundingBox,

    #[error("Invalid hierarchy: {0}")]
    Hierarchy(#[from] HierarchyError),
}

/// Box as written in `cloud.js`: lower and upper corners.
#[derive(Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct ManifestBox {
    pub lx: f64,
    pub ly: f64,
    pub lz: f64,
    pub ux: f64,
    pub uy: f64,
    pub uz: f64,
}

impl From<ManifestBox> for Aabb {
    fn from(b: ManifestBox) -> Self {
        Aabb::new(DVec3::new(b.lx, b.ly, b.lz), DVec3::new(b.ux, b.uy, b.uz))
    }
}

/// Either `"LAS"`/`"LAZ"` or the ordered attribute names of a binary record.
#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum ManifestPointAttributes {
    Named(String),
    List(Vec<String>),
}

/// The `cloud.js` manifest of a point cloud converted for streaming.
#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub version: String,
    pub octree_dir: String,
    #[serde(default)]
    pub projection: Option<String>,
    #[serde(default)]
    pub points: Option<u64>,
    pub bounding_box: ManifestBox,
    #[serde(default)]
    pub tight_bounding_box: Option<ManifestBox>,
    pub point_attributes: ManifestPointAttributes,
    pub spacing: f64,
    #[serde(default)]
    pub scale: Option<f64>,
    #[serde(default)]
    pub hierarchy_step_size: Option<u32>,
    /// Whole hierarchy as `[name, numPoints]` pairs, written before version 1.5.
    #[serde(default)]
    pub hierarchy: Vec<(String, u32)>,
}

impl Manifest {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ManifestError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn version(&self) -> Result<Version, ManifestError> {
        Ok(self.version.parse()?)
    }

    pub fn point_format(&self) -> Result<PointFormat, ManifestError> {
        match &self.point_attributes {
            ManifestPointAttributes::Named(name) => match name.as_str() {
                "LAS" => Ok(PointFormat::Las),
                "LAZ" => Ok(PointFormat::Laz),
                other => Err(ManifestError::UnknownPointFormat(other.to_string())),
            },
            ManifestPointAttributes::List(names) => {
                Ok(PointFormat::Binary(PointAttributes::from_names(names)?))
            }
        }
    }

    /// Build the dataset geometry; `manifest_url` resolves a relative `octreeDir`.
    pub fn into_geometry(self, manifest_url: &str) -> Result<OctreeGeometry, ManifestError> {
        let version = self.version()?;
        let format = self.point_format()?;

        let world_box: Aabb = self.bounding_box.into();
        if world_box.is_empty() {
            return Err(ManifestError::InvalidBoundingBox);
        }
        let offset = world_box.min;

        let hierarchy_step_size = match self.hierarchy_step_size {
            Some(step) => step,
            None if version.equal_or_higher((1, 5)) => {
                return Err(ManifestError::MissingField("hierarchyStepSize", version));
            }
            None => 0,
        };

        Ok(OctreeGeometry {
            version,
            spacing: self.spacing,
            bounding_box: world_box.translated(-offset),
            tight_bounding_box: self
                .tight_bounding_box
                .map(|b| Aabb::from(b).translated(-offset)),
            offset,
            scale: self.scale.unwrap_or(DEFAULT_SCALE),
            hierarchy_step_size,
            projection: self.projection.filter(|p| !p.is_empty()),
            backend: Backend::Octree {
                octree_dir: resolve_url(manifest_url, &self.octree_dir),
                format,
            },
        })
    }

    /// Entries of the flat hierarchy, empty when the manifest has none.
    pub fn hierarchy_entries(&self) -> Result<Vec<HierarchyEntry>, ManifestError> {
        Ok(flat_hierarchy_entries(&self.hierarchy)?)
    }
}

/// Resolve `path` against the directory containing `base`.
///
/// Absolute URLs and paths are returned as they are.
pub fn resolve_url(base: &str, path: &str) -> String {
    if path.contains("://") || path.starts_with('/') {
        return path.trim_end_matches('/').to_string();
    }

    let dir = match base.rfind('/') {
        Some(i) => &base[..i],
        None => "",
    };
    let path = path.trim_start_matches("./").trim_end_matches('/');
    if dir.is_empty() {
        path.to_string()
    } else {
        format!("{dir}/{path}")
    }
}
