//! Greyhound server back-end: JSON `info` and `hierarchy` resources and binary
//! `read` queries addressed by bounds and depth range.

use crate::decode::greyhound::{Dimension, default_schema};
use crate::hierarchy::HierarchyEntry;
use crate::octree::aabb::Aabb;
use glam::DVec3;
use serde::Deserialize;
use std::collections::VecDeque;

/// URL scheme marking a Greyhound resource, replaced by `http://` for requests.
pub const GREYHOUND_SCHEME: &str = "greyhound://";

/// Greyhound direction keys in the order of the octant they map to via
/// [`GREYHOUND_TO_POTREE`].
pub const DIRECTION_KEYS: [&str; 8] = ["swd", "nwd", "swu", "nwu", "sed", "ned", "seu", "neu"];

/// Octant index of each entry of [`DIRECTION_KEYS`].
pub const GREYHOUND_TO_POTREE: [usize; 8] = [0, 2, 1, 3, 4, 6, 5, 7];

/// Levels revealed by a single `hierarchy` query.
pub const DEFAULT_HIERARCHY_STEP: u32 = 6;

#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(untagged)]
pub enum GreyhoundScale {
    Uniform(f64),
    PerAxis([f64; 3]),
}

impl GreyhoundScale {
    pub fn to_dvec3(self) -> DVec3 {
        match self {
            GreyhoundScale::Uniform(s) => DVec3::splat(s),
            GreyhoundScale::PerAxis(s) => DVec3::from_array(s),
        }
    }
}

/// Response of the `info` resource.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GreyhoundInfo {
    /// `[minX, minY, minZ, maxX, maxY, maxZ]`, a cube.
    pub bounds: [f64; 6],
    pub base_depth: u32,
    #[serde(default)]
    pub num_points: u64,
    #[serde(default)]
    pub schema: Vec<Dimension>,
    #[serde(default)]
    pub scale: Option<GreyhoundScale>,
    #[serde(default)]
    pub offset: Option<[f64; 3]>,
    #[serde(default)]
    pub srs: Option<String>,
}

impl GreyhoundInfo {
    pub fn bounding_box(&self) -> Aabb {
        let b = self.bounds;
        Aabb::new(DVec3::new(b[0], b[1], b[2]), DVec3::new(b[3], b[4], b[5]))
    }

    /// Dimensions to request: the default schema restricted to what the server has.
    pub fn request_schema(&self) -> Vec<Dimension> {
        let wanted = default_schema();
        if self.schema.is_empty() {
            return wanted;
        }
        wanted
            .into_iter()
            .filter(|d| self.schema.iter().any(|s| s.name == d.name))
            .collect()
    }
}

/// Everything needed to address a Greyhound resource once opened.
#[derive(Debug, Clone, PartialEq)]
pub struct GreyhoundSource {
    /// `http(s)://host/resource/<name>/`, always ending in a slash.
    pub base_url: String,
    pub base_depth: u32,
    pub schema: Vec<Dimension>,
    pub scale: DVec3,
    /// Server side origin of the requested integer coordinates.
    pub offset: DVec3,
    pub compress: bool,
}

impl GreyhoundSource {
    pub fn new(base_url: &str, info: &GreyhoundInfo, offset: DVec3) -> Self {
        let mut base_url = base_url.to_string();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self {
            base_url,
            base_depth: info.base_depth,
            schema: info.request_schema(),
            scale: info.scale.map_or(DVec3::splat(0.01), GreyhoundScale::to_dvec3),
            offset,
            compress: false,
        }
    }

    /// Depth range served for a node. The root also carries every level above
    /// the base depth.
    pub fn depth_range(&self, level: u32) -> (u32, u32) {
        let end = self.base_depth + level + 1;
        if level == 0 { (0, end) } else { (end - 1, end) }
    }

    /// `read` query for the points of a node whose world bounds are `bounds`.
    pub fn read_url(&self, bounds: &Aabb, level: u32) -> String {
        let (depth_begin, depth_end) = self.depth_range(level);
        let schema = serde_json::to_string(&self.schema).unwrap_or_else(|_| "[]".to_string());
        format!(
            "{}read?depthBegin={depth_begin}&depthEnd={depth_end}&bounds={}&schema={schema}&scale={}&offset={}&compress={}",
            self.base_url,
            format_bounds(bounds),
            format_triplet(self.scale),
            format_triplet(self.offset),
            self.compress,
        )
    }

    /// `hierarchy` query covering `step` levels below the node at `level`.
    pub fn hierarchy_url(&self, bounds: &Aabb, level: u32, step: u32) -> String {
        let depth_begin = self.base_depth + level;
        format!(
            "{}hierarchy?bounds={}&depthBegin={depth_begin}&depthEnd={}",
            self.base_url,
            format_bounds(bounds),
            depth_begin + step,
        )
    }
}

fn format_bounds(bounds: &Aabb) -> String {
    format!(
        "[{},{},{},{},{},{}]",
        bounds.min.x, bounds.min.y, bounds.min.z, bounds.max.x, bounds.max.y, bounds.max.z
    )
}

fn format_triplet(v: DVec3) -> String {
    format!("[{},{},{}]", v.x, v.y, v.z)
}

/// Rewrite a `greyhound://` URL to the HTTP base it is served from.
pub fn http_base_url(url: &str) -> String {
    match url.strip_prefix(GREYHOUND_SCHEME) {
        Some(rest) => format!("http://{rest}"),
        None => url.to_string(),
    }
}

/// Nested response of the `hierarchy` resource: a point count and one optional
/// subtree per direction key.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct GreyhoundHierarchy {
    #[serde(default)]
    pub n: u32,
    pub swd: Option<Box<GreyhoundHierarchy>>,
    pub nwd: Option<Box<GreyhoundHierarchy>>,
    pub swu: Option<Box<GreyhoundHierarchy>>,
    pub nwu: Option<Box<GreyhoundHierarchy>>,
    pub sed: Option<Box<GreyhoundHierarchy>>,
    pub ned: Option<Box<GreyhoundHierarchy>>,
    pub seu: Option<Box<GreyhoundHierarchy>>,
    pub neu: Option<Box<GreyhoundHierarchy>>,
}

impl GreyhoundHierarchy {
    /// Children indexed by octant.
    pub fn children(&self) -> [Option<&GreyhoundHierarchy>; 8] {
        let by_key = [
            &self.swd, &self.nwd, &self.swu, &self.nwu, &self.sed, &self.ned, &self.seu, &self.neu,
        ];
        let mut children = [None; 8];
        for (key_index, child) in by_key.into_iter().enumerate() {
            children[GREYHOUND_TO_POTREE[key_index]] = child.as_deref();
        }
        children
    }

    fn child_mask(&self) -> u8 {
        self.children()
            .iter()
            .enumerate()
            .filter(|(_, child)| child.is_some())
            .fold(0, |mask, (octant, _)| mask | (1 << octant))
    }

    /// Flatten into entries rooted at `root_name`, parents first.
    ///
    /// Nodes `step` levels below the root are the edge of this response; they are
    /// flagged as having children so the next query is issued when they load.
    pub fn entries(&self, root_name: &str, step: u32) -> Vec<HierarchyEntry> {
        let mut entries = Vec::new();
        let mut queue = VecDeque::from([(root_name.to_string(), self, 0u32)]);

        while let Some((name, node, depth)) = queue.pop_front() {
            let child_mask = if depth >= step && node.n > 0 {
                u8::MAX
            } else {
                node.child_mask()
            };
            entries.push(HierarchyEntry {
                name: name.clone(),
                child_mask,
                num_points: node.n,
            });

            if depth >= step {
                continue;
            }
            for (octant, child) in node.children().into_iter().enumerate() {
                if let Some(child) = child {
                    queue.push_back((format!("{name}{octant}"), child, depth + 1));
                }
            }
        }

        entries
    }
}
