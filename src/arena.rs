//! Arena KD-tree back-end. The whole tree is served at once as a depth-first list
//! of binary records; each node splits its box in two halves along one axis.

use crate::hierarchy::HierarchyRecord;
use crate::octree::FlatOctree;
use crate::octree::aabb::{Aabb, SplitAxis, create_kd_child_aabb};
use crate::octree::node::GeometryNode;
use binrw::BinReaderExt;
use glam::DVec3;
use serde::Deserialize;
use std::io::Cursor;
use thiserror::Error;

/// URL scheme marking an Arena resource, replaced by `http://` for requests.
pub const ARENA_SCHEME: &str = "arena4d://";

const LEFT: u8 = 0b0000_0001;
const RIGHT: u8 = 0b0000_0010;
const SPLIT_X: u8 = 0b0000_0100;
const SPLIT_Y: u8 = 0b0000_1000;
const SPLIT_Z: u8 = 0b0001_0000;

#[derive(Error, Debug)]
pub enum ArenaError {
    #[error("Tree is empty")]
    Empty,

    #[error("Tree data truncated: {len} bytes")]
    Truncated { len: usize },

    #[error("Node {0} has children but no split axis")]
    MissingSplit(String),

    #[error("Tree records end before the tree is complete")]
    Incomplete,

    #[error("Trailing records after the tree is complete")]
    TrailingRecords,

    #[error("Invalid binary data")]
    InvalidBinaryData(#[from] binrw::Error),
}

/// Response of the `?info` resource.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct ArenaInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub points: u64,
    #[serde(default)]
    pub nodes: u64,
    /// `[minX, minY, minZ, maxX, maxY, maxZ]`.
    pub bounding_box: [f64; 6],
    #[serde(default)]
    pub spacing: Option<f64>,
}

impl ArenaInfo {
    pub fn bounding_box(&self) -> Aabb {
        let b = self.bounding_box;
        Aabb::new(DVec3::new(b[0], b[1], b[2]), DVec3::new(b[3], b[4], b[5]))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArenaSource {
    /// Resource URL the `?info`, `?tree` and `?node=` queries are appended to.
    pub url: String,
}

impl ArenaSource {
    pub fn new(url: &str) -> Self {
        let url = match url.strip_prefix(ARENA_SCHEME) {
            Some(rest) => format!("http://{rest}"),
            None => url.to_string(),
        };
        Self { url }
    }

    pub fn info_url(&self) -> String {
        format!("{}?info", self.url)
    }

    pub fn tree_url(&self) -> String {
        format!("{}?tree", self.url)
    }

    pub fn node_url(&self, name: &str) -> String {
        format!("{}?node={name}", self.url)
    }
}

/// A node of the depth-first tree listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArenaEntry {
    pub name: String,
    pub num_points: u32,
    pub has_left: bool,
    pub has_right: bool,
    pub split_axis: Option<SplitAxis>,
}

fn split_axis(mask: u8) -> Option<SplitAxis> {
    if mask & SPLIT_X != 0 {
        Some(SplitAxis::X)
    } else if mask & SPLIT_Y != 0 {
        Some(SplitAxis::Y)
    } else if mask & SPLIT_Z != 0 {
        Some(SplitAxis::Z)
    } else {
        None
    }
}

/// Decode the `?tree` listing. Children are named by appending `0` (left) or
/// `1` (right) to the parent's name.
pub fn parse_tree(buf: &[u8]) -> Result<Vec<ArenaEntry>, ArenaError> {
    if buf.is_empty() {
        return Err(ArenaError::Empty);
    }
    if buf.len() % crate::hierarchy::HIERARCHY_RECORD_SIZE != 0 {
        return Err(ArenaError::Truncated { len: buf.len() });
    }

    let num_records = buf.len() / crate::hierarchy::HIERARCHY_RECORD_SIZE;
    let mut cursor = Cursor::new(buf);
    let mut entries: Vec<ArenaEntry> = Vec::with_capacity(num_records);
    // (entry index, next child side to fill: 0 = left, 1 = right, 2 = done)
    let mut stack: Vec<(usize, u8)> = Vec::new();

    for i in 0..num_records {
        let record: HierarchyRecord = cursor.read_le()?;

        let name = match stack.last_mut() {
            None if i == 0 => "r".to_string(),
            None => return Err(ArenaError::TrailingRecords),
            Some((parent, side)) => {
                let parent_entry = &entries[*parent];
                let digit = if *side == 0 && parent_entry.has_left {
                    0
                } else {
                    1
                };
                *side = digit + 1;
                format!("{}{digit}", parent_entry.name)
            }
        };

        let has_left = record.child_mask & LEFT != 0;
        let has_right = record.child_mask & RIGHT != 0;
        let axis = split_axis(record.child_mask);
        if (has_left || has_right) && axis.is_none() {
            return Err(ArenaError::MissingSplit(name));
        }

        entries.push(ArenaEntry {
            name,
            num_points: record.num_points,
            has_left,
            has_right,
            split_axis: axis,
        });
        stack.push((entries.len() - 1, 0));

        // unwind to the closest ancestor still waiting for a child
        while let Some(&(index, side)) = stack.last() {
            let entry = &entries[index];
            let waiting = (side == 0 && (entry.has_left || entry.has_right))
                || (side == 1 && entry.has_left && entry.has_right);
            if waiting {
                break;
            }
            stack.pop();
        }
    }

    if !stack.is_empty() {
        return Err(ArenaError::Incomplete);
    }

    Ok(entries)
}

/// Link parsed entries into a tree whose root spans `bounding_box`.
pub fn build_tree(
    entries: &[ArenaEntry],
    bounding_box: Aabb,
    spacing: f64,
) -> Result<FlatOctree<GeometryNode>, ArenaError> {
    let root_entry = entries.first().ok_or(ArenaError::Empty)?;

    let mut root = GeometryNode::new(root_entry.name.clone(), bounding_box, spacing);
    root.num_points = root_entry.num_points;
    root.has_children = root_entry.has_left || root_entry.has_right;
    root.split_axis = root_entry.split_axis;

    let mut tree = FlatOctree::new(root);
    tree.reserve(entries.len());
    let mut ids = std::collections::HashMap::with_capacity(entries.len());
    ids.insert(root_entry.name.as_str(), tree.root_id());

    for entry in &entries[1..] {
        let parent_name = &entry.name[..entry.name.len() - 1];
        // parse_tree emits parents first
        let Some(&parent_id) = ids.get(parent_name) else {
            return Err(ArenaError::Incomplete);
        };
        let Some(parent) = tree.node(parent_id) else {
            return Err(ArenaError::Incomplete);
        };
        let axis = parent
            .split_axis
            .ok_or_else(|| ArenaError::MissingSplit(parent.name.clone()))?;
        let upper = entry.name.ends_with('1');
        let child_box = create_kd_child_aabb(&parent.bounding_box, axis, upper);

        let mut node = GeometryNode::new(entry.name.clone(), child_box, parent.spacing / 2.0)
            .with_parent(parent_id);
        node.num_points = entry.num_points;
        node.has_children = entry.has_left || entry.has_right;
        node.split_axis = entry.split_axis;

        let id = tree.insert(node);
        if let Some(parent) = tree.node_mut(parent_id) {
            parent.children[usize::from(upper)] = Some(id);
        }
        ids.insert(entry.name.as_str(), id);
    }

    Ok(tree)
}
