//! Compact description of the visible part of a tree for shaders that walk it
//! by index arithmetic.
//!
//! Nodes are ordered by name length, then lexicographically, so every parent
//! precedes its children and siblings are adjacent in octant order. Each node
//! takes four bytes: child mask, offset to its first child (big-endian `u16`)
//! and level.

use crate::octree::NodeId;
use crate::point_cloud::PointCloudOctree;
use std::collections::HashMap;
use thiserror::Error;

pub const BYTES_PER_NODE: usize = 4;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TableError {
    #[error("Node does not exist")]
    NodeNotFound,

    #[error("Parent of {0} is not in the visible set")]
    MissingParent(String),

    #[error("Children of {0} are too far away in the table")]
    OffsetOverflow(String),

    #[error("Level of {0} does not fit in a byte")]
    LevelOverflow(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisibleNodeTable {
    nodes: Vec<NodeId>,
    names: Vec<String>,
    data: Vec<u8>,
}

impl VisibleNodeTable {
    /// Build the table of `nodes`, a set closed under parents.
    pub fn build(cloud: &PointCloudOctree, nodes: &[NodeId]) -> Result<Self, TableError> {
        let mut ordered = nodes
            .iter()
            .map(|&id| {
                cloud
                    .node(id)
                    .map(|node| (id, node.name.as_str()))
                    .ok_or(TableError::NodeNotFound)
            })
            .collect::<Result<Vec<_>, _>>()?;
        ordered.sort_by(|(_, a), (_, b)| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
        ordered.dedup_by(|(a, _), (b, _)| a == b);

        let mut data = vec![0u8; ordered.len() * BYTES_PER_NODE];
        let mut index_of: HashMap<&str, usize> = HashMap::with_capacity(ordered.len());

        for (i, &(_, name)) in ordered.iter().enumerate() {
            let level = u8::try_from(name.len() - 1)
                .map_err(|_| TableError::LevelOverflow(name.to_string()))?;
            data[i * BYTES_PER_NODE + 3] = level;

            if i > 0 {
                let parent_name = &name[..name.len() - 1];
                let parent = *index_of
                    .get(parent_name)
                    .ok_or_else(|| TableError::MissingParent(name.to_string()))?;
                let octant = name.as_bytes()[name.len() - 1].wrapping_sub(b'0');
                let record = &mut data[parent * BYTES_PER_NODE..(parent + 1) * BYTES_PER_NODE];

                let first_child = record[0] == 0;
                record[0] |= 1 << (octant & 7);
                if first_child {
                    let offset = u16::try_from(i - parent)
                        .map_err(|_| TableError::OffsetOverflow(parent_name.to_string()))?;
                    record[1..3].copy_from_slice(&offset.to_be_bytes());
                }
            }

            index_of.insert(name, i);
        }

        Ok(Self {
            nodes: ordered.iter().map(|&(id, _)| id).collect(),
            names: ordered.iter().map(|&(_, name)| name.to_string()).collect(),
            data,
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in table order.
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Raw bytes, [`BYTES_PER_NODE`] per node.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn record(&self, index: usize) -> Option<[u8; BYTES_PER_NODE]> {
        self.data
            .get(index * BYTES_PER_NODE..(index + 1) * BYTES_PER_NODE)
            .and_then(|r| r.try_into().ok())
    }

    /// Offset from a node to its first child, zero for leaves.
    pub fn child_offset(&self, index: usize) -> Option<u16> {
        self.record(index).map(|r| u16::from_be_bytes([r[1], r[2]]))
    }
}
