use crate::octree::NodeId;
use crate::octree::aabb::{Aabb, BoundingSphere, SplitAxis};
use crate::point::PointBatch;
use futures::future::AbortHandle;
use std::fmt;
use std::sync::Arc;

/// One-shot hook run when a node's points are released, e.g. to free GPU buffers.
pub type DisposeCallback = Box<dyn FnOnce(&str) + Send + Sync>;

#[derive(Debug, Default)]
pub enum NodeState {
    #[default]
    Unloaded,
    Loading {
        generation: u64,
        abort: AbortHandle,
    },
    Loaded(Arc<PointBatch>),
}

/// A cell of a point cloud tree.
///
/// The node itself outlives its points: eviction returns it to
/// [`NodeState::Unloaded`] and keeps name, box and children untouched.
pub struct GeometryNode {
    pub name: String,
    pub level: u32,
    pub bounding_box: Aabb,
    pub bounding_sphere: BoundingSphere,
    pub spacing: f64,
    pub num_points: u32,
    pub has_children: bool,
    pub parent: Option<NodeId>,
    pub children: [Option<NodeId>; 8],
    /// Split of a kd node; `None` for octree nodes.
    pub split_axis: Option<SplitAxis>,
    pub(crate) state: NodeState,
    pub(crate) generation: u64,
    pub(crate) last_visible_frame: u64,
    dispose_callbacks: Vec<DisposeCallback>,
}

impl GeometryNode {
    pub fn new(name: impl Into<String>, bounding_box: Aabb, spacing: f64) -> Self {
        let name = name.into();
        // the leading 'r' is the root
        let level = name.len().saturating_sub(1) as u32;
        Self {
            name,
            level,
            bounding_sphere: bounding_box.bounding_sphere(),
            bounding_box,
            spacing,
            num_points: 0,
            has_children: false,
            parent: None,
            children: [None; 8],
            split_axis: None,
            state: NodeState::Unloaded,
            generation: 0,
            last_visible_frame: 0,
            dispose_callbacks: Vec::new(),
        }
    }

    pub fn with_parent(mut self, parent: NodeId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn state(&self) -> &NodeState {
        &self.state
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.state, NodeState::Loaded(_))
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.state, NodeState::Loading { .. })
    }

    pub fn point_batch(&self) -> Option<&Arc<PointBatch>> {
        match &self.state {
            NodeState::Loaded(batch) => Some(batch),
            _ => None,
        }
    }

    /// Request generation of the node, bumped on every load start and cancellation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Name of the parent node, derived from the path encoding.
    pub fn parent_name(&self) -> Option<&str> {
        if self.name.len() > 1 {
            Some(&self.name[..self.name.len() - 1])
        } else {
            None
        }
    }

    /// Child index this node occupies in its parent, from the last name character.
    pub fn octant(&self) -> Option<usize> {
        if self.name.len() < 2 {
            return None;
        }
        self.name
            .chars()
            .last()
            .and_then(|c| c.to_digit(10))
            .map(|d| d as usize)
    }

    pub fn children(&self) -> impl Iterator<Item = (usize, NodeId)> + '_ {
        self.children
            .iter()
            .enumerate()
            .filter_map(|(octant, child)| child.map(|id| (octant, id)))
    }

    pub fn children_mask(&self) -> u8 {
        self.children
            .iter()
            .enumerate()
            .filter(|(_, child)| child.is_some())
            .fold(0u8, |mask, (octant, _)| mask | (1 << octant))
    }

    /// Whether child nodes exist on the server but have not been materialized yet.
    pub fn children_unknown(&self) -> bool {
        self.has_children && self.children.iter().all(Option::is_none)
    }

    pub fn add_dispose_callback(&mut self, callback: DisposeCallback) {
        self.dispose_callbacks.push(callback);
    }

    pub(crate) fn begin_load(&mut self, abort: AbortHandle) -> u64 {
        self.generation += 1;
        self.state = NodeState::Loading {
            generation: self.generation,
            abort,
        };
        self.generation
    }

    /// Install a decoded batch if `generation` still matches the in-flight request.
    pub(crate) fn complete_load(&mut self, generation: u64, batch: PointBatch) -> bool {
        match &self.state {
            NodeState::Loading { generation: current, .. } if *current == generation => {
                self.num_points = batch.len() as u32;
                self.state = NodeState::Loaded(Arc::new(batch));
                true
            }
            _ => false,
        }
    }

    pub(crate) fn fail_load(&mut self, generation: u64) -> bool {
        match &self.state {
            NodeState::Loading { generation: current, .. } if *current == generation => {
                self.state = NodeState::Unloaded;
                true
            }
            _ => false,
        }
    }

    /// Release points or cancel an in-flight load. Roots are pinned.
    ///
    /// Returns the number of points released.
    pub fn dispose(&mut self) -> Option<u32> {
        if self.is_root() {
            return None;
        }

        match std::mem::take(&mut self.state) {
            NodeState::Unloaded => None,
            NodeState::Loading { abort, .. } => {
                abort.abort();
                // invalidates any completion already in flight
                self.generation += 1;
                Some(0)
            }
            NodeState::Loaded(batch) => {
                for callback in self.dispose_callbacks.drain(..) {
                    callback(&self.name);
                }
                Some(batch.len() as u32)
            }
        }
    }
}

impl fmt::Debug for GeometryNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeometryNode")
            .field("name", &self.name)
            .field("level", &self.level)
            .field("bounding_box", &self.bounding_box)
            .field("spacing", &self.spacing)
            .field("num_points", &self.num_points)
            .field("has_children", &self.has_children)
            .field("children_mask", &self.children_mask())
            .field("state", &self.state)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}
