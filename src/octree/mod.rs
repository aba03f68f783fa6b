pub mod aabb;
pub mod geometry;
pub mod node;
pub mod point_attributes;
pub mod snapshot;

use slab::Slab;

/// Index of a node inside a [`FlatOctree`].
#[derive(Clone, Debug, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Arena of tree nodes; links between nodes are [`NodeId`]s.
///
/// Nodes are only ever added. Eviction drops a node's payload, never the node.
#[derive(Clone, Debug)]
pub struct FlatOctree<T> {
    storage: Slab<T>,
    root_id: NodeId,
}

impl<T> FlatOctree<T> {
    pub fn new(root: T) -> Self {
        let mut storage = Slab::new();
        let root_id = NodeId(storage.insert(root));

        Self { storage, root_id }
    }

    pub fn root(&self) -> &T {
        // the root is inserted on construction and never removed
        &self.storage[self.root_id.0]
    }

    pub fn root_mut(&mut self) -> &mut T {
        &mut self.storage[self.root_id.0]
    }

    pub fn root_id(&self) -> NodeId {
        self.root_id
    }

    pub fn node(&self, node_id: NodeId) -> Option<&T> {
        self.storage.get(node_id.0)
    }

    pub fn node_mut(&mut self, node_id: NodeId) -> Option<&mut T> {
        self.storage.get_mut(node_id.0)
    }

    pub fn reserve(&mut self, additional: usize) {
        self.storage.reserve(additional);
    }

    pub fn insert(&mut self, node: T) -> NodeId {
        NodeId(self.storage.insert(node))
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &T)> {
        self.storage.iter().map(|(id, node)| (NodeId(id), node))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (NodeId, &mut T)> {
        self.storage.iter_mut().map(|(id, node)| (NodeId(id), node))
    }
}
