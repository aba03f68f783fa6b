use crate::arena::{ARENA_SCHEME, ArenaError, ArenaInfo, ArenaSource, build_tree, parse_tree};
use crate::greyhound::{DEFAULT_HIERARCHY_STEP, GREYHOUND_SCHEME, GreyhoundInfo, GreyhoundSource, http_base_url};
use crate::hierarchy::{HierarchyEntry, HierarchyError, validate_name};
use crate::loader::LoadError;
use crate::loader::plan::HierarchyRequest;
use crate::metadata::{DEFAULT_SCALE, Manifest, ManifestError};
use crate::octree::aabb::{Aabb, create_child_aabb};
use crate::octree::geometry::{Backend, OctreeGeometry};
use crate::octree::node::GeometryNode;
use crate::octree::snapshot::NodeSnapshot;
use crate::octree::{FlatOctree, NodeId};
use crate::point::PointBatch;
use crate::resource::{ResourceClient, ResourceError};
use crate::version::Version;
use futures::future::AbortHandle;
use glam::DVec3;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OpenError {
    #[error("Error loading resource: {0}")]
    Resource(#[from] ResourceError),

    #[error("Invalid manifest: {0}")]
    Manifest(#[from] ManifestError),

    #[error("Invalid hierarchy: {0}")]
    Hierarchy(#[from] HierarchyError),

    #[error("Invalid arena tree: {0}")]
    Arena(#[from] ArenaError),
}

static NEXT_CLOUD_ID: AtomicU64 = AtomicU64::new(0);

/// Identifies a point cloud across the loader and the LOD selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PointCloudId(u64);

impl PointCloudId {
    fn next() -> Self {
        Self(NEXT_CLOUD_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A streamed point cloud: its immutable geometry plus the lazily grown tree
/// of nodes and their load state.
#[derive(Debug)]
pub struct PointCloudOctree {
    id: PointCloudId,
    geometry: Arc<OctreeGeometry>,
    octree: FlatOctree<GeometryNode>,
    names: HashMap<String, NodeId>,
    /// World position of the geometry frame origin.
    pub position: DVec3,
    /// Hidden clouds are skipped by the LOD traversal.
    pub visible: bool,
    resident_points: u64,
}

impl PointCloudOctree {
    /// Open a point cloud by URL.
    ///
    /// `greyhound://` and `arena4d://` URLs select those servers; anything else
    /// is the URL of a `cloud.js` manifest. Relative URLs work only if the
    /// provided client supports them.
    pub async fn open<C: ResourceClient>(url: &str, client: &C) -> Result<Self, OpenError> {
        let cloud = if url.starts_with(GREYHOUND_SCHEME) {
            Self::open_greyhound(url, client).await?
        } else if url.starts_with(ARENA_SCHEME) {
            Self::open_arena(url, client).await?
        } else {
            Self::open_manifest(url, client).await?
        };

        tracing::info!(
            url,
            cloud = ?cloud.id,
            nodes = cloud.octree.len(),
            version = %cloud.geometry.version,
            "point cloud opened"
        );
        Ok(cloud)
    }

    async fn open_manifest<C: ResourceClient>(url: &str, client: &C) -> Result<Self, OpenError> {
        let bytes = client.get(url, None).await?;
        let manifest = Manifest::from_slice(&bytes)?;
        let entries = manifest.hierarchy_entries()?;
        let geometry = manifest.into_geometry(url)?;

        let mut cloud = Self::from_geometry(geometry);
        if !entries.is_empty() {
            cloud.apply_hierarchy(&entries)?;
        }
        Ok(cloud)
    }

    async fn open_greyhound<C: ResourceClient>(url: &str, client: &C) -> Result<Self, OpenError> {
        let base_url = http_base_url(url);
        let info_url = format!("{}/info", base_url.trim_end_matches('/'));
        let info: GreyhoundInfo = client.get_json(&info_url, None).await?;

        let world_box = info.bounding_box();
        if world_box.is_empty() {
            return Err(ManifestError::InvalidBoundingBox.into());
        }
        let offset = world_box.min;
        let source = GreyhoundSource::new(&base_url, &info, offset);

        let geometry = OctreeGeometry {
            version: Version::new(1, 4),
            spacing: world_box.size().x / 2f64.powi(info.base_depth as i32),
            bounding_box: world_box.translated(-offset),
            tight_bounding_box: None,
            offset,
            scale: source.scale.x,
            hierarchy_step_size: DEFAULT_HIERARCHY_STEP,
            projection: info.srs.clone().filter(|srs| !srs.is_empty()),
            backend: Backend::Greyhound(source),
        };
        Ok(Self::from_geometry(geometry))
    }

    async fn open_arena<C: ResourceClient>(url: &str, client: &C) -> Result<Self, OpenError> {
        let source = ArenaSource::new(url);
        let info: ArenaInfo = client.get_json(&source.info_url(), None).await?;
        let tree = client.get(&source.tree_url(), None).await?;
        let entries = parse_tree(&tree)?;

        let world_box = info.bounding_box();
        if world_box.is_empty() {
            return Err(ManifestError::InvalidBoundingBox.into());
        }
        let offset = world_box.min;
        let bounding_box = world_box.translated(-offset);
        // the info resource predating `Spacing` leaves it to the client
        let spacing = info
            .spacing
            .unwrap_or_else(|| bounding_box.size().max_element() / 128.0);

        let geometry = OctreeGeometry {
            version: Version::new(1, 3),
            spacing,
            bounding_box,
            tight_bounding_box: None,
            offset,
            scale: DEFAULT_SCALE,
            hierarchy_step_size: 0,
            projection: None,
            backend: Backend::Arena(source),
        };

        let octree = build_tree(&entries, bounding_box, spacing)?;
        Ok(Self::with_octree(geometry, octree))
    }

    /// A cloud holding only the root node of `geometry`.
    ///
    /// The root's children are unknown until a hierarchy block is applied when
    /// the geometry pages its hierarchy.
    pub fn from_geometry(geometry: OctreeGeometry) -> Self {
        let mut root = GeometryNode::new("r", geometry.bounding_box, geometry.spacing);
        root.has_children = geometry.hierarchy_step_size > 0;
        Self::with_octree(geometry, FlatOctree::new(root))
    }

    fn with_octree(geometry: OctreeGeometry, octree: FlatOctree<GeometryNode>) -> Self {
        let names = octree
            .iter()
            .map(|(id, node)| (node.name.clone(), id))
            .collect();

        Self {
            id: PointCloudId::next(),
            position: geometry.offset,
            geometry: Arc::new(geometry),
            octree,
            names,
            visible: true,
            resident_points: 0,
        }
    }

    pub fn id(&self) -> PointCloudId {
        self.id
    }

    pub fn geometry(&self) -> &Arc<OctreeGeometry> {
        &self.geometry
    }

    pub fn octree(&self) -> &FlatOctree<GeometryNode> {
        &self.octree
    }

    pub fn root_id(&self) -> NodeId {
        self.octree.root_id()
    }

    pub fn node(&self, node_id: NodeId) -> Option<&GeometryNode> {
        self.octree.node(node_id)
    }

    pub fn node_id(&self, name: &str) -> Option<NodeId> {
        self.names.get(name).copied()
    }

    pub fn node_by_name(&self, name: &str) -> Option<&GeometryNode> {
        self.node_id(name).and_then(|id| self.octree.node(id))
    }

    /// Points currently held by loaded nodes.
    pub fn resident_points(&self) -> u64 {
        self.resident_points
    }

    /// Box of a node in world coordinates.
    pub fn world_bounding_box(&self, node_id: NodeId) -> Option<Aabb> {
        self.octree
            .node(node_id)
            .map(|node| node.bounding_box.translated(self.position))
    }

    /// Batch of a loaded node.
    pub fn point_batch(&self, node_id: NodeId) -> Option<&Arc<PointBatch>> {
        self.octree.node(node_id).and_then(GeometryNode::point_batch)
    }

    /// Link hierarchy entries into the tree, parents first.
    ///
    /// Known nodes get their point count and child flag refreshed; unknown nodes
    /// are created below their parent. Returns the number of nodes created.
    pub fn apply_hierarchy(&mut self, entries: &[HierarchyEntry]) -> Result<usize, HierarchyError> {
        let mut created = 0;

        for entry in entries {
            if let Some(&id) = self.names.get(&entry.name) {
                if let Some(node) = self.octree.node_mut(id) {
                    if !node.is_loaded() {
                        node.num_points = entry.num_points;
                    }
                    node.has_children =
                        entry.has_children() || node.children.iter().any(Option::is_some);
                }
                continue;
            }

            let Some(octant) = validate_name(&entry.name)? else {
                // a root name that is not this tree's root
                return Err(HierarchyError::InvalidName(entry.name.clone()));
            };
            let parent_name = &entry.name[..entry.name.len() - 1];
            let parent_id = *self
                .names
                .get(parent_name)
                .ok_or_else(|| HierarchyError::Orphan(entry.name.clone()))?;
            let parent = self
                .octree
                .node(parent_id)
                .ok_or_else(|| HierarchyError::Orphan(entry.name.clone()))?;

            let level = parent.level + 1;
            let bounding_box = create_child_aabb(&parent.bounding_box, usize::from(octant));
            let mut node = GeometryNode::new(
                entry.name.clone(),
                bounding_box,
                self.geometry.spacing_at(level),
            )
            .with_parent(parent_id);
            node.num_points = entry.num_points;
            node.has_children = entry.has_children();

            let id = self.octree.insert(node);
            if let Some(parent) = self.octree.node_mut(parent_id) {
                parent.children[usize::from(octant)] = Some(id);
                parent.has_children = true;
            }
            self.names.insert(entry.name.clone(), id);
            created += 1;
        }

        if created > 0 {
            tracing::debug!(
                cloud = ?self.id,
                root = ?entries.first().map(|e| e.name.as_str()),
                created,
                "hierarchy expanded"
            );
        }
        Ok(created)
    }

    pub(crate) fn begin_load(&mut self, node_id: NodeId, abort: AbortHandle) -> Option<u64> {
        self.octree
            .node_mut(node_id)
            .map(|node| node.begin_load(abort))
    }

    /// Install a decoded batch unless the request is stale.
    pub(crate) fn complete_load(&mut self, node_id: NodeId, generation: u64, batch: PointBatch) -> bool {
        let Some(node) = self.octree.node_mut(node_id) else {
            return false;
        };
        let num_points = batch.len() as u64;
        let applied = node.complete_load(generation, batch);
        if applied {
            self.resident_points += num_points;
        }
        applied
    }

    pub(crate) fn fail_load(&mut self, node_id: NodeId, generation: u64) -> bool {
        self.octree
            .node_mut(node_id)
            .is_some_and(|node| node.fail_load(generation))
    }

    /// Evict a node's points or cancel its load. Topology is kept.
    ///
    /// Returns the number of points released, `None` if nothing was disposed.
    pub fn dispose(&mut self, node_id: NodeId) -> Option<u32> {
        let released = self.octree.node_mut(node_id)?.dispose()?;
        self.resident_points = self.resident_points.saturating_sub(u64::from(released));
        Some(released)
    }

    pub(crate) fn mark_visible(&mut self, node_id: NodeId, frame: u64) {
        if let Some(node) = self.octree.node_mut(node_id) {
            node.last_visible_frame = frame;
        }
    }

    /// Owned copy of the currently known hierarchy.
    pub fn hierarchy_snapshot(&self) -> NodeSnapshot {
        self.snapshot_from_node(self.octree.root())
    }

    fn snapshot_from_node(&self, node: &GeometryNode) -> NodeSnapshot {
        NodeSnapshot {
            name: node.name.clone(),
            bounding_box: node.bounding_box,
            spacing: node.spacing,
            level: node.level,
            num_points: node.num_points,
            has_children: node.has_children,
            loaded: node.is_loaded(),
            children: node
                .children()
                .filter_map(|(_, id)| self.octree.node(id))
                .map(|child| self.snapshot_from_node(child))
                .collect(),
        }
    }

    /// Fetch hierarchy blocks until no node has unknown children.
    ///
    /// Returns the number of nodes created.
    pub async fn load_entire_hierarchy<C: ResourceClient>(
        &mut self,
        client: &C,
    ) -> Result<usize, LoadError> {
        let mut created = 0;

        loop {
            let pending: Vec<HierarchyRequest> = self
                .octree
                .iter()
                .filter(|(_, node)| node.children_unknown())
                .filter_map(|(id, _)| HierarchyRequest::for_node(self, id))
                .collect();
            if pending.is_empty() {
                break;
            }

            for request in pending {
                let entries = request.fetch(client).await?;
                created += self.apply_hierarchy(&entries)?;
            }
        }

        Ok(created)
    }
}
