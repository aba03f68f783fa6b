//! Per-frame selection of the nodes to show, load and evict.
//!
//! The traversal walks every visible point cloud at once, always expanding the
//! node with the highest projected size next, until the point budget is spent.
//! Nodes reached but not loaded are requested; their children are not
//! considered until they arrive.

pub mod frustum;
pub mod table;

use crate::config::StreamingConfig;
use crate::loader::{LoadOutcome, NodeLoader};
use crate::octree::NodeId;
use crate::octree::aabb::BoundingSphere;
use crate::point_cloud::{PointCloudId, PointCloudOctree};
use crate::resource::ResourceClient;
use frustum::Frustum;
use glam::{DMat4, DVec3};
use ordered_float::OrderedFloat;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use table::{TableError, VisibleNodeTable};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    /// Vertical field of view in radians.
    Perspective { fov_y: f64 },
    /// Height of the view volume in world units.
    Orthographic { height: f64 },
}

/// Camera state of one frame.
#[derive(Debug, Clone, Copy)]
pub struct ViewParams {
    pub view_projection: DMat4,
    pub camera_position: DVec3,
    pub projection: Projection,
    /// Viewport height in pixels.
    pub screen_height: f64,
}

impl ViewParams {
    /// Priority of a node: its projected radius in pixels for perspective views.
    ///
    /// Returns the weight and the pixel radius, the latter compared against the
    /// minimum node size.
    fn weight(&self, sphere: &BoundingSphere) -> (f64, f64) {
        let distance = sphere.center.distance(self.camera_position);

        match self.projection {
            Projection::Perspective { fov_y } => {
                let projection_factor = (0.5 * self.screen_height) / (0.5 * fov_y).tan();
                let pixel_radius = sphere.radius * projection_factor / distance;
                if distance - sphere.radius < 0.0 {
                    (f64::MAX, f64::MAX)
                } else {
                    (pixel_radius, pixel_radius)
                }
            }
            Projection::Orthographic { height } => {
                let pixel_radius = sphere.radius / height * self.screen_height;
                let diagonal = 2.0 * sphere.radius;
                let weight = if distance > 0.0 { diagonal / distance } else { f64::MAX };
                (weight, pixel_radius)
            }
        }
    }
}

/// A node selected for display this frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisibleNode {
    pub cloud: PointCloudId,
    pub node: NodeId,
    pub weight: f64,
    pub loaded: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameReport {
    pub frame: u64,
    /// In traversal order, highest weight first.
    pub visible: Vec<VisibleNode>,
    /// Points of the visible nodes, loaded or not.
    pub visible_points: u64,
    /// Loads issued this frame.
    pub requested: usize,
    /// Loads deferred because the concurrency cap was reached.
    pub throttled: usize,
    pub evicted: usize,
    /// In-flight loads aborted because their node left the visible set.
    pub cancelled: usize,
    /// Traversal stopped before the frontier was empty.
    pub budget_exhausted: bool,
}

#[derive(Debug)]
struct Candidate {
    weight: OrderedFloat<f64>,
    cloud: usize,
    node: NodeId,
    level: u32,
}

impl Candidate {
    fn key(&self) -> (OrderedFloat<f64>, Reverse<u32>, Reverse<usize>, Reverse<NodeId>) {
        // siblings are created in octant order, so equal weights pop by octant
        (self.weight, Reverse(self.level), Reverse(self.cloud), Reverse(self.node))
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

#[derive(Debug, Clone)]
pub struct LodSelector {
    config: StreamingConfig,
    frame: u64,
    visible: Vec<VisibleNode>,
}

impl LodSelector {
    pub fn new(config: StreamingConfig) -> Self {
        Self {
            config,
            frame: 0,
            visible: Vec::new(),
        }
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut StreamingConfig {
        &mut self.config
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Nodes selected by the last update.
    pub fn visible_nodes(&self) -> &[VisibleNode] {
        &self.visible
    }

    /// Select visible nodes, request missing ones, cancel and evict the rest.
    pub fn update<C: ResourceClient + 'static>(
        &mut self,
        clouds: &mut [PointCloudOctree],
        view: &ViewParams,
        loader: &NodeLoader<C>,
    ) -> FrameReport {
        self.frame += 1;
        let frame = self.frame;
        let frustum = Frustum::from_matrix(view.view_projection);

        let mut report = FrameReport {
            frame,
            ..Default::default()
        };
        let mut to_load: Vec<(usize, NodeId)> = Vec::new();
        let mut heap = BinaryHeap::new();

        for (index, cloud) in clouds.iter().enumerate() {
            if !cloud.visible {
                continue;
            }
            let root = cloud.root_id();
            let visible = cloud
                .world_bounding_box(root)
                .is_some_and(|b| frustum.intersects_aabb(&b));
            if visible {
                heap.push(Candidate {
                    weight: OrderedFloat(f64::MAX),
                    cloud: index,
                    node: root,
                    level: 0,
                });
            }
        }

        while let Some(candidate) = heap.pop() {
            let cloud = &mut clouds[candidate.cloud];
            let Some(node) = cloud.node(candidate.node) else {
                continue;
            };

            let num_points = u64::from(node.num_points);
            if report.visible_points + num_points > self.config.point_budget {
                report.budget_exhausted = true;
                break;
            }
            report.visible_points += num_points;

            let loaded = node.is_loaded();
            // nothing to fetch for empty nodes whose children are known
            let refinable = loaded || (node.num_points == 0 && !node.children_unknown());
            if !loaded && !refinable {
                to_load.push((candidate.cloud, candidate.node));
            }
            report.visible.push(VisibleNode {
                cloud: cloud.id(),
                node: candidate.node,
                weight: candidate.weight.0,
                loaded,
            });

            if refinable {
                for (_, child_id) in node.children() {
                    let Some(child) = cloud.node(child_id) else {
                        continue;
                    };
                    let world_box = child.bounding_box.translated(cloud.position);
                    if !frustum.intersects_aabb(&world_box) {
                        continue;
                    }
                    let (weight, pixel_radius) = view.weight(&world_box.bounding_sphere());
                    if pixel_radius < self.config.min_node_pixel_size {
                        continue;
                    }
                    heap.push(Candidate {
                        weight: OrderedFloat(weight),
                        cloud: candidate.cloud,
                        node: child_id,
                        level: child.level,
                    });
                }
            }

            cloud.mark_visible(candidate.node, frame);
        }

        for (i, &(cloud_index, node_id)) in to_load.iter().enumerate() {
            match loader.request_load(&mut clouds[cloud_index], node_id) {
                Ok(LoadOutcome::Issued { .. }) => report.requested += 1,
                Ok(LoadOutcome::Throttled) => {
                    report.throttled = to_load.len() - i;
                    break;
                }
                Ok(_) => {}
                Err(error) => tracing::warn!(%error, "load request rejected"),
            }
        }

        if self.config.cancel_invisible_loads {
            report.cancelled = cancel_invisible_loads(clouds, frame);
        }
        report.evicted = self.evict(clouds, frame);

        tracing::trace!(
            frame,
            visible = report.visible.len(),
            visible_points = report.visible_points,
            requested = report.requested,
            throttled = report.throttled,
            evicted = report.evicted,
            cancelled = report.cancelled,
            "frame updated"
        );

        self.visible = report.visible.clone();
        report
    }

    /// Dispose least recently visible nodes, deepest first, until the resident
    /// point count fits. Nodes visible this frame are kept.
    fn evict(&self, clouds: &mut [PointCloudOctree], frame: u64) -> usize {
        let mut resident: u64 = clouds.iter().map(PointCloudOctree::resident_points).sum();
        if resident <= self.config.max_resident_points {
            return 0;
        }

        let mut candidates: Vec<(u64, Reverse<u32>, usize, NodeId)> = clouds
            .iter()
            .enumerate()
            .flat_map(|(index, cloud)| {
                cloud
                    .octree()
                    .iter()
                    .filter(move |(_, node)| {
                        node.is_loaded() && !node.is_root() && node.last_visible_frame != frame
                    })
                    .map(move |(id, node)| (node.last_visible_frame, Reverse(node.level), index, id))
            })
            .collect();
        candidates.sort();

        let mut evicted = 0;
        for (_, _, index, id) in candidates {
            if resident <= self.config.max_resident_points {
                break;
            }
            if let Some(released) = clouds[index].dispose(id) {
                tracing::debug!(node = ?clouds[index].node(id).map(|n| &n.name), released, "node evicted");
                resident = resident.saturating_sub(u64::from(released));
                evicted += 1;
            }
        }
        evicted
    }

    /// Table of the loaded visible nodes of `cloud`.
    ///
    /// Empty nodes the traversal walked through stand in for loaded ones, so
    /// every listed node has its parent listed too.
    pub fn visible_node_table(&self, cloud: &PointCloudOctree) -> Result<VisibleNodeTable, TableError> {
        let nodes: Vec<NodeId> = self
            .visible
            .iter()
            .filter(|v| v.cloud == cloud.id())
            .filter(|v| {
                v.loaded
                    || cloud
                        .node(v.node)
                        .is_some_and(|n| n.num_points == 0 && !n.children_unknown())
            })
            .map(|v| v.node)
            .collect();
        VisibleNodeTable::build(cloud, &nodes)
    }
}

fn cancel_invisible_loads(clouds: &mut [PointCloudOctree], frame: u64) -> usize {
    let mut cancelled = 0;
    for cloud in clouds.iter_mut() {
        let stale: Vec<NodeId> = cloud
            .octree()
            .iter()
            .filter(|(_, node)| node.is_loading() && node.last_visible_frame != frame)
            .map(|(id, _)| id)
            .collect();
        for id in stale {
            if cloud.dispose(id).is_some() {
                tracing::debug!(node = ?cloud.node(id).map(|n| &n.name), "load cancelled");
                cancelled += 1;
            }
        }
    }
    cancelled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::octree::aabb::Aabb;

    fn perspective(camera: DVec3) -> ViewParams {
        ViewParams {
            view_projection: DMat4::IDENTITY,
            camera_position: camera,
            projection: Projection::Perspective {
                fov_y: std::f64::consts::FRAC_PI_2,
            },
            screen_height: 1000.0,
        }
    }

    #[test]
    fn perspective_weight_is_pixel_radius() {
        let sphere = Aabb::new(DVec3::splat(-1.0), DVec3::splat(1.0)).bounding_sphere();
        let radius = sphere.radius;

        let (weight, pixels) = perspective(DVec3::new(0.0, 0.0, 100.0)).weight(&sphere);
        // tan(45°) = 1, so the factor is half the screen height
        assert!((weight - radius * 500.0 / 100.0).abs() < 1e-9);
        assert_eq!(weight, pixels);

        let (near, _) = perspective(DVec3::new(0.0, 0.0, 10.0)).weight(&sphere);
        assert!(near > weight);

        let (inside, _) = perspective(DVec3::ZERO).weight(&sphere);
        assert_eq!(inside, f64::MAX);
    }

    #[test]
    fn orthographic_weight() {
        let sphere = Aabb::new(DVec3::ZERO, DVec3::splat(2.0)).bounding_sphere();
        let view = ViewParams {
            projection: Projection::Orthographic { height: 100.0 },
            ..perspective(DVec3::new(1.0, 1.0, 51.0))
        };
        let (weight, pixels) = view.weight(&sphere);
        assert!((weight - 2.0 * sphere.radius / 50.0).abs() < 1e-9);
        assert!((pixels - sphere.radius * 10.0).abs() < 1e-9);
    }

    #[test]
    fn candidates_pop_by_weight_then_shallow_then_octant() {
        let mut heap = BinaryHeap::new();
        let candidate = |weight: f64, level: u32, node: usize| Candidate {
            weight: OrderedFloat(weight),
            cloud: 0,
            node: NodeId(node),
            level,
        };
        heap.push(candidate(1.0, 1, 3));
        heap.push(candidate(5.0, 2, 9));
        heap.push(candidate(1.0, 1, 2));
        heap.push(candidate(1.0, 0, 7));

        let order: Vec<_> = std::iter::from_fn(|| heap.pop()).map(|c| c.node.0).collect();
        assert_eq!(order, vec![9, 7, 2, 3]);
    }
}
