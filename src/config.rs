use serde::Deserialize;

pub const DEFAULT_POINT_BUDGET: u64 = 1_000_000;
pub const DEFAULT_MAX_NODES_LOADING: usize = 4;
pub const DEFAULT_MIN_NODE_PIXEL_SIZE: f64 = 50.0;

/// Tuning of the streaming engine, shared by every point cloud of a scene.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct StreamingConfig {
    /// Points selected for display per frame, summed over all point clouds.
    pub point_budget: u64,
    /// Node loads in flight at any time.
    pub max_nodes_loading: usize,
    /// Nodes projecting to a smaller radius, in pixels, are not refined.
    pub min_node_pixel_size: f64,
    /// Points kept in memory before least recently visible nodes are evicted.
    pub max_resident_points: u64,
    /// Run decoders on the rayon pool instead of the task that fetched the payload.
    pub decode_off_thread: bool,
    /// Abort loads of nodes that dropped out of the visible set.
    pub cancel_invisible_loads: bool,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            point_budget: DEFAULT_POINT_BUDGET,
            max_nodes_loading: DEFAULT_MAX_NODES_LOADING,
            min_node_pixel_size: DEFAULT_MIN_NODE_PIXEL_SIZE,
            max_resident_points: 2 * DEFAULT_POINT_BUDGET,
            decode_off_thread: true,
            cancel_invisible_loads: true,
        }
    }
}

impl StreamingConfig {
    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn with_point_budget(mut self, point_budget: u64) -> Self {
        self.point_budget = point_budget;
        self
    }

    pub fn with_max_nodes_loading(mut self, max_nodes_loading: usize) -> Self {
        self.max_nodes_loading = max_nodes_loading;
        self
    }

    pub fn with_max_resident_points(mut self, max_resident_points: u64) -> Self {
        self.max_resident_points = max_resident_points;
        self
    }
}
