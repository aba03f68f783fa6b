pub use crate::config::StreamingConfig;
pub use crate::loader::{ApplyReport, LoadOutcome, NodeLoader, TaskSpawner};
pub use crate::lod::table::VisibleNodeTable;
pub use crate::lod::{FrameReport, LodSelector, Projection, ViewParams, VisibleNode};
pub use crate::octree::NodeId;
pub use crate::octree::aabb::Aabb;
pub use crate::octree::node::GeometryNode;
pub use crate::octree::snapshot::NodeSnapshot;
pub use crate::point::PointBatch;
pub use crate::point_cloud::{PointCloudId, PointCloudOctree};
pub use crate::resource::ResourceClient;
pub use crate::version::Version;

#[cfg(feature = "tokio")]
pub use crate::loader::TokioSpawner;

// Error types
pub use crate::error::Error;
pub use crate::loader::LoadError;
pub use crate::point_cloud::OpenError;
pub use crate::resource::ResourceError;
