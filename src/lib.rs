//! Streaming of Potree point clouds too large to hold in memory.
//!
//! A [`PointCloudOctree`](point_cloud::PointCloudOctree) is opened from a
//! `cloud.js` manifest, a Greyhound server or an Arena4D server. Every frame
//! the [`LodSelector`](lod::LodSelector) picks the nodes worth showing under a
//! point budget, asks the [`NodeLoader`](loader::NodeLoader) for the missing
//! ones and evicts what has not been seen for a while.

pub mod arena;
pub mod config;
pub mod decode;
pub mod error;
pub mod greyhound;
pub mod hierarchy;
pub mod loader;
pub mod lod;
pub mod metadata;
pub mod octree;
pub mod point;
pub mod point_cloud;
pub mod prelude;
pub mod resource;
pub mod version;
