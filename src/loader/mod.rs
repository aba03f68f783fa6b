//! Issues node loads under a global concurrency cap and routes their results
//! back to the owning point cloud.
//!
//! Loads run as tasks on a caller provided [`TaskSpawner`]. Results come back
//! through a channel and are applied on the frame thread with
//! [`NodeLoader::apply_completions`], so the tree is never touched concurrently.

pub mod budget;
pub(crate) mod plan;

use crate::config::StreamingConfig;
use crate::decode::DecodeError;
use crate::hierarchy::{HierarchyEntry, HierarchyError};
use crate::octree::NodeId;
use crate::point::PointBatch;
use crate::point_cloud::{PointCloudId, PointCloudOctree};
use crate::resource::{ResourceClient, ResourceError};
use budget::{LoadBudgetTracker, LoadPermit};
use futures::channel::mpsc;
use futures::future::{AbortHandle, Abortable, BoxFuture};
use futures::{FutureExt, StreamExt};
use plan::LoadPlan;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Node does not exist")]
    NodeNotFound,

    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Invalid hierarchy: {0}")]
    Hierarchy(#[from] HierarchyError),

    #[error("Load task dropped before it completed")]
    Dropped,
}

/// Runs load tasks to completion.
pub trait TaskSpawner: Send + Sync {
    fn spawn(&self, task: BoxFuture<'static, ()>);
}

impl<F> TaskSpawner for F
where
    F: Fn(BoxFuture<'static, ()>) + Send + Sync,
{
    fn spawn(&self, task: BoxFuture<'static, ()>) {
        self(task)
    }
}

#[cfg(feature = "tokio")]
#[derive(Clone, Debug)]
pub struct TokioSpawner {
    handle: tokio::runtime::Handle,
}

#[cfg(feature = "tokio")]
impl TokioSpawner {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Spawner on the runtime of the calling context, if there is one.
    pub fn try_current() -> Option<Self> {
        tokio::runtime::Handle::try_current().ok().map(Self::new)
    }
}

#[cfg(feature = "tokio")]
impl TaskSpawner for TokioSpawner {
    fn spawn(&self, task: BoxFuture<'static, ()>) {
        // detached, results come back through the completion channel
        drop(self.handle.spawn(task));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Issued { generation: u64 },
    AlreadyLoaded,
    AlreadyLoading,
    /// The concurrency cap is reached; ask again on a later frame.
    Throttled,
}

#[derive(Debug)]
pub struct LoadedNode {
    /// Hierarchy block fetched ahead of the points, if the node needed one.
    pub hierarchy: Option<Vec<HierarchyEntry>>,
    pub batch: PointBatch,
}

/// Result of one load task, tagged with the request it answers.
#[derive(Debug)]
pub struct LoadCompletion {
    pub cloud: PointCloudId,
    pub node: NodeId,
    pub name: String,
    pub generation: u64,
    pub result: Result<LoadedNode, LoadError>,
}

/// Tally of [`NodeLoader::apply_completions`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ApplyReport {
    pub loaded: usize,
    pub failed: usize,
    /// Completions for requests superseded by a dispose or a newer load.
    pub stale: usize,
}

/// Reports the outcome of a load task exactly once.
///
/// A task dropped before it finishes, by an abort or by its executor, reports
/// [`LoadError::Dropped`] so its node does not stay loading. The permit is
/// released before the completion is sent.
struct CompletionGuard {
    permit: Option<LoadPermit>,
    sender: mpsc::UnboundedSender<LoadCompletion>,
    cloud: PointCloudId,
    node: NodeId,
    name: String,
    generation: u64,
    sent: bool,
}

impl CompletionGuard {
    fn send(&mut self, result: Result<LoadedNode, LoadError>) {
        if self.sent {
            return;
        }
        self.sent = true;
        drop(self.permit.take());

        // receiver gone means the loader was dropped
        let _ = self.sender.unbounded_send(LoadCompletion {
            cloud: self.cloud,
            node: self.node,
            name: std::mem::take(&mut self.name),
            generation: self.generation,
            result,
        });
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.send(Err(LoadError::Dropped));
    }
}

pub struct NodeLoader<C> {
    client: Arc<C>,
    spawner: Arc<dyn TaskSpawner>,
    budget: LoadBudgetTracker,
    decode_off_thread: bool,
    sender: mpsc::UnboundedSender<LoadCompletion>,
    receiver: mpsc::UnboundedReceiver<LoadCompletion>,
}

impl<C: ResourceClient + 'static> NodeLoader<C> {
    pub fn new(client: Arc<C>, spawner: impl TaskSpawner + 'static, config: &StreamingConfig) -> Self {
        Self::with_budget(
            client,
            spawner,
            LoadBudgetTracker::new(config.max_nodes_loading),
            config.decode_off_thread,
        )
    }

    /// Loader gated by an existing tracker, e.g. one shared with other loaders.
    pub fn with_budget(
        client: Arc<C>,
        spawner: impl TaskSpawner + 'static,
        budget: LoadBudgetTracker,
        decode_off_thread: bool,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded();
        Self {
            client,
            spawner: Arc::new(spawner),
            budget,
            decode_off_thread,
            sender,
            receiver,
        }
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    pub fn budget(&self) -> &LoadBudgetTracker {
        &self.budget
    }

    /// Start loading a node unless it is loaded, loading, or the cap is reached.
    ///
    /// Nodes whose children are still unknown fetch their hierarchy block first.
    pub fn request_load(
        &self,
        cloud: &mut PointCloudOctree,
        node_id: NodeId,
    ) -> Result<LoadOutcome, LoadError> {
        let node = cloud.node(node_id).ok_or(LoadError::NodeNotFound)?;
        if node.is_loaded() {
            return Ok(LoadOutcome::AlreadyLoaded);
        }
        if node.is_loading() {
            return Ok(LoadOutcome::AlreadyLoading);
        }

        let Some(permit) = self.budget.try_acquire() else {
            tracing::trace!(node = %node.name, in_flight = self.budget.in_flight(), "load throttled");
            return Ok(LoadOutcome::Throttled);
        };

        let plan = LoadPlan::new(cloud, node_id)?;
        let (abort, registration) = AbortHandle::new_pair();
        let generation = cloud
            .begin_load(node_id, abort)
            .ok_or(LoadError::NodeNotFound)?;

        tracing::debug!(
            node = %plan.name,
            url = %plan.url,
            generation,
            hierarchy = plan.hierarchy.is_some(),
            "load issued"
        );

        let client = Arc::clone(&self.client);
        let decode_off_thread = self.decode_off_thread;
        let mut guard = CompletionGuard {
            permit: Some(permit),
            sender: self.sender.clone(),
            cloud: cloud.id(),
            node: node_id,
            name: plan.name.clone(),
            generation,
            sent: false,
        };

        let task = async move {
            let result = plan
                .execute(client.as_ref(), decode_off_thread)
                .await
                .map(|(hierarchy, batch)| LoadedNode { hierarchy, batch });
            guard.send(result);
        };

        self.spawner
            .spawn(Abortable::new(task, registration).map(|_| ()).boxed());

        Ok(LoadOutcome::Issued { generation })
    }

    /// Completions received so far, without blocking.
    pub fn drain_completions(&mut self) -> Vec<LoadCompletion> {
        let mut completions = Vec::new();
        while let Some(Some(completion)) = self.receiver.next().now_or_never() {
            completions.push(completion);
        }
        completions
    }

    /// Apply every received completion to its point cloud.
    ///
    /// Hierarchy entries are linked even when the points arrive stale, since
    /// topology does not depend on the request that fetched it.
    pub fn apply_completions(&mut self, clouds: &mut [PointCloudOctree]) -> ApplyReport {
        let mut report = ApplyReport::default();

        for completion in self.drain_completions() {
            let Some(cloud) = clouds.iter_mut().find(|c| c.id() == completion.cloud) else {
                tracing::debug!(node = %completion.name, "completion for a closed point cloud");
                report.stale += 1;
                continue;
            };

            match completion.result {
                Ok(LoadedNode { hierarchy, batch }) => {
                    if let Some(entries) = hierarchy {
                        if let Err(error) = cloud.apply_hierarchy(&entries) {
                            tracing::warn!(node = %completion.name, %error, "hierarchy rejected");
                        }
                    }

                    let num_points = batch.len();
                    if cloud.complete_load(completion.node, completion.generation, batch) {
                        tracing::debug!(node = %completion.name, num_points, "node loaded");
                        report.loaded += 1;
                    } else {
                        tracing::debug!(
                            node = %completion.name,
                            generation = completion.generation,
                            "stale completion discarded"
                        );
                        report.stale += 1;
                    }
                }
                Err(error) => {
                    if cloud.fail_load(completion.node, completion.generation) {
                        tracing::warn!(node = %completion.name, %error, "node load failed");
                        report.failed += 1;
                    } else {
                        report.stale += 1;
                    }
                }
            }
        }

        report
    }
}
