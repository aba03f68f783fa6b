use futures::executor::block_on;
use futures::future::BoxFuture;
use glam::{DMat4, DVec3};
use potree_stream::config::StreamingConfig;
use potree_stream::loader::{ApplyReport, NodeLoader, TaskSpawner};
use potree_stream::lod::{LodSelector, Projection, ViewParams};
use potree_stream::point_cloud::PointCloudOctree;
use potree_stream::resource::memory::MemoryClient;
use std::sync::{Arc, Mutex};

const MANIFEST_URL: &str = "mem://scene/cloud.js";
const CHILDREN: [&str; 8] = ["r0", "r1", "r2", "r3", "r4", "r5", "r6", "r7"];

type Queue = Arc<Mutex<Vec<BoxFuture<'static, ()>>>>;

fn queue_spawner() -> (Queue, impl TaskSpawner + 'static) {
    let queue: Queue = Arc::default();
    let sink = Arc::clone(&queue);
    (queue, move |task: BoxFuture<'static, ()>| sink.lock().unwrap().push(task))
}

fn run_all(queue: &Queue) {
    let tasks: Vec<_> = queue.lock().unwrap().drain(..).collect();
    for task in tasks {
        block_on(task);
    }
}

fn payload(num_points: usize) -> Vec<u8> {
    (0..num_points * 3)
        .flat_map(|i| (i as f32 * 0.1).to_le_bytes())
        .collect()
}

/// A 16-unit cube with a root of 8 points and eight leaves of 4 points each.
fn scene() -> Arc<MemoryClient> {
    scene_with_root(8)
}

fn scene_with_root(root_points: usize) -> Arc<MemoryClient> {
    let hierarchy: Vec<String> = std::iter::once(format!(r#"["r", {root_points}]"#))
        .chain(CHILDREN.iter().map(|name| format!(r#"["{name}", 4]"#)))
        .collect();
    let manifest = format!(
        r#"{{
            "version": "1.3",
            "octreeDir": "data",
            "boundingBox": {{"lx": 0, "ly": 0, "lz": 0, "ux": 16, "uy": 16, "uz": 16}},
            "pointAttributes": ["POSITION_CARTESIAN"],
            "spacing": 2.0,
            "hierarchy": [{}]
        }}"#,
        hierarchy.join(", ")
    );

    let client = MemoryClient::new();
    client.insert(MANIFEST_URL, manifest.into_bytes());
    if root_points > 0 {
        client.insert("mem://scene/data/r", payload(root_points));
    }
    for name in CHILDREN {
        client.insert(format!("mem://scene/data/{name}"), payload(4));
    }
    Arc::new(client)
}

fn config() -> StreamingConfig {
    StreamingConfig {
        max_nodes_loading: 8,
        decode_off_thread: false,
        ..Default::default()
    }
}

fn view(target: DVec3) -> ViewParams {
    let eye = DVec3::new(8.0, 8.0, 40.0);
    let fov_y = 60f64.to_radians();
    let projection = DMat4::perspective_rh(fov_y, 1.0, 0.1, 1000.0);
    ViewParams {
        view_projection: projection * DMat4::look_at_rh(eye, target, DVec3::Y),
        camera_position: eye,
        projection: Projection::Perspective { fov_y },
        screen_height: 800.0,
    }
}

fn looking_at_cloud() -> ViewParams {
    view(DVec3::splat(8.0))
}

fn looking_away() -> ViewParams {
    view(DVec3::new(8.0, 8.0, 80.0))
}

struct Harness {
    queue: Queue,
    loader: NodeLoader<MemoryClient>,
    selector: LodSelector,
    clouds: Vec<PointCloudOctree>,
}

impl Harness {
    fn new(config: StreamingConfig) -> Self {
        Self::with_client(scene(), config)
    }

    fn with_client(client: Arc<MemoryClient>, config: StreamingConfig) -> Self {
        let cloud = block_on(PointCloudOctree::open(MANIFEST_URL, &client)).unwrap();
        let (queue, spawner) = queue_spawner();
        Self {
            queue,
            loader: NodeLoader::new(client, spawner, &config),
            selector: LodSelector::new(config),
            clouds: vec![cloud],
        }
    }

    fn frame(&mut self, view: &ViewParams) -> potree_stream::lod::FrameReport {
        self.selector.update(&mut self.clouds, view, &self.loader)
    }

    fn settle(&mut self) -> ApplyReport {
        run_all(&self.queue);
        self.loader.apply_completions(&mut self.clouds)
    }

    /// Load the root, then its children.
    fn load_everything(&mut self) {
        self.frame(&looking_at_cloud());
        self.settle();
        self.frame(&looking_at_cloud());
        assert_eq!(self.settle().loaded, 8);
    }
}

#[test]
fn loads_progress_from_root_to_children() {
    let mut harness = Harness::new(StreamingConfig {
        max_nodes_loading: 4,
        ..config()
    });

    let report = harness.frame(&looking_at_cloud());
    assert_eq!(report.frame, 1);
    assert_eq!(report.visible.len(), 1);
    assert!(!report.visible[0].loaded);
    assert_eq!(report.requested, 1);
    assert_eq!(harness.settle(), ApplyReport { loaded: 1, failed: 0, stale: 0 });

    let report = harness.frame(&looking_at_cloud());
    assert_eq!(report.visible.len(), 9);
    assert_eq!(report.visible_points, 40);
    assert_eq!(report.requested, 4);
    assert_eq!(report.throttled, 4);
    assert!(!report.budget_exhausted);
    assert_eq!(harness.loader.budget().in_flight(), 4);

    // weights never increase along the traversal
    let weights: Vec<f64> = report.visible.iter().map(|v| v.weight).collect();
    assert!(weights.windows(2).all(|w| w[0] >= w[1]));

    assert_eq!(harness.settle().loaded, 4);
    let report = harness.frame(&looking_at_cloud());
    assert_eq!(report.requested, 4);
    assert_eq!(harness.settle().loaded, 4);
    assert_eq!(harness.clouds[0].resident_points(), 40);
}

#[test]
fn point_budget_stops_traversal() {
    let mut harness = Harness::new(config());
    harness.load_everything();

    harness.selector.config_mut().point_budget = 20;
    let report = harness.frame(&looking_at_cloud());
    assert!(report.budget_exhausted);
    assert_eq!(report.visible.len(), 4);
    assert_eq!(report.visible_points, 20);
    assert_eq!(harness.selector.visible_nodes().len(), 4);
}

#[test]
fn least_recently_visible_nodes_are_evicted() {
    let mut harness = Harness::new(config());
    harness.load_everything();
    assert_eq!(harness.clouds[0].resident_points(), 40);

    let config = harness.selector.config_mut();
    config.point_budget = 8;
    config.max_resident_points = 20;
    let report = harness.frame(&looking_at_cloud());
    assert_eq!(report.visible.len(), 1);
    assert_eq!(report.evicted, 5);

    let cloud = &harness.clouds[0];
    assert_eq!(cloud.resident_points(), 20);
    assert!(cloud.octree().root().is_loaded());
    let loaded = CHILDREN
        .iter()
        .filter(|name| cloud.node_by_name(name).unwrap().is_loaded())
        .count();
    assert_eq!(loaded, 3);
    // evicted nodes keep their place in the tree
    assert_eq!(cloud.octree().len(), 9);
}

#[test]
fn loads_of_nodes_out_of_view_are_cancelled() {
    let mut harness = Harness::new(config());
    harness.frame(&looking_at_cloud());
    harness.settle();

    let report = harness.frame(&looking_at_cloud());
    assert_eq!(report.requested, 8);

    let report = harness.frame(&looking_away());
    assert!(report.visible.is_empty());
    assert_eq!(report.cancelled, 8);

    // aborted tasks release their slots and their results are discarded
    assert_eq!(harness.settle(), ApplyReport { loaded: 0, failed: 0, stale: 8 });
    assert_eq!(harness.loader.budget().in_flight(), 0);
    let cloud = &harness.clouds[0];
    assert!(CHILDREN.iter().all(|name| {
        let node = cloud.node_by_name(name).unwrap();
        !node.is_loaded() && !node.is_loading()
    }));
}

#[test]
fn completions_arriving_after_cancellation_are_stale() {
    let mut harness = Harness::new(config());
    harness.frame(&looking_at_cloud());
    harness.settle();
    harness.frame(&looking_at_cloud());

    // results are in the channel before the nodes leave the view
    run_all(&harness.queue);
    assert_eq!(harness.frame(&looking_away()).cancelled, 8);

    let report = harness.loader.apply_completions(&mut harness.clouds);
    assert_eq!(report, ApplyReport { loaded: 0, failed: 0, stale: 8 });
    assert_eq!(harness.clouds[0].resident_points(), 8);
}

#[test]
fn visible_table_covers_loaded_nodes() {
    let mut harness = Harness::new(config());
    harness.load_everything();
    harness.frame(&looking_at_cloud());

    let table = harness.selector.visible_node_table(&harness.clouds[0]).unwrap();
    assert_eq!(table.len(), 9);
    assert_eq!(table.record(0), Some([0xff, 0, 1, 0]));
    assert_eq!(table.index_of("r5"), Some(6));
    assert_eq!(table.record(6), Some([0, 0, 0, 1]));
}

#[test]
fn empty_nodes_stay_in_the_visible_table() {
    let mut harness = Harness::with_client(scene_with_root(0), config());

    // the empty root is walked through without a load
    let report = harness.frame(&looking_at_cloud());
    assert_eq!(report.visible.len(), 9);
    assert_eq!(report.requested, 8);
    assert_eq!(harness.settle().loaded, 8);

    let report = harness.frame(&looking_at_cloud());
    assert_eq!(report.visible.iter().filter(|v| v.loaded).count(), 8);
    assert!(!harness.clouds[0].octree().root().is_loaded());

    let table = harness.selector.visible_node_table(&harness.clouds[0]).unwrap();
    assert_eq!(table.len(), 9);
    assert_eq!(table.record(0), Some([0xff, 0, 1, 0]));
    assert_eq!(table.index_of("r1"), Some(2));
}

#[test]
fn hidden_clouds_are_skipped() {
    let mut harness = Harness::new(config());
    harness.clouds[0].visible = false;
    let report = harness.frame(&looking_at_cloud());
    assert!(report.visible.is_empty());
    assert_eq!(report.requested, 0);
}

// run with `cargo test --features tokio`
#[cfg(feature = "tokio")]
#[tokio::test(flavor = "multi_thread")]
async fn streams_on_a_tokio_runtime() {
    use potree_stream::loader::TokioSpawner;

    let client = scene();
    let mut clouds = vec![PointCloudOctree::open(MANIFEST_URL, &client).await.unwrap()];
    let config = StreamingConfig {
        max_nodes_loading: 8,
        ..Default::default()
    };
    let spawner = TokioSpawner::try_current().unwrap();
    let mut loader = NodeLoader::new(client, spawner, &config);
    let mut selector = LodSelector::new(config);

    let mut loaded = 0;
    for _ in 0..100 {
        selector.update(&mut clouds, &looking_at_cloud(), &loader);
        loaded += loader.apply_completions(&mut clouds).loaded;
        if loaded == 9 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(loaded, 9);
    assert_eq!(clouds[0].resident_points(), 40);
}
