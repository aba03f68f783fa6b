use glam::{DMat4, DVec3};
use potree_stream::prelude::*;
use potree_stream::resource::file::FileClient;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
pub async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "file://assets/lion_takanawa/cloud.js".to_string());

    let client = Arc::new(FileClient);
    let mut clouds = vec![PointCloudOctree::open(&url, &client).await.unwrap()];

    let config = StreamingConfig::default().with_point_budget(500_000);
    let spawner = TokioSpawner::try_current().unwrap();
    let mut loader = NodeLoader::new(client, spawner, &config);
    let mut selector = LodSelector::new(config);

    let world_box = clouds[0].world_bounding_box(clouds[0].root_id()).unwrap();
    let target = world_box.center();
    let fov_y = 60f64.to_radians();

    // orbit the cloud, one frame every 50 ms
    for frame in 0..200 {
        let angle = frame as f64 * 0.05;
        let radius = world_box.size().max_element() * 1.5;
        let eye = target + DVec3::new(angle.cos() * radius, angle.sin() * radius, radius * 0.5);
        let projection = DMat4::perspective_rh(fov_y, 16.0 / 9.0, 0.1, radius * 10.0);
        let view = ViewParams {
            view_projection: projection * DMat4::look_at_rh(eye, target, DVec3::Z),
            camera_position: eye,
            projection: Projection::Perspective { fov_y },
            screen_height: 1080.0,
        };

        let applied = loader.apply_completions(&mut clouds);
        let report = selector.update(&mut clouds, &view, &loader);
        println!(
            "frame {}: {} nodes, {} points, {} loaded, {} requested, {} evicted",
            report.frame,
            report.visible.len(),
            report.visible_points,
            applied.loaded,
            report.requested,
            report.evicted
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    println!("{} nodes known", clouds[0].hierarchy_snapshot().iter().count());
}
