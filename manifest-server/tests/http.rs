//! HTTP contract tests against an in-process server.

use std::sync::Arc;

use live_window::{LiveEngine, WindowFsm};
use manifest_server::manifest_router;
use playlist_source::{PlaylistInfo, Segment, Variant};
use tokio::net::TcpListener;

fn segments(count: usize, variant_index: usize) -> Vec<Segment> {
    (0..count)
        .map(|i| Segment {
            url: format!("https://cdn.example/v{variant_index}/seg{i:03}.ts"),
            duration: 1.0,
            sequence: i as u64,
            variant_index,
        })
        .collect()
}

fn media_info(count: usize) -> PlaylistInfo {
    PlaylistInfo::Media {
        segments: segments(count, 0),
        target_duration: 1,
    }
}

fn master_info() -> PlaylistInfo {
    PlaylistInfo::Master {
        variants: vec![
            Variant {
                bandwidth: 1280000,
                resolution: Some("640x360".to_string()),
                codecs: None,
                playlist_url: "https://cdn.example/v0.m3u8".to_string(),
                segments: segments(5, 0),
                target_duration: 1,
            },
            Variant {
                bandwidth: 2560000,
                resolution: Some("1280x720".to_string()),
                codecs: None,
                playlist_url: "https://cdn.example/v1.m3u8".to_string(),
                segments: segments(5, 1),
                target_duration: 1,
            },
        ],
    }
}

async fn start_server(info: PlaylistInfo, window_size: usize) -> (String, Arc<LiveEngine>) {
    let engine = Arc::new(
        LiveEngine::new(info, window_size, Arc::new(WindowFsm::new()), None)
            .await
            .unwrap(),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = manifest_router(engine.clone());
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (format!("http://{addr}"), engine)
}

#[tokio::test]
async fn master_manifest_has_the_exact_expected_shape() {
    let (base, _engine) = start_server(master_info(), 3).await;

    let response = reqwest::get(format!("{base}/playlist.m3u8")).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap(),
        "application/vnd.apple.mpegurl"
    );

    let body = response.text().await.unwrap();
    assert_eq!(
        body,
        "#EXTM3U\n\
         #EXT-X-VERSION:3\n\
         #EXT-X-STREAM-INF:BANDWIDTH=1280000,RESOLUTION=640x360\n\
         /variant/0/playlist.m3u8\n\
         #EXT-X-STREAM-INF:BANDWIDTH=2560000,RESOLUTION=1280x720\n\
         /variant/1/playlist.m3u8\n"
    );
    assert!(!body.contains(".ts"));
}

#[tokio::test]
async fn single_variant_source_serves_media_at_the_root() {
    let (base, _engine) = start_server(media_info(5), 3).await;

    let body = reqwest::get(format!("{base}/playlist.m3u8"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    assert!(body.contains("#EXT-X-MEDIA-SEQUENCE:0\n"));
    assert!(body.contains("https://cdn.example/v0/seg000.ts"));
    assert!(!body.contains("#EXT-X-ENDLIST"));
}

#[tokio::test]
async fn manifest_responses_carry_live_streaming_headers() {
    let (base, _engine) = start_server(media_info(5), 3).await;

    let response = reqwest::get(format!("{base}/variant/0/playlist.m3u8"))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let headers = response.headers();
    assert_eq!(
        headers.get("cache-control").unwrap().to_str().unwrap(),
        "no-cache, no-store, must-revalidate"
    );
    assert_eq!(
        headers
            .get("access-control-allow-origin")
            .unwrap()
            .to_str()
            .unwrap(),
        "*"
    );
}

#[tokio::test]
async fn unknown_variant_is_a_plain_text_404() {
    let (base, _engine) = start_server(master_info(), 3).await;

    let response = reqwest::get(format!("{base}/variant/9/playlist.m3u8"))
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    let body = response.text().await.unwrap();
    assert!(body.contains("variant index 9 out of range"));
}

#[tokio::test]
async fn health_reports_the_current_window() {
    let (base, engine) = start_server(media_info(10), 6).await;
    engine.tick_advance().await.unwrap();
    engine.tick_advance().await.unwrap();

    let body: serde_json::Value = serde_json::from_str(
        &reqwest::get(format!("{base}/health"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap(),
    )
    .unwrap();

    assert_eq!(body["status"], "ok");
    let stats = &body["stats"];
    assert_eq!(stats["is_master"], false);
    assert_eq!(stats["window_size"], 6);
    assert_eq!(stats["sequence_number"], 2);
    assert_eq!(stats["total_segments"], 10);
    assert_eq!(stats["current_position"], 2);
    // Single-variant and non-clustered: the master and cluster blocks are
    // absent entirely.
    assert!(stats.get("variants").is_none());
    assert!(stats.get("cluster_mode").is_none());
}

#[tokio::test]
async fn health_lists_variants_for_master_sources() {
    let (base, _engine) = start_server(master_info(), 3).await;

    let body: serde_json::Value = serde_json::from_str(
        &reqwest::get(format!("{base}/health"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap(),
    )
    .unwrap();

    let stats = &body["stats"];
    assert_eq!(stats["is_master"], true);
    assert_eq!(stats["variant_count"], 2);
    assert_eq!(stats["variants"][0]["bandwidth"], 1280000);
    assert_eq!(stats["variants"][1]["resolution"], "1280x720");
    assert_eq!(stats["variants"][1]["position"], 0);
}

#[tokio::test]
async fn cluster_status_is_not_found_without_a_cluster() {
    let (base, _engine) = start_server(media_info(5), 3).await;

    let response = reqwest::get(format!("{base}/cluster/status")).await.unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn variant_manifests_advance_with_the_engine() {
    let (base, engine) = start_server(media_info(5), 3).await;

    for _ in 0..3 {
        engine.tick_advance().await.unwrap();
    }

    let body = reqwest::get(format!("{base}/variant/0/playlist.m3u8"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    assert!(body.contains("#EXT-X-MEDIA-SEQUENCE:3\n"));
    assert!(body.contains("seg003.ts"));
    assert!(body.contains("seg004.ts"));
    assert!(body.contains("#EXT-X-DISCONTINUITY\n"));
    assert!(body.contains("seg000.ts"));
}
