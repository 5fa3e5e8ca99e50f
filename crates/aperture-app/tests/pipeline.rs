//! End-to-end pipeline test: capture -> extraction -> persistence over real
//! TCP links on ephemeral ports, exactly the per-process wire topology.

use std::sync::Arc;
use std::time::Duration;

use image::{GenericImageView, ImageBuffer, Rgb};

use aperture_capture::CaptureStage;
use aperture_core::config::CaptureConfig;
use aperture_core::{codec, CancelToken};
use aperture_extract::{ExtractStage, FastDetector};
use aperture_store::{Database, FileStore, FrameRepository, StoreStage};
use aperture_transport::{PullSocket, PushSocket};

/// A frame with strong corners so the detector has something to find.
fn write_source_image(dir: &std::path::Path) {
    let img: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_fn(64, 64, |x, y| {
        if (24..40).contains(&x) && (24..40).contains(&y) {
            Rgb([255u8, 255, 255])
        } else {
            Rgb([0u8, 0, 0])
        }
    });
    img.save(dir.join("frame.png")).unwrap();
}

#[tokio::test]
async fn test_three_stage_pipeline_persists_captured_frame() {
    let source_dir = tempfile::tempdir().unwrap();
    write_source_image(source_dir.path());
    let store_dir = tempfile::tempdir().unwrap();

    // Wire the two links the way the deployed topology does: each producer
    // binds, each consumer connects.
    let capture_push = PushSocket::bind("127.0.0.1:0").await.unwrap();
    let mut extract_pull = PullSocket::connect(&capture_push.local_addr().to_string());
    let extract_push = PushSocket::bind("127.0.0.1:0").await.unwrap();
    let mut store_pull = PullSocket::connect(&extract_push.local_addr().to_string());

    let db = Arc::new(Database::in_memory().unwrap());
    let repo = FrameRepository::new(Arc::clone(&db));
    let files = FileStore::new(&store_dir.path().join("images")).unwrap();

    let cancel = CancelToken::new();

    let extract = ExtractStage::new(FastDetector::new(20, 0), cancel.clone());
    let extract_task =
        tokio::spawn(async move { extract.run(&mut extract_pull, &extract_push).await });

    let store = StoreStage::new(Arc::clone(&db), files, cancel.clone());
    let store_task = tokio::spawn(async move { store.run(&mut store_pull).await });

    let capture_config = CaptureConfig {
        source_dir: source_dir.path().to_string_lossy().to_string(),
        loop_source: false,
        interval_ms: 1,
        retry_ms: 1,
        jpeg_quality: 90,
        endpoint: String::new(),
    };
    let capture = CaptureStage::new(capture_config, cancel.clone());
    capture.run(&capture_push).await.unwrap();

    // Single-pass capture sent exactly one frame; wait for it to land.
    let mut row = None;
    for _ in 0..1000 {
        if repo.count().unwrap() == 1 {
            row = repo.latest().unwrap();
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let row = row.expect("frame never reached the store");

    // Metadata flowed through both hops intact.
    assert_eq!(row.seq, 1);
    assert!(row.num_keypoints > 0, "detector found no corners");

    // The stored blob is the canonical encoding and matches the count.
    let features = codec::decode(row.features.as_deref().unwrap_or(&[]));
    assert_eq!(features.len() as i64, row.num_keypoints);

    // The stored file is a decodable image of the captured dimensions.
    let stored = image::open(&row.path).unwrap();
    assert_eq!(stored.width(), 64);
    assert_eq!(stored.height(), 64);

    cancel.cancel();
    extract_task.abort();
    store_task.abort();
}
