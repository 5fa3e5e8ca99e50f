//! Aperture extraction crate - the middle stage of the pipeline.
//!
//! Receives two-part capture envelopes, decodes the image, runs feature
//! detection, and forwards three-part envelopes with the metadata enriched
//! by the keypoint count and the canonical feature blob appended. Strictly
//! 1:1 with its input: an undecodable frame is dropped, never forwarded in
//! any partial form.

pub mod detector;

use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use tracing::{debug, info, warn};

use aperture_core::{codec, ApertureError, CancelToken, CaptureEnvelope, FeatureEnvelope, Result};
use aperture_transport::{PullSocket, PushSocket};

pub use detector::{FastDetector, FeatureDetector, MockDetector};

/// Quality of the re-encoded wire image.
const JPEG_QUALITY: u8 = 90;

/// The Extraction stage loop.
pub struct ExtractStage<D: FeatureDetector> {
    detector: D,
    cancel: CancelToken,
}

impl<D: FeatureDetector> ExtractStage<D> {
    pub fn new(detector: D, cancel: CancelToken) -> Self {
        Self { detector, cancel }
    }

    /// Receive capture envelopes on `input`, emit feature envelopes on
    /// `output` until cancelled.
    ///
    /// `image_id` and `seq` pass through unchanged; this stage only adds
    /// `num_keypoints` and the feature blob.
    pub async fn run(&self, input: &mut PullSocket, output: &PushSocket) -> Result<()> {
        info!("extraction stage started");
        let mut processed: u64 = 0;

        while !self.cancel.is_cancelled() {
            let parts = input.recv().await;
            let envelope = match CaptureEnvelope::from_parts(parts) {
                Ok(env) => env,
                Err(e) => {
                    warn!(error = %e, "malformed capture message dropped");
                    continue;
                }
            };
            let mut meta = envelope.meta;

            let img = match image::load_from_memory(&envelope.image) {
                Ok(img) => img,
                Err(e) => {
                    warn!(image_id = %meta.image_id, seq = meta.seq, error = %e,
                        "undecodable image dropped");
                    continue;
                }
            };

            let features = match self.detector.detect(&img.to_luma8()) {
                Ok(features) => features,
                Err(e) => {
                    warn!(image_id = %meta.image_id, error = %e, "detection failed, frame dropped");
                    continue;
                }
            };
            meta.num_keypoints = Some(features.len() as u32);

            let jpeg = match encode_jpeg(&img, JPEG_QUALITY) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(image_id = %meta.image_id, error = %e, "re-encode failed, frame dropped");
                    continue;
                }
            };

            debug!(
                image_id = %meta.image_id,
                seq = meta.seq,
                keypoints = features.len(),
                "frame processed"
            );
            let out = FeatureEnvelope { meta, image: jpeg, features: codec::encode(&features) };
            output.send(out.into_parts()?)?;
            processed += 1;
        }

        info!(processed, "extraction stage stopped");
        Ok(())
    }
}

/// Re-encode a decoded image to the wire JPEG format.
fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    let rgb = img.to_rgb8();
    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    encoder
        .encode(rgb.as_raw(), rgb.width(), rgb.height(), image::ExtendedColorType::Rgb8)
        .map_err(|e| ApertureError::Extract(format!("jpeg encode failed: {}", e)))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aperture_core::types::{
        now_utc_iso8601, DescriptorMatrix, FeatureSet, FrameId, FrameMeta, Keypoint,
    };
    use image::{ImageBuffer, Rgb};
    use std::time::Duration;

    struct Harness {
        feed: PushSocket,
        sink: PullSocket,
        cancel: CancelToken,
        task: tokio::task::JoinHandle<Result<()>>,
    }

    async fn start_stage<D: FeatureDetector + 'static>(detector: D) -> Harness {
        let feed = PushSocket::bind("127.0.0.1:0").await.unwrap();
        let mut input = PullSocket::connect(&feed.local_addr().to_string());
        let output = PushSocket::bind("127.0.0.1:0").await.unwrap();
        let sink = PullSocket::connect(&output.local_addr().to_string());

        let cancel = CancelToken::new();
        let stage = ExtractStage::new(detector, cancel.clone());
        let task = tokio::spawn(async move { stage.run(&mut input, &output).await });

        Harness { feed, sink, cancel, task }
    }

    fn jpeg_frame(w: u32, h: u32) -> Vec<u8> {
        let img =
            DynamicImage::ImageRgb8(ImageBuffer::from_pixel(w, h, Rgb([200u8, 100, 50])));
        encode_jpeg(&img, 90).unwrap()
    }

    fn capture_parts(seq: u64, image: Vec<u8>) -> Vec<Vec<u8>> {
        let meta = FrameMeta {
            image_id: FrameId::new(),
            timestamp: now_utc_iso8601(),
            width: 16,
            height: 16,
            encoding: "jpg".to_string(),
            seq,
            num_keypoints: None,
        };
        CaptureEnvelope { meta, image }.into_parts().unwrap()
    }

    fn sample_features() -> FeatureSet {
        let kp = Keypoint {
            x: 1.0,
            y: 2.0,
            size: 5.0,
            angle: 0.0,
            response: 1.0,
            octave: 0,
            class_id: -1,
        };
        FeatureSet::new(
            vec![kp],
            DescriptorMatrix::from_f32(1, 2, vec![0.1, 0.2]).unwrap(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_enriches_and_forwards_three_parts() {
        let expected = sample_features();
        let harness = start_stage(MockDetector::with_features(expected.clone())).await;
        let mut sink = harness.sink;

        let parts = capture_parts(5, jpeg_frame(16, 16));
        let sent_id = CaptureEnvelope::from_parts(parts.clone()).unwrap().meta.image_id;
        harness.feed.send(parts).unwrap();

        let out = tokio::time::timeout(Duration::from_secs(5), sink.recv())
            .await
            .unwrap();
        let envelope = FeatureEnvelope::from_parts(out).unwrap();

        // Identity passes through; only the keypoint count is added.
        assert_eq!(envelope.meta.image_id, sent_id);
        assert_eq!(envelope.meta.seq, 5);
        assert_eq!(envelope.meta.num_keypoints, Some(1));
        assert!(image::load_from_memory(&envelope.image).is_ok());
        assert_eq!(codec::decode(&envelope.features), expected);

        harness.cancel.cancel();
        harness.task.abort();
    }

    #[tokio::test]
    async fn test_undecodable_image_emits_nothing_downstream() {
        let harness = start_stage(MockDetector::empty()).await;
        let mut sink = harness.sink;

        harness
            .feed
            .send(capture_parts(1, b"not an image at all".to_vec()))
            .unwrap();

        // Bounded wait: nothing may arrive for the dropped frame.
        let nothing = tokio::time::timeout(Duration::from_millis(300), sink.recv()).await;
        assert!(nothing.is_err());

        // The stage is still alive and processes the next good frame.
        harness.feed.send(capture_parts(2, jpeg_frame(16, 16))).unwrap();
        let out = tokio::time::timeout(Duration::from_secs(5), sink.recv())
            .await
            .unwrap();
        let envelope = FeatureEnvelope::from_parts(out).unwrap();
        assert_eq!(envelope.meta.seq, 2);

        harness.cancel.cancel();
        harness.task.abort();
    }

    #[tokio::test]
    async fn test_empty_detection_sends_empty_blob() {
        let harness = start_stage(MockDetector::empty()).await;
        let mut sink = harness.sink;

        harness.feed.send(capture_parts(1, jpeg_frame(16, 16))).unwrap();

        let out = tokio::time::timeout(Duration::from_secs(5), sink.recv())
            .await
            .unwrap();
        let envelope = FeatureEnvelope::from_parts(out).unwrap();
        assert_eq!(envelope.meta.num_keypoints, Some(0));
        assert_eq!(envelope.features.len(), codec::HEADER_LEN);
        assert!(codec::decode(&envelope.features).is_empty());

        harness.cancel.cancel();
        harness.task.abort();
    }

    #[tokio::test]
    async fn test_real_detector_end_to_end_on_textured_frame() {
        let harness = start_stage(FastDetector::new(20, 50)).await;
        let mut sink = harness.sink;

        // A bright square on black gives the detector corners to find.
        let img = DynamicImage::ImageRgb8(ImageBuffer::from_fn(64, 64, |x, y| {
            if (24..40).contains(&x) && (24..40).contains(&y) {
                Rgb([255u8, 255, 255])
            } else {
                Rgb([0u8, 0, 0])
            }
        }));
        let frame = encode_jpeg(&img, 95).unwrap();
        harness.feed.send(capture_parts(1, frame)).unwrap();

        let out = tokio::time::timeout(Duration::from_secs(5), sink.recv())
            .await
            .unwrap();
        let envelope = FeatureEnvelope::from_parts(out).unwrap();
        let count = envelope.meta.num_keypoints.unwrap();
        assert!(count > 0);

        let features = codec::decode(&envelope.features);
        assert_eq!(features.len() as u32, count);

        harness.cancel.cancel();
        harness.task.abort();
    }
}
