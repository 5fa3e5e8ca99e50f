//! Aperture capture crate - the source-reading head of the pipeline.
//!
//! Enumerates a directory of images once at startup, then cycles through
//! it: read, re-encode to the wire JPEG format, stamp metadata, send the
//! two-part envelope, sleep the pacing interval. Unreadable files are
//! skipped with a short backoff and never terminate the loop.

use std::path::{Path, PathBuf};
use std::time::Duration;

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GenericImageView};
use tracing::{debug, info, warn};

use aperture_core::config::CaptureConfig;
use aperture_core::{
    now_utc_iso8601, ApertureError, CancelToken, CaptureEnvelope, FrameId, FrameMeta, Result,
};
use aperture_transport::PushSocket;

/// File extensions accepted as source images.
const SOURCE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// The fixed-order list of source images enumerated at INIT.
#[derive(Debug, Clone)]
pub struct SourceSet {
    files: Vec<PathBuf>,
}

impl SourceSet {
    /// Enumerate image files in `dir`, sorted by name for a stable order.
    ///
    /// An empty result is fatal: a capture stage with nothing to send is a
    /// misconfiguration, not a steady state.
    pub fn scan(dir: &Path) -> Result<Self> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
            .map_err(|e| {
                ApertureError::Capture(format!("cannot read source dir {}: {}", dir.display(), e))
            })?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .extension()
                        .and_then(|ext| ext.to_str())
                        .map(|ext| SOURCE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                        == Some(true)
            })
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(ApertureError::Capture(format!(
                "no source images found in {}",
                dir.display()
            )));
        }
        Ok(Self { files })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// The file at cyclic position `idx`.
    pub fn get(&self, idx: usize) -> &Path {
        &self.files[idx % self.files.len()]
    }
}

/// The Capture stage: INIT (enumerate sources), then the send loop until
/// cancelled or, in single-pass mode, until the list is exhausted once.
pub struct CaptureStage {
    config: CaptureConfig,
    cancel: CancelToken,
}

impl CaptureStage {
    pub fn new(config: CaptureConfig, cancel: CancelToken) -> Self {
        Self { config, cancel }
    }

    /// Run the capture loop, sending two-part envelopes on `push`.
    pub async fn run(&self, push: &PushSocket) -> Result<()> {
        let sources = SourceSet::scan(Path::new(&self.config.source_dir))?;
        info!(
            count = sources.len(),
            dir = %self.config.source_dir,
            "capture sources enumerated"
        );

        let interval = Duration::from_millis(self.config.interval_ms);
        let retry = Duration::from_millis(self.config.retry_ms);
        let mut seq: u64 = 0;
        let mut idx: usize = 0;

        while !self.cancel.is_cancelled() {
            if !self.config.loop_source && idx >= sources.len() {
                info!(sent = seq, "source list exhausted, single-pass capture done");
                break;
            }
            let path = sources.get(idx);
            idx += 1;

            let img = match image::open(path) {
                Ok(img) => img,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to read source image");
                    tokio::time::sleep(retry).await;
                    continue;
                }
            };

            let jpeg = match encode_jpeg(&img, self.config.jpeg_quality) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to re-encode image");
                    tokio::time::sleep(retry).await;
                    continue;
                }
            };

            seq += 1;
            let meta = FrameMeta {
                image_id: FrameId::new(),
                timestamp: now_utc_iso8601(),
                width: img.width(),
                height: img.height(),
                encoding: "jpg".to_string(),
                seq,
                num_keypoints: None,
            };
            debug!(seq, image_id = %meta.image_id, path = %path.display(), "frame captured");

            let envelope = CaptureEnvelope { meta, image: jpeg };
            push.send(envelope.into_parts()?)?;

            tokio::time::sleep(interval).await;
        }

        info!(sent = seq, "capture stage stopped");
        Ok(())
    }
}

/// Re-encode a decoded image to the wire JPEG format.
pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    // JPEG has no alpha; flatten to RGB first so PNG sources survive.
    let rgb = img.to_rgb8();
    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    encoder
        .encode(rgb.as_raw(), rgb.width(), rgb.height(), image::ExtendedColorType::Rgb8)
        .map_err(|e| ApertureError::Capture(format!("jpeg encode failed: {}", e)))?;
    Ok(buf)
}
