//! Aperture store crate - the terminal stage of the pipeline.
//!
//! Receives three-part feature envelopes, writes the image bytes to a flat
//! file store, and upserts one SQLite row per `image_id` holding the
//! metadata fields and the raw feature blob. A failed insert is logged and
//! the message dropped; nothing is retried.

pub mod db;
pub mod filestore;
pub mod migrations;
pub mod repository;

use std::sync::Arc;

use tracing::{debug, info, warn};

use aperture_core::{CancelToken, FeatureEnvelope, Result};
use aperture_transport::PullSocket;

pub use db::Database;
pub use filestore::FileStore;
pub use repository::{FrameRecord, FrameRepository};

/// The Persistence stage loop.
pub struct StoreStage {
    repo: FrameRepository,
    files: FileStore,
    cancel: CancelToken,
}

impl StoreStage {
    pub fn new(db: Arc<Database>, files: FileStore, cancel: CancelToken) -> Self {
        Self { repo: FrameRepository::new(db), files, cancel }
    }

    /// Receive feature envelopes on `input` and persist them until
    /// cancelled.
    pub async fn run(&self, input: &mut PullSocket) -> Result<()> {
        info!(dir = %self.files.dir().display(), "persistence stage started");
        let mut stored: u64 = 0;

        while !self.cancel.is_cancelled() {
            let parts = input.recv().await;
            let envelope = match FeatureEnvelope::from_parts(parts) {
                Ok(env) => env,
                Err(e) => {
                    warn!(error = %e, "malformed feature message dropped");
                    continue;
                }
            };
            let meta = envelope.meta;
            let image_id = meta.image_id.to_string();

            let path = match self.files.write(&image_id, &meta.encoding, &envelope.image) {
                Ok(path) => path,
                Err(e) => {
                    warn!(image_id = %image_id, error = %e, "image write failed, frame dropped");
                    continue;
                }
            };

            let record = FrameRecord {
                image_id: image_id.clone(),
                seq: meta.seq as i64,
                timestamp: meta.timestamp,
                path: path.to_string_lossy().to_string(),
                num_keypoints: meta.num_keypoints.unwrap_or(0) as i64,
                features: if envelope.features.is_empty() {
                    None
                } else {
                    Some(envelope.features)
                },
            };
            if let Err(e) = self.repo.upsert(&record) {
                warn!(image_id = %image_id, error = %e, "row insert failed, frame dropped");
                continue;
            }

            stored += 1;
            debug!(
                image_id = %image_id,
                seq = record.seq,
                keypoints = record.num_keypoints,
                "frame persisted"
            );
        }

        info!(stored, "persistence stage stopped");
        Ok(())
    }
}
