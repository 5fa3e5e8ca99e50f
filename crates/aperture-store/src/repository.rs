//! SQLite-backed frame persistence.

use std::sync::Arc;

use rusqlite::OptionalExtension;

use aperture_core::ApertureError;

use crate::db::Database;

/// One persisted pipeline result, keyed by `image_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRecord {
    pub image_id: String,
    pub seq: i64,
    pub timestamp: String,
    /// Where the image bytes were written in the file store.
    pub path: String,
    pub num_keypoints: i64,
    /// The raw feature blob; `None` when the producer sent no blob bytes.
    pub features: Option<Vec<u8>>,
}

/// Repository for frame rows.
pub struct FrameRepository {
    db: Arc<Database>,
}

impl FrameRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert or replace the row for `record.image_id`.
    ///
    /// A repeated `image_id` silently replaces the prior row; upsert never
    /// errors on a duplicate key.
    pub fn upsert(&self, record: &FrameRecord) -> Result<(), ApertureError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO frames (image_id, seq, timestamp, path, num_keypoints, features)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    record.image_id,
                    record.seq,
                    record.timestamp,
                    record.path,
                    record.num_keypoints,
                    record.features,
                ],
            )
            .map_err(|e| ApertureError::Storage(format!("Failed to upsert frame: {}", e)))?;
            Ok(())
        })
    }

    /// Find a frame row by its image id.
    pub fn find_by_id(&self, image_id: &str) -> Result<Option<FrameRecord>, ApertureError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT image_id, seq, timestamp, path, num_keypoints, features
                 FROM frames WHERE image_id = ?1",
                rusqlite::params![image_id],
                |row| {
                    Ok(FrameRecord {
                        image_id: row.get(0)?,
                        seq: row.get(1)?,
                        timestamp: row.get(2)?,
                        path: row.get(3)?,
                        num_keypoints: row.get(4)?,
                        features: row.get(5)?,
                    })
                },
            )
            .optional()
            .map_err(|e| ApertureError::Storage(e.to_string()))
        })
    }

    /// The most recently sequenced frame, if any.
    pub fn latest(&self) -> Result<Option<FrameRecord>, ApertureError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT image_id, seq, timestamp, path, num_keypoints, features
                 FROM frames ORDER BY seq DESC LIMIT 1",
                [],
                |row| {
                    Ok(FrameRecord {
                        image_id: row.get(0)?,
                        seq: row.get(1)?,
                        timestamp: row.get(2)?,
                        path: row.get(3)?,
                        num_keypoints: row.get(4)?,
                        features: row.get(5)?,
                    })
                },
            )
            .optional()
            .map_err(|e| ApertureError::Storage(e.to_string()))
        })
    }

    /// Count persisted frames.
    pub fn count(&self) -> Result<u64, ApertureError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM frames", [], |row| row.get(0))
                .map_err(|e| ApertureError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> FrameRepository {
        FrameRepository::new(Arc::new(Database::in_memory().unwrap()))
    }

    fn record(id: &str, seq: i64) -> FrameRecord {
        FrameRecord {
            image_id: id.to_string(),
            seq,
            timestamp: "2026-08-06T12:00:00Z".to_string(),
            path: format!("images/{}.jpg", id),
            num_keypoints: 12,
            features: Some(vec![0u8; 9]),
        }
    }

    #[test]
    fn test_upsert_and_find() {
        let repo = repo();
        let rec = record("frame-1", 1);
        repo.upsert(&rec).unwrap();

        let found = repo.find_by_id("frame-1").unwrap().unwrap();
        assert_eq!(found, rec);
        assert!(repo.find_by_id("missing").unwrap().is_none());
    }

    #[test]
    fn test_repeated_image_id_replaces_prior_row() {
        let repo = repo();
        repo.upsert(&record("frame-1", 1)).unwrap();

        let mut second = record("frame-1", 2);
        second.num_keypoints = 99;
        repo.upsert(&second).unwrap();

        // Exactly one row survives, and it is the second write.
        assert_eq!(repo.count().unwrap(), 1);
        let found = repo.find_by_id("frame-1").unwrap().unwrap();
        assert_eq!(found.seq, 2);
        assert_eq!(found.num_keypoints, 99);
    }

    #[test]
    fn test_null_feature_blob_round_trips() {
        let repo = repo();
        let mut rec = record("frame-2", 1);
        rec.features = None;
        repo.upsert(&rec).unwrap();

        let found = repo.find_by_id("frame-2").unwrap().unwrap();
        assert_eq!(found.features, None);
    }

    #[test]
    fn test_feature_blob_bytes_are_preserved() {
        let repo = repo();
        let mut rec = record("frame-3", 1);
        rec.features = Some(vec![1, 2, 3, 254, 255]);
        repo.upsert(&rec).unwrap();

        let found = repo.find_by_id("frame-3").unwrap().unwrap();
        assert_eq!(found.features.as_deref(), Some(&[1u8, 2, 3, 254, 255][..]));
    }

    #[test]
    fn test_latest_returns_highest_seq() {
        let repo = repo();
        assert!(repo.latest().unwrap().is_none());
        repo.upsert(&record("a", 1)).unwrap();
        repo.upsert(&record("b", 5)).unwrap();
        repo.upsert(&record("c", 3)).unwrap();
        assert_eq!(repo.latest().unwrap().unwrap().image_id, "b");
    }

    #[test]
    fn test_count_tracks_distinct_ids() {
        let repo = repo();
        repo.upsert(&record("a", 1)).unwrap();
        repo.upsert(&record("b", 2)).unwrap();
        repo.upsert(&record("a", 3)).unwrap();
        assert_eq!(repo.count().unwrap(), 2);
    }
}
