use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Identity
// =============================================================================

/// Unique identifier for one captured frame.
///
/// Generated once by the Capture stage and carried unchanged through the
/// pipeline; the Persistence stage uses it as the primary key and file name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameId(pub Uuid);

impl FrameId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FrameId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// =============================================================================
// Feature data
// =============================================================================

/// A detected point of interest in an image.
///
/// Field semantics follow the common feature-detector convention: `angle` is
/// the orientation in degrees (-1.0 when the detector leaves it undefined),
/// `octave` packs the pyramid level, and `class_id` is -1 when unset.
///
/// Deliberately not serde-serializable: the feature blob (see [`crate::codec`])
/// is the only valid encoding of feature data on the wire or at rest.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub size: f32,
    pub angle: f32,
    pub response: f32,
    pub octave: i32,
    pub class_id: i32,
}

/// Element type of a descriptor matrix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DescriptorType {
    /// 32-bit float rows (e.g. SIFT-style descriptors).
    F32,
    /// Unsigned byte rows (e.g. binary/patch descriptors).
    U8,
}

impl DescriptorType {
    /// Size in bytes of one descriptor element.
    pub fn elem_size(&self) -> usize {
        match self {
            DescriptorType::F32 => 4,
            DescriptorType::U8 => 1,
        }
    }
}

/// Backing storage for a descriptor matrix, row-major.
#[derive(Clone, Debug, PartialEq)]
pub enum DescriptorData {
    F32(Vec<f32>),
    U8(Vec<u8>),
}

/// A dense `rows x cols` descriptor matrix with a uniform element type.
///
/// Invariant: the backing vector holds exactly `rows * cols` elements.
/// A `rows x 0` matrix is legal and represents keypoints without descriptors.
#[derive(Clone, Debug, PartialEq)]
pub struct DescriptorMatrix {
    rows: usize,
    cols: usize,
    data: DescriptorData,
}

impl DescriptorMatrix {
    /// An empty `0 x 0` float matrix.
    pub fn empty() -> Self {
        Self { rows: 0, cols: 0, data: DescriptorData::F32(Vec::new()) }
    }

    pub fn from_f32(
        rows: usize,
        cols: usize,
        data: Vec<f32>,
    ) -> std::result::Result<Self, &'static str> {
        if data.len() != rows * cols {
            return Err("descriptor data length must equal rows * cols");
        }
        Ok(Self { rows, cols, data: DescriptorData::F32(data) })
    }

    pub fn from_u8(
        rows: usize,
        cols: usize,
        data: Vec<u8>,
    ) -> std::result::Result<Self, &'static str> {
        if data.len() != rows * cols {
            return Err("descriptor data length must equal rows * cols");
        }
        Ok(Self { rows, cols, data: DescriptorData::U8(data) })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn descriptor_type(&self) -> DescriptorType {
        match self.data {
            DescriptorData::F32(_) => DescriptorType::F32,
            DescriptorData::U8(_) => DescriptorType::U8,
        }
    }

    pub fn data(&self) -> &DescriptorData {
        &self.data
    }

    /// Row `i` as f32 elements, or `None` for a byte matrix.
    pub fn row_f32(&self, i: usize) -> Option<&[f32]> {
        match &self.data {
            DescriptorData::F32(v) => Some(&v[i * self.cols..(i + 1) * self.cols]),
            DescriptorData::U8(_) => None,
        }
    }

    /// Row `i` as byte elements, or `None` for a float matrix.
    pub fn row_u8(&self, i: usize) -> Option<&[u8]> {
        match &self.data {
            DescriptorData::U8(v) => Some(&v[i * self.cols..(i + 1) * self.cols]),
            DescriptorData::F32(_) => None,
        }
    }
}

/// The paired keypoints and descriptor matrix detected in one image.
///
/// Invariant: the matrix has exactly one row per keypoint. `N > 0` with
/// `D == 0` (keypoints without descriptors) is represented by an `N x 0`
/// matrix, never by a missing one.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureSet {
    pub(crate) keypoints: Vec<Keypoint>,
    pub(crate) descriptors: DescriptorMatrix,
}

impl FeatureSet {
    pub fn new(
        keypoints: Vec<Keypoint>,
        descriptors: DescriptorMatrix,
    ) -> std::result::Result<Self, &'static str> {
        if descriptors.rows() != keypoints.len() {
            return Err("descriptor matrix must have one row per keypoint");
        }
        Ok(Self { keypoints, descriptors })
    }

    pub fn empty() -> Self {
        Self { keypoints: Vec::new(), descriptors: DescriptorMatrix::empty() }
    }

    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }

    pub fn keypoints(&self) -> &[Keypoint] {
        &self.keypoints
    }

    pub fn descriptors(&self) -> &DescriptorMatrix {
        &self.descriptors
    }
}

// =============================================================================
// Frame metadata
// =============================================================================

/// The textual metadata record carried as the first part of every wire
/// message.
///
/// `num_keypoints` is absent until the Extraction stage fills it in; the
/// field is omitted from the JSON encoding while unset so that capture-stage
/// metadata and extraction-stage metadata stay distinguishable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameMeta {
    pub image_id: FrameId,
    /// Capture time, ISO-8601 UTC (`YYYY-MM-DDThh:mm:ssZ`).
    pub timestamp: String,
    pub width: u32,
    pub height: u32,
    /// Byte-format tag of the image part (e.g. "jpg").
    pub encoding: String,
    /// 1-based send sequence of the capture stage instance.
    pub seq: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_keypoints: Option<u32>,
}

impl FrameMeta {
    /// Encode as the UTF-8 JSON wire part.
    pub fn to_bytes(&self) -> crate::error::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode from the UTF-8 JSON wire part.
    pub fn from_bytes(bytes: &[u8]) -> crate::error::Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Current UTC time formatted as ISO-8601 `YYYY-MM-DDThh:mm:ssZ`.
pub fn now_utc_iso8601() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

// =============================================================================
// Cooperative cancellation
// =============================================================================

/// Shared stop signal for stage loops.
///
/// Cancellation is cooperative: stages check the token at loop-iteration
/// boundaries only. An in-flight receive or sleep is never interrupted.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}
