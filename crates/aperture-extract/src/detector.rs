//! Feature detectors.
//!
//! The pipeline only requires that a detector hand back a [`FeatureSet`];
//! which algorithm produced it is not part of any contract. `FastDetector`
//! is the shipped default: FAST-9 segment-test corners with 32-byte patch
//! descriptors. `MockDetector` returns canned output for stage tests.

use image::GrayImage;

use aperture_core::types::{DescriptorMatrix, FeatureSet, Keypoint};
use aperture_core::Result;

/// Detects keypoints and computes their descriptors for one image.
pub trait FeatureDetector: Send + Sync {
    fn detect(&self, image: &GrayImage) -> Result<FeatureSet>;
}

/// Descriptor width produced by [`FastDetector`].
pub const DESCRIPTOR_WIDTH: usize = 32;

/// Sampling margin: descriptors read up to 4 pixels from the keypoint.
const BORDER: u32 = 4;

/// Bresenham circle of radius 3 used by the FAST segment test.
const CIRCLE: [(i32, i32); 16] = [
    (0, -3),
    (1, -3),
    (2, -2),
    (3, -1),
    (3, 0),
    (3, 1),
    (2, 2),
    (1, 3),
    (0, 3),
    (-1, 3),
    (-2, 2),
    (-3, 1),
    (-3, 0),
    (-3, -1),
    (-2, -2),
    (-1, -3),
];

/// Minimum consecutive circle pixels that must agree for a corner.
const ARC_LEN: usize = 9;

/// FAST-9 corner detector with non-maximum suppression and raw intensity
/// patch descriptors.
///
/// Deterministic: the same image always yields the same feature set, in the
/// same order.
#[derive(Debug, Clone)]
pub struct FastDetector {
    threshold: u8,
    max_keypoints: u32,
}

impl FastDetector {
    /// `max_keypoints` caps the output by corner response; 0 keeps all.
    pub fn new(threshold: u8, max_keypoints: u32) -> Self {
        Self { threshold, max_keypoints }
    }
}

impl FeatureDetector for FastDetector {
    fn detect(&self, image: &GrayImage) -> Result<FeatureSet> {
        let (w, h) = image.dimensions();
        if w <= 2 * BORDER || h <= 2 * BORDER {
            return Ok(FeatureSet::empty());
        }

        // Corner response map; zero means "not a corner".
        let stride = w as usize;
        let mut response = vec![0f32; stride * h as usize];
        for y in BORDER..h - BORDER {
            for x in BORDER..w - BORDER {
                if let Some(score) = corner_score(image, x, y, self.threshold) {
                    response[y as usize * stride + x as usize] = score;
                }
            }
        }

        // 3x3 non-maximum suppression keeps one keypoint per local peak.
        let mut selected: Vec<(u32, u32, f32)> = Vec::new();
        for y in BORDER..h - BORDER {
            for x in BORDER..w - BORDER {
                let score = response[y as usize * stride + x as usize];
                if score <= 0.0 {
                    continue;
                }
                let mut is_max = true;
                'nms: for dy in -1i32..=1 {
                    for dx in -1i32..=1 {
                        if dx == 0 && dy == 0 {
                            continue;
                        }
                        let nx = (x as i32 + dx) as usize;
                        let ny = (y as i32 + dy) as usize;
                        if response[ny * stride + nx] > score {
                            is_max = false;
                            break 'nms;
                        }
                    }
                }
                if is_max {
                    selected.push((x, y, score));
                }
            }
        }

        if self.max_keypoints > 0 && selected.len() > self.max_keypoints as usize {
            selected.sort_by(|a, b| b.2.total_cmp(&a.2));
            selected.truncate(self.max_keypoints as usize);
        }

        let mut keypoints = Vec::with_capacity(selected.len());
        let mut descriptors = Vec::with_capacity(selected.len() * DESCRIPTOR_WIDTH);
        for (x, y, score) in selected {
            keypoints.push(Keypoint {
                x: x as f32,
                y: y as f32,
                size: 7.0,
                angle: -1.0,
                response: score,
                octave: 0,
                class_id: -1,
            });
            sample_patch(image, x, y, &mut descriptors);
        }

        let rows = keypoints.len();
        let matrix = DescriptorMatrix::from_u8(rows, DESCRIPTOR_WIDTH, descriptors)
            .map_err(|e| aperture_core::ApertureError::Extract(e.to_string()))?;
        FeatureSet::new(keypoints, matrix)
            .map_err(|e| aperture_core::ApertureError::Extract(e.to_string()))
    }
}

/// FAST-9 segment test at (x, y). Returns the corner response, or `None`
/// when the pixel is not a corner.
fn corner_score(image: &GrayImage, x: u32, y: u32, threshold: u8) -> Option<f32> {
    let center = image.get_pixel(x, y).0[0] as i16;
    let t = threshold as i16;

    let mut brighter = [false; 16];
    let mut darker = [false; 16];
    let mut score = 0f32;
    for (i, (dx, dy)) in CIRCLE.iter().enumerate() {
        let p = image
            .get_pixel((x as i32 + dx) as u32, (y as i32 + dy) as u32)
            .0[0] as i16;
        let diff = p - center;
        brighter[i] = diff >= t;
        darker[i] = -diff >= t;
        score += diff.unsigned_abs() as f32;
    }

    if max_circular_run(&brighter) >= ARC_LEN || max_circular_run(&darker) >= ARC_LEN {
        Some(score)
    } else {
        None
    }
}

/// Longest run of `true` values treating the array as a ring.
fn max_circular_run(flags: &[bool; 16]) -> usize {
    let mut best = 0;
    let mut run = 0;
    // Walking the ring twice captures runs that wrap the seam.
    for i in 0..32 {
        if flags[i % 16] {
            run += 1;
            best = best.max(run.min(16));
        } else {
            run = 0;
        }
    }
    best
}

/// Append the 32-byte raw intensity patch around (x, y): an 8x4 sample grid
/// within the border margin.
fn sample_patch(image: &GrayImage, x: u32, y: u32, out: &mut Vec<u8>) {
    for i in 0..DESCRIPTOR_WIDTH {
        let dx = (i % 8) as i32 - 4;
        let dy = ((i / 8) as i32) * 2 - 3;
        let px = image
            .get_pixel((x as i32 + dx) as u32, (y as i32 + dy) as u32)
            .0[0];
        out.push(px);
    }
}

/// Detector returning a fixed feature set, for exercising the stage loop
/// without depending on image content.
#[derive(Debug, Clone)]
pub struct MockDetector {
    features: FeatureSet,
}

impl MockDetector {
    /// A mock producing no features.
    pub fn empty() -> Self {
        Self { features: FeatureSet::empty() }
    }

    /// A mock producing the given feature set for every image.
    pub fn with_features(features: FeatureSet) -> Self {
        Self { features }
    }
}

impl FeatureDetector for MockDetector {
    fn detect(&self, _image: &GrayImage) -> Result<FeatureSet> {
        Ok(self.features.clone())
    }
}
