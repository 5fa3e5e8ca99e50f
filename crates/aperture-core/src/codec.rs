//! Binary codec for the feature blob.
//!
//! This is the one byte layout every stage must produce and consume
//! identically, little-endian throughout:
//!
//! ```text
//! u32 N            keypoint count
//! u32 D            descriptor width (0 if none)
//! u8  desc_type    0 = f32 rows, 1 = byte rows
//! N x record:
//!     f32 x, y, size, angle, response
//!     i32 octave, class_id
//!     D descriptor elements (4 bytes each for f32, 1 for bytes)
//! ```
//!
//! Decoding is lenient by contract: a buffer shorter than the header yields
//! an empty set, and a buffer that ends mid-record yields the records that
//! parsed completely. Callers relying on best-effort partial decode depend
//! on this, so `decode` has no error path.

use crate::types::{
    DescriptorData, DescriptorMatrix, DescriptorType, FeatureSet, Keypoint,
};

/// Fixed header size: N + D + desc_type.
pub const HEADER_LEN: usize = 9;

/// Per-record fixed portion: five f32 fields plus two i32 fields.
const RECORD_META_LEN: usize = 28;

const TYPE_F32: u8 = 0;
const TYPE_U8: u8 = 1;

/// Exact blob length for `n` keypoints of descriptor width `d`.
pub fn encoded_len(n: usize, d: usize, ty: DescriptorType) -> usize {
    HEADER_LEN + n * (RECORD_META_LEN + d * ty.elem_size())
}

/// Serialize a feature set to its canonical blob.
pub fn encode(set: &FeatureSet) -> Vec<u8> {
    let n = set.len();
    let desc = set.descriptors();
    let d = desc.cols();
    let ty = desc.descriptor_type();

    let mut w = ByteWriter::with_capacity(encoded_len(n, d, ty));
    w.put_u32(n as u32);
    w.put_u32(d as u32);
    w.put_u8(match ty {
        DescriptorType::F32 => TYPE_F32,
        DescriptorType::U8 => TYPE_U8,
    });

    for (i, kp) in set.keypoints().iter().enumerate() {
        w.put_f32(kp.x);
        w.put_f32(kp.y);
        w.put_f32(kp.size);
        w.put_f32(kp.angle);
        w.put_f32(kp.response);
        w.put_i32(kp.octave);
        w.put_i32(kp.class_id);

        if d > 0 {
            match desc.data() {
                DescriptorData::F32(_) => {
                    for v in desc.row_f32(i).unwrap_or(&[]) {
                        w.put_f32(*v);
                    }
                }
                DescriptorData::U8(_) => {
                    w.put_bytes(desc.row_u8(i).unwrap_or(&[]));
                }
            }
        }
    }

    w.into_inner()
}

/// Deserialize a blob back into a feature set.
///
/// Never fails: truncated input produces a shorter (possibly empty) result.
/// A record counts only if its keypoint fields *and* its descriptor row are
/// both complete; a record cut off mid-row is discarded.
pub fn decode(blob: &[u8]) -> FeatureSet {
    if blob.len() < HEADER_LEN {
        return FeatureSet::empty();
    }

    let mut r = ByteReader::new(blob);
    // Header reads cannot fail past the length check above.
    let n = r.take_u32().unwrap_or(0) as usize;
    let d = r.take_u32().unwrap_or(0) as usize;
    let ty = match r.take_u8().unwrap_or(TYPE_F32) {
        TYPE_F32 => DescriptorType::F32,
        _ => DescriptorType::U8,
    };

    // Cap the reservation by what the buffer can actually hold, so a bogus
    // header cannot force a huge allocation.
    let record_len = RECORD_META_LEN + d * ty.elem_size();
    let parsable = r.remaining() / record_len.max(1);
    let mut keypoints = Vec::with_capacity(n.min(parsable));
    let mut f32_data: Vec<f32> = Vec::new();
    let mut u8_data: Vec<u8> = Vec::new();

    for _ in 0..n {
        let Some(kp) = take_keypoint(&mut r) else { break };

        if d > 0 {
            match ty {
                DescriptorType::F32 => {
                    let Some(bytes) = r.take_slice(d * 4) else { break };
                    f32_data.extend(
                        bytes
                            .chunks_exact(4)
                            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])),
                    );
                }
                DescriptorType::U8 => {
                    let Some(bytes) = r.take_slice(d) else { break };
                    u8_data.extend_from_slice(bytes);
                }
            }
        }

        keypoints.push(kp);
    }

    let rows = keypoints.len();
    let descriptors = match ty {
        DescriptorType::F32 => DescriptorMatrix::from_f32(rows, d, f32_data),
        DescriptorType::U8 => DescriptorMatrix::from_u8(rows, d, u8_data),
    }
    .unwrap_or_else(|_| DescriptorMatrix::empty());

    FeatureSet { keypoints, descriptors }
}

fn take_keypoint(r: &mut ByteReader<'_>) -> Option<Keypoint> {
    Some(Keypoint {
        x: r.take_f32()?,
        y: r.take_f32()?,
        size: r.take_f32()?,
        angle: r.take_f32()?,
        response: r.take_f32()?,
        octave: r.take_i32()?,
        class_id: r.take_i32()?,
    })
}

// =============================================================================
// Fixed-width cursor primitives
// =============================================================================

/// Append-only little-endian buffer writer.
struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    fn with_capacity(cap: usize) -> Self {
        Self { buf: Vec::with_capacity(cap) }
    }

    fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_f32(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_bytes(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

/// Little-endian cursor reader; every take returns `None` past the end.
struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take_slice(&mut self, len: usize) -> Option<&'a [u8]> {
        if self.remaining() < len {
            return None;
        }
        let s = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Some(s)
    }

    fn take_u8(&mut self) -> Option<u8> {
        self.take_slice(1).map(|s| s[0])
    }

    fn take_u32(&mut self) -> Option<u32> {
        self.take_slice(4)
            .map(|s| u32::from_le_bytes([s[0], s[1], s[2], s[3]]))
    }

    fn take_i32(&mut self) -> Option<i32> {
        self.take_slice(4)
            .map(|s| i32::from_le_bytes([s[0], s[1], s[2], s[3]]))
    }

    fn take_f32(&mut self) -> Option<f32> {
        self.take_slice(4)
            .map(|s| f32::from_le_bytes([s[0], s[1], s[2], s[3]]))
    }
}
