//! Aperture core crate - shared domain types, the feature codec, the wire
//! envelope, configuration, and the workspace error type.
//!
//! Everything the three stages must agree on lives here; the stages
//! themselves live in their own crates and depend only on this one plus the
//! transport.

pub mod codec;
pub mod config;
pub mod error;
pub mod types;
pub mod wire;

pub use config::ApertureConfig;
pub use error::{ApertureError, Result};
pub use types::*;
pub use wire::{CaptureEnvelope, FeatureEnvelope};
