use thiserror::Error;

/// Top-level error type for the Aperture pipeline.
///
/// Each variant covers one subsystem. Stage crates return this type directly
/// so that the `?` operator works across crate boundaries without per-crate
/// error plumbing.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ApertureError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Extraction error: {0}")]
    Extract(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Envelope error: {0}")]
    Envelope(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for ApertureError {
    fn from(err: toml::de::Error) -> Self {
        ApertureError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for ApertureError {
    fn from(err: toml::ser::Error) -> Self {
        ApertureError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for ApertureError {
    fn from(err: serde_json::Error) -> Self {
        ApertureError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Aperture operations.
pub type Result<T> = std::result::Result<T, ApertureError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ApertureError::Capture("no images found".to_string());
        assert_eq!(err.to_string(), "Capture error: no images found");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ApertureError = io_err.into();
        assert!(matches!(err, ApertureError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let bad = serde_json::from_str::<serde_json::Value>("{ not json");
        let err: ApertureError = bad.unwrap_err().into();
        assert!(matches!(err, ApertureError::Serialization(_)));
    }

    #[test]
    fn test_toml_error_conversion() {
        let bad: std::result::Result<toml::Value, _> = toml::from_str("key = [[[");
        let err: ApertureError = bad.unwrap_err().into();
        assert!(matches!(err, ApertureError::Config(_)));
    }

    #[test]
    fn test_result_type_with_question_mark() {
        fn inner() -> Result<u32> {
            let parsed: std::result::Result<u32, std::io::Error> = Ok(7);
            Ok(parsed?)
        }
        assert_eq!(inner().unwrap(), 7);
    }
}
