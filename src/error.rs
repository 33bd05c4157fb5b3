//! Error taxonomy for the conversion engine.
//!
//! Four failure categories plus cancellation:
//! - `Configuration`: the environment is wrong (encoder binary missing)
//! - `Input`: the source texture is unreadable, corrupt, or zero-sized
//! - `Computation`: an optional numeric step could not run (non-fatal for
//!   callers that can fall back to the unenhanced path)
//! - `Encoding`: the external encoder process failed

use std::path::Path;

/// Errors produced by the texture conversion engine.
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    /// Environment/configuration problem. Hard error - never silently skipped.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Source image is unreadable, corrupt, or has a zero dimension.
    #[error("input error: {0}")]
    Input(String),

    /// A numeric sub-step failed (Toksvig normal map unresolvable, channel
    /// packing below the two-channel minimum). Callers downgrade gracefully.
    #[error("computation error: {0}")]
    Computation(String),

    /// The external encoder returned a nonzero exit status.
    #[error("encoding failed: {0}")]
    Encoding(String),

    /// The conversion was cancelled between phases or mid-encode.
    #[error("conversion cancelled")]
    Cancelled,
}

impl ConvertError {
    /// Encoder binary could not be located.
    pub fn encoder_missing(name: &str) -> Self {
        ConvertError::Configuration(format!(
            "encoder binary '{name}' not found next to the executable or on PATH"
        ))
    }

    /// Source file failed to decode.
    pub fn unreadable(path: &Path, cause: impl std::fmt::Display) -> Self {
        ConvertError::Input(format!("failed to decode {}: {cause}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let e = ConvertError::encoder_missing("toktx");
        assert!(e.to_string().contains("toktx"));
        assert!(e.to_string().starts_with("configuration error"));

        let e = ConvertError::Input("zero dimension".into());
        assert_eq!(e.to_string(), "input error: zero dimension");
    }
}
