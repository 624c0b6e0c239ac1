use std::path::PathBuf;

/// Errors surfaced to the frontend as rejected bridge calls.
///
/// None of these are fatal to the host process; the display string is the
/// human-readable rejection message the frontend sees.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("failed to create pipes: {0}")]
    ResourceExhausted(String),

    #[error("failed to spawn process: {0}")]
    SpawnFailed(String),

    #[error("failed to write data: {0}")]
    WriteFailed(String),

    #[error("failed to close one or more pipes: {0}")]
    CloseFailed(String),

    #[error("reader already in use")]
    ConsumerBusy,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("config parse error: {0}")]
    ParseError(String),

    #[error("config validation error: {0}")]
    ValidationError(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SpoutError {
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bridge_error_display() {
        let err = BridgeError::InvalidArgument("fd".into());
        assert_eq!(err.to_string(), "invalid argument: fd");

        let err = BridgeError::ResourceExhausted("too many open files".into());
        assert_eq!(
            err.to_string(),
            "failed to create pipes: too many open files"
        );

        let err = BridgeError::SpawnFailed("sh not found".into());
        assert_eq!(err.to_string(), "failed to spawn process: sh not found");

        let err = BridgeError::WriteFailed("broken pipe".into());
        assert_eq!(err.to_string(), "failed to write data: broken pipe");

        let err = BridgeError::CloseFailed("fd 7".into());
        assert_eq!(err.to_string(), "failed to close one or more pipes: fd 7");

        assert_eq!(BridgeError::ConsumerBusy.to_string(), "reader already in use");
    }

    #[test]
    fn config_error_display() {
        let err = ConfigError::FileNotFound(PathBuf::from("/tmp/missing.json"));
        assert_eq!(err.to_string(), "config file not found: /tmp/missing.json");

        let err = ConfigError::ParseError("unexpected token".into());
        assert_eq!(err.to_string(), "config parse error: unexpected token");

        let err = ConfigError::ValidationError("width must be non-zero".into());
        assert_eq!(
            err.to_string(),
            "config validation error: width must be non-zero"
        );
    }

    #[test]
    fn spout_error_from_bridge() {
        let err: SpoutError = BridgeError::WriteFailed("stale fd".into()).into();
        assert!(matches!(err, SpoutError::Bridge(_)));
        assert!(err.to_string().contains("stale fd"));
    }

    #[test]
    fn spout_error_from_config() {
        let err: SpoutError = ConfigError::ParseError("bad json".into()).into();
        assert!(matches!(err, SpoutError::Config(_)));
        assert!(err.to_string().contains("bad json"));
    }

    #[test]
    fn spout_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err: SpoutError = io_err.into();
        assert!(matches!(err, SpoutError::Io(_)));
        assert!(err.to_string().contains("file missing"));
    }
}
