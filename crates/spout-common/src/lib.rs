pub mod errors;
pub mod types;

pub use errors::{BridgeError, ConfigError, SpoutError};
pub use types::{ChunkNotification, SessionKey, StreamTag};

pub type Result<T> = std::result::Result<T, SpoutError>;
