use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum BridgeError {
    #[error("Device request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The device answered, but not with a success status. The body is kept
    /// because some firmware still reports its status alongside an error code.
    #[error("Device returned HTTP {status} for {url}")]
    HttpStatus {
        url: String,
        status: u16,
        body: String,
    },

    #[error("Failed to parse device status: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Listener is not running")]
    ListenerNotRunning,

    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

impl BridgeError {
    /// True only when the device could not be reached at all (refused,
    /// timed out, unresolvable). Any answer, error status included, is not a
    /// transport failure.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
