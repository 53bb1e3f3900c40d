use beacon_core::BeaconError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HookError {
    #[error("Failed to read stdin: {0}")]
    Stdin(#[source] std::io::Error),

    #[error("Malformed input: {0}")]
    Malformed(String),

    #[error(transparent)]
    Core(#[from] BeaconError),
}

pub type Result<T> = std::result::Result<T, HookError>;
