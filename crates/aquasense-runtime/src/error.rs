//! Runtime error types.

use aquasense_store::StoreError;

/// Errors raised by a feed action.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("Failed to start feeder: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Feeder timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Feeder failed: {0}")]
    Failed(String),
}

/// Errors raised while running a tick.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Core(#[from] aquasense_core::Error),
}

impl RuntimeError {
    /// Worth retrying on the next tick without operator action.
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            Self::Core(_) => false,
        }
    }
}
