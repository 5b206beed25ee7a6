//! Errors the orchestrator itself can return.
//!
//! Runtime failures of the model, the repair pipeline or the fallbacks are
//! never surfaced here; they become recovery decisions or a degraded result.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResilienceError {
    /// Configuration values that cannot work together
    #[error("invalid resilience config: {reason}")]
    InvalidConfig { reason: String },

    /// The caller's cancellation token fired
    #[error("extraction cancelled")]
    Cancelled,
}

impl ResilienceError {
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ResilienceError>;
