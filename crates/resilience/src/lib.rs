pub mod backoff;
pub mod cache;
pub mod chunking;
pub mod config;
pub mod error;
pub mod failure;
pub mod metrics;
pub mod orchestrator;
pub mod resilient;
pub mod strategy;

pub use backoff::BackoffPolicy;
pub use cache::{CacheStats, ResponseCache};
pub use chunking::{ChunkRunner, ChunkedOutcome};
pub use config::{OperationMode, ResilienceConfig};
pub use error::{ResilienceError, Result};
pub use failure::{FailureKind, classify_error, classify_message, classify_response};
pub use metrics::{Metrics, MetricsSnapshot};
pub use orchestrator::{
    AttemptRecord, Fallbacks, ResilienceOrchestrator, ResilientOutcome, ResultMetadata,
};
pub use resilient::Resilient;
pub use strategy::{RecoveryStrategy, StrategyTable};
