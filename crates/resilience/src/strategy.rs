use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::failure::FailureKind;

/// One corrective action applied after a classified failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecoveryStrategy {
    #[serde(rename = "retry_with_backoff")]
    RetryWithBackoff,
    #[serde(rename = "reduce_context")]
    ReduceContext,
    #[serde(rename = "regex_fallback")]
    FallbackToRegex,
    #[serde(rename = "hybrid_extraction")]
    HybridExtraction,
    #[serde(rename = "chunk_and_retry")]
    ChunkAndRetry,
    #[serde(rename = "use_cached")]
    UseCached,
    #[serde(rename = "skip_and_log")]
    SkipAndLog,
    #[serde(rename = "alternative_prompt")]
    AlternativePrompt,
    #[serde(rename = "simplified_request")]
    SimplifiedRequest,
}

impl RecoveryStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryStrategy::RetryWithBackoff => "retry_with_backoff",
            RecoveryStrategy::ReduceContext => "reduce_context",
            RecoveryStrategy::FallbackToRegex => "regex_fallback",
            RecoveryStrategy::HybridExtraction => "hybrid_extraction",
            RecoveryStrategy::ChunkAndRetry => "chunk_and_retry",
            RecoveryStrategy::UseCached => "use_cached",
            RecoveryStrategy::SkipAndLog => "skip_and_log",
            RecoveryStrategy::AlternativePrompt => "alternative_prompt",
            RecoveryStrategy::SimplifiedRequest => "simplified_request",
        }
    }

    /// Strategies that reshape or delay the request and go back to another
    /// generation attempt, as opposed to producing a result themselves.
    pub fn loops_back(&self) -> bool {
        matches!(
            self,
            RecoveryStrategy::RetryWithBackoff
                | RecoveryStrategy::ReduceContext
                | RecoveryStrategy::AlternativePrompt
                | RecoveryStrategy::SimplifiedRequest
                | RecoveryStrategy::SkipAndLog
        )
    }
}

impl fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered recovery strategies per failure kind. Built once and shared.
#[derive(Debug, Clone)]
pub struct StrategyTable {
    table: HashMap<FailureKind, Vec<RecoveryStrategy>>,
}

impl StrategyTable {
    pub fn standard() -> Self {
        use FailureKind as K;
        use RecoveryStrategy as S;

        let table = HashMap::from([
            (
                K::EmptyResponse,
                vec![
                    S::RetryWithBackoff,
                    S::AlternativePrompt,
                    S::HybridExtraction,
                    S::FallbackToRegex,
                ],
            ),
            (
                K::MalformedJson,
                vec![
                    S::RetryWithBackoff,
                    S::AlternativePrompt,
                    S::HybridExtraction,
                    S::FallbackToRegex,
                ],
            ),
            (
                K::ConnectionError,
                vec![S::FallbackToRegex, S::RetryWithBackoff, S::UseCached],
            ),
            (
                K::Timeout,
                vec![S::ReduceContext, S::RetryWithBackoff, S::ChunkAndRetry, S::FallbackToRegex],
            ),
            (
                K::RateLimit,
                vec![S::RetryWithBackoff, S::UseCached, S::FallbackToRegex],
            ),
            (
                K::ContextOverflow,
                vec![S::ChunkAndRetry, S::ReduceContext, S::FallbackToRegex],
            ),
            (
                K::ServerError,
                vec![S::RetryWithBackoff, S::UseCached, S::FallbackToRegex],
            ),
            (
                K::ModelOverload,
                vec![
                    S::RetryWithBackoff,
                    S::SimplifiedRequest,
                    S::HybridExtraction,
                    S::FallbackToRegex,
                ],
            ),
            (
                K::InvalidFormat,
                vec![S::AlternativePrompt, S::SimplifiedRequest, S::FallbackToRegex, S::SkipAndLog],
            ),
        ]);

        Self { table }
    }

    /// Replace the ordered list for one failure kind
    pub fn with_override(mut self, kind: FailureKind, strategies: Vec<RecoveryStrategy>) -> Self {
        self.table.insert(kind, strategies);
        self
    }

    pub fn strategies_for(&self, kind: FailureKind) -> &[RecoveryStrategy] {
        self.table.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl Default for StrategyTable {
    fn default() -> Self {
        Self::standard()
    }
}
