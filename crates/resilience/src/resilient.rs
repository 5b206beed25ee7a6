use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use extract::{GenerationConfig, Generator, HybridExtractor, RegexFallback};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::ResilienceError;
use crate::orchestrator::{Fallbacks, ResilienceOrchestrator, ResilientOutcome};

/// Strategy name used when a [`Resilient`] generator is called through the
/// [`Generator`] trait.
pub const GENERATOR_STRATEGY: &str = "llm";

/// A generator bound to its fallbacks and a shared orchestrator.
///
/// As a [`Generator`] it returns the recovered result serialized as JSON, so
/// it can stand in wherever a plain generator is expected.
pub struct Resilient<G> {
    generator: G,
    orchestrator: Arc<ResilienceOrchestrator>,
    regex: Option<Arc<dyn RegexFallback>>,
    hybrid: Option<Arc<dyn HybridExtractor>>,
}

impl<G: Generator> Resilient<G> {
    pub fn new(generator: G, orchestrator: Arc<ResilienceOrchestrator>) -> Self {
        Self {
            generator,
            orchestrator,
            regex: None,
            hybrid: None,
        }
    }

    pub fn with_regex_fallback(mut self, regex: Arc<dyn RegexFallback>) -> Self {
        self.regex = Some(regex);
        self
    }

    pub fn with_hybrid_extractor(mut self, hybrid: Arc<dyn HybridExtractor>) -> Self {
        self.hybrid = Some(hybrid);
        self
    }

    pub fn orchestrator(&self) -> &Arc<ResilienceOrchestrator> {
        &self.orchestrator
    }

    fn fallbacks(&self) -> Fallbacks<'_> {
        Fallbacks {
            regex: self.regex.as_deref(),
            hybrid: self.hybrid.as_deref(),
        }
    }

    pub async fn extract(
        &self,
        content: &str,
        strategy_name: &str,
        config: &GenerationConfig,
    ) -> Result<ResilientOutcome, ResilienceError> {
        self.orchestrator
            .execute_with_resilience(
                &self.generator,
                content,
                strategy_name,
                config,
                self.fallbacks(),
            )
            .await
    }

    pub async fn extract_with_cancel(
        &self,
        content: &str,
        strategy_name: &str,
        config: &GenerationConfig,
        cancel: &CancellationToken,
    ) -> Result<ResilientOutcome, ResilienceError> {
        self.orchestrator
            .execute_with_cancel(
                &self.generator,
                content,
                strategy_name,
                config,
                self.fallbacks(),
                cancel,
            )
            .await
    }
}

#[async_trait]
impl<G: Generator> Generator for Resilient<G> {
    async fn generate(&self, content: &str, config: &GenerationConfig) -> Result<String> {
        let outcome = self.extract(content, GENERATOR_STRATEGY, config).await?;
        if !outcome.success {
            bail!(
                "extraction failed after {} attempts: {:?}",
                outcome.metadata.attempts,
                outcome.metadata.failure_kinds
            );
        }
        serde_json::to_string(&outcome.result).context("Failed to serialize recovered result")
    }
}
