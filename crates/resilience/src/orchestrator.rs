//! Drives one extraction request through cache lookup, generation attempts,
//! repair and validation, and failure recovery.
//!
//! Every runtime failure of the generator or a fallback is classified and
//! turned into a recovery decision. Callers always get a well-formed
//! [`ResilientOutcome`]; only cancellation and invalid configuration surface
//! as [`ResilienceError`].

use anyhow::anyhow;
use extract::llm::truncate_chars;
use extract::{
    GenerationConfig, Generator, HybridExtractor, JsonRepairer, ParsedResult, PromptStyle,
    RegexFallback, ResponseValidator,
};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::backoff::BackoffPolicy;
use crate::cache::ResponseCache;
use crate::chunking::ChunkRunner;
use crate::config::ResilienceConfig;
use crate::error::{ResilienceError, Result};
use crate::failure::{FailureKind, classify_error, classify_response};
use crate::metrics::{Metrics, TimedOperation};
use crate::strategy::{RecoveryStrategy, StrategyTable};

/// Name recorded as `final_strategy` for cache hits
pub const CACHE_STRATEGY: &str = "cache";
/// Name recorded as `final_strategy` when every strategy failed
pub const EXHAUSTED_STRATEGY: &str = "exhausted";

/// Optional extractors the orchestrator may fall back to.
#[derive(Clone, Copy, Default)]
pub struct Fallbacks<'a> {
    pub regex: Option<&'a dyn RegexFallback>,
    pub hybrid: Option<&'a dyn HybridExtractor>,
}

impl<'a> Fallbacks<'a> {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_regex(mut self, regex: &'a dyn RegexFallback) -> Self {
        self.regex = Some(regex);
        self
    }

    pub fn with_hybrid(mut self, hybrid: &'a dyn HybridExtractor) -> Self {
        self.hybrid = Some(hybrid);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    /// Backoff waited before this attempt
    pub delay_ms: u64,
    pub failure: Option<FailureKind>,
    pub strategies: Vec<RecoveryStrategy>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultMetadata {
    pub request_id: Uuid,
    pub attempts: u32,
    pub strategies_used: Vec<RecoveryStrategy>,
    pub failure_kinds: Vec<FailureKind>,
    pub final_strategy: String,
    pub cached: bool,
    pub processing_time_ms: f64,
    pub confidence: f64,
    pub warnings: Vec<String>,
    pub attempt_log: Vec<AttemptRecord>,
}

impl ResultMetadata {
    fn new(request_id: Uuid) -> Self {
        Self {
            request_id,
            attempts: 0,
            strategies_used: Vec::new(),
            failure_kinds: Vec::new(),
            final_strategy: String::new(),
            cached: false,
            processing_time_ms: 0.0,
            confidence: 0.0,
            warnings: Vec::new(),
            attempt_log: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResilientOutcome {
    pub success: bool,
    /// Empty but well-formed when `success` is false
    pub result: ParsedResult,
    pub metadata: ResultMetadata,
}

/// A usable result and where it came from
struct Resolved {
    result: ParsedResult,
    confidence: f64,
    strategy: String,
    cacheable: bool,
}

enum Recovery {
    Retry,
    Resolved(Resolved),
    Exhausted,
}

/// Mutable state of one request
struct Call<'a> {
    generator: &'a dyn Generator,
    content: &'a str,
    working: String,
    config: GenerationConfig,
    strategy_name: &'a str,
    cache_key: String,
    fallbacks: Fallbacks<'a>,
    cancel: &'a CancellationToken,
    deadline: Option<Instant>,
    used: HashSet<RecoveryStrategy>,
    pending_delay_ms: u64,
    meta: ResultMetadata,
    timer: TimedOperation,
}

impl Call<'_> {
    fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    fn apply(&mut self, strategy: RecoveryStrategy, record: &mut AttemptRecord) {
        record.strategies.push(strategy);
        self.meta.strategies_used.push(strategy);
    }
}

pub struct ResilienceOrchestrator {
    config: ResilienceConfig,
    cache: Arc<ResponseCache>,
    strategies: Arc<StrategyTable>,
    backoff: BackoffPolicy,
    metrics: Arc<Metrics>,
    chunker: Option<ChunkRunner>,
    repairer: JsonRepairer,
    validator: ResponseValidator,
}

impl ResilienceOrchestrator {
    pub fn new(config: ResilienceConfig) -> Result<Self> {
        config.validate()?;

        let cache = Arc::new(ResponseCache::new(
            config.cache_max_entries,
            config.cache_ttl(),
            config.min_confidence_for_cache,
        ));
        let chunker = if config.enable_chunking {
            Some(ChunkRunner::from_config(&config)?)
        } else {
            None
        };

        Ok(Self {
            backoff: BackoffPolicy::from_config(&config),
            cache,
            strategies: Arc::new(StrategyTable::standard()),
            metrics: Metrics::new(),
            chunker,
            repairer: JsonRepairer::new(),
            validator: ResponseValidator::new(),
            config,
        })
    }

    /// Share a cache with other orchestrators
    pub fn with_cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_strategies(mut self, strategies: Arc<StrategyTable>) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub async fn execute_with_resilience(
        &self,
        generator: &dyn Generator,
        content: &str,
        strategy_name: &str,
        config: &GenerationConfig,
        fallbacks: Fallbacks<'_>,
    ) -> Result<ResilientOutcome> {
        self.execute_with_cancel(
            generator,
            content,
            strategy_name,
            config,
            fallbacks,
            &CancellationToken::new(),
        )
        .await
    }

    /// Like [`execute_with_resilience`](Self::execute_with_resilience), but
    /// returns `ResilienceError::Cancelled` as soon as `cancel` fires during a
    /// generation call, a backoff wait or a chunked run.
    pub async fn execute_with_cancel(
        &self,
        generator: &dyn Generator,
        content: &str,
        strategy_name: &str,
        config: &GenerationConfig,
        fallbacks: Fallbacks<'_>,
        cancel: &CancellationToken,
    ) -> Result<ResilientOutcome> {
        let request_id = Uuid::new_v4();
        let span = info_span!(
            "resilient_extract",
            request_id = %request_id,
            strategy = strategy_name
        );

        let call = Call {
            generator,
            content,
            working: content.to_string(),
            config: config.clone(),
            strategy_name,
            cache_key: ResponseCache::key(content, strategy_name, config),
            fallbacks,
            cancel,
            deadline: self.config.overall_deadline().map(|d| Instant::now() + d),
            used: HashSet::new(),
            pending_delay_ms: 0,
            meta: ResultMetadata::new(request_id),
            timer: TimedOperation::start(),
        };

        self.run(call).instrument(span).await
    }

    async fn run(&self, mut call: Call<'_>) -> Result<ResilientOutcome> {
        if self.config.enable_caching {
            if let Some((result, confidence)) = self.cache.lookup(&call.cache_key) {
                debug!("Cache hit");
                self.metrics.record_cache_hit();
                call.meta.cached = true;
                let resolved = Resolved {
                    result,
                    confidence,
                    strategy: CACHE_STRATEGY.to_string(),
                    cacheable: false,
                };
                return Ok(self.succeed(call, resolved));
            }
        }

        let mut attempt: u32 = 0;
        loop {
            if call.cancel.is_cancelled() {
                return Err(ResilienceError::Cancelled);
            }
            if call.deadline_passed() {
                warn!(attempt = attempt, "Overall deadline exceeded, stopping retries");
                call.meta.warnings.push("overall deadline exceeded".to_string());
                break;
            }

            attempt += 1;
            call.meta.attempts = attempt;
            let mut record = AttemptRecord {
                attempt,
                delay_ms: std::mem::take(&mut call.pending_delay_ms),
                failure: None,
                strategies: Vec::new(),
            };

            let kind = match self.generate(&call).await? {
                Err(e) => {
                    warn!(attempt = attempt, error = %e, "Generation failed");
                    classify_error(&e)
                }
                Ok(raw) => {
                    let outcome = self.repairer.repair(&raw);
                    let validation = self.validator.validate(&outcome.value);
                    debug!(
                        attempt = attempt,
                        method = ?outcome.method,
                        stages = outcome.stages.len(),
                        "Repaired response"
                    );

                    match classify_response(outcome.recovered(), &validation) {
                        None => {
                            call.meta.attempt_log.push(record);
                            call.meta.warnings.extend(validation.warnings);
                            let resolved = Resolved {
                                result: validation.result,
                                confidence: validation.confidence,
                                strategy: call.strategy_name.to_string(),
                                cacheable: true,
                            };
                            return Ok(self.succeed(call, resolved));
                        }
                        Some(FailureKind::EmptyResponse) if attempt == 2 => {
                            let hybrid = self
                                .try_terminal(
                                    RecoveryStrategy::HybridExtraction,
                                    &mut call,
                                    &mut record,
                                )
                                .await?;
                            if let Some(resolved) = hybrid {
                                call.meta.attempt_log.push(record);
                                return Ok(self.succeed(call, resolved));
                            }
                            FailureKind::EmptyResponse
                        }
                        Some(kind) => kind,
                    }
                }
            };

            debug!(attempt = attempt, failure = %kind, "Attempt failed");
            record.failure = Some(kind);
            call.meta.failure_kinds.push(kind);
            self.metrics.record_failure(kind);

            let recovery = self.recover(kind, attempt, &mut call, &mut record).await;
            call.meta.attempt_log.push(record);

            match recovery? {
                Recovery::Retry => continue,
                Recovery::Resolved(resolved) => return Ok(self.succeed(call, resolved)),
                Recovery::Exhausted => break,
            }
        }

        // Last resort before giving up
        let mut record = AttemptRecord {
            attempt,
            delay_ms: 0,
            failure: None,
            strategies: Vec::new(),
        };
        let forced = self
            .try_terminal(RecoveryStrategy::FallbackToRegex, &mut call, &mut record)
            .await?;
        if !record.strategies.is_empty() {
            call.meta.attempt_log.push(record);
        }
        match forced {
            Some(resolved) => Ok(self.succeed(call, resolved)),
            None => Ok(self.fail(call)),
        }
    }

    /// One generation call, raced against cancellation and the overall deadline
    async fn generate(&self, call: &Call<'_>) -> Result<anyhow::Result<String>> {
        let generator = call.generator;
        let request = async {
            match call.deadline {
                Some(deadline) => tokio::time::timeout_at(
                    deadline,
                    generator.generate(&call.working, &call.config),
                )
                .await
                .unwrap_or_else(|_| Err(anyhow!("overall deadline exceeded during generation"))),
                None => generator.generate(&call.working, &call.config).await,
            }
        };

        tokio::select! {
            biased;
            _ = call.cancel.cancelled() => Err(ResilienceError::Cancelled),
            response = request => Ok(response),
        }
    }

    /// Apply the first eligible strategy for `kind`. Strategies that go back
    /// to the generator need a remaining attempt; the others run at most once
    /// per request and fall through when they produce nothing.
    async fn recover(
        &self,
        kind: FailureKind,
        attempt: u32,
        call: &mut Call<'_>,
        record: &mut AttemptRecord,
    ) -> Result<Recovery> {
        let attempts_left = attempt < self.config.max_retries && !call.deadline_passed();

        for &strategy in self.strategies.strategies_for(kind) {
            if strategy.loops_back() {
                if !attempts_left {
                    continue;
                }
                self.prepare_retry(strategy, attempt, call).await?;
                call.apply(strategy, record);
                self.metrics.record_strategy(strategy.as_str());
                return Ok(Recovery::Retry);
            }

            if let Some(resolved) = self.try_terminal(strategy, call, record).await? {
                return Ok(Recovery::Resolved(resolved));
            }
        }

        Ok(Recovery::Exhausted)
    }

    async fn prepare_retry(
        &self,
        strategy: RecoveryStrategy,
        attempt: u32,
        call: &mut Call<'_>,
    ) -> Result<()> {
        match strategy {
            RecoveryStrategy::RetryWithBackoff => {
                let waited = self.backoff.wait(attempt as i32, call.cancel).await?;
                call.pending_delay_ms = waited.as_millis() as u64;
            }
            RecoveryStrategy::ReduceContext => {
                let chars = call.working.chars().count();
                call.config = call
                    .config
                    .reduced(self.config.context_reduction_ratio, chars);
                if let Some(limit) = call.config.max_input_chars {
                    call.working = truncate_chars(&call.working, limit).to_string();
                }
                debug!(max_input_chars = ?call.config.max_input_chars, "Reduced context");
            }
            RecoveryStrategy::AlternativePrompt => {
                call.config = call.config.clone().with_prompt_style(PromptStyle::Alternative);
            }
            RecoveryStrategy::SimplifiedRequest => {
                call.config = call.config.simplified();
            }
            RecoveryStrategy::SkipAndLog => {
                warn!(attempt = attempt, "Skipping failed attempt");
                call.meta
                    .warnings
                    .push(format!("attempt {} skipped", attempt));
            }
            _ => {}
        }
        Ok(())
    }

    /// Run a strategy that produces a result on its own. Returns `None` when
    /// it is unavailable, already used, or yields no entities.
    async fn try_terminal(
        &self,
        strategy: RecoveryStrategy,
        call: &mut Call<'_>,
        record: &mut AttemptRecord,
    ) -> Result<Option<Resolved>> {
        if call.used.contains(&strategy) {
            return Ok(None);
        }

        let produced: Option<(ParsedResult, f64, bool)> = match strategy {
            RecoveryStrategy::FallbackToRegex => {
                let Some(regex) = call.fallbacks.regex.filter(|_| self.config.enable_regex_fallback)
                else {
                    return Ok(None);
                };
                call.used.insert(strategy);
                call.apply(strategy, record);
                match regex.extract(call.content).await {
                    Ok(result) => Some(self.normalize(result, false)),
                    Err(e) => {
                        warn!(error = %e, "Regex fallback failed");
                        None
                    }
                }
            }
            RecoveryStrategy::HybridExtraction => {
                let Some(hybrid) = call.fallbacks.hybrid.filter(|_| self.config.enable_hybrid_mode)
                else {
                    return Ok(None);
                };
                call.used.insert(strategy);
                call.apply(strategy, record);
                match hybrid.extract(call.content, &call.config).await {
                    Ok(result) => Some(self.normalize(result, false)),
                    Err(e) => {
                        warn!(error = %e, "Hybrid extraction failed");
                        None
                    }
                }
            }
            RecoveryStrategy::ChunkAndRetry => {
                let Some(chunker) = self.chunker.as_ref().filter(|c| c.needs_split(call.content))
                else {
                    return Ok(None);
                };
                call.used.insert(strategy);
                call.apply(strategy, record);
                self.metrics.record_chunked();
                // windows are already sized; an earlier reduction must not cut them
                let window_config = GenerationConfig {
                    max_input_chars: None,
                    ..call.config.clone()
                };
                let outcome = chunker
                    .run(call.generator, call.content, &window_config, call.cancel)
                    .await?;
                call.meta.warnings.extend(outcome.warnings);
                Some((outcome.result, outcome.confidence, true))
            }
            RecoveryStrategy::UseCached => {
                if !self.config.enable_caching {
                    return Ok(None);
                }
                call.used.insert(strategy);
                call.apply(strategy, record);
                self.cache
                    .lookup(&call.cache_key)
                    .map(|(result, confidence)| (result, confidence, false))
            }
            _ => return Ok(None),
        };

        self.metrics.record_strategy(strategy.as_str());
        Ok(produced
            .filter(|(result, _, _)| !result.entities.is_empty())
            .map(|(result, confidence, cacheable)| Resolved {
                result,
                confidence,
                strategy: strategy.as_str().to_string(),
                cacheable,
            }))
    }

    /// Pass a fallback's result through the validator so aliases and
    /// confidence are handled the same way as model output.
    fn normalize(&self, result: ParsedResult, cacheable: bool) -> (ParsedResult, f64, bool) {
        let validation = self.validator.validate(&result.to_value());
        (validation.result, validation.confidence, cacheable)
    }

    fn succeed(&self, mut call: Call<'_>, resolved: Resolved) -> ResilientOutcome {
        if resolved.cacheable && self.config.enable_caching {
            let stored = self.cache.put(
                call.cache_key.clone(),
                resolved.result.clone(),
                resolved.confidence,
            );
            debug!(stored = stored, confidence = resolved.confidence, "Cache write");
        }

        call.meta.final_strategy = resolved.strategy;
        call.meta.confidence = resolved.confidence;
        self.finish(call, true, resolved.result)
    }

    fn fail(&self, mut call: Call<'_>) -> ResilientOutcome {
        call.meta.final_strategy = EXHAUSTED_STRATEGY.to_string();
        warn!(
            attempts = call.meta.attempts,
            failures = ?call.meta.failure_kinds,
            "All recovery strategies exhausted"
        );
        self.finish(call, false, ParsedResult::empty())
    }

    fn finish(&self, mut call: Call<'_>, success: bool, result: ParsedResult) -> ResilientOutcome {
        let elapsed = call.timer.elapsed();
        call.meta.processing_time_ms = elapsed.as_secs_f64() * 1000.0;

        self.metrics
            .record_request(success, call.meta.attempts, elapsed);
        info!(
            success = success,
            attempts = call.meta.attempts,
            final_strategy = %call.meta.final_strategy,
            entities = result.entities.len(),
            "Extraction finished"
        );

        ResilientOutcome {
            success,
            result,
            metadata: call.meta,
        }
    }
}
