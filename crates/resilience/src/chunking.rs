use extract::{EntityDeduplicator, GenerationConfig, Generator, ParsedResult, parse_response};
use futures::stream::{self, StreamExt};
use ingest::{Chunk, ChunkerConfig, WindowChunker, generate_doc_id};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ResilienceConfig;
use crate::error::{ResilienceError, Result};

/// Merged output of a chunked extraction.
#[derive(Debug, Clone)]
pub struct ChunkedOutcome {
    pub result: ParsedResult,
    /// Mean confidence of the chunks that produced entities
    pub confidence: f64,
    pub chunks: usize,
    pub failed_chunks: usize,
    pub warnings: Vec<String>,
}

impl ChunkedOutcome {
    pub fn is_empty(&self) -> bool {
        self.result.entities.is_empty()
    }
}

enum ChunkOutput {
    Extracted { result: ParsedResult, confidence: f64 },
    Failed(String),
    Cancelled,
}

/// Splits oversized content into overlapping windows, extracts each window
/// and merges the results.
pub struct ChunkRunner {
    chunker: WindowChunker,
    max_concurrent: usize,
}

impl ChunkRunner {
    pub fn new(chunk_size: usize, overlap: usize, max_concurrent: usize) -> Result<Self> {
        let chunker = WindowChunker::new(ChunkerConfig {
            chunk_size,
            overlap,
        })
        .map_err(|e| ResilienceError::invalid_config(e.to_string()))?;

        Ok(Self {
            chunker,
            max_concurrent: max_concurrent.max(1),
        })
    }

    pub fn from_config(config: &ResilienceConfig) -> Result<Self> {
        Self::new(
            config.chunk_size,
            config.chunk_overlap,
            config.max_concurrent_chunk_calls,
        )
    }

    pub fn needs_split(&self, content: &str) -> bool {
        self.chunker.needs_split(content)
    }

    pub fn split(&self, content: &str) -> Vec<Chunk> {
        self.chunker.split(&generate_doc_id(content), content)
    }

    /// Extract every chunk with at most `max_concurrent` generation calls in
    /// flight. Chunk failures are logged and skipped; results keep chunk order.
    pub async fn run(
        &self,
        generator: &dyn Generator,
        content: &str,
        config: &GenerationConfig,
        cancel: &CancellationToken,
    ) -> Result<ChunkedOutcome> {
        let chunks = self.split(content);
        let total = chunks.len();
        debug!(chunks = total, "Running chunked extraction");

        let outputs: Vec<ChunkOutput> = stream::iter(chunks)
            .map(|chunk| extract_chunk(generator, chunk, config, cancel))
            .buffered(self.max_concurrent)
            .collect()
            .await;

        let mut dedup = EntityDeduplicator::new();
        let mut confidences = Vec::new();
        let mut warnings = Vec::new();
        let mut failed = 0;

        for output in outputs {
            match output {
                ChunkOutput::Extracted { result, confidence } => {
                    confidences.push(confidence);
                    dedup.absorb(result);
                }
                ChunkOutput::Failed(reason) => {
                    failed += 1;
                    warnings.push(reason);
                }
                ChunkOutput::Cancelled => return Err(ResilienceError::Cancelled),
            }
        }

        let confidence = if confidences.is_empty() {
            0.0
        } else {
            confidences.iter().sum::<f64>() / confidences.len() as f64
        };

        Ok(ChunkedOutcome {
            result: dedup.finish(),
            confidence,
            chunks: total,
            failed_chunks: failed,
            warnings,
        })
    }
}

async fn extract_chunk(
    generator: &dyn Generator,
    chunk: Chunk,
    config: &GenerationConfig,
    cancel: &CancellationToken,
) -> ChunkOutput {
    let raw = tokio::select! {
        biased;
        _ = cancel.cancelled() => return ChunkOutput::Cancelled,
        response = generator.generate(&chunk.text, config) => response,
    };

    match raw {
        Ok(raw) => {
            let (_, validation) = parse_response(&raw);
            if validation.is_usable() {
                ChunkOutput::Extracted {
                    result: validation.result,
                    confidence: validation.confidence,
                }
            } else {
                debug!(chunk = chunk.index, "Chunk produced no entities");
                ChunkOutput::Failed(format!("chunk {} produced no entities", chunk.index))
            }
        }
        Err(e) => {
            warn!(chunk = chunk.index, error = %e, "Chunk extraction failed");
            ChunkOutput::Failed(format!("chunk {} failed: {}", chunk.index, e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Echoes the first word of each chunk as a PARTY entity
    struct FirstWord {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Generator for FirstWord {
        async fn generate(
            &self,
            content: &str,
            _config: &GenerationConfig,
        ) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let word = content.split_whitespace().next().unwrap_or("");
            if word == "fail" {
                return Err(anyhow!("connection reset"));
            }
            Ok(format!(
                r#"{{"entities": [{{"text": "{}", "entity_type": "PARTY", "confidence": 0.8}}, {{"text": "Court", "entity_type": "COURT", "confidence": 0.6}}]}}"#,
                word
            ))
        }
    }

    #[tokio::test]
    async fn test_merges_and_dedups_chunks() {
        let runner = ChunkRunner::new(10, 0, 2).unwrap();
        let generator = FirstWord { calls: AtomicUsize::new(0) };
        let content = "alpha xxxxbravo xxxxalpha xxxx";

        let outcome = runner
            .run(&generator, content, &GenerationConfig::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.chunks, 3);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 3);
        let names: Vec<&str> = outcome.result.entities.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(names, vec!["alpha", "Court", "bravo"]);
        assert!(outcome.result.entities.len() <= 6);
        assert!((outcome.confidence - 0.7).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_failed_chunks_are_skipped() {
        let runner = ChunkRunner::new(10, 0, 3).unwrap();
        let generator = FirstWord { calls: AtomicUsize::new(0) };

        let outcome = runner
            .run(
                &generator,
                "alpha xxxxfail xxxxx",
                &GenerationConfig::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.failed_chunks, 1);
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.result.entities.len(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_run() {
        let runner = ChunkRunner::new(10, 0, 1).unwrap();
        let generator = FirstWord { calls: AtomicUsize::new(0) };
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = runner
            .run(&generator, "alpha xxxxbravo xxxx", &GenerationConfig::default(), &cancel)
            .await;
        assert!(matches!(result, Err(ResilienceError::Cancelled)));
    }

    #[test]
    fn test_rejects_overlap_not_below_size() {
        assert!(matches!(
            ChunkRunner::new(10, 10, 1),
            Err(ResilienceError::InvalidConfig { .. })
        ));
    }
}
