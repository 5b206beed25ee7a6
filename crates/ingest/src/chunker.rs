use crate::chunk::Chunk;
use anyhow::{Result, ensure};

#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    /// Window size in characters
    pub chunk_size: usize,
    /// Characters shared between consecutive windows
    pub overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 4000,
            overlap: 200,
        }
    }
}

/// Splits text into fixed-size overlapping character windows.
pub struct WindowChunker {
    config: ChunkerConfig,
}

impl WindowChunker {
    pub fn new(config: ChunkerConfig) -> Result<Self> {
        ensure!(config.chunk_size > 0, "chunk_size must be positive");
        ensure!(
            config.overlap < config.chunk_size,
            "overlap ({}) must be smaller than chunk_size ({})",
            config.overlap,
            config.chunk_size
        );
        Ok(Self { config })
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Distance between the starts of consecutive windows
    pub fn step(&self) -> usize {
        self.config.chunk_size - self.config.overlap
    }

    /// True when the text does not fit in a single window
    pub fn needs_split(&self, text: &str) -> bool {
        text.chars().count() > self.config.chunk_size
    }

    pub fn split(&self, doc_id: &str, text: &str) -> Vec<Chunk> {
        // Byte position of every char boundary, plus the end of the text
        let boundaries: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();
        let total_chars = boundaries.len() - 1;

        let mut chunks = Vec::new();
        let mut start = 0;

        while start < total_chars {
            let end = (start + self.config.chunk_size).min(total_chars);
            let window = &text[boundaries[start]..boundaries[end]];

            chunks.push(Chunk::new(
                doc_id.to_string(),
                chunks.len(),
                window.to_string(),
                (start, end),
            ));

            if end == total_chars {
                break;
            }
            start += self.step();
        }

        chunks
    }
}
