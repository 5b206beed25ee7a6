pub mod chunk;
pub mod chunker;

pub use chunk::Chunk;
pub use chunker::{ChunkerConfig, WindowChunker};

use sha2::{Digest, Sha256};

/// Stable document id derived from the content itself
pub fn generate_doc_id(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    hex::encode(&digest[..16])
}
