use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One window of a document. Offsets are `[start, end)` in characters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub doc_id: String,
    pub chunk_id: String,
    pub index: usize,
    pub text: String,
    pub offset: (usize, usize),
}

impl Chunk {
    pub fn new(doc_id: String, index: usize, text: String, offset: (usize, usize)) -> Self {
        Self {
            chunk_id: window_id(&doc_id, offset, &text),
            doc_id,
            index,
            text,
            offset,
        }
    }

    pub fn char_len(&self) -> usize {
        self.offset.1 - self.offset.0
    }

    /// Characters shared with a later window of the same document
    pub fn shared_with(&self, next: &Chunk) -> usize {
        self.offset.1.saturating_sub(next.offset.0)
    }
}

// Same document, position and text always give the same id
fn window_id(doc_id: &str, (start, end): (usize, usize), text: &str) -> String {
    let digest = Sha256::new()
        .chain_update(doc_id.as_bytes())
        .chain_update(start.to_le_bytes())
        .chain_update(end.to_le_bytes())
        .chain_update(text.as_bytes())
        .finalize();
    hex::encode(&digest[..16])
}
