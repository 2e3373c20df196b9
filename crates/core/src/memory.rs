//! Memory types: chunks, ranked results, and the embedding seam.
//!
//! The retrieval memory stores bounded spans of ingested documents together
//! with their embedding vectors. Retrieval embeds the query with the same
//! [`Embedder`] and ranks chunks by similarity under a fixed [`Metric`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MemoryError;

/// One span of a source document, as stored in the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    /// Position in the index (insertion order)
    pub ordinal: u64,

    /// Source identifier (URL, file path, session reference)
    pub source: String,

    /// Index of this chunk within its source
    pub chunk_index: u32,

    /// The text span
    pub text: String,

    /// When the chunk was ingested
    pub ingested_at: DateTime<Utc>,

    /// Embedding vector (stored in the index file, not the metadata)
    #[serde(skip)]
    pub embedding: Vec<f32>,
}

/// Similarity metric, fixed when an index is created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Cosine similarity (default)
    #[default]
    Cosine,
    /// Euclidean distance, reported as `1 / (1 + d)`
    L2,
}

impl Metric {
    pub fn as_u8(self) -> u8 {
        match self {
            Metric::Cosine => 0,
            Metric::L2 => 1,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Metric::Cosine),
            1 => Some(Metric::L2),
            _ => None,
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Metric::Cosine => write!(f, "cosine"),
            Metric::L2 => write!(f, "l2"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: DocumentChunk,
    pub score: f32,
}

/// Ranked retrieval output. Ephemeral, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryQueryResult {
    pub hits: Vec<ScoredChunk>,
}

impl MemoryQueryResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScoredChunk> {
        self.hits.iter()
    }

    /// Context block for the decision service.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, hit) in self.hits.iter().enumerate() {
            out.push_str(&format!(
                "{}. [{}#{} score={:.2}] {}\n",
                i + 1,
                hit.chunk.source,
                hit.chunk.chunk_index,
                hit.score,
                hit.chunk.text
            ));
        }
        out
    }
}

/// The embedding capability, injected into the memory engine.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// A human-readable name (e.g., "hashing", "openai").
    fn name(&self) -> &str;

    /// Length of every vector this embedder produces.
    fn dimension(&self) -> usize;

    /// Embed a batch of texts, one vector per input, in order.
    async fn embed(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, MemoryError>;
}
