//! Retrieval memory for Ferrule.
//!
//! Documents are split by the [`Chunker`], embedded with an injected
//! [`Embedder`](ferrule_core::memory::Embedder), and appended to a flat
//! vector index persisted next to its chunk metadata.

pub mod chunker;
pub mod embedder;
pub mod engine;
pub mod persist;
pub mod segment;
pub mod vector;

pub use chunker::Chunker;
pub use embedder::HashingEmbedder;
pub use engine::{MemoryEngine, MemoryOptions, MemoryStats};
pub use vector::{FlatIndex, cosine_similarity, l2_distance};
