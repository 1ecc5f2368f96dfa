//! Research layer: content-addressed page cache, embeddings, hybrid
//! vector search, retrieval, local ingestion, and the source shortlist.

pub mod cache;
pub mod chunker;
pub mod db;
pub mod embeddings;
pub mod error;
pub mod html;
pub mod ingest;
pub mod retrieval;
pub mod sections;
pub mod shortlist;
pub mod text;
pub mod types;
pub mod urlutil;
pub mod vector;
pub mod worker;

pub use cache::{ResearchCache, VectorMirror, SUMMARIZE_PAGE_PROMPT};
pub use embeddings::{Embedder, EmbeddingClient};
pub use error::{ResearchError, Result};
pub use retrieval::{FetchedDocument, Retriever};
pub use types::{CacheEntry, CacheStats, Finding, Link, SummaryStatus};
pub use vector::{cosine_similarity, ScoredChunk, VectorStore, DEFAULT_DENSE_WEIGHT};
pub use worker::{PoolHandle, WorkerPool};
