//! 지식베이스 모듈
//!
//! 문서 청킹 + 호스팅 벡터 스토어(Pinecone) 조합으로
//! 수집(ingest)과 검색(retrieve)을 제공합니다.

pub mod base;
pub mod chunker;
pub mod pinecone;
pub mod vector;

pub use base::KnowledgeBase;
pub use chunker::{ChunkConfig, Chunker, SlidingWindowChunker, default_chunker};
pub use pinecone::PineconeStore;
pub use vector::{ChunkRecord, IngestError, RetrievedChunk, VectorStore};
