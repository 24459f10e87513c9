//! medagent-heart - 심장 건강 RAG 챗봇 백엔드
//!
//! Pinecone 벡터 검색 + Tavily 웹 검색 + Groq LLM 라우팅을 결합한
//! 질의응답 에이전트입니다. 한 턴의 질문을 라우터 상태 머신으로 처리하고
//! 단계별 trace를 함께 반환합니다.
//!
//! source: D:\010 Web Applicaton\PALAN-K-medagent-heart

pub mod agent;
pub mod cli;
pub mod collector;
pub mod config;
pub mod extractor;
pub mod knowledge;
pub mod llm;
pub mod search;
pub mod server;
pub mod session;

// Re-exports
pub use agent::{RagAgent, TraceEvent, TurnOutcome};
pub use config::Settings;
pub use knowledge::{
    ChunkConfig, ChunkRecord, Chunker, IngestError, KnowledgeBase, PineconeStore,
    RetrievedChunk, SlidingWindowChunker, VectorStore, default_chunker,
};
pub use llm::{ChatMessage, GroqModel, LanguageModel, Route, RouteDecision};
pub use search::{SearchSnippet, TavilySearch, UnconfiguredSearch, WebSearchProvider};
pub use session::{SessionStore, get_data_dir};
