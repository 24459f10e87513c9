//! KnowledgeBase - 청킹 + 벡터 스토어 조합
//!
//! 문서 수집과 질문 검색의 상위 진입점입니다.
//! 입력 검증은 네트워크 호출 전에 끝냅니다.

use std::sync::Arc;

use anyhow::Result;

use super::chunker::{Chunker, default_chunker};
use super::vector::{ChunkRecord, IngestError, RetrievedChunk, VectorStore};

// ============================================================================
// KnowledgeBase
// ============================================================================

/// 지식베이스
///
/// 텍스트를 청크로 나누어 벡터 스토어에 저장하고,
/// 질문에 대한 top-K 청크를 하나의 컨텍스트 문자열로 모아 반환합니다.
pub struct KnowledgeBase {
    store: Arc<dyn VectorStore>,
    chunker: Box<dyn Chunker>,
}

impl KnowledgeBase {
    /// 스토어와 청커로 생성
    pub fn new(store: Arc<dyn VectorStore>, chunker: Box<dyn Chunker>) -> Self {
        Self { store, chunker }
    }

    /// 기본 청커(1000/200)로 생성
    pub fn with_default_chunker(store: Arc<dyn VectorStore>) -> Self {
        Self::new(store, default_chunker())
    }

    /// 텍스트 수집 (청킹 후 저장)
    ///
    /// 같은 텍스트를 다시 수집하면 매번 새 ID의 청크가 저장됩니다
    /// (중복 제거 없음).
    ///
    /// # Returns
    /// 저장된 청크 수
    pub async fn ingest_text(&self, text: &str, source: Option<&str>) -> Result<usize> {
        if text.trim().is_empty() {
            return Err(IngestError::EmptyDocument.into());
        }

        let chunks = self.chunker.chunk(text);
        if chunks.is_empty() {
            return Err(IngestError::EmptyDocument.into());
        }

        let records: Vec<ChunkRecord> = chunks
            .into_iter()
            .map(|text| ChunkRecord {
                id: uuid::Uuid::new_v4().to_string(),
                text,
                source: source.map(|s| s.to_string()),
            })
            .collect();

        let written = self.store.upsert_chunks(&records).await?;

        tracing::info!(
            "Ingested {} chunks (source: {})",
            written,
            source.unwrap_or("direct-input")
        );

        Ok(written)
    }

    /// top-K 청크 조회 (원본 청크 목록)
    pub async fn retrieve_chunks(
        &self,
        question: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        if top_k == 0 {
            return Err(IngestError::InvalidTopK.into());
        }

        self.store.query(question, top_k).await
    }

    /// top-K 청크를 하나의 컨텍스트 문자열로 조회
    ///
    /// 결과가 없으면 빈 문자열을 반환합니다 (오류 아님).
    pub async fn retrieve(&self, question: &str, top_k: usize) -> Result<String> {
        let chunks = self.retrieve_chunks(question, top_k).await?;

        Ok(chunks
            .iter()
            .map(|c| c.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n"))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::knowledge::chunker::{ChunkConfig, SlidingWindowChunker, expected_chunk_count};

    /// 업서트된 레코드를 기억하는 인메모리 스토어
    #[derive(Default)]
    struct MemoryStore {
        records: Mutex<Vec<ChunkRecord>>,
    }

    #[async_trait]
    impl VectorStore for MemoryStore {
        async fn upsert_chunks(&self, records: &[ChunkRecord]) -> Result<usize> {
            let mut stored = self.records.lock().unwrap();
            stored.extend(records.iter().cloned());
            Ok(records.len())
        }

        async fn query(&self, _question: &str, top_k: usize) -> Result<Vec<RetrievedChunk>> {
            let stored = self.records.lock().unwrap();
            Ok(stored
                .iter()
                .take(top_k)
                .map(|r| RetrievedChunk {
                    text: r.text.clone(),
                    score: 0.5,
                    source: r.source.clone(),
                })
                .collect())
        }
    }

    fn base_with_store(store: Arc<MemoryStore>) -> KnowledgeBase {
        let chunker = SlidingWindowChunker::new(ChunkConfig {
            chunk_size: 50,
            chunk_overlap: 10,
        })
        .unwrap();
        KnowledgeBase::new(store, Box::new(chunker))
    }

    #[tokio::test]
    async fn test_ingest_empty_is_validation_error() {
        let store = Arc::new(MemoryStore::default());
        let base = base_with_store(store.clone());

        let err = base.ingest_text("", None).await.unwrap_err();
        assert!(err.downcast_ref::<IngestError>().is_some());

        // 아무것도 저장되지 않아야 함
        assert!(store.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ingest_count_matches_formula() {
        let store = Arc::new(MemoryStore::default());
        let base = base_with_store(store.clone());

        let config = ChunkConfig {
            chunk_size: 50,
            chunk_overlap: 10,
        };
        let text = "b".repeat(200);

        let written = base.ingest_text(&text, Some("test.txt")).await.unwrap();
        assert_eq!(written, expected_chunk_count(200, config));
    }

    #[tokio::test]
    async fn test_repeated_ingest_not_deduplicated() {
        let store = Arc::new(MemoryStore::default());
        let base = base_with_store(store.clone());

        let text = "c".repeat(120);
        let first = base.ingest_text(&text, None).await.unwrap();
        let second = base.ingest_text(&text, None).await.unwrap();
        assert_eq!(first, second);

        let stored = store.records.lock().unwrap();
        assert_eq!(stored.len(), first + second);

        // 매 수집마다 새 ID가 발급되어야 함
        let mut ids: Vec<&str> = stored.iter().map(|r| r.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), stored.len());
    }

    #[tokio::test]
    async fn test_retrieve_zero_top_k_rejected() {
        let base = base_with_store(Arc::new(MemoryStore::default()));

        let err = base.retrieve("question", 0).await.unwrap_err();
        let ingest_err = err.downcast_ref::<IngestError>().unwrap();
        assert!(matches!(ingest_err, IngestError::InvalidTopK));
    }

    #[tokio::test]
    async fn test_retrieve_joins_chunks() {
        let store = Arc::new(MemoryStore::default());
        let base = base_with_store(store.clone());

        base.ingest_text(&"d".repeat(120), None).await.unwrap();

        let context = base.retrieve("anything", 5).await.unwrap();
        assert!(context.contains("dddd"));
        assert!(context.contains("\n\n"));
    }

    #[tokio::test]
    async fn test_retrieve_empty_store_is_empty_string() {
        let base = base_with_store(Arc::new(MemoryStore::default()));
        let context = base.retrieve("anything", 5).await.unwrap();
        assert!(context.is_empty());
    }
}
