//! Vector Store - 벡터 검색 트레이트 및 타입
//!
//! 호스팅 벡터 DB는 "텍스트 청크 저장"과 "질문으로 top-K 청크 조회"
//! 두 연산만 노출하는 불투명한 외부 서비스로 취급합니다.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Types
// ============================================================================

/// 저장용 청크 레코드
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// 청크 ID (수집마다 새로 발급 - 중복 제거 없음)
    pub id: String,
    /// 청크 텍스트
    pub text: String,
    /// 출처 메타데이터 (파일명, URL 등)
    pub source: Option<String>,
}

/// 검색 결과 청크
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    /// 청크 텍스트
    pub text: String,
    /// 유사도 스코어 (높을수록 관련)
    pub score: f32,
    /// 출처 메타데이터
    pub source: Option<String>,
}

// ============================================================================
// Validation Errors
// ============================================================================

/// 수집/조회 입력 검증 오류
///
/// 잘못된 입력은 네트워크 호출 전에 즉시 거부합니다.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Document content cannot be empty.")]
    EmptyDocument,

    #[error("top_k must be a positive integer.")]
    InvalidTopK,

    #[error("chunk_overlap ({overlap}) must be smaller than chunk_size ({size})")]
    InvalidChunkConfig { size: usize, overlap: usize },
}

// ============================================================================
// VectorStore Trait
// ============================================================================

/// VectorStore 트레이트 (async)
///
/// 호스팅 벡터 저장소의 공통 인터페이스입니다.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// 청크 배치 저장 - 저장된 개수 반환
    async fn upsert_chunks(&self, records: &[ChunkRecord]) -> Result<usize>;

    /// 질문으로 top-K 청크 조회
    async fn query(&self, question: &str, top_k: usize) -> Result<Vec<RetrievedChunk>>;
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ingest_error_messages() {
        assert_eq!(
            IngestError::EmptyDocument.to_string(),
            "Document content cannot be empty."
        );
        assert_eq!(
            IngestError::InvalidTopK.to_string(),
            "top_k must be a positive integer."
        );

        let config_err = IngestError::InvalidChunkConfig {
            size: 100,
            overlap: 100,
        };
        assert!(config_err.to_string().contains("chunk_overlap"));
    }
}
