//! 설정 모듈 - 환경변수 기반 Settings
//!
//! 모든 외부 서비스 자격 증명과 튜닝 값을 환경변수에서 읽어옵니다.
//! 필수 값이 빠진 경우 어떤 변수가 없는지 전부 나열하여 실패합니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let settings = Settings::from_env();
//! settings.require_vector_store()?;
//! ```

use std::time::Duration;

use anyhow::Result;

/// 기본 Pinecone 인덱스 이름
pub const DEFAULT_INDEX_NAME: &str = "langgraph-rag-index";

/// 기본 Pinecone serverless 리전
pub const DEFAULT_PINECONE_REGION: &str = "us-east-1";

/// 기본 Groq 모델
/// ref: https://console.groq.com/docs/models
pub const DEFAULT_GROQ_MODEL: &str = "llama-3.3-70b-versatile";

/// 기본 호스팅 임베딩 모델 (Pinecone integrated embedding)
/// ref: https://docs.pinecone.io/guides/index-data/indexing-overview
pub const DEFAULT_EMBED_MODEL: &str = "multilingual-e5-large";

/// 기본 시드 문서 디렉토리
pub const DEFAULT_DOC_SOURCE_DIR: &str = "dataForRag";

/// 외부 호출 기본 타임아웃 (초)
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// HTTP 서버 기본 포트
pub const DEFAULT_PORT: u16 = 8000;

// ============================================================================
// Settings
// ============================================================================

/// 환경변수 기반 설정
///
/// 프로세스 시작 시 한 번 로드하여 각 collaborator 생성자에 전달합니다.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Pinecone API 키 (`PINECONE_API_KEY`)
    pub pinecone_api_key: Option<String>,
    /// Pinecone serverless 리전 (`PINECONE_ENVIRONMENT`)
    pub pinecone_environment: String,
    /// Pinecone 인덱스 이름 (`PINECONE_INDEX_NAME`)
    pub pinecone_index_name: String,
    /// Groq API 키 (`GROQ_API_KEY`)
    pub groq_api_key: Option<String>,
    /// Groq 채팅 모델 (`GROQ_MODEL`)
    pub groq_model: String,
    /// Tavily API 키 (`TAVILY_API_KEY`)
    pub tavily_api_key: Option<String>,
    /// 호스팅 임베딩 모델 (`EMBED_MODEL`)
    pub embed_model: String,
    /// 시드 문서 디렉토리 (`DOC_SOURCE_DIR`)
    pub doc_source_dir: String,
    /// 외부 호출 타임아웃 (`REQUEST_TIMEOUT_SECS`)
    pub request_timeout: Duration,
    /// HTTP 서버 포트 (`PORT`)
    pub port: u16,
}

impl Settings {
    /// 환경변수에서 설정 로드
    pub fn from_env() -> Self {
        let timeout_secs = env_var("REQUEST_TIMEOUT_SECS")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);

        let port = env_var("PORT")
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(DEFAULT_PORT);

        Self {
            pinecone_api_key: env_var("PINECONE_API_KEY"),
            pinecone_environment: env_var("PINECONE_ENVIRONMENT")
                .unwrap_or_else(|| DEFAULT_PINECONE_REGION.to_string()),
            pinecone_index_name: env_var("PINECONE_INDEX_NAME")
                .unwrap_or_else(|| DEFAULT_INDEX_NAME.to_string()),
            groq_api_key: env_var("GROQ_API_KEY"),
            groq_model: env_var("GROQ_MODEL").unwrap_or_else(|| DEFAULT_GROQ_MODEL.to_string()),
            tavily_api_key: env_var("TAVILY_API_KEY"),
            embed_model: env_var("EMBED_MODEL").unwrap_or_else(|| DEFAULT_EMBED_MODEL.to_string()),
            doc_source_dir: env_var("DOC_SOURCE_DIR")
                .unwrap_or_else(|| DEFAULT_DOC_SOURCE_DIR.to_string()),
            request_timeout: Duration::from_secs(timeout_secs),
            port,
        }
    }

    /// 벡터 스토어 필수 설정 검증
    ///
    /// Pinecone API 키가 없으면 누락 변수를 나열하며 실패합니다.
    pub fn require_vector_store(&self) -> Result<()> {
        require_present(&[("PINECONE_API_KEY", &self.pinecone_api_key)])
    }

    /// LLM 필수 설정 검증
    pub fn require_llm(&self) -> Result<()> {
        require_present(&[("GROQ_API_KEY", &self.groq_api_key)])
    }

    /// 웹 검색 필수 설정 검증
    pub fn require_web_search(&self) -> Result<()> {
        require_present(&[("TAVILY_API_KEY", &self.tavily_api_key)])
    }

    /// 웹 검색 키 존재 여부
    pub fn has_web_search(&self) -> bool {
        self.tavily_api_key.is_some()
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 환경변수 읽기 (빈 문자열은 미설정으로 취급)
fn env_var(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => None,
    }
}

/// 필수 값 검증 - 누락된 변수 이름을 정렬해서 전부 보고
fn require_present(required: &[(&str, &Option<String>)]) -> Result<()> {
    let mut missing: Vec<&str> = required
        .iter()
        .filter(|(_, value)| value.is_none())
        .map(|(name, _)| *name)
        .collect();

    if missing.is_empty() {
        return Ok(());
    }

    missing.sort_unstable();
    anyhow::bail!(
        "Missing required configuration: {}. Set them in your environment.",
        missing.join(", ")
    )
}

// ============================================================================
// Tests
// ============================================================================
