//! HTTP 서버 모듈 - axum 기반 백엔드 API
//!
//! 프론트엔드 UI가 사용하는 세 엔드포인트를 제공합니다:
//! - GET  /health           헬스체크
//! - POST /chat/            질의 한 턴 처리 (답변 + trace)
//! - POST /upload-document/ PDF/텍스트 업로드 수집
//!
//! collaborator들은 서버 시작 시 한 번 생성되어 AppState로 공유됩니다.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};

use crate::agent::{RagAgent, TraceEvent};
use crate::config::Settings;
use crate::extractor::extract_upload_text;
use crate::knowledge::{IngestError, KnowledgeBase, PineconeStore};
use crate::llm::{ChatMessage, GroqModel, LanguageModel};
use crate::search::{TavilySearch, UnconfiguredSearch, WebSearchProvider};
use crate::session::SessionStore;

/// 한 턴에 읽어오는 히스토리 최대 개수
const HISTORY_LIMIT: usize = 50;

// ============================================================================
// App State
// ============================================================================

/// 공유 애플리케이션 상태
#[derive(Clone)]
pub struct AppState {
    pub agent: Arc<RagAgent>,
    pub knowledge: Arc<KnowledgeBase>,
    pub sessions: Arc<SessionStore>,
}

impl AppState {
    /// 설정에서 모든 collaborator를 생성하여 상태 구성
    ///
    /// Groq와 Pinecone은 필수이고, Tavily 키가 없으면 항상 실패하는
    /// provider로 대체됩니다 (웹 검색 실패는 비치명적).
    pub async fn build(settings: &Settings) -> Result<Self> {
        let model: Arc<dyn LanguageModel> = Arc::new(GroqModel::from_settings(settings)?);

        let store = PineconeStore::connect(settings)
            .await
            .context("Failed to connect to Pinecone")?;
        let knowledge = Arc::new(KnowledgeBase::with_default_chunker(Arc::new(store)));

        let search: Arc<dyn WebSearchProvider> = if settings.has_web_search() {
            Arc::new(TavilySearch::from_settings(settings)?)
        } else {
            tracing::warn!("TAVILY_API_KEY not set; web search will be unavailable");
            Arc::new(UnconfiguredSearch)
        };

        let sessions = Arc::new(SessionStore::open_default()?);
        let agent = Arc::new(RagAgent::new(model, knowledge.clone(), search));

        Ok(Self {
            agent,
            knowledge,
            sessions,
        })
    }
}

// ============================================================================
// Request / Response Types
// ============================================================================

/// 채팅 요청
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub session_id: String,
    pub query: String,
    #[serde(default = "default_web_search")]
    pub enable_web_search: bool,
}

fn default_web_search() -> bool {
    true
}

/// 채팅 응답
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub trace_events: Vec<TraceEvent>,
}

/// 업로드 응답
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub filename: String,
    pub processed_chunks: usize,
}

/// 오류 응답 본문
#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
}

// ============================================================================
// Error Mapping
// ============================================================================

/// API 오류
///
/// 입력 검증 오류는 400, 그 외 턴 실패는 500으로 매핑합니다.
/// 치명적 실패는 부분 답변 대신 명확한 오류 메시지로 드러납니다.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn bad_request(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            detail: detail.into(),
        }
    }

    fn from_anyhow(err: anyhow::Error) -> Self {
        if err.downcast_ref::<IngestError>().is_some() {
            return Self {
                status: StatusCode::BAD_REQUEST,
                detail: err.to_string(),
            };
        }

        tracing::error!("Request failed: {:#}", err);
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            detail: format!("{:#}", err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                detail: self.detail,
            }),
        )
            .into_response()
    }
}

// ============================================================================
// Router / Entrypoint
// ============================================================================

/// axum 라우터 구성
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/chat/", post(chat))
        .route("/upload-document/", post(upload_document))
        .layer(cors)
        .with_state(state)
}

/// 서버 실행
pub async fn run(state: AppState, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("medagent-heart listening on http://{}", addr);

    axum::serve(listener, router(state))
        .await
        .context("HTTP server error")?;

    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /health
async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// POST /chat/
async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    if request.session_id.trim().is_empty() {
        return Err(ApiError::bad_request("session_id cannot be empty"));
    }
    if request.query.trim().is_empty() {
        return Err(ApiError::bad_request("query cannot be empty"));
    }

    // 히스토리 + 이번 질문으로 턴 구성
    let mut messages = state
        .sessions
        .history(&request.session_id, HISTORY_LIMIT)
        .map_err(ApiError::from_anyhow)?;
    messages.push(ChatMessage::user(request.query.as_str()));

    let outcome = state
        .agent
        .run_turn(&messages, request.enable_web_search)
        .await
        .map_err(ApiError::from_anyhow)?;

    // 턴이 성공한 뒤에만 기록 (실패한 턴은 히스토리에 남기지 않음)
    state
        .sessions
        .append(&request.session_id, "user", &request.query)
        .map_err(ApiError::from_anyhow)?;
    state
        .sessions
        .append(&request.session_id, "assistant", &outcome.answer)
        .map_err(ApiError::from_anyhow)?;

    Ok(Json(ChatResponse {
        response: outcome.answer,
        trace_events: outcome.trace,
    }))
}

/// POST /upload-document/
async fn upload_document(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart form: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field
            .file_name()
            .unwrap_or("uploaded-document")
            .to_string();

        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("Failed to read upload: {}", e)))?;

        let text = extract_upload_text(&filename, bytes.to_vec())
            .await
            .map_err(|e| ApiError::bad_request(format!("Could not extract text: {:#}", e)))?;

        let processed_chunks = state
            .knowledge
            .ingest_text(&text, Some(&filename))
            .await
            .map_err(ApiError::from_anyhow)?;

        tracing::info!("Uploaded '{}' ({} chunks)", filename, processed_chunks);

        return Ok(Json(UploadResponse {
            filename,
            processed_chunks,
        }));
    }

    Err(ApiError::bad_request("Missing 'file' field in multipart form"))
}

// ============================================================================
// Tests
// ============================================================================
