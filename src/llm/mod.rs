//! LLM 모듈 - Groq Chat Completions 호출
//!
//! 라우팅 판단 / 충분성 판정 / 답변 생성의 세 가지 호출 형태를 제공합니다.
//! 구조화 출력(JSON mode)이 깨진 경우는 안전한 기본 경로가 없으므로
//! 즉시 오류로 전파합니다.
//!
//! ref: https://console.groq.com/docs/api-reference#chat

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Settings;

/// Groq Chat Completions 엔드포인트 (OpenAI 호환)
const GROQ_CHAT_URL: &str = "https://api.groq.com/openai/v1/chat/completions";

/// 분류성 호출(라우팅/판정)용 온도
const CLASSIFY_TEMPERATURE: f32 = 0.0;

/// 답변 생성용 온도 (생성 호출이므로 분류보다 높게)
const SYNTHESIS_TEMPERATURE: f32 = 0.7;

// ============================================================================
// Conversation Types
// ============================================================================

/// 대화 메시지 (세션 히스토리 및 API 요청 공용)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// "user" | "assistant" | "system"
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }
}

// ============================================================================
// Route Contract
// ============================================================================

/// 라우팅 경로 - 닫힌 4-케이스 태그
///
/// 전이 테이블을 컴파일 타임에 전수 검사할 수 있도록
/// 열린 문자열 대신 enum으로 고정합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// 지식베이스 검색
    KnowledgeBase,
    /// 웹 검색
    Web,
    /// 검색 없이 바로 답변 생성
    DirectAnswer,
    /// 턴 즉시 종료 (인사/작별)
    End,
}

impl Route {
    /// wire 라벨 (trace 및 모델 계약과 공유)
    pub fn label(&self) -> &'static str {
        match self {
            Route::KnowledgeBase => "knowledge_base",
            Route::Web => "web_search",
            Route::DirectAnswer => "direct_answer",
            Route::End => "end",
        }
    }

    /// wire 라벨 파싱 - 알 수 없는 라벨은 오류 (기본 경로 없음)
    pub fn parse(label: &str) -> Result<Self> {
        match label.trim() {
            "knowledge_base" => Ok(Route::KnowledgeBase),
            "web_search" => Ok(Route::Web),
            "direct_answer" => Ok(Route::DirectAnswer),
            "end" => Ok(Route::End),
            other => anyhow::bail!("Unknown route label from model: '{}'", other),
        }
    }
}

/// 라우터의 구조화 출력
#[derive(Debug, Clone)]
pub struct RouteDecision {
    pub route: Route,
    /// route가 End일 때만 사용되는 즉답
    pub reply: Option<String>,
}

// ============================================================================
// LanguageModel Trait
// ============================================================================

/// LLM collaborator 트레이트
///
/// 외부 LLM은 정확히 세 가지 호출 형태로만 사용합니다.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// 라우팅 판단 (구조화 출력)
    async fn decide_route(&self, question: &str, web_search_enabled: bool)
        -> Result<RouteDecision>;

    /// 검색 컨텍스트 충분성 판정 (구조화 출력)
    async fn judge_sufficiency(&self, question: &str, context: &str) -> Result<bool>;

    /// 답변 생성 (자유 텍스트)
    async fn synthesize(&self, prompt: &str) -> Result<String>;
}

// ============================================================================
// Prompts
// ============================================================================

/// 라우터 시스템 프롬프트
///
/// 웹 검색 허용 여부를 파라미터로 받는 단일 템플릿입니다.
/// 허용/비허용 분기별 프롬프트 사본을 두지 않고, 비허용 시의 강제 전환은
/// 호출부의 결정적 후처리 규칙으로 수행합니다.
fn router_system_prompt(web_search_enabled: bool) -> String {
    let availability = if web_search_enabled {
        "enabled"
    } else {
        "disabled"
    };

    format!(
        r#"You are the routing step of a cardiac health assistant. Read the user's latest message and choose exactly one route:

- "knowledge_base": medical questions the curated document collection may answer (conditions, symptoms, treatments, prevention).
- "web_search": questions that need current or time-sensitive information (news, recent guidelines, statistics).
- "direct_answer": conversation that deserves a substantive reply but needs no retrieval.
- "end": greetings or farewells that close the turn; supply the reply yourself.

Web search is currently {availability} for this turn.

Examples:
- "What are the symptoms of a heart attack?" -> {{"route": "knowledge_base"}}
- "What changed in this year's hypertension guidelines?" -> {{"route": "web_search"}}
- "Can you explain that more simply?" -> {{"route": "direct_answer"}}
- "Thanks, goodbye!" -> {{"route": "end", "reply": "Goodbye! Take care of your heart."}}

Respond with a single JSON object: {{"route": "<knowledge_base|web_search|direct_answer|end>", "reply": "<only when route is end>"}}"#
    )
}

/// 충분성 판정 시스템 프롬프트
const JUDGE_SYSTEM_PROMPT: &str = r#"You judge whether retrieved context is sufficient to answer a user's question about cardiac health. An empty or irrelevant retrieval is never sufficient. Respond with a single JSON object: {"sufficient": true} or {"sufficient": false}"#;

// ============================================================================
// Structured Output Parsing
// ============================================================================

/// 라우터 wire 포맷
#[derive(Debug, Deserialize)]
struct RouteWire {
    route: String,
    #[serde(default)]
    reply: Option<String>,
}

/// 판정 wire 포맷
#[derive(Debug, Deserialize)]
struct VerdictWire {
    sufficient: bool,
}

/// 라우팅 구조화 출력 파싱 - 실패는 치명적
fn parse_route_decision(content: &str) -> Result<RouteDecision> {
    let wire: RouteWire = serde_json::from_str(content.trim())
        .with_context(|| format!("Malformed routing output from model: {}", content))?;

    let route = Route::parse(&wire.route)?;
    let reply = wire.reply.filter(|r| !r.trim().is_empty());

    Ok(RouteDecision { route, reply })
}

/// 판정 구조화 출력 파싱 - 실패는 치명적
fn parse_verdict(content: &str) -> Result<bool> {
    let wire: VerdictWire = serde_json::from_str(content.trim())
        .with_context(|| format!("Malformed sufficiency output from model: {}", content))?;
    Ok(wire.sufficient)
}

// ============================================================================
// Groq Implementation
// ============================================================================

/// Groq API 요청 본문 (OpenAI 호환)
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

/// Groq API 응답
#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// Groq API 에러 응답
#[derive(Debug, Deserialize)]
struct GroqError {
    error: GroqErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GroqErrorDetail {
    message: String,
    #[serde(default, rename = "type")]
    error_type: String,
}

/// Groq 구현체
///
/// 프로세스당 한 번 생성하여 공유합니다. 재시도 없음 - 실패 처리는
/// 호출부의 정책 분기가 담당합니다.
#[derive(Debug)]
pub struct GroqModel {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl GroqModel {
    /// 새 Groq 클라이언트 생성
    pub fn new(api_key: String, model: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client for Groq")?;

        Ok(Self {
            api_key,
            model,
            client,
        })
    }

    /// Settings에서 생성 (필수 키 검증 포함)
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        settings.require_llm()?;
        let api_key = settings
            .groq_api_key
            .clone()
            .context("GROQ_API_KEY missing after validation")?;

        Self::new(api_key, settings.groq_model.clone(), settings.request_timeout)
    }

    /// 채팅 호출 공통 경로
    ///
    /// json_mode가 true면 response_format=json_object로 구조화 출력을 강제합니다.
    async fn chat(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        json_mode: bool,
    ) -> Result<String> {
        let request = ChatRequest {
            model: self.model.as_str(),
            messages,
            temperature,
            response_format: json_mode.then_some(ResponseFormat {
                format_type: "json_object",
            }),
        };

        let response = self
            .client
            .post(GROQ_CHAT_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("Failed to send chat request to Groq")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read Groq response body")?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<GroqError>(&body) {
                anyhow::bail!(
                    "Groq API error ({}): {}",
                    error.error.error_type,
                    error.error.message
                );
            }
            anyhow::bail!("Groq API error ({}): {}", status, body);
        }

        let parsed: ChatResponse =
            serde_json::from_str(&body).context("Failed to parse Groq response")?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .context("Groq response contained no choices")?;

        Ok(content)
    }
}

#[async_trait]
impl LanguageModel for GroqModel {
    async fn decide_route(
        &self,
        question: &str,
        web_search_enabled: bool,
    ) -> Result<RouteDecision> {
        let messages = [
            ChatMessage::system(router_system_prompt(web_search_enabled)),
            ChatMessage::user(question),
        ];

        let content = self.chat(&messages, CLASSIFY_TEMPERATURE, true).await?;
        tracing::debug!("Router raw output: {}", content);

        parse_route_decision(&content)
    }

    async fn judge_sufficiency(&self, question: &str, context: &str) -> Result<bool> {
        let user = format!(
            "Question: {}\n\nRetrieved context:\n{}",
            question,
            if context.trim().is_empty() {
                "(empty)"
            } else {
                context
            }
        );

        let messages = [ChatMessage::system(JUDGE_SYSTEM_PROMPT), ChatMessage::user(user)];

        let content = self.chat(&messages, CLASSIFY_TEMPERATURE, true).await?;
        tracing::debug!("Sufficiency raw output: {}", content);

        parse_verdict(&content)
    }

    async fn synthesize(&self, prompt: &str) -> Result<String> {
        let messages = [ChatMessage::user(prompt)];
        self.chat(&messages, SYNTHESIS_TEMPERATURE, false).await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_labels_round() {
        for route in [
            Route::KnowledgeBase,
            Route::Web,
            Route::DirectAnswer,
            Route::End,
        ] {
            assert_eq!(Route::parse(route.label()).unwrap(), route);
        }
    }

    #[test]
    fn test_route_parse_unknown_is_error() {
        let err = Route::parse("rag").unwrap_err();
        assert!(err.to_string().contains("Unknown route label"));
    }

    #[test]
    fn test_parse_route_decision() {
        let decision = parse_route_decision(r#"{"route": "knowledge_base"}"#).unwrap();
        assert_eq!(decision.route, Route::KnowledgeBase);
        assert!(decision.reply.is_none());

        let decision =
            parse_route_decision(r#"{"route": "end", "reply": "Goodbye!"}"#).unwrap();
        assert_eq!(decision.route, Route::End);
        assert_eq!(decision.reply.as_deref(), Some("Goodbye!"));
    }

    #[test]
    fn test_parse_route_decision_blank_reply_dropped() {
        let decision = parse_route_decision(r#"{"route": "end", "reply": "  "}"#).unwrap();
        assert!(decision.reply.is_none());
    }

    #[test]
    fn test_parse_route_decision_malformed_is_error() {
        assert!(parse_route_decision("I think knowledge_base").is_err());
        assert!(parse_route_decision(r#"{"route": "mystery"}"#).is_err());
    }

    #[test]
    fn test_parse_verdict() {
        assert!(parse_verdict(r#"{"sufficient": true}"#).unwrap());
        assert!(!parse_verdict(r#"{"sufficient": false}"#).unwrap());
        assert!(parse_verdict(r#"{"verdict": "yes"}"#).is_err());
    }

    #[test]
    fn test_router_prompt_single_template() {
        let enabled = router_system_prompt(true);
        let disabled = router_system_prompt(false);

        assert!(enabled.contains("currently enabled"));
        assert!(disabled.contains("currently disabled"));

        // 허용 여부 문구 외에는 동일한 템플릿이어야 함
        assert_eq!(
            enabled.replace("currently enabled", "currently disabled"),
            disabled
        );
    }

    #[test]
    fn test_chat_message_constructors() {
        assert_eq!(ChatMessage::user("hi").role, "user");
        assert_eq!(ChatMessage::assistant("hi").role, "assistant");
        assert_eq!(ChatMessage::system("hi").role, "system");
    }
}
