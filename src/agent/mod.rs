//! 라우팅 상태 머신 - 한 턴의 질의 처리 코어
//!
//! router → (rag_lookup | web_search | answer | __end__) 의 비순환 그래프를
//! 순차 실행합니다. 한 턴에 같은 노드를 두 번 방문하지 않으며 노드 실행은
//! 최대 4회입니다.
//!
//! 실패 정책:
//! - 라우팅/판정/답변 생성 호출 실패는 치명적 (안전한 기본 경로 없음)
//! - 지식베이스 검색과 웹 검색 실패는 비치명적 - 다음 경로로 강등되고
//!   trace에만 남습니다

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;

use crate::knowledge::KnowledgeBase;
use crate::llm::{ChatMessage, LanguageModel, Route};
use crate::search::{WebSearchProvider, format_snippets};

/// 지식베이스 검색 top-K
pub const KB_TOP_K: usize = 5;

/// 웹 검색 비활성 시 컨텍스트에 남기는 sentinel
/// (답변 컨텍스트로는 절대 쓰이지 않음)
pub const SEARCH_DISABLED_SENTINEL: &str = "Web search was disabled for this turn.";

/// 컨텍스트가 전혀 없을 때 답변 프롬프트에 넣는 marker
const NO_CONTEXT_MARKER: &str =
    "No external context is available. Answer from your general medical knowledge, and say so when you are unsure.";

/// end 경로에서 모델이 reply를 주지 않았을 때의 기본 인사
pub const DEFAULT_GREETING: &str =
    "Hello! I'm MedAgent-Heart, your cardiac health assistant. Ask me about heart diseases, treatments, symptoms, or prevention.";

/// trace 요약 최대 길이 (문자)
const SUMMARY_MAX_CHARS: usize = 160;

// trace 노드 이름 (UI 계약)
const NODE_ROUTER: &str = "router";
const NODE_RAG: &str = "rag_lookup";
const NODE_WEB: &str = "web_search";
const NODE_ANSWER: &str = "answer";
const NODE_END: &str = "__end__";

// ============================================================================
// Trace
// ============================================================================

/// 상태 머신 한 스텝의 기록
///
/// 제어 흐름에는 영향을 주지 않고 호출자에게 투명성만 제공합니다.
#[derive(Debug, Clone, Serialize)]
pub struct TraceEvent {
    /// 1부터 시작하는 스텝 번호
    pub step: usize,
    pub node_name: String,
    pub description: String,
    /// 구조화된 세부 정보
    pub details: serde_json::Value,
}

/// append-only trace 기록기
#[derive(Debug, Default)]
struct Trace {
    events: Vec<TraceEvent>,
}

impl Trace {
    fn record(&mut self, node_name: &str, description: impl Into<String>, details: serde_json::Value) {
        self.events.push(TraceEvent {
            step: self.events.len() + 1,
            node_name: node_name.to_string(),
            description: description.into(),
            details,
        });
    }
}

// ============================================================================
// Turn State
// ============================================================================

/// 한 턴 동안 누적되는 검색 컨텍스트
///
/// 답변 생성에 넘어간 뒤에는 읽기 전용입니다.
#[derive(Debug, Default)]
struct TurnContext {
    /// 지식베이스 검색 텍스트 (빈 문자열 = 검색했지만 결과 없음/실패)
    kb_context: Option<String>,
    /// 웹 검색 텍스트 (sentinel = 비활성으로 건너뜀)
    web_context: Option<String>,
}

/// router 이후에 실행될 수 있는 노드
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Node {
    RagLookup,
    WebSearch,
    Answer,
}

/// 턴 처리 결과
#[derive(Debug)]
pub struct TurnOutcome {
    /// 이번 턴의 assistant 답변
    pub answer: String,
    /// 스텝별 trace
    pub trace: Vec<TraceEvent>,
}

// ============================================================================
// RagAgent
// ============================================================================

/// 라우팅 에이전트
///
/// collaborator들은 프로세스 시작 시 한 번 생성되어 주입됩니다.
/// 턴별 가변 상태가 없어 여러 턴이 동시에 실행되어도 안전합니다.
pub struct RagAgent {
    model: Arc<dyn LanguageModel>,
    knowledge: Arc<KnowledgeBase>,
    search: Arc<dyn WebSearchProvider>,
}

impl RagAgent {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        knowledge: Arc<KnowledgeBase>,
        search: Arc<dyn WebSearchProvider>,
    ) -> Self {
        Self {
            model,
            knowledge,
            search,
        }
    }

    /// 한 턴 실행
    ///
    /// `messages`는 이번 턴의 새 사용자 질문까지 포함한 대화 전체입니다.
    /// 질문은 가장 최근 user 메시지이며, 없으면 빈 문자열로 처리합니다.
    pub async fn run_turn(
        &self,
        messages: &[ChatMessage],
        web_search_enabled: bool,
    ) -> Result<TurnOutcome> {
        let question = latest_user_question(messages);
        let mut trace = Trace::default();
        let mut ctx = TurnContext::default();

        // --- router ---
        let decision = self
            .model
            .decide_route(&question, web_search_enabled)
            .await
            .context("Router call failed")?;

        let (route, override_reason) = apply_web_policy(decision.route, web_search_enabled);

        let mut details = json!({
            "initial_decision": decision.route.label(),
            "final_decision": route.label(),
        });
        if let Some(reason) = override_reason {
            details["router_override_reason"] = json!(reason);
        }
        trace.record(
            NODE_ROUTER,
            format!("Routing decision: {}", route.label()),
            details,
        );

        // --- transition table (전수 match) ---
        let mut node = match route {
            Route::KnowledgeBase => Node::RagLookup,
            Route::Web => Node::WebSearch,
            Route::DirectAnswer => Node::Answer,
            Route::End => {
                let reply = decision
                    .reply
                    .unwrap_or_else(|| DEFAULT_GREETING.to_string());
                trace.record(
                    NODE_END,
                    "Turn ended by router",
                    json!({ "reply": summarize(&reply) }),
                );
                return Ok(TurnOutcome {
                    answer: reply,
                    trace: trace.events,
                });
            }
        };

        let answer = loop {
            node = match node {
                Node::RagLookup => {
                    self.rag_lookup(&question, web_search_enabled, &mut ctx, &mut trace)
                        .await?
                }
                Node::WebSearch => {
                    self.web_search(&question, web_search_enabled, &mut ctx, &mut trace)
                        .await?
                }
                Node::Answer => break self.answer(&question, &ctx, &mut trace).await?,
            };
        };

        Ok(TurnOutcome {
            answer,
            trace: trace.events,
        })
    }

    /// 지식베이스 조회 노드
    ///
    /// 검색 실패는 비치명적이지만 충분성 판정 실패는 라우터와 동일하게
    /// 치명적으로 전파합니다.
    async fn rag_lookup(
        &self,
        question: &str,
        web_search_enabled: bool,
        ctx: &mut TurnContext,
        trace: &mut Trace,
    ) -> Result<Node> {
        let retrieved = match self.knowledge.retrieve(question, KB_TOP_K).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("Knowledge base retrieval failed: {:#}", e);

                ctx.kb_context = Some(String::new());
                let next = if web_search_enabled {
                    Node::WebSearch
                } else {
                    Node::Answer
                };

                trace.record(
                    NODE_RAG,
                    "Knowledge base retrieval failed; continuing without context",
                    json!({
                        "retrieval_error": e.to_string(),
                        "next_route": next_label(next),
                    }),
                );
                return Ok(next);
            }
        };

        ctx.kb_context = Some(retrieved.clone());

        let sufficient = self
            .model
            .judge_sufficiency(question, &retrieved)
            .await
            .context("Sufficiency judgment call failed")?;

        let next = if sufficient {
            Node::Answer
        } else if web_search_enabled {
            Node::WebSearch
        } else {
            Node::Answer
        };

        let verdict = if sufficient { "Sufficient" } else { "Insufficient" };
        trace.record(
            NODE_RAG,
            format!("Knowledge base lookup judged {}", verdict.to_lowercase()),
            json!({
                "sufficiency_verdict": verdict,
                "retrieved_content_summary": summarize(&retrieved),
                "next_route": next_label(next),
            }),
        );

        Ok(next)
    }

    /// 웹 검색 노드
    ///
    /// 라우터가 비활성 상태에서 여기로 보내지 않더라도 한 번 더 방어합니다.
    async fn web_search(
        &self,
        question: &str,
        web_search_enabled: bool,
        ctx: &mut TurnContext,
        trace: &mut Trace,
    ) -> Result<Node> {
        if !web_search_enabled {
            ctx.web_context = Some(SEARCH_DISABLED_SENTINEL.to_string());
            trace.record(
                NODE_WEB,
                "Web search disabled; skipping",
                json!({ "skipped": true }),
            );
            return Ok(Node::Answer);
        }

        match self.search.search(question).await {
            Ok(snippets) => {
                let block = format_snippets(&snippets);
                trace.record(
                    NODE_WEB,
                    format!("Web search returned {} results", snippets.len()),
                    json!({
                        "result_count": snippets.len(),
                        "retrieved_content_summary": summarize(&block),
                    }),
                );
                ctx.web_context = Some(block);
            }
            Err(e) => {
                tracing::warn!("Web search failed: {:#}", e);

                // 오류 문자열이 답변 컨텍스트로 새지 않도록 빈 컨텍스트로
                ctx.web_context = Some(String::new());
                trace.record(
                    NODE_WEB,
                    "Web search failed; continuing without results",
                    json!({ "search_error": e.to_string() }),
                );
            }
        }

        Ok(Node::Answer)
    }

    /// 답변 생성 노드 - 항상 턴의 마지막 노드
    async fn answer(
        &self,
        question: &str,
        ctx: &TurnContext,
        trace: &mut Trace,
    ) -> Result<String> {
        let context_block = assemble_context(ctx);
        let used_kb = context_block
            .as_deref()
            .map(|c| c.contains("Knowledge base context:"))
            .unwrap_or(false);
        let used_web = context_block
            .as_deref()
            .map(|c| c.contains("Web search results:"))
            .unwrap_or(false);

        let prompt = answer_prompt(question, context_block.as_deref());

        let reply = self
            .model
            .synthesize(&prompt)
            .await
            .context("Answer synthesis call failed")?;

        trace.record(
            NODE_ANSWER,
            "Generated final answer",
            json!({
                "used_knowledge_base": used_kb,
                "used_web_search": used_web,
            }),
        );

        Ok(reply)
    }
}

// ============================================================================
// Policy / Prompt Helpers
// ============================================================================

/// 대화에서 가장 최근 user 질문 추출 (없으면 빈 문자열)
fn latest_user_question(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| m.content.clone())
        .unwrap_or_default()
}

/// 웹 비활성 시 web 결정을 knowledge_base로 강등하는 결정적 후처리
///
/// 모델 추론과 분리된 규칙이라 프롬프트 변형과 무관하게 항상 적용됩니다.
fn apply_web_policy(route: Route, web_search_enabled: bool) -> (Route, Option<&'static str>) {
    if route == Route::Web && !web_search_enabled {
        (
            Route::KnowledgeBase,
            Some("Web search is disabled for this turn; falling back to the knowledge base."),
        )
    } else {
        (route, None)
    }
}

/// 답변 컨텍스트 블록 조립
///
/// sentinel과 빈 텍스트는 사용 가능한 컨텍스트로 치지 않습니다.
fn assemble_context(ctx: &TurnContext) -> Option<String> {
    let kb = ctx
        .kb_context
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty());

    let web = ctx
        .web_context
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty() && *t != SEARCH_DISABLED_SENTINEL);

    match (kb, web) {
        (Some(kb), Some(web)) => Some(format!(
            "Knowledge base context:\n{}\n\nWeb search results:\n{}",
            kb, web
        )),
        (Some(kb), None) => Some(format!("Knowledge base context:\n{}", kb)),
        (None, Some(web)) => Some(format!("Web search results:\n{}", web)),
        (None, None) => None,
    }
}

/// 답변 생성 프롬프트
fn answer_prompt(question: &str, context: Option<&str>) -> String {
    format!(
        "You are MedAgent-Heart, an AI assistant for cardiac health. Answer the user's question accurately and clearly, use the context below when it is relevant, and remind the user to consult healthcare professionals for medical decisions.\n\nContext:\n{}\n\nQuestion: {}\n\nAnswer:",
        context.unwrap_or(NO_CONTEXT_MARKER),
        question
    )
}

/// 다음 노드의 trace 라벨
fn next_label(node: Node) -> &'static str {
    match node {
        Node::RagLookup => "knowledge_base",
        Node::WebSearch => "web_search",
        Node::Answer => "direct_answer",
    }
}

/// trace용 요약 (공백 정리 + 길이 제한)
fn summarize(text: &str) -> String {
    let cleaned = match regex::Regex::new(r"\s+") {
        Ok(re) => re.replace_all(text.trim(), " ").to_string(),
        Err(_) => text.trim().to_string(),
    };

    if cleaned.is_empty() {
        return "(empty)".to_string();
    }

    if cleaned.chars().count() <= SUMMARY_MAX_CHARS {
        cleaned
    } else {
        let truncated: String = cleaned.chars().take(SUMMARY_MAX_CHARS).collect();
        format!("{}...", truncated)
    }
}

// ============================================================================
// Tests
// ============================================================================
