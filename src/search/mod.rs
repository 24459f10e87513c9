//! 웹 검색 모듈 - Tavily Search API
//!
//! 질문에 대한 상위 스니펫(제목/본문/출처)을 가져옵니다.
//! 검색 결과는 답변 생성 컨텍스트로만 쓰이며, 호출 실패 처리는
//! 에이전트의 정책 분기가 담당합니다 (재시도 없음).
//!
//! ref: https://docs.tavily.com/documentation/api-reference/endpoint/search

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Settings;

/// Tavily 검색 엔드포인트
const TAVILY_SEARCH_URL: &str = "https://api.tavily.com/search";

/// 턴당 최대 스니펫 수
pub const MAX_SNIPPETS: usize = 3;

// ============================================================================
// Types
// ============================================================================

/// 검색 스니펫
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSnippet {
    /// 페이지 제목
    pub title: String,
    /// 본문 요약
    pub content: String,
    /// 출처 URL
    pub url: String,
}

// ============================================================================
// WebSearchProvider Trait
// ============================================================================

/// 웹 검색 collaborator 트레이트
#[async_trait]
pub trait WebSearchProvider: Send + Sync {
    /// 질문으로 스니펫 검색 (최대 MAX_SNIPPETS개)
    async fn search(&self, query: &str) -> Result<Vec<SearchSnippet>>;
}

// ============================================================================
// Tavily Implementation
// ============================================================================

/// Tavily 요청 본문
#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    max_results: usize,
    search_depth: &'static str,
    include_answer: bool,
}

/// Tavily 응답
#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResultWire>,
}

#[derive(Debug, Deserialize)]
struct SearchResultWire {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

/// Tavily 검색 구현체
///
/// 프로세스당 한 번 생성하여 공유합니다.
#[derive(Debug)]
pub struct TavilySearch {
    api_key: String,
    client: reqwest::Client,
}

impl TavilySearch {
    /// 새 검색 클라이언트 생성
    pub fn new(api_key: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("medagent-heart/0.1")
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client for Tavily")?;

        Ok(Self { api_key, client })
    }

    /// Settings에서 생성 (필수 키 검증 포함)
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        settings.require_web_search()?;
        let api_key = settings
            .tavily_api_key
            .clone()
            .context("TAVILY_API_KEY missing after validation")?;

        Self::new(api_key, settings.request_timeout)
    }
}

#[async_trait]
impl WebSearchProvider for TavilySearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchSnippet>> {
        let request = SearchRequest {
            query,
            max_results: MAX_SNIPPETS,
            search_depth: "basic",
            include_answer: false,
        };

        let response = self
            .client
            .post(TAVILY_SEARCH_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("Failed to send search request to Tavily")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read Tavily response body")?;

        if !status.is_success() {
            anyhow::bail!("Tavily API error ({}): {}", status, body);
        }

        let parsed: SearchResponse =
            serde_json::from_str(&body).context("Failed to parse Tavily response")?;

        let snippets: Vec<SearchSnippet> = parsed
            .results
            .into_iter()
            .take(MAX_SNIPPETS)
            .map(|r| SearchSnippet {
                title: r.title,
                content: r.content,
                url: r.url,
            })
            .collect();

        tracing::info!(
            "Web search returned {} snippets ({})",
            snippets.len(),
            snippets
                .iter()
                .map(|s| source_host(&s.url))
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(snippets)
    }
}

// ============================================================================
// Unconfigured Fallback
// ============================================================================

/// API 키가 없을 때의 대체 구현
///
/// 항상 실패하는 provider입니다. 에이전트의 웹 검색 실패 정책이
/// 비치명적으로 처리하므로 턴 자체는 계속 진행됩니다.
#[derive(Debug, Default)]
pub struct UnconfiguredSearch;

#[async_trait]
impl WebSearchProvider for UnconfiguredSearch {
    async fn search(&self, _query: &str) -> Result<Vec<SearchSnippet>> {
        anyhow::bail!("TAVILY_API_KEY is not configured; web search is unavailable")
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 스니펫을 답변 컨텍스트 블록으로 렌더링
///
/// 제목/본문/출처 트리플을 구분선으로 이어 붙입니다.
pub fn format_snippets(snippets: &[SearchSnippet]) -> String {
    snippets
        .iter()
        .map(|s| {
            format!(
                "Title: {}\nContent: {}\nSource: {}",
                s.title.trim(),
                s.content.trim(),
                s.url.trim()
            )
        })
        .collect::<Vec<_>>()
        .join("\n---\n")
}

/// 로그 표시용 출처 호스트 추출
fn source_host(raw: &str) -> String {
    url::Url::parse(raw)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .unwrap_or_else(|| raw.to_string())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn snippet(title: &str, content: &str, url: &str) -> SearchSnippet {
        SearchSnippet {
            title: title.to_string(),
            content: content.to_string(),
            url: url.to_string(),
        }
    }

    #[test]
    fn test_format_snippets_empty() {
        assert_eq!(format_snippets(&[]), "");
    }

    #[test]
    fn test_format_snippets_triples() {
        let snippets = vec![
            snippet("A", "alpha", "https://example.com/a"),
            snippet("B", "beta", "https://example.org/b"),
        ];

        let block = format_snippets(&snippets);
        assert!(block.contains("Title: A"));
        assert!(block.contains("Content: beta"));
        assert!(block.contains("Source: https://example.org/b"));
        assert_eq!(block.matches("\n---\n").count(), 1);
    }

    #[test]
    fn test_parse_search_response() {
        let body = r#"{
            "query": "heart disease prevention",
            "results": [
                {"title": "Prevention", "url": "https://example.com", "content": "Exercise.", "score": 0.91},
                {"title": "Diet", "url": "https://example.org", "content": "Less salt.", "score": 0.85}
            ]
        }"#;

        let parsed: SearchResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.results.len(), 2);
        assert_eq!(parsed.results[0].title, "Prevention");
    }

    #[test]
    fn test_parse_search_response_missing_results() {
        let parsed: SearchResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.results.is_empty());
    }

    #[tokio::test]
    async fn test_unconfigured_search_always_fails() {
        let provider = UnconfiguredSearch;
        let err = provider.search("anything").await.unwrap_err();
        assert!(err.to_string().contains("TAVILY_API_KEY"));
    }

    #[test]
    fn test_source_host() {
        assert_eq!(source_host("https://www.heart.org/en/news"), "www.heart.org");
        assert_eq!(source_host("not a url"), "not a url");
    }
}
