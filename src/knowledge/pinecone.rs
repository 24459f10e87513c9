//! Pinecone Vector Store - 호스팅 벡터 DB 클라이언트
//!
//! integrated embedding 인덱스를 사용하므로 텍스트를 그대로 저장/조회합니다.
//! 임베딩 계산은 전부 Pinecone 쪽에서 일어납니다.
//!
//! ref: https://docs.pinecone.io/reference/api/2025-01/data-plane/upsert_records
//! ref: https://docs.pinecone.io/reference/api/2025-01/data-plane/search_records

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Settings;

use super::vector::{ChunkRecord, RetrievedChunk, VectorStore};

/// 컨트롤 플레인 엔드포인트
const CONTROL_PLANE_URL: &str = "https://api.pinecone.io";

/// API 버전 헤더 값
const API_VERSION: &str = "2025-01";

/// 기본 네임스페이스
const NAMESPACE: &str = "__default__";

// ============================================================================
// Wire Types
// ============================================================================

/// 인덱스 설명 응답 (호스트 확인용)
#[derive(Debug, Deserialize)]
struct IndexDescription {
    host: String,
}

/// create-for-model 요청 본문
#[derive(Debug, Serialize)]
struct CreateIndexRequest<'a> {
    name: &'a str,
    cloud: &'static str,
    region: &'a str,
    embed: EmbedSpec<'a>,
}

#[derive(Debug, Serialize)]
struct EmbedSpec<'a> {
    model: &'a str,
    field_map: HashMap<&'static str, &'static str>,
}

/// NDJSON 업서트 레코드
#[derive(Debug, Serialize)]
struct UpsertRecordWire<'a> {
    #[serde(rename = "_id")]
    id: &'a str,
    chunk_text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<&'a str>,
}

/// 텍스트 검색 요청 본문
#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: SearchQuery<'a>,
    fields: [&'static str; 2],
}

#[derive(Debug, Serialize)]
struct SearchQuery<'a> {
    inputs: SearchInputs<'a>,
    top_k: usize,
}

#[derive(Debug, Serialize)]
struct SearchInputs<'a> {
    text: &'a str,
}

/// 검색 응답
#[derive(Debug, Deserialize)]
struct SearchResponse {
    result: SearchResult,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    hits: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(rename = "_score", default)]
    score: f32,
    #[serde(default)]
    fields: HitFields,
}

#[derive(Debug, Deserialize, Default)]
struct HitFields {
    #[serde(default)]
    chunk_text: String,
    #[serde(default)]
    source: Option<String>,
}

// ============================================================================
// PineconeStore
// ============================================================================

/// Pinecone 벡터 저장소 구현
///
/// connect()에서 인덱스 존재를 보장하고 데이터 플레인 호스트를 한 번만
/// 확인합니다. 이후에는 공유 읽기 전용으로 사용합니다.
pub struct PineconeStore {
    api_key: String,
    client: reqwest::Client,
    /// 데이터 플레인 호스트 (https:// 포함)
    host: String,
    index_name: String,
}

impl PineconeStore {
    /// 인덱스 확인/생성 후 연결
    pub async fn connect(settings: &Settings) -> Result<Self> {
        settings.require_vector_store()?;

        let api_key = settings
            .pinecone_api_key
            .clone()
            .context("PINECONE_API_KEY missing after validation")?;

        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .context("Failed to create HTTP client for Pinecone")?;

        let store = Self {
            api_key,
            client,
            host: String::new(),
            index_name: settings.pinecone_index_name.clone(),
        };

        let host = store
            .ensure_index(&settings.pinecone_environment, &settings.embed_model)
            .await?;

        Ok(Self {
            host: normalize_host(&host),
            ..store
        })
    }

    /// 테스트/특수 환경용: 호스트를 직접 지정하여 생성
    pub fn with_host(
        api_key: String,
        index_name: String,
        host: String,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client for Pinecone")?;

        Ok(Self {
            api_key,
            client,
            host: normalize_host(&host),
            index_name,
        })
    }

    /// 인덱스가 없으면 integrated embedding 인덱스로 생성하고 호스트 반환
    async fn ensure_index(&self, region: &str, embed_model: &str) -> Result<String> {
        if let Some(description) = self.describe_index().await? {
            return Ok(description.host);
        }

        tracing::info!("Creating new Pinecone index: {}", self.index_name);

        let request = CreateIndexRequest {
            name: &self.index_name,
            cloud: "aws",
            region,
            embed: EmbedSpec {
                model: embed_model,
                field_map: HashMap::from([("text", "chunk_text")]),
            },
        };

        let response = self
            .client
            .post(format!("{}/indexes/create-for-model", CONTROL_PLANE_URL))
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .json(&request)
            .send()
            .await
            .context("Failed to send create-index request to Pinecone")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read Pinecone create-index response")?;

        if !status.is_success() {
            anyhow::bail!("Pinecone create-index error ({}): {}", status, body);
        }

        let description: IndexDescription =
            serde_json::from_str(&body).context("Failed to parse Pinecone index description")?;

        tracing::info!("Created Pinecone index: {}", self.index_name);
        Ok(description.host)
    }

    /// 인덱스 조회 (없으면 None)
    async fn describe_index(&self) -> Result<Option<IndexDescription>> {
        let response = self
            .client
            .get(format!("{}/indexes/{}", CONTROL_PLANE_URL, self.index_name))
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .send()
            .await
            .context("Failed to send describe-index request to Pinecone")?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read Pinecone describe-index response")?;

        if !status.is_success() {
            anyhow::bail!("Pinecone describe-index error ({}): {}", status, body);
        }

        let description: IndexDescription =
            serde_json::from_str(&body).context("Failed to parse Pinecone index description")?;

        Ok(Some(description))
    }
}

#[async_trait]
impl VectorStore for PineconeStore {
    async fn upsert_chunks(&self, records: &[ChunkRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let body = encode_ndjson(records)?;

        let response = self
            .client
            .post(format!(
                "{}/records/namespaces/{}/upsert",
                self.host, NAMESPACE
            ))
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await
            .context("Failed to send upsert request to Pinecone")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Pinecone upsert error ({}): {}", status, body);
        }

        tracing::info!(
            "Upserted {} chunks into Pinecone index '{}'",
            records.len(),
            self.index_name
        );

        Ok(records.len())
    }

    async fn query(&self, question: &str, top_k: usize) -> Result<Vec<RetrievedChunk>> {
        let request = SearchRequest {
            query: SearchQuery {
                inputs: SearchInputs { text: question },
                top_k,
            },
            fields: ["chunk_text", "source"],
        };

        let response = self
            .client
            .post(format!(
                "{}/records/namespaces/{}/search",
                self.host, NAMESPACE
            ))
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .json(&request)
            .send()
            .await
            .context("Failed to send search request to Pinecone")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read Pinecone search response")?;

        if !status.is_success() {
            anyhow::bail!("Pinecone search error ({}): {}", status, body);
        }

        parse_search_response(&body)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 호스트 문자열 정규화 (스킴 보장)
fn normalize_host(host: &str) -> String {
    let trimmed = host.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}

/// 레코드들을 NDJSON 본문으로 인코딩
fn encode_ndjson(records: &[ChunkRecord]) -> Result<String> {
    let mut lines = Vec::with_capacity(records.len());

    for record in records {
        let wire = UpsertRecordWire {
            id: &record.id,
            chunk_text: &record.text,
            source: record.source.as_deref(),
        };
        lines.push(serde_json::to_string(&wire).context("Failed to encode upsert record")?);
    }

    Ok(lines.join("\n"))
}

/// 검색 응답 파싱
fn parse_search_response(body: &str) -> Result<Vec<RetrievedChunk>> {
    let parsed: SearchResponse =
        serde_json::from_str(body).context("Failed to parse Pinecone search response")?;

    Ok(parsed
        .result
        .hits
        .into_iter()
        .map(|hit| RetrievedChunk {
            text: hit.fields.chunk_text,
            score: hit.score,
            source: hit.fields.source,
        })
        .collect())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_host() {
        assert_eq!(
            normalize_host("my-index-abc.svc.pinecone.io"),
            "https://my-index-abc.svc.pinecone.io"
        );
        assert_eq!(
            normalize_host("https://my-index.svc.pinecone.io/"),
            "https://my-index.svc.pinecone.io"
        );
    }

    #[test]
    fn test_encode_ndjson() {
        let records = vec![
            ChunkRecord {
                id: "a".to_string(),
                text: "first".to_string(),
                source: Some("doc.pdf".to_string()),
            },
            ChunkRecord {
                id: "b".to_string(),
                text: "second".to_string(),
                source: None,
            },
        ];

        let body = encode_ndjson(&records).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains(r#""_id":"a""#));
        assert!(lines[0].contains(r#""source":"doc.pdf""#));
        // source가 없으면 필드 자체를 생략
        assert!(!lines[1].contains("source"));
    }

    #[test]
    fn test_parse_search_response() {
        let body = r#"{
            "result": {
                "hits": [
                    {"_id": "x", "_score": 0.82, "fields": {"chunk_text": "Aspirin info", "source": "heart.pdf"}},
                    {"_id": "y", "_score": 0.61, "fields": {"chunk_text": "Statin info"}}
                ]
            },
            "usage": {"read_units": 1, "embed_total_tokens": 9}
        }"#;

        let chunks = parse_search_response(body).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "Aspirin info");
        assert_eq!(chunks[0].source.as_deref(), Some("heart.pdf"));
        assert!(chunks[0].score > chunks[1].score);
        assert!(chunks[1].source.is_none());
    }

    #[test]
    fn test_parse_search_response_empty_hits() {
        let chunks = parse_search_response(r#"{"result": {"hits": []}}"#).unwrap();
        assert!(chunks.is_empty());
    }
}
