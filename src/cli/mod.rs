//! CLI 모듈
//!
//! medagent-heart 운영 명령어 정의 및 구현
//! 서버 실행, 문서 수집, 검색 확인, 상태 점검을 제공합니다.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use crate::collector::{CollectionStats, CollectorConfig, FileCollector, FileType};
use crate::config::Settings;
use crate::extractor::ContentExtractor;
use crate::knowledge::{KnowledgeBase, PineconeStore};
use crate::server::AppState;
use crate::session::{SessionStore, get_data_dir};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "medagent-heart")]
#[command(version, about = "심장 건강 RAG 챗봇 백엔드", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// HTTP 서버 실행
    Serve {
        /// 포트 (기본: PORT 환경변수 또는 8000)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// 파일, 폴더, 또는 텍스트를 지식베이스에 추가
    Ingest {
        /// 수집할 파일 경로
        #[arg(long)]
        file: Option<PathBuf>,

        /// 수집할 폴더 경로 (재귀, 생략 시 DOC_SOURCE_DIR)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// 직접 입력할 텍스트
        #[arg(short, long)]
        text: Option<String>,

        /// 출처 메타데이터 태그
        #[arg(short, long)]
        source: Option<String>,

        /// PDF 파일 건너뛰기
        #[arg(long)]
        skip_pdfs: bool,
    },

    /// 지식베이스 검색 (라우팅 없이 원시 조회)
    Query {
        /// 검색 질문
        query: String,

        /// 결과 개수 제한
        #[arg(short = 'k', long, default_value = "5")]
        top_k: usize,
    },

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Serve { port } => cmd_serve(port).await,
        Commands::Ingest {
            file,
            dir,
            text,
            source,
            skip_pdfs,
        } => cmd_ingest(file, dir, text, source, skip_pdfs).await,
        Commands::Query { query, top_k } => cmd_query(&query, top_k).await,
        Commands::Status => cmd_status().await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 서버 실행 명령어 (serve)
async fn cmd_serve(port: Option<u16>) -> Result<()> {
    let settings = Settings::from_env();

    let state = AppState::build(&settings)
        .await
        .context("서버 상태 초기화 실패")?;

    let port = port.unwrap_or(settings.port);
    println!("[*] 서버 시작: http://0.0.0.0:{}", port);

    crate::server::run(state, port).await
}

/// 문서 수집 명령어 (ingest)
///
/// 파일, 폴더, 또는 직접 입력한 텍스트를 지식베이스에 저장합니다.
/// 아무 입력도 없으면 DOC_SOURCE_DIR 시드 폴더를 수집합니다.
async fn cmd_ingest(
    file: Option<PathBuf>,
    dir: Option<PathBuf>,
    text: Option<String>,
    source: Option<String>,
    skip_pdfs: bool,
) -> Result<()> {
    let settings = Settings::from_env();

    // API 키 확인
    if settings.pinecone_api_key.is_none() {
        bail!(
            "PINECONE_API_KEY가 설정되지 않았습니다.\n\n\
             설정 방법:\n  \
             export PINECONE_API_KEY=your-api-key"
        );
    }

    let knowledge = open_knowledge_base(&settings).await?;

    // 직접 입력 텍스트
    if let Some(ref text_content) = text {
        println!("[*] 텍스트 저장 중...");

        let chunks = knowledge
            .ingest_text(text_content, source.as_deref().or(Some("direct-input")))
            .await
            .context("텍스트 수집 실패")?;

        println!("[OK] {} 청크가 저장되었습니다", chunks);
        return Ok(());
    }

    // 파일/폴더 수집
    let config = CollectorConfig {
        skip_pdfs,
        ..Default::default()
    };
    let collector = FileCollector::new(config);

    let files = if let Some(ref file_path) = file {
        match collector.collect_file(file_path)? {
            Some(f) => vec![f],
            None => {
                println!("[!] 지원하지 않는 파일 형식: {:?}", file_path);
                return Ok(());
            }
        }
    } else {
        let dir_path = dir.unwrap_or_else(|| {
            println!("[*] 기본 시드 디렉토리 사용: {}", settings.doc_source_dir);
            PathBuf::from(&settings.doc_source_dir)
        });
        collector.collect_directory(&dir_path)?
    };

    if files.is_empty() {
        println!("[!] 수집할 파일이 없습니다.");
        return Ok(());
    }

    // 통계 표시
    let stats = CollectionStats::from_files(&files);
    println!("[*] 수집 대상: {} 파일", stats.total_files);
    println!(
        "    텍스트: {}, PDF: {}",
        stats.text_files, stats.pdf_files
    );
    println!("    총 크기: {}", format_bytes(stats.total_size as usize));
    println!();

    let extractor = ContentExtractor::new();

    // 파일별 처리
    let mut success_count = 0;
    let mut error_count = 0;
    let mut total_chunks = 0;

    for (i, collected_file) in files.iter().enumerate() {
        let file_name = collected_file
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown");

        let type_str = match collected_file.file_type {
            FileType::Text => "TXT",
            FileType::Pdf => "PDF",
        };

        print!(
            "[{}/{}] [{}] {}... ",
            i + 1,
            files.len(),
            type_str,
            file_name
        );

        // 콘텐츠 추출
        let contents = match extractor
            .extract(&collected_file.path, collected_file.file_type)
            .await
        {
            Ok(c) => c,
            Err(e) => {
                println!("실패: {}", e);
                error_count += 1;
                continue;
            }
        };

        // 각 콘텐츠 저장 (PDF는 페이지별)
        let mut file_failed = false;
        for content in contents {
            if content.text.trim().is_empty() {
                continue;
            }

            let source_label = match content.metadata.page_number {
                Some(page) => format!("{} (page {})", file_name, page),
                None => file_name.to_string(),
            };

            match knowledge
                .ingest_text(&content.text, Some(&source_label))
                .await
            {
                Ok(chunks) => total_chunks += chunks,
                Err(e) => {
                    println!("저장 실패: {}", e);
                    error_count += 1;
                    file_failed = true;
                    break;
                }
            }
        }

        if !file_failed {
            println!("완료");
            success_count += 1;
        }
    }

    println!();
    println!(
        "[OK] 완료: 성공 {}, 실패 {}, 총 {} 청크",
        success_count, error_count, total_chunks
    );

    Ok(())
}

/// 검색 명령어 (query)
///
/// 라우팅 없이 벡터 스토어 조회 결과만 확인합니다.
async fn cmd_query(query: &str, top_k: usize) -> Result<()> {
    let settings = Settings::from_env();
    settings.require_vector_store()?;

    println!("[*] 검색 중: \"{}\"", query);

    let knowledge = open_knowledge_base(&settings).await?;
    let results = knowledge
        .retrieve_chunks(query, top_k)
        .await
        .context("검색 실패")?;

    if results.is_empty() {
        println!("\n[!] 검색 결과가 없습니다.");
        return Ok(());
    }

    println!("\n[OK] 검색 결과 ({} 건):\n", results.len());

    for (i, result) in results.iter().enumerate() {
        println!("{}. [점수: {:.4}]", i + 1, result.score);

        if let Some(ref source) = result.source {
            println!("   출처: {}", source);
        }

        println!("   내용: {}", truncate_text(&result.text, 200));
        println!();
    }

    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status() -> Result<()> {
    let settings = Settings::from_env();

    println!("medagent-heart v{}", env!("CARGO_PKG_VERSION"));
    println!();

    // 데이터 디렉토리
    println!("[*] 데이터 디렉토리: {}", get_data_dir().display());
    println!("[*] 모델: {} / 임베딩: {}", settings.groq_model, settings.embed_model);
    println!("[*] 인덱스: {}", settings.pinecone_index_name);

    // API 키 상태
    print_key_status("Groq API 키", settings.groq_api_key.is_some());
    print_key_status("Pinecone API 키", settings.pinecone_api_key.is_some());
    print_key_status("Tavily API 키", settings.tavily_api_key.is_some());

    // 세션 통계
    match SessionStore::open_default() {
        Ok(store) => match store.stats() {
            Ok(stats) => {
                println!(
                    "[OK] 세션: {} 개, 메시지: {} 건",
                    stats.session_count, stats.message_count
                );
            }
            Err(e) => {
                println!("[!] 세션 통계 조회 실패: {}", e);
            }
        },
        Err(e) => {
            println!("[!] SessionStore 열기 실패: {}", e);
        }
    }

    // 벡터 스토어 연결 확인 (API 키가 있을 때만)
    if settings.pinecone_api_key.is_some() {
        match PineconeStore::connect(&settings).await {
            Ok(_) => {
                println!(
                    "[OK] Pinecone 인덱스 '{}' 연결됨",
                    settings.pinecone_index_name
                );
            }
            Err(e) => {
                tracing::debug!("Pinecone 연결 실패: {}", e);
                println!("[!] Pinecone 연결 실패");
            }
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Pinecone 연결 후 KnowledgeBase 구성
async fn open_knowledge_base(settings: &Settings) -> Result<KnowledgeBase> {
    let store = PineconeStore::connect(settings)
        .await
        .context("Pinecone 연결 실패")?;

    Ok(KnowledgeBase::with_default_chunker(Arc::new(store)))
}

/// API 키 상태 한 줄 출력
fn print_key_status(name: &str, present: bool) {
    if present {
        println!("[OK] {}: 설정됨", name);
    } else {
        println!("[!] {}: 미설정", name);
    }
}

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("hello", 10), "hello");
        assert_eq!(truncate_text("hello world", 5), "hello...");
        assert_eq!(truncate_text("hello\nworld", 20), "hello world");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
    }

    #[test]
    fn test_truncate_unicode() {
        let korean = "안녕하세요 세계";
        let truncated = truncate_text(korean, 5);
        assert_eq!(truncated, "안녕하세요...");
    }
}
