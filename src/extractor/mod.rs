//! 콘텐츠 추출 모듈
//!
//! 업로드/수집된 파일에서 텍스트를 추출합니다.
//! - 텍스트 파일: 직접 읽기
//! - PDF 파일: pdf-extract로 텍스트 추출 (CPU 바운드 - spawn_blocking)

pub mod pdf;

use std::path::Path;

use anyhow::{Context, Result};

use crate::collector::FileType;

// ============================================================================
// Extracted Content
// ============================================================================

/// 추출된 콘텐츠
#[derive(Debug, Clone)]
pub struct ExtractedContent {
    /// 추출된 텍스트
    pub text: String,
    /// 원본 파일 타입
    pub source_type: FileType,
    /// 메타데이터 (PDF 페이지 번호 등)
    pub metadata: ContentMetadata,
}

/// 콘텐츠 메타데이터
#[derive(Debug, Clone, Default)]
pub struct ContentMetadata {
    /// PDF 페이지 번호 (1부터 시작)
    pub page_number: Option<usize>,
    /// 총 페이지 수 (PDF)
    pub total_pages: Option<usize>,
}

// ============================================================================
// Content Extractor
// ============================================================================

/// 콘텐츠 추출기
#[derive(Debug, Default)]
pub struct ContentExtractor;

impl ContentExtractor {
    pub fn new() -> Self {
        Self
    }

    /// 파일에서 콘텐츠 추출
    pub async fn extract(&self, path: &Path, file_type: FileType) -> Result<Vec<ExtractedContent>> {
        match file_type {
            FileType::Text => self.extract_text(path).await,
            FileType::Pdf => self.extract_pdf(path).await,
        }
    }

    /// 텍스트 파일에서 추출
    async fn extract_text(&self, path: &Path) -> Result<Vec<ExtractedContent>> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read text file: {:?}", path))?;

        Ok(vec![ExtractedContent {
            text,
            source_type: FileType::Text,
            metadata: ContentMetadata::default(),
        }])
    }

    /// PDF 파일에서 추출 (페이지별)
    async fn extract_pdf(&self, path: &Path) -> Result<Vec<ExtractedContent>> {
        let path = path.to_path_buf();
        let pages = tokio::task::spawn_blocking(move || pdf::extract_text_from_pdf(&path))
            .await
            .context("PDF extraction task failed")??;

        let total_pages = pages.len();

        Ok(pages
            .into_iter()
            .map(|(page_num, text)| ExtractedContent {
                text,
                source_type: FileType::Pdf,
                metadata: ContentMetadata {
                    page_number: Some(page_num),
                    total_pages: Some(total_pages),
                },
            })
            .collect())
    }
}

// ============================================================================
// Upload Extraction
// ============================================================================

/// 업로드 바이트에서 텍스트 추출
///
/// 확장자로 타입을 판별합니다. PDF는 전체 페이지를 이어 붙여 반환하고,
/// 그 외에는 UTF-8 텍스트로 해석합니다.
pub async fn extract_upload_text(filename: &str, bytes: Vec<u8>) -> Result<String> {
    let is_pdf = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false);

    if is_pdf {
        let pages = tokio::task::spawn_blocking(move || pdf::extract_text_from_pdf_bytes(&bytes))
            .await
            .context("PDF extraction task failed")??;

        Ok(pages
            .into_iter()
            .map(|(_, text)| text)
            .collect::<Vec<_>>()
            .join("\n\n"))
    } else {
        String::from_utf8(bytes).context("Uploaded file is not valid UTF-8 text")
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_metadata_default() {
        let meta = ContentMetadata::default();
        assert!(meta.page_number.is_none());
        assert!(meta.total_pages.is_none());
    }

    #[tokio::test]
    async fn test_extract_text_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("note.txt");
        std::fs::write(&path, "heart health basics").unwrap();

        let extractor = ContentExtractor::new();
        let contents = extractor.extract(&path, FileType::Text).await.unwrap();

        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0].text, "heart health basics");
    }

    #[tokio::test]
    async fn test_extract_upload_text_plain() {
        let text = extract_upload_text("notes.txt", b"plain content".to_vec())
            .await
            .unwrap();
        assert_eq!(text, "plain content");
    }

    #[tokio::test]
    async fn test_extract_upload_text_invalid_utf8() {
        let result = extract_upload_text("notes.txt", vec![0xff, 0xfe, 0x00]).await;
        assert!(result.is_err());
    }
}
