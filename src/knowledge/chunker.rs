//! Text Chunking Module
//!
//! source: D:\010 Web Applicaton\palan-k\core\src\knowledge\chunker.rs (단순화)
//!
//! 슬라이딩 윈도우 방식의 문자 단위 분할을 제공합니다.
//! 동일한 입력과 설정이면 항상 동일한 청크 수가 나옵니다:
//! len <= size이면 1개, 아니면 1 + ceil((len - size) / (size - overlap))개.

use super::vector::IngestError;

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 청킹 설정
#[derive(Debug, Clone, Copy)]
pub struct ChunkConfig {
    /// 청크 크기 (문자 수)
    pub chunk_size: usize,
    /// 청크 간 중첩 (문자 수)
    pub chunk_overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

// ============================================================================
// Chunker Trait
// ============================================================================

/// 텍스트 청킹 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 텍스트를 청크로 분할
    fn chunk(&self, text: &str) -> Vec<String>;

    /// 청커 이름
    fn name(&self) -> &'static str;
}

// ============================================================================
// SlidingWindowChunker
// ============================================================================

/// 슬라이딩 윈도우 청커
///
/// 문자 개수 기준으로 고정 크기 윈도우를 overlap만큼 겹치며 이동합니다.
/// UTF-8 다중 바이트 문자 경계를 깨지 않습니다.
pub struct SlidingWindowChunker {
    config: ChunkConfig,
}

impl SlidingWindowChunker {
    /// 설정으로 생성
    ///
    /// overlap이 size 이상이면 윈도우가 전진하지 못하므로 설정 오류입니다.
    pub fn new(config: ChunkConfig) -> Result<Self, IngestError> {
        if config.chunk_size == 0 || config.chunk_overlap >= config.chunk_size {
            return Err(IngestError::InvalidChunkConfig {
                size: config.chunk_size,
                overlap: config.chunk_overlap,
            });
        }

        Ok(Self { config })
    }

    /// 기본 설정(1000/200)으로 생성
    pub fn with_defaults() -> Self {
        Self {
            config: ChunkConfig::default(),
        }
    }

    /// 설정 조회
    pub fn config(&self) -> ChunkConfig {
        self.config
    }
}

impl Chunker for SlidingWindowChunker {
    fn chunk(&self, text: &str) -> Vec<String> {
        let text = text.trim();
        if text.is_empty() {
            return vec![];
        }

        // 문자 경계의 바이트 오프셋 테이블
        let mut boundaries: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
        boundaries.push(text.len());

        let total_chars = boundaries.len() - 1;
        let size = self.config.chunk_size;

        if total_chars <= size {
            return vec![text.to_string()];
        }

        let step = size - self.config.chunk_overlap;
        let mut chunks = Vec::new();
        let mut start = 0;

        while start < total_chars {
            let end = (start + size).min(total_chars);
            chunks.push(text[boundaries[start]..boundaries[end]].to_string());

            if end >= total_chars {
                break;
            }
            start += step;
        }

        chunks
    }

    fn name(&self) -> &'static str {
        "SlidingWindowChunker"
    }
}

// ============================================================================
// Factory Functions
// ============================================================================

/// 기본 청커 생성
pub fn default_chunker() -> Box<dyn Chunker> {
    Box::new(SlidingWindowChunker::with_defaults())
}

/// 예상 청크 수 계산
///
/// 청크 수 불변식의 기준 공식입니다.
pub fn expected_chunk_count(total_chars: usize, config: ChunkConfig) -> usize {
    if total_chars == 0 {
        return 0;
    }
    if total_chars <= config.chunk_size {
        return 1;
    }

    let step = config.chunk_size - config.chunk_overlap;
    let remaining = total_chars - config.chunk_size;
    1 + remaining.div_ceil(step)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(size: usize, overlap: usize) -> SlidingWindowChunker {
        SlidingWindowChunker::new(ChunkConfig {
            chunk_size: size,
            chunk_overlap: overlap,
        })
        .unwrap()
    }

    #[test]
    fn test_chunker_empty() {
        let chunks = SlidingWindowChunker::with_defaults().chunk("");
        assert!(chunks.is_empty());

        let chunks = SlidingWindowChunker::with_defaults().chunk("   \n  ");
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_chunker_small_text_single_chunk() {
        let chunks = chunker(100, 20).chunk("short text");
        assert_eq!(chunks, vec!["short text".to_string()]);
    }

    #[test]
    fn test_chunker_window_contents() {
        // 10자, size 4, overlap 1 -> step 3 -> [0..4], [3..7], [6..10]
        let chunks = chunker(4, 1).chunk("abcdefghij");
        assert_eq!(chunks, vec!["abcd", "defg", "ghij"]);
    }

    #[test]
    fn test_chunk_count_formula() {
        let config = ChunkConfig {
            chunk_size: 100,
            chunk_overlap: 20,
        };
        let chunker = SlidingWindowChunker::new(config).unwrap();

        for chars in [1usize, 99, 100, 101, 180, 181, 500, 1000] {
            let text: String = "a".repeat(chars);
            let chunks = chunker.chunk(&text);
            assert_eq!(
                chunks.len(),
                expected_chunk_count(chars, config),
                "count mismatch for {} chars",
                chars
            );
        }
    }

    #[test]
    fn test_chunker_deterministic() {
        let text = "The heart pumps blood through the body. ".repeat(50);
        let first = chunker(100, 20).chunk(&text);
        let second = chunker(100, 20).chunk(&text);
        assert_eq!(first, second);
    }

    #[test]
    fn test_chunker_utf8_boundaries() {
        // 다중 바이트 문자에서 경계가 깨지지 않아야 함
        let text = "심장 건강 정보 ".repeat(40);
        let chunks = chunker(50, 10).chunk(&text);

        assert!(!chunks.is_empty());
        let total: usize = chunks.iter().map(|c| c.chars().count()).sum();
        assert!(total >= text.trim().chars().count());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let overlap_too_big = SlidingWindowChunker::new(ChunkConfig {
            chunk_size: 100,
            chunk_overlap: 100,
        });
        assert!(overlap_too_big.is_err());

        let zero_size = SlidingWindowChunker::new(ChunkConfig {
            chunk_size: 0,
            chunk_overlap: 0,
        });
        assert!(zero_size.is_err());
    }
}
