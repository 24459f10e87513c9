//! Session Store - rusqlite 기반 대화 히스토리 저장소
//!
//! source: D:\010 Web Applicaton\palan-k\core\src\knowledge\store.rs (단순화)
//!
//! 세션 ID별 대화 턴을 append-only로 기록합니다.
//! 저장 위치: ~/.medagent-heart/sessions.db
//!
//! 커넥션 뮤텍스가 쓰기를 직렬화하므로 같은 세션에 대한 동시 기록도
//! 순서가 보장됩니다. 세션 간에는 독립적인 키라 제한이 없습니다.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{Connection, OpenFlags, params};
use serde::Serialize;

use crate::llm::ChatMessage;

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.medagent-heart/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".medagent-heart")
}

// ============================================================================
// Types
// ============================================================================

/// 저장소 통계
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub session_count: usize,
    pub message_count: usize,
    pub db_path: PathBuf,
}

// ============================================================================
// SessionStore
// ============================================================================

/// Session Store - 동기 대화 저장소
pub struct SessionStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl SessionStore {
    /// 저장소 열기 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        // 부모 디렉토리 생성
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).context("Failed to create database directory")?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open SQLite database")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        store.initialize()?;
        Ok(store)
    }

    /// 기본 위치에서 열기 (~/.medagent-heart/sessions.db)
    pub fn open_default() -> Result<Self> {
        let data_dir = get_data_dir();
        if !data_dir.exists() {
            std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;
        }

        Self::open(&data_dir.join("sessions.db"))
    }

    /// 인메모리 저장소 (테스트용)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: PathBuf::from(":memory:"),
        };

        store.initialize()?;
        Ok(store)
    }

    /// DB 경로 반환
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )
        .context("Failed to create messages table")?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id)",
            [],
        )
        .context("Failed to create session index")?;

        tracing::debug!("Session store initialized at {:?}", self.db_path);
        Ok(())
    }

    /// 메시지 추가
    pub fn append(&self, session_id: &str, role: &str, content: &str) -> Result<i64> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO messages (session_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![session_id, role, content, now],
        )
        .context("Failed to insert message")?;

        Ok(conn.last_insert_rowid())
    }

    /// ChatMessage 추가
    pub fn append_message(&self, session_id: &str, message: &ChatMessage) -> Result<i64> {
        self.append(session_id, &message.role, &message.content)
    }

    /// 세션 히스토리 조회 (시간순, 최근 limit개)
    pub fn history(&self, session_id: &str, limit: usize) -> Result<Vec<ChatMessage>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn.prepare(
            "SELECT role, content FROM messages
             WHERE session_id = ?1
             ORDER BY id DESC
             LIMIT ?2",
        )?;

        let mut messages: Vec<ChatMessage> = stmt
            .query_map(params![session_id, limit as i64], |row| {
                Ok(ChatMessage {
                    role: row.get(0)?,
                    content: row.get(1)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        // 최근 limit개를 시간순으로 뒤집어 반환
        messages.reverse();
        Ok(messages)
    }

    /// 세션의 메시지 수
    pub fn message_count(&self, session_id: &str) -> Result<usize> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;

        Ok(count as usize)
    }

    /// 저장소 통계
    pub fn stats(&self) -> Result<SessionStats> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let session_count: i64 = conn
            .query_row(
                "SELECT COUNT(DISTINCT session_id) FROM messages",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        let message_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))
            .unwrap_or(0);

        Ok(SessionStats {
            session_count: session_count as usize,
            message_count: message_count as usize,
            db_path: self.db_path.clone(),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_append_and_history_order() {
        let store = SessionStore::open_in_memory().unwrap();

        store.append("s1", "user", "What is angina?").unwrap();
        store.append("s1", "assistant", "Chest pain from ...").unwrap();
        store.append("s1", "user", "How is it treated?").unwrap();

        let history = store.history("s1", 10).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].role, "user");
        assert_eq!(history[0].content, "What is angina?");
        assert_eq!(history[2].content, "How is it treated?");
    }

    #[test]
    fn test_history_respects_limit() {
        let store = SessionStore::open_in_memory().unwrap();

        for i in 0..5 {
            store.append("s1", "user", &format!("message {}", i)).unwrap();
        }

        let history = store.history("s1", 2).unwrap();
        assert_eq!(history.len(), 2);
        // 가장 최근 2개가 시간순으로
        assert_eq!(history[0].content, "message 3");
        assert_eq!(history[1].content, "message 4");
    }

    #[test]
    fn test_sessions_are_isolated() {
        let store = SessionStore::open_in_memory().unwrap();

        store.append("alpha", "user", "hello").unwrap();
        store.append("beta", "user", "world").unwrap();

        assert_eq!(store.history("alpha", 10).unwrap().len(), 1);
        assert_eq!(store.history("beta", 10).unwrap().len(), 1);
        assert!(store.history("gamma", 10).unwrap().is_empty());
    }

    #[test]
    fn test_stats() {
        let store = SessionStore::open_in_memory().unwrap();

        store.append("s1", "user", "a").unwrap();
        store.append("s1", "assistant", "b").unwrap();
        store.append("s2", "user", "c").unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.session_count, 2);
        assert_eq!(stats.message_count, 3);
    }

    #[test]
    fn test_open_creates_parent_dir() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("nested").join("sessions.db");

        let store = SessionStore::open(&db_path).unwrap();
        store
            .append_message("s1", &ChatMessage::user("hi"))
            .unwrap();

        assert!(db_path.exists());
        assert_eq!(store.message_count("s1").unwrap(), 1);
    }
}
