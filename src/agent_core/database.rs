//! SQLite persistence for chats and messages.
//!
//! Uses `rusqlite` in synchronous mode behind a mutex so a single store can
//! be shared by concurrent chats. WAL mode is enabled for concurrent reads.

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

use super::errors::AgentError;
use super::types::{now, Chat, ContentType, Message, MessageRole, Role, ToolCallRecord};

/// Title given to chats created implicitly by their first message.
pub const DEFAULT_CHAT_TITLE: &str = "New chat";

// ─── Persistence Contract ───────────────────────────────────────────────────

/// The keyed message store the conversation layer depends on.
pub trait MessageStore: Send + Sync {
    /// Persist one message. Creates its chat if it does not exist yet.
    fn save(&self, message: &Message) -> Result<(), AgentError>;

    /// All messages of a chat, ordered by `created_at`.
    fn load_history(&self, chat_id: &str) -> Result<Vec<Message>, AgentError>;
}

// ─── Database ───────────────────────────────────────────────────────────────

/// SQLite database handle for the agent core.
pub struct AgentDatabase {
    conn: Mutex<Connection>,
}

impl AgentDatabase {
    /// Open (or create) the database at the given path.
    ///
    /// Pass `":memory:"` for an in-memory database (tests).
    pub fn open(path: &str) -> Result<Self, AgentError> {
        let conn = Connection::open(path)?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.create_tables()?;
        Ok(db)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, AgentError> {
        self.conn.lock().map_err(|e| AgentError::DatabaseError {
            reason: format!("connection lock poisoned: {e}"),
        })
    }

    fn create_tables(&self) -> Result<(), AgentError> {
        self.lock()?.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS chats (
                id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                title TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                chat_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                role TEXT NOT NULL,
                content_type TEXT NOT NULL,
                content TEXT,
                system_content TEXT,
                role_name TEXT NOT NULL,
                role_color TEXT NOT NULL,
                tool_call TEXT,
                FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_messages_chat
                ON messages(chat_id, created_at, seq);
            ",
        )?;
        Ok(())
    }

    // ─── Chats ──────────────────────────────────────────────────────────

    /// Create a new chat with a fresh id.
    pub fn create_chat(&self, title: &str) -> Result<Chat, AgentError> {
        let chat = Chat {
            id: Uuid::new_v4().to_string(),
            created_at: now(),
            title: title.to_string(),
        };
        self.lock()?.execute(
            "INSERT INTO chats (id, created_at, title) VALUES (?1, ?2, ?3)",
            params![chat.id, format_timestamp(&chat.created_at), chat.title],
        )?;
        Ok(chat)
    }

    /// List all chats, newest first.
    pub fn list_chats(&self) -> Result<Vec<Chat>, AgentError> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT id, created_at, title FROM chats ORDER BY created_at DESC")?;

        let rows = stmt.query_map([], |row| {
            Ok(Chat {
                id: row.get(0)?,
                created_at: parse_timestamp_column(row, 1)?,
                title: row.get(2)?,
            })
        })?;

        let mut chats = Vec::new();
        for row in rows {
            chats.push(row?);
        }
        Ok(chats)
    }

    pub fn get_chat(&self, chat_id: &str) -> Result<Chat, AgentError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id, created_at, title FROM chats WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![chat_id], |row| {
            Ok(Chat {
                id: row.get(0)?,
                created_at: parse_timestamp_column(row, 1)?,
                title: row.get(2)?,
            })
        })?;
        match rows.next() {
            Some(chat) => Ok(chat?),
            None => Err(AgentError::ChatNotFound {
                chat_id: chat_id.to_string(),
            }),
        }
    }

    pub fn rename_chat(&self, chat_id: &str, title: &str) -> Result<(), AgentError> {
        let updated = self.lock()?.execute(
            "UPDATE chats SET title = ?2 WHERE id = ?1",
            params![chat_id, title],
        )?;
        if updated == 0 {
            return Err(AgentError::ChatNotFound {
                chat_id: chat_id.to_string(),
            });
        }
        Ok(())
    }

    /// Delete a chat and every message in it.
    pub fn delete_chat(&self, chat_id: &str) -> Result<(), AgentError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM messages WHERE chat_id = ?1", params![chat_id])?;
        tx.execute("DELETE FROM chats WHERE id = ?1", params![chat_id])?;
        tx.commit()?;
        Ok(())
    }

    /// Count messages in a chat.
    pub fn message_count(&self, chat_id: &str) -> Result<usize, AgentError> {
        let count: i64 = self.lock()?.query_row(
            "SELECT COUNT(*) FROM messages WHERE chat_id = ?1",
            params![chat_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

// ─── MessageStore ───────────────────────────────────────────────────────────

impl MessageStore for AgentDatabase {
    fn save(&self, message: &Message) -> Result<(), AgentError> {
        let tool_call_json = message
            .tool_call
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let created_at = format_timestamp(&message.created_at);

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO chats (id, created_at, title) VALUES (?1, ?2, ?3)",
            params![message.chat_id, created_at, DEFAULT_CHAT_TITLE],
        )?;
        tx.execute(
            "INSERT INTO messages
             (id, chat_id, created_at, role, content_type, content, system_content,
              role_name, role_color, tool_call)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                message.id,
                message.chat_id,
                created_at,
                message.role.as_str(),
                message.content_type.as_str(),
                message.content,
                message.system_content,
                message.display_role.name,
                message.display_role.color,
                tool_call_json,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn load_history(&self, chat_id: &str) -> Result<Vec<Message>, AgentError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, chat_id, created_at, role, content_type, content, system_content,
                    role_name, role_color, tool_call
             FROM messages
             WHERE chat_id = ?1
             ORDER BY created_at ASC, seq ASC",
        )?;

        let rows = stmt.query_map(params![chat_id], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row??);
        }
        Ok(messages)
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

/// Fixed-width RFC 3339 so text ordering matches time ordering.
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// Map a row; the outer `Result` is SQLite's, the inner one flags rows whose
/// enum columns hold unknown values.
fn row_to_message(row: &Row<'_>) -> rusqlite::Result<Result<Message, AgentError>> {
    let id: String = row.get(0)?;
    let role_raw: String = row.get(3)?;
    let content_type_raw: String = row.get(4)?;
    let tool_call_raw: Option<String> = row.get(9)?;

    let Some(role) = MessageRole::parse(&role_raw) else {
        return Ok(Err(AgentError::CorruptRecord {
            id,
            reason: format!("unknown role '{role_raw}'"),
        }));
    };
    let Some(content_type) = ContentType::parse(&content_type_raw) else {
        return Ok(Err(AgentError::CorruptRecord {
            id,
            reason: format!("unknown content type '{content_type_raw}'"),
        }));
    };
    let tool_call = match tool_call_raw
        .as_deref()
        .map(serde_json::from_str::<ToolCallRecord>)
        .transpose()
    {
        Ok(tc) => tc,
        Err(e) => {
            return Ok(Err(AgentError::CorruptRecord {
                id,
                reason: format!("bad tool call record: {e}"),
            }))
        }
    };

    Ok(Ok(Message {
        id,
        chat_id: row.get(1)?,
        created_at: parse_timestamp_column(row, 2)?,
        role,
        content_type,
        content: row.get(5)?,
        system_content: row.get(6)?,
        display_role: Role::new(row.get::<_, String>(7)?, row.get::<_, String>(8)?),
        tool_call,
    }))
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn test_db() -> AgentDatabase {
        AgentDatabase::open(":memory:").unwrap()
    }

    fn user(chat_id: &str, text: &str) -> Message {
        Message::user_text(chat_id, text, Role::user("User"))
    }

    #[test]
    fn test_save_creates_chat_implicitly() {
        let db = test_db();
        db.save(&user("c1", "hello")).unwrap();

        let chats = db.list_chats().unwrap();
        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0].id, "c1");
        assert_eq!(chats[0].title, DEFAULT_CHAT_TITLE);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let db = test_db();
        let call = ToolCallRecord {
            id: "call_1".into(),
            name: "fs__read_file".into(),
            arguments: serde_json::json!({"path": "X"}),
        };
        let first = user("c1", "read file X");
        let second = Message::tool_result("c1", call.clone(), "contents...", Role::application("App"))
            .stamped_after(Some(first.created_at));
        db.save(&first).unwrap();
        db.save(&second).unwrap();

        let history = db.load_history("c1").unwrap();
        assert_eq!(history, vec![first, second]);
        assert_eq!(history[1].tool_call, Some(call));
    }

    #[test]
    fn test_load_history_orders_by_created_at() {
        let db = test_db();
        let later = user("c1", "second");
        let mut earlier = user("c1", "first");
        earlier.created_at = later.created_at - Duration::seconds(5);

        // Inserted out of order on purpose.
        db.save(&later).unwrap();
        db.save(&earlier).unwrap();

        let texts: Vec<_> = db
            .load_history("c1")
            .unwrap()
            .into_iter()
            .map(|m| m.content.unwrap())
            .collect();
        assert_eq!(texts, vec!["first", "second"]);
    }

    #[test]
    fn test_equal_timestamps_keep_insertion_order() {
        let db = test_db();
        let a = user("c1", "a");
        let mut b = user("c1", "b");
        b.created_at = a.created_at;
        db.save(&a).unwrap();
        db.save(&b).unwrap();

        let history = db.load_history("c1").unwrap();
        assert_eq!(history[0].content.as_deref(), Some("a"));
        assert_eq!(history[1].content.as_deref(), Some("b"));
    }

    #[test]
    fn test_history_is_scoped_to_chat() {
        let db = test_db();
        db.save(&user("c1", "one")).unwrap();
        db.save(&user("c2", "two")).unwrap();

        assert_eq!(db.load_history("c1").unwrap().len(), 1);
        assert_eq!(db.load_history("c2").unwrap().len(), 1);
        assert!(db.load_history("c3").unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_message_id_rejected() {
        let db = test_db();
        let msg = user("c1", "once");
        db.save(&msg).unwrap();
        assert!(db.save(&msg).is_err());
    }

    #[test]
    fn test_create_rename_delete_chat() {
        let db = test_db();
        let chat = db.create_chat("Groceries").unwrap();
        db.save(&user(&chat.id, "milk")).unwrap();

        db.rename_chat(&chat.id, "Shopping").unwrap();
        assert_eq!(db.list_chats().unwrap()[0].title, "Shopping");

        db.delete_chat(&chat.id).unwrap();
        assert!(db.list_chats().unwrap().is_empty());
        assert_eq!(db.message_count(&chat.id).unwrap(), 0);
    }

    #[test]
    fn test_missing_chat() {
        let db = test_db();
        let err = db.rename_chat("nope", "title").unwrap_err();
        assert!(matches!(err, AgentError::ChatNotFound { .. }));
        let err = db.get_chat("nope").unwrap_err();
        assert!(matches!(err, AgentError::ChatNotFound { .. }));
    }

    #[test]
    fn test_get_chat() {
        let db = test_db();
        let chat = db.create_chat("Groceries").unwrap();
        assert_eq!(db.get_chat(&chat.id).unwrap(), chat);
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aichat.db");
        let path = path.to_str().unwrap();

        {
            let db = AgentDatabase::open(path).unwrap();
            db.save(&user("c1", "persisted")).unwrap();
        }

        let db = AgentDatabase::open(path).unwrap();
        assert_eq!(db.load_history("c1").unwrap()[0].content.as_deref(), Some("persisted"));
    }
}
