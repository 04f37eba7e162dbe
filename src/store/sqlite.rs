//! SQLite-backed store for leads, conversations, and messages.
//!
//! All status-changing writes are guarded by the expected current status
//! (`UPDATE ... WHERE status = ?`), so a stale writer changes zero rows
//! instead of clobbering a concurrent transition.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use crate::error::Error;
use crate::model::{Conversation, ConversationStatus, Lead, Message, Sector, SenderType};

/// How long a resolved conversation stays eligible for reactivation when the
/// customer writes again.
pub const REACTIVATION_WINDOW_HOURS: i64 = 24;

/// Durable record of conversations and their messages.
pub struct ConversationStore {
    conn: Mutex<Connection>,
}

impl ConversationStore {
    /// Open (or create) the store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path.as_ref())
            .map_err(|e| Error::Store(format!("sqlite open: {}", e)))?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory store (tests, dev).
    pub fn open_in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Store(format!("sqlite open: {}", e)))?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), Error> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS leads (
                id INTEGER PRIMARY KEY,
                phone TEXT NOT NULL UNIQUE,
                name TEXT,
                created_at INTEGER NOT NULL,
                last_contact INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS conversations (
                id INTEGER PRIMARY KEY,
                lead_id INTEGER NOT NULL REFERENCES leads(id),
                status TEXT NOT NULL,
                sector TEXT,
                assigned_agent INTEGER,
                intent TEXT,
                started_at INTEGER NOT NULL,
                resolved_at INTEGER
            );
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY,
                conversation_id INTEGER NOT NULL REFERENCES conversations(id),
                sender_type TEXT NOT NULL,
                sender_id TEXT,
                content TEXT NOT NULL,
                is_read INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_conversations_lead ON conversations(lead_id, started_at);
            CREATE INDEX IF NOT EXISTS idx_conversations_status ON conversations(status, sector);
            CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, created_at);
            "#,
        )
        .map_err(|e| Error::Store(format!("sqlite init: {}", e)))?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Leads
    // ------------------------------------------------------------------

    /// Find a lead by phone, creating it on first contact. Refreshes
    /// `last_contact` and fills in the name if it was unknown.
    pub fn get_or_create_lead(&self, phone: &str, name: Option<&str>) -> Result<Lead, Error> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().timestamp_millis();

        let existing = conn
            .query_row(
                "SELECT id, phone, name, created_at, last_contact FROM leads WHERE phone = ?1",
                params![phone],
                row_to_lead,
            )
            .map(Some)
            .or_else(not_found_to_none)
            .map_err(|e| Error::Store(format!("sqlite select lead: {}", e)))?;

        if let Some(lead) = existing {
            conn.execute(
                "UPDATE leads SET last_contact = ?1, name = COALESCE(name, ?2) WHERE id = ?3",
                params![now, name, lead.id],
            )
            .map_err(|e| Error::Store(format!("sqlite touch lead: {}", e)))?;
            return Ok(Lead {
                name: lead.name.or_else(|| name.map(str::to_string)),
                last_contact: ms_to_datetime(now),
                ..lead
            });
        }

        conn.execute(
            "INSERT INTO leads (phone, name, created_at, last_contact) VALUES (?1, ?2, ?3, ?3)",
            params![phone, name, now],
        )
        .map_err(|e| Error::Store(format!("sqlite insert lead: {}", e)))?;

        Ok(Lead {
            id: conn.last_insert_rowid(),
            phone: phone.to_string(),
            name: name.map(str::to_string),
            created_at: ms_to_datetime(now),
            last_contact: ms_to_datetime(now),
        })
    }

    pub fn get_lead(&self, id: i64) -> Result<Lead, Error> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, phone, name, created_at, last_contact FROM leads WHERE id = ?1",
            params![id],
            row_to_lead,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound(format!("lead {}", id)),
            other => Error::Store(format!("sqlite select lead: {}", other)),
        })
    }

    // ------------------------------------------------------------------
    // Conversations
    // ------------------------------------------------------------------

    pub fn get_conversation(&self, id: i64) -> Result<Conversation, Error> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, lead_id, status, sector, assigned_agent, intent, started_at, resolved_at
             FROM conversations WHERE id = ?1",
            params![id],
            row_to_conversation,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                Error::NotFound(format!("conversation {}", id))
            }
            other => Error::Store(format!("sqlite select conversation: {}", other)),
        })
    }

    pub fn create_conversation(&self, lead_id: i64) -> Result<Conversation, Error> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().timestamp_millis();
        conn.execute(
            "INSERT INTO conversations (lead_id, status, started_at) VALUES (?1, ?2, ?3)",
            params![lead_id, ConversationStatus::BotHandling.as_str(), now],
        )
        .map_err(|e| Error::Store(format!("sqlite insert conversation: {}", e)))?;

        Ok(Conversation {
            id: conn.last_insert_rowid(),
            lead_id,
            status: ConversationStatus::BotHandling,
            sector: None,
            assigned_agent: None,
            intent: None,
            started_at: ms_to_datetime(now),
            resolved_at: None,
        })
    }

    /// Latest conversation for a lead that is neither resolved nor closed.
    pub fn find_active_conversation(&self, lead_id: i64) -> Result<Option<Conversation>, Error> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, lead_id, status, sector, assigned_agent, intent, started_at, resolved_at
             FROM conversations
             WHERE lead_id = ?1 AND status NOT IN ('resolved', 'closed')
             ORDER BY started_at DESC LIMIT 1",
            params![lead_id],
            row_to_conversation,
        )
        .map(Some)
        .or_else(not_found_to_none)
        .map_err(|e| Error::Store(format!("sqlite select active conversation: {}", e)))
    }

    /// Latest conversation for a lead resolved within the reactivation window.
    pub fn find_recently_resolved(&self, lead_id: i64) -> Result<Option<Conversation>, Error> {
        let conn = self.conn.lock().unwrap();
        let cutoff =
            Utc::now().timestamp_millis() - REACTIVATION_WINDOW_HOURS * 3_600_000;
        conn.query_row(
            "SELECT id, lead_id, status, sector, assigned_agent, intent, started_at, resolved_at
             FROM conversations
             WHERE lead_id = ?1 AND status = 'resolved'
               AND COALESCE(resolved_at, started_at) > ?2
             ORDER BY started_at DESC LIMIT 1",
            params![lead_id, cutoff],
            row_to_conversation,
        )
        .map(Some)
        .or_else(not_found_to_none)
        .map_err(|e| Error::Store(format!("sqlite select resolved conversation: {}", e)))
    }

    /// Reset a resolved conversation back to the bot. Guarded: changes
    /// nothing if the conversation is no longer `resolved`.
    pub fn reactivate_conversation(&self, id: i64) -> Result<bool, Error> {
        let conn = self.conn.lock().unwrap();
        let changed = conn
            .execute(
                "UPDATE conversations
                 SET status = 'bot_handling', assigned_agent = NULL, sector = NULL,
                     intent = NULL, resolved_at = NULL
                 WHERE id = ?1 AND status = 'resolved'",
                params![id],
            )
            .map_err(|e| Error::Store(format!("sqlite reactivate conversation: {}", e)))?;
        Ok(changed == 1)
    }

    pub fn list_conversations(
        &self,
        status: Option<ConversationStatus>,
        sector: Option<Sector>,
        limit: usize,
    ) -> Result<Vec<Conversation>, Error> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, lead_id, status, sector, assigned_agent, intent, started_at, resolved_at
                 FROM conversations
                 WHERE (?1 IS NULL OR status = ?1) AND (?2 IS NULL OR sector = ?2)
                 ORDER BY started_at DESC LIMIT ?3",
            )
            .map_err(|e| Error::Store(format!("sqlite prepare list: {}", e)))?;
        let rows = stmt
            .query_map(
                params![
                    status.map(ConversationStatus::as_str),
                    sector.map(Sector::as_str),
                    limit as i64
                ],
                row_to_conversation,
            )
            .map_err(|e| Error::Store(format!("sqlite list conversations: {}", e)))?;
        collect_rows(rows)
    }

    /// All waiting conversations grouped by sector, oldest first. Used to
    /// rebuild the in-memory queues on startup so queue membership stays
    /// consistent with stored status.
    pub fn list_waiting(&self) -> Result<Vec<(Sector, i64)>, Error> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT sector, id FROM conversations
                 WHERE status = 'waiting_queue' AND sector IS NOT NULL
                 ORDER BY started_at ASC, id ASC",
            )
            .map_err(|e| Error::Store(format!("sqlite prepare waiting: {}", e)))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(|e| Error::Store(format!("sqlite list waiting: {}", e)))?;

        let mut out = Vec::new();
        for row in rows {
            let (sector, id) =
                row.map_err(|e| Error::Store(format!("sqlite read waiting row: {}", e)))?;
            if let Ok(sector) = sector.parse::<Sector>() {
                out.push((sector, id));
            }
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Guarded status writes (the write-with-version operation)
    // ------------------------------------------------------------------

    /// `from` -> `waiting_queue` with the given sector. Returns false if the
    /// conversation was not in `from` anymore.
    pub fn mark_waiting(
        &self,
        id: i64,
        sector: Sector,
        from: ConversationStatus,
    ) -> Result<bool, Error> {
        let conn = self.conn.lock().unwrap();
        let changed = conn
            .execute(
                "UPDATE conversations SET status = 'waiting_queue', sector = ?1, assigned_agent = NULL
                 WHERE id = ?2 AND status = ?3",
                params![sector.as_str(), id, from.as_str()],
            )
            .map_err(|e| Error::Store(format!("sqlite mark waiting: {}", e)))?;
        Ok(changed == 1)
    }

    /// `from` -> `in_progress` assigned to `agent_id`.
    pub fn mark_assigned(
        &self,
        id: i64,
        agent_id: i64,
        from: ConversationStatus,
    ) -> Result<bool, Error> {
        let conn = self.conn.lock().unwrap();
        let changed = conn
            .execute(
                "UPDATE conversations SET status = 'in_progress', assigned_agent = ?1
                 WHERE id = ?2 AND status = ?3",
                params![agent_id, id, from.as_str()],
            )
            .map_err(|e| Error::Store(format!("sqlite mark assigned: {}", e)))?;
        Ok(changed == 1)
    }

    /// `in_progress` -> `resolved`. Clears the assignment so the
    /// assigned-iff-in-progress invariant holds.
    pub fn mark_resolved(&self, id: i64) -> Result<bool, Error> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().timestamp_millis();
        let changed = conn
            .execute(
                "UPDATE conversations SET status = 'resolved', assigned_agent = NULL, resolved_at = ?1
                 WHERE id = ?2 AND status = 'in_progress'",
                params![now, id],
            )
            .map_err(|e| Error::Store(format!("sqlite mark resolved: {}", e)))?;
        Ok(changed == 1)
    }

    /// Any non-closed status -> `closed`. Sets `resolved_at` if unset.
    pub fn mark_closed(&self, id: i64) -> Result<bool, Error> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().timestamp_millis();
        let changed = conn
            .execute(
                "UPDATE conversations
                 SET status = 'closed', assigned_agent = NULL,
                     resolved_at = COALESCE(resolved_at, ?1)
                 WHERE id = ?2 AND status != 'closed'",
                params![now, id],
            )
            .map_err(|e| Error::Store(format!("sqlite mark closed: {}", e)))?;
        Ok(changed == 1)
    }

    /// Record the classifier's intent on the conversation.
    pub fn set_intent(&self, id: i64, intent: &str) -> Result<(), Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE conversations SET intent = ?1 WHERE id = ?2",
            params![intent, id],
        )
        .map_err(|e| Error::Store(format!("sqlite set intent: {}", e)))?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    pub fn insert_message(
        &self,
        conversation_id: i64,
        sender_type: SenderType,
        sender_id: Option<&str>,
        content: &str,
    ) -> Result<Message, Error> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().timestamp_millis();
        conn.execute(
            "INSERT INTO messages (conversation_id, sender_type, sender_id, content, is_read, created_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5)",
            params![conversation_id, sender_type.as_str(), sender_id, content, now],
        )
        .map_err(|e| Error::Store(format!("sqlite insert message: {}", e)))?;

        Ok(Message {
            id: conn.last_insert_rowid(),
            conversation_id,
            sender_type,
            sender_id: sender_id.map(str::to_string),
            content: content.to_string(),
            is_read: false,
            created_at: ms_to_datetime(now),
        })
    }

    /// Messages in replay order: non-decreasing creation time, then id.
    pub fn list_messages(&self, conversation_id: i64) -> Result<Vec<Message>, Error> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, conversation_id, sender_type, sender_id, content, is_read, created_at
                 FROM messages WHERE conversation_id = ?1
                 ORDER BY created_at ASC, id ASC",
            )
            .map_err(|e| Error::Store(format!("sqlite prepare messages: {}", e)))?;
        let rows = stmt
            .query_map(params![conversation_id], row_to_message)
            .map_err(|e| Error::Store(format!("sqlite list messages: {}", e)))?;
        collect_rows(rows)
    }

    pub fn mark_message_read(&self, id: i64) -> Result<bool, Error> {
        let conn = self.conn.lock().unwrap();
        let changed = conn
            .execute("UPDATE messages SET is_read = 1 WHERE id = ?1", params![id])
            .map_err(|e| Error::Store(format!("sqlite mark read: {}", e)))?;
        Ok(changed == 1)
    }

    // ------------------------------------------------------------------
    // Stats
    // ------------------------------------------------------------------

    /// Conversation counts grouped by status.
    pub fn counts_by_status(&self) -> Result<Vec<(String, i64)>, Error> {
        self.grouped_counts("SELECT status, COUNT(*) FROM conversations GROUP BY status")
    }

    /// Conversation counts grouped by sector (unsectored rows excluded).
    pub fn counts_by_sector(&self) -> Result<Vec<(String, i64)>, Error> {
        self.grouped_counts(
            "SELECT sector, COUNT(*) FROM conversations WHERE sector IS NOT NULL GROUP BY sector",
        )
    }

    fn grouped_counts(&self, sql: &str) -> Result<Vec<(String, i64)>, Error> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| Error::Store(format!("sqlite prepare counts: {}", e)))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(|e| Error::Store(format!("sqlite counts: {}", e)))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| Error::Store(format!("sqlite read count row: {}", e)))?);
        }
        Ok(out)
    }
}

fn collect_rows<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
) -> Result<Vec<T>, Error> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row.map_err(|e| Error::Store(format!("sqlite read row: {}", e)))?);
    }
    Ok(out)
}

fn not_found_to_none<T>(e: rusqlite::Error) -> rusqlite::Result<Option<T>> {
    match e {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        other => Err(other),
    }
}

fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn row_to_lead(row: &Row<'_>) -> rusqlite::Result<Lead> {
    Ok(Lead {
        id: row.get(0)?,
        phone: row.get(1)?,
        name: row.get(2)?,
        created_at: ms_to_datetime(row.get(3)?),
        last_contact: ms_to_datetime(row.get(4)?),
    })
}

fn row_to_conversation(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    let status: String = row.get(2)?;
    let sector: Option<String> = row.get(3)?;
    Ok(Conversation {
        id: row.get(0)?,
        lead_id: row.get(1)?,
        status: status
            .parse()
            .unwrap_or(ConversationStatus::BotHandling),
        sector: sector.and_then(|s| s.parse().ok()),
        assigned_agent: row.get(4)?,
        intent: row.get(5)?,
        started_at: ms_to_datetime(row.get(6)?),
        resolved_at: row.get::<_, Option<i64>>(7)?.map(ms_to_datetime),
    })
}

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<Message> {
    let sender_type: String = row.get(2)?;
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_type: sender_type.parse().unwrap_or(SenderType::Customer),
        sender_id: row.get(3)?,
        content: row.get(4)?,
        is_read: row.get::<_, i64>(5)? != 0,
        created_at: ms_to_datetime(row.get(6)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ConversationStore {
        ConversationStore::open_in_memory().unwrap()
    }

    #[test]
    fn test_lead_created_once() {
        let store = store();
        let a = store.get_or_create_lead("+5511999990000", Some("Ana")).unwrap();
        let b = store.get_or_create_lead("+5511999990000", None).unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(b.name.as_deref(), Some("Ana"));
    }

    #[test]
    fn test_guarded_status_writes() {
        let store = store();
        let lead = store.get_or_create_lead("+551199", None).unwrap();
        let conv = store.create_conversation(lead.id).unwrap();

        assert!(store
            .mark_waiting(conv.id, Sector::Comercial, ConversationStatus::BotHandling)
            .unwrap());
        // Stale writer: conversation is no longer bot_handling.
        assert!(!store
            .mark_waiting(conv.id, Sector::Comercial, ConversationStatus::BotHandling)
            .unwrap());

        assert!(store
            .mark_assigned(conv.id, 7, ConversationStatus::WaitingQueue)
            .unwrap());
        let conv = store.get_conversation(conv.id).unwrap();
        assert_eq!(conv.status, ConversationStatus::InProgress);
        assert_eq!(conv.assigned_agent, Some(7));
        assert!(conv.assignment_consistent());

        assert!(store.mark_resolved(conv.id).unwrap());
        let conv = store.get_conversation(conv.id).unwrap();
        assert_eq!(conv.assigned_agent, None);
        assert!(conv.assignment_consistent());
        assert!(conv.resolved_at.is_some());

        assert!(store.mark_closed(conv.id).unwrap());
        assert!(!store.mark_closed(conv.id).unwrap());
    }

    #[test]
    fn test_message_replay_order() {
        let store = store();
        let lead = store.get_or_create_lead("+551198", None).unwrap();
        let conv = store.create_conversation(lead.id).unwrap();

        store
            .insert_message(conv.id, SenderType::Customer, Some("+551198"), "oi")
            .unwrap();
        store
            .insert_message(conv.id, SenderType::Bot, Some("bot"), "olá!")
            .unwrap();
        store
            .insert_message(conv.id, SenderType::Customer, Some("+551198"), "preciso de ajuda")
            .unwrap();

        let messages = store.list_messages(conv.id).unwrap();
        assert_eq!(messages.len(), 3);
        for pair in messages.windows(2) {
            assert!(pair[0].created_at <= pair[1].created_at);
            assert!(pair[0].id < pair[1].id);
        }
    }

    #[test]
    fn test_reactivation_window() {
        let store = store();
        let lead = store.get_or_create_lead("+551197", None).unwrap();
        let conv = store.create_conversation(lead.id).unwrap();
        store
            .mark_assigned(conv.id, 1, ConversationStatus::BotHandling)
            .unwrap();
        store.mark_resolved(conv.id).unwrap();

        let found = store.find_recently_resolved(lead.id).unwrap();
        assert_eq!(found.map(|c| c.id), Some(conv.id));

        assert!(store.reactivate_conversation(conv.id).unwrap());
        let conv = store.get_conversation(conv.id).unwrap();
        assert_eq!(conv.status, ConversationStatus::BotHandling);
        assert_eq!(conv.sector, None);
        assert_eq!(conv.resolved_at, None);

        // Second reactivation is a no-op: status is no longer resolved.
        assert!(!store.reactivate_conversation(conv.id).unwrap());
    }

    #[test]
    fn test_list_waiting_rebuild_order() {
        let store = store();
        let lead = store.get_or_create_lead("+551196", None).unwrap();
        let first = store.create_conversation(lead.id).unwrap();
        let second = store.create_conversation(lead.id).unwrap();
        store
            .mark_waiting(first.id, Sector::Rh, ConversationStatus::BotHandling)
            .unwrap();
        store
            .mark_waiting(second.id, Sector::Rh, ConversationStatus::BotHandling)
            .unwrap();

        let waiting = store.list_waiting().unwrap();
        let rh: Vec<i64> = waiting
            .iter()
            .filter(|(s, _)| *s == Sector::Rh)
            .map(|(_, id)| *id)
            .collect();
        assert_eq!(rh, vec![first.id, second.id]);
    }
}
