use std::collections::HashMap;

use anyhow::{Result, anyhow, ensure};
use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use rusqlite::{Connection, params};
use tracing::warn;
use uuid::Uuid;

use murmur_types::api::HistoryCursor;
use murmur_types::models::{
    Conversation, ConversationKind, FileInfo, LastMessage, MESSAGE_PREVIEW_LEN, Message,
    MessageKind, ReadReceipt, Reactions, direct_key,
};

use crate::Database;
use crate::models::{ConversationRow, MessageRow, ParticipantRow, ReactionRow, ReceiptRow};

/// Fixed-width UTC timestamps so lexical order in SQLite equals time order.
const TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

const CONVERSATION_COLUMNS: &str = "c.id, c.kind, c.name, c.description, c.last_message_id, \
     c.last_message_sender, c.last_message_preview, c.last_message_kind, c.last_message_at, \
     c.created_at, c.updated_at";

const MESSAGE_COLUMNS: &str = "m.id, m.conversation_id, m.sender_id, m.sender_name, m.content, \
     m.kind, m.file_name, m.file_mime, m.file_size, m.file_url, m.reply_to, m.edited, \
     m.edited_at, m.deleted, m.deleted_at, m.created_at";

/// Current time at the precision the store keeps.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.format(TS_FORMAT).to_string()
}

pub fn parse_ts(raw: &str) -> Option<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>().ok().or_else(|| {
        // SQLite's datetime('now') has no timezone and no 'T'
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
            .ok()
            .map(|ndt| ndt.and_utc())
    })
}

/// A conversation about to be inserted. `participants` is already normalized.
pub struct NewConversation<'a> {
    pub id: Uuid,
    pub kind: ConversationKind,
    pub creator: Uuid,
    pub participants: &'a [Uuid],
    pub name: Option<&'a str>,
    pub description: Option<&'a str>,
    pub created_at: DateTime<Utc>,
}

impl Database {
    // -- Conversations --

    /// Create a conversation. For direct conversations an existing one for the
    /// same pair is returned instead, with `false` as the second element.
    pub fn create_conversation(&self, new: &NewConversation<'_>) -> Result<(Conversation, bool)> {
        let (id, created) = self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let key = match new.kind {
                ConversationKind::Direct => {
                    ensure!(
                        new.participants.len() == 2 && new.participants[0] != new.participants[1],
                        "direct conversations need exactly two distinct participants"
                    );
                    Some(direct_key(new.participants[0], new.participants[1]))
                }
                _ => None,
            };

            if let Some(key) = &key {
                let existing: Option<String> = tx
                    .query_row("SELECT id FROM conversations WHERE direct_key = ?1", [key], |row| {
                        row.get(0)
                    })
                    .optional()?;
                if let Some(existing) = existing {
                    return Ok((existing, false));
                }
            }

            let (name, description) = match new.kind {
                ConversationKind::Direct => (None, None),
                _ => (new.name, new.description),
            };
            let id = new.id.to_string();
            let ts = format_ts(new.created_at);

            tx.execute(
                "INSERT INTO conversations (id, kind, name, description, direct_key, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![id, new.kind.as_str(), name, description, key, ts],
            )?;

            for user_id in new.participants {
                let is_admin = new.kind != ConversationKind::Direct && *user_id == new.creator;
                tx.execute(
                    "INSERT INTO conversation_participants (conversation_id, user_id, is_admin, joined_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![id, user_id.to_string(), is_admin, ts],
                )?;
            }

            tx.commit()?;
            Ok((id, true))
        })?;

        let conversation = self
            .get_conversation(&id)?
            .ok_or_else(|| anyhow!("Conversation {} missing after create", id))?;
        Ok((conversation, created))
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        self.with_conn(|conn| query_conversation(conn, id))
    }

    /// The user's conversations, most recently active first.
    pub fn list_conversations_for_user(&self, user_id: &str) -> Result<Vec<Conversation>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM conversations c
                 JOIN conversation_participants p ON p.conversation_id = c.id
                 WHERE p.user_id = ?1
                 ORDER BY c.updated_at DESC",
                CONVERSATION_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id], read_conversation_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
            let mut participants = query_participants(conn, &ids)?;

            Ok(rows
                .into_iter()
                .map(|row| {
                    let members = participants.remove(&row.id).unwrap_or_default();
                    build_conversation(row, &members)
                })
                .collect())
        })
    }

    pub fn conversation_ids_for_user(&self, user_id: &str) -> Result<Vec<Uuid>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT conversation_id FROM conversation_participants WHERE user_id = ?1",
            )?;
            let ids = stmt
                .query_map([user_id], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids.iter().map(|id| uuid_or_nil(id, "conversation_id")).collect())
        })
    }

    pub fn is_participant(&self, conversation_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM conversation_participants WHERE conversation_id = ?1 AND user_id = ?2",
                    [conversation_id, user_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Returns false if the user already was a participant.
    pub fn add_participant(
        &self,
        conversation_id: &str,
        user_id: &str,
        is_admin: bool,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO conversation_participants (conversation_id, user_id, is_admin, joined_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![conversation_id, user_id, is_admin, format_ts(at)],
            )?;
            Ok(changed == 1)
        })
    }

    /// Returns false if the user was not a participant.
    pub fn remove_participant(&self, conversation_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM conversation_participants WHERE conversation_id = ?1 AND user_id = ?2",
                [conversation_id, user_id],
            )?;
            Ok(changed == 1)
        })
    }

    // -- Messages --

    /// Insert a message and point the conversation's summary at it, atomically.
    pub fn insert_message(&self, msg: &Message) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let created_at = format_ts(msg.created_at);
            let file = msg.file.as_ref();

            tx.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, sender_name, content, kind,
                                       file_name, file_mime, file_size, file_url, reply_to, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    msg.id.to_string(),
                    msg.conversation_id.to_string(),
                    msg.sender_id.to_string(),
                    msg.sender_name,
                    msg.content,
                    msg.kind.as_str(),
                    file.map(|f| f.name.as_str()),
                    file.map(|f| f.mime.as_str()),
                    file.map(|f| f.size as i64),
                    file.map(|f| f.url.as_str()),
                    msg.reply_to.map(|id| id.to_string()),
                    created_at,
                ],
            )?;

            let updated = tx.execute(
                "UPDATE conversations
                 SET last_message_id = ?1, last_message_sender = ?2, last_message_preview = ?3,
                     last_message_kind = ?4, last_message_at = ?5, updated_at = ?5
                 WHERE id = ?6",
                params![
                    msg.id.to_string(),
                    msg.sender_id.to_string(),
                    msg.preview(),
                    msg.kind.as_str(),
                    created_at,
                    msg.conversation_id.to_string(),
                ],
            )?;
            ensure!(updated == 1, "Conversation {} not found", msg.conversation_id);

            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<Message>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM messages m WHERE m.id = ?1", MESSAGE_COLUMNS);
            let row = conn.query_row(&sql, [id], read_message_row).optional()?;
            match row {
                Some(row) => Ok(hydrate_messages(conn, vec![row])?.pop()),
                None => Ok(None),
            }
        })
    }

    /// A page of messages, newest first, strictly older than `before`.
    /// Messages sharing the cursor's timestamp are ordered by insertion, so
    /// consecutive pages neither skip nor repeat them.
    pub fn get_messages(
        &self,
        conversation_id: &str,
        limit: u32,
        before: Option<&HistoryCursor>,
    ) -> Result<Vec<Message>> {
        let before_ts = before.map(|c| format_ts(c.created_at));
        let before_id = before.and_then(|c| c.message_id).map(|id| id.to_string());
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages m
                 WHERE m.conversation_id = ?1
                   AND (?2 IS NULL
                        OR m.created_at < ?2
                        OR (m.created_at = ?2
                            AND m.rowid < (SELECT rowid FROM messages WHERE id = ?3)))
                 ORDER BY m.created_at DESC, m.rowid DESC
                 LIMIT ?4",
                MESSAGE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    params![conversation_id, before_ts, before_id, limit],
                    read_message_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            hydrate_messages(conn, rows)
        })
    }

    /// Only the sender may edit, and only while the message is not deleted.
    /// Returns false when the guarded update matched nothing.
    pub fn edit_message(
        &self,
        id: &str,
        sender_id: &str,
        content: &str,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let changed = tx.execute(
                "UPDATE messages SET content = ?1, edited = 1, edited_at = ?2
                 WHERE id = ?3 AND sender_id = ?4 AND deleted = 0",
                params![content, format_ts(at), id, sender_id],
            )?;
            if changed == 1 {
                let preview: String = content.chars().take(MESSAGE_PREVIEW_LEN).collect();
                tx.execute(
                    "UPDATE conversations SET last_message_preview = ?1 WHERE last_message_id = ?2",
                    params![preview, id],
                )?;
            }
            tx.commit()?;
            Ok(changed == 1)
        })
    }

    /// Soft delete: clears content and file, keeps the row.
    /// Returns false when the guarded update matched nothing.
    pub fn soft_delete_message(&self, id: &str, sender_id: &str, at: DateTime<Utc>) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let changed = tx.execute(
                "UPDATE messages
                 SET deleted = 1, deleted_at = ?1, content = '',
                     file_name = NULL, file_mime = NULL, file_size = NULL, file_url = NULL
                 WHERE id = ?2 AND sender_id = ?3 AND deleted = 0",
                params![format_ts(at), id, sender_id],
            )?;
            if changed == 1 {
                tx.execute(
                    "UPDATE conversations SET last_message_preview = '' WHERE last_message_id = ?1",
                    [id],
                )?;
            }
            tx.commit()?;
            Ok(changed == 1)
        })
    }

    // -- Reactions --

    /// Set-add. Returns false if the user had already reacted with this emoji.
    pub fn add_reaction(
        &self,
        message_id: &str,
        user_id: &str,
        emoji: &str,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO reactions (message_id, user_id, emoji, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![message_id, user_id, emoji, format_ts(at)],
            )?;
            Ok(changed == 1)
        })
    }

    /// Set-remove. Returns false if there was nothing to remove.
    pub fn remove_reaction(&self, message_id: &str, user_id: &str, emoji: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
                [message_id, user_id, emoji],
            )?;
            Ok(changed == 1)
        })
    }

    pub fn get_reactions(&self, message_id: &str) -> Result<Reactions> {
        self.with_conn(|conn| {
            let mut grouped = query_reactions(conn, &[message_id.to_string()])?;
            Ok(grouped.remove(message_id).unwrap_or_default())
        })
    }

    // -- Read receipts --

    /// Record receipts for messages of `conversation_id` not sent by the reader.
    /// Returns the ids that gained a receipt; ids already read, foreign to the
    /// conversation, or sent by the reader are skipped.
    pub fn mark_read(
        &self,
        conversation_id: &str,
        user_id: &str,
        message_ids: &[Uuid],
        at: DateTime<Utc>,
    ) -> Result<Vec<Uuid>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let read_at = format_ts(at);
            let mut recorded = Vec::new();
            {
                let mut stmt = tx.prepare(
                    "INSERT OR IGNORE INTO read_receipts (message_id, user_id, read_at)
                     SELECT id, ?2, ?3 FROM messages
                     WHERE id = ?1 AND conversation_id = ?4 AND sender_id != ?2",
                )?;
                for id in message_ids {
                    if stmt.execute(params![id.to_string(), user_id, read_at, conversation_id])? == 1 {
                        recorded.push(*id);
                    }
                }
            }
            tx.commit()?;
            Ok(recorded)
        })
    }

    // -- Search --

    /// Case-insensitive substring search over live messages the user can see.
    pub fn search_messages(&self, user_id: &str, query: &str, limit: u32) -> Result<Vec<Message>> {
        let pattern = format!("%{}%", escape_like(query));
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages m
                 JOIN conversation_participants p
                   ON p.conversation_id = m.conversation_id AND p.user_id = ?1
                 WHERE m.deleted = 0 AND m.content LIKE ?2 ESCAPE '\\'
                 ORDER BY m.created_at DESC
                 LIMIT ?3",
                MESSAGE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![user_id, pattern, limit], read_message_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            hydrate_messages(conn, rows)
        })
    }
}

fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn query_conversation(conn: &Connection, id: &str) -> Result<Option<Conversation>> {
    let sql = format!("SELECT {} FROM conversations c WHERE c.id = ?1", CONVERSATION_COLUMNS);
    let Some(row) = conn.query_row(&sql, [id], read_conversation_row).optional()? else {
        return Ok(None);
    };
    let mut participants = query_participants(conn, &[row.id.clone()])?;
    let members = participants.remove(&row.id).unwrap_or_default();
    Ok(Some(build_conversation(row, &members)))
}

fn read_conversation_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        kind: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        last_message_id: row.get(4)?,
        last_message_sender: row.get(5)?,
        last_message_preview: row.get(6)?,
        last_message_kind: row.get(7)?,
        last_message_at: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn read_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        sender_name: row.get(3)?,
        content: row.get(4)?,
        kind: row.get(5)?,
        file_name: row.get(6)?,
        file_mime: row.get(7)?,
        file_size: row.get(8)?,
        file_url: row.get(9)?,
        reply_to: row.get(10)?,
        edited: row.get(11)?,
        edited_at: row.get(12)?,
        deleted: row.get(13)?,
        deleted_at: row.get(14)?,
        created_at: row.get(15)?,
    })
}

/// Build `?1, ?2, ...` for an IN clause of `n` values.
fn placeholders(n: usize) -> String {
    (1..=n).map(|i| format!("?{}", i)).collect::<Vec<_>>().join(", ")
}

fn query_participants(conn: &Connection, ids: &[String]) -> Result<HashMap<String, Vec<ParticipantRow>>> {
    let mut grouped: HashMap<String, Vec<ParticipantRow>> = HashMap::new();
    if ids.is_empty() {
        return Ok(grouped);
    }

    let sql = format!(
        "SELECT conversation_id, user_id, is_admin FROM conversation_participants
         WHERE conversation_id IN ({})
         ORDER BY user_id",
        placeholders(ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(ids.iter()), |row| {
        Ok(ParticipantRow {
            conversation_id: row.get(0)?,
            user_id: row.get(1)?,
            is_admin: row.get(2)?,
        })
    })?;

    for row in rows {
        let row = row?;
        grouped.entry(row.conversation_id.clone()).or_default().push(row);
    }
    Ok(grouped)
}

fn query_reactions(conn: &Connection, message_ids: &[String]) -> Result<HashMap<String, Reactions>> {
    let mut grouped: HashMap<String, Reactions> = HashMap::new();
    if message_ids.is_empty() {
        return Ok(grouped);
    }

    let sql = format!(
        "SELECT message_id, user_id, emoji FROM reactions WHERE message_id IN ({})",
        placeholders(message_ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(message_ids.iter()), |row| {
        Ok(ReactionRow {
            message_id: row.get(0)?,
            user_id: row.get(1)?,
            emoji: row.get(2)?,
        })
    })?;

    for row in rows {
        let row = row?;
        let user_id = uuid_or_nil(&row.user_id, "reaction user_id");
        grouped.entry(row.message_id).or_default().add(&row.emoji, user_id);
    }
    Ok(grouped)
}

fn query_receipts(conn: &Connection, message_ids: &[String]) -> Result<HashMap<String, Vec<ReadReceipt>>> {
    let mut grouped: HashMap<String, Vec<ReadReceipt>> = HashMap::new();
    if message_ids.is_empty() {
        return Ok(grouped);
    }

    let sql = format!(
        "SELECT message_id, user_id, read_at FROM read_receipts
         WHERE message_id IN ({})
         ORDER BY read_at",
        placeholders(message_ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(message_ids.iter()), |row| {
        Ok(ReceiptRow {
            message_id: row.get(0)?,
            user_id: row.get(1)?,
            read_at: row.get(2)?,
        })
    })?;

    for row in rows {
        let row = row?;
        grouped.entry(row.message_id.clone()).or_default().push(ReadReceipt {
            user_id: uuid_or_nil(&row.user_id, "receipt user_id"),
            read_at: ts_or_default(&row.read_at, "read_at"),
        });
    }
    Ok(grouped)
}

/// Attach reactions and receipts to a batch of rows (two queries, no N+1).
fn hydrate_messages(conn: &Connection, rows: Vec<MessageRow>) -> Result<Vec<Message>> {
    let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
    let mut reactions = query_reactions(conn, &ids)?;
    let mut receipts = query_receipts(conn, &ids)?;

    Ok(rows
        .into_iter()
        .map(|row| {
            let r = reactions.remove(&row.id).unwrap_or_default();
            let read_by = receipts.remove(&row.id).unwrap_or_default();
            build_message(row, r, read_by)
        })
        .collect())
}

fn build_conversation(row: ConversationRow, members: &[ParticipantRow]) -> Conversation {
    let kind = row.kind.parse().unwrap_or_else(|e| {
        warn!("Corrupt kind '{}' on conversation '{}': {}", row.kind, row.id, e);
        ConversationKind::Group
    });

    let last_message = match (
        &row.last_message_id,
        &row.last_message_sender,
        &row.last_message_kind,
        &row.last_message_at,
    ) {
        (Some(id), Some(sender), Some(kind), Some(at)) => Some(LastMessage {
            message_id: uuid_or_nil(id, "last_message_id"),
            sender_id: uuid_or_nil(sender, "last_message_sender"),
            preview: row.last_message_preview.clone().unwrap_or_default(),
            kind: kind.parse().unwrap_or(MessageKind::Text),
            created_at: ts_or_default(at, "last_message_at"),
        }),
        _ => None,
    };

    Conversation {
        id: uuid_or_nil(&row.id, "conversation id"),
        kind,
        participants: members.iter().map(|m| uuid_or_nil(&m.user_id, "participant")).collect(),
        name: row.name,
        description: row.description,
        admins: members
            .iter()
            .filter(|m| m.is_admin)
            .map(|m| uuid_or_nil(&m.user_id, "admin"))
            .collect(),
        last_message,
        created_at: ts_or_default(&row.created_at, "created_at"),
        updated_at: ts_or_default(&row.updated_at, "updated_at"),
    }
}

fn build_message(row: MessageRow, reactions: Reactions, read_by: Vec<ReadReceipt>) -> Message {
    let kind = row.kind.parse().unwrap_or_else(|e| {
        warn!("Corrupt kind '{}' on message '{}': {}", row.kind, row.id, e);
        MessageKind::Text
    });

    let file = match (row.file_name, row.file_mime, row.file_url) {
        (Some(name), Some(mime), Some(url)) => Some(FileInfo {
            name,
            mime,
            size: row.file_size.unwrap_or(0).max(0) as u64,
            url,
        }),
        _ => None,
    };

    Message {
        id: uuid_or_nil(&row.id, "message id"),
        conversation_id: uuid_or_nil(&row.conversation_id, "conversation_id"),
        sender_id: uuid_or_nil(&row.sender_id, "sender_id"),
        sender_name: row.sender_name,
        content: row.content,
        kind,
        file,
        reply_to: row.reply_to.as_deref().map(|id| uuid_or_nil(id, "reply_to")),
        reactions,
        edited: row.edited,
        edited_at: row.edited_at.as_deref().and_then(parse_ts),
        deleted: row.deleted,
        deleted_at: row.deleted_at.as_deref().and_then(parse_ts),
        read_by,
        created_at: ts_or_default(&row.created_at, "created_at"),
    }
}

fn uuid_or_nil(raw: &str, what: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}': {}", what, raw, e);
        Uuid::nil()
    })
}

fn ts_or_default(raw: &str, what: &str) -> DateTime<Utc> {
    parse_ts(raw).unwrap_or_else(|| {
        warn!("Corrupt {} '{}'", what, raw);
        DateTime::default()
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
