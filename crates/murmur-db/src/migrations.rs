use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE conversations (
                id                      TEXT PRIMARY KEY,
                kind                    TEXT NOT NULL CHECK (kind IN ('direct', 'group', 'channel')),
                name                    TEXT,
                description             TEXT,
                -- 'lo:hi' for direct conversations, NULL otherwise
                direct_key              TEXT UNIQUE,
                last_message_id         TEXT,
                last_message_sender     TEXT,
                last_message_preview    TEXT,
                last_message_kind       TEXT,
                last_message_at         TEXT,
                created_at              TEXT NOT NULL,
                updated_at              TEXT NOT NULL
            );

            CREATE TABLE conversation_participants (
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                user_id         TEXT NOT NULL,
                is_admin        INTEGER NOT NULL DEFAULT 0,
                joined_at       TEXT NOT NULL,
                PRIMARY KEY (conversation_id, user_id)
            );

            CREATE INDEX idx_participants_user
                ON conversation_participants(user_id);

            -- A direct conversation never grows past two members...
            CREATE TRIGGER direct_participants_max
            BEFORE INSERT ON conversation_participants
            WHEN (SELECT kind FROM conversations WHERE id = NEW.conversation_id) = 'direct'
             AND (SELECT COUNT(*) FROM conversation_participants
                  WHERE conversation_id = NEW.conversation_id) >= 2
            BEGIN
                SELECT RAISE(ABORT, 'direct conversations have exactly two participants');
            END;

            -- ...and never shrinks either.
            CREATE TRIGGER direct_participants_fixed
            BEFORE DELETE ON conversation_participants
            WHEN (SELECT kind FROM conversations WHERE id = OLD.conversation_id) = 'direct'
            BEGIN
                SELECT RAISE(ABORT, 'direct conversations have exactly two participants');
            END;

            CREATE TABLE messages (
                id              TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                sender_id       TEXT NOT NULL,
                sender_name     TEXT NOT NULL,
                content         TEXT NOT NULL,
                kind            TEXT NOT NULL CHECK (kind IN ('text', 'image', 'file', 'system')),
                file_name       TEXT,
                file_mime       TEXT,
                file_size       INTEGER,
                file_url        TEXT,
                reply_to        TEXT,
                edited          INTEGER NOT NULL DEFAULT 0,
                edited_at       TEXT,
                deleted         INTEGER NOT NULL DEFAULT 0,
                deleted_at      TEXT,
                created_at      TEXT NOT NULL
            );

            CREATE INDEX idx_messages_conversation
                ON messages(conversation_id, created_at);

            CREATE TABLE reactions (
                message_id  TEXT NOT NULL REFERENCES messages(id),
                user_id     TEXT NOT NULL,
                emoji       TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                PRIMARY KEY (message_id, user_id, emoji)
            );

            CREATE TABLE read_receipts (
                message_id  TEXT NOT NULL REFERENCES messages(id),
                user_id     TEXT NOT NULL,
                read_at     TEXT NOT NULL,
                PRIMARY KEY (message_id, user_id)
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
