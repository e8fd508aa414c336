/// Database row types. These map directly to SQLite rows.
/// Distinct from murmur-types models to keep the DB layer independent.

pub struct ConversationRow {
    pub id: String,
    pub kind: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub last_message_id: Option<String>,
    pub last_message_sender: Option<String>,
    pub last_message_preview: Option<String>,
    pub last_message_kind: Option<String>,
    pub last_message_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

pub struct ParticipantRow {
    pub conversation_id: String,
    pub user_id: String,
    pub is_admin: bool,
}

pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub content: String,
    pub kind: String,
    pub file_name: Option<String>,
    pub file_mime: Option<String>,
    pub file_size: Option<i64>,
    pub file_url: Option<String>,
    pub reply_to: Option<String>,
    pub edited: bool,
    pub edited_at: Option<String>,
    pub deleted: bool,
    pub deleted_at: Option<String>,
    pub created_at: String,
}

pub struct ReactionRow {
    pub message_id: String,
    pub user_id: String,
    pub emoji: String,
}

pub struct ReceiptRow {
    pub message_id: String,
    pub user_id: String,
    pub read_at: String,
}
