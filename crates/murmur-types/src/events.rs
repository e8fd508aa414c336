use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ChatError, ErrorKind};
use crate::models::{
    Conversation, FileInfo, Message, MessageKind, PresenceStatus, ReactionAction,
};

/// Longest message body accepted from a client, in characters.
pub const MAX_CONTENT_LEN: usize = 4000;

/// Longest emoji key accepted for a reaction, in bytes.
pub const MAX_EMOJI_LEN: usize = 32;

/// Most receipts one `markRead` command may carry.
pub const MAX_READ_BATCH: usize = 500;

/// Presence of one user as seen by a freshly connected client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceSnapshot {
    pub user_id: Uuid,
    pub status: PresenceStatus,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum GatewayEvent {
    /// Sent once after the connection is accepted and its rooms are joined
    Ready {
        user_id: Uuid,
        display_name: String,
        conversation_ids: Vec<Uuid>,
        presence: Vec<PresenceSnapshot>,
    },

    /// This connection now receives the conversation's events
    Joined { conversation_id: Uuid },

    /// This connection no longer receives the conversation's events
    Left { conversation_id: Uuid },

    /// A conversation including this user was created
    ConversationCreated { conversation: Conversation },

    MessageCreated { message: Message },

    MessageEdited {
        id: Uuid,
        conversation_id: Uuid,
        content: String,
        edited_at: DateTime<Utc>,
    },

    /// Only ids: clients blank the content locally
    MessageDeleted { id: Uuid, conversation_id: Uuid },

    ReactionChanged {
        message_id: Uuid,
        conversation_id: Uuid,
        emoji: String,
        user_id: Uuid,
        action: ReactionAction,
    },

    MessagesRead {
        conversation_id: Uuid,
        user_id: Uuid,
        message_ids: Vec<Uuid>,
        read_at: DateTime<Utc>,
    },

    TypingStarted {
        conversation_id: Uuid,
        user_id: Uuid,
        display_name: String,
    },

    TypingStopped { conversation_id: Uuid, user_id: Uuid },

    PresenceChanged {
        user_id: Uuid,
        status: PresenceStatus,
        last_seen: Option<DateTime<Utc>>,
    },

    /// A command from this connection failed. Never fanned out.
    Error {
        kind: ErrorKind,
        message: String,
        command: Option<String>,
    },
}

impl GatewayEvent {
    /// Returns the conversation id if this event is scoped to a conversation.
    /// Events that return `None` are either global or connection-private.
    pub fn conversation_id(&self) -> Option<Uuid> {
        match self {
            Self::Joined { conversation_id }
            | Self::Left { conversation_id }
            | Self::MessageEdited { conversation_id, .. }
            | Self::MessageDeleted { conversation_id, .. }
            | Self::ReactionChanged { conversation_id, .. }
            | Self::MessagesRead { conversation_id, .. }
            | Self::TypingStarted { conversation_id, .. }
            | Self::TypingStopped { conversation_id, .. } => Some(*conversation_id),
            Self::ConversationCreated { conversation } => Some(conversation.id),
            Self::MessageCreated { message } => Some(message.conversation_id),
            Self::Ready { .. } | Self::PresenceChanged { .. } | Self::Error { .. } => None,
        }
    }

    pub fn error(err: &ChatError, command: Option<&str>) -> Self {
        Self::Error {
            kind: err.kind(),
            message: err.detail().to_string(),
            command: command.map(str::to_string),
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum GatewayCommand {
    Join { conversation_id: Uuid },

    Leave { conversation_id: Uuid },

    Send {
        conversation_id: Uuid,
        #[serde(default)]
        content: String,
        #[serde(default)]
        kind: Option<MessageKind>,
        #[serde(default)]
        file: Option<FileInfo>,
        #[serde(default)]
        reply_to: Option<Uuid>,
    },

    StartTyping { conversation_id: Uuid },

    StopTyping { conversation_id: Uuid },

    AddReaction { message_id: Uuid, emoji: String },

    RemoveReaction { message_id: Uuid, emoji: String },

    EditMessage { message_id: Uuid, content: String },

    DeleteMessage { message_id: Uuid },

    MarkRead {
        conversation_id: Uuid,
        message_ids: Vec<Uuid>,
    },

    SetPresence { status: PresenceStatus },
}

impl GatewayCommand {
    /// Decode and validate a text frame. Anything that fails here is
    /// reported as `ValidationFailed` and never reaches the router.
    pub fn parse(text: &str) -> Result<Self, ChatError> {
        let cmd: GatewayCommand = serde_json::from_str(text)
            .map_err(|e| ChatError::validation(format!("malformed command: {}", e)))?;
        cmd.validate()?;
        Ok(cmd)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Join { .. } => "join",
            Self::Leave { .. } => "leave",
            Self::Send { .. } => "send",
            Self::StartTyping { .. } => "startTyping",
            Self::StopTyping { .. } => "stopTyping",
            Self::AddReaction { .. } => "addReaction",
            Self::RemoveReaction { .. } => "removeReaction",
            Self::EditMessage { .. } => "editMessage",
            Self::DeleteMessage { .. } => "deleteMessage",
            Self::MarkRead { .. } => "markRead",
            Self::SetPresence { .. } => "setPresence",
        }
    }

    pub fn validate(&self) -> Result<(), ChatError> {
        match self {
            Self::Send { content, kind, file, .. } => {
                let kind = kind.unwrap_or(MessageKind::Text);
                if kind == MessageKind::System {
                    return Err(ChatError::validation("system messages cannot be sent by clients"));
                }
                if kind.needs_file() && file.is_none() {
                    return Err(ChatError::validation(format!("{} messages need a file", kind.as_str())));
                }
                if let Some(file) = file {
                    validate_file(file)?;
                }
                if content.trim().is_empty() && file.is_none() {
                    return Err(ChatError::validation("message content is empty"));
                }
                validate_content_len(content)
            }

            Self::EditMessage { content, .. } => {
                if content.trim().is_empty() {
                    return Err(ChatError::validation("message content is empty"));
                }
                validate_content_len(content)
            }

            Self::AddReaction { emoji, .. } | Self::RemoveReaction { emoji, .. } => {
                if emoji.trim().is_empty() || emoji.len() > MAX_EMOJI_LEN {
                    return Err(ChatError::validation("invalid emoji"));
                }
                Ok(())
            }

            Self::MarkRead { message_ids, .. } => {
                if message_ids.is_empty() || message_ids.len() > MAX_READ_BATCH {
                    return Err(ChatError::validation(format!(
                        "markRead takes 1..={} message ids",
                        MAX_READ_BATCH
                    )));
                }
                Ok(())
            }

            Self::SetPresence { status } => {
                if *status == PresenceStatus::Offline {
                    return Err(ChatError::validation("offline is set by disconnecting"));
                }
                Ok(())
            }

            Self::Join { .. }
            | Self::Leave { .. }
            | Self::StartTyping { .. }
            | Self::StopTyping { .. }
            | Self::DeleteMessage { .. } => Ok(()),
        }
    }
}

fn validate_content_len(content: &str) -> Result<(), ChatError> {
    if content.chars().count() > MAX_CONTENT_LEN {
        return Err(ChatError::validation(format!(
            "message content exceeds {} characters",
            MAX_CONTENT_LEN
        )));
    }
    Ok(())
}

fn validate_file(file: &FileInfo) -> Result<(), ChatError> {
    if file.name.trim().is_empty() || file.url.trim().is_empty() || file.mime.trim().is_empty() {
        return Err(ChatError::validation("file descriptor needs a name, mime type and url"));
    }
    Ok(())
}
