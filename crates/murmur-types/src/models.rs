use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ChatError;

pub type UserId = Uuid;
pub type ConversationId = Uuid;
pub type MessageId = Uuid;

/// Maximum number of characters kept in a conversation's `last_message` preview.
pub const MESSAGE_PREVIEW_LEN: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    Direct,
    Group,
    Channel,
}

impl ConversationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Group => "group",
            Self::Channel => "channel",
        }
    }
}

impl fmt::Display for ConversationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConversationKind {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(Self::Direct),
            "group" => Ok(Self::Group),
            "channel" => Ok(Self::Channel),
            other => Err(ChatError::validation(format!("unknown conversation kind '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    File,
    System,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::File => "file",
            Self::System => "system",
        }
    }

    /// Image and file messages must carry a file descriptor.
    pub fn needs_file(&self) -> bool {
        matches!(self, Self::Image | Self::File)
    }
}

impl FromStr for MessageKind {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            "file" => Ok(Self::File),
            "system" => Ok(Self::System),
            other => Err(ChatError::validation(format!("unknown message kind '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Away,
    Offline,
}

/// Descriptor of an uploaded file. The bytes live with the upload service;
/// messages only carry where to find them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    pub mime: String,
    pub size: u64,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastMessage {
    pub message_id: MessageId,
    pub sender_id: UserId,
    pub preview: String,
    pub kind: MessageKind,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub kind: ConversationKind,
    pub participants: Vec<UserId>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub admins: Vec<UserId>,
    pub last_message: Option<LastMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn is_participant(&self, user_id: UserId) -> bool {
        self.participants.contains(&user_id)
    }

    pub fn is_admin(&self, user_id: UserId) -> bool {
        self.admins.contains(&user_id)
    }
}

/// Normalize the participant list of a conversation about to be created.
///
/// The creator is always a participant. The result is sorted and free of
/// duplicates. A direct conversation must end up with exactly two distinct
/// members, otherwise the request conflicts with the direct invariant.
pub fn normalize_participants(
    kind: ConversationKind,
    creator: UserId,
    requested: &[UserId],
) -> Result<Vec<UserId>, ChatError> {
    let set: BTreeSet<UserId> = requested.iter().copied().chain(std::iter::once(creator)).collect();

    if kind == ConversationKind::Direct && set.len() != 2 {
        return Err(ChatError::conflict(format!(
            "direct conversations need exactly 2 distinct participants, got {}",
            set.len()
        )));
    }

    Ok(set.into_iter().collect())
}

/// Order-independent uniqueness key for a direct conversation between two users.
pub fn direct_key(a: UserId, b: UserId) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{}:{}", lo, hi)
}

/// Whether a reaction delta added or removed a user from an emoji's set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionAction {
    Added,
    Removed,
}

/// Reactions on a message: emoji -> set of users.
///
/// There is never an entry with an empty set. Both the server and the client
/// store go through this type so they agree on every event sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reactions(BTreeMap<String, BTreeSet<UserId>>);

impl Reactions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the user was not already in the emoji's set.
    pub fn add(&mut self, emoji: &str, user_id: UserId) -> bool {
        self.0.entry(emoji.to_string()).or_default().insert(user_id)
    }

    /// Returns true if the user was in the emoji's set. Drops the emoji once
    /// nobody is left.
    pub fn remove(&mut self, emoji: &str, user_id: UserId) -> bool {
        let Some(users) = self.0.get_mut(emoji) else {
            return false;
        };
        let removed = users.remove(&user_id);
        if users.is_empty() {
            self.0.remove(emoji);
        }
        removed
    }

    pub fn apply(&mut self, action: ReactionAction, emoji: &str, user_id: UserId) -> bool {
        match action {
            ReactionAction::Added => self.add(emoji, user_id),
            ReactionAction::Removed => self.remove(emoji, user_id),
        }
    }

    pub fn users(&self, emoji: &str) -> Option<&BTreeSet<UserId>> {
        self.0.get(emoji)
    }

    pub fn contains(&self, emoji: &str, user_id: UserId) -> bool {
        self.0.get(emoji).is_some_and(|users| users.contains(&user_id))
    }

    pub fn count(&self, emoji: &str) -> usize {
        self.0.get(emoji).map_or(0, BTreeSet::len)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &BTreeSet<UserId>)> {
        self.0.iter()
    }
}

impl FromIterator<(String, UserId)> for Reactions {
    fn from_iter<I: IntoIterator<Item = (String, UserId)>>(iter: I) -> Self {
        let mut reactions = Reactions::new();
        for (emoji, user_id) in iter {
            reactions.add(&emoji, user_id);
        }
        reactions
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub user_id: UserId,
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub sender_name: String,
    pub content: String,
    pub kind: MessageKind,
    pub file: Option<FileInfo>,
    pub reply_to: Option<MessageId>,
    #[serde(default)]
    pub reactions: Reactions,
    pub edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub read_by: Vec<ReadReceipt>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Blank the payload but keep the row, so the timeline keeps its gap.
    pub fn soft_delete(&mut self, at: DateTime<Utc>) {
        self.redact();
        self.deleted_at = Some(at);
    }

    /// Flag as deleted and drop content and file. Used where the deletion
    /// time is not known, e.g. when applying a `message-deleted` event.
    pub fn redact(&mut self) {
        self.deleted = true;
        self.content.clear();
        self.file = None;
    }

    /// Append a read receipt unless the user already has one.
    pub fn record_read(&mut self, user_id: UserId, at: DateTime<Utc>) -> bool {
        if self.read_by.iter().any(|r| r.user_id == user_id) {
            return false;
        }
        self.read_by.push(ReadReceipt { user_id, read_at: at });
        true
    }

    pub fn is_read_by(&self, user_id: UserId) -> bool {
        self.read_by.iter().any(|r| r.user_id == user_id)
    }

    /// Short summary used for `Conversation::last_message`.
    pub fn preview(&self) -> String {
        match (self.kind, &self.file) {
            (MessageKind::Image, Some(file)) | (MessageKind::File, Some(file)) if self.content.is_empty() => {
                file.name.chars().take(MESSAGE_PREVIEW_LEN).collect()
            }
            _ => self.content.chars().take(MESSAGE_PREVIEW_LEN).collect(),
        }
    }

    pub fn summary(&self) -> LastMessage {
        LastMessage {
            message_id: self.id,
            sender_id: self.sender_id,
            preview: self.preview(),
            kind: self.kind,
            created_at: self.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_requires_two_distinct_participants() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let ok = normalize_participants(ConversationKind::Direct, a, &[b]).unwrap();
        assert_eq!(ok.len(), 2);

        // Creator listed twice still counts once.
        let ok = normalize_participants(ConversationKind::Direct, a, &[a, b, b]).unwrap();
        assert_eq!(ok.len(), 2);

        let err = normalize_participants(ConversationKind::Direct, a, &[a]).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Conflict);

        let c = Uuid::new_v4();
        let err = normalize_participants(ConversationKind::Direct, a, &[b, c]).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Conflict);
    }

    #[test]
    fn group_includes_creator() {
        let a = Uuid::new_v4();
        let members = normalize_participants(ConversationKind::Group, a, &[]).unwrap();
        assert_eq!(members, vec![a]);
    }

    #[test]
    fn direct_key_is_order_independent() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(direct_key(a, b), direct_key(b, a));
    }

    #[test]
    fn reaction_add_then_remove_restores_previous_state() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut reactions = Reactions::new();
        reactions.add("🎉", b);
        let before = reactions.clone();

        assert!(reactions.add("👍", a));
        assert!(!reactions.add("👍", a), "second add is a no-op");
        assert!(reactions.remove("👍", a));
        assert_eq!(reactions, before);

        assert!(!reactions.remove("👍", a), "removing a missing reaction is a no-op");
        assert_eq!(reactions, before);
    }

    #[test]
    fn reaction_entry_dropped_when_last_user_leaves() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut reactions = Reactions::new();
        reactions.add("👍", a);
        reactions.add("👍", b);
        assert_eq!(reactions.count("👍"), 2);

        reactions.remove("👍", a);
        assert_eq!(reactions.users("👍").unwrap().iter().copied().collect::<Vec<_>>(), vec![b]);

        reactions.remove("👍", b);
        assert!(reactions.users("👍").is_none());
        assert!(reactions.is_empty());
    }

    #[test]
    fn soft_delete_keeps_identity() {
        let now = Utc::now();
        let mut msg = Message {
            id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            sender_name: "ada".into(),
            content: "secret plans".into(),
            kind: MessageKind::File,
            file: Some(FileInfo {
                name: "plans.pdf".into(),
                mime: "application/pdf".into(),
                size: 42,
                url: "https://files.example/plans.pdf".into(),
            }),
            reply_to: None,
            reactions: Reactions::new(),
            edited: false,
            edited_at: None,
            deleted: false,
            deleted_at: None,
            read_by: vec![],
            created_at: now,
        };
        let (id, sender, created) = (msg.id, msg.sender_id, msg.created_at);

        msg.soft_delete(now);

        assert!(msg.deleted);
        assert!(msg.content.is_empty());
        assert!(msg.file.is_none());
        assert_eq!((msg.id, msg.sender_id, msg.created_at), (id, sender, created));
    }

    #[test]
    fn read_receipts_once_per_user() {
        let now = Utc::now();
        let reader = Uuid::new_v4();
        let mut msg = Message {
            id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            sender_name: "ada".into(),
            content: "hi".into(),
            kind: MessageKind::Text,
            file: None,
            reply_to: None,
            reactions: Reactions::new(),
            edited: false,
            edited_at: None,
            deleted: false,
            deleted_at: None,
            read_by: vec![],
            created_at: now,
        };

        assert!(msg.record_read(reader, now));
        assert!(!msg.record_read(reader, now));
        assert_eq!(msg.read_by.len(), 1);
    }
}
