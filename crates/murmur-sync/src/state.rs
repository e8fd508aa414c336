use std::collections::BTreeMap;
use std::sync::Arc;

use murmur_types::events::PresenceSnapshot;
use murmur_types::models::{Conversation, ConversationId, Message, MessageId, PresenceStatus, UserId};

/// Someone currently typing, in the order they started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingUser {
    pub user_id: UserId,
    pub display_name: String,
}

/// Everything the client knows about one conversation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationView {
    /// Metadata, once it arrived via REST or `conversation-created`
    pub conversation: Option<Conversation>,

    /// Timeline, oldest first, ordered by `created_at`
    pub messages: Vec<Message>,

    pub typing: Vec<TypingUser>,

    /// Messages from others that arrived while the conversation was not active
    pub unread: u32,

    /// Whether this client's connection is in the conversation's room
    pub subscribed: bool,
}

impl ConversationView {
    pub fn message(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub(crate) fn message_mut(&mut self, id: MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    /// Insert a message unless one with the same id is already known.
    /// Equal timestamps keep arrival order.
    pub(crate) fn insert_message(&mut self, message: Message) -> bool {
        if self.messages.iter().any(|m| m.id == message.id) {
            return false;
        }

        let at = message.created_at;
        match self.messages.last() {
            Some(last) if last.created_at > at => {
                let idx = self.messages.partition_point(|m| m.created_at <= at);
                self.messages.insert(idx, message);
            }
            _ => self.messages.push(message),
        }
        true
    }

    pub(crate) fn refresh_summary(&mut self, message: &Message) {
        let Some(conversation) = self.conversation.as_mut() else {
            return;
        };
        let newer = conversation
            .last_message
            .as_ref()
            .is_none_or(|last| last.created_at <= message.created_at);
        if newer {
            conversation.last_message = Some(message.summary());
            conversation.updated_at = conversation.updated_at.max(message.created_at);
        }
    }
}

/// Snapshot of the client's chat state.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncState {
    pub me: UserId,
    pub active: Option<ConversationId>,
    pub conversations: BTreeMap<ConversationId, Arc<ConversationView>>,
    pub presence: BTreeMap<UserId, PresenceSnapshot>,
}

impl SyncState {
    pub fn new(me: UserId) -> Self {
        Self {
            me,
            active: None,
            conversations: BTreeMap::new(),
            presence: BTreeMap::new(),
        }
    }

    pub fn conversation(&self, id: ConversationId) -> Option<&ConversationView> {
        self.conversations.get(&id).map(Arc::as_ref)
    }

    pub fn messages(&self, id: ConversationId) -> &[Message] {
        self.conversation(id).map_or(&[], |view| view.messages.as_slice())
    }

    pub fn unread(&self, id: ConversationId) -> u32 {
        self.conversation(id).map_or(0, |view| view.unread)
    }

    pub fn total_unread(&self) -> u32 {
        self.conversations.values().map(|view| view.unread).sum()
    }

    pub fn status_of(&self, user_id: UserId) -> PresenceStatus {
        self.presence
            .get(&user_id)
            .map_or(PresenceStatus::Offline, |p| p.status)
    }

    /// Conversations ordered most recently active first, as a sidebar shows them.
    pub fn sidebar(&self) -> Vec<&Conversation> {
        let mut list: Vec<&Conversation> = self
            .conversations
            .values()
            .filter_map(|view| view.conversation.as_ref())
            .collect();
        list.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        list
    }

    /// Switch the focused conversation. Focusing one clears its unread count.
    pub fn set_active_conversation(&self, id: Option<ConversationId>) -> SyncState {
        let mut next = self.clone();
        next.active = id;
        if let Some(id) = id {
            if let Some(view) = next.conversations.get_mut(&id) {
                if view.unread > 0 {
                    Arc::make_mut(view).unread = 0;
                }
            }
        }
        next
    }

    /// Seed conversation metadata, e.g. from `GET /conversations`.
    pub fn with_conversations(&self, conversations: Vec<Conversation>) -> SyncState {
        let mut next = self.clone();
        for conversation in conversations {
            let view = next.view_mut(conversation.id);
            view.conversation = Some(conversation);
        }
        next
    }

    /// Merge a page of history fetched over REST. The server copy wins for
    /// messages already known; nothing counts as unread.
    pub fn with_history(&self, conversation_id: ConversationId, page: Vec<Message>) -> SyncState {
        let mut next = self.clone();
        let view = next.view_mut(conversation_id);
        for message in page {
            match view.message_mut(message.id) {
                Some(existing) => *existing = message,
                None => {
                    view.insert_message(message);
                }
            }
        }
        next
    }

    pub(crate) fn view_mut(&mut self, id: ConversationId) -> &mut ConversationView {
        Arc::make_mut(self.conversations.entry(id).or_default())
    }
}
