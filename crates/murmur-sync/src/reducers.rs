use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::trace;

use murmur_types::events::{GatewayEvent, PresenceSnapshot};
use murmur_types::models::{
    Conversation, ConversationId, Message, MessageId, ReactionAction, UserId,
};

use crate::state::{SyncState, TypingUser};

impl SyncState {
    /// Apply one gateway event and return the next state.
    pub fn apply(&self, event: &GatewayEvent) -> SyncState {
        match event {
            GatewayEvent::Ready {
                conversation_ids,
                presence,
                ..
            } => self.apply_ready(conversation_ids, presence),
            GatewayEvent::Joined { conversation_id } => self.apply_joined(*conversation_id),
            GatewayEvent::Left { conversation_id } => self.apply_left(*conversation_id),
            GatewayEvent::ConversationCreated { conversation } => {
                self.apply_conversation_created(conversation)
            }
            GatewayEvent::MessageCreated { message } => self.apply_new_message(message),
            GatewayEvent::MessageEdited {
                id,
                conversation_id,
                content,
                edited_at,
            } => self.apply_edited(*conversation_id, *id, content, *edited_at),
            GatewayEvent::MessageDeleted {
                id,
                conversation_id,
            } => self.apply_deleted(*conversation_id, *id),
            GatewayEvent::ReactionChanged {
                message_id,
                conversation_id,
                emoji,
                user_id,
                action,
            } => self.apply_reaction_delta(*conversation_id, *message_id, emoji, *user_id, *action),
            GatewayEvent::MessagesRead {
                conversation_id,
                user_id,
                message_ids,
                read_at,
            } => self.apply_messages_read(*conversation_id, *user_id, message_ids, *read_at),
            GatewayEvent::TypingStarted {
                conversation_id,
                user_id,
                display_name,
            } => self.apply_typing_started(*conversation_id, *user_id, display_name),
            GatewayEvent::TypingStopped {
                conversation_id,
                user_id,
            } => self.apply_typing_stopped(*conversation_id, *user_id),
            GatewayEvent::PresenceChanged {
                user_id,
                status,
                last_seen,
            } => self.apply_presence(&PresenceSnapshot {
                user_id: *user_id,
                status: *status,
                last_seen: *last_seen,
            }),
            GatewayEvent::Error { kind, message, command } => {
                trace!("Gateway rejected {:?}: {:?} {}", command, kind, message);
                self.clone()
            }
        }
    }

    /// A fresh connection: its room set replaces whatever was subscribed
    /// before, and typing from before the reconnect can no longer be stopped.
    pub fn apply_ready(
        &self,
        conversation_ids: &[ConversationId],
        presence: &[PresenceSnapshot],
    ) -> SyncState {
        let mut next = self.clone();
        for (id, view) in next.conversations.iter_mut() {
            let subscribed = conversation_ids.contains(id);
            if view.subscribed != subscribed || !view.typing.is_empty() {
                let view = Arc::make_mut(view);
                view.subscribed = subscribed;
                view.typing.clear();
            }
        }
        for id in conversation_ids {
            if !next.conversation(*id).is_some_and(|v| v.subscribed) {
                next.view_mut(*id).subscribed = true;
            }
        }
        next.presence = presence.iter().map(|p| (p.user_id, p.clone())).collect();
        next
    }

    pub fn apply_joined(&self, conversation_id: ConversationId) -> SyncState {
        if self.conversation(conversation_id).is_some_and(|v| v.subscribed) {
            return self.clone();
        }
        let mut next = self.clone();
        next.view_mut(conversation_id).subscribed = true;
        next
    }

    /// The connection stopped receiving this conversation's events. Its
    /// history stays, but nothing will ever stop the typing indicators.
    pub fn apply_left(&self, conversation_id: ConversationId) -> SyncState {
        let Some(view) = self.conversation(conversation_id) else {
            return self.clone();
        };
        if !view.subscribed && view.typing.is_empty() {
            return self.clone();
        }
        let mut next = self.clone();
        let view = next.view_mut(conversation_id);
        view.subscribed = false;
        view.typing.clear();
        next
    }

    pub fn apply_conversation_created(&self, conversation: &Conversation) -> SyncState {
        let mut next = self.clone();
        let view = next.view_mut(conversation.id);
        view.conversation = Some(conversation.clone());
        view.subscribed = true;
        next
    }

    /// Insert a message unless it is already known. A new message from
    /// someone else counts as unread unless its conversation is active.
    pub fn apply_new_message(&self, message: &Message) -> SyncState {
        let known = self
            .conversation(message.conversation_id)
            .is_some_and(|view| view.message(message.id).is_some());
        if known {
            trace!("Duplicate delivery of {}", message.id);
            return self.clone();
        }

        let counts_as_unread =
            message.sender_id != self.me && self.active != Some(message.conversation_id);

        let mut next = self.clone();
        let view = next.view_mut(message.conversation_id);
        view.refresh_summary(message);
        view.insert_message(message.clone());
        if counts_as_unread {
            view.unread += 1;
        }
        next
    }

    /// Patch a known, live message. Unknown ids are ignored; a later refetch
    /// brings them in with the edit applied.
    pub fn apply_edited(
        &self,
        conversation_id: ConversationId,
        id: MessageId,
        content: &str,
        edited_at: DateTime<Utc>,
    ) -> SyncState {
        let patchable = self
            .conversation(conversation_id)
            .and_then(|view| view.message(id))
            .is_some_and(|m| !m.deleted);
        if !patchable {
            return self.clone();
        }

        let mut next = self.clone();
        let view = next.view_mut(conversation_id);
        if let Some(message) = view.message_mut(id) {
            message.content = content.to_string();
            message.edited = true;
            message.edited_at = Some(edited_at);
        }
        if let Some(message) = view.message(id).cloned() {
            let is_latest = view
                .conversation
                .as_ref()
                .and_then(|c| c.last_message.as_ref())
                .is_some_and(|last| last.message_id == id);
            if is_latest {
                view.refresh_summary(&message);
            }
        }
        next
    }

    /// Blank a known message in place, keeping its slot in the timeline.
    pub fn apply_deleted(&self, conversation_id: ConversationId, id: MessageId) -> SyncState {
        let live = self
            .conversation(conversation_id)
            .and_then(|view| view.message(id))
            .is_some_and(|m| !m.deleted);
        if !live {
            return self.clone();
        }

        let mut next = self.clone();
        let view = next.view_mut(conversation_id);
        if let Some(message) = view.message_mut(id) {
            message.redact();
        }
        if let Some(conversation) = view.conversation.as_mut() {
            if let Some(last) = conversation.last_message.as_mut().filter(|l| l.message_id == id) {
                last.preview.clear();
            }
        }
        next
    }

    /// Same set semantics as the server: adding twice or removing what is
    /// not there changes nothing, and an emoji disappears with its last user.
    pub fn apply_reaction_delta(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
        emoji: &str,
        user_id: UserId,
        action: ReactionAction,
    ) -> SyncState {
        let Some(message) = self
            .conversation(conversation_id)
            .and_then(|view| view.message(message_id))
        else {
            return self.clone();
        };

        let mut reactions = message.reactions.clone();
        if !reactions.apply(action, emoji, user_id) {
            return self.clone();
        }

        let mut next = self.clone();
        if let Some(message) = next.view_mut(conversation_id).message_mut(message_id) {
            message.reactions = reactions;
        }
        next
    }

    /// Record receipts. When they are this user's own (read on another
    /// device), the unread count drops by what was newly read.
    pub fn apply_messages_read(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        message_ids: &[MessageId],
        read_at: DateTime<Utc>,
    ) -> SyncState {
        let Some(view) = self.conversation(conversation_id) else {
            return self.clone();
        };
        let pending = message_ids
            .iter()
            .filter_map(|id| view.message(*id))
            .any(|m| !m.is_read_by(user_id));
        if !pending {
            return self.clone();
        }

        let me = self.me;
        let mut next = self.clone();
        let view = next.view_mut(conversation_id);
        let mut newly_read = 0u32;
        for id in message_ids {
            if let Some(message) = view.message_mut(*id) {
                if message.record_read(user_id, read_at) && user_id == me && message.sender_id != me {
                    newly_read += 1;
                }
            }
        }
        view.unread = view.unread.saturating_sub(newly_read);
        next
    }

    pub fn apply_typing_started(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        display_name: &str,
    ) -> SyncState {
        let already = self
            .conversation(conversation_id)
            .is_some_and(|view| view.typing.iter().any(|t| t.user_id == user_id));
        if already || user_id == self.me {
            return self.clone();
        }

        let mut next = self.clone();
        next.view_mut(conversation_id).typing.push(TypingUser {
            user_id,
            display_name: display_name.to_string(),
        });
        next
    }

    pub fn apply_typing_stopped(&self, conversation_id: ConversationId, user_id: UserId) -> SyncState {
        let typing = self
            .conversation(conversation_id)
            .is_some_and(|view| view.typing.iter().any(|t| t.user_id == user_id));
        if !typing {
            return self.clone();
        }

        let mut next = self.clone();
        next.view_mut(conversation_id)
            .typing
            .retain(|t| t.user_id != user_id);
        next
    }

    pub fn apply_presence(&self, snapshot: &PresenceSnapshot) -> SyncState {
        if self.presence.get(&snapshot.user_id) == Some(snapshot) {
            return self.clone();
        }
        let mut next = self.clone();
        next.presence.insert(snapshot.user_id, snapshot.clone());
        next
    }
}

/// Whether two states share the same view of a conversation, without
/// comparing contents. Cheap check for a UI deciding what to re-render.
pub fn same_view(a: &SyncState, b: &SyncState, id: ConversationId) -> bool {
    match (a.conversations.get(&id), b.conversations.get(&id)) {
        (Some(x), Some(y)) => Arc::ptr_eq(x, y),
        (None, None) => true,
        _ => false,
    }
}
