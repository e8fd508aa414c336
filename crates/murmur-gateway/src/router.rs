use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use murmur_db::Database;
use murmur_db::queries::now;
use murmur_types::api::Identity;
use murmur_types::error::ChatError;
use murmur_types::events::{GatewayCommand, GatewayEvent, PresenceSnapshot};
use murmur_types::models::{
    Conversation, FileInfo, Message, MessageKind, PresenceStatus, ReactionAction, Reactions,
};

use crate::presence::PresenceTable;
use crate::registry::{ConnectionId, Registry};
use crate::typing::{DEFAULT_TYPING_TTL, TypingKey, TypingTracker};

/// How often the sweeper looks for expired typing indicators.
pub const DEFAULT_TYPING_SWEEP: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub typing_ttl: Duration,
    pub typing_sweep_interval: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            typing_ttl: DEFAULT_TYPING_TTL,
            typing_sweep_interval: DEFAULT_TYPING_SWEEP,
        }
    }
}

/// Turns gateway commands into store mutations and fans the resulting events
/// out to the rooms of the affected conversations.
///
/// One instance lives for the whole process; clones share state. Room and
/// presence maps sit behind `RwLock`s owned here, typing state behind a plain
/// mutex that is never held across an await. Whenever both locks are held,
/// presence is taken first.
#[derive(Clone)]
pub struct BroadcastRouter {
    inner: Arc<RouterInner>,
}

struct RouterInner {
    db: Arc<Database>,
    config: RouterConfig,

    /// Connections and the rooms they have joined
    registry: RwLock<Registry>,

    /// user_id -> status and live connections, for connected users only
    presence: RwLock<PresenceTable>,

    /// (conversation, user) -> typing deadline
    typing: Mutex<TypingTracker>,
}

/// The connection a command came from and who is behind it.
struct Caller {
    conn_id: ConnectionId,
    user_id: Uuid,
    display_name: String,
}

impl BroadcastRouter {
    pub fn new(db: Arc<Database>, config: RouterConfig) -> Self {
        let typing = TypingTracker::new(config.typing_ttl);
        Self {
            inner: Arc::new(RouterInner {
                db,
                config,
                registry: RwLock::new(Registry::new()),
                presence: RwLock::new(PresenceTable::new()),
                typing: Mutex::new(typing),
            }),
        }
    }

    // -- Connection lifecycle --

    /// Accept a connection for a pre-verified identity: mark the user online,
    /// join one room per conversation they belong to, queue `Ready`.
    /// Returns the connection id and the receiving end of its event queue.
    ///
    /// Memberships are read while the registry is write-locked, so a
    /// concurrent participant change either lands before the read or runs
    /// after this connection is registered and finds it.
    pub async fn connect(
        &self,
        identity: Identity,
    ) -> Result<(ConnectionId, mpsc::UnboundedReceiver<GatewayEvent>), ChatError> {
        if identity.user_id.is_nil() {
            return Err(ChatError::unauthorized("unresolved identity"));
        }

        let user_id = identity.user_id;
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        // Lock order: presence, then registry.
        let mut table = self.inner.presence.write().await;
        let mut registry = self.inner.registry.write().await;

        let uid = user_id.to_string();
        let conversation_ids = self.db(move |db| db.conversation_ids_for_user(&uid)).await?;

        let changed = table.connect(user_id, conn_id);
        registry.register(conn_id, user_id, identity.display_name.clone(), tx);
        for id in &conversation_ids {
            registry.join(conn_id, *id);
        }
        // Ready goes out before anything else can reach this connection.
        registry.send_to(
            conn_id,
            GatewayEvent::Ready {
                user_id,
                display_name: identity.display_name.clone(),
                conversation_ids: conversation_ids.clone(),
                presence: table.snapshot(),
            },
        );
        if let Some(snapshot) = changed {
            registry.broadcast(&presence_event(snapshot));
        }
        drop(registry);
        drop(table);

        info!(
            "{} ({}) connected as {} with {} rooms",
            identity.display_name,
            user_id,
            conn_id,
            conversation_ids.len()
        );
        Ok((conn_id, rx))
    }

    /// Tear down a connection: leave every room, stop the user's typing
    /// indicators, and go offline unless another connection remains.
    pub async fn disconnect(&self, conn_id: ConnectionId) {
        let mut table = self.inner.presence.write().await;
        let mut registry = self.inner.registry.write().await;

        let Some((user_id, rooms)) = registry.unregister(conn_id) else {
            return;
        };

        let stopped = self.typing().stop_user(user_id);
        for key in &stopped {
            registry.fan_out(
                key.conversation_id,
                &GatewayEvent::TypingStopped {
                    conversation_id: key.conversation_id,
                    user_id,
                },
                Some(user_id),
            );
        }

        // Broadcast while the presence lock is held, so status changes reach
        // clients in the order they were applied.
        if let Some(snapshot) = table.disconnect(user_id, conn_id, now()) {
            registry.broadcast(&presence_event(snapshot));
        }
        drop(registry);
        drop(table);

        info!(
            "{} disconnected {} (left {} rooms, stopped {} typing)",
            user_id,
            conn_id,
            rooms.len(),
            stopped.len()
        );
    }

    // -- Commands --

    /// Decode a text frame and run it. Undecodable frames are reported back
    /// to the connection as `ValidationFailed`.
    pub async fn handle_text(&self, conn_id: ConnectionId, text: &str) {
        match GatewayCommand::parse(text) {
            Ok(cmd) => self.handle(conn_id, cmd).await,
            Err(err) => {
                let raw: String = text.chars().take(200).collect();
                warn!("Connection {} sent a bad command: {} -- raw: {}", conn_id, err, raw);
                self.report_error(conn_id, &err, None).await;
            }
        }
    }

    /// Run one command to completion: validate, persist, fan out. Failures
    /// go to the originating connection only.
    pub async fn handle(&self, conn_id: ConnectionId, cmd: GatewayCommand) {
        let name = cmd.name();
        let Some((user_id, display_name)) = self.inner.registry.read().await.identity(conn_id) else {
            warn!("Dropping {} from unknown connection {}", name, conn_id);
            return;
        };
        let caller = Caller {
            conn_id,
            user_id,
            display_name,
        };

        trace!("{} ({}) -> {}", caller.display_name, caller.user_id, name);

        let result = match cmd.validate() {
            Err(err) => Err(err),
            Ok(()) => self.dispatch(&caller, cmd).await,
        };

        if let Err(err) = result {
            match &err {
                ChatError::Internal(_) => {
                    error!("{} from {} failed: {}", name, caller.user_id, err)
                }
                _ => debug!("{} from {} rejected: {}", name, caller.user_id, err),
            }
            self.report_error(conn_id, &err, Some(name)).await;
        }
    }

    /// Tell one connection that something it sent failed.
    pub async fn report_error(&self, conn_id: ConnectionId, err: &ChatError, command: Option<&str>) {
        self.send_to(conn_id, GatewayEvent::error(err, command)).await;
    }

    async fn dispatch(&self, caller: &Caller, cmd: GatewayCommand) -> Result<(), ChatError> {
        match cmd {
            GatewayCommand::Join { conversation_id } => self.join(caller, conversation_id).await,
            GatewayCommand::Leave { conversation_id } => self.leave(caller, conversation_id).await,
            GatewayCommand::Send {
                conversation_id,
                content,
                kind,
                file,
                reply_to,
            } => {
                self.send(caller, conversation_id, content, kind, file, reply_to)
                    .await
            }
            GatewayCommand::StartTyping { conversation_id } => {
                self.start_typing(caller, conversation_id).await
            }
            GatewayCommand::StopTyping { conversation_id } => {
                self.stop_typing(TypingKey {
                    conversation_id,
                    user_id: caller.user_id,
                })
                .await;
                Ok(())
            }
            GatewayCommand::AddReaction { message_id, emoji } => {
                self.react(caller, message_id, emoji, ReactionAction::Added).await
            }
            GatewayCommand::RemoveReaction { message_id, emoji } => {
                self.react(caller, message_id, emoji, ReactionAction::Removed).await
            }
            GatewayCommand::EditMessage {
                message_id,
                content,
            } => self.edit_message(caller, message_id, content).await,
            GatewayCommand::DeleteMessage { message_id } => {
                self.delete_message(caller, message_id).await
            }
            GatewayCommand::MarkRead {
                conversation_id,
                message_ids,
            } => self.mark_read(caller, conversation_id, message_ids).await,
            GatewayCommand::SetPresence { status } => {
                self.set_presence(caller, status).await;
                Ok(())
            }
        }
    }

    /// Checked and joined under one registry lock, so an eviction cannot
    /// slip in between.
    async fn join(&self, caller: &Caller, conversation_id: Uuid) -> Result<(), ChatError> {
        let mut registry = self.inner.registry.write().await;
        self.require_member(conversation_id, caller.user_id).await?;

        let joined = registry.join(caller.conn_id, conversation_id);
        registry.send_to(caller.conn_id, GatewayEvent::Joined { conversation_id });
        drop(registry);

        debug!(
            "{} joined room {} (new: {})",
            caller.conn_id, conversation_id, joined
        );
        Ok(())
    }

    async fn leave(&self, caller: &Caller, conversation_id: Uuid) -> Result<(), ChatError> {
        let left = self
            .inner
            .registry
            .write()
            .await
            .leave(caller.conn_id, conversation_id);
        debug!("{} left room {} (was in: {})", caller.conn_id, conversation_id, left);

        self.send_to(caller.conn_id, GatewayEvent::Left { conversation_id })
            .await;
        Ok(())
    }

    async fn send(
        &self,
        caller: &Caller,
        conversation_id: Uuid,
        content: String,
        kind: Option<MessageKind>,
        file: Option<FileInfo>,
        reply_to: Option<Uuid>,
    ) -> Result<(), ChatError> {
        self.require_member(conversation_id, caller.user_id).await?;

        if let Some(reply_id) = reply_to {
            let rid = reply_id.to_string();
            match self.db(move |db| db.get_message(&rid)).await? {
                Some(target) if target.conversation_id == conversation_id => {}
                Some(_) => {
                    return Err(ChatError::validation(
                        "reply target belongs to another conversation",
                    ));
                }
                None => return Err(ChatError::not_found(format!("message {}", reply_id))),
            }
        }

        let message = Message {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id: caller.user_id,
            sender_name: caller.display_name.clone(),
            content,
            kind: kind.unwrap_or(MessageKind::Text),
            file,
            reply_to,
            reactions: Reactions::new(),
            edited: false,
            edited_at: None,
            deleted: false,
            deleted_at: None,
            read_by: Vec::new(),
            created_at: now(),
        };

        let row = message.clone();
        self.db(move |db| db.insert_message(&row)).await?;
        debug!(
            "{} ({}) sent {} to {}",
            caller.display_name, caller.user_id, message.id, conversation_id
        );

        self.fan_out(conversation_id, GatewayEvent::MessageCreated { message }, None)
            .await;

        // Sending ends the typing cycle.
        self.stop_typing(TypingKey {
            conversation_id,
            user_id: caller.user_id,
        })
        .await;
        Ok(())
    }

    async fn start_typing(&self, caller: &Caller, conversation_id: Uuid) -> Result<(), ChatError> {
        self.require_member(conversation_id, caller.user_id).await?;

        let key = TypingKey {
            conversation_id,
            user_id: caller.user_id,
        };
        let started = self.typing().start(key, Instant::now());

        if started {
            self.fan_out(
                conversation_id,
                GatewayEvent::TypingStarted {
                    conversation_id,
                    user_id: caller.user_id,
                    display_name: caller.display_name.clone(),
                },
                Some(caller.user_id),
            )
            .await;
        }
        Ok(())
    }

    /// Leave the typing state if in it, telling the room once.
    async fn stop_typing(&self, key: TypingKey) -> bool {
        let stopped = self.typing().stop(key);
        if stopped {
            self.fan_out(
                key.conversation_id,
                GatewayEvent::TypingStopped {
                    conversation_id: key.conversation_id,
                    user_id: key.user_id,
                },
                Some(key.user_id),
            )
            .await;
        }
        stopped
    }

    async fn react(
        &self,
        caller: &Caller,
        message_id: Uuid,
        emoji: String,
        action: ReactionAction,
    ) -> Result<(), ChatError> {
        let message = self.load_visible_message(message_id, caller.user_id).await?;
        if message.deleted {
            return Err(ChatError::forbidden("message was deleted"));
        }

        let (mid, uid, e) = (message_id.to_string(), caller.user_id.to_string(), emoji.clone());
        let changed = match action {
            ReactionAction::Added => {
                self.db(move |db| db.add_reaction(&mid, &uid, &e, now())).await?
            }
            ReactionAction::Removed => self.db(move |db| db.remove_reaction(&mid, &uid, &e)).await?,
        };

        if !changed {
            trace!("Reaction {:?} {} on {} was a no-op", action, emoji, message_id);
            return Ok(());
        }

        self.fan_out(
            message.conversation_id,
            GatewayEvent::ReactionChanged {
                message_id,
                conversation_id: message.conversation_id,
                emoji,
                user_id: caller.user_id,
                action,
            },
            None,
        )
        .await;
        Ok(())
    }

    async fn edit_message(
        &self,
        caller: &Caller,
        message_id: Uuid,
        content: String,
    ) -> Result<(), ChatError> {
        let message = self.load_visible_message(message_id, caller.user_id).await?;
        if message.sender_id != caller.user_id {
            return Err(ChatError::forbidden("only the sender can edit a message"));
        }
        if message.deleted {
            return Err(ChatError::forbidden("message was deleted"));
        }

        let edited_at = now();
        let (mid, uid, body) = (message_id.to_string(), caller.user_id.to_string(), content.clone());
        let updated = self
            .db(move |db| db.edit_message(&mid, &uid, &body, edited_at))
            .await?;
        if !updated {
            // Deleted between the read and the guarded update.
            return Err(ChatError::forbidden("message was deleted"));
        }

        self.fan_out(
            message.conversation_id,
            GatewayEvent::MessageEdited {
                id: message_id,
                conversation_id: message.conversation_id,
                content,
                edited_at,
            },
            None,
        )
        .await;
        Ok(())
    }

    async fn delete_message(&self, caller: &Caller, message_id: Uuid) -> Result<(), ChatError> {
        let message = self.load_visible_message(message_id, caller.user_id).await?;
        if message.sender_id != caller.user_id {
            return Err(ChatError::forbidden("only the sender can delete a message"));
        }
        if message.deleted {
            return Ok(());
        }

        let (mid, uid) = (message_id.to_string(), caller.user_id.to_string());
        let deleted = self
            .db(move |db| db.soft_delete_message(&mid, &uid, now()))
            .await?;

        if deleted {
            self.fan_out(
                message.conversation_id,
                GatewayEvent::MessageDeleted {
                    id: message_id,
                    conversation_id: message.conversation_id,
                },
                None,
            )
            .await;
        }
        Ok(())
    }

    async fn mark_read(
        &self,
        caller: &Caller,
        conversation_id: Uuid,
        message_ids: Vec<Uuid>,
    ) -> Result<(), ChatError> {
        self.require_member(conversation_id, caller.user_id).await?;

        let read_at = now();
        let (cid, uid) = (conversation_id.to_string(), caller.user_id.to_string());
        let recorded = self
            .db(move |db| db.mark_read(&cid, &uid, &message_ids, read_at))
            .await?;

        self.notify_read(conversation_id, caller.user_id, recorded, read_at)
            .await;
        Ok(())
    }

    async fn set_presence(&self, caller: &Caller, status: PresenceStatus) {
        let mut table = self.inner.presence.write().await;
        if let Some(snapshot) = table.set_status(caller.user_id, status) {
            self.inner.registry.read().await.broadcast(&presence_event(snapshot));
        }
    }

    // -- Server-initiated events --

    /// Fan out receipts recorded outside the gateway (e.g. by a history fetch).
    pub async fn notify_read(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        message_ids: Vec<Uuid>,
        read_at: chrono::DateTime<chrono::Utc>,
    ) {
        if message_ids.is_empty() {
            return;
        }
        self.fan_out(
            conversation_id,
            GatewayEvent::MessagesRead {
                conversation_id,
                user_id,
                message_ids,
                read_at,
            },
            None,
        )
        .await;
    }

    /// Put every connected participant into the new conversation's room and
    /// tell them about it.
    pub async fn conversation_created(&self, conversation: &Conversation) {
        let event = GatewayEvent::ConversationCreated {
            conversation: conversation.clone(),
        };

        let mut registry = self.inner.registry.write().await;
        for user_id in &conversation.participants {
            for conn_id in registry.connections_of(*user_id) {
                registry.join(conn_id, conversation.id);
                registry.send_to(conn_id, event.clone());
            }
        }
    }

    pub async fn participant_added(&self, conversation: &Conversation, user_id: Uuid) {
        let mut registry = self.inner.registry.write().await;
        for conn_id in registry.connections_of(user_id) {
            registry.join(conn_id, conversation.id);
            registry.send_to(
                conn_id,
                GatewayEvent::ConversationCreated {
                    conversation: conversation.clone(),
                },
            );
            registry.send_to(
                conn_id,
                GatewayEvent::Joined {
                    conversation_id: conversation.id,
                },
            );
        }
    }

    /// Evict a removed participant's connections from the room, so nothing
    /// more of the conversation reaches them.
    pub async fn participant_removed(&self, conversation_id: Uuid, user_id: Uuid) {
        {
            let mut registry = self.inner.registry.write().await;
            for conn_id in registry.connections_of(user_id) {
                registry.leave(conn_id, conversation_id);
                registry.send_to(conn_id, GatewayEvent::Left { conversation_id });
            }
        }

        self.stop_typing(TypingKey {
            conversation_id,
            user_id,
        })
        .await;
        info!("Evicted {} from conversation {}", user_id, conversation_id);
    }

    // -- Typing expiry --

    /// Stop every typing indicator whose deadline is at or before `now`.
    /// Returns how many were stopped.
    pub async fn expire_typing(&self, now: Instant) -> usize {
        let expired = self.typing().expire(now);
        for key in &expired {
            self.fan_out(
                key.conversation_id,
                GatewayEvent::TypingStopped {
                    conversation_id: key.conversation_id,
                    user_id: key.user_id,
                },
                Some(key.user_id),
            )
            .await;
        }
        expired.len()
    }

    /// Periodically expire typing indicators. Runs until the task is aborted.
    pub fn spawn_typing_sweeper(&self) -> JoinHandle<()> {
        let router = self.clone();
        let period = self.inner.config.typing_sweep_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let expired = router.expire_typing(Instant::now()).await;
                if expired > 0 {
                    trace!("Typing sweeper expired {} indicators", expired);
                }
            }
        })
    }

    // -- Introspection --

    pub fn is_typing(&self, conversation_id: Uuid, user_id: Uuid) -> bool {
        self.typing().is_typing(TypingKey {
            conversation_id,
            user_id,
        })
    }

    pub fn typing_in(&self, conversation_id: Uuid) -> Vec<Uuid> {
        self.typing().typing_in(conversation_id)
    }

    pub async fn presence_of(&self, user_id: Uuid) -> PresenceStatus {
        self.inner.presence.read().await.status(user_id)
    }

    pub async fn room_size(&self, conversation_id: Uuid) -> usize {
        self.inner.registry.read().await.room_size(conversation_id)
    }

    pub async fn is_in_room(&self, conn_id: ConnectionId, conversation_id: Uuid) -> bool {
        self.inner.registry.read().await.is_in_room(conn_id, conversation_id)
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.registry.read().await.connection_count()
    }

    // -- Helpers --

    fn typing(&self) -> MutexGuard<'_, TypingTracker> {
        self.inner.typing.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn send_to(&self, conn_id: ConnectionId, event: GatewayEvent) {
        self.inner.registry.read().await.send_to(conn_id, event);
    }

    async fn fan_out(&self, room: Uuid, event: GatewayEvent, exclude_user: Option<Uuid>) {
        let delivered = self.inner.registry.read().await.fan_out(room, &event, exclude_user);
        trace!("Fanned out to {} connections in {}", delivered, room);
    }

    /// Membership is always checked against the store, never the room cache.
    async fn require_member(&self, conversation_id: Uuid, user_id: Uuid) -> Result<(), ChatError> {
        let (cid, uid) = (conversation_id.to_string(), user_id.to_string());
        let (member, exists) = self
            .db(move |db| {
                if db.is_participant(&cid, &uid)? {
                    return Ok((true, true));
                }
                Ok((false, db.get_conversation(&cid)?.is_some()))
            })
            .await?;

        match (member, exists) {
            (true, _) => Ok(()),
            (false, true) => Err(ChatError::unauthorized("not a participant of this conversation")),
            (false, false) => Err(ChatError::not_found(format!("conversation {}", conversation_id))),
        }
    }

    /// Load a message the user may see: it exists and they belong to its conversation.
    async fn load_visible_message(&self, message_id: Uuid, user_id: Uuid) -> Result<Message, ChatError> {
        let mid = message_id.to_string();
        let message = self
            .db(move |db| db.get_message(&mid))
            .await?
            .ok_or_else(|| ChatError::not_found(format!("message {}", message_id)))?;
        self.require_member(message.conversation_id, user_id).await?;
        Ok(message)
    }

    /// Run a blocking store call off the async runtime. Failures are logged
    /// here and surface as `Internal`.
    async fn db<F, T>(&self, f: F) -> Result<T, ChatError>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.inner.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                ChatError::internal("persistence task failed")
            })?
            .map_err(|e| {
                error!("Persistence failure: {:#}", e);
                ChatError::internal("persistence failure")
            })
    }
}

fn presence_event(snapshot: PresenceSnapshot) -> GatewayEvent {
    GatewayEvent::PresenceChanged {
        user_id: snapshot.user_id,
        status: snapshot.status,
        last_seen: snapshot.last_seen,
    }
}
