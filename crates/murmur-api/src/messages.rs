use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use murmur_db::queries::now;
use murmur_types::api::{HistoryCursor, Identity, MessagePage};
use murmur_types::error::ChatError;
use murmur_types::models::Message;

use crate::auth::AppState;
use crate::error::ApiError;

const DEFAULT_PAGE: u32 = 50;
const MAX_PAGE: u32 = 200;
const DEFAULT_SEARCH_LIMIT: u32 = 20;
const MAX_SEARCH_LIMIT: u32 = 100;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// The previous page's `next_before`, or a bare RFC 3339 timestamp.
    pub before: Option<String>,
}

fn default_limit() -> u32 {
    DEFAULT_PAGE
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    pub limit: Option<u32>,
}

/// A page of history, newest first. Fetching a page counts as reading it:
/// receipts are recorded for messages from others and fanned out to the room.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<MessagePage>, ApiError> {
    let limit = query.limit.clamp(1, MAX_PAGE);
    let before = query.before.as_deref().map(HistoryCursor::parse).transpose()?;

    let (cid, uid) = (conversation_id.to_string(), identity.user_id.to_string());
    let (is_member, exists) = {
        let (cid, uid) = (cid.clone(), uid.clone());
        state
            .db(move |db| {
                if db.is_participant(&cid, &uid)? {
                    return Ok((true, true));
                }
                Ok((false, db.get_conversation(&cid)?.is_some()))
            })
            .await?
    };
    if !is_member {
        let err = if exists {
            ChatError::unauthorized("not a participant of this conversation")
        } else {
            ChatError::not_found(format!("conversation {}", conversation_id))
        };
        return Err(err.into());
    }

    let read_at = now();
    let (mut messages, recorded) = state
        .db(move |db| {
            let messages = db.get_messages(&cid, limit, before.as_ref())?;
            let unread: Vec<Uuid> = messages
                .iter()
                .filter(|m| !m.deleted && !m.is_read_by(identity.user_id))
                .map(|m| m.id)
                .collect();
            let recorded = if unread.is_empty() {
                Vec::new()
            } else {
                db.mark_read(&cid, &uid, &unread, read_at)?
            };
            Ok((messages, recorded))
        })
        .await?;

    for message in messages.iter_mut().filter(|m| recorded.contains(&m.id)) {
        message.record_read(identity.user_id, read_at);
    }

    // A short page is the last one.
    let next_before = if messages.len() as u32 == limit {
        messages.last().map(|m| HistoryCursor::after(m).encode())
    } else {
        None
    };

    debug!(
        "{} fetched {} messages of {} ({} newly read)",
        identity.user_id,
        messages.len(),
        conversation_id,
        recorded.len()
    );
    state
        .router
        .notify_read(conversation_id, identity.user_id, recorded, read_at)
        .await;

    Ok(Json(MessagePage {
        messages,
        next_before,
    }))
}

/// Substring search over live messages in the caller's conversations.
pub async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let needle = query.q.trim().to_string();
    if needle.is_empty() {
        return Err(ChatError::validation("search query is empty").into());
    }
    let limit = query
        .limit
        .unwrap_or(DEFAULT_SEARCH_LIMIT)
        .clamp(1, MAX_SEARCH_LIMIT);

    let uid = identity.user_id.to_string();
    let results = state
        .db(move |db| db.search_messages(&uid, &needle, limit))
        .await?;
    Ok(Json(results))
}
