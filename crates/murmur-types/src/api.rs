use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ChatError, ErrorKind};
use crate::models::{ConversationKind, Message};

// -- JWT Claims --

/// Claims of the tokens issued by the auth service. Shared by the REST
/// middleware and the gateway upgrade handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub name: String,
    pub exp: usize,
}

/// A verified caller: who the auth service says is on the other end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub display_name: String,
}

impl From<Claims> for Identity {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.sub,
            display_name: claims.name,
        }
    }
}

// -- Conversations --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateConversationRequest {
    pub kind: ConversationKind,
    #[serde(default)]
    pub participant_ids: Vec<Uuid>,
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddParticipantRequest {
    pub user_id: Uuid,
    #[serde(default)]
    pub admin: bool,
}

// -- Messages --

#[derive(Debug, Serialize, Deserialize)]
pub struct MessagePage {
    /// Newest first.
    pub messages: Vec<Message>,
    /// Cursor for the next (older) page; absent on the last page.
    pub next_before: Option<String>,
}

/// Exclusive upper bound of a history page: everything strictly older than
/// this message. Messages sharing a timestamp are told apart by id, so a
/// page boundary never skips any of them.
///
/// Encoded as `<created_at RFC 3339>_<message id>`. A bare RFC 3339
/// timestamp is accepted too and means "strictly before this instant".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryCursor {
    pub created_at: DateTime<Utc>,
    pub message_id: Option<Uuid>,
}

impl HistoryCursor {
    /// The cursor for the page that follows `message`.
    pub fn after(message: &Message) -> Self {
        Self {
            created_at: message.created_at,
            message_id: Some(message.id),
        }
    }

    pub fn encode(&self) -> String {
        let ts = self.created_at.to_rfc3339_opts(SecondsFormat::Micros, true);
        match self.message_id {
            Some(id) => format!("{}_{}", ts, id),
            None => ts,
        }
    }

    pub fn parse(raw: &str) -> Result<Self, ChatError> {
        let invalid = || ChatError::validation("before must be a history cursor or an RFC 3339 timestamp");
        let (ts, id) = match raw.split_once('_') {
            Some((ts, id)) => (ts, Some(id.parse::<Uuid>().map_err(|_| invalid())?)),
            None => (raw, None),
        };
        let created_at = DateTime::parse_from_rfc3339(ts).map_err(|_| invalid())?;
        Ok(Self {
            created_at: created_at.with_timezone(&Utc),
            message_id: id,
        })
    }
}

// -- Errors --

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_carries_the_message_id() {
        let cursor = HistoryCursor {
            created_at: "2026-03-01T10:00:00.123456Z".parse().unwrap(),
            message_id: Some(Uuid::new_v4()),
        };
        let raw = cursor.encode();
        assert!(!raw.contains('+'), "safe to put in a query string: {}", raw);
        assert_eq!(HistoryCursor::parse(&raw).unwrap(), cursor);
    }

    #[test]
    fn bare_timestamp_is_a_cursor_without_id() {
        let cursor = HistoryCursor::parse("2026-03-01T11:00:00+01:00").unwrap();
        assert_eq!(cursor.created_at, "2026-03-01T10:00:00Z".parse::<DateTime<Utc>>().unwrap());
        assert!(cursor.message_id.is_none());
    }

    #[test]
    fn garbage_cursor_is_a_validation_error() {
        for raw in ["yesterday", "2026-03-01T10:00:00Z_not-a-uuid", ""] {
            let err = HistoryCursor::parse(raw).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ValidationFailed, "{}", raw);
        }
    }
}
