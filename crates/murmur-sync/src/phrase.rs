use murmur_types::models::ConversationId;

use crate::state::{SyncState, TypingUser};

/// Human phrasing for who is typing in a conversation, or `None` when
/// nobody is. Names appear in the order people started typing.
pub fn typing_phrase(state: &SyncState, conversation_id: ConversationId) -> Option<String> {
    let typing = state.conversation(conversation_id)?.typing.as_slice();
    phrase_for(typing)
}

fn phrase_for(typing: &[TypingUser]) -> Option<String> {
    match typing {
        [] => None,
        [one] => Some(format!("{} is typing…", one.display_name)),
        [first, second] => Some(format!(
            "{} and {} are typing…",
            first.display_name, second.display_name
        )),
        [first, rest @ ..] => Some(format!(
            "{} and {} others are typing…",
            first.display_name,
            rest.len()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn typists(names: &[&str]) -> Vec<TypingUser> {
        names
            .iter()
            .map(|name| TypingUser {
                user_id: Uuid::new_v4(),
                display_name: name.to_string(),
            })
            .collect()
    }

    #[test]
    fn phrasing_follows_set_size() {
        assert_eq!(phrase_for(&[]), None);
        assert_eq!(phrase_for(&typists(&["Ana"])).unwrap(), "Ana is typing…");
        assert_eq!(phrase_for(&typists(&["Ana", "Ben"])).unwrap(), "Ana and Ben are typing…");
        assert_eq!(
            phrase_for(&typists(&["Ana", "Ben", "Cy", "Dee"])).unwrap(),
            "Ana and 3 others are typing…"
        );
    }

    #[test]
    fn unknown_conversation_has_no_phrase() {
        let state = SyncState::new(Uuid::new_v4());
        assert_eq!(typing_phrase(&state, Uuid::new_v4()), None);
    }
}
