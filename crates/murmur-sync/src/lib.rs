//! Client-side view of the chat, kept in step with the gateway by applying
//! its events.
//!
//! `SyncState` is an immutable snapshot: every reducer takes `&self` and
//! returns the next state, sharing untouched conversations with the previous
//! one. Applying the same event twice leaves the state as it was after the
//! first time.

pub mod phrase;
mod reducers;
pub mod state;

pub use phrase::typing_phrase;
pub use reducers::same_view;
pub use state::{ConversationView, SyncState, TypingUser};
