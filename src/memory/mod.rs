//! Conversation memory
//!
//! Role-tagged message history owned by a single chat session

pub mod store;

pub use store::{ConversationHistory, ConversationMessage, MessageRole};
