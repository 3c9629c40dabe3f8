//! Domain layer types and invariants.

pub mod attachments;
pub mod blocks;
pub mod documents;
pub mod error;
pub mod polls;
pub mod slug;
pub mod types;
