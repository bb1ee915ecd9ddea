// Message module — join candidates and their status lifecycle

pub mod types;

pub use types::{KAnonMessage, MessageStatus, SignJoinSource};
