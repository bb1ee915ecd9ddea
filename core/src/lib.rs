// K-Anon Core — client-side sign-and-join engine
//
// New evidence is stored as a join candidate, signed with anonymous counting
// tokens and joined through Oblivious HTTP, so the server can count matching
// clients without learning who they are.

pub mod bhttp;
pub mod clock;
pub mod config;
pub mod message;
pub mod protocol;
pub mod signjoin;
pub mod store;

use thiserror::Error;

pub use bhttp::{BhttpError, BinaryHttpMessage};
pub use clock::{Clock, SystemClock};
pub use config::{ConfigError, KAnonConfig};
pub use message::{KAnonMessage, MessageStatus, SignJoinSource};
pub use protocol::{KAnonCaller, KAnonCallerBuilder, KAnonCallerImpl, SignJoinOutcome};
pub use signjoin::{
    BackgroundRunOutcome, BackgroundRunner, BackgroundScheduler, SignJoinManager, ThreadRandom,
};
pub use store::{KAnonStores, StoreError};

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KAnonError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
    #[error("Background task failed: {0}")]
    Task(String),
}
