// Message types — join candidates and their lifecycle

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle of a join candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageStatus {
    /// Stored, waiting for a sign round
    NotProcessed,
    /// Token recovered, join not yet acknowledged
    Signed,
    /// Join acknowledged by the server (terminal)
    Joined,
    /// Sign or join rejected (terminal)
    Failed,
}

impl MessageStatus {
    pub const ALL: [MessageStatus; 4] = [
        MessageStatus::NotProcessed,
        MessageStatus::Signed,
        MessageStatus::Joined,
        MessageStatus::Failed,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, MessageStatus::Joined | MessageStatus::Failed)
    }

    /// Forward-only transitions. Going back to `NotProcessed` is only
    /// possible through an explicit resubmit.
    pub fn can_transition_to(self, next: MessageStatus) -> bool {
        match (self, next) {
            (MessageStatus::NotProcessed, MessageStatus::NotProcessed) => false,
            (MessageStatus::NotProcessed, _) => true,
            (MessageStatus::Signed, MessageStatus::Joined | MessageStatus::Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotProcessed => write!(f, "not_processed"),
            Self::Signed => write!(f, "signed"),
            Self::Joined => write!(f, "joined"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "not_processed" => Ok(Self::NotProcessed),
            "signed" => Ok(Self::Signed),
            "joined" => Ok(Self::Joined),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown message status: {}", other)),
        }
    }
}

/// Where a sign-join invocation came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignJoinSource {
    /// Sampled for processing as soon as it arrived
    Immediate,
    /// Pulled from the store by a background run
    Background,
}

impl fmt::Display for SignJoinSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Immediate => write!(f, "immediate"),
            Self::Background => write!(f, "background"),
        }
    }
}

/// A piece of evidence waiting to be counted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KAnonMessage {
    /// Assigned by the message store on insert; 0 until then
    pub id: u64,
    /// Opaque hash-set identifier
    pub hash_set: String,
    /// Caller-supplied id tying the message back to its origin
    pub correlation_id: u64,
    /// Unix timestamp (seconds)
    pub created_at: u64,
    /// Unix timestamp after which the message is ignored and purged
    pub expiry_at: u64,
    /// Expiry of the client-parameter generation that last signed this message
    pub corresponding_client_parameters_expiry: Option<u64>,
    pub status: MessageStatus,
}

impl KAnonMessage {
    pub fn new(hash_set: &str, correlation_id: u64, created_at: u64, expiry_at: u64) -> Self {
        Self {
            id: 0,
            hash_set: hash_set.to_string(),
            correlation_id,
            created_at,
            expiry_at,
            corresponding_client_parameters_expiry: None,
            status: MessageStatus::NotProcessed,
        }
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.expiry_at <= now
    }

    /// Joined under a parameter generation that is still live at `now`.
    pub fn is_covered(&self, now: u64) -> bool {
        self.status == MessageStatus::Joined
            && self
                .corresponding_client_parameters_expiry
                .map(|expiry| expiry > now)
                .unwrap_or(false)
    }
}
