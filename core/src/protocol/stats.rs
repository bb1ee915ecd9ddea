//! Stats records emitted by the sign-join engine.
//!
//! Every `sign_and_join_messages` invocation emits exactly one
//! [`SignJoinStats`]. When fine-grained logging is enabled the caller also
//! emits per-step records for initialization, sign rounds, joins and the
//! key-attestation challenge. Sinks must never break the engine, so the
//! emitter swallows both errors and panics raised by a logger.

use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::message::SignJoinSource;

// ============================================================================
// ACTIONS & REASONS
// ============================================================================

/// The step that was running when a failure occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KAnonAction {
    Unset,
    ServerParamHttpCall,
    ServerPublicParamsProtoComposition,
    GenerateClientParamAct,
    GetChallengeHttpCall,
    KeyAttestationRecord,
    RegisterClientHttpCall,
    RegisterClientResponseProtoComposition,
    GenerateTokensRequestAct,
    GetTokensRequestHttpCall,
    GetTokensResponseProtoComposition,
    VerifyTokensResponseAct,
    RecoverTokensAct,
    ServerParamsJoinWindow,
    BinaryHttpRequest,
    OhttpEncrypt,
    JoinHttpCall,
    OhttpDecrypt,
    BinaryHttpResponse,
    Storage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureReason {
    /// A body could not be decoded
    ProtoParse,
    /// The server answered with a 5xx
    Server,
    /// Connection failure or a 4xx
    Network,
    Internal,
}

/// Outcome of one fine-grained step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepResult {
    Success,
    Failure {
        action: KAnonAction,
        reason: FailureReason,
    },
}

impl StepResult {
    pub fn is_success(&self) -> bool {
        matches!(self, StepResult::Success)
    }
}

// ============================================================================
// RECORDS
// ============================================================================

/// One per `sign_and_join_messages` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignJoinStats {
    pub source: SignJoinSource,
    /// Messages handed to the call
    pub total_messages: usize,
    /// Messages that survived the reload filter
    pub eligible_messages: usize,
    pub joined: usize,
    pub failed: usize,
    pub not_processed: usize,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializeStats {
    pub result: StepResult,
    /// Whether fresh parameters were registered (false on cache reuse)
    pub registered: bool,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignStats {
    pub result: StepResult,
    pub batch_size: usize,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinStats {
    pub result: StepResult,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetChallengeStats {
    pub result: StepResult,
    pub certificate_size_bytes: usize,
    pub latency_ms: u64,
}

// ============================================================================
// LOGGER
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StatsError {
    #[error("Stats sink unavailable: {0}")]
    Sink(String),
}

/// Destination for stats records. Only the per-call record is mandatory.
pub trait StatsLogger: Send + Sync {
    fn log_sign_join_status(&self, stats: &SignJoinStats) -> Result<(), StatsError>;

    fn log_initialize(&self, _stats: &InitializeStats) -> Result<(), StatsError> {
        Ok(())
    }

    fn log_sign(&self, _stats: &SignStats) -> Result<(), StatsError> {
        Ok(())
    }

    fn log_join(&self, _stats: &JoinStats) -> Result<(), StatsError> {
        Ok(())
    }

    fn log_get_challenge(&self, _stats: &GetChallengeStats) -> Result<(), StatsError> {
        Ok(())
    }
}

/// Writes every record as a structured tracing event under `kanon::stats`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingStatsLogger;

impl StatsLogger for TracingStatsLogger {
    fn log_sign_join_status(&self, stats: &SignJoinStats) -> Result<(), StatsError> {
        info!(
            target: "kanon::stats",
            source = %stats.source,
            total = stats.total_messages,
            eligible = stats.eligible_messages,
            joined = stats.joined,
            failed = stats.failed,
            not_processed = stats.not_processed,
            latency_ms = stats.latency_ms,
            "sign_join"
        );
        Ok(())
    }

    fn log_initialize(&self, stats: &InitializeStats) -> Result<(), StatsError> {
        info!(
            target: "kanon::stats",
            result = ?stats.result,
            registered = stats.registered,
            latency_ms = stats.latency_ms,
            "initialize"
        );
        Ok(())
    }

    fn log_sign(&self, stats: &SignStats) -> Result<(), StatsError> {
        info!(
            target: "kanon::stats",
            result = ?stats.result,
            batch_size = stats.batch_size,
            latency_ms = stats.latency_ms,
            "sign"
        );
        Ok(())
    }

    fn log_join(&self, stats: &JoinStats) -> Result<(), StatsError> {
        info!(
            target: "kanon::stats",
            result = ?stats.result,
            latency_ms = stats.latency_ms,
            "join"
        );
        Ok(())
    }

    fn log_get_challenge(&self, stats: &GetChallengeStats) -> Result<(), StatsError> {
        info!(
            target: "kanon::stats",
            result = ?stats.result,
            certificate_size_bytes = stats.certificate_size_bytes,
            latency_ms = stats.latency_ms,
            "get_challenge"
        );
        Ok(())
    }
}

// ============================================================================
// EMITTER
// ============================================================================

/// Gates fine-grained records and isolates the engine from sink failures
#[derive(Clone)]
pub(crate) struct StatsEmitter {
    logger: Arc<dyn StatsLogger>,
    fine_grained: bool,
}

impl StatsEmitter {
    pub(crate) fn new(logger: Arc<dyn StatsLogger>, fine_grained: bool) -> Self {
        Self {
            logger,
            fine_grained,
        }
    }

    pub(crate) fn sign_join(&self, stats: &SignJoinStats) {
        self.guarded("sign_join", |logger| logger.log_sign_join_status(stats));
    }

    pub(crate) fn initialize(&self, stats: &InitializeStats) {
        if self.fine_grained {
            self.guarded("initialize", |logger| logger.log_initialize(stats));
        }
    }

    pub(crate) fn sign(&self, stats: &SignStats) {
        if self.fine_grained {
            self.guarded("sign", |logger| logger.log_sign(stats));
        }
    }

    pub(crate) fn join(&self, stats: &JoinStats) {
        if self.fine_grained {
            self.guarded("join", |logger| logger.log_join(stats));
        }
    }

    pub(crate) fn get_challenge(&self, stats: &GetChallengeStats) {
        if self.fine_grained {
            self.guarded("get_challenge", |logger| logger.log_get_challenge(stats));
        }
    }

    fn guarded(&self, record: &str, emit: impl FnOnce(&dyn StatsLogger) -> Result<(), StatsError>) {
        let logger = self.logger.as_ref();
        match catch_unwind(AssertUnwindSafe(|| emit(logger))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Dropping {} stats record: {}", record, e),
            Err(_) => warn!("Stats logger panicked while writing {} record", record),
        }
    }
}
