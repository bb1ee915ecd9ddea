//! Runtime configuration for the sign-and-join engine
//!
//! Every field has a default so a partial JSON document deserializes:
//! - Feature toggle and routing percentage
//! - Batch sizes for signing and background runs
//! - Endpoint URLs for the sign and join servers
//! - Parameter lifetimes and transport timeout

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid immediate-call percentage: must be 0-100, got {0}")]
    InvalidPercentage(u8),

    #[error("Invalid sign batch size: must be > 0")]
    InvalidSignBatchSize,

    #[error("Invalid set type: must not be empty")]
    EmptySetType,

    #[error("Missing endpoint while enabled: {0}")]
    MissingEndpoint(&'static str),

    #[error("Invalid duration for {0}: must be > 0")]
    InvalidDuration(&'static str),
}

// ============================================================================
// CONFIG
// ============================================================================

/// Engine configuration
///
/// Invariant: when `enabled` is true every endpoint the flow touches must be
/// set. The challenge URL is only required with key attestation on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KAnonConfig {
    /// Master toggle; when false nothing is stored and nothing is sent
    pub enabled: bool,

    /// Share of new messages (0-100) processed right away instead of batched
    pub percentage_immediate_sign_join_calls: u8,

    /// Upper bound on messages pulled by one background run
    pub messages_per_background_run: usize,

    /// Messages per token request
    pub sign_batch_size: usize,

    /// Set type used in fingerprints and join paths
    pub set_type: String,

    /// Authority placed in the binary HTTP join request
    pub join_authority: String,

    pub fetch_server_params_url: String,
    pub register_client_params_url: String,
    pub get_tokens_url: String,
    pub join_url: String,
    pub get_challenge_url: String,

    /// Attach a device attestation record to registration
    pub key_attestation_enabled: bool,

    /// Emit the fine-grained initialize/sign/join/challenge stats
    pub logging_enabled: bool,

    /// Client parameter lifetime when the server does not supply one
    pub client_params_ttl_secs: u64,

    pub server_params_sign_ttl_secs: u64,
    pub server_params_join_ttl_secs: u64,

    /// Period of the background trigger
    pub background_interval_secs: u64,

    pub http_timeout_ms: u64,
}

impl KAnonConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.percentage_immediate_sign_join_calls > 100 {
            return Err(ConfigError::InvalidPercentage(
                self.percentage_immediate_sign_join_calls,
            ));
        }

        if self.sign_batch_size == 0 {
            return Err(ConfigError::InvalidSignBatchSize);
        }

        if self.set_type.is_empty() {
            return Err(ConfigError::EmptySetType);
        }

        for (name, value) in [
            ("client_params_ttl_secs", self.client_params_ttl_secs),
            ("server_params_sign_ttl_secs", self.server_params_sign_ttl_secs),
            ("server_params_join_ttl_secs", self.server_params_join_ttl_secs),
            ("background_interval_secs", self.background_interval_secs),
            ("http_timeout_ms", self.http_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidDuration(name));
            }
        }

        if self.enabled {
            for (name, url) in [
                ("fetch_server_params_url", &self.fetch_server_params_url),
                ("register_client_params_url", &self.register_client_params_url),
                ("get_tokens_url", &self.get_tokens_url),
                ("join_url", &self.join_url),
                ("join_authority", &self.join_authority),
            ] {
                if url.is_empty() {
                    return Err(ConfigError::MissingEndpoint(name));
                }
            }
            if self.key_attestation_enabled && self.get_challenge_url.is_empty() {
                return Err(ConfigError::MissingEndpoint("get_challenge_url"));
            }
        }

        Ok(())
    }

    /// Background runs only do work when enabled and given a non-zero budget
    pub fn background_run_active(&self) -> bool {
        self.enabled && self.messages_per_background_run > 0
    }
}

impl Default for KAnonConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            percentage_immediate_sign_join_calls: 10,
            messages_per_background_run: 100,
            sign_batch_size: 32,
            set_type: "fledge".to_string(),
            join_authority: String::new(),
            fetch_server_params_url: String::new(),
            register_client_params_url: String::new(),
            get_tokens_url: String::new(),
            join_url: String::new(),
            get_challenge_url: String::new(),
            key_attestation_enabled: false,
            logging_enabled: false,
            client_params_ttl_secs: 7 * 24 * 60 * 60,
            server_params_sign_ttl_secs: 10_000,
            server_params_join_ttl_secs: 10_000,
            background_interval_secs: 6 * 60 * 60,
            http_timeout_ms: 5_000,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
