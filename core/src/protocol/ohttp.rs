// Oblivious HTTP — boundary to the encapsulation layer wrapping join requests

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OhttpError {
    #[error("Key configuration unavailable: {0}")]
    KeyConfig(String),
    #[error("Encapsulation failed: {0}")]
    Encrypt(String),
    #[error("Decapsulation failed: {0}")]
    Decrypt(String),
    #[error("No encapsulation context for id {0}")]
    UnknownContext(u64),
}

/// Encrypts a request and later decrypts its response under the same context.
///
/// `context_id` pairs the two calls; the engine uses the message id.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObliviousHttpEncryptor: Send + Sync {
    /// May fetch key configuration, hence async
    async fn encrypt(&self, plaintext: Vec<u8>, context_id: u64) -> Result<Vec<u8>, OhttpError>;

    fn decrypt(&self, ciphertext: &[u8], context_id: u64) -> Result<Vec<u8>, OhttpError>;
}
