// Key attestation — device-backed proof attached to client registration

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AttestationError {
    #[error("Key store error: {0}")]
    KeyStore(String),
    #[error("Certificate error: {0}")]
    Certificate(String),
    #[error("Attestation unavailable: {0}")]
    Unavailable(String),
}

#[cfg_attr(test, mockall::automock)]
pub trait KeyAttestation: Send + Sync {
    /// Encoded certificate chain binding `challenge` to a device key
    fn generate_attestation_record(&self, challenge: &[u8]) -> Result<Vec<u8>, AttestationError>;
}
