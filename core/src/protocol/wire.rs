//! Protobuf bodies exchanged with the sign server and the ACT engine.
//!
//! Cryptographic payloads are opaque byte blobs; only the envelope fields
//! the engine reads or writes are modelled. Bodies are plain (not
//! length-delimited) protobuf encodings.

/// Scheme constants shared by client and server
#[derive(Clone, PartialEq, prost::Message)]
pub struct SchemeParameters {
    #[prost(bytes = "vec", tag = "1")]
    pub payload: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ServerPublicParameters {
    #[prost(bytes = "vec", tag = "1")]
    pub payload: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ClientPublicParameters {
    #[prost(bytes = "vec", tag = "1")]
    pub payload: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ClientPrivateParameters {
    #[prost(bytes = "vec", tag = "1")]
    pub payload: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ClientParameters {
    #[prost(message, optional, tag = "1")]
    pub public_parameters: Option<ClientPublicParameters>,
    #[prost(message, optional, tag = "2")]
    pub private_parameters: Option<ClientPrivateParameters>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GetServerPublicParamsResponse {
    #[prost(string, tag = "1")]
    pub server_params_version: String,
    #[prost(message, optional, tag = "2")]
    pub server_public_params: Option<ServerPublicParameters>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum AttestationScheme {
    Unspecified = 0,
    X509CertificateChain = 1,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum AuthType {
    Unspecified = 0,
    DeviceAttestation = 1,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DeviceRequestMetadata {
    /// UTF-8 bytes of the user profile id
    #[prost(bytes = "vec", tag = "1")]
    pub client_id: Vec<u8>,
    /// Encoded certificate chain; empty when not attested
    #[prost(bytes = "vec", tag = "2")]
    pub attestation: Vec<u8>,
    #[prost(enumeration = "AttestationScheme", tag = "3")]
    pub attestation_scheme: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct RequestMetadata {
    #[prost(message, optional, tag = "1")]
    pub device_request_metadata: Option<DeviceRequestMetadata>,
    #[prost(enumeration = "AuthType", tag = "2")]
    pub auth_type: i32,
}

impl RequestMetadata {
    /// Identifies the client without an attestation record
    pub fn for_client(client_id: &str) -> Self {
        Self {
            device_request_metadata: Some(DeviceRequestMetadata {
                client_id: client_id.as_bytes().to_vec(),
                attestation: Vec::new(),
                attestation_scheme: AttestationScheme::Unspecified as i32,
            }),
            auth_type: AuthType::DeviceAttestation as i32,
        }
    }

    /// Identifies the client and carries a certificate chain
    pub fn attested(client_id: &str, certificate_chain: Vec<u8>) -> Self {
        Self {
            device_request_metadata: Some(DeviceRequestMetadata {
                client_id: client_id.as_bytes().to_vec(),
                attestation: certificate_chain,
                attestation_scheme: AttestationScheme::X509CertificateChain as i32,
            }),
            auth_type: AuthType::DeviceAttestation as i32,
        }
    }

    pub fn is_attested(&self) -> bool {
        self.device_request_metadata
            .as_ref()
            .map(|m| !m.attestation.is_empty())
            .unwrap_or(false)
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct RegisterClientRequest {
    #[prost(message, optional, tag = "1")]
    pub client_public_params: Option<ClientPublicParameters>,
    #[prost(message, optional, tag = "2")]
    pub request_metadata: Option<RequestMetadata>,
    #[prost(string, tag = "3")]
    pub server_params_version: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct RegisterClientResponse {
    #[prost(string, tag = "1")]
    pub client_params_version: String,
    /// Unix seconds; zero or past means "use the local default"
    #[prost(int64, tag = "2")]
    pub client_params_expiry_secs: i64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct MessagesSet {
    #[prost(string, repeated, tag = "1")]
    pub message: Vec<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct TokensRequest {
    #[prost(bytes = "vec", tag = "1")]
    pub payload: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct TokensRequestPrivateState {
    #[prost(bytes = "vec", tag = "1")]
    pub payload: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct TokensResponse {
    #[prost(bytes = "vec", tag = "1")]
    pub payload: Vec<u8>,
}

/// Output of the ACT request generation step
#[derive(Clone, PartialEq, prost::Message)]
pub struct GeneratedTokensRequest {
    #[prost(message, optional, tag = "1")]
    pub tokens_request: Option<TokensRequest>,
    #[prost(message, optional, tag = "2")]
    pub tokens_request_private_state: Option<TokensRequestPrivateState>,
    #[prost(bytes = "vec", repeated, tag = "3")]
    pub fingerprints_bytes: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GetTokensRequest {
    #[prost(message, optional, tag = "1")]
    pub request_metadata: Option<RequestMetadata>,
    #[prost(string, tag = "2")]
    pub client_params_version: String,
    #[prost(message, optional, tag = "3")]
    pub tokens_request: Option<TokensRequest>,
    #[prost(bytes = "vec", repeated, tag = "4")]
    pub client_fingerprints_bytes: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GetTokensResponse {
    #[prost(message, optional, tag = "1")]
    pub tokens_response: Option<TokensResponse>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct TokenV0 {
    #[prost(bytes = "vec", tag = "1")]
    pub bb_signature: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Token {
    #[prost(bytes = "vec", tag = "1")]
    pub nonce_bytes: Vec<u8>,
    #[prost(message, optional, tag = "2")]
    pub token_v0: Option<TokenV0>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct TokensSet {
    #[prost(message, repeated, tag = "1")]
    pub tokens: Vec<Token>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GetKeyAttestationChallengeResponse {
    #[prost(bytes = "vec", tag = "1")]
    pub attestation_challenge: Vec<u8>,
}
