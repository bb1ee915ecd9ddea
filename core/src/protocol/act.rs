// Anonymous counting tokens — boundary to the cryptographic library

use thiserror::Error;

use super::wire::{
    ClientParameters, ClientPrivateParameters, ClientPublicParameters, GeneratedTokensRequest,
    MessagesSet, SchemeParameters, ServerPublicParameters, TokensResponse, TokensSet,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActError {
    #[error("Malformed ACT input: {0}")]
    InvalidInput(String),
    #[error("ACT operation failed: {0}")]
    Operation(String),
}

/// Key material for one sign round
#[derive(Debug, Clone, PartialEq)]
pub struct ActKeys {
    pub scheme: SchemeParameters,
    pub client_public: ClientPublicParameters,
    pub client_private: ClientPrivateParameters,
    pub server_public: ServerPublicParameters,
}

impl ActKeys {
    pub fn new(
        scheme: SchemeParameters,
        client: ClientParameters,
        server_public: ServerPublicParameters,
    ) -> Self {
        Self {
            scheme,
            client_public: client.public_parameters.unwrap_or_default(),
            client_private: client.private_parameters.unwrap_or_default(),
            server_public,
        }
    }
}

/// Client side of the ACT protocol. Any error fails the step that called it.
pub trait ActEngine: Send + Sync {
    fn generate_client_parameters(
        &self,
        scheme: &SchemeParameters,
        server_public: &ServerPublicParameters,
    ) -> Result<ClientParameters, ActError>;

    fn generate_tokens_request(
        &self,
        messages: &MessagesSet,
        keys: &ActKeys,
    ) -> Result<GeneratedTokensRequest, ActError>;

    fn verify_tokens_response(
        &self,
        messages: &MessagesSet,
        request: &GeneratedTokensRequest,
        response: &TokensResponse,
        keys: &ActKeys,
    ) -> Result<bool, ActError>;

    /// One token per message, in message order
    fn recover_tokens(
        &self,
        messages: &MessagesSet,
        request: &GeneratedTokensRequest,
        response: &TokensResponse,
        keys: &ActKeys,
    ) -> Result<TokensSet, ActError>;
}
