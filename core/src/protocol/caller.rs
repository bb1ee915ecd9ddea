//! Protocol caller: the sign → verify → join round for one set of messages.
//!
//! A call reloads every message from the store and keeps only the ones that
//! are still pending and unexpired. Client and server parameters are
//! bootstrapped once per call (cache reuse or fresh registration), then the
//! eligible messages are split into sign batches that run concurrently. Each
//! batch requests tokens, verifies and recovers them, marks its messages
//! `Signed` and joins every message independently through OHTTP.
//!
//! Failure handling:
//! - bootstrap, request generation and transport failures leave messages
//!   `NotProcessed` for a later run;
//! - decode, verification and recovery failures mark the whole batch `Failed`;
//! - join failures mark only the affected message `Failed`.

use async_trait::async_trait;
use futures::future::join_all;
use prost::Message;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::act::{ActEngine, ActError, ActKeys};
use super::attestation::{AttestationError, KeyAttestation};
use super::join::{build_join_request, fingerprint, join_response_status};
use super::ohttp::{ObliviousHttpEncryptor, OhttpError};
use super::stats::{
    FailureReason, GetChallengeStats, InitializeStats, JoinStats, KAnonAction, SignJoinStats,
    SignStats, StatsEmitter, StatsLogger, StepResult, TracingStatsLogger,
};
use super::transport::{
    HttpClient, HttpRequest, HttpResponse, TransportError, OHTTP_REQUEST_CONTENT_TYPE,
    PROTOBUF_CONTENT_TYPE,
};
use super::wire::{
    ClientParameters, ClientPrivateParameters, ClientPublicParameters,
    GetKeyAttestationChallengeResponse, GetServerPublicParamsResponse, GetTokensRequest,
    GetTokensResponse, GeneratedTokensRequest, MessagesSet, RegisterClientRequest,
    RegisterClientResponse, RequestMetadata, SchemeParameters, ServerPublicParameters, Token,
    TokensSet,
};
use crate::bhttp::BhttpError;
use crate::clock::Clock;
use crate::config::KAnonConfig;
use crate::message::{KAnonMessage, MessageStatus, SignJoinSource};
use crate::store::{ClientParametersRow, KAnonStores, ServerParametersRow, StoreError};
use crate::KAnonError;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FailureKind {
    #[error("Decode error: {0}")]
    Decode(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Act(#[from] ActError),
    #[error("Tokens response failed verification")]
    VerificationRejected,
    #[error("Recovered {actual} tokens for {expected} messages")]
    TokenCount { expected: usize, actual: usize },
    #[error(transparent)]
    Ohttp(#[from] OhttpError),
    #[error(transparent)]
    Bhttp(#[from] BhttpError),
    #[error("Join body encoding failed: {0}")]
    Encoding(String),
    #[error("Server parameters no longer accept joins")]
    JoinWindowClosed,
    #[error("Join rejected with status {0}")]
    JoinRejected(u16),
    #[error(transparent)]
    Attestation(#[from] AttestationError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Blocking task failed: {0}")]
    Task(String),
}

impl FailureKind {
    pub fn reason(&self) -> FailureReason {
        match self {
            FailureKind::Decode(_) | FailureKind::Bhttp(_) => FailureReason::ProtoParse,
            FailureKind::Transport(e) if e.is_server_error() => FailureReason::Server,
            FailureKind::Transport(_) => FailureReason::Network,
            FailureKind::JoinRejected(code) if *code >= 500 => FailureReason::Server,
            FailureKind::JoinRejected(_) => FailureReason::Network,
            _ => FailureReason::Internal,
        }
    }
}

/// A failed step and the action that was running
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{action:?} failed: {kind}")]
pub struct SignJoinError {
    pub action: KAnonAction,
    pub kind: FailureKind,
}

impl SignJoinError {
    pub fn new(action: KAnonAction, kind: impl Into<FailureKind>) -> Self {
        Self {
            action,
            kind: kind.into(),
        }
    }

    fn decode(action: KAnonAction, err: impl std::fmt::Display) -> Self {
        Self::new(action, FailureKind::Decode(err.to_string()))
    }

    pub fn reason(&self) -> FailureReason {
        self.kind.reason()
    }

    fn step_result(&self) -> StepResult {
        StepResult::Failure {
            action: self.action,
            reason: self.reason(),
        }
    }
}

fn step_result<T>(result: &Result<T, SignJoinError>) -> StepResult {
    match result {
        Ok(_) => StepResult::Success,
        Err(e) => e.step_result(),
    }
}

fn into_kanon_error(kind: FailureKind) -> KAnonError {
    match kind {
        FailureKind::Store(e) => KAnonError::Store(e),
        other => KAnonError::Task(other.to_string()),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// CALLER
// ============================================================================

/// Final state of the messages handed to one call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignJoinOutcome {
    pub requested: usize,
    pub eligible: usize,
    pub joined: usize,
    pub failed: usize,
    /// Still pending; picked up by a later run
    pub not_processed: usize,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KAnonCaller: Send + Sync {
    async fn sign_and_join_messages(
        &self,
        messages: Vec<KAnonMessage>,
        source: SignJoinSource,
    ) -> Result<SignJoinOutcome, KAnonError>;
}

/// Parameters shared by every batch of one call
#[derive(Debug, Clone)]
struct Session {
    keys: ActKeys,
    client_params_version: String,
    client_params_expiry: u64,
    server_join_expiry: u64,
    request_metadata: RequestMetadata,
}

pub struct KAnonCallerImpl {
    config: KAnonConfig,
    stores: KAnonStores,
    act: Arc<dyn ActEngine>,
    http: Arc<dyn HttpClient>,
    ohttp: Arc<dyn ObliviousHttpEncryptor>,
    attestation: Option<Arc<dyn KeyAttestation>>,
    clock: Arc<dyn Clock>,
    scheme: SchemeParameters,
    stats: StatsEmitter,
}

pub struct KAnonCallerBuilder {
    config: KAnonConfig,
    stores: Option<KAnonStores>,
    act: Option<Arc<dyn ActEngine>>,
    http: Option<Arc<dyn HttpClient>>,
    ohttp: Option<Arc<dyn ObliviousHttpEncryptor>>,
    attestation: Option<Arc<dyn KeyAttestation>>,
    clock: Option<Arc<dyn Clock>>,
    stats_logger: Option<Arc<dyn StatsLogger>>,
    scheme: Option<SchemeParameters>,
}

impl KAnonCallerBuilder {
    pub fn new(config: KAnonConfig) -> Self {
        Self {
            config,
            stores: None,
            act: None,
            http: None,
            ohttp: None,
            attestation: None,
            clock: None,
            stats_logger: None,
            scheme: None,
        }
    }

    pub fn stores(mut self, stores: KAnonStores) -> Self {
        self.stores = Some(stores);
        self
    }

    pub fn act_engine(mut self, act: Arc<dyn ActEngine>) -> Self {
        self.act = Some(act);
        self
    }

    pub fn http_client(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = Some(http);
        self
    }

    pub fn ohttp(mut self, ohttp: Arc<dyn ObliviousHttpEncryptor>) -> Self {
        self.ohttp = Some(ohttp);
        self
    }

    pub fn key_attestation(mut self, attestation: Arc<dyn KeyAttestation>) -> Self {
        self.attestation = Some(attestation);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn stats_logger(mut self, logger: Arc<dyn StatsLogger>) -> Self {
        self.stats_logger = Some(logger);
        self
    }

    pub fn scheme_parameters(mut self, scheme: SchemeParameters) -> Self {
        self.scheme = Some(scheme);
        self
    }

    pub fn build(self) -> Result<KAnonCallerImpl, KAnonError> {
        self.config.validate()?;
        if self.config.key_attestation_enabled && self.attestation.is_none() {
            return Err(missing("key attestation"));
        }
        let logger = self
            .stats_logger
            .unwrap_or_else(|| Arc::new(TracingStatsLogger));
        Ok(KAnonCallerImpl {
            stats: StatsEmitter::new(logger, self.config.logging_enabled),
            stores: self.stores.ok_or_else(|| missing("stores"))?,
            act: self.act.ok_or_else(|| missing("ACT engine"))?,
            http: self.http.ok_or_else(|| missing("HTTP client"))?,
            ohttp: self.ohttp.ok_or_else(|| missing("OHTTP encryptor"))?,
            clock: self.clock.ok_or_else(|| missing("clock"))?,
            attestation: self.attestation,
            scheme: self.scheme.unwrap_or_default(),
            config: self.config,
        })
    }
}

fn missing(what: &str) -> KAnonError {
    KAnonError::InvalidArgument(format!("missing collaborator: {}", what))
}

#[async_trait]
impl KAnonCaller for KAnonCallerImpl {
    async fn sign_and_join_messages(
        &self,
        messages: Vec<KAnonMessage>,
        source: SignJoinSource,
    ) -> Result<SignJoinOutcome, KAnonError> {
        if messages.is_empty() {
            return Err(KAnonError::InvalidArgument(
                "no messages to sign and join".to_string(),
            ));
        }
        let started = Instant::now();
        let requested = messages.len();

        let result = self.run(messages).await;
        let outcome = match &result {
            Ok(outcome) => *outcome,
            Err(_) => SignJoinOutcome {
                requested,
                not_processed: requested,
                ..Default::default()
            },
        };

        self.stats.sign_join(&SignJoinStats {
            source,
            total_messages: requested,
            eligible_messages: outcome.eligible,
            joined: outcome.joined,
            failed: outcome.failed,
            not_processed: outcome.not_processed,
            latency_ms: elapsed_ms(started),
        });
        info!(
            "{} sign-join: {} requested, {} eligible, {} joined, {} failed",
            source, requested, outcome.eligible, outcome.joined, outcome.failed
        );
        result
    }
}

impl KAnonCallerImpl {
    pub fn builder(config: KAnonConfig) -> KAnonCallerBuilder {
        KAnonCallerBuilder::new(config)
    }

    async fn run(&self, messages: Vec<KAnonMessage>) -> Result<SignJoinOutcome, KAnonError> {
        let requested = messages.len();
        let eligible = self.reload_eligible(messages).await?;
        let mut outcome = SignJoinOutcome {
            requested,
            eligible: eligible.len(),
            not_processed: eligible.len(),
            ..Default::default()
        };
        if eligible.is_empty() {
            debug!("Nothing eligible among {} messages", requested);
            return Ok(outcome);
        }

        let session = match self.bootstrap().await {
            Ok(session) => session,
            Err(e) => {
                warn!("Parameter bootstrap failed, {} messages left pending: {}", eligible.len(), e);
                return Ok(outcome);
            }
        };

        let batch_size = self.config.sign_batch_size.max(1);
        let batches = eligible
            .chunks(batch_size)
            .map(|batch| self.process_batch(&session, batch));
        join_all(batches).await;

        let ids: Vec<u64> = eligible.iter().map(|m| m.id).collect();
        match self.blocking(move |stores| stores.messages.get_many(&ids)).await {
            Ok(finals) => {
                outcome.joined = count(&finals, MessageStatus::Joined);
                outcome.failed = count(&finals, MessageStatus::Failed);
                outcome.not_processed = outcome.eligible - outcome.joined - outcome.failed;
            }
            Err(kind) => warn!("Could not tally final statuses: {}", kind),
        }
        Ok(outcome)
    }

    /// Current stored state of the requested messages, minus terminal,
    /// expired and unknown ones.
    async fn reload_eligible(
        &self,
        messages: Vec<KAnonMessage>,
    ) -> Result<Vec<KAnonMessage>, KAnonError> {
        let mut seen = HashSet::new();
        let ids: Vec<u64> = messages
            .iter()
            .map(|m| m.id)
            .filter(|id| seen.insert(*id))
            .collect();
        let now = self.clock.now();
        let stored = self
            .blocking(move |stores| stores.messages.get_many(&ids))
            .await
            .map_err(into_kanon_error)?;
        Ok(stored
            .into_iter()
            .filter(|m| !m.status.is_terminal() && !m.is_expired(now))
            .collect())
    }

    async fn blocking<T, F>(&self, work: F) -> Result<T, FailureKind>
    where
        T: Send + 'static,
        F: FnOnce(&KAnonStores) -> Result<T, StoreError> + Send + 'static,
    {
        let stores = self.stores.clone();
        tokio::task::spawn_blocking(move || work(&stores))
            .await
            .map_err(|e| FailureKind::Task(e.to_string()))?
            .map_err(FailureKind::Store)
    }

    async fn exchange(
        &self,
        request: HttpRequest,
        action: KAnonAction,
    ) -> Result<Vec<u8>, SignJoinError> {
        self.http
            .perform(request)
            .await
            .and_then(HttpResponse::into_success)
            .map(|response| response.body)
            .map_err(|e| SignJoinError::new(action, e))
    }

    // ------------------------------------------------------------------------
    // Bootstrap
    // ------------------------------------------------------------------------

    async fn bootstrap(&self) -> Result<Session, SignJoinError> {
        let started = Instant::now();
        let result = self.load_or_register().await;
        self.stats.initialize(&InitializeStats {
            result: step_result(&result),
            registered: !matches!(result, Ok((_, false))),
            latency_ms: elapsed_ms(started),
        });
        result.map(|(session, _)| session)
    }

    /// Reuse cached parameters owned by this profile, or register new ones.
    /// The flag is true when a registration happened.
    async fn load_or_register(&self) -> Result<(Session, bool), SignJoinError> {
        let now = self.clock.now();
        let (profile_id, clients, servers) = self
            .blocking(move |stores| {
                let profile_id = stores.profile.get_or_create()?;
                let clients = stores.params.active_client_parameters(now)?;
                let servers = stores.params.active_server_parameters_for_sign(now)?;
                Ok((profile_id, clients, servers))
            })
            .await
            .map_err(|kind| SignJoinError::new(KAnonAction::Storage, kind))?;

        let owned = clients.into_iter().find(|row| row.client_id == profile_id);
        let server = servers.into_iter().next();
        match (owned, server) {
            (Some(client), Some(server)) => {
                debug!("Reusing client parameters {}", client.version);
                Ok((self.cached_session(&profile_id, &client, &server)?, false))
            }
            (_, server) => Ok((self.register(profile_id, server, now).await?, true)),
        }
    }

    fn cached_session(
        &self,
        profile_id: &Uuid,
        client: &ClientParametersRow,
        server: &ServerParametersRow,
    ) -> Result<Session, SignJoinError> {
        let decode_error = |e: prost::DecodeError| SignJoinError::decode(KAnonAction::Storage, e);
        let client_params = ClientParameters {
            public_parameters: Some(
                ClientPublicParameters::decode(client.public_parameters.as_slice())
                    .map_err(decode_error)?,
            ),
            private_parameters: Some(
                ClientPrivateParameters::decode(client.private_parameters.as_slice())
                    .map_err(decode_error)?,
            ),
        };
        let server_public =
            ServerPublicParameters::decode(server.public_parameters.as_slice())
                .map_err(decode_error)?;
        Ok(Session {
            keys: ActKeys::new(self.scheme.clone(), client_params, server_public),
            client_params_version: client.version.clone(),
            client_params_expiry: client.expiry_at,
            server_join_expiry: server.join_expiry_at,
            request_metadata: RequestMetadata::for_client(&profile_id.to_string()),
        })
    }

    async fn register(
        &self,
        profile_id: Uuid,
        cached_server: Option<ServerParametersRow>,
        now: u64,
    ) -> Result<Session, SignJoinError> {
        let (server_row, server_public, fresh_server) = match cached_server {
            Some(row) => {
                let public = ServerPublicParameters::decode(row.public_parameters.as_slice())
                    .map_err(|e| SignJoinError::decode(KAnonAction::Storage, e))?;
                (row, public, false)
            }
            None => {
                let (row, public) = self.fetch_server_parameters(now).await?;
                (row, public, true)
            }
        };

        let client = self
            .act
            .generate_client_parameters(&self.scheme, &server_public)
            .map_err(|e| SignJoinError::new(KAnonAction::GenerateClientParamAct, e))?;

        let client_id = profile_id.to_string();
        let request_metadata = self.request_metadata(&client_id).await;
        let request = RegisterClientRequest {
            client_public_params: client.public_parameters.clone(),
            request_metadata: Some(request_metadata.clone()),
            server_params_version: server_row.version.clone(),
        };
        let body = self
            .exchange(
                HttpRequest::post(
                    &self.config.register_client_params_url,
                    PROTOBUF_CONTENT_TYPE,
                    request.encode_to_vec(),
                ),
                KAnonAction::RegisterClientHttpCall,
            )
            .await?;
        let registered = RegisterClientResponse::decode(body.as_slice()).map_err(|e| {
            SignJoinError::decode(KAnonAction::RegisterClientResponseProtoComposition, e)
        })?;

        let client_params_expiry = u64::try_from(registered.client_params_expiry_secs)
            .ok()
            .filter(|expiry| *expiry > now)
            .unwrap_or_else(|| now.saturating_add(self.config.client_params_ttl_secs));

        let client_row = ClientParametersRow {
            id: 0,
            version: registered.client_params_version.clone(),
            public_parameters: client
                .public_parameters
                .clone()
                .unwrap_or_default()
                .encode_to_vec(),
            private_parameters: client
                .private_parameters
                .clone()
                .unwrap_or_default()
                .encode_to_vec(),
            client_id: profile_id,
            created_at: now,
            expiry_at: client_params_expiry,
        };
        let new_server_row = fresh_server.then(|| server_row.clone());
        self.blocking(move |stores| {
            if let Some(row) = new_server_row {
                stores.params.insert_server_parameters(row)?;
            }
            stores.params.insert_client_parameters(client_row)?;
            Ok(())
        })
        .await
        .map_err(|kind| SignJoinError::new(KAnonAction::Storage, kind))?;
        info!(
            "Registered client parameters {} against server parameters {}",
            registered.client_params_version, server_row.version
        );

        Ok(Session {
            keys: ActKeys::new(self.scheme.clone(), client, server_public),
            client_params_version: registered.client_params_version,
            client_params_expiry,
            server_join_expiry: server_row.join_expiry_at,
            request_metadata,
        })
    }

    async fn fetch_server_parameters(
        &self,
        now: u64,
    ) -> Result<(ServerParametersRow, ServerPublicParameters), SignJoinError> {
        let body = self
            .exchange(
                HttpRequest::get(&self.config.fetch_server_params_url, PROTOBUF_CONTENT_TYPE),
                KAnonAction::ServerParamHttpCall,
            )
            .await?;
        let action = KAnonAction::ServerPublicParamsProtoComposition;
        let response = GetServerPublicParamsResponse::decode(body.as_slice())
            .map_err(|e| SignJoinError::decode(action, e))?;
        let public = response
            .server_public_params
            .ok_or_else(|| SignJoinError::decode(action, "missing server_public_params"))?;
        let row = ServerParametersRow {
            id: 0,
            version: response.server_params_version,
            public_parameters: public.encode_to_vec(),
            created_at: now,
            sign_expiry_at: now.saturating_add(self.config.server_params_sign_ttl_secs),
            join_expiry_at: now.saturating_add(self.config.server_params_join_ttl_secs),
        };
        Ok((row, public))
    }

    /// Attested metadata when possible, bare client id otherwise
    async fn request_metadata(&self, client_id: &str) -> RequestMetadata {
        let attestation = match &self.attestation {
            Some(attestation) if self.config.key_attestation_enabled => attestation.clone(),
            _ => return RequestMetadata::for_client(client_id),
        };

        let started = Instant::now();
        let result = self.attestation_record(attestation.as_ref()).await;
        self.stats.get_challenge(&GetChallengeStats {
            result: step_result(&result),
            certificate_size_bytes: result.as_ref().map(Vec::len).unwrap_or(0),
            latency_ms: elapsed_ms(started),
        });
        match result {
            Ok(chain) => RequestMetadata::attested(client_id, chain),
            Err(e) => {
                warn!("Registering without key attestation: {}", e);
                RequestMetadata::for_client(client_id)
            }
        }
    }

    async fn attestation_record(
        &self,
        attestation: &dyn KeyAttestation,
    ) -> Result<Vec<u8>, SignJoinError> {
        let body = self
            .exchange(
                HttpRequest::get(&self.config.get_challenge_url, PROTOBUF_CONTENT_TYPE),
                KAnonAction::GetChallengeHttpCall,
            )
            .await?;
        let challenge = GetKeyAttestationChallengeResponse::decode(body.as_slice())
            .map_err(|e| SignJoinError::decode(KAnonAction::GetChallengeHttpCall, e))?;
        attestation
            .generate_attestation_record(&challenge.attestation_challenge)
            .map_err(|e| SignJoinError::new(KAnonAction::KeyAttestationRecord, e))
    }

    // ------------------------------------------------------------------------
    // Sign
    // ------------------------------------------------------------------------

    async fn process_batch(&self, session: &Session, batch: &[KAnonMessage]) {
        let started = Instant::now();
        let signed = self.sign_batch(session, batch).await;
        self.stats.sign(&SignStats {
            result: step_result(&signed),
            batch_size: batch.len(),
            latency_ms: elapsed_ms(started),
        });
        let tokens = match signed {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!("Sign round for {} messages failed: {}", batch.len(), e);
                return;
            }
        };

        let joins = batch
            .iter()
            .zip(tokens.tokens.iter())
            .map(|(message, token)| self.join_message(session, message, token));
        join_all(joins).await;
    }

    async fn sign_batch(
        &self,
        session: &Session,
        batch: &[KAnonMessage],
    ) -> Result<TokensSet, SignJoinError> {
        let ids: Vec<u64> = batch.iter().map(|m| m.id).collect();
        let messages_set = MessagesSet {
            message: batch
                .iter()
                .map(|m| fingerprint(&self.config.set_type, &m.hash_set))
                .collect(),
        };
        let generated = self
            .act
            .generate_tokens_request(&messages_set, &session.keys)
            .map_err(|e| SignJoinError::new(KAnonAction::GenerateTokensRequestAct, e))?;

        let request = GetTokensRequest {
            request_metadata: Some(session.request_metadata.clone()),
            client_params_version: session.client_params_version.clone(),
            tokens_request: generated.tokens_request.clone(),
            client_fingerprints_bytes: generated.fingerprints_bytes.clone(),
        };
        let body = self
            .exchange(
                HttpRequest::post(
                    &self.config.get_tokens_url,
                    PROTOBUF_CONTENT_TYPE,
                    request.encode_to_vec(),
                ),
                KAnonAction::GetTokensRequestHttpCall,
            )
            .await?;

        // Past this point the server has seen the request; failures are final
        match self.recover_tokens(session, &messages_set, &generated, &body) {
            Ok(tokens) => {
                let expiry = session.client_params_expiry;
                self.blocking(move |stores| {
                    stores
                        .messages
                        .update_status_for_generation(&ids, MessageStatus::Signed, expiry)
                })
                .await
                .map_err(|kind| SignJoinError::new(KAnonAction::Storage, kind))?;
                Ok(tokens)
            }
            Err(e) => {
                if let Err(kind) = self
                    .blocking(move |stores| stores.messages.update_status(&ids, MessageStatus::Failed))
                    .await
                {
                    warn!("Could not mark sign batch failed: {}", kind);
                }
                Err(e)
            }
        }
    }

    fn recover_tokens(
        &self,
        session: &Session,
        messages_set: &MessagesSet,
        generated: &GeneratedTokensRequest,
        body: &[u8],
    ) -> Result<TokensSet, SignJoinError> {
        let action = KAnonAction::GetTokensResponseProtoComposition;
        let response = GetTokensResponse::decode(body)
            .map_err(|e| SignJoinError::decode(action, e))?
            .tokens_response
            .ok_or_else(|| SignJoinError::decode(action, "missing tokens_response"))?;

        let verified = self
            .act
            .verify_tokens_response(messages_set, generated, &response, &session.keys)
            .map_err(|e| SignJoinError::new(KAnonAction::VerifyTokensResponseAct, e))?;
        if !verified {
            return Err(SignJoinError::new(
                KAnonAction::VerifyTokensResponseAct,
                FailureKind::VerificationRejected,
            ));
        }

        let tokens = self
            .act
            .recover_tokens(messages_set, generated, &response, &session.keys)
            .map_err(|e| SignJoinError::new(KAnonAction::RecoverTokensAct, e))?;
        if tokens.tokens.len() != messages_set.message.len() {
            return Err(SignJoinError::new(
                KAnonAction::RecoverTokensAct,
                FailureKind::TokenCount {
                    expected: messages_set.message.len(),
                    actual: tokens.tokens.len(),
                },
            ));
        }
        Ok(tokens)
    }

    // ------------------------------------------------------------------------
    // Join
    // ------------------------------------------------------------------------

    async fn join_message(&self, session: &Session, message: &KAnonMessage, token: &Token) {
        let started = Instant::now();
        let result = self.join(session, message, token).await;
        let status = match &result {
            Ok(()) => MessageStatus::Joined,
            Err(e) => {
                warn!("Join for message {} failed: {}", message.id, e);
                MessageStatus::Failed
            }
        };
        let id = message.id;
        if let Err(kind) = self
            .blocking(move |stores| stores.messages.update_status(&[id], status))
            .await
        {
            warn!("Could not record join status for message {}: {}", id, kind);
        }
        self.stats.join(&JoinStats {
            result: step_result(&result),
            latency_ms: elapsed_ms(started),
        });
    }

    async fn join(
        &self,
        session: &Session,
        message: &KAnonMessage,
        token: &Token,
    ) -> Result<(), SignJoinError> {
        let now = self.clock.now();
        if now >= session.server_join_expiry {
            return Err(SignJoinError::new(
                KAnonAction::ServerParamsJoinWindow,
                FailureKind::JoinWindowClosed,
            ));
        }

        let request = build_join_request(
            &self.config.join_authority,
            &self.config.set_type,
            &message.hash_set,
            token,
            now,
        )
        .map_err(|e| {
            SignJoinError::new(KAnonAction::BinaryHttpRequest, FailureKind::Encoding(e.to_string()))
        })?;
        let plaintext = request
            .serialize()
            .map_err(|e| SignJoinError::new(KAnonAction::BinaryHttpRequest, e))?;

        let ciphertext = self
            .ohttp
            .encrypt(plaintext, message.id)
            .await
            .map_err(|e| SignJoinError::new(KAnonAction::OhttpEncrypt, e))?;
        let body = self
            .exchange(
                HttpRequest::post(&self.config.join_url, OHTTP_REQUEST_CONTENT_TYPE, ciphertext),
                KAnonAction::JoinHttpCall,
            )
            .await?;
        let response = self
            .ohttp
            .decrypt(&body, message.id)
            .map_err(|e| SignJoinError::new(KAnonAction::OhttpDecrypt, e))?;

        let status = join_response_status(&response)
            .map_err(|e| SignJoinError::new(KAnonAction::BinaryHttpResponse, e))?;
        if !(200..300).contains(&status) {
            return Err(SignJoinError::new(
                KAnonAction::BinaryHttpResponse,
                FailureKind::JoinRejected(status),
            ));
        }
        debug!("Joined message {} ({})", message.id, message.hash_set);
        Ok(())
    }
}

fn count(messages: &[KAnonMessage], status: MessageStatus) -> usize {
    messages.iter().filter(|m| m.status == status).count()
}
