//! Shared fakes for the integration tests: a scripted sign/join server, a
//! deterministic ACT engine, a passthrough OHTTP layer and a manual clock.
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use prost::Message;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use kanon_core::bhttp::{BinaryHttpMessage, Fields, ResponseControlData};
use kanon_core::protocol::wire::{
    ClientParameters, ClientPrivateParameters, ClientPublicParameters, GeneratedTokensRequest,
    GetServerPublicParamsResponse, GetTokensResponse, MessagesSet, RegisterClientResponse,
    SchemeParameters, ServerPublicParameters, Token, TokenV0, TokensRequest, TokensResponse,
    TokensSet,
};
use kanon_core::protocol::{
    ActEngine, ActError, ActKeys, HttpClient, HttpRequest, HttpResponse, InitializeStats,
    JoinStats, ObliviousHttpEncryptor, OhttpError, SignJoinStats, StatsError, StatsLogger,
    TransportError,
};
use kanon_core::signjoin::RandomSource;
use kanon_core::{
    Clock, KAnonCallerImpl, KAnonConfig, KAnonMessage, KAnonStores, MessageStatus,
};

pub const START: u64 = 1_700_000_000;

pub const PARAMS_URL: &str = "https://sign.example/v1/serverParams";
pub const REGISTER_URL: &str = "https://sign.example/v1/registerClient";
pub const TOKENS_URL: &str = "https://sign.example/v1/getTokens";
pub const CHALLENGE_URL: &str = "https://sign.example/v1/challenge";
pub const JOIN_URL: &str = "https://relay.example/ohttp";
pub const JOIN_AUTHORITY: &str = "join.example";

pub fn test_config() -> KAnonConfig {
    KAnonConfig {
        enabled: true,
        percentage_immediate_sign_join_calls: 0,
        join_authority: JOIN_AUTHORITY.to_string(),
        fetch_server_params_url: PARAMS_URL.to_string(),
        register_client_params_url: REGISTER_URL.to_string(),
        get_tokens_url: TOKENS_URL.to_string(),
        join_url: JOIN_URL.to_string(),
        get_challenge_url: CHALLENGE_URL.to_string(),
        logging_enabled: true,
        ..KAnonConfig::default()
    }
}

// ============================================================================
// CLOCK & RANDOMNESS
// ============================================================================

pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(now: u64) -> Self {
        Self {
            now: AtomicU64::new(now),
        }
    }

    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

pub struct FixedRandom(pub u8);

impl RandomSource for FixedRandom {
    fn next_percent(&self) -> u8 {
        self.0
    }
}

// ============================================================================
// ACT ENGINE
// ============================================================================

/// Tokens echo the fingerprint they were issued for.
#[derive(Default)]
pub struct FakeActEngine {
    /// Fingerprints whose batch fails verification
    rejected: Mutex<HashSet<String>>,
    verify_error: AtomicBool,
    short_recovery: AtomicBool,
    client_parameters_generated: AtomicUsize,
}

impl FakeActEngine {
    pub fn reject(&self, fingerprint: &str) {
        self.rejected.lock().insert(fingerprint.to_string());
    }

    pub fn fail_verification(&self) {
        self.verify_error.store(true, Ordering::SeqCst);
    }

    pub fn recover_one_token_short(&self) {
        self.short_recovery.store(true, Ordering::SeqCst);
    }

    pub fn client_parameters_generated(&self) -> usize {
        self.client_parameters_generated.load(Ordering::SeqCst)
    }
}

impl ActEngine for FakeActEngine {
    fn generate_client_parameters(
        &self,
        _scheme: &SchemeParameters,
        server_public: &ServerPublicParameters,
    ) -> Result<ClientParameters, ActError> {
        if server_public.payload.is_empty() {
            return Err(ActError::InvalidInput("empty server parameters".into()));
        }
        self.client_parameters_generated.fetch_add(1, Ordering::SeqCst);
        Ok(ClientParameters {
            public_parameters: Some(ClientPublicParameters {
                payload: b"client-public".to_vec(),
            }),
            private_parameters: Some(ClientPrivateParameters {
                payload: b"client-private".to_vec(),
            }),
        })
    }

    fn generate_tokens_request(
        &self,
        messages: &MessagesSet,
        keys: &ActKeys,
    ) -> Result<GeneratedTokensRequest, ActError> {
        if keys.client_private.payload.is_empty() {
            return Err(ActError::InvalidInput("missing client private parameters".into()));
        }
        Ok(GeneratedTokensRequest {
            tokens_request: Some(TokensRequest {
                payload: messages.message.join(",").into_bytes(),
            }),
            tokens_request_private_state: None,
            fingerprints_bytes: messages
                .message
                .iter()
                .map(|m| m.as_bytes().to_vec())
                .collect(),
        })
    }

    fn verify_tokens_response(
        &self,
        messages: &MessagesSet,
        _request: &GeneratedTokensRequest,
        _response: &TokensResponse,
        _keys: &ActKeys,
    ) -> Result<bool, ActError> {
        if self.verify_error.load(Ordering::SeqCst) {
            return Err(ActError::Operation("verification crashed".into()));
        }
        let rejected = self.rejected.lock();
        Ok(!messages.message.iter().any(|m| rejected.contains(m)))
    }

    fn recover_tokens(
        &self,
        messages: &MessagesSet,
        _request: &GeneratedTokensRequest,
        _response: &TokensResponse,
        _keys: &ActKeys,
    ) -> Result<TokensSet, ActError> {
        let mut tokens: Vec<Token> = messages
            .message
            .iter()
            .map(|m| Token {
                nonce_bytes: m.as_bytes().to_vec(),
                token_v0: Some(TokenV0 {
                    bb_signature: b"signature".to_vec(),
                }),
            })
            .collect();
        if self.short_recovery.load(Ordering::SeqCst) {
            tokens.pop();
        }
        Ok(TokensSet { tokens })
    }
}

// ============================================================================
// SERVER
// ============================================================================

/// Answers every endpoint the engine talks to and records each request.
#[derive(Default)]
pub struct ScriptedHttp {
    requests: Mutex<Vec<HttpRequest>>,
    failures: Mutex<HashMap<String, TransportError>>,
    overrides: Mutex<HashMap<String, Vec<u8>>>,
    join_status: Mutex<HashMap<String, u16>>,
    join_headers: Mutex<HashMap<String, Fields>>,
}

impl ScriptedHttp {
    pub fn fail(&self, url: &str, error: TransportError) {
        self.failures.lock().insert(url.to_string(), error);
    }

    pub fn respond_with(&self, url: &str, body: Vec<u8>) {
        self.overrides.lock().insert(url.to_string(), body);
    }

    /// Inner BHTTP status returned for joins of `hash_set`
    pub fn set_join_status(&self, hash_set: &str, status: u16) {
        self.join_status.lock().insert(hash_set.to_string(), status);
    }

    /// Header fields on the inner BHTTP response for joins of `hash_set`
    pub fn set_join_headers(&self, hash_set: &str, headers: Fields) {
        self.join_headers.lock().insert(hash_set.to_string(), headers);
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    pub fn count(&self, url: &str) -> usize {
        self.requests.lock().iter().filter(|r| r.url == url).count()
    }

    pub fn total(&self) -> usize {
        self.requests.lock().len()
    }

    fn join_response(&self, body: &[u8]) -> Result<HttpResponse, TransportError> {
        let request =
            BinaryHttpMessage::deserialize(body).map_err(|_| TransportError::Status(400))?;
        let path = request
            .request_control()
            .map(|control| control.path.clone())
            .unwrap_or_default();
        let hash_set = path
            .trim_start_matches("/v2/types/fledge/sets/")
            .trim_end_matches(":join")
            .to_string();
        let status = self.join_status.lock().get(&hash_set).copied().unwrap_or(200);
        let headers = self
            .join_headers
            .lock()
            .get(&hash_set)
            .cloned()
            .unwrap_or_default();
        let response =
            BinaryHttpMessage::known_length_response(ResponseControlData::new(status).unwrap())
                .with_header_fields(headers);
        Ok(HttpResponse::ok(response.serialize().unwrap()))
    }
}

#[async_trait]
impl HttpClient for ScriptedHttp {
    async fn perform(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().push(request.clone());
        if let Some(error) = self.failures.lock().get(&request.url) {
            return Err(error.clone());
        }
        if let Some(body) = self.overrides.lock().get(&request.url) {
            return Ok(HttpResponse::ok(body.clone()));
        }
        match request.url.as_str() {
            PARAMS_URL => Ok(HttpResponse::ok(
                GetServerPublicParamsResponse {
                    server_params_version: "server-v1".to_string(),
                    server_public_params: Some(ServerPublicParameters {
                        payload: b"server-public".to_vec(),
                    }),
                }
                .encode_to_vec(),
            )),
            REGISTER_URL => Ok(HttpResponse::ok(
                RegisterClientResponse {
                    client_params_version: "client-v1".to_string(),
                    client_params_expiry_secs: 0,
                }
                .encode_to_vec(),
            )),
            TOKENS_URL => Ok(HttpResponse::ok(
                GetTokensResponse {
                    tokens_response: Some(TokensResponse {
                        payload: b"tokens".to_vec(),
                    }),
                }
                .encode_to_vec(),
            )),
            JOIN_URL => self.join_response(&request.body),
            _ => Err(TransportError::Status(404)),
        }
    }
}

// ============================================================================
// OHTTP & STATS
// ============================================================================

/// Leaves payloads untouched; remembers which contexts were opened.
#[derive(Default)]
pub struct PassthroughOhttp {
    contexts: Mutex<Vec<u64>>,
}

impl PassthroughOhttp {
    pub fn contexts(&self) -> Vec<u64> {
        self.contexts.lock().clone()
    }
}

#[async_trait]
impl ObliviousHttpEncryptor for PassthroughOhttp {
    async fn encrypt(&self, plaintext: Vec<u8>, context_id: u64) -> Result<Vec<u8>, OhttpError> {
        self.contexts.lock().push(context_id);
        Ok(plaintext)
    }

    fn decrypt(&self, ciphertext: &[u8], context_id: u64) -> Result<Vec<u8>, OhttpError> {
        if !self.contexts.lock().contains(&context_id) {
            return Err(OhttpError::UnknownContext(context_id));
        }
        Ok(ciphertext.to_vec())
    }
}

#[derive(Default)]
pub struct RecordingStats {
    pub sign_join: Mutex<Vec<SignJoinStats>>,
    pub initialize: Mutex<Vec<InitializeStats>>,
    pub joins: Mutex<Vec<JoinStats>>,
}

impl StatsLogger for RecordingStats {
    fn log_sign_join_status(&self, stats: &SignJoinStats) -> Result<(), StatsError> {
        self.sign_join.lock().push(stats.clone());
        Ok(())
    }

    fn log_initialize(&self, stats: &InitializeStats) -> Result<(), StatsError> {
        self.initialize.lock().push(stats.clone());
        Ok(())
    }

    fn log_join(&self, stats: &JoinStats) -> Result<(), StatsError> {
        self.joins.lock().push(stats.clone());
        Ok(())
    }
}

// ============================================================================
// HARNESS
// ============================================================================

pub struct Harness {
    pub config: KAnonConfig,
    pub clock: Arc<ManualClock>,
    pub stores: KAnonStores,
    pub act: Arc<FakeActEngine>,
    pub http: Arc<ScriptedHttp>,
    pub ohttp: Arc<PassthroughOhttp>,
    pub stats: Arc<RecordingStats>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: KAnonConfig) -> Self {
        let clock = Arc::new(ManualClock::new(START));
        let stores = KAnonStores::in_memory(clock.clone());
        Self::with_stores(config, clock, stores)
    }

    pub fn with_stores(config: KAnonConfig, clock: Arc<ManualClock>, stores: KAnonStores) -> Self {
        Self {
            config,
            clock,
            stores,
            act: Arc::new(FakeActEngine::default()),
            http: Arc::new(ScriptedHttp::default()),
            ohttp: Arc::new(PassthroughOhttp::default()),
            stats: Arc::new(RecordingStats::default()),
        }
    }

    pub fn caller(&self) -> Arc<KAnonCallerImpl> {
        let caller = KAnonCallerImpl::builder(self.config.clone())
            .stores(self.stores.clone())
            .act_engine(self.act.clone())
            .http_client(self.http.clone())
            .ohttp(self.ohttp.clone())
            .clock(self.clock.clone())
            .stats_logger(self.stats.clone())
            .build()
            .unwrap();
        Arc::new(caller)
    }

    /// Insert one pending message per hash set, valid for a day
    pub fn seed(&self, hash_sets: &[&str]) -> Vec<KAnonMessage> {
        let now = self.clock.now();
        let messages = hash_sets
            .iter()
            .enumerate()
            .map(|(i, hash_set)| KAnonMessage::new(hash_set, i as u64, now, now + 86_400))
            .collect();
        self.stores.messages.insert_all(messages).unwrap()
    }

    pub fn status(&self, id: u64) -> MessageStatus {
        self.stores.messages.get(id).unwrap().unwrap().status
    }

    pub fn statuses(&self, messages: &[KAnonMessage]) -> Vec<MessageStatus> {
        messages.iter().map(|m| self.status(m.id)).collect()
    }
}
