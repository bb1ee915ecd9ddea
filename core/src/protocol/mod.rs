// Protocol module — sign/verify/join orchestration and the ports it drives

pub mod act;
pub mod attestation;
pub mod caller;
pub mod join;
pub mod ohttp;
pub mod stats;
pub mod transport;
pub mod wire;

pub use act::{ActEngine, ActError, ActKeys};
pub use attestation::{AttestationError, KeyAttestation};
pub use caller::{
    FailureKind, KAnonCaller, KAnonCallerBuilder, KAnonCallerImpl, SignJoinError,
    SignJoinOutcome,
};
pub use ohttp::{ObliviousHttpEncryptor, OhttpError};
pub use stats::{
    FailureReason, GetChallengeStats, InitializeStats, JoinStats, KAnonAction, SignJoinStats,
    SignStats, StatsError, StatsLogger, StepResult, TracingStatsLogger,
};
pub use transport::{
    HttpClient, HttpMethod, HttpRequest, HttpResponse, TransportError, UreqHttpClient,
    OHTTP_REQUEST_CONTENT_TYPE, PROTOBUF_CONTENT_TYPE,
};
