// Sign-join module — routing of new messages, background runs and their trigger

pub mod manager;
pub mod runner;
pub mod scheduler;

pub use manager::{NewMessagesOutcome, RandomSource, SignJoinManager, ThreadRandom};
pub use runner::{BackgroundJob, BackgroundRunOutcome, BackgroundRunner};
pub use scheduler::BackgroundScheduler;

use crate::store::StoreError;
use crate::KAnonError;

/// Run store work on tokio's blocking pool
pub(crate) async fn blocking<T, F>(work: F) -> Result<T, KAnonError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| KAnonError::Task(e.to_string()))?
        .map_err(KAnonError::from)
}
