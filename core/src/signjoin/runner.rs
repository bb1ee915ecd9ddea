// Background runner — purge, then hand a bounded slice of pending messages to the caller

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::blocking;
use super::manager::SignJoinManager;
use crate::clock::Clock;
use crate::protocol::SignJoinOutcome;
use crate::store::MessageStore;
use crate::KAnonError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackgroundRunOutcome {
    /// Feature off or zero budget; nothing touched
    Disabled,
    Completed {
        purged: usize,
        /// `None` when no message was pending
        sign_join: Option<SignJoinOutcome>,
    },
}

/// Unit of work driven by the scheduler
#[async_trait]
pub trait BackgroundJob: Send + Sync {
    async fn run_once(&self) -> Result<BackgroundRunOutcome, KAnonError>;
}

pub struct BackgroundRunner {
    manager: Arc<SignJoinManager>,
    messages: Arc<MessageStore>,
    clock: Arc<dyn Clock>,
}

impl BackgroundRunner {
    pub fn new(
        manager: Arc<SignJoinManager>,
        messages: Arc<MessageStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            manager,
            messages,
            clock,
        }
    }

    pub async fn run(&self) -> Result<BackgroundRunOutcome, KAnonError> {
        let config = self.manager.config();
        if !config.background_run_active() {
            return Ok(BackgroundRunOutcome::Disabled);
        }

        let now = self.clock.now();
        let store = self.messages.clone();
        let purged = blocking(move || store.delete_expired(now)).await?;
        let sign_join = self
            .manager
            .process_messages_from_database(config.messages_per_background_run)
            .await?;

        info!(
            "Background run: purged {}, processed {}",
            purged,
            sign_join.map(|o| o.eligible).unwrap_or(0)
        );
        Ok(BackgroundRunOutcome::Completed { purged, sign_join })
    }
}

#[async_trait]
impl BackgroundJob for BackgroundRunner {
    async fn run_once(&self) -> Result<BackgroundRunOutcome, KAnonError> {
        self.run().await
    }
}
