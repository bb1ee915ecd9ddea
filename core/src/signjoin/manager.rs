// Sign-join manager — routes new messages and drives batched runs

use rand::Rng;
use std::sync::Arc;
use tracing::{debug, info};

use super::blocking;
use crate::clock::Clock;
use crate::config::KAnonConfig;
use crate::message::{KAnonMessage, MessageStatus, SignJoinSource};
use crate::protocol::{KAnonCaller, SignJoinOutcome};
use crate::store::MessageStore;
use crate::KAnonError;

/// Source of routing rolls
#[cfg_attr(test, mockall::automock)]
pub trait RandomSource: Send + Sync {
    /// Uniform value in `0..100`
    fn next_percent(&self) -> u8;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn next_percent(&self) -> u8 {
        rand::thread_rng().gen_range(0..100)
    }
}

/// What happened to a batch of new messages
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewMessagesOutcome {
    /// Hash set already covered by a live join
    pub skipped: usize,
    pub stored: usize,
    /// Result of the immediate call, when any message was sampled for it
    pub immediate: Option<SignJoinOutcome>,
}

pub struct SignJoinManager {
    config: KAnonConfig,
    messages: Arc<MessageStore>,
    caller: Arc<dyn KAnonCaller>,
    random: Arc<dyn RandomSource>,
    clock: Arc<dyn Clock>,
}

impl SignJoinManager {
    pub fn new(
        config: KAnonConfig,
        messages: Arc<MessageStore>,
        caller: Arc<dyn KAnonCaller>,
        random: Arc<dyn RandomSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            messages,
            caller,
            random,
            clock,
        }
    }

    pub fn config(&self) -> &KAnonConfig {
        &self.config
    }

    /// Store new messages and hand a sampled share to the caller right away.
    pub async fn process_new_messages(
        &self,
        new_messages: Vec<KAnonMessage>,
    ) -> Result<NewMessagesOutcome, KAnonError> {
        if !self.config.enabled {
            debug!("Sign-join disabled, dropping {} message(s)", new_messages.len());
            return Ok(NewMessagesOutcome::default());
        }

        let now = self.clock.now();
        let store = self.messages.clone();
        let total = new_messages.len();
        let fresh = blocking(move || {
            let mut fresh = Vec::with_capacity(new_messages.len());
            for mut message in new_messages {
                let covered = store
                    .fetch_by_hash_set(&message.hash_set)?
                    .iter()
                    .any(|existing| existing.is_covered(now));
                if covered {
                    debug!("Hash set {} already joined, skipping", message.hash_set);
                    continue;
                }
                message.status = MessageStatus::NotProcessed;
                message.corresponding_client_parameters_expiry = None;
                fresh.push(message);
            }
            Ok(fresh)
        })
        .await?;

        let threshold = self.config.percentage_immediate_sign_join_calls;
        let routed: Vec<bool> = fresh
            .iter()
            .map(|_| self.random.next_percent() < threshold)
            .collect();

        let store = self.messages.clone();
        let stored = blocking(move || store.insert_all(fresh)).await?;
        let immediate: Vec<KAnonMessage> = stored
            .iter()
            .zip(routed)
            .filter(|(_, immediate)| *immediate)
            .map(|(message, _)| message.clone())
            .collect();

        let mut outcome = NewMessagesOutcome {
            skipped: total - stored.len(),
            stored: stored.len(),
            immediate: None,
        };
        if !immediate.is_empty() {
            info!(
                "Routing {} of {} new message(s) to an immediate sign-join",
                immediate.len(),
                stored.len()
            );
            outcome.immediate = Some(
                self.caller
                    .sign_and_join_messages(immediate, SignJoinSource::Immediate)
                    .await?,
            );
        }
        Ok(outcome)
    }

    /// Hand up to `limit` pending messages to the caller. `None` when there
    /// was nothing to send.
    pub async fn process_messages_from_database(
        &self,
        limit: usize,
    ) -> Result<Option<SignJoinOutcome>, KAnonError> {
        if limit == 0 {
            return Ok(None);
        }
        let store = self.messages.clone();
        let pending =
            blocking(move || store.fetch_by_status(limit, MessageStatus::NotProcessed)).await?;
        if pending.is_empty() {
            debug!("No pending messages for background sign-join");
            return Ok(None);
        }
        let outcome = self
            .caller
            .sign_and_join_messages(pending, SignJoinSource::Background)
            .await?;
        Ok(Some(outcome))
    }
}
