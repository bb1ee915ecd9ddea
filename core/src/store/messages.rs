// Message store — persisted join candidates and their status transitions
//
// Every mutating call flushes before returning. Read-modify-write sequences
// run under one mutex so overlapping sign-join runs converge on the same rows.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

use super::table::Table;
use super::{StorageBackend, StoreError};
use crate::clock::Clock;
use crate::message::{KAnonMessage, MessageStatus};

const TABLE_NAME: &str = "kanon_messages";

pub struct MessageStore {
    table: Table<KAnonMessage>,
    clock: Arc<dyn Clock>,
    write_lock: Mutex<()>,
}

impl MessageStore {
    pub fn new(backend: Arc<dyn StorageBackend>, clock: Arc<dyn Clock>) -> Self {
        Self {
            table: Table::new(backend, TABLE_NAME),
            clock,
            write_lock: Mutex::new(()),
        }
    }

    /// Persist one message, returning it with its assigned id.
    pub fn insert(&self, message: KAnonMessage) -> Result<KAnonMessage, StoreError> {
        let mut stored = self.insert_all(vec![message])?;
        stored.pop().ok_or_else(|| StoreError::Backend("insert lost its row".to_string()))
    }

    /// Persist messages in order. Ids are assigned here and strictly increase.
    pub fn insert_all(&self, messages: Vec<KAnonMessage>) -> Result<Vec<KAnonMessage>, StoreError> {
        let _guard = self.write_lock.lock();
        let mut stored = Vec::with_capacity(messages.len());
        for mut message in messages {
            message.id = self.table.next_id()?;
            self.table.put(message.id, &message)?;
            stored.push(message);
        }
        self.table.flush()?;
        debug!("Stored {} k-anon message(s)", stored.len());
        Ok(stored)
    }

    pub fn get(&self, id: u64) -> Result<Option<KAnonMessage>, StoreError> {
        self.table.get(id)
    }

    /// Rows for `ids` in the order given; unknown ids are skipped.
    pub fn get_many(&self, ids: &[u64]) -> Result<Vec<KAnonMessage>, StoreError> {
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(message) = self.table.get(*id)? {
                found.push(message);
            }
        }
        Ok(found)
    }

    /// Up to `limit` unexpired messages with `status`, oldest first.
    pub fn fetch_by_status(
        &self,
        limit: usize,
        status: MessageStatus,
    ) -> Result<Vec<KAnonMessage>, StoreError> {
        let now = self.clock.now();
        Ok(self
            .table
            .scan()?
            .into_iter()
            .filter(|m| m.status == status && !m.is_expired(now))
            .take(limit)
            .collect())
    }

    pub fn fetch_by_hash_set(&self, hash_set: &str) -> Result<Vec<KAnonMessage>, StoreError> {
        Ok(self
            .table
            .scan()?
            .into_iter()
            .filter(|m| m.hash_set == hash_set)
            .collect())
    }

    /// Every stored row, expired ones included
    pub fn all(&self) -> Result<Vec<KAnonMessage>, StoreError> {
        self.table.scan()
    }

    /// Apply `new_status` where the transition table allows it.
    /// Returns how many rows changed; disallowed transitions are skipped.
    pub fn update_status(&self, ids: &[u64], new_status: MessageStatus) -> Result<usize, StoreError> {
        self.transition(ids, new_status, None)
    }

    /// Like `update_status`, also stamping the client-parameter generation used.
    /// A non-terminal row already in `new_status` keeps its status but takes
    /// the new stamp.
    pub fn update_status_for_generation(
        &self,
        ids: &[u64],
        new_status: MessageStatus,
        client_parameters_expiry: u64,
    ) -> Result<usize, StoreError> {
        self.transition(ids, new_status, Some(client_parameters_expiry))
    }

    fn transition(
        &self,
        ids: &[u64],
        new_status: MessageStatus,
        generation: Option<u64>,
    ) -> Result<usize, StoreError> {
        let _guard = self.write_lock.lock();
        let mut changed = 0;
        for id in ids {
            let Some(mut message) = self.table.get(*id)? else {
                continue;
            };
            let restamp = generation.is_some()
                && message.status == new_status
                && !message.status.is_terminal();
            if !restamp && !message.status.can_transition_to(new_status) {
                debug!(
                    "Skipping transition {} -> {} for message {}",
                    message.status, new_status, id
                );
                continue;
            }
            message.status = new_status;
            if generation.is_some() {
                message.corresponding_client_parameters_expiry = generation;
            }
            self.table.put(*id, &message)?;
            changed += 1;
        }
        if changed > 0 {
            self.table.flush()?;
        }
        Ok(changed)
    }

    /// Explicit retry: `Signed`/`Failed` rows go back to `NotProcessed`.
    pub fn resubmit(&self, ids: &[u64]) -> Result<usize, StoreError> {
        let _guard = self.write_lock.lock();
        let mut changed = 0;
        for id in ids {
            let Some(mut message) = self.table.get(*id)? else {
                continue;
            };
            if !matches!(message.status, MessageStatus::Signed | MessageStatus::Failed) {
                continue;
            }
            message.status = MessageStatus::NotProcessed;
            message.corresponding_client_parameters_expiry = None;
            self.table.put(*id, &message)?;
            changed += 1;
        }
        if changed > 0 {
            self.table.flush()?;
        }
        Ok(changed)
    }

    /// Remove every message whose expiry is at or before `now`.
    pub fn delete_expired(&self, now: u64) -> Result<usize, StoreError> {
        let _guard = self.write_lock.lock();
        let expired: Vec<u64> = self
            .table
            .scan()?
            .into_iter()
            .filter(|m| m.is_expired(now))
            .map(|m| m.id)
            .collect();
        for id in &expired {
            self.table.remove(*id)?;
        }
        if !expired.is_empty() {
            self.table.flush()?;
            debug!("Purged {} expired k-anon message(s)", expired.len());
        }
        Ok(expired.len())
    }

    pub fn count_by_status(&self, status: MessageStatus) -> Result<usize, StoreError> {
        Ok(self
            .table
            .scan()?
            .iter()
            .filter(|m| m.status == status)
            .count())
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        self.table.count()
    }
}
