// Parameter cache — versioned, expiring client and server parameters
//
// Rows are never rewritten in place except to supersede them: inserting a new
// generation clamps the expiry of every still-active row to "now". Expired rows
// stay for audit until explicitly deleted.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::table::Table;
use super::{StorageBackend, StoreError};
use crate::clock::Clock;

const CLIENT_TABLE: &str = "kanon_client_params";
const SERVER_TABLE: &str = "kanon_server_params";

/// Client key material registered with the sign server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientParametersRow {
    /// Assigned on insert
    pub id: u64,
    /// Version handed out by the server at registration
    pub version: String,
    pub public_parameters: Vec<u8>,
    pub private_parameters: Vec<u8>,
    /// User profile the parameters were created for
    pub client_id: Uuid,
    pub created_at: u64,
    pub expiry_at: u64,
}

impl ClientParametersRow {
    pub fn is_active(&self, now: u64) -> bool {
        self.expiry_at > now
    }
}

/// Server public parameters with separate sign and join windows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerParametersRow {
    pub id: u64,
    pub version: String,
    pub public_parameters: Vec<u8>,
    pub created_at: u64,
    pub sign_expiry_at: u64,
    pub join_expiry_at: u64,
}

impl ServerParametersRow {
    pub fn is_usable_for_sign(&self, now: u64) -> bool {
        self.sign_expiry_at > now
    }

    pub fn is_usable_for_join(&self, now: u64) -> bool {
        self.join_expiry_at > now
    }
}

pub struct ParameterCache {
    client: Table<ClientParametersRow>,
    server: Table<ServerParametersRow>,
    clock: Arc<dyn Clock>,
    write_lock: Mutex<()>,
}

impl ParameterCache {
    pub fn new(backend: Arc<dyn StorageBackend>, clock: Arc<dyn Clock>) -> Self {
        Self {
            client: Table::new(backend.clone(), CLIENT_TABLE),
            server: Table::new(backend, SERVER_TABLE),
            clock,
            write_lock: Mutex::new(()),
        }
    }

    // ------------------------------------------------------------------------
    // Client parameters
    // ------------------------------------------------------------------------

    /// Non-expired rows, most recently created first
    pub fn active_client_parameters(
        &self,
        now: u64,
    ) -> Result<Vec<ClientParametersRow>, StoreError> {
        let mut rows: Vec<ClientParametersRow> = self
            .client
            .scan()?
            .into_iter()
            .filter(|row| row.is_active(now))
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(rows)
    }

    /// Store a new generation and supersede every other active row.
    pub fn insert_client_parameters(
        &self,
        mut row: ClientParametersRow,
    ) -> Result<ClientParametersRow, StoreError> {
        let _guard = self.write_lock.lock();
        let now = self.clock.now();
        for mut existing in self.client.scan()? {
            if existing.is_active(now) {
                existing.expiry_at = now;
                self.client.put(existing.id, &existing)?;
                debug!("Superseded client parameters {}", existing.version);
            }
        }
        row.id = self.client.next_id()?;
        self.client.put(row.id, &row)?;
        self.client.flush()?;
        Ok(row)
    }

    pub fn all_client_parameters(&self) -> Result<Vec<ClientParametersRow>, StoreError> {
        self.client.scan()
    }

    pub fn delete_all_client_parameters(&self) -> Result<usize, StoreError> {
        let _guard = self.write_lock.lock();
        let rows = self.client.scan()?;
        for row in &rows {
            self.client.remove(row.id)?;
        }
        self.client.flush()?;
        Ok(rows.len())
    }

    // ------------------------------------------------------------------------
    // Server parameters
    // ------------------------------------------------------------------------

    pub fn active_server_parameters_for_sign(
        &self,
        now: u64,
    ) -> Result<Vec<ServerParametersRow>, StoreError> {
        self.active_server_parameters(|row| row.is_usable_for_sign(now))
    }

    pub fn active_server_parameters_for_join(
        &self,
        now: u64,
    ) -> Result<Vec<ServerParametersRow>, StoreError> {
        self.active_server_parameters(|row| row.is_usable_for_join(now))
    }

    fn active_server_parameters(
        &self,
        usable: impl Fn(&ServerParametersRow) -> bool,
    ) -> Result<Vec<ServerParametersRow>, StoreError> {
        let mut rows: Vec<ServerParametersRow> =
            self.server.scan()?.into_iter().filter(|row| usable(row)).collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(rows)
    }

    /// Store new server parameters, closing the sign and join windows of older rows.
    pub fn insert_server_parameters(
        &self,
        mut row: ServerParametersRow,
    ) -> Result<ServerParametersRow, StoreError> {
        let _guard = self.write_lock.lock();
        let now = self.clock.now();
        for mut existing in self.server.scan()? {
            if existing.is_usable_for_sign(now) || existing.is_usable_for_join(now) {
                existing.sign_expiry_at = existing.sign_expiry_at.min(now);
                existing.join_expiry_at = existing.join_expiry_at.min(now);
                self.server.put(existing.id, &existing)?;
                debug!("Superseded server parameters {}", existing.version);
            }
        }
        row.id = self.server.next_id()?;
        self.server.put(row.id, &row)?;
        self.server.flush()?;
        Ok(row)
    }

    pub fn all_server_parameters(&self) -> Result<Vec<ServerParametersRow>, StoreError> {
        self.server.scan()
    }

    pub fn delete_all_server_parameters(&self) -> Result<usize, StoreError> {
        let _guard = self.write_lock.lock();
        let rows = self.server.scan()?;
        for row in &rows {
            self.server.remove(row.id)?;
        }
        self.server.flush()?;
        Ok(rows.len())
    }
}
