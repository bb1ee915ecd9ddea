// User profile id — stable random identity presented to the sign server

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::{StorageBackend, StoreError};

const PROFILE_KEY: &[u8] = b"kanon_user_profile_id";

/// Lazily creates, persists and caches the profile id.
pub struct UserProfileIdManager {
    backend: Arc<dyn StorageBackend>,
    cached: RwLock<Option<Uuid>>,
}

impl UserProfileIdManager {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            cached: RwLock::new(None),
        }
    }

    /// Stored id, if one has been created
    pub fn current(&self) -> Result<Option<Uuid>, StoreError> {
        if let Some(id) = *self.cached.read() {
            return Ok(Some(id));
        }
        let stored = match self.backend.get(PROFILE_KEY)? {
            Some(bytes) => Some(
                Uuid::from_slice(&bytes).map_err(|e| StoreError::Serialization(e.to_string()))?,
            ),
            None => None,
        };
        if let Some(id) = stored {
            *self.cached.write() = Some(id);
        }
        Ok(stored)
    }

    pub fn get_or_create(&self) -> Result<Uuid, StoreError> {
        if let Some(id) = self.current()? {
            return Ok(id);
        }
        let mut cached = self.cached.write();
        // another caller may have won the race while we waited
        if let Some(id) = *cached {
            return Ok(id);
        }
        let id = Uuid::new_v4();
        self.backend.put(PROFILE_KEY, id.as_bytes())?;
        self.backend.flush()?;
        *cached = Some(id);
        info!("Created user profile id");
        Ok(id)
    }

    /// Forget the id; the next `get_or_create` mints a new one.
    pub fn reset(&self) -> Result<(), StoreError> {
        let mut cached = self.cached.write();
        self.backend.remove(PROFILE_KEY)?;
        self.backend.flush()?;
        *cached = None;
        Ok(())
    }
}
