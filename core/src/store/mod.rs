// Store module — message lifecycle, parameter cache and profile id over one keyed backend

pub mod backend;
pub mod messages;
pub mod params;
pub mod profile;
mod table;

pub use backend::{MemoryStorage, SledStorage, StorageBackend};
pub use messages::MessageStore;
pub use params::{ClientParametersRow, ParameterCache, ServerParametersRow};
pub use profile::UserProfileIdManager;

use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::clock::Clock;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<bincode::Error> for StoreError {
    fn from(err: bincode::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// The three tables and the profile scalar, sharing one backend.
#[derive(Clone)]
pub struct KAnonStores {
    pub messages: Arc<MessageStore>,
    pub params: Arc<ParameterCache>,
    pub profile: Arc<UserProfileIdManager>,
}

impl KAnonStores {
    pub fn new(backend: Arc<dyn StorageBackend>, clock: Arc<dyn Clock>) -> Self {
        Self {
            messages: Arc::new(MessageStore::new(backend.clone(), clock.clone())),
            params: Arc::new(ParameterCache::new(backend.clone(), clock)),
            profile: Arc::new(UserProfileIdManager::new(backend)),
        }
    }

    /// Open (or create) a sled database at `path`
    pub fn open(path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let backend = Arc::new(SledStorage::open(path)?);
        Ok(Self::new(backend, clock))
    }

    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self::new(Arc::new(MemoryStorage::new()), clock)
    }
}
