// Table — bincode rows under a key prefix with a monotonically increasing id

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;

use super::{StorageBackend, StoreError};

pub(crate) struct Table<T> {
    backend: Arc<dyn StorageBackend>,
    row_prefix: String,
    sequence_key: String,
    sequence: Mutex<()>,
    _row: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> Table<T> {
    pub fn new(backend: Arc<dyn StorageBackend>, name: &str) -> Self {
        Self {
            backend,
            row_prefix: format!("{}/row/", name),
            sequence_key: format!("{}/seq", name),
            sequence: Mutex::new(()),
            _row: PhantomData,
        }
    }

    // Zero-padded so lexicographic key order equals id order
    fn row_key(&self, id: u64) -> Vec<u8> {
        format!("{}{:020}", self.row_prefix, id).into_bytes()
    }

    /// Allocate the next id. Ids start at 1 and never repeat, even after deletes.
    pub fn next_id(&self) -> Result<u64, StoreError> {
        let _guard = self.sequence.lock();
        let current = match self.backend.get(self.sequence_key.as_bytes())? {
            Some(bytes) => bincode::deserialize::<u64>(&bytes)?,
            None => 0,
        };
        let next = current + 1;
        self.backend
            .put(self.sequence_key.as_bytes(), &bincode::serialize(&next)?)?;
        Ok(next)
    }

    pub fn put(&self, id: u64, row: &T) -> Result<(), StoreError> {
        let bytes = bincode::serialize(row)?;
        self.backend.put(&self.row_key(id), &bytes)
    }

    pub fn get(&self, id: u64) -> Result<Option<T>, StoreError> {
        match self.backend.get(&self.row_key(id))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn remove(&self, id: u64) -> Result<(), StoreError> {
        self.backend.remove(&self.row_key(id))
    }

    /// Every row in id order
    pub fn scan(&self) -> Result<Vec<T>, StoreError> {
        self.backend
            .scan_prefix(self.row_prefix.as_bytes())?
            .into_iter()
            .map(|(_, bytes)| bincode::deserialize(&bytes).map_err(StoreError::from))
            .collect()
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        self.backend.count_prefix(self.row_prefix.as_bytes())
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.backend.flush()
    }
}
