use crate::models::JobId;
use dashmap::DashMap;

/// Keyed storage for job bookkeeping.
///
/// Reads hand out clones so callers never hold a reference into the map, and
/// every mutation of a single record happens under that record's entry lock.
pub trait RecordStore<T: Clone>: Send + Sync {
    fn get(&self, id: &JobId) -> Option<T>;
    fn put(&self, id: JobId, record: T);
    /// Runs `apply` against the stored record while holding its lock. Returns
    /// what `apply` returned, or `false` when the record does not exist.
    fn update(&self, id: &JobId, apply: &mut dyn FnMut(&mut T) -> bool) -> bool;
    fn delete(&self, id: &JobId) -> Option<T>;
    /// Deletes the record only if `predicate` still holds under the lock.
    fn remove_if(&self, id: &JobId, predicate: &dyn Fn(&T) -> bool) -> Option<T>;
    fn list(&self) -> Vec<T>;
}

pub struct MemoryStore<T> {
    records: DashMap<JobId, T>,
}

impl<T> MemoryStore<T> {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync> RecordStore<T> for MemoryStore<T> {
    fn get(&self, id: &JobId) -> Option<T> {
        self.records.get(id).map(|entry| entry.value().clone())
    }

    fn put(&self, id: JobId, record: T) {
        self.records.insert(id, record);
    }

    fn update(&self, id: &JobId, apply: &mut dyn FnMut(&mut T) -> bool) -> bool {
        match self.records.get_mut(id) {
            Some(mut entry) => apply(entry.value_mut()),
            None => false,
        }
    }

    fn delete(&self, id: &JobId) -> Option<T> {
        self.records.remove(id).map(|(_, record)| record)
    }

    fn remove_if(&self, id: &JobId, predicate: &dyn Fn(&T) -> bool) -> Option<T> {
        self.records
            .remove_if(id, |_, record| predicate(record))
            .map(|(_, record)| record)
    }

    fn list(&self) -> Vec<T> {
        self.records
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }
}
