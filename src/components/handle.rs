use std::{
    collections::HashMap,
    fmt::Display,
    sync::atomic::{AtomicU64, Ordering},
};

use crate::{
    engines::BackendKind,
    errors::{RasterError, Result},
};

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

/// Opaque reference to a dataset opened by one processor instance.
///
/// Only the processor that returned the handle can resolve it. Passing it to
/// any other instance, or using it after `close`, yields
/// [RasterError::InvalidHandle].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DatasetHandle {
    backend: BackendKind,
    owner: u64,
    slot: u64,
}

impl DatasetHandle {
    pub fn backend(&self) -> BackendKind {
        self.backend
    }
}

impl Display for DatasetHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}.{}", self.backend, self.owner, self.slot)
    }
}

/// Datasets owned by one processor instance, keyed by handle slot.
#[derive(Debug)]
pub struct DatasetTable<D> {
    backend: BackendKind,
    owner: u64,
    next_slot: u64,
    datasets: HashMap<u64, D>,
}

impl<D> DatasetTable<D> {
    pub fn new(backend: BackendKind) -> Self {
        Self {
            backend,
            owner: NEXT_OWNER.fetch_add(1, Ordering::Relaxed),
            next_slot: 0,
            datasets: HashMap::new(),
        }
    }

    /// Unique per table and per slot; engines use it to name scratch resources.
    pub fn owner(&self) -> u64 {
        self.owner
    }

    pub fn insert(&mut self, dataset: D) -> DatasetHandle {
        let slot = self.next_slot;
        self.next_slot += 1;
        self.datasets.insert(slot, dataset);
        DatasetHandle {
            backend: self.backend,
            owner: self.owner,
            slot,
        }
    }

    pub fn get(&self, handle: &DatasetHandle) -> Result<&D> {
        if handle.owner != self.owner {
            return Err(RasterError::InvalidHandle(*handle));
        }
        self.datasets
            .get(&handle.slot)
            .ok_or(RasterError::InvalidHandle(*handle))
    }

    /// Removes the dataset; `None` when it was already closed or is foreign.
    pub fn remove(&mut self, handle: &DatasetHandle) -> Option<D> {
        if handle.owner != self.owner {
            return None;
        }
        self.datasets.remove(&handle.slot)
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }
}
