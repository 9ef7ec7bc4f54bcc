//! Reference-counted storage leases keyed by directory.
//!
//! Every engine acquires a lease when it is opened and releases it exactly once when it is
//! closed. The registry is an explicit value handed to openers, so two drivers in the same
//! process only share storage state when they are given the same registry.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

/// Database names known to every engine open on the same directory.
#[derive(Debug, Default)]
pub struct DatabaseCatalog {
    names: Mutex<BTreeSet<String>>,
}

impl DatabaseCatalog {
    fn lock(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.names.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains(name)
    }

    /// Register a database name. Returns false if it was already known.
    pub fn insert(&self, name: &str) -> bool {
        self.lock().insert(name.to_string())
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.lock().iter().cloned().collect()
    }
}

struct RegistryEntry {
    leases: usize,
    catalog: Arc<DatabaseCatalog>,
}

#[derive(Clone, Default)]
pub struct StorageRegistry {
    entries: Arc<Mutex<HashMap<PathBuf, RegistryEntry>>>,
}

impl StorageRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, RegistryEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take a lease on the storage at `path`.
    ///
    /// The returned flag is true when this is the first live lease for the directory, which
    /// is the caller's cue to populate the shared catalog.
    #[must_use]
    pub fn acquire(&self, path: &Path) -> (StorageLease, bool) {
        let key = canonical(path);
        let mut entries = self.lock();
        let entry = entries.entry(key.clone()).or_insert_with(|| RegistryEntry {
            leases: 0,
            catalog: Arc::new(DatabaseCatalog::default()),
        });
        entry.leases += 1;
        let first = entry.leases == 1;
        debug!(path = %key.display(), leases = entry.leases, "storage lease acquired");
        let lease = StorageLease {
            registry: self.clone(),
            path: key,
            catalog: Arc::clone(&entry.catalog),
            released: false,
        };
        (lease, first)
    }

    /// Number of leases currently held on `path`.
    #[must_use]
    pub fn live_leases(&self, path: &Path) -> usize {
        self.lock()
            .get(&canonical(path))
            .map_or(0, |entry| entry.leases)
    }

    fn release(&self, path: &Path) {
        let mut entries = self.lock();
        if let Some(entry) = entries.get_mut(path) {
            entry.leases = entry.leases.saturating_sub(1);
            debug!(path = %path.display(), leases = entry.leases, "storage lease released");
            if entry.leases == 0 {
                entries.remove(path);
            }
        }
    }
}

impl fmt::Debug for StorageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageRegistry")
            .field("directories", &self.lock().len())
            .finish()
    }
}

fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// A held reference on one storage directory. Released on [`StorageLease::release`] or drop.
pub struct StorageLease {
    registry: StorageRegistry,
    path: PathBuf,
    catalog: Arc<DatabaseCatalog>,
    released: bool,
}

impl StorageLease {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn catalog(&self) -> &Arc<DatabaseCatalog> {
        &self.catalog
    }

    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            self.registry.release(&self.path);
        }
    }
}

impl Drop for StorageLease {
    fn drop(&mut self) {
        self.release_once();
    }
}

impl fmt::Debug for StorageLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageLease")
            .field("path", &self.path)
            .field("released", &self.released)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leases_pair_with_releases() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = StorageRegistry::new();

        let (first, is_first) = registry.acquire(dir.path());
        let (second, second_is_first) = registry.acquire(dir.path());
        assert!(is_first);
        assert!(!second_is_first);
        assert_eq!(registry.live_leases(dir.path()), 2);

        first.release();
        assert_eq!(registry.live_leases(dir.path()), 1);
        drop(second);
        assert_eq!(registry.live_leases(dir.path()), 0);
    }

    #[test]
    fn catalog_is_shared_between_live_leases() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = StorageRegistry::new();
        let (a, _) = registry.acquire(dir.path());
        let (b, _) = registry.acquire(dir.path());
        assert!(a.catalog().insert("inventory"));
        assert!(b.catalog().contains("inventory"));
        assert!(!b.catalog().insert("inventory"));
    }

    #[test]
    fn separate_registries_do_not_share_state() {
        let dir = tempfile::tempdir().expect("tempdir");
        let left = StorageRegistry::new();
        let right = StorageRegistry::new();
        let (_lease, _) = left.acquire(dir.path());
        assert_eq!(left.live_leases(dir.path()), 1);
        assert_eq!(right.live_leases(dir.path()), 0);
    }
}
