//! PackageRegistry: the authoritative in-memory list of known packages.
//!
//! The registry is shared by three kinds of writers that run on different
//! tasks and threads:
//!
//! - the refresh pass, which reconciles the list with the download directory
//!   and the installation detector,
//! - the install path, which publishes `Installing` and the final status,
//! - the download notifications, which add and remove `Downloading`
//!   placeholders.
//!
//! # Access discipline
//!
//! All access goes through one coarse `Mutex`.  Readers receive owned
//! snapshots, never references into the map.  Writers replace whole
//! [`Package`] values, either one entry at a time by key or the entire list
//! at once.  A reader therefore never observes a half-updated entry.
//!
//! # Keys
//!
//! Entries are keyed by [`Package::key`], the lowercased file path, so
//! `C:\dl\App.msi` and `c:\dl\app.MSI` are the same package.  A `BTreeMap`
//! keeps snapshot order stable, which makes repeated refreshes produce
//! identical snapshots.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use up2date_core::{Package, PackageStatus};

/// Mutex-guarded map of packages keyed by case-insensitive file path.
#[derive(Default)]
pub struct PackageRegistry {
    entries: Mutex<BTreeMap<String, Package>>,
}

impl PackageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Package>> {
        // A panic while holding the lock cannot leave a half-written entry:
        // every write is a single insert/remove/assign.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a copy of every entry, ordered by key.
    pub fn snapshot(&self) -> Vec<Package> {
        self.lock().values().cloned().collect()
    }

    /// Looks up an entry by its full path.
    pub fn get(&self, path: &Path) -> Option<Package> {
        self.lock().get(&Package::key_for(path)).cloned()
    }

    /// Looks up an entry by file name only, ignoring case.
    pub fn find_by_file_name(&self, file_name: &str) -> Option<Package> {
        self.lock()
            .values()
            .find(|p| p.matches_file_name(file_name))
            .cloned()
    }

    /// Replaces an existing entry.  Returns `false` (and stores nothing) when
    /// no entry with the same key exists.
    pub fn replace(&self, package: Package) -> bool {
        let mut entries = self.lock();
        match entries.get_mut(&package.key()) {
            Some(slot) => {
                *slot = package;
                true
            }
            None => false,
        }
    }

    /// Inserts a new entry or replaces the existing one with the same key.
    pub fn upsert(&self, package: Package) {
        self.lock().insert(package.key(), package);
    }

    /// Removes the entry at `path` only if it currently has `status`.
    pub fn remove_with_status(&self, path: &Path, status: PackageStatus) -> bool {
        let mut entries = self.lock();
        let key = Package::key_for(path);
        if entries.get(&key).is_some_and(|p| p.status == status) {
            entries.remove(&key);
            true
        } else {
            false
        }
    }

    /// Atomically commits a reconciled list computed from `base`.
    ///
    /// `base` is the snapshot the reconciliation started from.  Any entry
    /// another writer added, changed or removed since then keeps its live
    /// value; every other entry takes the reconciled value.  Entries the
    /// reconciliation dropped are removed unless they changed concurrently.
    pub fn commit(&self, base: &[Package], reconciled: Vec<Package>) {
        let base: HashMap<String, &Package> = base.iter().map(|p| (p.key(), p)).collect();
        let mut live = self.lock();
        let mut next = BTreeMap::new();

        for package in reconciled {
            let key = package.key();
            match (base.get(&key), live.get(&key)) {
                // Changed under us, or added concurrently: the live value wins.
                (Some(before), Some(now)) if *before != now => {
                    next.insert(key, now.clone());
                }
                (None, Some(now)) => {
                    next.insert(key, now.clone());
                }
                // Removed concurrently.
                (Some(_), None) => {}
                _ => {
                    next.insert(key, package);
                }
            }
        }

        for (key, now) in live.iter() {
            if next.contains_key(key) {
                continue;
            }
            let keep = match base.get(key) {
                None => true,
                Some(before) => *before != now,
            };
            if keep {
                next.insert(key.clone(), now.clone());
            }
        }

        *live = next;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn make(path: &str, status: PackageStatus) -> Package {
        Package::new(path, status)
    }

    #[test]
    fn test_registry_starts_empty() {
        assert!(PackageRegistry::new().snapshot().is_empty());
    }

    #[test]
    fn test_upsert_keeps_one_entry_per_path_ignoring_case() {
        // Arrange
        let registry = PackageRegistry::new();

        // Act
        registry.upsert(make("/dl/App.msi", PackageStatus::Downloading));
        registry.upsert(make("/dl/app.MSI", PackageStatus::Downloaded));

        // Assert
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].status, PackageStatus::Downloaded);
    }

    #[test]
    fn test_replace_ignores_unknown_entries() {
        let registry = PackageRegistry::new();
        assert!(!registry.replace(make("/dl/app.msi", PackageStatus::Installed)));
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn test_find_by_file_name_ignores_case() {
        let registry = PackageRegistry::new();
        registry.upsert(make("/dl/App.msi", PackageStatus::Downloaded));
        assert!(registry.find_by_file_name("APP.MSI").is_some());
        assert!(registry.find_by_file_name("other.msi").is_none());
    }

    #[test]
    fn test_remove_with_status_requires_matching_status() {
        // Arrange
        let registry = PackageRegistry::new();
        registry.upsert(make("/dl/app.msi", PackageStatus::Downloaded));

        // Act / Assert
        assert!(!registry.remove_with_status(Path::new("/dl/app.msi"), PackageStatus::Downloading));
        assert_eq!(registry.snapshot().len(), 1);
        assert!(registry.remove_with_status(Path::new("/dl/APP.msi"), PackageStatus::Downloaded));
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn test_snapshot_is_detached_from_registry() {
        let registry = PackageRegistry::new();
        registry.upsert(make("/dl/app.msi", PackageStatus::Downloaded));

        let mut snapshot = registry.snapshot();
        snapshot[0].status = PackageStatus::Failed;

        assert_eq!(registry.snapshot()[0].status, PackageStatus::Downloaded);
    }

    #[test]
    fn test_commit_applies_reconciled_values_when_nothing_changed() {
        // Arrange
        let registry = PackageRegistry::new();
        registry.upsert(make("/dl/a.msi", PackageStatus::Downloaded));
        registry.upsert(make("/dl/gone.msi", PackageStatus::Downloaded));
        let base = registry.snapshot();

        // Act
        registry.commit(
            &base,
            vec![
                make("/dl/a.msi", PackageStatus::Installed),
                make("/dl/new.msi", PackageStatus::Downloaded),
            ],
        );

        // Assert
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(registry.get(Path::new("/dl/a.msi")).unwrap().status, PackageStatus::Installed);
        assert!(registry.get(Path::new("/dl/gone.msi")).is_none());
    }

    #[test]
    fn test_commit_keeps_entry_changed_concurrently() {
        // Arrange: refresh snapshots, then an install publishes Installing
        let registry = PackageRegistry::new();
        registry.upsert(make("/dl/a.msi", PackageStatus::Downloaded));
        let base = registry.snapshot();
        registry.replace(make("/dl/a.msi", PackageStatus::Installing));

        // Act: refresh commits its stale view
        registry.commit(&base, vec![make("/dl/a.msi", PackageStatus::Downloaded)]);

        // Assert
        assert_eq!(registry.get(Path::new("/dl/a.msi")).unwrap().status, PackageStatus::Installing);
    }

    #[test]
    fn test_commit_keeps_placeholder_added_concurrently() {
        let registry = PackageRegistry::new();
        let base = registry.snapshot();
        registry.upsert(Package::downloading("/dl/late.msi"));

        registry.commit(&base, Vec::new());

        assert_eq!(
            registry.get(Path::new("/dl/late.msi")).unwrap().status,
            PackageStatus::Downloading
        );
    }

    #[test]
    fn test_commit_does_not_resurrect_entry_removed_concurrently() {
        // Arrange: a placeholder is in the base snapshot, then download finishes
        let registry = PackageRegistry::new();
        registry.upsert(Package::downloading("/dl/app.msi"));
        let base = registry.snapshot();
        registry.remove_with_status(Path::new("/dl/app.msi"), PackageStatus::Downloading);

        // Act
        registry.commit(&base, vec![Package::downloading("/dl/app.msi")]);

        // Assert
        assert!(registry.snapshot().is_empty());
    }
}
