//! Single-instance registries
//!
//! A lease combines an in-process claim with an exclusive lock on a file
//! under `<state_dir>/locks/`, so neither a second orchestrator in this
//! process nor one in another process can hold the same key while a run
//! holds it. Dropping the lease releases both.
//!
//! Services are leased by name for the lifetime of a local session. Runs are
//! leased by `(service, tool)` for the whole of a run, remote services
//! included.

use std::collections::HashSet;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use fs2::FileExt;

use super::LifecycleError;
use crate::catalog::{ServiceId, ToolId};

/// Anything a registry can be keyed by
pub trait LeaseKey: Copy + Eq + Hash + fmt::Display + fmt::Debug {}

impl<K: Copy + Eq + Hash + fmt::Display + fmt::Debug> LeaseKey for K {}

/// `(service, tool)` pair of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunKey {
    /// Target service
    pub service: ServiceId,
    /// Tool
    pub tool: ToolId,
}

impl fmt::Display for RunKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service, self.tool)
    }
}

/// Why a lease could not be taken
#[derive(Debug, thiserror::Error)]
pub enum LeaseError {
    /// Another holder has the key
    #[error("already held")]
    Contended,

    /// Lock file unusable
    #[error("failed to lock {path}: {source}")]
    Io {
        /// Lock file
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },
}

/// Tracks which keys are currently leased
#[derive(Debug, Clone)]
pub struct LeaseRegistry<K: LeaseKey> {
    held: Arc<Mutex<HashSet<K>>>,
}

/// Registry of local services
pub type ServiceRegistry = LeaseRegistry<ServiceId>;

/// Registry of `(service, tool)` runs
pub type RunRegistry = LeaseRegistry<RunKey>;

/// Exclusive claim on one service
pub type ServiceLease = Lease<ServiceId>;

/// Exclusive claim on one `(service, tool)` run
pub type RunLease = Lease<RunKey>;

impl<K: LeaseKey> Default for LeaseRegistry<K> {
    fn default() -> Self {
        Self {
            held: Arc::new(Mutex::new(HashSet::new())),
        }
    }
}

impl<K: LeaseKey> LeaseRegistry<K> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key`, failing immediately if anyone holds it
    pub fn try_acquire(&self, key: K, lock_path: &Path) -> Result<Lease<K>, LeaseError> {
        {
            let mut held = self.held.lock().map_err(|_| LeaseError::Contended)?;
            if !held.insert(key) {
                return Err(LeaseError::Contended);
            }
        }

        match lock_file(lock_path) {
            Ok(file) => Ok(Lease {
                key,
                file,
                path: lock_path.to_path_buf(),
                held: Arc::clone(&self.held),
            }),
            Err(e) => {
                self.release(key);
                Err(e)
            }
        }
    }

    /// Whether `key` is leased in this process
    pub fn is_held(&self, key: K) -> bool {
        self.held
            .lock()
            .map(|held| held.contains(&key))
            .unwrap_or(false)
    }

    fn release(&self, key: K) {
        if let Ok(mut held) = self.held.lock() {
            held.remove(&key);
        }
    }
}

impl ServiceRegistry {
    /// Claim `service` for the duration of a run
    ///
    /// Fails immediately with [`LifecycleError::Busy`] if another run holds it.
    pub fn acquire(&self, service: ServiceId, lock_path: &Path) -> Result<ServiceLease, LifecycleError> {
        self.try_acquire(service, lock_path).map_err(|e| match e {
            LeaseError::Contended => LifecycleError::Busy(service),
            LeaseError::Io { path, source } => LifecycleError::Lock { path, source },
        })
    }
}

fn lock_file(path: &Path) -> Result<File, LeaseError> {
    let io = |source| LeaseError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .map_err(io)?;
    file.try_lock_exclusive().map_err(|e| {
        if e.kind() == fs2::lock_contended_error().kind() {
            LeaseError::Contended
        } else {
            io(e)
        }
    })?;
    Ok(file)
}

/// Exclusive claim on one key; released on drop
#[derive(Debug)]
pub struct Lease<K: LeaseKey> {
    key: K,
    file: File,
    path: PathBuf,
    held: Arc<Mutex<HashSet<K>>>,
}

impl<K: LeaseKey> Lease<K> {
    /// The leased key
    pub fn key(&self) -> K {
        self.key
    }
}

impl ServiceLease {
    /// The leased service
    pub fn service(&self) -> ServiceId {
        self.key
    }
}

impl<K: LeaseKey> Drop for Lease<K> {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to unlock lease");
        }
        if let Ok(mut held) = self.held.lock() {
            held.remove(&self.key);
        }
        tracing::debug!(key = %self.key, "Released lease");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_is_busy_until_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locks/genome-nexus.lock");
        let registry = ServiceRegistry::new();

        let lease = registry.acquire(ServiceId::GenomeNexus, &path).unwrap();
        assert!(registry.is_held(ServiceId::GenomeNexus));
        assert!(matches!(
            registry.acquire(ServiceId::GenomeNexus, &path),
            Err(LifecycleError::Busy(ServiceId::GenomeNexus))
        ));

        drop(lease);
        assert!(!registry.is_held(ServiceId::GenomeNexus));
        let again = registry.acquire(ServiceId::GenomeNexus, &path).unwrap();
        assert_eq!(again.service(), ServiceId::GenomeNexus);
    }

    #[test]
    fn test_file_lock_excludes_other_registries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("language-tool.lock");
        let first = ServiceRegistry::new();
        let second = ServiceRegistry::new();

        let _lease = first.acquire(ServiceId::LanguageTool, &path).unwrap();
        assert!(matches!(
            second.acquire(ServiceId::LanguageTool, &path),
            Err(LifecycleError::Busy(_))
        ));
        // A failed acquire must not leave a stale in-process claim.
        assert!(!second.is_held(ServiceId::LanguageTool));
    }

    #[test]
    fn test_distinct_services_do_not_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ServiceRegistry::new();
        let _a = registry
            .acquire(ServiceId::GenomeNexus, &dir.path().join("a.lock"))
            .unwrap();
        let _b = registry
            .acquire(ServiceId::LanguageTool, &dir.path().join("b.lock"))
            .unwrap();
    }

    #[test]
    fn test_run_keys_differ_by_tool() {
        let dir = tempfile::tempdir().unwrap();
        let registry = RunRegistry::new();
        let key = RunKey {
            service: ServiceId::Fdic,
            tool: ToolId::Logiagent,
        };
        let path = dir.path().join("fdic.logiagent.lock");

        let lease = registry.try_acquire(key, &path).unwrap();
        assert_eq!(lease.key().to_string(), "fdic/logiagent");
        assert!(matches!(registry.try_acquire(key, &path), Err(LeaseError::Contended)));

        let other = RunKey {
            tool: ToolId::Autoresttest,
            ..key
        };
        let _other = registry
            .try_acquire(other, &dir.path().join("fdic.autoresttest.lock"))
            .unwrap();
        drop(lease);
        assert!(registry.try_acquire(key, &path).is_ok());
    }
}
