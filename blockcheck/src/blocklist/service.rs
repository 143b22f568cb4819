use std::{
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use arc_swap::ArcSwap;
use blockcheck_blocklist::{Decision, DecisionEngine, LoadError, Snapshot, load_dir};
use blockcheck_server::BlockChecker;

/// Holds the active blocklist snapshot and answers checks against it.
pub struct BlocklistService {
    snapshot: ArcSwap<Snapshot>,
    generation: AtomicU64,
    engine: DecisionEngine,
    directory: PathBuf,
}

impl BlocklistService {
    /// Build the service from `directory`. An unreadable directory is an error.
    pub fn load(directory: impl Into<PathBuf>, engine: DecisionEngine) -> Result<Self, LoadError> {
        let directory = directory.into();
        let snapshot = load_dir(&directory)?;

        let stats = snapshot.stats();
        if snapshot.is_fully_rejected() {
            tracing::error!(
                "No blocklist in {} could be loaded ({} files rejected), every user is unrestricted",
                directory.display(),
                stats.rejected_files
            );
        }
        tracing::info!(
            "Loaded {} blocklists with {} patterns from {}",
            stats.users,
            stats.patterns,
            directory.display()
        );

        Ok(Self {
            snapshot: ArcSwap::new(snapshot.into()),
            generation: AtomicU64::new(0),
            engine,
            directory,
        })
    }

    /// The snapshot currently used to answer queries.
    pub fn active(&self) -> Arc<Snapshot> {
        self.snapshot.load_full()
    }

    /// Make `snapshot` the active one and return its generation.
    pub fn swap(&self, snapshot: Snapshot) -> u64 {
        self.snapshot.store(snapshot.into());
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Number of snapshots swapped in since startup.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn engine(&self) -> &DecisionEngine {
        &self.engine
    }

    pub fn decide(&self, user: &str, domain: &str) -> Decision {
        let snapshot = self.snapshot.load();
        self.engine.decide(&snapshot, user, domain)
    }
}

impl BlockChecker for BlocklistService {
    fn is_blocked(&self, user: &str, domain: &str) -> bool {
        self.decide(user, domain).is_blocked()
    }
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod service_tests;
