use std::{path::PathBuf, sync::Arc, time::Instant};

use blockcheck_blocklist::{LoadError, SnapshotStats, reload_dir};
use tokio::{
    signal::unix::{SignalKind, signal},
    sync::{Mutex, Notify},
    task::JoinHandle,
};

use super::service::BlocklistService;

#[derive(Debug, thiserror::Error)]
pub enum ReloadError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("every blocklist file in {} was rejected ({rejected} files)", path.display())]
    NothingParsed { path: PathBuf, rejected: usize },
    #[error("reload task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Serializes blocklist reloads and coalesces triggers that arrive while one is running.
pub struct ReloadController {
    service: Arc<BlocklistService>,
    pending: Notify,
    running: Mutex<()>,
}

impl ReloadController {
    pub fn new(service: Arc<BlocklistService>) -> Self {
        Self {
            service,
            pending: Notify::new(),
            running: Mutex::new(()),
        }
    }

    /// Request a reload from the [`ReloadController::run`] loop.
    ///
    /// Any number of calls before the loop picks the request up count as one.
    pub fn trigger(&self) {
        self.pending.notify_one();
    }

    /// Reload the blocklist directory now and swap the result in.
    ///
    /// On error the active snapshot is left untouched.
    pub async fn reload(&self) -> Result<SnapshotStats, ReloadError> {
        let _running = self.running.lock().await;
        let started = Instant::now();

        let directory = self.service.directory().to_path_buf();
        let previous = self.service.active();

        let snapshot = {
            let directory = directory.clone();
            tokio::task::spawn_blocking(move || reload_dir(&directory, Some(previous.as_ref()))).await??
        };

        let stats = snapshot.stats();
        if snapshot.is_fully_rejected() {
            return Err(ReloadError::NothingParsed {
                path: directory,
                rejected: stats.rejected_files,
            });
        }

        let generation = self.service.swap(snapshot);
        tracing::info!(
            "Reloaded blocklists (generation {}): {} users, {} patterns, {} unchanged, {} rejected files in {:?}",
            generation,
            stats.users,
            stats.patterns,
            stats.reused,
            stats.rejected_files,
            started.elapsed()
        );

        Ok(stats)
    }

    /// Handle triggers until the task is cancelled.
    pub async fn run(&self) {
        loop {
            self.pending.notified().await;

            if let Err(e) = self.reload().await {
                tracing::error!(
                    "Blocklist reload failed, keeping generation {}: {}",
                    self.service.generation(),
                    e
                );
            }
        }
    }
}

/// Trigger a reload on every `SIGUSR1`.
pub fn spawn_signal_listener(controller: Arc<ReloadController>) -> anyhow::Result<JoinHandle<()>> {
    let mut usr1 = signal(SignalKind::user_defined1())?;

    Ok(tokio::spawn(async move {
        while usr1.recv().await.is_some() {
            tracing::info!("Received SIGUSR1, reloading blocklists");
            controller.trigger();
        }
    }))
}

#[cfg(test)]
#[path = "reload_tests.rs"]
mod reload_tests;
