use std::{
    collections::HashMap,
    fs, io,
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::snapshot::{Blocklist, FileFingerprint, Snapshot, SnapshotStats};

/// The blocklist directory as a whole could not be read.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("blocklist directory {} is unreadable: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("blocklist path {} is not a directory", .0.display())]
    NotADirectory(PathBuf),
}

/// Parse every blocklist file in `dir` into a fresh snapshot.
pub fn load_dir(dir: &Path) -> Result<Snapshot, LoadError> {
    reload_dir(dir, None)
}

/// Like [`load_dir`], but blocklists whose file is unchanged since `previous`
/// was built are shared instead of parsed again.
///
/// "Unchanged" means the same [`FileFingerprint`]. A same-length edit landing in the
/// same timestamp tick as the previous write is not detected until the file changes again.
pub fn reload_dir(dir: &Path, previous: Option<&Snapshot>) -> Result<Snapshot, LoadError> {
    let unreadable = |source: io::Error| LoadError::Unreadable {
        path: dir.to_path_buf(),
        source,
    };

    let meta = fs::metadata(dir).map_err(unreadable)?;
    if !meta.is_dir() {
        return Err(LoadError::NotADirectory(dir.to_path_buf()));
    }

    let entries = fs::read_dir(dir).map_err(unreadable)?;

    let mut users = HashMap::new();
    let mut stats = SnapshotStats::default();

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Skipping unreadable entry in {}: {}", dir.display(), e);
                stats.rejected_files += 1;
                continue;
            }
        };

        let path = entry.path();
        let user = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(name) => {
                tracing::warn!("Skipping blocklist file with non UTF-8 name: {:?}", name);
                stats.rejected_files += 1;
                continue;
            }
        };

        if user.starts_with('.') {
            tracing::debug!("Ignoring hidden file {}", path.display());
            continue;
        }

        // Follows symlinks, so a linked file counts as a regular file.
        let meta = match fs::metadata(&path) {
            Ok(meta) => meta,
            Err(e) => {
                tracing::warn!("Skipping blocklist {}: {}", path.display(), e);
                stats.rejected_files += 1;
                continue;
            }
        };

        if !meta.is_file() {
            tracing::debug!("Ignoring non-file entry {}", path.display());
            continue;
        }

        let fingerprint = meta.modified().ok().map(|modified| FileFingerprint {
            modified,
            len: meta.len(),
            inode: meta.ino(),
            changed: (meta.ctime(), meta.ctime_nsec()),
        });

        let unchanged = previous
            .and_then(|p| p.get_shared(&user))
            .filter(|existing| fingerprint.is_some() && existing.fingerprint() == fingerprint);

        if let Some(existing) = unchanged {
            users.insert(user, existing.clone());
            stats.reused += 1;
            continue;
        }

        match read_blocklist(&path, &user) {
            Ok((blocklist, rejected_lines)) => {
                stats.rejected_lines += rejected_lines;
                users.insert(user, Arc::new(blocklist.with_fingerprint(fingerprint)));
            }
            Err(e) => {
                tracing::warn!("Skipping malformed blocklist {}: {}", path.display(), e);
                stats.rejected_files += 1;
            }
        }
    }

    Ok(Snapshot::new(users, stats))
}

fn read_blocklist(path: &Path, user: &str) -> anyhow::Result<(Blocklist, usize)> {
    let bytes = fs::read(path)?;
    let contents = String::from_utf8(bytes)
        .map_err(|e| anyhow::anyhow!("invalid UTF-8 at byte {}", e.utf8_error().valid_up_to()))?;

    let (blocklist, rejected) = Blocklist::parse(&contents);
    for line in &rejected {
        tracing::warn!(
            "Ignoring pattern on line {} of {}'s blocklist: {}",
            line.line,
            user,
            line.reason
        );
    }

    Ok((blocklist, rejected.len()))
}
