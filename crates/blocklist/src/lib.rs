//! Per-user domain blocklists: parsing, immutable snapshots and the allow/block decision.

mod decision;
mod loader;
mod matcher;
mod snapshot;

pub use decision::{BlockReason, Decision, DecisionEngine, UnknownUserPolicy};
pub use loader::{LoadError, load_dir, reload_dir};
pub use matcher::{BlocklistMatcher, MatchKind};
pub use snapshot::{Blocklist, FileFingerprint, RejectedLine, Snapshot, SnapshotStats};
