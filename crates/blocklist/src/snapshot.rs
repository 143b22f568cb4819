use std::{collections::HashMap, sync::Arc, time::SystemTime};

use crate::matcher::{BlocklistMatcher, MatchKind};

/// Identity of a blocklist file on disk, used to skip re-parsing unchanged files.
///
/// The inode change time catches rewrites that restore the old mtime, since it cannot be
/// set from userspace. Two same-length writes within one timestamp tick of the
/// filesystem still look identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileFingerprint {
    pub modified: SystemTime,
    pub len: u64,
    pub inode: u64,
    /// Inode change time as (seconds, nanoseconds).
    pub changed: (i64, i64),
}

/// A pattern line that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedLine {
    /// 1-based line number.
    pub line: usize,
    pub reason: String,
}

/// The set of blocked patterns for one user. Immutable once built.
#[derive(Debug, Default)]
pub struct Blocklist {
    matcher: BlocklistMatcher,
    fingerprint: Option<FileFingerprint>,
}

impl Blocklist {
    /// Parse newline separated patterns.
    ///
    /// Blank lines are ignored, `#` starts a comment that runs to the end of the line.
    /// Lines that are not valid patterns are returned alongside the blocklist.
    pub fn parse(contents: &str) -> (Self, Vec<RejectedLine>) {
        let mut matcher = BlocklistMatcher::default();
        let mut rejected = Vec::new();

        for (idx, raw) in contents.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }

            if let Err(e) = matcher.insert(line) {
                rejected.push(RejectedLine {
                    line: idx + 1,
                    reason: e.to_string(),
                });
            }
        }

        (
            Self {
                matcher,
                fingerprint: None,
            },
            rejected,
        )
    }

    pub(crate) fn with_fingerprint(mut self, fingerprint: Option<FileFingerprint>) -> Self {
        self.fingerprint = fingerprint;
        self
    }

    pub fn fingerprint(&self) -> Option<FileFingerprint> {
        self.fingerprint
    }

    pub fn find(&self, domain: &str) -> Option<MatchKind> {
        self.matcher.find(domain)
    }

    pub fn is_blocked(&self, domain: &str) -> bool {
        self.matcher.is_blocked(domain)
    }

    /// Number of distinct patterns.
    pub fn len(&self) -> usize {
        self.matcher.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matcher.is_empty()
    }
}

/// Counters describing how a snapshot was built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotStats {
    pub users: usize,
    pub patterns: usize,
    /// Blocklists carried over unchanged from the previous snapshot.
    pub reused: usize,
    /// Files skipped because they could not be read or decoded.
    pub rejected_files: usize,
    pub rejected_lines: usize,
}

/// Point-in-time view of every user's blocklist.
#[derive(Debug, Default)]
pub struct Snapshot {
    users: HashMap<String, Arc<Blocklist>>,
    stats: SnapshotStats,
}

impl Snapshot {
    pub(crate) fn new(users: HashMap<String, Arc<Blocklist>>, mut stats: SnapshotStats) -> Self {
        stats.users = users.len();
        stats.patterns = users.values().map(|b| b.len()).sum();
        Self { users, stats }
    }

    /// Build a snapshot from in-memory pattern lists.
    pub fn from_patterns<'a, I, P>(entries: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = (&'a str, P)>,
        P: IntoIterator<Item = &'a str>,
    {
        let mut users = HashMap::new();
        for (user, patterns) in entries {
            let matcher = BlocklistMatcher::load(patterns)?;
            users.insert(
                user.to_string(),
                Arc::new(Blocklist {
                    matcher,
                    fingerprint: None,
                }),
            );
        }
        Ok(Self::new(users, SnapshotStats::default()))
    }

    pub fn get(&self, user: &str) -> Option<&Blocklist> {
        self.users.get(user).map(Arc::as_ref)
    }

    pub(crate) fn get_shared(&self, user: &str) -> Option<&Arc<Blocklist>> {
        self.users.get(user)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn stats(&self) -> SnapshotStats {
        self.stats
    }

    /// True when the source had candidate files but none of them loaded.
    pub fn is_fully_rejected(&self) -> bool {
        self.users.is_empty() && self.stats.rejected_files > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_skips_comments_and_blanks() {
        let (list, rejected) = Blocklist::parse(
            "# ads for alice\n\n  Ads.Example.com  \n*.tracker.net # inline\n\t\n#*.ignored.org\n",
        );
        assert!(rejected.is_empty());
        assert_eq!(list.len(), 2);
        assert!(list.is_blocked("ads.example.com"));
        assert!(list.is_blocked("x.tracker.net"));
        assert!(!list.is_blocked("a.ignored.org"));
    }

    #[test]
    fn test_parse_reports_bad_lines() {
        let (list, rejected) = Blocklist::parse("good.com\nbad.*.com\nalso-good.org\r\n");
        assert_eq!(list.len(), 2);
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].line, 2);
        assert!(list.is_blocked("also-good.org"));
    }

    #[test]
    fn test_snapshot_from_patterns() {
        let snapshot = Snapshot::from_patterns([
            ("alice", vec!["a.com", "*.b.com"]),
            ("bob", vec![]),
        ])
        .unwrap();

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.stats().patterns, 2);
        assert!(snapshot.get("alice").unwrap().is_blocked("a.com"));
        assert!(snapshot.get("bob").unwrap().is_empty());
        assert!(snapshot.get("carol").is_none());
        assert!(!snapshot.is_fully_rejected());
    }
}
