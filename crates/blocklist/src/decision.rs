use crate::{matcher::MatchKind, snapshot::Snapshot};

/// What to answer for a user that has no blocklist file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnknownUserPolicy {
    #[default]
    Allow,
    Block,
}

/// Outcome of a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Blocked(BlockReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    Exact,
    Wildcard,
    UnknownUser,
}

impl Decision {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Decision::Blocked(_))
    }
}

impl From<MatchKind> for BlockReason {
    fn from(value: MatchKind) -> Self {
        match value {
            MatchKind::Exact => BlockReason::Exact,
            MatchKind::Wildcard => BlockReason::Wildcard,
        }
    }
}

/// Evaluates queries against a snapshot. Holds no data of its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecisionEngine {
    unknown_user: UnknownUserPolicy,
}

impl DecisionEngine {
    pub fn new(unknown_user: UnknownUserPolicy) -> Self {
        Self { unknown_user }
    }

    pub fn unknown_user_policy(&self) -> UnknownUserPolicy {
        self.unknown_user
    }

    pub fn decide(&self, snapshot: &Snapshot, user: &str, domain: &str) -> Decision {
        let Some(blocklist) = snapshot.get(user) else {
            return match self.unknown_user {
                UnknownUserPolicy::Allow => Decision::Allowed,
                UnknownUserPolicy::Block => Decision::Blocked(BlockReason::UnknownUser),
            };
        };

        match blocklist.find(domain) {
            Some(kind) => Decision::Blocked(kind.into()),
            None => Decision::Allowed,
        }
    }

    pub fn is_blocked(&self, snapshot: &Snapshot, user: &str, domain: &str) -> bool {
        self.decide(snapshot, user, domain).is_blocked()
    }
}
