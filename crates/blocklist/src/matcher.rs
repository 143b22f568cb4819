/// How a domain matched a blocklist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// The domain is listed verbatim.
    Exact,
    /// The domain is a strict subdomain of a `*.` pattern.
    Wildcard,
}

/// Node in the trie structure, representing a blocklist entry.
#[derive(Debug, Clone, Default)]
struct Node {
    label: Box<str>,
    wildcard: bool,
    blocked: bool,
    children: Vec<Node>,
}

impl Node {
    fn new(label: &str) -> Self {
        Self {
            label: label.into(),
            wildcard: false,
            blocked: false,
            children: Vec::new(),
        }
    }

    fn child(&self, label: &str) -> Option<&Node> {
        self.children
            .binary_search_by(|n| n.label.as_ref().cmp(label))
            .ok()
            .map(|i| &self.children[i])
    }

    fn child_mut(&mut self, label: &str) -> &mut Node {
        match self
            .children
            .binary_search_by(|l| l.label.as_ref().cmp(label))
        {
            Ok(i) => &mut self.children[i],
            Err(i) => {
                self.children.insert(i, Node::new(label));
                &mut self.children[i]
            }
        }
    }
}

/// Trie implementation of a blocklist matcher.
///
/// Labels are stored in reverse order so that `*.ads.example.com` and
/// `ads.example.com` share the `com -> example -> ads` path.
#[derive(Debug, Clone, Default)]
pub struct BlocklistMatcher {
    root: Node,
    len: usize,
}

impl BlocklistMatcher {
    /// Check if a given domain name is blocked.
    pub fn is_blocked(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Match a domain name, preferring an exact hit over a wildcard one.
    ///
    /// Names that fail normalization never match.
    pub fn find(&self, name: &str) -> Option<MatchKind> {
        let labels = normalize_to_rev_labels(name).ok()?;

        let mut node = &self.root;
        let mut wildcard_hit = false;

        for label in &labels {
            // A wildcard covers every name with at least one more label.
            if node.wildcard {
                wildcard_hit = true;
            }

            match node.child(label) {
                Some(child) => node = child,
                None => return wildcard_hit.then_some(MatchKind::Wildcard),
            }
        }

        if node.blocked && !labels.is_empty() {
            Some(MatchKind::Exact)
        } else if wildcard_hit {
            Some(MatchKind::Wildcard)
        } else {
            None
        }
    }

    /// Add a single pattern. Blank input is ignored.
    pub fn insert(&mut self, pattern: &str) -> anyhow::Result<()> {
        let pat = pattern.trim();
        if pat.is_empty() {
            return Ok(());
        }

        let (is_wildcard, name) = match pat.strip_prefix("*.") {
            Some(rest) => (true, rest),
            None => (false, pat),
        };

        if name.contains('*') {
            anyhow::bail!("wildcard is only allowed as a leading '*.': {}", pattern);
        }
        if name.contains(char::is_whitespace) {
            anyhow::bail!("whitespace inside pattern: {}", pattern);
        }

        let labels = normalize_to_rev_labels(name)?;
        if labels.is_empty() {
            anyhow::bail!("pattern has no labels: {}", pattern);
        }

        let mut node = &mut self.root;
        for label in &labels {
            node = node.child_mut(label);
        }

        let fresh = if is_wildcard {
            !std::mem::replace(&mut node.wildcard, true)
        } else {
            !std::mem::replace(&mut node.blocked, true)
        };
        if fresh {
            self.len += 1;
        }

        Ok(())
    }

    /// Load blocklist patterns from an iterator of strings.
    pub fn load<'a, I>(patterns: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut matcher = Self::default();
        for pat in patterns {
            matcher.insert(pat)?;
        }
        Ok(matcher)
    }

    /// Number of distinct patterns held.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Normalize to reverse labels:
/// "Ads.Example.COM." -> ["com","example","ads"]
fn normalize_to_rev_labels(input: &str) -> anyhow::Result<Vec<String>> {
    let s = input.trim().trim_end_matches('.').to_ascii_lowercase();

    // Convert Unicode to ASCII.
    let ascii =
        idna::domain_to_ascii(&s).map_err(|_| anyhow::anyhow!("invalid domain: {}", input))?;

    if ascii.split('.').any(|l| l.len() > 63) {
        anyhow::bail!("domain label too long: {}", input);
    }

    let mut labels: Vec<String> = ascii
        .split('.')
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();

    // Reverse for suffix matching
    labels.reverse();
    Ok(labels)
}
