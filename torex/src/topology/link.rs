use std::collections::BTreeSet;

use super::TorusShape;
use crate::error::{Result, TorexError};
use crate::types::Rank;

/// An unordered pair of neighbouring ranks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Link {
    lo: Rank,
    hi: Rank,
}

impl Link {
    pub fn new(a: Rank, b: Rank) -> Self {
        Self {
            lo: a.min(b),
            hi: a.max(b),
        }
    }

    pub fn endpoints(self) -> (Rank, Rank) {
        (self.lo, self.hi)
    }

    pub fn touches(self, rank: Rank) -> bool {
        self.lo == rank || self.hi == rank
    }
}

impl std::fmt::Display for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.lo, self.hi)
    }
}

impl std::str::FromStr for Link {
    type Err = TorexError;

    fn from_str(s: &str) -> Result<Self> {
        let (a, b) = s
            .split_once('-')
            .ok_or_else(|| TorexError::InvalidLink(format!("'{s}' is not of the form a-b")))?;
        let parse = |p: &str| {
            p.trim()
                .parse::<Rank>()
                .map_err(|e| TorexError::InvalidLink(format!("'{s}': {e}")))
        };
        let (a, b) = (parse(a)?, parse(b)?);
        if a == b {
            return Err(TorexError::InvalidLink(format!("'{s}' is a self-loop")));
        }
        Ok(Link::new(a, b))
    }
}

/// The set of links declared failed for the lifetime of a collective call.
///
/// Algorithms route around these links without probing them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct LinkFailures {
    links: BTreeSet<Link>,
}

impl LinkFailures {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn from_links(links: impl IntoIterator<Item = Link>) -> Self {
        Self {
            links: links.into_iter().collect(),
        }
    }

    pub fn insert(&mut self, link: Link) -> bool {
        self.links.insert(link)
    }

    pub fn is_failed(&self, a: Rank, b: Rank) -> bool {
        self.links.contains(&Link::new(a, b))
    }

    pub fn contains(&self, link: Link) -> bool {
        self.links.contains(&link)
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = Link> + '_ {
        self.links.iter().copied()
    }

    /// Check every declared link joins two in-range torus neighbours.
    pub fn validate(&self, shape: &TorusShape) -> Result<()> {
        for link in &self.links {
            let (a, b) = link.endpoints();
            shape.check_rank(a)?;
            shape.check_rank(b)?;
            if shape.adjacency(a, b).is_none() {
                return Err(TorexError::NotAdjacent { a, b });
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for LinkFailures {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.links.is_empty() {
            return f.write_str("none");
        }
        let parts: Vec<String> = self.links.iter().map(Link::to_string).collect();
        f.write_str(&parts.join(","))
    }
}

impl std::str::FromStr for LinkFailures {
    type Err = TorexError;

    /// Parse `"0-1,5-6"`; an empty string or `"none"` means no failures.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("none") {
            return Ok(Self::none());
        }
        s.split(',')
            .map(str::parse::<Link>)
            .collect::<Result<BTreeSet<Link>>>()
            .map(|links| Self { links })
    }
}
