//! Domain names as sequences of labels.
//!
//! Equality ignores ASCII case and the absolute flag. Names are partially ordered by
//! suffix containment: `a < b` when `a` is a proper subdomain of `b`, and names that
//! share no suffix relationship are not comparable.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use anyhow::Result;

pub const MAX_LABEL_LEN: usize = 63;
pub const MAX_NAME_LEN: usize = 255;

const WILDCARD: &str = "*";

#[derive(Debug, Clone, Default)]
pub struct Name {
    labels: Vec<String>,
    absolute: bool,
}

impl Name {
    pub fn new(labels: Vec<String>, absolute: bool) -> Result<Self> {
        let mut total = 1;
        for label in &labels {
            if label.is_empty() {
                anyhow::bail!("empty label in name");
            }
            if label.len() > MAX_LABEL_LEN {
                anyhow::bail!("label {:?} is longer than {} bytes", label, MAX_LABEL_LEN);
            }
            total += label.len() + 1;
        }
        if total > MAX_NAME_LEN {
            anyhow::bail!("name is longer than {} bytes", MAX_NAME_LEN);
        }
        Ok(Self { labels, absolute })
    }

    /// Parse a dotted name. A trailing dot makes the name absolute, `"."` is the root.
    pub fn parse(s: &str) -> Result<Self> {
        if s == "." {
            return Ok(Self::root());
        }
        let (body, absolute) = match s.strip_suffix('.') {
            Some(b) => (b, true),
            None => (s, false),
        };
        if body.is_empty() {
            return Ok(Self::default());
        }
        Self::new(body.split('.').map(str::to_owned).collect(), absolute)
    }

    /// A name consisting of exactly one label, which may contain dots or spaces.
    pub fn from_label(label: &str) -> Result<Self> {
        Self::new(vec![label.to_owned()], false)
    }

    pub fn root() -> Self {
        Self {
            labels: Vec::new(),
            absolute: true,
        }
    }

    /// The `*` name used by queries that want to see all traffic.
    pub fn wildcard() -> Self {
        Self {
            labels: vec![WILDCARD.to_owned()],
            absolute: false,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        self.labels.len() == 1 && self.labels[0] == WILDCARD
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    pub fn set_absolute(&mut self, absolute: bool) {
        self.absolute = absolute;
    }

    /// Concatenate `other` after `self`. The result takes `other`'s absolute flag.
    pub fn join(&self, other: &Name) -> Result<Name> {
        let mut labels = self.labels.clone();
        labels.extend_from_slice(&other.labels);
        Name::new(labels, other.absolute)
    }

    fn suffix_matches(&self, other: &Name, n: usize) -> bool {
        let a = &self.labels[self.labels.len() - n..];
        let b = &other.labels[other.labels.len() - n..];
        a.iter().zip(b).all(|(x, y)| x.eq_ignore_ascii_case(y))
    }

    /// True when the shorter of the two names is a suffix of the longer one.
    pub fn is_related(&self, other: &Name) -> bool {
        let n = self.len().min(other.len());
        self.suffix_matches(other, n)
    }

    /// True when `self` is a proper subdomain of `other`.
    pub fn is_subdomain_of(&self, other: &Name) -> bool {
        self.len() > other.len() && self.suffix_matches(other, other.len())
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.labels.len() == other.labels.len()
            && self
                .labels
                .iter()
                .zip(&other.labels)
                .all(|(a, b)| a.eq_ignore_ascii_case(b))
    }
}

impl Eq for Name {}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.labels.len().hash(state);
        for label in &self.labels {
            label.to_ascii_lowercase().hash(state);
        }
    }
}

impl PartialOrd for Name {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if !self.is_related(other) {
            return None;
        }
        if self.is_subdomain_of(other) {
            Some(Ordering::Less)
        } else if other.is_subdomain_of(self) {
            Some(Ordering::Greater)
        } else {
            Some(Ordering::Equal)
        }
    }
}

impl FromStr for Name {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Name::parse(s)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.labels.is_empty() && self.absolute {
            return write!(f, ".");
        }
        write!(f, "{}", self.labels.join("."))?;
        if self.absolute {
            write!(f, ".")?;
        }
        Ok(())
    }
}
