//! Typed migration versions and the naming schemes that produce them
//!
//! Ordering never falls back to comparing filenames as strings: a scheme
//! turns the leading token of a filename into numeric segments, and
//! [`Version`] compares those segments. Swapping the scheme changes how
//! files are named without touching the planner or executor.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A totally ordered migration identifier
///
/// Equality and ordering use the numeric segments only, so `001` and `1`
/// are the same version. The raw token is kept for display and is what the
/// ledger stores.
#[derive(Debug, Clone)]
pub struct Version {
    raw: String,
    segments: Vec<u64>,
}

impl Version {
    /// Build a version from its raw token and already-parsed segments
    pub fn new(raw: impl Into<String>, segments: Vec<u64>) -> Self {
        Self {
            raw: raw.into(),
            segments,
        }
    }

    /// The token as written in the source filename
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[u64] {
        &self.segments
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.segments == other.segments
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.segments.hash(state);
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.segments.cmp(&other.segments)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

/// Strategy for deriving versions from definition filenames
pub trait VersionScheme: Send + Sync {
    /// Split a filename stem (no extension) into its version and descriptive name
    fn split_stem<'a>(&self, stem: &'a str) -> Option<(Version, &'a str)>;

    /// Parse a bare version token, as stored in the ledger
    fn parse_token(&self, token: &str) -> Option<Version>;
}

static SEQUENCE_STEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)(?:__|_|-)(.+)$").expect("valid regex"));
static SEQUENCE_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+$").expect("valid regex"));
static TIMESTAMP_STEM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^((\d{8})_?(\d{6}))(?:__|_|-)(.+)$").expect("valid regex")
});
static TIMESTAMP_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{8})_?(\d{6})$").expect("valid regex"));

/// `001_create_cats`, `7-add-gender`, `0003__rename`
#[derive(Debug, Clone, Copy, Default)]
pub struct SequenceScheme;

impl VersionScheme for SequenceScheme {
    fn split_stem<'a>(&self, stem: &'a str) -> Option<(Version, &'a str)> {
        let caps = SEQUENCE_STEM.captures(stem)?;
        let token = caps.get(1)?.as_str();
        let name = caps.get(2)?.as_str();
        Some((self.parse_token(token)?, name))
    }

    fn parse_token(&self, token: &str) -> Option<Version> {
        if !SEQUENCE_TOKEN.is_match(token) {
            return None;
        }
        let value = token.parse::<u64>().ok()?;
        Some(Version::new(token, vec![value]))
    }
}

/// `20240101_120000_create_cats` or `20240101120000_create_cats`
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampScheme;

impl VersionScheme for TimestampScheme {
    fn split_stem<'a>(&self, stem: &'a str) -> Option<(Version, &'a str)> {
        let caps = TIMESTAMP_STEM.captures(stem)?;
        let token = caps.get(1)?.as_str();
        let name = caps.get(4)?.as_str();
        Some((self.parse_token(token)?, name))
    }

    fn parse_token(&self, token: &str) -> Option<Version> {
        let caps = TIMESTAMP_TOKEN.captures(token)?;
        let date = caps.get(1)?.as_str().parse::<u64>().ok()?;
        let time = caps.get(2)?.as_str().parse::<u64>().ok()?;
        Some(Version::new(token, vec![date, time]))
    }
}

/// Timestamps first, plain sequence numbers otherwise
#[derive(Debug, Clone, Copy, Default)]
pub struct ConventionScheme;

impl VersionScheme for ConventionScheme {
    fn split_stem<'a>(&self, stem: &'a str) -> Option<(Version, &'a str)> {
        TimestampScheme
            .split_stem(stem)
            .or_else(|| SequenceScheme.split_stem(stem))
    }

    fn parse_token(&self, token: &str) -> Option<Version> {
        TimestampScheme
            .parse_token(token)
            .or_else(|| SequenceScheme.parse_token(token))
    }
}
