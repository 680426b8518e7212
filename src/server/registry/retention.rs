use std::cmp::Reverse;

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref SEMVER_TAG: Regex = Regex::new(r"^v?(\d+)\.(\d+)\.(\d+)$").unwrap();
}

/// Tag that is never deleted, and kept when `keep_latest` is set
pub const LATEST_TAG: &str = "latest";

/// A `major.minor.patch` version parsed from an image tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SemVer {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl SemVer {
    /// Parse `1.2.3` or `v1.2.3`. Anything else (pre-release suffixes
    /// included) is not a semver tag.
    pub fn parse(tag: &str) -> Option<Self> {
        let caps = SEMVER_TAG.captures(tag)?;
        Some(Self {
            major: caps[1].parse().ok()?,
            minor: caps[2].parse().ok()?,
            patch: caps[3].parse().ok()?,
        })
    }
}

/// A tag and its last update time
#[derive(Debug, Clone, PartialEq)]
pub struct TagInfo {
    pub tag: String,
    pub updated_at: Option<DateTime<Utc>>,
}

impl TagInfo {
    pub fn new(tag: impl Into<String>, updated_at: Option<DateTime<Utc>>) -> Self {
        Self {
            tag: tag.into(),
            updated_at,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetentionDecision {
    pub keep: Vec<String>,
    pub delete: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub keep_latest: bool,
    pub depth: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            keep_latest: true,
            depth: 3,
        }
    }
}

impl RetentionPolicy {
    /// Split a repository's tags into the ones to keep and the ones to delete.
    ///
    /// Semver tags win: the newest `depth` versions are kept and older ones
    /// deleted, while non-semver tags are left alone. Without any semver tag
    /// the newest `depth` tags by update time are kept instead. `latest` never
    /// counts towards `depth` and is never deleted; `keep_latest` only decides
    /// whether it is listed as kept.
    pub fn decide(&self, tags: &[TagInfo]) -> RetentionDecision {
        let mut decision = RetentionDecision::default();
        let mut semver = Vec::new();
        let mut other = Vec::new();

        for info in tags {
            if info.tag == LATEST_TAG {
                if self.keep_latest {
                    decision.keep.push(info.tag.clone());
                }
            } else if let Some(version) = SemVer::parse(&info.tag) {
                semver.push((version, info));
            } else {
                other.push(info);
            }
        }

        if !semver.is_empty() {
            semver.sort_by_key(|(version, _)| Reverse(*version));
            for (i, (_, info)) in semver.into_iter().enumerate() {
                if i < self.depth {
                    decision.keep.push(info.tag.clone());
                } else {
                    decision.delete.push(info.tag.clone());
                }
            }
        } else {
            // Unknown update times sort as oldest
            other.sort_by_key(|info| Reverse(info.updated_at));
            for (i, info) in other.into_iter().enumerate() {
                if i < self.depth {
                    decision.keep.push(info.tag.clone());
                } else {
                    decision.delete.push(info.tag.clone());
                }
            }
        }

        decision
    }
}
