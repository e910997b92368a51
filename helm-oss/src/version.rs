//! Chart version parsing.
//!
//! Helm accepts "loose" semantic versions: a leading `v`, and a missing minor
//! or patch component (`1.0` means `1.0.0`). Strict [`semver`] parsing would
//! reject those, so the numeric core is normalized first.

use semver::Version;
use std::cmp::Ordering;

use crate::error::{RepoError, RepoResult};

/// Parse a chart version string into a semantic version.
pub fn parse_version(raw: &str) -> RepoResult<Version> {
    let invalid = |reason: &str| RepoError::InvalidVersion {
        version: raw.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = raw.trim();
    let without_v = trimmed.strip_prefix('v').unwrap_or(trimmed);
    if without_v.is_empty() {
        return Err(invalid("empty version"));
    }

    let split_at = without_v.find(['-', '+']).unwrap_or(without_v.len());
    let (core, suffix) = without_v.split_at(split_at);

    let parts: Vec<&str> = core.split('.').collect();
    if parts.len() > 3 {
        return Err(invalid("too many version components"));
    }

    let mut numbers = [0u64; 3];
    for (slot, part) in numbers.iter_mut().zip(&parts) {
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid("version components must be numeric"));
        }
        *slot = part
            .parse()
            .map_err(|_| invalid("version component out of range"))?;
    }

    let normalized = format!("{}.{}.{}{}", numbers[0], numbers[1], numbers[2], suffix);
    Version::parse(&normalized).map_err(|e| invalid(&e.to_string()))
}

/// Semantic equality: build metadata is ignored, `1.0` equals `1.0.0`.
pub fn same_version(a: &Version, b: &Version) -> bool {
    a.cmp_precedence(b) == Ordering::Equal
}

/// True when both strings parse and denote the same semantic version.
pub fn versions_match(a: &str, b: &str) -> bool {
    match (parse_version(a), parse_version(b)) {
        (Ok(a), Ok(b)) => same_version(&a, &b),
        _ => false,
    }
}
