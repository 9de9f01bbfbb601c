//! Semantic version parsing and tag variant matching.
//!
//! Registries mix semver tags with channel tags (`latest`, `main`) and
//! variant-suffixed tags (`1.20-alpine`). Everything here is lenient: a
//! version is two or three dot-separated integers, optionally prefixed with
//! `v`, optionally followed by a pre-release or build segment.

use std::cmp::Ordering;
use std::sync::LazyLock;

use regex::Regex;

/// A parsed semantic version. Ordering ignores the original string, so
/// `v1.2.3` and `1.2.3` compare equal.
#[derive(Debug, Clone, Default)]
pub struct SemVer {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    /// Pre-release or build segment including its leading `-` or `+`.
    pub pre: String,
    /// The string the version was parsed from.
    pub original: String,
}

impl SemVer {
    /// Parse a version string. Returns `None` for anything that is not two
    /// or three dot-separated integers after stripping a leading `v`.
    pub fn parse(s: &str) -> Option<Self> {
        let original = s.to_string();
        let mut rest = s.strip_prefix('v').unwrap_or(s);

        let mut pre = String::new();
        if let Some(idx) = rest.find(['-', '+']) {
            pre = rest[idx..].to_string();
            rest = &rest[..idx];
        }

        let parts: Vec<&str> = rest.split('.').collect();
        if parts.len() < 2 || parts.len() > 3 {
            return None;
        }

        let major = parts[0].parse().ok()?;
        let minor = parts[1].parse().ok()?;
        let patch = if parts.len() == 3 {
            parts[2].parse().ok()?
        } else {
            0
        };

        Some(Self {
            major,
            minor,
            patch,
            pre,
            original,
        })
    }
}

impl PartialEq for SemVer {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SemVer {}

impl PartialOrd for SemVer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SemVer {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then(self.patch.cmp(&other.patch))
            // A pre-release sorts below the same version without one.
            .then_with(|| match (self.pre.is_empty(), other.pre.is_empty()) {
                (false, true) => Ordering::Less,
                (true, false) => Ordering::Greater,
                _ => self.pre.cmp(&other.pre),
            })
    }
}

/// Return the highest parseable version from a list, in its original
/// spelling. Non-semver entries are ignored.
pub fn highest_semver<S: AsRef<str>>(versions: &[S]) -> Option<String> {
    versions
        .iter()
        .filter_map(|v| SemVer::parse(v.as_ref()))
        .max()
        .map(|sv| sv.original)
}

/// The (prefix, suffix) pair framing the semver portion of a tag. Two tags
/// share a variant iff both parts agree, so `1.20-alpine` is only ever
/// compared against other `-alpine` tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub prefix: String,
    pub suffix: String,
}

static SEMVER_IN_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*?)(\d+\.\d+(?:\.\d+)?)(.*?)$").unwrap());

/// Split a tag into its variant pattern and embedded semver.
/// Returns `None` if the tag carries no version.
pub fn extract_variant(tag: &str) -> Option<(Variant, SemVer)> {
    let caps = SEMVER_IN_TAG.captures(tag)?;
    let sv = SemVer::parse(&caps[2])?;
    Some((
        Variant {
            prefix: caps[1].to_string(),
            suffix: caps[3].to_string(),
        },
        sv,
    ))
}

/// Find the tag with the highest semver sharing the deployed tag's variant.
///
/// Pre-release candidates are skipped. Returns the deployed tag itself when
/// nothing newer matches, and the sentinel `"-"` when the deployed tag has
/// no embedded version at all.
pub fn highest_matching_tag(deployed_tag: &str, all_tags: &[String]) -> String {
    let Some((deployed_variant, deployed_sv)) = extract_variant(deployed_tag) else {
        return "-".to_string();
    };

    let mut best_tag = deployed_tag.to_string();
    let mut best_sv = deployed_sv;

    for tag in all_tags {
        let Some((variant, sv)) = extract_variant(tag) else {
            continue;
        };
        if variant != deployed_variant {
            continue;
        }
        if !sv.pre.is_empty() {
            continue;
        }
        if best_sv < sv {
            best_sv = sv;
            best_tag = tag.clone();
        }
    }

    best_tag
}
