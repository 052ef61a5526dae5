//! Version parsing for migration filenames
//!
//! Migration files are named `<version>__<description>.<ext>`. The version
//! token is coerced leniently: a leading `v` is tolerated, missing minor or
//! patch components default to zero, and anything after `-` is kept as a
//! pre-release tag.

use std::cmp::Ordering;
use std::fmt;

use crate::error::{MigrateError, MigrateResult};

/// Separator between the version token and the description token
const SEPARATOR: &str = "__";

/// A semantic version extracted from a migration filename
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub pre: Option<String>,
}

impl Version {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            pre: None,
        }
    }

    /// Lenient coercion of a version token.
    ///
    /// Accepts `1`, `1.2`, `1.2.3`, `v2`, and `1.2.3-beta.1`. Returns `None`
    /// when the token does not start with a numeric component.
    pub fn coerce(token: &str) -> Option<Self> {
        let token = token.strip_prefix(['v', 'V']).unwrap_or(token);
        let (numeric, pre) = match token.split_once('-') {
            Some((n, p)) if !p.is_empty() => (n, Some(p.to_string())),
            Some((n, _)) => (n, None),
            None => (token, None),
        };

        let mut components = [0u64; 3];
        for (i, part) in numeric.splitn(3, '.').enumerate() {
            // Lenient: take the leading digit run of each component.
            let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
            if digits.is_empty() {
                if i == 0 {
                    return None;
                }
                break;
            }
            components[i] = digits.parse().ok()?;
        }

        Some(Self {
            major: components[0],
            minor: components[1],
            patch: components[2],
            pre,
        })
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.pre, &other.pre) {
                (None, None) => Ordering::Equal,
                // A pre-release sorts before the same numeric triple.
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(a), Some(b)) => compare_pre(a, b),
            })
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.pre {
            write!(f, "-{}", pre)?;
        }
        Ok(())
    }
}

/// Dot-wise pre-release comparison: numeric identifiers compare numerically
/// and sort before alphanumeric ones; otherwise ASCII order applies.
fn compare_pre(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) => {
                let ord = match (l.parse::<u64>(), r.parse::<u64>()) {
                    (Ok(ln), Ok(rn)) => ln.cmp(&rn),
                    (Ok(_), Err(_)) => Ordering::Less,
                    (Err(_), Ok(_)) => Ordering::Greater,
                    (Err(_), Err(_)) => l.cmp(r),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

/// Version and description extracted from a well-formed migration filename
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    pub version: Version,
    pub description: String,
}

/// Parse a bare migration filename.
///
/// Returns `Ok(None)` for files that are not migrations (hidden files,
/// unversioned names). A coercible version with no description token is a
/// hard error: the file was clearly meant to be a migration.
pub fn parse_filename(filename: &str) -> MigrateResult<Option<ParsedName>> {
    if filename.starts_with('.') {
        return Ok(None);
    }

    let (version_token, rest) = match filename.split_once(SEPARATOR) {
        Some((v, rest)) => (v, Some(rest)),
        None => (filename, None),
    };

    let version = Version::coerce(version_token);
    match (version, rest) {
        (None, None) => Ok(None),
        (None, Some(_)) => {
            // Soft warning, surfaced only when debug logging is enabled.
            tracing::debug!(file = filename, "file looks like a migration but has no parseable version; skipping");
            Ok(None)
        }
        (Some(_), None) => Err(MigrateError::BadFilename {
            filename: filename.to_string(),
        }),
        (Some(version), Some(rest)) => {
            let description = match rest.rsplit_once('.') {
                Some((stem, _ext)) if !stem.is_empty() => stem.to_string(),
                _ => rest.to_string(),
            };
            Ok(Some(ParsedName {
                version,
                description,
            }))
        }
    }
}

/// File extension of a migration filename, used as the history record's
/// script type
pub fn script_type(filename: &str) -> String {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_string())
        .unwrap_or_default()
}
