//! Entry paths and fields
//!
//! An entry path is `<group-path>/<field>`: at least two non-empty segments
//! joined by `/`, where the last segment names one of the stored fields.

use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Result};
use glob::{MatchOptions, Pattern};

use crate::error::LockboxError;

pub const SEPARATOR: char = '/';

/// The closed set of fields an entity can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldKind {
    Notes,
    Otp,
    Password,
    Url,
}

impl FieldKind {
    pub const ALL: [FieldKind; 4] = [Self::Notes, Self::Otp, Self::Password, Self::Url];

    /// Name used in entry paths and output
    pub fn name(&self) -> &'static str {
        match self {
            Self::Notes => "notes",
            Self::Otp => "otp",
            Self::Password => "password",
            Self::Url => "url",
        }
    }

    /// Key the field is stored under inside the container
    pub fn storage_key(&self) -> &'static str {
        match self {
            Self::Notes => "Notes",
            Self::Otp => "otp",
            Self::Password => "Password",
            Self::Url => "URL",
        }
    }

    /// Single byte identifying the field in checksums
    pub fn tag(&self) -> u8 {
        self.name().as_bytes()[0]
    }

    pub fn is_multiline(&self) -> bool {
        matches!(self, Self::Notes)
    }

    /// Case-insensitive lookup by name or storage key
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| {
            kind.name().eq_ignore_ascii_case(name) || kind.storage_key().eq_ignore_ascii_case(name)
        })
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FieldKind {
    type Err = LockboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| {
            LockboxError::BadField(format!(
                "'{}' is not one of: {}",
                s,
                Self::ALL.map(|k| k.name()).join(", ")
            ))
        })
    }
}

/// A field value; only notes may span multiple lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Notes(String),
    Otp(String),
    Password(String),
    Url(String),
}

impl FieldValue {
    pub fn new(kind: FieldKind, value: String) -> Result<Self> {
        if value.is_empty() {
            bail!(LockboxError::BadField(format!("empty {} not allowed", kind)));
        }
        if !kind.is_multiline() && value.contains('\n') {
            bail!(LockboxError::BadField(format!(
                "{} must be a single line",
                kind
            )));
        }

        Ok(match kind {
            FieldKind::Notes => Self::Notes(value),
            FieldKind::Otp => Self::Otp(value),
            FieldKind::Password => Self::Password(value),
            FieldKind::Url => Self::Url(value),
        })
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            Self::Notes(_) => FieldKind::Notes,
            Self::Otp(_) => FieldKind::Otp,
            Self::Password(_) => FieldKind::Password,
            Self::Url(_) => FieldKind::Url,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Notes(v) | Self::Otp(v) | Self::Password(v) | Self::Url(v) => v,
        }
    }
}

fn check_segments(path: &str) -> Result<Vec<&str>> {
    if path.is_empty() {
        bail!(LockboxError::BadPath("path cannot be empty".to_string()));
    }
    if path.starts_with(SEPARATOR) || path.ends_with(SEPARATOR) {
        bail!(LockboxError::BadPath(format!(
            "'{}' must not start or end with '{}'",
            path, SEPARATOR
        )));
    }
    let segments: Vec<&str> = path.split(SEPARATOR).collect();
    if segments.iter().any(|s| s.is_empty()) {
        bail!(LockboxError::BadPath(format!(
            "'{}' contains an empty segment",
            path
        )));
    }
    Ok(segments)
}

/// Validate a group path (one or more non-empty segments)
pub fn validate_group(path: &str) -> Result<()> {
    check_segments(path).map(|_| ())
}

/// Split an entry path into its group path and field
pub fn split(path: &str) -> Result<(String, FieldKind)> {
    let segments = check_segments(path)?;
    if segments.len() < 2 {
        bail!(LockboxError::BadPath(format!(
            "'{}' needs a group and a field",
            path
        )));
    }
    let field: FieldKind = base(path).parse()?;
    Ok((directory(path).to_string(), field))
}

/// Last segment
pub fn base(path: &str) -> &str {
    path.rsplit_once(SEPARATOR).map_or(path, |(_, last)| last)
}

/// Everything but the last segment
pub fn directory(path: &str) -> &str {
    path.rsplit_once(SEPARATOR).map_or("", |(dir, _)| dir)
}

/// Join a group path and a segment
pub fn join(group: &str, segment: &str) -> String {
    if group.is_empty() {
        segment.to_string()
    } else {
        format!("{}{}{}", group, SEPARATOR, segment)
    }
}

/// Whether `path` ends with `/<field>`
pub fn is_leaf_attribute(path: &str, field: &str) -> bool {
    path.len() > field.len() + 1
        && path.ends_with(field)
        && path[..path.len() - field.len()].ends_with(SEPARATOR)
}

/// Whether the pattern uses glob metacharacters
pub fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

/// Shell-style match of a whole group path.
///
/// `*` stays within one segment, except that a trailing `*` selects every
/// path under the prefix.
pub fn glob(pattern: &str, candidate: &str) -> Result<bool> {
    let compiled = Pattern::new(pattern)
        .map_err(|e| LockboxError::BadPath(format!("invalid pattern '{}': {}", pattern, e)))?;
    let options = MatchOptions {
        case_sensitive: true,
        require_literal_separator: !pattern.ends_with('*'),
        require_literal_leading_dot: false,
    };
    Ok(compiled.matches_with(candidate, options))
}
