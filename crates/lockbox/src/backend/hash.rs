//! Display values for query output
//!
//! `json` output never needs raw secrets: depending on `json.mode` values
//! are shown as-is, as truncated SHA-512 digests, or blanked. In hash mode
//! each entity also gets a short checksum summarizing all of its fields.

use std::str::FromStr;

use lockbox_core::config::keys;
use lockbox_core::{Config, ConfigError};
use sha2::{Digest, Sha512};

use super::query::ValueMode;
use crate::entry::FieldKind;

/// Tag used for the group path in checksums
const PATH_TAG: u8 = b'd';

/// How `json` renders values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonMode {
    Plaintext,
    Hash,
    Empty,
}

impl FromStr for JsonMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plaintext" => Ok(Self::Plaintext),
            "hash" => Ok(Self::Hash),
            "empty" => Ok(Self::Empty),
            other => Err(ConfigError::InvalidValue {
                key: keys::JSON_MODE.0.to_string(),
                reason: format!("unknown mode '{}'", other),
            }),
        }
    }
}

/// Per-query value transformer with a checksum accumulator
#[derive(Debug, Clone)]
pub struct ValueHasher {
    values: ValueMode,
    mode: JsonMode,
    /// 0 keeps the whole digest
    length: usize,
    items: Vec<(u8, String)>,
}

impl ValueHasher {
    pub fn new(values: ValueMode, mode: JsonMode, length: usize) -> Self {
        Self {
            values,
            mode,
            length,
            items: Vec::new(),
        }
    }

    pub fn from_config(config: &Config, values: ValueMode) -> Result<Self, ConfigError> {
        let mode = config.get_string(keys::JSON_MODE).parse()?;
        let length = usize::try_from(config.get_int(keys::JSON_HASH_LENGTH)).unwrap_or(0);
        Ok(Self::new(values, mode, length))
    }

    fn hashing(&self) -> bool {
        self.values == ValueMode::Json && self.mode == JsonMode::Hash
    }

    /// Whether `json` output carries modification times
    pub fn shows_modtime(&self) -> bool {
        self.values == ValueMode::Json && self.mode != JsonMode::Empty
    }

    /// Display form of one raw value
    pub fn transform(&mut self, kind: FieldKind, raw: &str) -> String {
        match (self.values, self.mode) {
            (ValueMode::Secret, _) | (ValueMode::Json, JsonMode::Plaintext) => raw.to_string(),
            (ValueMode::Json, JsonMode::Hash) => {
                let digest = hex::encode(Sha512::digest(raw.as_bytes()));
                self.items.push((kind.tag(), self.prefix(&digest)));
                self.truncate(digest)
            }
            (ValueMode::Json, JsonMode::Empty) | (ValueMode::Blank, _) => String::new(),
        }
    }

    /// Finish an entity: the checksum over everything passed to
    /// [`transform`](Self::transform) since the last reset, plus the path.
    /// Only produced in hash mode.
    pub fn checksum(&mut self, group_path: &str) -> Option<String> {
        if !self.hashing() {
            self.reset();
            return None;
        }

        let digest = hex::encode(Sha512::digest(group_path.as_bytes()));
        let mut items = std::mem::take(&mut self.items);
        items.push((PATH_TAG, self.prefix(&digest)));
        items.sort_by_key(|(tag, _)| *tag);

        let width = self.prefix_width();
        let slots = FieldKind::ALL.len() + 2;
        let padding = slots.saturating_sub(items.len());
        let rendered: Vec<String> = std::iter::repeat(format!("{}0", "0".repeat(width)))
            .take(padding)
            .chain(
                items
                    .into_iter()
                    .map(|(tag, prefix)| format!("{}{}", prefix, tag as char)),
            )
            .collect();

        Some(format!("[{}]", rendered.join(" ")))
    }

    pub fn reset(&mut self) {
        self.items.clear();
    }

    fn prefix_width(&self) -> usize {
        self.length.max(1)
    }

    fn prefix(&self, digest: &str) -> String {
        digest.chars().take(self.prefix_width()).collect()
    }

    fn truncate(&self, mut digest: String) -> String {
        if self.length > 0 && self.length < digest.len() {
            digest.truncate(self.length);
        }
        digest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO_SHA512: &str = "9b71d224bd62f3785d96d46ad3ea3d73319bfbc2890caadae2dff72519673ca72323c3d99ba5c11d7c7acc6e14b8c5da0c4663475c2e5c3adef46f73bcdec043";

    #[test]
    fn test_hash_mode() {
        let mut hasher = ValueHasher::new(ValueMode::Json, JsonMode::Hash, 4);
        assert_eq!(hasher.transform(FieldKind::Password, "hello"), "9b71");

        let mut full = ValueHasher::new(ValueMode::Json, JsonMode::Hash, 0);
        assert_eq!(full.transform(FieldKind::Password, "hello"), HELLO_SHA512);
    }

    #[test]
    fn test_other_modes() {
        let mut plain = ValueHasher::new(ValueMode::Json, JsonMode::Plaintext, 1);
        assert_eq!(plain.transform(FieldKind::Notes, "a\nb"), "a\nb");
        assert!(plain.shows_modtime());
        assert_eq!(plain.checksum("x"), None);

        let mut empty = ValueHasher::new(ValueMode::Json, JsonMode::Empty, 1);
        assert_eq!(empty.transform(FieldKind::Notes, "a"), "");
        assert!(!empty.shows_modtime());

        let mut secret = ValueHasher::new(ValueMode::Secret, JsonMode::Hash, 1);
        assert_eq!(secret.transform(FieldKind::Url, "u"), "u");
        assert_eq!(secret.checksum("x"), None);

        let mut blank = ValueHasher::new(ValueMode::Blank, JsonMode::Plaintext, 1);
        assert_eq!(blank.transform(FieldKind::Url, "u"), "");
    }

    #[test]
    fn test_checksum() {
        let mut hasher = ValueHasher::new(ValueMode::Json, JsonMode::Hash, 1);
        hasher.transform(FieldKind::Password, "hello");
        hasher.transform(FieldKind::Notes, "hello");
        let checksum = hasher.checksum("t/u").unwrap();

        let items: Vec<&str> = checksum
            .trim_start_matches('[')
            .trim_end_matches(']')
            .split(' ')
            .collect();
        assert_eq!(items.len(), FieldKind::ALL.len() + 2);
        assert_eq!(&items[..3], &["00", "00", "00"]);
        assert!(items[3].ends_with('d'));
        assert_eq!(items[4], "9n");
        assert_eq!(items[5], "9p");
    }

    #[test]
    fn test_checksum_resets() {
        let mut hasher = ValueHasher::new(ValueMode::Json, JsonMode::Hash, 2);
        hasher.transform(FieldKind::Password, "hello");
        let first = hasher.checksum("a").unwrap();
        let second = hasher.checksum("a").unwrap();
        assert_ne!(first, second);
        assert!(second.starts_with("[000 000 000 000 000 "));
    }

    #[test]
    fn test_from_config() {
        let hasher = ValueHasher::from_config(&Config::new(), ValueMode::Json).unwrap();
        assert_eq!(hasher.mode, JsonMode::Hash);
        assert_eq!(hasher.length, 1);
    }
}
