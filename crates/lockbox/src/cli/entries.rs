//! Entry commands: ls, find, groups, show, clip, insert, unset, rm, mv, json

use std::collections::{BTreeMap, HashSet};

use anyhow::{bail, Context, Result};
use lockbox_core::config::keys;
use serde::Serialize;
use tracing::debug;

use super::Session;
use crate::backend::{collect, QueryOptions, ValueMode};
use crate::clip::Clipboard;
use crate::entry::{self, FieldKind, FieldValue};
use crate::error::LockboxError;
use crate::totp::Totp;

/// Print `<group>/<field>` for every stored field
pub fn list(s: &mut Session<'_>, filter: Option<&str>) -> Result<()> {
    let tx = s.transaction()?;
    for entity in tx.query(&QueryOptions::filter(filter, ValueMode::Blank))? {
        for path in entity?.field_paths() {
            writeln!(s.output, "{}", path)?;
        }
    }
    Ok(())
}

pub fn find(s: &mut Session<'_>, pattern: &str) -> Result<()> {
    list(s, Some(pattern))
}

/// Print each group path once
pub fn groups(s: &mut Session<'_>, filter: Option<&str>) -> Result<()> {
    let tx = s.transaction()?;
    let mut last: Option<String> = None;
    for entity in tx.query(&QueryOptions::filter(filter, ValueMode::Blank))? {
        let entity = entity?;
        if last.as_deref() != Some(entity.path.as_str()) {
            writeln!(s.output, "{}", entity.path)?;
            last = Some(entity.path);
        }
    }
    Ok(())
}

/// Raw value of one field
pub(crate) fn secret(s: &Session<'_>, path: &str) -> Result<String> {
    let (group, kind) = entry::split(path)?;
    let entity = s
        .transaction()?
        .get(&group, ValueMode::Secret)?
        .ok_or_else(|| LockboxError::NotFound(group.clone()))?;
    entity
        .get(kind)
        .map(str::to_string)
        .ok_or_else(|| LockboxError::NotFound(path.to_string()).into())
}

pub fn show(s: &mut Session<'_>, path: &str) -> Result<()> {
    let value = secret(s, path)?;
    writeln!(s.output, "{}", value)?;
    Ok(())
}

pub fn clip(s: &mut Session<'_>, path: &str) -> Result<()> {
    s.require_clip()?;
    let value = secret(s, path)?;
    Clipboard::from_config(s.config, s.paths)?.copy_and_manage(&value)
}

pub fn insert(s: &mut Session<'_>, path: &str) -> Result<()> {
    let (group, kind) = entry::split(path)?;
    let tx = s.transaction()?;
    tx.ensure_writable()?;

    if s.interactive {
        let exists = tx
            .get(&group, ValueMode::Blank)?
            .is_some_and(|entity| entity.get(kind).is_some());
        if exists {
            s.confirm_or_cancel(&format!("overwrite {}?", path))?;
        }
    }

    let raw = read_value(s, path, kind)?;
    if kind == FieldKind::Otp && s.config.get_bool(keys::TOTP_CHECK_ON_INSERT) {
        Totp::from_config(s.config, &raw)
            .and_then(|totp| totp.now())
            .map_err(LockboxError::from)
            .context("otp seed rejected")?;
    }

    let value = FieldValue::new(kind, raw)?;
    tx.insert(&group, &value)?;
    debug!(path = %path, "inserted");
    Ok(())
}

fn read_value(s: &mut Session<'_>, path: &str, kind: FieldKind) -> Result<String> {
    if kind.is_multiline() {
        if s.interactive {
            eprintln!("{} (end with Ctrl-D):", path);
        }
        return s.read_all();
    }

    if s.interactive {
        let first = s.read_secret(&format!("{}: ", path))?;
        let second = s.read_secret("confirm: ")?;
        if first != second {
            bail!(LockboxError::BadField("values do not match".to_string()));
        }
        return Ok(first);
    }
    Ok(s.read_line()?.unwrap_or_default())
}

pub fn unset(s: &mut Session<'_>, path: &str) -> Result<()> {
    let (group, kind) = entry::split(path)?;
    s.transaction()?.unset(&group, kind)
}

/// Remove every entity whose group path matches `pattern`
pub fn remove(s: &mut Session<'_>, pattern: &str) -> Result<()> {
    let tx = s.transaction()?;
    tx.ensure_writable()?;

    let paths: Vec<String> = collect(&tx, &QueryOptions::glob(pattern, ValueMode::Blank))?
        .into_iter()
        .map(|entity| entity.path)
        .collect();
    if paths.is_empty() {
        bail!(LockboxError::NotFound(pattern.to_string()));
    }

    if s.interactive {
        for path in &paths {
            writeln!(s.output, "{}", path)?;
        }
        s.confirm_or_cancel(&format!("remove {} entries?", paths.len()))?;
    }

    tx.remove(&paths)?;
    Ok(())
}

/// Move one entity, or every entity matching a pattern into `dst`
pub fn move_entries(s: &mut Session<'_>, src: &str, dst: &str) -> Result<()> {
    let tx = s.transaction()?;
    tx.ensure_writable()?;
    entry::validate_group(dst)?;

    let existing: HashSet<String> = collect(&tx, &QueryOptions::list(ValueMode::Blank))?
        .into_iter()
        .map(|entity| entity.path)
        .collect();

    let moves: Vec<(String, String)> = if entry::is_glob(src) {
        let parent = entry::directory(src);
        let mut moves = Vec::new();
        let mut sources: Vec<&String> = Vec::new();
        for path in &existing {
            if entry::glob(src, path)? {
                sources.push(path);
            }
        }
        sources.sort();
        for path in sources {
            if entry::directory(path) != parent {
                bail!(LockboxError::BadPath(format!(
                    "{} is not directly under '{}'; only leaf entries can be moved by pattern",
                    path, parent
                )));
            }
            moves.push((path.clone(), entry::join(dst, entry::base(path))));
        }
        if moves.is_empty() {
            bail!(LockboxError::NotFound(src.to_string()));
        }
        moves
    } else {
        entry::validate_group(src)?;
        if !existing.contains(src) {
            bail!(LockboxError::NotFound(src.to_string()));
        }
        vec![(src.to_string(), dst.to_string())]
    };

    for (from, to) in &moves {
        if from != to && existing.contains(to) {
            s.confirm_or_cancel(&format!("overwrite {}?", to))?;
        }
    }

    tx.relocate(&moves)
}

/// One entity in `json` output
#[derive(Serialize)]
struct JsonEntity {
    #[serde(flatten)]
    fields: BTreeMap<&'static str, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    modtime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    checksum: Option<String>,
}

/// Pretty JSON of matching entities with display values
pub fn json(s: &mut Session<'_>, filter: Option<&str>) -> Result<()> {
    let tx = s.transaction()?;
    let mut out: BTreeMap<String, JsonEntity> = BTreeMap::new();

    for entity in tx.query(&QueryOptions::filter(filter, ValueMode::Json))? {
        let entity = entity?;
        let fields = entity
            .values
            .into_iter()
            .map(|(kind, value)| (kind.name(), value))
            .collect();
        out.insert(
            entity.path,
            JsonEntity {
                fields,
                modtime: entity.modtime,
                checksum: entity.checksum,
            },
        );
    }

    writeln!(s.output, "{}", serde_json::to_string_pretty(&out)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::testing::Harness;
    use std::fs;

    fn kind_of(err: &anyhow::Error) -> Option<&LockboxError> {
        LockboxError::find(err)
    }

    fn seed(h: &Harness, path: &str, value: &str) {
        h.run(value, |s| insert(s, path)).unwrap();
    }

    #[test]
    fn test_insert_show_roundtrip() {
        let h = Harness::new("");
        seed(&h, "t/u/password", "hunter2\n");
        let out = h.run("", |s| show(s, "t/u/password")).unwrap();
        assert_eq!(out, "hunter2\n");
    }

    #[test]
    fn test_multi_field_json() {
        let h = Harness::new("");
        seed(&h, "t/u/password", "hunter2\n");
        seed(&h, "t/u/notes", "line1\nline2\n");

        let out = h.run("", |s| show(s, "t/u/notes")).unwrap();
        assert_eq!(out, "line1\nline2\n");

        let out = h.run("", |s| json(s, Some("t"))).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        let object = parsed.as_object().unwrap();
        assert_eq!(object.len(), 1);
        let fields = object["t/u"].as_object().unwrap();
        for key in ["password", "notes", "modtime", "checksum"] {
            assert!(fields.contains_key(key), "missing {}", key);
        }
        assert_eq!(fields["password"].as_str().unwrap().len(), 1);
    }

    #[test]
    fn test_json_modes() {
        let h = Harness::new("[json]\nmode = \"plaintext\"");
        seed(&h, "t/u/password", "hunter2");
        let out = h.run("", |s| json(s, None)).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["t/u"]["password"], "hunter2");
        assert!(parsed["t/u"].get("modtime").is_some());
        assert!(parsed["t/u"].get("checksum").is_none());

        let h = Harness::new("[json]\nmode = \"empty\"");
        seed(&h, "t/u/password", "hunter2");
        let out = h.run("", |s| json(s, None)).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["t/u"]["password"], "");
        assert!(parsed["t/u"].get("modtime").is_none());
    }

    #[test]
    fn test_json_full_hash() {
        let h = Harness::new("[json]\nhash_length = 0");
        seed(&h, "t/u/url", "https://example.com");
        let out = h.run("", |s| json(s, None)).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        let hash = parsed["t/u"]["url"].as_str().unwrap();
        assert_eq!(hash.len(), 128);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_insert_first_line_only() {
        let h = Harness::new("");
        seed(&h, "a/password", "one\ntwo\n");
        let out = h.run("", |s| show(s, "a/password")).unwrap();
        assert_eq!(out, "one\n");
    }

    #[test]
    fn test_insert_rejects_bad_input() {
        let h = Harness::new("");
        let err = h.run("", |s| insert(s, "a/password")).unwrap_err();
        assert!(matches!(kind_of(&err), Some(LockboxError::BadField(_))));

        let err = h.run("x", |s| insert(s, "a/username")).unwrap_err();
        assert!(matches!(kind_of(&err), Some(LockboxError::BadField(_))));

        let err = h.run("x", |s| insert(s, "password")).unwrap_err();
        assert!(matches!(kind_of(&err), Some(LockboxError::BadPath(_))));

        let err = h.run("not base32!", |s| insert(s, "a/otp")).unwrap_err();
        assert!(matches!(kind_of(&err), Some(LockboxError::Totp(_))));
    }

    #[test]
    fn test_glob_remove() {
        let h = Harness::new("");
        for path in ["a/x/password", "a/y/password", "b/z/password"] {
            seed(&h, path, "p");
        }

        let out = h.run_as(true, "y\n", |s| remove(s, "a/*")).unwrap();
        assert!(out.contains("a/x"));
        assert!(out.contains("a/y"));

        let out = h.run("", |s| list(s, None)).unwrap();
        assert_eq!(out, "b/z/password\n");
    }

    #[test]
    fn test_remove_declined() {
        let h = Harness::new("");
        seed(&h, "a/x/password", "p");

        let err = h.run_as(true, "n\n", |s| remove(s, "a/*")).unwrap_err();
        assert!(matches!(kind_of(&err), Some(LockboxError::Cancelled)));

        let err = h.run("", |s| remove(s, "zzz/*")).unwrap_err();
        assert!(matches!(kind_of(&err), Some(LockboxError::NotFound(_))));

        let out = h.run("", |s| list(s, None)).unwrap();
        assert_eq!(out, "a/x/password\n");
    }

    #[test]
    fn test_readonly_blocks_insert() {
        let h = Harness::new("readonly = true");
        let err = h.run("z", |s| insert(s, "x/y/password")).unwrap_err();
        assert!(format!("{:#}", err).contains("readonly"));
        assert!(!h.store().exists());

        let err = h.run("", |s| remove(s, "x/*")).unwrap_err();
        assert!(matches!(kind_of(&err), Some(LockboxError::ReadOnly)));
    }

    #[test]
    fn test_readonly_leaves_existing_store_untouched() {
        let mut h = Harness::new("");
        h.run("hunter2\n", |s| insert(s, "a/b/password")).unwrap();
        h.run("https://a\n", |s| insert(s, "a/b/url")).unwrap();
        let before = fs::metadata(h.store()).unwrap().modified().unwrap();
        let bytes = fs::read(h.store()).unwrap();

        h.reconfigure("pw", "readonly = true");
        let attempts: Vec<Result<String>> = vec![
            h.run("new\n", |s| insert(s, "a/b/password")),
            h.run("new\n", |s| insert(s, "c/d/password")),
            h.run("", |s| unset(s, "a/b/url")),
            h.run("", |s| move_entries(s, "a/b", "z/b")),
            h.run("", |s| remove(s, "a/*")),
        ];
        for result in attempts {
            let err = result.unwrap_err();
            assert!(matches!(kind_of(&err), Some(LockboxError::ReadOnly)));
        }

        assert_eq!(fs::metadata(h.store()).unwrap().modified().unwrap(), before);
        assert_eq!(fs::read(h.store()).unwrap(), bytes);
        let out = h.run("", |s| show(s, "a/b/url")).unwrap();
        assert_eq!(out, "https://a\n");
    }

    #[test]
    fn test_list_filters() {
        let h = Harness::new("");
        seed(&h, "web/mail/password", "p");
        seed(&h, "web/mail/url", "u");
        seed(&h, "web/bank/password", "p");
        seed(&h, "home/wifi/password", "p");

        let out = h.run("", |s| list(s, None)).unwrap();
        assert_eq!(
            out,
            "home/wifi/password\nweb/bank/password\nweb/mail/password\nweb/mail/url\n"
        );

        let out = h.run("", |s| find(s, "mail")).unwrap();
        assert_eq!(out, "web/mail/password\nweb/mail/url\n");

        let out = h.run("", |s| list(s, Some("web/*"))).unwrap();
        assert_eq!(out, "web/bank/password\nweb/mail/password\nweb/mail/url\n");

        let out = h.run("", |s| groups(s, Some("web"))).unwrap();
        assert_eq!(out, "web/bank\nweb/mail\n");
    }

    #[test]
    fn test_unset() {
        let h = Harness::new("");
        seed(&h, "t/u/password", "p");
        seed(&h, "t/u/url", "u");

        h.run("", |s| unset(s, "t/u/url")).unwrap();
        let out = h.run("", |s| list(s, None)).unwrap();
        assert_eq!(out, "t/u/password\n");

        h.run("", |s| unset(s, "t/u/password")).unwrap();
        let out = h.run("", |s| groups(s, None)).unwrap();
        assert_eq!(out, "");

        let err = h.run("", |s| show(s, "t/u/password")).unwrap_err();
        assert!(matches!(kind_of(&err), Some(LockboxError::NotFound(_))));
    }

    #[test]
    fn test_move_single() {
        let h = Harness::new("");
        seed(&h, "old/e/password", "p");
        seed(&h, "old/e/notes", "n");

        h.run("", |s| move_entries(s, "old/e", "new/f")).unwrap();
        let out = h.run("", |s| list(s, None)).unwrap();
        assert_eq!(out, "new/f/notes\nnew/f/password\n");

        let err = h.run("", |s| move_entries(s, "old/e", "x/y")).unwrap_err();
        assert!(matches!(kind_of(&err), Some(LockboxError::NotFound(_))));
    }

    #[test]
    fn test_move_glob() {
        let h = Harness::new("");
        seed(&h, "a/x/password", "p");
        seed(&h, "a/y/password", "p");
        seed(&h, "b/z/password", "p");

        h.run("", |s| move_entries(s, "a/*", "c")).unwrap();
        let out = h.run("", |s| list(s, None)).unwrap();
        assert_eq!(out, "b/z/password\nc/x/password\nc/y/password\n");
    }

    #[test]
    fn test_move_glob_rejects_subtrees() {
        let h = Harness::new("");
        seed(&h, "a/x/password", "p");
        seed(&h, "a/x/deep/password", "p");

        let err = h.run("", |s| move_entries(s, "a/*", "c")).unwrap_err();
        assert!(matches!(kind_of(&err), Some(LockboxError::BadPath(_))));
    }

    #[test]
    fn test_move_confirms_overwrite() {
        let h = Harness::new("");
        seed(&h, "a/password", "one");
        seed(&h, "b/password", "two");

        let err = h
            .run_as(true, "n\n", |s| move_entries(s, "a", "b"))
            .unwrap_err();
        assert!(matches!(kind_of(&err), Some(LockboxError::Cancelled)));

        h.run("", |s| move_entries(s, "a", "b")).unwrap();
        let out = h.run("", |s| show(s, "b/password")).unwrap();
        assert_eq!(out, "one\n");
    }

    #[test]
    fn test_clip_disabled() {
        let h = Harness::new("[feature]\nclip = false");
        seed(&h, "a/password", "p");
        let err = h.run("", |s| clip(s, "a/password")).unwrap_err();
        assert!(matches!(kind_of(&err), Some(LockboxError::Clipboard(_))));
    }

    #[test]
    fn test_reads_without_store() {
        let h = Harness::new("");
        assert_eq!(h.run("", |s| list(s, None)).unwrap(), "");
        assert_eq!(h.run("", |s| json(s, None)).unwrap(), "{}\n");
    }
}
