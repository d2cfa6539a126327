//! Transactions against the container file
//!
//! Every command works on one transaction: the store is decoded in full,
//! changed in memory, and written back through a sibling temp file that is
//! renamed over the store once it has been fully encoded.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use keepass::config::DatabaseConfig;
use keepass::db::{Entry, Node, Value};
use keepass::Database;
use lockbox_core::config::keys;
use lockbox_core::{Config, ConfigError};
use secstr::SecStr;
use tracing::debug;

use super::hash::ValueHasher;
use super::query::{self, Entity, QueryOptions, QueryResults, ValueMode};
use super::tree::{self, Located};
use crate::credential::Credential;
use crate::entry::{self, FieldKind, FieldValue, SEPARATOR};
use crate::error::LockboxError;

pub const STORE_SUFFIX: &str = ".kdbx";
const ROOT_GROUP: &str = "root";
const TITLE_KEY: &str = "Title";

/// A transaction bound to the configured store
#[derive(Debug)]
pub struct Transaction<'a> {
    config: &'a Config,
    store: PathBuf,
    readonly: bool,
}

impl<'a> Transaction<'a> {
    /// Fails unless `store` names a `.kdbx` file
    pub fn new(config: &'a Config) -> Result<Self> {
        let store = config.get_string(keys::STORE);
        if !store.ends_with(STORE_SUFFIX) {
            bail!(LockboxError::Config(ConfigError::InvalidValue {
                key: keys::STORE.0.to_string(),
                reason: format!("'{}' must be a {} file", store, STORE_SUFFIX),
            }));
        }

        Ok(Self {
            config,
            store: PathBuf::from(store),
            readonly: config.get_bool(keys::READONLY),
        })
    }

    pub fn store(&self) -> &Path {
        &self.store
    }

    pub fn exists(&self) -> bool {
        self.store.exists()
    }

    pub fn ensure_writable(&self) -> Result<()> {
        if self.readonly {
            bail!(LockboxError::ReadOnly);
        }
        Ok(())
    }

    /// Run a query; a store that does not exist yet has no entities
    pub fn query(&self, options: &QueryOptions) -> Result<QueryResults> {
        let hasher = ValueHasher::from_config(self.config, options.values)?;
        let db = if self.exists() {
            Some(self.decode(&Credential::from_config(self.config)?)?)
        } else {
            None
        };
        QueryResults::new(db, options, hasher)
    }

    /// The entity at `group`, if any
    pub fn get(&self, group: &str, values: ValueMode) -> Result<Option<Entity>> {
        entry::validate_group(group)?;
        let mut results = self.query(&QueryOptions::exact(group, values))?;
        results.next().transpose()
    }

    /// Set one field, creating the entity and its groups as needed
    pub fn insert(&self, group: &str, value: &FieldValue) -> Result<()> {
        entry::validate_group(group)?;
        let modtime = self.modtime()?;
        self.change(|db| {
            let e = match unique(&db.root, group)? {
                Some(located) => tree::entry_at_mut(&mut db.root, &located.indices)
                    .ok_or_else(|| LockboxError::NotFound(group.to_string()))?,
                None => place(db, group, new_entry(entry::base(group)))?,
            };
            e.fields.insert(
                value.kind().storage_key().to_string(),
                protect(value.as_str()),
            );
            e.times.set_last_modification(modtime);
            Ok(())
        })
        .with_context(|| format!("failed to insert {}/{}", group, value.kind()))
    }

    /// Remove one field; an entity left without fields is removed too
    pub fn unset(&self, group: &str, kind: FieldKind) -> Result<()> {
        entry::validate_group(group)?;
        let modtime = self.modtime()?;
        self.change(|db| {
            let located = unique(&db.root, group)?
                .ok_or_else(|| LockboxError::NotFound(group.to_string()))?;
            let e = tree::entry_at_mut(&mut db.root, &located.indices)
                .ok_or_else(|| LockboxError::NotFound(group.to_string()))?;
            if e.fields.remove(kind.storage_key()).is_none() {
                bail!(LockboxError::NotFound(entry::join(group, kind.name())));
            }
            e.times.set_last_modification(modtime);

            let empty = FieldKind::ALL
                .iter()
                .all(|k| !e.fields.contains_key(k.storage_key()));
            if empty {
                debug!(path = %group, "removing entity without fields");
                tree::take_at(&mut db.root, &located.indices);
                tree::prune(&mut db.root, &segments(entry::directory(group)));
            }
            Ok(())
        })
        .with_context(|| format!("failed to unset {}/{}", group, kind))
    }

    /// Remove whole entities; returns how many entries were removed
    pub fn remove(&self, groups: &[String]) -> Result<usize> {
        let mut removed = 0;
        self.change(|db| {
            let mut targets: Vec<Located> = tree::walk(&db.root)
                .into_iter()
                .filter(|located| groups.contains(&located.path))
                .collect();
            if targets.is_empty() {
                bail!(LockboxError::NotFound(groups.join(", ")));
            }

            targets.sort_by(|a, b| b.indices.cmp(&a.indices));
            for located in &targets {
                if tree::take_at(&mut db.root, &located.indices).is_some() {
                    removed += 1;
                }
            }
            for located in &targets {
                tree::prune(&mut db.root, &segments(entry::directory(&located.path)));
            }
            Ok(())
        })
        .context("failed to remove entries")?;
        Ok(removed)
    }

    /// Move entities to new group paths, replacing any entity already at a
    /// destination. Fields and times are kept.
    pub fn relocate(&self, moves: &[(String, String)]) -> Result<()> {
        for (src, dst) in moves {
            entry::validate_group(src)?;
            entry::validate_group(dst)?;
        }

        self.change(|db| {
            for (src, dst) in moves {
                if src == dst {
                    continue;
                }
                let located =
                    unique(&db.root, src)?.ok_or_else(|| LockboxError::NotFound(src.clone()))?;
                let mut moved = tree::take_at(&mut db.root, &located.indices)
                    .ok_or_else(|| LockboxError::NotFound(src.clone()))?;

                if let Some(existing) = unique(&db.root, dst)? {
                    debug!(path = %dst, "replacing existing entity");
                    tree::take_at(&mut db.root, &existing.indices);
                }

                moved.fields.insert(
                    TITLE_KEY.to_string(),
                    Value::Unprotected(entry::base(dst).to_string()),
                );
                place(db, dst, moved)?;
                tree::prune(&mut db.root, &segments(entry::directory(src)));
            }
            Ok(())
        })
        .context("failed to move entries")
    }

    /// Re-encode the store under new credentials
    pub fn rekey(&self, credential: &Credential) -> Result<()> {
        self.ensure_writable()?;
        if !self.exists() {
            bail!(LockboxError::NotFound(self.store.display().to_string()));
        }
        let db = self.decode(&Credential::from_config(self.config)?)?;
        self.commit(&db, credential).context("failed to rekey store")
    }

    /// Decode, apply `f`, and commit with the configured credentials
    fn change<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Database) -> Result<()>,
    {
        self.ensure_writable()?;
        let credential = Credential::from_config(self.config)?;

        let mut db = if self.exists() {
            self.decode(&credential)?
        } else {
            debug!(store = %self.store.display(), "creating new store");
            let mut db = Database::new(DatabaseConfig::default());
            db.root.name = ROOT_GROUP.to_string();
            db
        };

        f(&mut db)?;
        self.commit(&db, &credential)
    }

    fn decode(&self, credential: &Credential) -> Result<Database> {
        debug!(
            store = %self.store.display(),
            password = credential.has_password(),
            key_file = ?credential.key_file(),
            "opening store"
        );
        let mut file = File::open(&self.store)
            .with_context(|| format!("failed to open {}", self.store.display()))?;
        let db = Database::open(&mut file, credential.database_key()?)
            .map_err(|e| LockboxError::Codec(e.to_string()))?;
        Ok(db)
    }

    fn commit(&self, db: &Database, credential: &Credential) -> Result<()> {
        let tmp = temp_path(&self.store);
        debug!(store = %self.store.display(), "committing store");

        let written = (|| -> Result<()> {
            let mut file = create_private(&tmp)?;
            db.save(&mut file, credential.database_key()?)
                .map_err(|e| LockboxError::Codec(e.to_string()))?;
            file.flush()?;
            if let Err(e) = file.sync_all() {
                debug!(error = %e, "fsync failed");
            }
            Ok(())
        })();

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }

        fs::rename(&tmp, &self.store)
            .with_context(|| format!("failed to replace {}", self.store.display()))?;
        Ok(())
    }

    fn modtime(&self) -> Result<NaiveDateTime> {
        let configured = self.config.get_string(keys::DEFAULTS_MODTIME);
        if configured.is_empty() {
            return Ok(Utc::now().naive_utc());
        }
        let parsed = DateTime::parse_from_rfc3339(&configured).map_err(|e| {
            LockboxError::Config(ConfigError::InvalidValue {
                key: keys::DEFAULTS_MODTIME.0.to_string(),
                reason: e.to_string(),
            })
        })?;
        Ok(parsed.naive_utc())
    }
}

/// Collect the query results of an open transaction
pub fn collect(tx: &Transaction<'_>, options: &QueryOptions) -> Result<Vec<Entity>> {
    query::collect(tx.query(options)?)
}

fn unique(root: &keepass::db::Group, path: &str) -> Result<Option<Located>> {
    let mut found = tree::walk(root).into_iter().filter(|l| l.path == path);
    let first = found.next();
    if found.next().is_some() {
        bail!(LockboxError::Conflict(path.to_string()));
    }
    Ok(first)
}

/// Attach `e` below the groups of `path`, returning it
fn place<'d>(db: &'d mut Database, path: &str, e: Entry) -> Result<&'d mut Entry> {
    let group = tree::group_mut(&mut db.root, &segments(entry::directory(path)), true)
        .ok_or_else(|| LockboxError::BadPath(format!("cannot create groups for {}", path)))?;
    group.children.push(Node::Entry(e));
    match group.children.last_mut() {
        Some(Node::Entry(e)) => Ok(e),
        _ => bail!(LockboxError::Codec("entry was not attached".to_string())),
    }
}

fn new_entry(title: &str) -> Entry {
    let mut e = Entry::new();
    e.fields
        .insert(TITLE_KEY.to_string(), Value::Unprotected(title.to_string()));
    e
}

fn protect(value: &str) -> Value {
    Value::Protected(SecStr::new(value.as_bytes().to_vec()))
}

fn segments(path: &str) -> Vec<&str> {
    path.split(SEPARATOR).filter(|s| !s.is_empty()).collect()
}

fn temp_path(store: &Path) -> PathBuf {
    let mut name = store.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

fn create_private(path: &Path) -> Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options
        .open(path)
        .with_context(|| format!("failed to create {}", path.display()))
}
