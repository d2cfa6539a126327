//! Entity queries
//!
//! Matching is decided on entry paths alone; field values are only read
//! when a result is pulled from [`QueryResults`].

use std::collections::BTreeMap;
use std::vec;

use anyhow::{bail, Result};
use chrono::{Local, TimeZone, Utc};
use keepass::Database;

use super::hash::ValueHasher;
use super::tree::{self, Located};
use crate::entry::{self, FieldKind};
use crate::error::LockboxError;

/// Output format for modification times
pub const MODTIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%:z";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    /// Every entity
    List,
    /// Group path contains the criteria
    Find,
    /// Group path equals the criteria
    Exact,
    /// Group path matches the criteria as a glob
    Glob,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueMode {
    /// Values are never read
    Blank,
    /// Raw plaintext
    Secret,
    /// Values pass through the json hasher
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOptions {
    pub criteria: String,
    pub mode: QueryMode,
    pub values: ValueMode,
}

impl QueryOptions {
    pub fn list(values: ValueMode) -> Self {
        Self {
            criteria: String::new(),
            mode: QueryMode::List,
            values,
        }
    }

    pub fn exact(path: &str, values: ValueMode) -> Self {
        Self {
            criteria: path.to_string(),
            mode: QueryMode::Exact,
            values,
        }
    }

    pub fn glob(pattern: &str, values: ValueMode) -> Self {
        Self {
            criteria: pattern.to_string(),
            mode: QueryMode::Glob,
            values,
        }
    }

    /// `ls`-style filter: nothing lists all, glob metacharacters glob,
    /// anything else is a substring search
    pub fn filter(filter: Option<&str>, values: ValueMode) -> Self {
        match filter.filter(|f| !f.is_empty()) {
            None => Self::list(values),
            Some(f) if entry::is_glob(f) => Self::glob(f, values),
            Some(f) => Self {
                criteria: f.to_string(),
                mode: QueryMode::Find,
                values,
            },
        }
    }

    fn matches(&self, path: &str) -> Result<bool> {
        Ok(match self.mode {
            QueryMode::List => true,
            QueryMode::Find => path.contains(&self.criteria),
            QueryMode::Exact => path == self.criteria,
            QueryMode::Glob => entry::glob(&self.criteria, path)?,
        })
    }
}

/// One entity as produced by a query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub path: String,
    pub values: BTreeMap<FieldKind, String>,
    /// Set for json output when the mode shows times
    pub modtime: Option<String>,
    /// Set for json output in hash mode
    pub checksum: Option<String>,
}

impl Entity {
    pub fn get(&self, kind: FieldKind) -> Option<&str> {
        self.values.get(&kind).map(String::as_str)
    }

    /// Full entry path of every stored field
    pub fn field_paths(&self) -> impl Iterator<Item = String> + '_ {
        self.values.keys().map(|kind| entry::join(&self.path, kind.name()))
    }
}

/// Lazy query results
///
/// Owns the decoded container; each `next` materializes one entity.
pub struct QueryResults {
    db: Option<Database>,
    pending: vec::IntoIter<Located>,
    hasher: ValueHasher,
    values: ValueMode,
}

impl QueryResults {
    /// Select and order matching entries of `db` (none when the store does
    /// not exist yet)
    pub(crate) fn new(db: Option<Database>, options: &QueryOptions, hasher: ValueHasher) -> Result<Self> {
        let mut selected = Vec::new();
        if let Some(db) = &db {
            for located in tree::walk(&db.root) {
                if options.matches(&located.path)? {
                    selected.push(located);
                }
            }
        }

        // stable: equal paths keep tree order
        selected.sort_by(|a, b| a.path.cmp(&b.path));

        if options.mode == QueryMode::Exact && selected.len() > 1 {
            bail!(LockboxError::Conflict(options.criteria.clone()));
        }

        Ok(Self {
            db,
            pending: selected.into_iter(),
            hasher,
            values: options.values,
        })
    }

    fn materialize(&mut self, located: Located) -> Result<Entity> {
        let db = self
            .db
            .as_ref()
            .ok_or_else(|| LockboxError::Codec("container is not open".to_string()))?;
        let e = tree::entry_at(&db.root, &located.indices)
            .ok_or_else(|| LockboxError::NotFound(located.path.clone()))?;

        self.hasher.reset();
        let mut values = BTreeMap::new();
        for kind in FieldKind::ALL {
            if !e.fields.contains_key(kind.storage_key()) {
                continue;
            }
            let display = match self.values {
                ValueMode::Blank => String::new(),
                _ => {
                    let raw = e.get(kind.storage_key()).unwrap_or_default();
                    self.hasher.transform(kind, raw)
                }
            };
            values.insert(kind, display);
        }

        let modtime = if self.hasher.shows_modtime() {
            e.times
                .get_last_modification()
                .map(|time| Utc.from_utc_datetime(time).with_timezone(&Local))
                .map(|time| time.format(MODTIME_FORMAT).to_string())
        } else {
            None
        };
        let checksum = self.hasher.checksum(&located.path);

        Ok(Entity {
            path: located.path,
            values,
            modtime,
            checksum,
        })
    }
}

impl Iterator for QueryResults {
    type Item = Result<Entity>;

    fn next(&mut self) -> Option<Self::Item> {
        let located = self.pending.next()?;
        Some(self.materialize(located))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.pending.size_hint()
    }
}

/// Drain results, stopping at the first error
pub fn collect(results: QueryResults) -> Result<Vec<Entity>> {
    results.collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::hash::JsonMode;
    use keepass::config::DatabaseConfig;
    use keepass::db::{Entry, Group, Node, Value};
    use secstr::SecStr;

    fn add(db: &mut Database, path: &str, fields: &[(FieldKind, &str)]) {
        let segments: Vec<&str> = entry::directory(path)
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();
        let mut e = Entry::new();
        e.times.set_last_modification(Utc::now().naive_utc());
        e.fields.insert(
            "Title".to_string(),
            Value::Unprotected(entry::base(path).to_string()),
        );
        for (kind, value) in fields {
            e.fields.insert(
                kind.storage_key().to_string(),
                Value::Protected(SecStr::new(value.as_bytes().to_vec())),
            );
        }
        let group: &mut Group = tree::group_mut(&mut db.root, &segments, true).unwrap();
        group.children.push(Node::Entry(e));
    }

    fn sample() -> Database {
        let mut db = Database::new(DatabaseConfig::default());
        add(&mut db, "b/z", &[(FieldKind::Password, "pz")]);
        add(&mut db, "a/y", &[(FieldKind::Password, "py"), (FieldKind::Notes, "n\ny")]);
        add(&mut db, "a/x", &[(FieldKind::Url, "ux")]);
        add(&mut db, "a/x/deep", &[(FieldKind::Otp, "seed")]);
        db
    }

    fn run(options: QueryOptions) -> Result<Vec<Entity>> {
        let hasher = ValueHasher::new(options.values, JsonMode::Hash, 1);
        collect(QueryResults::new(Some(sample()), &options, hasher)?)
    }

    fn paths(entities: &[Entity]) -> Vec<&str> {
        entities.iter().map(|e| e.path.as_str()).collect()
    }

    #[test]
    fn test_list_sorted() {
        let all = run(QueryOptions::list(ValueMode::Blank)).unwrap();
        assert_eq!(paths(&all), vec!["a/x", "a/x/deep", "a/y", "b/z"]);
        assert!(all.iter().all(|e| e.values.values().all(String::is_empty)));
    }

    #[test]
    fn test_find_and_glob() {
        let found = run(QueryOptions::filter(Some("x"), ValueMode::Blank)).unwrap();
        assert_eq!(paths(&found), vec!["a/x", "a/x/deep"]);

        let globbed = run(QueryOptions::filter(Some("a/?"), ValueMode::Blank)).unwrap();
        assert_eq!(paths(&globbed), vec!["a/x", "a/y"]);

        let prefix = run(QueryOptions::glob("a/*", ValueMode::Blank)).unwrap();
        assert_eq!(paths(&prefix), vec!["a/x", "a/x/deep", "a/y"]);
    }

    #[test]
    fn test_exact_secret() {
        let found = run(QueryOptions::exact("a/y", ValueMode::Secret)).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].get(FieldKind::Password), Some("py"));
        assert_eq!(found[0].get(FieldKind::Notes), Some("n\ny"));
        assert_eq!(found[0].modtime, None);

        assert!(run(QueryOptions::exact("a", ValueMode::Secret)).unwrap().is_empty());
    }

    #[test]
    fn test_exact_conflict() {
        let mut db = sample();
        add(&mut db, "b/z", &[(FieldKind::Url, "dup")]);
        let options = QueryOptions::exact("b/z", ValueMode::Blank);
        let hasher = ValueHasher::new(ValueMode::Blank, JsonMode::Hash, 1);
        let err = QueryResults::new(Some(db), &options, hasher).err().unwrap();
        assert!(matches!(
            LockboxError::find(&err),
            Some(LockboxError::Conflict(_))
        ));
    }

    #[test]
    fn test_json_values() {
        let found = run(QueryOptions::exact("b/z", ValueMode::Json)).unwrap();
        let entity = &found[0];
        assert_eq!(entity.get(FieldKind::Password).map(str::len), Some(1));
        assert!(entity.modtime.is_some());
        assert!(entity.checksum.as_deref().is_some_and(|c| c.starts_with('[')));
    }

    #[test]
    fn test_missing_store() {
        let options = QueryOptions::list(ValueMode::Secret);
        let hasher = ValueHasher::new(ValueMode::Secret, JsonMode::Hash, 1);
        let results = QueryResults::new(None, &options, hasher).unwrap();
        assert_eq!(results.size_hint(), (0, Some(0)));
        assert_eq!(results.count(), 0);
    }

    #[test]
    fn test_field_paths() {
        let found = run(QueryOptions::exact("a/y", ValueMode::Blank)).unwrap();
        let fields: Vec<String> = found[0].field_paths().collect();
        assert_eq!(fields, vec!["a/y/notes", "a/y/password"]);
    }
}
