//! Credential resolution
//!
//! Turns the `credentials.*` settings into the key the container is opened
//! and saved with.

use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use keepass::DatabaseKey;
use lockbox_core::config::keys;
use lockbox_core::{process, Config};
use tracing::debug;
use zeroize::Zeroizing;

use crate::error::LockboxError;

/// How `credentials.password` is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordMode {
    /// First element is the password
    Plaintext,
    /// Array is an argv whose trimmed stdout is the password
    Command,
    /// No password; key file only
    None,
    /// Password setting is ignored entirely
    Ignore,
}

impl FromStr for PasswordMode {
    type Err = LockboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plaintext" => Ok(Self::Plaintext),
            "command" => Ok(Self::Command),
            "none" => Ok(Self::None),
            "ignore" => Ok(Self::Ignore),
            other => Err(LockboxError::BadCredential(format!(
                "unknown password mode: {}",
                other
            ))),
        }
    }
}

/// A resolved password and/or key file
pub struct Credential {
    password: Option<Zeroizing<String>>,
    key_file: Option<PathBuf>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("key_file", &self.key_file)
            .finish()
    }
}

impl Credential {
    /// Build a credential; at least one of the two parts must be usable
    pub fn new(password: Option<String>, key_file: Option<PathBuf>) -> Result<Self> {
        let password = password.filter(|p| !p.is_empty()).map(Zeroizing::new);

        if let Some(path) = &key_file {
            if !path.is_file() {
                bail!(LockboxError::BadCredential(format!(
                    "key file not found: {}",
                    path.display()
                )));
            }
        }

        if password.is_none() && key_file.is_none() {
            bail!(LockboxError::BadCredential(
                "a password or a key file is required".to_string()
            ));
        }

        Ok(Self { password, key_file })
    }

    /// Apply the password mode rules to the raw settings
    pub fn resolve(mode: PasswordMode, password: &[String], key_file: &str) -> Result<Self> {
        let key_file = (!key_file.is_empty()).then(|| PathBuf::from(key_file));
        let supplied = password.first().is_some_and(|p| !p.is_empty());

        let password = match mode {
            PasswordMode::Plaintext => {
                if !supplied {
                    bail!(LockboxError::BadCredential(
                        "plaintext mode needs a password".to_string()
                    ));
                }
                Some(password[0].clone())
            }
            PasswordMode::Command => {
                if !supplied {
                    bail!(LockboxError::BadCredential(
                        "command mode needs a password command".to_string()
                    ));
                }
                debug!(program = %password[0], "resolving password via command");
                let output = process::capture(password).map_err(|e| {
                    LockboxError::BadCredential(format!("password command failed: {:#}", e))
                })?;
                if output.is_empty() {
                    bail!(LockboxError::BadCredential(
                        "password command produced no output".to_string()
                    ));
                }
                Some(output)
            }
            PasswordMode::None => {
                if !password.is_empty() {
                    bail!(LockboxError::BadCredential(
                        "password must be unset when password mode is none".to_string()
                    ));
                }
                None
            }
            PasswordMode::Ignore => None,
        };

        Self::new(password, key_file)
    }

    /// Resolve from `credentials.password_mode`, `credentials.password` and
    /// `credentials.key_file`
    pub fn from_config(config: &Config) -> Result<Self> {
        let mode: PasswordMode = config.get_string(keys::PASSWORD_MODE).parse()?;
        Self::resolve(
            mode,
            &config.get_string_array(keys::PASSWORD),
            &config.get_string(keys::KEY_FILE),
        )
    }

    pub fn has_password(&self) -> bool {
        self.password.is_some()
    }

    pub fn key_file(&self) -> Option<&Path> {
        self.key_file.as_deref()
    }

    /// Key handed to the container library
    pub fn database_key(&self) -> Result<DatabaseKey> {
        let mut key = DatabaseKey::new();
        if let Some(password) = &self.password {
            key = key.with_password(password.as_str());
        }
        if let Some(path) = &self.key_file {
            let mut file = File::open(path)
                .with_context(|| format!("failed to open key file {}", path.display()))?;
            key = key
                .with_keyfile(&mut file)
                .map_err(|e| LockboxError::BadCredential(format!("unreadable key file: {}", e)))?;
        }
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn is_bad_credential(err: &anyhow::Error) -> bool {
        matches!(
            LockboxError::find(err),
            Some(LockboxError::BadCredential(_))
        )
    }

    #[test]
    fn test_password_mode_parse() {
        assert_eq!("plaintext".parse::<PasswordMode>().unwrap(), PasswordMode::Plaintext);
        assert_eq!("ignore".parse::<PasswordMode>().unwrap(), PasswordMode::Ignore);
        assert!("sometimes".parse::<PasswordMode>().is_err());
    }

    #[test]
    fn test_plaintext() {
        let cred = Credential::resolve(PasswordMode::Plaintext, &strings(&["pw"]), "").unwrap();
        assert!(cred.has_password());
        assert!(cred.key_file().is_none());

        let err = Credential::resolve(PasswordMode::Plaintext, &[], "").unwrap_err();
        assert!(is_bad_credential(&err));
    }

    #[test]
    fn test_command() {
        let cred =
            Credential::resolve(PasswordMode::Command, &strings(&["echo", "pw"]), "").unwrap();
        assert!(cred.has_password());

        let err = Credential::resolve(PasswordMode::Command, &strings(&["false"]), "").unwrap_err();
        assert!(is_bad_credential(&err));
    }

    #[test]
    fn test_none_needs_key_file() {
        let temp = TempDir::new().unwrap();
        let key = temp.path().join("db.key");
        std::fs::write(&key, b"key material").unwrap();
        let key = key.to_string_lossy().to_string();

        let cred = Credential::resolve(PasswordMode::None, &[], &key).unwrap();
        assert!(!cred.has_password());
        assert!(cred.key_file().is_some());
        assert!(cred.database_key().is_ok());

        let err = Credential::resolve(PasswordMode::None, &strings(&["pw"]), &key).unwrap_err();
        assert!(is_bad_credential(&err));

        let err = Credential::resolve(PasswordMode::None, &[], "").unwrap_err();
        assert!(is_bad_credential(&err));
    }

    #[test]
    fn test_ignore_skips_password() {
        let temp = TempDir::new().unwrap();
        let key = temp.path().join("db.key");
        std::fs::write(&key, b"key material").unwrap();

        let cred = Credential::resolve(
            PasswordMode::Ignore,
            &strings(&["pw"]),
            &key.to_string_lossy(),
        )
        .unwrap();
        assert!(!cred.has_password());

        let err = Credential::resolve(PasswordMode::Ignore, &strings(&["pw"]), "").unwrap_err();
        assert!(is_bad_credential(&err));
    }

    #[test]
    fn test_missing_key_file() {
        let err = Credential::new(Some("pw".to_string()), Some(PathBuf::from("/nonexistent/key")))
            .unwrap_err();
        assert!(is_bad_credential(&err));
    }

    #[test]
    fn test_debug_redacts() {
        let cred = Credential::new(Some("hunter2".to_string()), None).unwrap();
        assert!(!format!("{:?}", cred).contains("hunter2"));
    }
}
