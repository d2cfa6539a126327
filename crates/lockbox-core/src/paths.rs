//! Standard paths used by lockbox

use std::path::PathBuf;

/// Explicit config file override
pub const CONFIG_ENV: &str = "LOCKBOX_CONFIG_TOML";

const APP_DIR: &str = "lockbox";
const CONFIG_FILE: &str = "config.toml";
const PIDFILE: &str = "lockbox.clip.pid";

/// Standard lockbox paths
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    /// Config file (`$LOCKBOX_CONFIG_TOML` or `…/lockbox/config.toml`)
    pub config: PathBuf,
    /// Whether `config` came from `LOCKBOX_CONFIG_TOML`
    pub explicit: bool,
    /// Runtime directory for the clip manager pidfile
    pub runtime: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

impl Paths {
    pub fn new() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolve paths through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.is_empty());

        let (config, explicit) = match non_empty(CONFIG_ENV) {
            Some(path) => (PathBuf::from(path), true),
            None => {
                let base = non_empty("XDG_CONFIG_HOME")
                    .map(PathBuf::from)
                    .or_else(|| non_empty("HOME").map(|home| PathBuf::from(home).join(".config")))
                    .or_else(dirs::config_dir)
                    .unwrap_or_else(|| PathBuf::from("."));
                (base.join(APP_DIR).join(CONFIG_FILE), false)
            }
        };

        let runtime = non_empty("XDG_RUNTIME_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);

        Self {
            config,
            explicit,
            runtime,
        }
    }

    /// Default clip manager pidfile
    pub fn pidfile(&self) -> PathBuf {
        self.runtime.join(PIDFILE)
    }
}
