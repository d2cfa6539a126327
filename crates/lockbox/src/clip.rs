//! Clipboard access and the clip manager
//!
//! After a copy, a detached `lb clipmgr <sha256>` watches the clipboard and
//! clears it once the timeout passes, unless the content changed or a newer
//! manager took over the pidfile.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use lockbox_core::config::keys;
use lockbox_core::{process, Config, Paths};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::LockboxError;

/// Consecutive paste failures tolerated by the manager
const MAX_ERRORS: u32 = 5;

/// Detect copy and paste commands for the current platform
pub fn detect(
    macos: bool,
    uname: &str,
    wayland: bool,
    display: bool,
) -> Result<(Vec<String>, Vec<String>)> {
    let argv = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();

    if macos {
        return Ok((argv(&["pbcopy"]), argv(&["pbpaste"])));
    }
    if uname.to_lowercase().contains("microsoft") {
        return Ok((
            argv(&["clip.exe"]),
            argv(&["powershell.exe", "-command", "Get-Clipboard"]),
        ));
    }
    if wayland {
        return Ok((argv(&["wl-copy"]), argv(&["wl-paste"])));
    }
    if display {
        return Ok((
            argv(&["xclip", "-selection", "clipboard"]),
            argv(&["xclip", "-selection", "clipboard", "-o"]),
        ));
    }
    bail!(LockboxError::Clipboard(
        "no clipboard available for this platform".to_string()
    ))
}

/// SHA-256 of a clipboard payload, ignoring surrounding whitespace
pub fn checksum(value: &str) -> String {
    hex::encode(Sha256::digest(value.trim().as_bytes()))
}

/// Copy/paste commands plus clip manager settings
#[derive(Debug, Clone)]
pub struct Clipboard {
    copy: Vec<String>,
    paste: Vec<String>,
    timeout: Duration,
    interval: Duration,
    pidfile: PathBuf,
}

impl Clipboard {
    pub fn new(copy: Vec<String>, paste: Vec<String>, pidfile: PathBuf) -> Self {
        Self {
            copy,
            paste,
            timeout: Duration::from_secs(120),
            interval: Duration::from_secs(1),
            pidfile,
        }
    }

    pub fn from_config(config: &Config, paths: &Paths) -> Result<Self> {
        if !config.get_bool(keys::FEATURE_CLIP) {
            bail!(LockboxError::Clipboard("clipboard feature is disabled".to_string()));
        }

        let copy = config.get_string_array(keys::CLIP_COPY_COMMAND);
        let paste = config.get_string_array(keys::CLIP_PASTE_COMMAND);
        let (copy, paste) = match (copy.is_empty(), paste.is_empty()) {
            (false, false) => (copy, paste),
            (true, true) => {
                let uname = if cfg!(target_os = "macos") {
                    String::new()
                } else {
                    process::capture(&["uname".to_string(), "-a".to_string()]).unwrap_or_default()
                };
                detect(
                    cfg!(target_os = "macos"),
                    &uname,
                    std::env::var_os("WAYLAND_DISPLAY").is_some(),
                    std::env::var_os("DISPLAY").is_some(),
                )?
            }
            _ => bail!(LockboxError::Clipboard(
                "clip.copy_command and clip.paste_command must be set together".to_string()
            )),
        };

        let pidfile = match config.get_string(keys::CLIP_PIDFILE) {
            p if p.is_empty() => paths.pidfile(),
            p => PathBuf::from(p),
        };
        let timeout = u64::try_from(config.get_int(keys::CLIP_TIMEOUT)).unwrap_or(120);

        Ok(Self::new(copy, paste, pidfile)
            .with_timing(Duration::from_secs(timeout), Duration::from_secs(1)))
    }

    /// Override how long the manager waits and how often it polls
    pub fn with_timing(mut self, timeout: Duration, interval: Duration) -> Self {
        self.timeout = timeout;
        self.interval = interval;
        self
    }

    pub fn pidfile(&self) -> &Path {
        &self.pidfile
    }

    pub fn copy(&self, value: &str) -> Result<()> {
        process::feed(&self.copy, value.as_bytes())
            .map_err(|e| LockboxError::Clipboard(format!("{:#}", e)))?;
        Ok(())
    }

    pub fn paste(&self) -> Result<String> {
        let value = process::capture(&self.paste)
            .map_err(|e| LockboxError::Clipboard(format!("{:#}", e)))?;
        Ok(value)
    }

    /// Copy, then hand the clipboard to a detached clip manager
    pub fn copy_and_manage(&self, value: &str) -> Result<()> {
        self.copy(value)?;
        let exe = std::env::current_exe().context("cannot locate lb executable")?;
        let pid = process::spawn_detached(
            &exe.to_string_lossy(),
            &["clipmgr".to_string(), checksum(value)],
        )?;
        debug!(pid, "started clip manager");
        Ok(())
    }

    /// Clip manager loop for a payload with the given checksum
    pub fn manage(&self, expected: &str) -> Result<()> {
        let pid = std::process::id();
        self.claim(pid)?;
        let started = Instant::now();
        let mut errors = 0;

        loop {
            thread::sleep(self.interval);

            if self.owner() != Some(pid) {
                debug!("clip manager replaced by a newer one");
                return Ok(());
            }

            match self.paste() {
                Ok(current) => {
                    errors = 0;
                    if checksum(&current) != expected {
                        debug!("clipboard changed, leaving it alone");
                        self.release();
                        return Ok(());
                    }
                }
                Err(e) => {
                    errors += 1;
                    warn!(error = %e, errors, "clipboard paste failed");
                    if errors >= MAX_ERRORS {
                        self.release();
                        return Err(e.context("giving up on clipboard"));
                    }
                }
            }

            if started.elapsed() >= self.timeout {
                debug!("clearing clipboard");
                let cleared = self.copy("");
                self.release();
                return cleared;
            }
        }
    }

    /// Write our pid through a temp file so readers never see a partial file
    fn claim(&self, pid: u32) -> Result<()> {
        if let Some(parent) = self.pidfile.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.pidfile.with_extension(format!("{}.tmp", pid));
        fs::write(&tmp, pid.to_string())
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.pidfile)
            .with_context(|| format!("failed to write {}", self.pidfile.display()))?;
        Ok(())
    }

    fn owner(&self) -> Option<u32> {
        fs::read_to_string(&self.pidfile)
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }

    fn release(&self) {
        if self.owner() == Some(std::process::id()) {
            let _ = fs::remove_file(&self.pidfile);
        }
    }
}
