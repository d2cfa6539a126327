//! Command implementations behind `lb`
//!
//! Commands take a [`Session`] so tests can drive them with in-memory
//! input and output.

pub mod admin;
pub mod entries;
pub mod totp;

use std::io::{BufRead, Write};

use anyhow::{bail, Context, Result};
use lockbox_core::config::keys;
use lockbox_core::{Config, Paths};

use crate::backend::Transaction;
use crate::error::LockboxError;

/// Everything a command needs from its environment
pub struct Session<'a> {
    pub config: &'a Config,
    pub paths: &'a Paths,
    pub input: &'a mut dyn BufRead,
    pub output: &'a mut dyn Write,
    /// stdin is a terminal
    pub interactive: bool,
    /// stdout is a terminal
    pub terminal: bool,
}

impl<'a> Session<'a> {
    pub fn transaction(&self) -> Result<Transaction<'a>> {
        Transaction::new(self.config)
    }

    /// One line without its line ending, `None` at end of input
    fn read_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        if self.input.read_line(&mut line).context("failed to read input")? == 0 {
            return Ok(None);
        }
        let trimmed = line.trim_end_matches(['\r', '\n']).len();
        line.truncate(trimmed);
        Ok(Some(line))
    }

    /// The rest of the input with trailing newlines removed
    fn read_all(&mut self) -> Result<String> {
        let mut text = String::new();
        self.input
            .read_to_string(&mut text)
            .context("failed to read input")?;
        let trimmed = text.trim_end_matches(['\r', '\n']).len();
        text.truncate(trimmed);
        Ok(text)
    }

    /// Read a secret: hidden prompt on a terminal, first line otherwise
    fn read_secret(&mut self, prompt: &str) -> Result<String> {
        if self.interactive {
            return rpassword::prompt_password(prompt).context("failed to read password");
        }
        Ok(self.read_line()?.unwrap_or_default())
    }

    /// Ask a yes/no question; anything but `y`/`yes` declines
    fn confirm(&mut self, prompt: &str) -> Result<bool> {
        write!(self.output, "{} [y/N] ", prompt)?;
        self.output.flush()?;
        let answer = self.read_line()?.unwrap_or_default();
        Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
    }

    /// Confirm on a terminal; piped input always proceeds
    fn confirm_or_cancel(&mut self, prompt: &str) -> Result<()> {
        if self.interactive && !self.confirm(prompt)? {
            bail!(LockboxError::Cancelled);
        }
        Ok(())
    }

    fn require_clip(&self) -> Result<()> {
        if !self.config.get_bool(keys::FEATURE_CLIP) {
            bail!(LockboxError::Clipboard("clipboard feature is disabled".to_string()));
        }
        Ok(())
    }
}
