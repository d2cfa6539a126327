//! `lb totp`: one-time codes for entries with an `otp` field

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::{DateTime, Local, Timelike};
use colored::Colorize;
use lockbox_core::config::{keys, ColorWindow};
use lockbox_core::{format, ConfigError};

use super::{entries, Session};
use crate::backend::{QueryOptions, ValueMode};
use crate::clip::Clipboard;
use crate::entry::{self, FieldKind};
use crate::error::LockboxError;
use crate::totp::Totp;

/// Wall clock poll interval of the display loop
const TICK: Duration = Duration::from_millis(500);

const USAGE: &str = "usage: lb totp [show|once|minimal|clip|seed|url] <entry> | lb totp ls [filter]";

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Show,
    Once,
    Minimal,
    Clip,
    Seed,
    Url,
    List,
}

impl Mode {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "show" => Self::Show,
            "once" => Self::Once,
            "minimal" => Self::Minimal,
            "clip" => Self::Clip,
            "seed" => Self::Seed,
            "url" => Self::Url,
            "ls" => Self::List,
            _ => return None,
        })
    }
}

/// Entry path of the otp field, accepting the entity path alone
pub fn otp_path(entry: &str) -> String {
    if entry::is_leaf_attribute(entry, FieldKind::Otp.name()) {
        entry.to_string()
    } else {
        entry::join(entry, FieldKind::Otp.name())
    }
}

pub fn run(s: &mut Session<'_>, args: &[String]) -> Result<()> {
    if !s.config.get_bool(keys::FEATURE_TOTP) {
        bail!("totp is disabled (feature.totp = false)");
    }

    let (mode, rest) = match args {
        [] => bail!(USAGE),
        [single] if Mode::parse(single).is_none() => (Mode::Show, args),
        [first, rest @ ..] => match Mode::parse(first) {
            Some(mode) => (mode, rest),
            None => bail!(USAGE),
        },
    };

    if mode == Mode::List {
        return list(s, rest.first().map(String::as_str));
    }
    let [entry] = rest else {
        bail!(USAGE);
    };

    let path = otp_path(entry);
    let value = entries::secret(s, &path)?;
    let totp = Totp::from_config(s.config, &value).map_err(LockboxError::from)?;

    match mode {
        Mode::Seed => writeln!(s.output, "{}", totp.secret)?,
        Mode::Url => {
            writeln!(s.output, "seed: {}", totp.secret)?;
            writeln!(s.output, "algorithm: {}", totp.algorithm)?;
            writeln!(s.output, "digits: {}", totp.digits)?;
            writeln!(s.output, "period: {}", totp.period)?;
            writeln!(s.output, "url: {}", totp.url)?;
        }
        Mode::Once | Mode::Minimal => {
            let code = totp.now().map_err(LockboxError::from)?;
            writeln!(s.output, "{}", code)?;
        }
        Mode::Clip => {
            s.require_clip()?;
            let code = totp.now().map_err(LockboxError::from)?;
            Clipboard::from_config(s.config, s.paths)?.copy_and_manage(&code)?;
        }
        Mode::Show => {
            let display = Display::from_session(s, entry::directory(&path), &totp);
            install_sigint();
            display.run(
                s.output,
                Local::now,
                thread::sleep,
                || INTERRUPTED.load(Ordering::SeqCst),
            )?;
        }
        Mode::List => unreachable!("handled above"),
    }
    Ok(())
}

/// Entities carrying an otp field
fn list(s: &mut Session<'_>, filter: Option<&str>) -> Result<()> {
    let tx = s.transaction()?;
    for entity in tx.query(&QueryOptions::filter(filter, ValueMode::Blank))? {
        let entity = entity?;
        if entity.get(FieldKind::Otp).is_some() {
            writeln!(s.output, "{}", entity.path)?;
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Prime,
    Wait,
    Tick,
    Exit(Reason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reason {
    Timeout,
    Interrupted,
}

/// The refreshing code display
struct Display<'t> {
    totp: &'t Totp,
    name: String,
    windows: Vec<ColorWindow>,
    color: bool,
    clear: bool,
    timeout: i64,
}

impl<'t> Display<'t> {
    fn from_session(s: &Session<'_>, name: &str, totp: &'t Totp) -> Self {
        Self {
            totp,
            name: name.to_string(),
            windows: s.config.color_windows(),
            color: format::color_enabled(s.config.get_bool(keys::FEATURE_COLOR)),
            clear: s.terminal,
            timeout: s.config.get_int(keys::TOTP_TIMEOUT),
        }
    }

    fn run<C, P, I>(&self, out: &mut dyn Write, mut clock: C, mut pause: P, interrupted: I) -> Result<()>
    where
        C: FnMut() -> DateTime<Local>,
        P: FnMut(Duration),
        I: Fn() -> bool,
    {
        let deadline = chrono::Duration::try_seconds(self.timeout)
            .and_then(|timeout| clock().checked_add_signed(timeout))
            .ok_or_else(|| {
                LockboxError::Config(ConfigError::InvalidValue {
                    key: keys::TOTP_TIMEOUT.0.to_string(),
                    reason: format!("{} seconds is out of range", self.timeout),
                })
            })?;
        let mut last_second = None;
        let mut state = State::Prime;

        loop {
            state = match state {
                State::Prime | State::Tick => {
                    let now = clock();
                    self.render(out, now)?;
                    last_second = Some(now.second());
                    State::Wait
                }
                State::Wait => {
                    if interrupted() {
                        State::Exit(Reason::Interrupted)
                    } else if clock() >= deadline {
                        State::Exit(Reason::Timeout)
                    } else {
                        pause(TICK);
                        if Some(clock().second()) != last_second {
                            State::Tick
                        } else {
                            State::Wait
                        }
                    }
                }
                State::Exit(Reason::Timeout) => {
                    writeln!(out, "exiting (timeout)")?;
                    return Ok(());
                }
                State::Exit(Reason::Interrupted) => return Ok(()),
            };
        }
    }

    fn render(&self, out: &mut dyn Write, now: DateTime<Local>) -> Result<()> {
        let unix = u64::try_from(now.timestamp()).unwrap_or_default();
        let code = self.totp.generate(unix).map_err(LockboxError::from)?;

        let countdown = 60 - now.second();
        let mut left = countdown.to_string();
        if self.color && self.windows.iter().any(|w| w.contains(countdown)) {
            left = left.red().to_string();
        }

        if self.clear {
            write!(out, "{}", format::CLEAR_SCREEN)?;
        }
        write!(
            out,
            "{} ({})\n\n {}\n    {}\n\n-> CTRL+C to exit\n",
            now.format("%H:%M:%S"),
            left,
            self.name,
            code
        )?;
        out.flush()?;
        Ok(())
    }
}

extern "C" fn on_sigint(_: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

fn install_sigint() {
    #[cfg(unix)]
    unsafe {
        libc::signal(libc::SIGINT, on_sigint as *const () as libc::sighandler_t);
    }
}
