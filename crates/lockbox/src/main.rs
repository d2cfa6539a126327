//! lb - command line secret manager
//!
//! Commands:
//! - ls/find/groups: list entries
//! - show/clip <entry>: print or copy one field
//! - insert/unset <entry>: set or clear one field
//! - rm <pattern>, mv <src> <dst>: manage entities
//! - json [filter]: hashed export
//! - totp <mode> <entry>: one-time codes
//! - rekey: change the store credentials
//! - env/vars/version/completions: information

use std::io::{self, BufRead, Write};
use std::process::ExitCode;

use anyhow::Result;
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser, Subcommand};
use lockbox::cli::{admin, entries, totp, Session};
use lockbox::LockboxError;
use lockbox_core::{format, Config, ConfigError, Paths};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "lb")]
#[command(about = "Secrets stored in a single encrypted kdbx container")]
#[command(disable_version_flag = true)]
#[command(after_help = r#"ENTRIES:
    Entries are <group-path>/<field>, where field is one of
    notes, otp, password, url. Example: web/mail/password

CONFIG:
    $LOCKBOX_CONFIG_TOML, else $XDG_CONFIG_HOME/lockbox/config.toml,
    else ~/.config/lockbox/config.toml. Run 'lb vars' for every key."#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List entry fields, optionally filtered by substring or glob
    Ls { filter: Option<String> },

    /// List entry fields whose group path matches
    Find { pattern: String },

    /// List group paths
    Groups { filter: Option<String> },

    /// Print one field
    Show { entry: String },

    /// Copy one field to the clipboard
    Clip { entry: String },

    /// Set one field from stdin or a prompt
    Insert { entry: String },

    /// Remove one field
    Unset { entry: String },

    /// Remove entities matching a glob
    Rm { pattern: String },

    /// Move an entity, or every entity matching a glob into a group
    Mv { src: String, dst: String },

    /// Re-encode the store with a new password and/or key file
    Rekey {
        /// Key file for the new credentials
        #[arg(long)]
        keyfile: Option<String>,
        /// Do not set a password
        #[arg(long)]
        nokey: bool,
    },

    /// Print entities as JSON
    Json { filter: Option<String> },

    /// One-time codes: [show|once|minimal|clip|seed|url] <entry>, or ls [filter]
    Totp {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Print the effective configuration
    Env,

    /// Print every configuration key
    Vars,

    /// Print the version
    Version,

    /// Print a shell completion script
    Completions {
        #[arg(default_value = "bash")]
        shell: String,
    },

    #[command(hide = true)]
    Clipmgr { checksum: String },
}

/// Accept the single-dash `rekey` flags after the `rekey` subcommand
fn normalize_args<I: IntoIterator<Item = String>>(args: I) -> Vec<String> {
    let mut args: Vec<String> = args.into_iter().collect();
    if args.get(1).map(String::as_str) != Some("rekey") {
        return args;
    }
    for arg in args.iter_mut().skip(2) {
        let rewritten = match arg.as_str() {
            "-keyfile" => "--keyfile".to_string(),
            "-nokey" => "--nokey".to_string(),
            other => match other.strip_prefix("-keyfile=") {
                Some(value) => format!("--keyfile={}", value),
                None => continue,
            },
        };
        *arg = rewritten;
    }
    args
}

/// Help output requested explicitly rather than a usage failure
fn is_informational(err: &clap::Error) -> bool {
    matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion)
}

/// Collapse a clap usage error to a single diagnostic line
fn usage_error(err: &clap::Error) -> String {
    if err.kind() == ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand {
        return "invalid usage: a subcommand is required (try 'lb help')".to_string();
    }
    let rendered = err.to_string();
    let cause = rendered
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("invalid arguments");
    let cause = cause.strip_prefix("error: ").unwrap_or(cause);
    format!("invalid usage: {}", cause)
}

fn load_config(paths: &Paths) -> Result<Config> {
    if !paths.config.exists() {
        if paths.explicit {
            return Err(LockboxError::Config(ConfigError::Read {
                path: paths.config.display().to_string(),
                cause: io::Error::from(io::ErrorKind::NotFound),
            })
            .into());
        }
        debug!(path = %paths.config.display(), "no config file, using defaults");
        return Ok(Config::new());
    }
    let config = Config::load(&paths.config).map_err(LockboxError::from)?;
    debug!(sources = ?config.sources(), "config loaded");
    Ok(config)
}

fn subcommand_names() -> Vec<String> {
    Cli::command()
        .get_subcommands()
        .filter(|c| !c.is_hide_set())
        .map(|c| c.get_name().to_string())
        .collect()
}

fn run(cli: Cli) -> Result<()> {
    let paths = Paths::new();
    let config = load_config(&paths)?;

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let stdout = io::stdout();
    let mut output = stdout.lock();
    let mut session = Session {
        config: &config,
        paths: &paths,
        input: &mut input as &mut dyn BufRead,
        output: &mut output as &mut dyn Write,
        interactive: format::stdin_is_tty(),
        terminal: format::stdout_is_tty(),
    };
    let s = &mut session;

    match cli.command {
        Commands::Ls { filter } => entries::list(s, filter.as_deref()),
        Commands::Find { pattern } => entries::find(s, &pattern),
        Commands::Groups { filter } => entries::groups(s, filter.as_deref()),
        Commands::Show { entry } => entries::show(s, &entry),
        Commands::Clip { entry } => entries::clip(s, &entry),
        Commands::Insert { entry } => entries::insert(s, &entry),
        Commands::Unset { entry } => entries::unset(s, &entry),
        Commands::Rm { pattern } => entries::remove(s, &pattern),
        Commands::Mv { src, dst } => entries::move_entries(s, &src, &dst),
        Commands::Rekey { keyfile, nokey } => admin::rekey(s, keyfile.as_deref(), nokey),
        Commands::Json { filter } => entries::json(s, filter.as_deref()),
        Commands::Totp { args } => totp::run(s, &args),
        Commands::Env => admin::env(s),
        Commands::Vars => admin::vars(s),
        Commands::Version => admin::version(s),
        Commands::Completions { shell } => admin::completions(s, &shell, &subcommand_names()),
        Commands::Clipmgr { checksum } => admin::clipmgr(s, &checksum),
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = match Cli::try_parse_from(normalize_args(std::env::args())) {
        Ok(cli) => cli,
        Err(err) if is_informational(&err) => {
            let _ = err.print();
            return ExitCode::SUCCESS;
        }
        Err(err) => {
            eprintln!("{}", usage_error(&err));
            return ExitCode::FAILURE;
        }
    };
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if matches!(LockboxError::find(&err), Some(LockboxError::Cancelled)) {
                return ExitCode::SUCCESS;
            }
            eprintln!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let args = normalize_args(args.iter().map(|s| s.to_string()));
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_cli_parse() {
        let cli = parse(&["lb", "ls"]);
        assert!(matches!(cli.command, Commands::Ls { filter: None }));

        let cli = parse(&["lb", "show", "web/mail/password"]);
        if let Commands::Show { entry } = cli.command {
            assert_eq!(entry, "web/mail/password");
        } else {
            panic!("Expected Show command");
        }

        let cli = parse(&["lb", "mv", "a/*", "b"]);
        if let Commands::Mv { src, dst } = cli.command {
            assert_eq!(src, "a/*");
            assert_eq!(dst, "b");
        } else {
            panic!("Expected Mv command");
        }
    }

    #[test]
    fn test_cli_rekey_flags() {
        let cli = parse(&["lb", "rekey", "-keyfile", "/tmp/k", "-nokey"]);
        if let Commands::Rekey { keyfile, nokey } = cli.command {
            assert_eq!(keyfile.as_deref(), Some("/tmp/k"));
            assert!(nokey);
        } else {
            panic!("Expected Rekey command");
        }

        let cli = parse(&["lb", "rekey", "--keyfile=/tmp/k"]);
        if let Commands::Rekey { keyfile, nokey } = cli.command {
            assert_eq!(keyfile.as_deref(), Some("/tmp/k"));
            assert!(!nokey);
        } else {
            panic!("Expected Rekey command");
        }
    }

    #[test]
    fn test_cli_totp() {
        let cli = parse(&["lb", "totp", "once", "s/otp"]);
        if let Commands::Totp { args } = cli.command {
            assert_eq!(args, vec!["once", "s/otp"]);
        } else {
            panic!("Expected Totp command");
        }
    }

    #[test]
    fn test_cli_rejects_unknown() {
        assert!(Cli::try_parse_from(["lb", "frobnicate"]).is_err());
        assert!(Cli::try_parse_from(["lb"]).is_err());
    }

    #[test]
    fn test_cli_rekey_flags_only_for_rekey() {
        let args = normalize_args(["lb", "insert", "-nokey"].map(String::from));
        assert_eq!(args, vec!["lb", "insert", "-nokey"]);

        let args = normalize_args(["lb", "totp", "once", "-keyfile=x"].map(String::from));
        assert_eq!(args[3], "-keyfile=x");

        let args = normalize_args(["lb", "rekey", "-keyfile=x", "-nokey"].map(String::from));
        assert_eq!(args, vec!["lb", "rekey", "--keyfile=x", "--nokey"]);
    }

    #[test]
    fn test_usage_errors_are_one_line() {
        for argv in [
            vec!["lb", "frob"],
            vec!["lb", "show"],
            vec!["lb"],
            vec!["lb", "mv", "a"],
        ] {
            let err = Cli::try_parse_from(argv).unwrap_err();
            assert!(!is_informational(&err));
            let line = usage_error(&err);
            assert!(line.starts_with("invalid usage: "), "{}", line);
            assert!(!line.contains('\n'));
            assert!(line.len() > "invalid usage: ".len());
        }
    }

    #[test]
    fn test_help_is_informational() {
        let err = Cli::try_parse_from(["lb", "--help"]).unwrap_err();
        assert!(is_informational(&err));
        let err = Cli::try_parse_from(["lb", "show", "--help"]).unwrap_err();
        assert!(is_informational(&err));
    }

    #[test]
    fn test_subcommand_names() {
        let names = subcommand_names();
        assert!(names.contains(&"insert".to_string()));
        assert!(names.contains(&"totp".to_string()));
        assert!(!names.contains(&"clipmgr".to_string()));
    }

    #[test]
    fn test_cli_verify() {
        Cli::command().debug_assert();
    }
}
