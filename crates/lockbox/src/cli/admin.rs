//! Store and informational commands: rekey, env, vars, version,
//! completions, clipmgr

use std::path::PathBuf;

use anyhow::{bail, Result};
use lockbox_core::config::{keys, REGISTRY};

use super::Session;
use crate::clip::Clipboard;
use crate::credential::Credential;
use crate::error::LockboxError;

const REDACTED: &str = "********";

/// Re-encode the store with a new password and/or key file
pub fn rekey(s: &mut Session<'_>, key_file: Option<&str>, nokey: bool) -> Result<()> {
    let tx = s.transaction()?;
    tx.ensure_writable()?;

    let password = if nokey {
        None
    } else {
        let first = s.read_secret("new password: ")?;
        if s.interactive {
            let second = s.read_secret("confirm: ")?;
            if first != second {
                bail!(LockboxError::BadCredential(
                    "passwords do not match".to_string()
                ));
            }
        }
        Some(first)
    };

    let credential = Credential::new(password, key_file.map(PathBuf::from))?;
    tx.rekey(&credential)
}

/// Effective configuration as `LOCKBOX_*` assignments
pub fn env(s: &mut Session<'_>) -> Result<()> {
    for (def, value) in s.config.effective() {
        let mut shown = value.to_string();
        if def.name == keys::PASSWORD.0 && !shown.is_empty() {
            shown = REDACTED.to_string();
        }
        writeln!(s.output, "{}={}", def.env_name(), shown)?;
    }
    Ok(())
}

/// Every recognized key with its type and meaning
pub fn vars(s: &mut Session<'_>) -> Result<()> {
    for def in REGISTRY {
        writeln!(
            s.output,
            "{:<36} {:<7} {}",
            def.env_name(),
            def.kind().to_string(),
            def.description
        )?;
    }
    Ok(())
}

pub fn version(s: &mut Session<'_>) -> Result<()> {
    writeln!(s.output, "lb {}", env!("CARGO_PKG_VERSION"))?;
    Ok(())
}

/// Shell completion script offering subcommands, then entry paths
pub fn completions(s: &mut Session<'_>, shell: &str, commands: &[String]) -> Result<()> {
    let words = commands.join(" ");
    let script = match shell {
        "bash" => format!(
            r#"_lb() {{
    local cur="${{COMP_WORDS[COMP_CWORD]}}"
    if [ "$COMP_CWORD" -eq 1 ]; then
        COMPREPLY=($(compgen -W "{words}" -- "$cur"))
    else
        COMPREPLY=($(compgen -W "$(lb groups 2>/dev/null) $(lb ls 2>/dev/null)" -- "$cur"))
    fi
}}
complete -F _lb lb"#
        ),
        "zsh" => format!(
            r#"#compdef lb

_lb() {{
    if (( CURRENT == 2 )); then
        compadd -- {words}
    else
        compadd -- $(lb groups 2>/dev/null) $(lb ls 2>/dev/null)
    fi
}}

compdef _lb lb"#
        ),
        other => bail!("unsupported shell: {} (expected bash or zsh)", other),
    };
    writeln!(s.output, "{}", script)?;
    Ok(())
}

/// Background clipboard clearing for a payload checksum
pub fn clipmgr(s: &mut Session<'_>, checksum: &str) -> Result<()> {
    Clipboard::from_config(s.config, s.paths)?.manage(checksum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::entries;
    use crate::cli::testing::Harness;

    #[test]
    fn test_rekey() {
        let mut h = Harness::new("");
        h.run("hunter2\n", |s| entries::insert(s, "t/u/password"))
            .unwrap();

        h.run("pw2\n", |s| rekey(s, None, false)).unwrap();

        let err = h.run("", |s| entries::show(s, "t/u/password")).unwrap_err();
        assert!(matches!(
            LockboxError::find(&err),
            Some(LockboxError::Codec(_) | LockboxError::BadCredential(_))
        ));

        h.reconfigure("pw2", "");
        let out = h.run("", |s| entries::show(s, "t/u/password")).unwrap();
        assert_eq!(out, "hunter2\n");
    }

    #[test]
    fn test_rekey_to_key_file() {
        let mut h = Harness::new("");
        h.run("p\n", |s| entries::insert(s, "t/password")).unwrap();

        let key = h.temp.path().join("db.key");
        std::fs::write(&key, b"0123456789abcdef0123456789abcdef").unwrap();
        let key = key.display().to_string();

        let err = h.run("", |s| rekey(s, None, true)).unwrap_err();
        assert!(matches!(
            LockboxError::find(&err),
            Some(LockboxError::BadCredential(_))
        ));

        h.run("", |s| rekey(s, Some(&key), true)).unwrap();

        h.reconfigure_raw(&format!(
            "[credentials]\npassword_mode = \"none\"\nkey_file = \"{}\"",
            key
        ));
        let out = h.run("", |s| entries::show(s, "t/password")).unwrap();
        assert_eq!(out, "p\n");

        h.reconfigure("pw", "");
        assert!(h.run("", |s| entries::show(s, "t/password")).is_err());
    }

    #[test]
    fn test_rekey_readonly() {
        let h = Harness::new("readonly = true");
        let err = h.run("pw2\n", |s| rekey(s, None, false)).unwrap_err();
        assert!(matches!(
            LockboxError::find(&err),
            Some(LockboxError::ReadOnly)
        ));
    }

    #[test]
    fn test_env_redacts_password() {
        let h = Harness::new("");
        let out = h.run("", env).unwrap();
        assert!(out.contains("LOCKBOX_CREDENTIALS_PASSWORD_MODE=plaintext\n"));
        assert!(out.contains(&format!("LOCKBOX_CREDENTIALS_PASSWORD={}\n", REDACTED)));
        assert!(out.contains("LOCKBOX_TOTP_COLOR_WINDOWS=0:5 30:35\n"));
        assert!(!out.contains("=pw\n"));
    }

    #[test]
    fn test_vars_and_version() {
        let h = Harness::new("");
        let out = h.run("", vars).unwrap();
        assert_eq!(out.lines().count(), REGISTRY.len());
        assert!(out.contains("LOCKBOX_JSON_HASH_LENGTH"));

        let out = h.run("", version).unwrap();
        assert_eq!(out, format!("lb {}\n", env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn test_completions() {
        let h = Harness::new("");
        let commands = vec!["ls".to_string(), "show".to_string()];
        let out = h.run("", |s| completions(s, "bash", &commands)).unwrap();
        assert!(out.contains("compgen -W \"ls show\""));
        assert!(out.contains("complete -F _lb lb"));

        let out = h.run("", |s| completions(s, "zsh", &commands)).unwrap();
        assert!(out.starts_with("#compdef lb"));

        assert!(h.run("", |s| completions(s, "fish", &commands)).is_err());
    }
}
