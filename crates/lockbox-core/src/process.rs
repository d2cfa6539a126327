//! Subprocess helpers

use anyhow::{bail, Context, Result};
use std::io::Write;
use std::process::{Command, Stdio};
use tracing::debug;

fn split(argv: &[String]) -> Result<(&String, &[String])> {
    match argv.split_first() {
        Some((program, args)) if !program.is_empty() => Ok((program, args)),
        _ => bail!("empty command"),
    }
}

/// Run a command and return its stdout with surrounding whitespace trimmed
pub fn capture(argv: &[String]) -> Result<String> {
    let (program, args) = split(argv)?;
    debug!(program = %program, "running command");

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stderr(Stdio::inherit())
        .output()
        .with_context(|| format!("failed to run {}", program))?;

    if !output.status.success() {
        bail!("{} exited with {}", program, output.status);
    }

    let stdout = String::from_utf8(output.stdout)
        .with_context(|| format!("{} produced non-UTF-8 output", program))?;
    Ok(stdout.trim().to_string())
}

/// Run a command, writing `input` to its stdin, and wait for it
pub fn feed(argv: &[String], input: &[u8]) -> Result<()> {
    let (program, args) = split(argv)?;
    debug!(program = %program, "feeding command");

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .spawn()
        .with_context(|| format!("failed to run {}", program))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(input)
            .with_context(|| format!("failed to write to {}", program))?;
    }

    let status = child.wait()?;
    if !status.success() {
        bail!("{} exited with {}", program, status);
    }
    Ok(())
}

/// Start a command with null stdio and leave it running
pub fn spawn_detached(program: &str, args: &[String]) -> Result<u32> {
    debug!(program = %program, "spawning detached");
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("failed to spawn {}", program))?;
    Ok(child.id())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_capture_trims() {
        let out = capture(&argv(&["echo", "  secret  "])).unwrap();
        assert_eq!(out, "secret");
    }

    #[test]
    fn test_capture_failure() {
        assert!(capture(&argv(&["false"])).is_err());
        assert!(capture(&[]).is_err());
    }

    #[test]
    fn test_feed() {
        feed(&argv(&["cat"]), b"payload").unwrap();
        assert!(feed(&argv(&["false"]), b"").is_err());
    }
}
