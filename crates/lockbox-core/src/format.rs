//! Terminal helpers

/// Clear the screen and move the cursor home
pub const CLEAR_SCREEN: &str = "\x1B[2J\x1B[1;1H";

/// Check if stdin is a TTY
pub fn stdin_is_tty() -> bool {
    #[cfg(unix)]
    unsafe {
        libc::isatty(libc::STDIN_FILENO) != 0
    }

    #[cfg(not(unix))]
    false
}

/// Check if stdout is a TTY
pub fn stdout_is_tty() -> bool {
    #[cfg(unix)]
    unsafe {
        libc::isatty(libc::STDOUT_FILENO) != 0
    }

    #[cfg(not(unix))]
    false
}

/// Colors are on when the feature toggle allows them and `NO_COLOR` is unset
pub fn color_enabled(feature: bool) -> bool {
    feature && std::env::var_os("NO_COLOR").is_none()
}
