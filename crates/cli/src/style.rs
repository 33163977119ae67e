//! Shared styling utilities for terminal output.

use console::Style;

/// Create a success-styled string (green with checkmark).
pub fn success(msg: &str) -> String {
    let style = Style::new().green();
    format!("{} {}", style.apply_to("✓"), msg)
}

/// Create an error-styled string (red with cross).
pub fn error(msg: &str) -> String {
    let style = Style::new().red();
    format!("{} {}", style.apply_to("✗"), msg)
}

/// Create a warning-styled string (yellow).
pub fn warn(msg: &str) -> String {
    let style = Style::new().yellow();
    format!("{} {}", style.apply_to("⚠"), msg)
}

pub fn header(msg: &str) -> String {
    Style::new().bold().apply_to(msg).to_string()
}

pub fn dim(msg: &str) -> String {
    Style::new().dim().apply_to(msg).to_string()
}

/// Shorten a commit hash for display.
pub fn short_hash(hash: &str, len: usize) -> &str {
    hash.get(..len).unwrap_or(hash)
}
