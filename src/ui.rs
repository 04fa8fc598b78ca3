#![allow(dead_code)]

use colored::Colorize;
use drift::ValidationStatus;

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.len()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Print a step indicator
pub fn step(num: usize, total: usize, msg: &str) {
    println!("{} {}", format!("[{}/{}]", num, total).blue().bold(), msg);
}

/// Colored glyph + label for a validation status
pub fn status_label(status: ValidationStatus) -> String {
    match status {
        ValidationStatus::Passed => format!("{} {}", "✓".green(), "passed".green()),
        ValidationStatus::PassedWithWarnings => {
            format!("{} {}", "⚠".yellow(), "passed with warnings".yellow())
        }
        ValidationStatus::NeedsFixes => format!("{} {}", "✗".red(), "needs fixes".red()),
        ValidationStatus::Failed => format!("{} {}", "✗".red().bold(), "failed".red().bold()),
    }
}
