//! Common display utilities for CLI commands.

use colored::Colorize;
use serde::Serialize;

use cairn::{Entity, IndexError};

const MAX_DISPLAY_ITEMS: usize = 10;

/// Print any serializable result as pretty JSON on stdout.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), cairn::Error> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| cairn::Error::Internal(format!("failed to encode JSON: {e}")))?;
    println!("{text}");
    Ok(())
}

/// `OrderService.place (method) src/orders.py:12`
pub fn entity_line(entity: &Entity) -> String {
    format!(
        "{} {} {}",
        entity.name.white().bold(),
        format!("({})", entity.kind.as_str()).dimmed(),
        format!("{}:{}", entity.file_path.display(), entity.start_line).dimmed()
    )
}

/// Display per-file errors, truncated to `MAX_DISPLAY_ITEMS`.
pub fn print_errors(errors: &[IndexError]) {
    if errors.is_empty() {
        return;
    }
    println!();
    println!("{} ({}):", "Errors".red().bold(), errors.len());
    for err in errors.iter().take(MAX_DISPLAY_ITEMS) {
        println!(
            "  {} {}: {} {}",
            "•".red(),
            err.path.display(),
            err.message,
            format!("[{}]", err.kind).dimmed()
        );
    }
    if errors.len() > MAX_DISPLAY_ITEMS {
        println!("  ... and {} more", errors.len() - MAX_DISPLAY_ITEMS);
    }
}

/// Display a bulleted list, truncated to `MAX_DISPLAY_ITEMS`.
pub fn print_bullets<I: IntoIterator<Item = String>>(items: I, total: usize, empty_message: &str) {
    if total == 0 {
        println!("    {}", empty_message.dimmed());
        return;
    }
    for item in items.into_iter().take(MAX_DISPLAY_ITEMS) {
        println!("    {} {item}", "•".dimmed());
    }
    if total > MAX_DISPLAY_ITEMS {
        println!("    {} ... and {} more", "•".dimmed(), total - MAX_DISPLAY_ITEMS);
    }
}
