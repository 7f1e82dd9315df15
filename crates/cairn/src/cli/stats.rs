//! `cairn stats` command implementation.

use cairn::Cairn;
use colored::Colorize;

use super::display::print_json;

/// Run the stats command.
pub fn run(cairn: &Cairn, workspace: &str, json: bool) -> Result<(), cairn::Error> {
    let stats = cairn.stats(workspace)?;
    if json {
        return print_json(&stats);
    }

    let db_path = cairn.index().path();
    let db_size = match std::fs::metadata(db_path) {
        Ok(meta) => format_size(meta.len()),
        Err(e) => {
            tracing::debug!(error = %e, "Failed to get database file size");
            "size unknown".to_string()
        }
    };

    println!("{} {}", "Cairn Index Statistics:".cyan().bold(), workspace);
    println!();
    println!(
        "  {}: {} ({})",
        "Database".white().bold(),
        db_path.display(),
        db_size
    );
    println!();
    println!(
        "  {}: {}",
        "Files".white().bold(),
        stats.files.to_string().green()
    );

    println!(
        "  {}: {} total",
        "Entities".white().bold(),
        stats.entity_count().to_string().green()
    );
    print_counts(&stats.entities_by_kind);

    println!(
        "  {}: {} total",
        "Relationships".white().bold(),
        stats.relationship_count().to_string().green()
    );
    print_counts(&stats.relationships_by_kind);
    if stats.unresolved_relationships > 0 {
        println!(
            "    {}: {}",
            "unresolved".dimmed(),
            stats.unresolved_relationships.to_string().yellow()
        );
    }

    println!(
        "  {}: {}",
        "Vectors".white().bold(),
        stats.vectors.to_string().green()
    );
    Ok(())
}

/// Counts sorted descending, then by name for deterministic output.
fn print_counts(counts: &std::collections::BTreeMap<String, usize>) {
    let mut sorted: Vec<_> = counts.iter().collect();
    sorted.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    for (kind, count) in sorted {
        println!("    {}: {}", kind.dimmed(), count);
    }
}

#[allow(clippy::cast_precision_loss)]
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;

    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
