//! `cairn search` command implementation.

use cairn::Cairn;
use colored::Colorize;

use super::display::{entity_line, print_json};

/// Run the search command.
pub fn run(
    cairn: &Cairn,
    query: &str,
    workspace: &str,
    limit: usize,
    min_score: f32,
    json: bool,
) -> Result<(), cairn::Error> {
    let hits = cairn.search(query, workspace, limit, min_score)?;
    if json {
        return print_json(&hits);
    }

    if hits.is_empty() {
        println!("No entities found matching \"{query}\"");
        let stats = cairn.stats(workspace)?;
        if stats.vectors == 0 {
            println!(
                "\n{}: The workspace has no embeddings. Run '{}' first.",
                "hint".dimmed(),
                format!("cairn reindex {workspace}").cyan()
            );
        } else if min_score > 0.0 {
            println!(
                "\n{}: Try a lower --min-score.",
                "hint".dimmed()
            );
        }
        return Ok(());
    }

    println!(
        "Found {} entities matching \"{}\":",
        hits.len().to_string().green().bold(),
        query.cyan()
    );
    println!();
    for hit in &hits {
        println!(
            "  {} {}",
            format!("{:.3}", hit.score).yellow(),
            entity_line(&hit.entity)
        );
        if let Some(signature) = &hit.entity.signature {
            println!("        {}", signature.dimmed());
        }
    }
    Ok(())
}
