//! `cairn reindex` and `cairn status` command implementations.

use cairn::{Cairn, CancellationToken, ReindexOptions};
use colored::Colorize;

use super::display::{print_bullets, print_errors, print_json};

/// Run the reindex command.
pub fn run(
    cairn: &Cairn,
    workspace: &str,
    remove_stale: bool,
    rebuild: bool,
    json: bool,
) -> Result<(), cairn::Error> {
    let cancel = CancellationToken::new();
    if !json {
        println!("{} {}...", "Indexing".cyan().bold(), workspace);
    }

    let report = if rebuild {
        if !json {
            println!("{}", "Rebuilding index from scratch".yellow());
        }
        cairn.rebuild(workspace, &cancel)?
    } else {
        let options = ReindexOptions {
            root: None,
            remove_stale,
        };
        cairn.reindex(workspace, &options, &cancel)?
    };

    if json {
        return print_json(&report);
    }

    println!();
    println!(
        "{} {} added, {} updated, {} removed, {} unchanged",
        "Indexed".green().bold(),
        report.added,
        report.updated,
        report.removed,
        report.unchanged
    );
    if report.relationships_linked > 0 {
        println!(
            "{}: {} relationships across files",
            "Linked".dimmed(),
            report.relationships_linked
        );
    }
    println!("{}: {:.2?}", "Duration".dimmed(), report.duration);
    if report.cancelled {
        println!("{}", "Reindex was cancelled; results are partial.".yellow());
    }
    print_errors(&report.errors);
    Ok(())
}

/// Run the status command.
pub fn status(cairn: &Cairn, workspace: &str, json: bool) -> Result<(), cairn::Error> {
    let changes = cairn.staleness(workspace)?;
    if json {
        return print_json(&changes);
    }

    if changes.is_clean() {
        println!(
            "{} {} is up to date ({} files).",
            "Clean".green().bold(),
            workspace,
            changes.unchanged.len()
        );
        return Ok(());
    }

    for (label, paths) in [
        ("Added", &changes.added),
        ("Modified", &changes.modified),
        ("Deleted", &changes.deleted),
    ] {
        println!(
            "  {} ({}):",
            label.white().bold(),
            paths.len().to_string().yellow()
        );
        print_bullets(
            paths.iter().map(|p| p.display().to_string()),
            paths.len(),
            "(none)",
        );
    }
    println!(
        "\n{}: run '{}' to apply.",
        "hint".dimmed(),
        format!("cairn reindex {workspace}").cyan()
    );
    Ok(())
}
