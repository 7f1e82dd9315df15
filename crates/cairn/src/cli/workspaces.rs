//! `cairn register` and `cairn workspaces` command implementations.

use std::path::Path;

use cairn::Cairn;
use colored::Colorize;

use super::display::print_json;

/// Run the register command.
pub fn register(
    cairn: &Cairn,
    path: &Path,
    name: Option<&str>,
    json: bool,
) -> Result<(), cairn::Error> {
    let context = cairn.register_workspace(path, name)?;
    if json {
        return print_json(&context);
    }

    println!(
        "{} workspace {} at {}",
        "Registered".green().bold(),
        context.name.cyan().bold(),
        context.root_path.display()
    );
    println!("{}: {}", "Namespace".dimmed(), context.storage_namespace);
    println!(
        "\n{}: run '{}' to index it.",
        "hint".dimmed(),
        format!("cairn reindex {}", context.name).cyan()
    );
    Ok(())
}

/// Run the workspaces command.
pub fn list(cairn: &Cairn, json: bool) -> Result<(), cairn::Error> {
    let workspaces = cairn.list_workspaces()?;
    if json {
        return print_json(&workspaces);
    }

    if workspaces.is_empty() {
        println!("No workspaces registered.");
        println!(
            "\n{}: register one with '{}'.",
            "hint".dimmed(),
            "cairn register <path>".cyan()
        );
        return Ok(());
    }

    for ws in &workspaces {
        println!(
            "  {} {}",
            ws.name.white().bold(),
            ws.root_path.display().to_string().dimmed()
        );
        println!(
            "    {} {}, registered {}",
            "•".dimmed(),
            ws.storage_namespace,
            ws.registered_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}
