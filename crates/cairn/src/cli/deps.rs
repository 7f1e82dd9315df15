//! `cairn deps` command implementation.

use cairn::Cairn;
use colored::Colorize;

use super::display::{entity_line, print_bullets, print_json};

/// Run the deps command.
pub fn run(
    cairn: &Cairn,
    entity: &str,
    depth: Option<u32>,
    workspace: Option<&str>,
    json: bool,
) -> Result<(), cairn::Error> {
    let chains = cairn.dependency_chain(entity, depth, workspace)?;
    if json {
        return print_json(&chains);
    }

    println!("Dependencies of \"{}\":", entity.cyan().bold());
    for chain in &chains {
        println!();
        println!(
            "  {} {}",
            entity_line(&chain.root),
            format!("[{}]", chain.workspace).dimmed()
        );
        print_bullets(
            chain.dependencies.iter().map(|d| {
                format!(
                    "{}{} {}",
                    "  ".repeat(d.depth.saturating_sub(1) as usize),
                    entity_line(&d.entity),
                    format!("via {}", d.via.as_str()).dimmed()
                )
            }),
            chain.dependencies.len(),
            "(no dependencies)",
        );
        if chain.truncated {
            println!("    {}", "(truncated at the configured limit)".yellow());
        }
    }
    Ok(())
}
