//! `cairn cycles` command implementation.

use cairn::Cairn;
use colored::Colorize;

use super::display::print_json;

/// Run the cycles command.
pub fn run(cairn: &Cairn, workspace: Option<&str>, json: bool) -> Result<(), cairn::Error> {
    let cycles = cairn.find_circular_dependencies(workspace)?;
    if json {
        return print_json(&cycles);
    }

    if cycles.is_empty() {
        println!("{}", "No circular dependencies detected.".green());
        return Ok(());
    }

    println!(
        "Found {} circular dependencies:",
        cycles.len().to_string().red().bold()
    );
    println!();

    for (i, cycle) in cycles.iter().enumerate() {
        println!(
            "  {} {} {}:",
            "Cycle".yellow().bold(),
            i + 1,
            format!("[{}]", cycle.namespace).dimmed()
        );

        // a → b → c → a
        let mut path = cycle
            .entities
            .iter()
            .map(|e| e.name.clone())
            .collect::<Vec<_>>()
            .join(" → ");
        if let Some(first) = cycle.entities.first() {
            path.push_str(" → ");
            path.push_str(&first.name);
        }
        println!("    {}", path.dimmed());
    }
    Ok(())
}
