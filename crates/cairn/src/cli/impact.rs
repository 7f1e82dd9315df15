//! `cairn impact` command implementation.

use cairn::{Cairn, ImpactReport};
use colored::Colorize;

use super::display::{entity_line, print_bullets, print_json};

/// Run the impact command.
pub fn run(
    cairn: &Cairn,
    entity: &str,
    workspace: Option<&str>,
    json: bool,
) -> Result<(), cairn::Error> {
    let reports = cairn.impact_analysis(entity, workspace)?;
    if json {
        return print_json(&reports);
    }

    println!("Impact analysis for \"{}\":", entity.cyan().bold());
    for report in &reports {
        print_report(report);
    }
    Ok(())
}

fn print_report(report: &ImpactReport) {
    println!();
    println!(
        "  {} {}",
        entity_line(&report.target),
        format!("[{}]", report.workspace).dimmed()
    );

    let direct = report.impacted.iter().filter(|i| i.distance == 1).count();
    println!(
        "  {} ({} direct, {} total{}):",
        "Dependents".white().bold(),
        direct.to_string().green(),
        report.impacted.len().to_string().yellow(),
        if report.truncated { ", truncated" } else { "" }
    );
    print_bullets(
        report.impacted.iter().map(|i| {
            format!(
                "{} {}",
                entity_line(&i.entity),
                format!("via {} at distance {}", i.via.as_str(), i.distance).dimmed()
            )
        }),
        report.impacted.len(),
        "(nothing depends on it)",
    );
}
