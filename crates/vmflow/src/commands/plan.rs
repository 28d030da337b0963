use crate::OutputFormat;
use crate::utils::{join_or_dash, load_document};
use colored::Colorize;
use serde::Serialize;
use std::path::Path;
use vmflow_compute::{Planner, Section, UpdatePlan, VirtualMachineConfig};
use vmflow_config::Settings;

/// Whether applying the plan powers the machine off
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum PowerCycle {
    None,
    /// Depends on the remote power state, size availability or priority
    Conditional,
    Required,
}

impl PowerCycle {
    fn of(plan: &UpdatePlan) -> Self {
        if plan.requires_shutdown {
            PowerCycle::Required
        } else if plan.requires_restart {
            PowerCycle::Conditional
        } else {
            PowerCycle::None
        }
    }
}

#[derive(Serialize)]
struct PlanReport<'a> {
    generated_at: String,
    resource_group: &'a str,
    name: &'a str,
    sections: Vec<Section>,
    power_cycle: PowerCycle,
    plan: &'a UpdatePlan,
}

pub fn handle(
    settings: &Settings,
    desired: &Path,
    last_known: &Path,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let desired: VirtualMachineConfig = load_document(desired)?;
    let last_known: VirtualMachineConfig = load_document(last_known)?;

    let planner = Planner::new(settings.shutdown_policy()?);
    let plan = planner.plan(&desired, &last_known)?;

    let report = PlanReport {
        generated_at: chrono::Utc::now().to_rfc3339(),
        resource_group: &desired.resource_group,
        name: &desired.name,
        sections: plan.sections().into_iter().collect(),
        power_cycle: PowerCycle::of(&plan),
        plan: &plan,
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_text(&report),
    }
    Ok(())
}

fn print_text(report: &PlanReport<'_>) {
    let plan = report.plan;
    println!(
        "{} {}/{}",
        "Plan for".bold(),
        report.resource_group,
        report.name.cyan()
    );

    if plan.is_empty() {
        println!("  {}", "No changes".green());
        return;
    }

    println!("  {:<14} {}", "Changed:", join_or_dash(&plan.fields_changed));
    println!("  {:<14} {}", "Sections:", join_or_dash(&report.sections));
    if plan.has_replacements() {
        println!(
            "  {:<14} {}",
            "Replace:",
            join_or_dash(&plan.replacements).red()
        );
        println!(
            "  {}",
            "These fields cannot change in place; the machine must be re-created".yellow()
        );
    }

    let rules: Vec<String> = plan
        .shutdown_rules
        .iter()
        .map(|(field, rule)| format!("{field} ({rule})"))
        .collect();
    let power = match report.power_cycle {
        PowerCycle::None => "not needed".green(),
        PowerCycle::Conditional => "depends on the remote machine".yellow(),
        PowerCycle::Required => "required".red(),
    };
    println!("  {:<14} {}", "Power cycle:", power);
    if !rules.is_empty() {
        println!("  {:<14} {}", "Rules:", rules.join(", "));
    }
    let conditional = plan.conditional_fields();
    if !conditional.is_empty() {
        println!("  {:<14} {}", "Checked live:", join_or_dash(&conditional));
    }
    if plan.needs_size_check() {
        println!(
            "  {}",
            "Size availability is checked against the running host before updating".dimmed()
        );
    }
}
