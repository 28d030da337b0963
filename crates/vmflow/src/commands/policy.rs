use colored::Colorize;
use vmflow_compute::ShutdownRule;
use vmflow_config::Settings;

pub fn handle(settings: &Settings) -> anyhow::Result<()> {
    let policy = settings.shutdown_policy()?;

    println!("{}", "Shutdown policy".bold());
    for (field, rule) in policy.entries() {
        let overridden = settings.shutdown_policy.contains_key(field.name());
        let rule_text = match rule {
            ShutdownRule::Never => rule.name().dimmed(),
            ShutdownRule::Always => rule.name().red(),
            _ => rule.name().yellow(),
        };
        let marker = if overridden { " (override)" } else { "" };
        println!("  {:<28} {}{}", field.name(), rule_text, marker);
    }
    Ok(())
}
