use colored::Colorize;
use std::path::Path;

pub fn handle(explicit: Option<&Path>) -> anyhow::Result<()> {
    let (settings, source) = vmflow_config::load(explicit)?;

    match &source {
        Some(path) => println!("Settings file: {}", path.display().to_string().cyan()),
        None => {
            println!("Settings file: {}", "(none, using defaults)".dimmed());
            println!("Searched:");
            println!("  ${}", vmflow_config::CONFIG_PATH_ENV);
            for candidate in vmflow_config::CANDIDATES {
                println!("  ./{candidate}");
            }
            if let Ok(dir) = vmflow_config::settings_dir() {
                println!("  {}", dir.join("settings.yaml").display());
            }
        }
    }
    println!();
    print!("{}", serde_yaml::to_string(&settings)?);
    Ok(())
}
