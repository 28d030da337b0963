use anyhow::Context;
use serde::de::DeserializeOwned;
use std::path::Path;

/// Read a YAML or JSON document, picking the parser by extension
pub fn load_document<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let parsed = if is_json {
        serde_json::from_str(&content).map_err(anyhow::Error::from)
    } else {
        serde_yaml::from_str(&content).map_err(anyhow::Error::from)
    };
    parsed.with_context(|| format!("failed to parse {}", path.display()))
}

/// Comma-separated list, or a dash when empty
pub fn join_or_dash<I, T>(items: I) -> String
where
    I: IntoIterator<Item = T>,
    T: std::fmt::Display,
{
    let joined: Vec<String> = items.into_iter().map(|i| i.to_string()).collect();
    if joined.is_empty() {
        "-".to_string()
    } else {
        joined.join(", ")
    }
}
