use socialpilot_core::{Config, Paths};

/// Show the effective configuration as pretty-printed JSON. The API key is masked.
pub fn show(paths: &Paths) -> anyhow::Result<()> {
    let mut config = Config::load_or_default(paths)?;
    if !config.generator.api_key.is_empty() {
        config.generator.api_key = "********".to_string();
    }

    println!("# {}", paths.config_file().display());
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

pub fn init(paths: &Paths, force: bool) -> anyhow::Result<()> {
    let path = paths.config_file();
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    Config::default().save(&path)?;
    println!("Wrote {}", path.display());
    Ok(())
}
