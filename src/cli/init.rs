use anyhow::{bail, Context, Result};
use dialoguer::Input;
use minijinja::Environment;
use std::path::Path;

const TEMPLATE: &str = include_str!("../../templates/shipcrate.yaml.j2");

pub fn run() -> Result<()> {
    let config_path = Path::new("shipcrate.yaml");
    if config_path.exists() {
        bail!("shipcrate.yaml already exists in this directory");
    }

    let default_name = std::env::current_dir()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
        .unwrap_or_else(|| "myapp".to_string());

    let service_name: String = Input::new()
        .with_prompt("Service name")
        .default(default_name)
        .interact_text()?;

    let mut env = Environment::new();
    env.add_template("shipcrate.yaml", TEMPLATE)?;
    let tmpl = env.get_template("shipcrate.yaml").unwrap();
    let content = tmpl.render(minijinja::context! { service_name => service_name })?;

    std::fs::write(config_path, content).context("failed to write shipcrate.yaml")?;

    crate::output::success("Created shipcrate.yaml");
    crate::output::info("Edit the file to configure your servers, registry and proxy before deploying.");

    Ok(())
}
