mod validate;

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct SshConfig {
    pub user: String,
    #[serde(default)]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub container: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub args: BTreeMap<String, String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuildConfig {
    #[serde(default = "default_dockerfile")]
    pub dockerfile: String,
    #[serde(default)]
    pub args: BTreeMap<String, String>,
    #[serde(default = "default_builder")]
    pub builder: String,
    #[serde(default = "default_platform")]
    pub platform: String,
    #[serde(default = "default_driver")]
    pub driver: String,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            dockerfile: default_dockerfile(),
            args: BTreeMap::new(),
            builder: default_builder(),
            platform: default_platform(),
            driver: default_driver(),
        }
    }
}

fn default_dockerfile() -> String {
    ".".to_string()
}
fn default_builder() -> String {
    "shipcrate-hybrid".to_string()
}
fn default_platform() -> String {
    "linux/amd64".to_string()
}
fn default_driver() -> String {
    "docker-container".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransactionConfig {
    #[serde(default)]
    pub bypass: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: String,
    pub image: String,
    pub servers: Vec<String>,
    #[serde(default)]
    pub host: Option<String>,
    pub ssh: SshConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub proxy: Option<ProxyConfig>,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub secrets: BTreeMap<String, String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub transaction: TransactionConfig,
    #[serde(default)]
    pub debug: bool,
}

/// The overlay applied on top of the file and environment layers; populated by the
/// CLI's global flags.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub host: Option<String>,
    pub force: bool,
    pub debug: bool,
}

const ENV_PREFIX: &str = "SHIPCRATE_";

impl Config {
    pub fn load(path: &Path, overrides: &CliOverrides) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        let mut value: serde_yaml::Value = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;

        apply_env_overlay(&mut value, ENV_PREFIX, std::env::vars());

        let mut config: Config = serde_yaml::from_value(value)
            .with_context(|| format!("failed to apply environment overrides to {}", path.display()))?;

        if let Some(host) = &overrides.host {
            config.host = Some(host.clone());
        }
        if overrides.force {
            config.transaction.bypass = true;
        }
        if overrides.debug {
            config.debug = true;
        }

        expand_shell_vars(&mut config);

        validate::validate(&config)?;

        Ok(config)
    }
}

fn apply_env_overlay(value: &mut serde_yaml::Value, prefix: &str, vars: impl Iterator<Item = (String, String)>) {
    for (key, val) in vars {
        let Some(rest) = key.strip_prefix(prefix) else {
            continue;
        };
        let path: Vec<String> = rest
            .trim_start_matches('_')
            .split('_')
            .filter(|s| !s.is_empty())
            .map(|s| s.to_lowercase())
            .collect();
        if path.is_empty() {
            continue;
        }
        set_path(value, &path, serde_yaml::Value::String(val));
    }
}

fn set_path(value: &mut serde_yaml::Value, path: &[String], new_value: serde_yaml::Value) {
    if !value.is_mapping() {
        *value = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());
    }
    let mapping = value.as_mapping_mut().expect("just normalized to a mapping");
    let key = serde_yaml::Value::String(path[0].clone());
    if path.len() == 1 {
        mapping.insert(key, new_value);
        return;
    }
    let entry = mapping
        .entry(key)
        .or_insert_with(|| serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
    set_path(entry, &path[1..], new_value);
}

fn expand_shell_vars(config: &mut Config) {
    let lookup = |name: &str| std::env::var(name).ok();
    for value in config.secrets.values_mut() {
        *value = shell_expand(value, &lookup);
    }
    for value in config.env.values_mut() {
        *value = shell_expand(value, &lookup);
    }
    for value in config.build.args.values_mut() {
        *value = shell_expand(value, &lookup);
    }
}

/// Expands `$VAR` and `${VAR}` against `lookup`. An unresolved variable expands to
/// the empty string, matching `sh -c`'s treatment of an unset variable.
fn shell_expand(input: &str, lookup: &impl Fn(&str) -> Option<String>) -> String {
    let mut output = String::new();
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            output.push(c);
            continue;
        }
        match chars.peek() {
            Some('{') => {
                chars.next();
                let mut name = String::new();
                for c2 in chars.by_ref() {
                    if c2 == '}' {
                        break;
                    }
                    name.push(c2);
                }
                output.push_str(&lookup(&name).unwrap_or_default());
            }
            Some(&c2) if c2.is_alphabetic() || c2 == '_' => {
                let mut name = String::new();
                while let Some(&c2) = chars.peek() {
                    if c2.is_alphanumeric() || c2 == '_' {
                        name.push(c2);
                        chars.next();
                    } else {
                        break;
                    }
                }
                output.push_str(&lookup(&name).unwrap_or_default());
            }
            _ => output.push('$'),
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_expand_resolves_braced_and_bare_vars() {
        let lookup = |name: &str| match name {
            "DB_HOST" => Some("db.internal".to_string()),
            _ => None,
        };
        assert_eq!(
            shell_expand("postgres://${DB_HOST}/app", &lookup),
            "postgres://db.internal/app"
        );
        assert_eq!(shell_expand("postgres://$DB_HOST/app", &lookup), "postgres://db.internal/app");
    }

    #[test]
    fn shell_expand_unresolved_var_becomes_empty_string() {
        let lookup = |_: &str| None;
        assert_eq!(shell_expand("value=$MISSING!", &lookup), "value=!");
    }

    #[test]
    fn env_overlay_sets_nested_path() {
        let mut value: serde_yaml::Value = serde_yaml::from_str("ssh:\n  user: alice\n").unwrap();
        apply_env_overlay(
            &mut value,
            ENV_PREFIX,
            vec![("SHIPCRATE_SSH_USER".to_string(), "bob".to_string())].into_iter(),
        );
        let user = value["ssh"]["user"].as_str().unwrap();
        assert_eq!(user, "bob");
    }

    #[test]
    fn load_expands_env_and_build_args_exactly_once() {
        std::env::set_var("SHIPCRATE_TEST_DB_HOST", "db.internal");
        let yaml = r#"
service: web
image: registry.example.com/web
servers: ["10.0.0.1"]
ssh:
  user: deploy
env:
  DATABASE_URL: "postgres://$SHIPCRATE_TEST_DB_HOST/app"
"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shipcrate.yaml");
        std::fs::write(&path, yaml).unwrap();

        let config = Config::load(&path, &CliOverrides::default()).unwrap();
        assert_eq!(config.env["DATABASE_URL"], "postgres://db.internal/app");
        std::env::remove_var("SHIPCRATE_TEST_DB_HOST");
    }
}
