use anyhow::{bail, Result};

use super::Config;

pub fn validate(config: &Config) -> Result<()> {
    if config.service.is_empty() {
        bail!("service cannot be empty");
    }
    if config.image.is_empty() {
        bail!("image cannot be empty");
    }
    if config.servers.is_empty() {
        bail!("servers cannot be empty");
    }
    for server in &config.servers {
        if server.is_empty() {
            bail!("servers cannot contain an empty address");
        }
    }
    if let Some(host) = &config.host {
        if !config.servers.contains(host) {
            bail!("host '{}' is not one of the configured servers", host);
        }
    }
    if config.ssh.user.is_empty() {
        bail!("ssh.user cannot be empty");
    }
    if config.ssh.port == Some(0) {
        bail!("ssh.port cannot be 0");
    }
    if let Some(proxy) = &config.proxy {
        if proxy.container.is_empty() {
            bail!("proxy.container cannot be empty when proxy is configured");
        }
        if proxy.image.is_empty() {
            bail!("proxy.image cannot be empty when proxy is configured");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SshConfig;
    use std::collections::BTreeMap;

    fn base_config() -> Config {
        Config {
            service: "web".into(),
            image: "registry.example.com/web".into(),
            servers: vec!["10.0.0.1".into()],
            host: None,
            ssh: SshConfig {
                user: "deploy".into(),
                port: None,
            },
            registry: Default::default(),
            proxy: None,
            build: Default::default(),
            secrets: BTreeMap::new(),
            env: BTreeMap::new(),
            transaction: Default::default(),
            debug: false,
        }
    }

    #[test]
    fn accepts_a_minimal_valid_config() {
        assert!(validate(&base_config()).is_ok());
    }

    #[test]
    fn rejects_host_not_in_servers() {
        let mut config = base_config();
        config.host = Some("9.9.9.9".into());
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_empty_service() {
        let mut config = base_config();
        config.service = String::new();
        assert!(validate(&config).is_err());
    }
}
