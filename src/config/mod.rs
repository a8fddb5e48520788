// src/config/mod.rs
mod models;

pub use models::*;

use anyhow::{Context, Result};
use std::path::Path;
use url::Url;

/// Load configuration from a file (YAML or JSON).
///
/// The result is not validated yet: CLI overrides are usually applied on top
/// before calling [`Config::validate`].
pub async fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file {}", path.display()))?;

    parse_config(path, &contents)
}

fn parse_config(path: &Path, contents: &str) -> Result<Config> {
    let config: Config = match path.extension().and_then(|s| s.to_str()) {
        Some("yaml") | Some("yml") => {
            serde_yaml::from_str(contents).context("Failed to parse YAML config")?
        }
        _ => serde_json::from_str(contents).context("Failed to parse JSON config")?,
    };

    Ok(config)
}

/// Parse a comma separated list of backend origins, e.g.
/// `http://localhost:3031,http://localhost:3032`. Empty entries are skipped.
pub fn parse_server_list(raw: &str) -> Result<Vec<Url>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| Url::parse(s).with_context(|| format!("Invalid backend url '{}'", s)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_comma_separated_servers() {
        let servers =
            parse_server_list("http://localhost:3031, http://localhost:3032,,").unwrap();
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[1].port(), Some(3032));
    }

    #[test]
    fn rejects_malformed_server() {
        assert!(parse_server_list("http://ok:1,not a url").is_err());
    }

    #[test]
    fn yaml_overrides_defaults() {
        let yaml = r#"
servers:
  - http://10.0.0.1:8000
  - http://10.0.0.2:8000
policy: least-connections
health_check:
  interval_secs: 10
max_body_bytes: 65536
"#;
        let config = parse_config(Path::new("lb.yaml"), yaml).unwrap();
        assert_eq!(config.servers.len(), 2);
        assert_eq!(config.policy, SelectionPolicy::LeastConnections);
        assert_eq!(config.health_check.interval_secs, 10);
        assert_eq!(config.health_check.timeout_secs, 5);
        assert_eq!(config.max_body_bytes, 65536);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.backoff_ms, 50);
        assert_eq!(config.port, 8080);
        config.validate().unwrap();
    }

    #[test]
    fn json_is_the_fallback_format() {
        let json = r#"{ "port": 9000, "servers": ["https://api.internal"] }"#;
        let config = parse_config(Path::new("lb.conf"), json).unwrap();
        assert_eq!(config.port, 9000);
        config.validate().unwrap();
    }

    #[test]
    fn validation_rejects_bad_configs() {
        let empty = Config::default();
        assert!(empty.validate().is_err());

        let mut bad_scheme = Config::default();
        bad_scheme.servers = vec![Url::parse("ftp://files.local").unwrap()];
        assert!(bad_scheme.validate().is_err());

        let mut zero_interval = Config::default();
        zero_interval.servers = vec![Url::parse("http://a:1").unwrap()];
        zero_interval.health_check.interval_secs = 0;
        assert!(zero_interval.validate().is_err());

        let mut no_body = Config::default();
        no_body.servers = vec![Url::parse("http://a:1").unwrap()];
        no_body.max_body_bytes = 0;
        assert!(no_body.validate().is_err());
    }

    #[test]
    fn health_timeout_must_be_shorter_than_interval() {
        let mut config = Config::default();
        config.servers = vec![Url::parse("http://a:1").unwrap()];

        config.health_check.interval_secs = 5;
        config.health_check.timeout_secs = 5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("shorter than interval_secs"));

        config.health_check.timeout_secs = 10;
        assert!(config.validate().is_err());

        config.health_check.timeout_secs = 4;
        config.validate().unwrap();
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let path = std::env::temp_dir().join(format!("lb-{}.yaml", uuid::Uuid::new_v4()));
        assert!(load_config(&path).await.is_err());
    }
}
