use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::DevServerConfig;

/// Prefix for environment overrides, e.g. `DEVROUTE__BASE=/app`.
pub const ENV_PREFIX: &str = "DEVROUTE";

/// Load configuration from a file using the config crate
/// Supports multiple formats: YAML, JSON, TOML, etc.
pub async fn load_config(config_path: &str) -> Result<DevServerConfig> {
    load_config_sync(config_path)
}

/// Load configuration synchronously
pub fn load_config_sync(config_path: &str) -> Result<DevServerConfig> {
    let config_path = Path::new(config_path);

    // Determine file format based on extension
    let format = match config_path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        Some("ini") => FileFormat::Ini,
        _ => FileFormat::Toml,
    };

    let settings = Config::builder()
        .add_source(File::new(
            config_path
                .to_str()
                .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", config_path.display()))?,
            format,
        ))
        .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()
        .with_context(|| format!("Failed to build config from {}", config_path.display()))?;

    let dev_config: DevServerConfig = settings.try_deserialize().with_context(|| {
        format!(
            "Failed to deserialize config from {}",
            config_path.display()
        )
    })?;

    Ok(dev_config)
}

/// Load the file if it exists, otherwise fall back to defaults (plus env overrides).
pub fn load_config_or_default(config_path: &str) -> Result<DevServerConfig> {
    if Path::new(config_path).exists() {
        return load_config_sync(config_path);
    }

    tracing::debug!("No config file at {config_path}, using defaults");
    let settings = Config::builder()
        .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()
        .wrap_err("Failed to read environment overrides")?;
    settings
        .try_deserialize()
        .wrap_err("Failed to deserialize default config")
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;
    use crate::config::models::OutputMode;

    #[tokio::test]
    async fn test_load_yaml_config() {
        let yaml_content = r#"
listen_addr: "127.0.0.1:3000"
base: "/docs"
output: "server"
client_directives:
  idle: "/directives/idle.js"
"#;

        let mut temp_file = NamedTempFile::with_suffix(".yaml").unwrap();
        write!(temp_file, "{}", yaml_content).unwrap();

        let config = load_config(temp_file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:3000");
        assert_eq!(config.base, "/docs");
        assert_eq!(config.output, OutputMode::Server);
        assert_eq!(config.client_directives.len(), 1);
    }

    #[tokio::test]
    async fn test_load_toml_config() {
        let toml_content = r#"
root = "./site"
streaming = false

[watch]
queue_capacity = 16
"#;

        let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
        write!(temp_file, "{}", toml_content).unwrap();

        let config = load_config(temp_file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(config.root, std::path::PathBuf::from("./site"));
        assert!(!config.streaming);
        assert_eq!(config.watch.queue_capacity, 16);
        assert_eq!(config.listen_addr, "127.0.0.1:4321");
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = load_config_or_default(path.to_str().unwrap()).unwrap();
        assert_eq!(config.pages_dir, std::path::PathBuf::from("src/pages"));
    }
}
