use anyhow::{anyhow, Context};
use serde::Deserialize;
use std::{fs, path::Path};
use tracing::Level;

// ******** ******** ********
// **    CONFIGURATION     **
// ******** ******** ********
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub settings: Settings,
    pub store: Store,
    pub launch: Launch,
}

impl Config {
    /// Reads the settings file if it exists; a missing file means defaults.
    /// `check` works without any configuration, `start` validates the launch
    /// section separately before anything is written.
    pub fn try_from_path(path: &Path) -> anyhow::Result<Config> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let config_str = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Config::try_from_str(&config_str)
    }

    pub fn try_from_str(conf_str: &str) -> anyhow::Result<Config> {
        toml::from_str::<Config>(conf_str).map_err(|e| anyhow!("TOML parsing error: {}", e))
    }

    /// Converts the configured debug level to the corresponding tracing
    /// level. `--verbose` wins over the settings file.
    pub fn log_level(&self, verbose: bool) -> Level {
        if verbose {
            return Level::DEBUG;
        }
        match self.settings.debug_level {
            Some(ref level) => match level.to_lowercase().as_str() {
                "trace" => Level::TRACE,
                "debug" => Level::DEBUG,
                "info" => Level::INFO,
                "warn" => Level::WARN,
                "error" => Level::ERROR,
                _ => {
                    eprintln!(
                        "Error with config debug level: {}, setting debug level to \"error\"",
                        level
                    );
                    Level::ERROR
                }
            },
            None => Level::INFO,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub debug_level: Option<String>,
    /// Seconds to sleep between collector poll cycles.
    pub poll_interval_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            debug_level: None,
            poll_interval_secs: 60,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Store {
    pub bucket: String,
}

impl Default for Store {
    fn default() -> Self {
        Store {
            bucket: "mz-cloudbench".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Launch {
    pub repo_url: Option<String>,
    pub subnet_id: Option<String>,
    pub security_group_id: Option<String>,
    pub instance_profile: Option<String>,
    pub key_name: Option<String>,
    pub owner: Option<String>,
    /// Directory containing the benchmark driver to package and ship.
    pub driver_dir: String,
    /// Hours until launched instances are tagged for deletion.
    pub expiry_hours: i64,
}

impl Default for Launch {
    fn default() -> Self {
        Launch {
            repo_url: None,
            subnet_id: None,
            security_group_id: None,
            instance_profile: None,
            key_name: None,
            owner: None,
            driver_dir: "driver".to_string(),
            expiry_hours: 24,
        }
    }
}

impl Launch {
    /// Resolves the launch parameters, falling back to environment variables
    /// for anything the settings file leaves unset. A missing required value
    /// is a fatal configuration error, reported before any manifest is
    /// written.
    pub fn resolve(&self) -> anyhow::Result<LaunchParams> {
        Ok(LaunchParams {
            repo_url: value_or_env(&self.repo_url, "CLOUDBENCH_REPO_URL")?,
            subnet_id: value_or_env(&self.subnet_id, "CLOUDBENCH_SUBNET_ID")?,
            security_group_id: value_or_env(
                &self.security_group_id,
                "CLOUDBENCH_SECURITY_GROUP_ID",
            )?,
            instance_profile: value_or_env(&self.instance_profile, "CLOUDBENCH_INSTANCE_PROFILE")?,
            key_name: self
                .key_name
                .clone()
                .or_else(|| dotenvy::var("CLOUDBENCH_KEY_NAME").ok()),
            owner: self
                .owner
                .clone()
                .or_else(|| dotenvy::var("USER").ok())
                .context("owner must be set in config or the USER environment variable")?,
            expiry_hours: self.expiry_hours,
        })
    }
}

fn value_or_env(value: &Option<String>, var: &str) -> anyhow::Result<String> {
    match value {
        Some(v) => Ok(v.clone()),
        None => dotenvy::var(var)
            .map_err(|_| anyhow!("{} must be set in config or env var (config takes priority)", var)),
    }
}

/// Fully resolved launch parameters, everything the fleet launcher and the
/// provisioner need.
#[derive(Debug, Clone)]
pub struct LaunchParams {
    pub repo_url: String,
    pub subnet_id: String,
    pub security_group_id: String,
    pub instance_profile: String,
    pub key_name: Option<String>,
    pub owner: String,
    pub expiry_hours: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_sections_are_missing() -> anyhow::Result<()> {
        let config = Config::try_from_str("")?;

        assert_eq!(config.store.bucket, "mz-cloudbench");
        assert_eq!(config.settings.poll_interval_secs, 60);
        assert_eq!(config.launch.expiry_hours, 24);
        assert_eq!(config.launch.driver_dir, "driver");

        Ok(())
    }

    #[test]
    fn sections_override_defaults() -> anyhow::Result<()> {
        let config = Config::try_from_str(
            r#"
            [settings]
            debug_level = "warn"
            poll_interval_secs = 5

            [store]
            bucket = "my-bench-results"

            [launch]
            subnet_id = "subnet-123"
            "#,
        )?;

        assert_eq!(config.store.bucket, "my-bench-results");
        assert_eq!(config.settings.poll_interval_secs, 5);
        assert_eq!(config.launch.subnet_id.as_deref(), Some("subnet-123"));
        assert_eq!(config.log_level(false), Level::WARN);
        assert_eq!(config.log_level(true), Level::DEBUG);

        Ok(())
    }

    #[test]
    fn resolve_reports_the_missing_key() {
        std::env::remove_var("CLOUDBENCH_REPO_URL");
        let launch = Launch::default();

        let err = launch.resolve().unwrap_err();
        assert!(err.to_string().contains("CLOUDBENCH_REPO_URL"));
    }
}
