use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::FunctestError;

pub const DEFAULT_CONFIG_YAML: &str = include_str!("../config/default.yaml");
pub const CONFIG_ENV: &str = "PACK8S_FUNCTEST_CONFIG";
pub const TEST_DIR_ENV: &str = "PACK8S_FUNCTEST_DIR";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub version: u32,
    pub timeout_sec: u64,
    pub runtime: String,
    pub helper_binary: String,
    pub query_tool: String,
    pub namespace: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: 1,
            timeout_sec: 300,
            runtime: "podman".to_string(),
            helper_binary: "pack8s".to_string(),
            query_tool: "oc".to_string(),
            namespace: None,
        }
    }
}

impl Config {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_sec)
    }
}

/// Where a config file path came from. Only an explicitly named file is
/// required to exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Flag(PathBuf),
    Env(PathBuf),
    Default(PathBuf),
}

impl ConfigSource {
    pub fn path(&self) -> &Path {
        match self {
            Self::Flag(path) | Self::Env(path) | Self::Default(path) => path,
        }
    }
}

pub fn resolve_config_path(override_path: Option<&PathBuf>) -> ConfigSource {
    if let Some(path) = override_path {
        return ConfigSource::Flag(path.clone());
    }
    if let Ok(path) = env::var(CONFIG_ENV) {
        return ConfigSource::Env(PathBuf::from(path));
    }
    let mut base = config_dir().unwrap_or_else(|| PathBuf::from("."));
    base.push("pack8s-functest");
    base.push("config.yaml");
    ConfigSource::Default(base)
}

pub fn load_config(source: &ConfigSource) -> Result<Config, FunctestError> {
    let path = source.path();
    if !path.exists() {
        return match source {
            ConfigSource::Default(_) => Ok(Config::default()),
            _ => Err(FunctestError::Configuration(format!(
                "config file not found: {}",
                path.display()
            ))),
        };
    }
    let content = fs::read_to_string(path)?;
    read_config_from_str(&content)
}

pub fn read_config_from_str(content: &str) -> Result<Config, FunctestError> {
    let cfg: Config = serde_yaml::from_str(content)?;
    validate_config(&cfg)?;
    Ok(cfg)
}

fn validate_config(cfg: &Config) -> Result<(), FunctestError> {
    if cfg.version != 1 {
        return Err(FunctestError::Configuration(format!(
            "unsupported config version {}",
            cfg.version
        )));
    }
    if cfg.timeout_sec == 0 {
        return Err(FunctestError::Configuration(
            "timeout_sec must be greater than zero".to_string(),
        ));
    }
    for (field, value) in [
        ("runtime", &cfg.runtime),
        ("helper_binary", &cfg.helper_binary),
        ("query_tool", &cfg.query_tool),
    ] {
        if value.trim().is_empty() {
            return Err(FunctestError::Configuration(format!(
                "{field} must not be empty"
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestDirSource {
    CommandLine,
    Environment,
}

impl TestDirSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CommandLine => "command line",
            Self::Environment => "environment variable",
        }
    }
}

pub fn resolve_test_dir(arg: Option<&PathBuf>) -> Option<(PathBuf, TestDirSource)> {
    if let Some(path) = arg {
        return Some((path.clone(), TestDirSource::CommandLine));
    }
    env::var_os(TEST_DIR_ENV).map(|dir| (PathBuf::from(dir), TestDirSource::Environment))
}
