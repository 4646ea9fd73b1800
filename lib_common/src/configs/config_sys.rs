//! System-level runtime configuration discovery.
//!
//! A binary's `RuntimeConfig` is derived from its own executable name plus a
//! handful of environment variables, following the same "infer from argv0,
//! override with env" convention used throughout the `servers` binaries.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::{env, fmt};

use config::{ext::*, *};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeConfigError {
    #[error("I/O error occurred: {0}")]
    IoError(#[from] std::io::Error),

    #[error("UTF-8 error occurred: {0}")]
    Utf8Error(#[from] std::str::Utf8Error),

    #[error("environment variable error: {0}")]
    VarError(#[from] env::VarError),

    #[error("environment variable {0} is not present")]
    MissingEnvVar(String),
}

/// Runtime configuration resolved for the current process: which "mode" it is
/// running in (dev/stage/prod, ...) and where its JSON config files, if any,
/// live on disk.
#[derive(Default, Debug, Deserialize, Serialize, Clone)]
pub struct RuntimeConfig {
    pub config_running_mode: String,
    pub config_dir: String,
    pub config_global_file: String,
    pub config_mode_file: String,
    pub config_options: BTreeMap<String, String>,
}

impl RuntimeConfig {
    pub fn new(
        config_running_mode: String,
        config_dir: String,
        config_global_file: String,
        config_mode_file: String,
        config_options: BTreeMap<String, String>,
    ) -> Self {
        Self {
            config_running_mode,
            config_dir,
            config_global_file,
            config_mode_file,
            config_options,
        }
    }
}

impl fmt::Display for RuntimeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RuntimeConfig\n    Running mode: {},\n    Config dir: {},\n    Global file: {},\n    Mode file: {},\n    Options: {:?}\n",
            self.config_running_mode,
            self.config_dir,
            self.config_global_file,
            self.config_mode_file,
            self.config_options
        )
    }
}

const CONFIG_GLOBAL_NAME: &str = "config.global.json";

/// Resolves the running mode and config file locations for the current binary.
///
/// The running mode comes from `RUNNING_MODE_<BASENAME>` (uppercased), falling
/// back to `"development"` when unset. Config files are looked up under
/// `CONFIGS_LOCATION` (or the executable's own directory) and only referenced
/// in the returned struct if they actually exist; each is a plain JSON object
/// merged, key by key, into `config_options`.
pub fn get_runtime_config() -> Result<RuntimeConfig, RuntimeConfigError> {
    let current_exec = env::current_exe()?;
    let basename = process_basename(&current_exec)?;
    let running_mode = running_mode(&basename);
    let config_dir = env::var("CONFIGS_LOCATION")
        .unwrap_or_else(|_| process_location(&current_exec).unwrap_or_default());

    let global_file = PathBuf::from(&config_dir).join(CONFIG_GLOBAL_NAME);
    let mode_file = PathBuf::from(&config_dir).join(format!("{basename}.{running_mode}.json"));

    let config_data: Box<dyn ConfigurationRoot> = DefaultConfigurationBuilder::new()
        .add_json_file(&existing_path(&global_file).is().optional())
        .add_json_file(&existing_path(&mode_file).is().optional())
        .build()
        .map_err(|e| {
            RuntimeConfigError::IoError(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
        })?;

    let mut config_options = BTreeMap::new();
    for (key, value) in config_data.iter(None) {
        config_options.insert(key.to_string(), value.to_string());
    }

    Ok(RuntimeConfig::new(
        running_mode,
        config_dir,
        existing_path(&global_file),
        existing_path(&mode_file),
        config_options,
    ))
}

fn existing_path(path: &Path) -> String {
    if path.is_file() {
        path.to_string_lossy().into_owned()
    } else {
        String::new()
    }
}

fn process_basename(exe_path: &Path) -> Result<String, RuntimeConfigError> {
    exe_path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
        .ok_or_else(|| {
            RuntimeConfigError::IoError(std::io::Error::new(
                std::io::ErrorKind::Other,
                "failed to determine process basename",
            ))
        })
}

fn process_location(exe_path: &Path) -> Result<String, RuntimeConfigError> {
    exe_path
        .parent()
        .and_then(|dir| dir.to_str())
        .map(str::to_string)
        .ok_or_else(|| {
            RuntimeConfigError::IoError(std::io::Error::new(
                std::io::ErrorKind::Other,
                "failed to determine process location",
            ))
        })
}

fn running_mode(basename: &str) -> String {
    let envar = format!("RUNNING_MODE_{}", basename.to_uppercase());
    env::var(&envar).unwrap_or_else(|_| "development".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_development_mode_when_env_unset() {
        assert_eq!(running_mode("unlikely_binary_name_xyz"), "development");
    }

    #[test]
    fn running_mode_reads_uppercased_env_var() {
        let basename = "probe_bin";
        std::env::set_var("RUNNING_MODE_PROBE_BIN", "staging");
        assert_eq!(running_mode(basename), "staging");
        std::env::remove_var("RUNNING_MODE_PROBE_BIN");
    }
}
