use std::io;
use std::path::{Path, PathBuf};

use rust_cli_config::{Environment as EnvironmentSource, File};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::environment::Environment;

/// Directory holding the configuration files, relative to the working directory.
const CONFIGURATION_DIR: &str = "configuration";

/// Extensions tried, in order, for every configuration file stem.
const CONFIG_FILE_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Prefix of environment variables overriding file values (`APP_GROUP__POLL_INTERVAL_MS`).
const ENV_PREFIX: &str = "APP";
const ENV_PREFIX_SEPARATOR: &str = "_";
const ENV_SEPARATOR: &str = "__";

/// Implemented by configuration roots that can be loaded with [`load_config`].
pub trait Config {
    /// Keys whose environment variable values are comma separated lists.
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}

#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("failed to determine the current directory: {0}")]
    CurrentDir(#[source] io::Error),

    #[error("configuration directory `{0}` does not exist")]
    MissingConfigurationDirectory(PathBuf),

    #[error("could not locate `{stem}` configuration in `{directory}`, tried: {attempted}")]
    ConfigurationFileMissing {
        stem: String,
        directory: PathBuf,
        attempted: String,
    },

    #[error("failed to determine runtime environment: {0}")]
    Environment(#[source] io::Error),

    #[error("failed to build configuration: {0}")]
    Build(#[source] rust_cli_config::ConfigError),

    #[error("failed to deserialize configuration: {0}")]
    Deserialization(#[source] rust_cli_config::ConfigError),
}

/// Loads `T` from `./configuration`, the environment specific file and `APP_` overrides.
pub fn load_config<T>() -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    let base_path = std::env::current_dir().map_err(LoadConfigError::CurrentDir)?;
    let environment = Environment::load().map_err(LoadConfigError::Environment)?;

    load_config_from(&base_path.join(CONFIGURATION_DIR), environment)
}

/// Loads `T` from an explicit configuration directory and environment.
///
/// `base.*` is read first, then `{environment}.*`, then environment variables
/// prefixed with `APP_` where `__` separates nested keys.
pub fn load_config_from<T>(directory: &Path, environment: Environment) -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    if !directory.is_dir() {
        return Err(LoadConfigError::MissingConfigurationDirectory(
            directory.to_path_buf(),
        ));
    }

    let base_file = find_configuration_file(directory, "base")?;
    let environment_file = find_configuration_file(directory, environment.as_str())?;

    let mut environment_source = EnvironmentSource::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_PREFIX_SEPARATOR)
        .separator(ENV_SEPARATOR)
        .try_parsing(true);

    if !T::LIST_PARSE_KEYS.is_empty() {
        environment_source = environment_source.list_separator(",");
        for key in T::LIST_PARSE_KEYS {
            environment_source = environment_source.with_list_parse_key(key);
        }
    }

    rust_cli_config::Config::builder()
        .add_source(File::from(base_file))
        .add_source(File::from(environment_file))
        .add_source(environment_source)
        .build()
        .map_err(LoadConfigError::Build)?
        .try_deserialize::<T>()
        .map_err(LoadConfigError::Deserialization)
}

fn find_configuration_file(directory: &Path, stem: &str) -> Result<PathBuf, LoadConfigError> {
    let candidates = CONFIG_FILE_EXTENSIONS
        .iter()
        .map(|extension| directory.join(format!("{stem}.{extension}")))
        .collect::<Vec<_>>();

    if let Some(path) = candidates.iter().find(|path| path.is_file()) {
        return Ok(path.clone());
    }

    let attempted = candidates
        .iter()
        .map(|path| format!("`{}`", path.display()))
        .collect::<Vec<_>>()
        .join(", ");

    Err(LoadConfigError::ConfigurationFileMissing {
        stem: stem.to_owned(),
        directory: directory.to_path_buf(),
        attempted,
    })
}
