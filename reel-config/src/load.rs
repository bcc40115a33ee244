use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::environment::{Environment, UnknownEnvironment};

/// Directory, relative to the working directory, holding the configuration files.
const CONFIGURATION_DIR: &str = "configuration";

/// Extensions probed, in order, for every layer.
const EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Environment variables overriding file values look like `APP_TOPOLOGY__JOINER_SHARDS`.
const ENV_PREFIX: &str = "APP";
const ENV_NESTING: &str = "__";

/// Root configuration structures loaded through [`load_config`].
pub trait Config {
    /// Keys whose environment values are comma separated lists.
    const LIST_PARSE_KEYS: &'static [&'static str];
}

#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("failed to determine the current directory: {0}")]
    CurrentDir(#[source] io::Error),

    #[error("configuration directory `{0}` does not exist")]
    MissingDirectory(PathBuf),

    #[error("no `{stem}` configuration in `{directory}` (tried {tried})")]
    MissingFile {
        stem: &'static str,
        directory: PathBuf,
        tried: String,
    },

    /// A layer exists but does not parse.
    #[error("invalid configuration file `{path}`: {source}")]
    InvalidFile {
        path: PathBuf,
        source: config::ConfigError,
    },

    #[error(transparent)]
    Environment(#[from] UnknownEnvironment),

    /// The merged layers do not fit the target structure.
    #[error("failed to build configuration: {0}")]
    Build(#[source] config::ConfigError),
}

/// Loads `T` from `./configuration`. See [`load_config_from`].
pub fn load_config<T>() -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    let cwd = std::env::current_dir().map_err(LoadConfigError::CurrentDir)?;
    load_config_from(&cwd.join(CONFIGURATION_DIR))
}

/// Loads `T` from `directory`, merging, from lowest to highest precedence:
///
/// 1. `base.{yaml,yml,json}`
/// 2. `dev.*` or `prod.*`, as picked by `APP_ENVIRONMENT`
/// 3. `APP_` environment variables
pub fn load_config_from<T>(directory: &Path) -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    if !directory.is_dir() {
        return Err(LoadConfigError::MissingDirectory(directory.to_path_buf()));
    }

    let environment = Environment::load()?;

    let mut builder = config::Config::builder();
    for stem in ["base", environment.as_str()] {
        let path = locate(directory, stem)?;
        builder = builder.add_source(config::File::from(path.as_path()));

        // Parse each layer as it is added so a failure names its file.
        if let Err(source) = builder.build_cloned() {
            return Err(LoadConfigError::InvalidFile { path, source });
        }
    }

    let mut overrides = config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator(ENV_NESTING)
        .try_parsing(true);
    if !T::LIST_PARSE_KEYS.is_empty() {
        overrides = overrides.list_separator(",");
        for key in T::LIST_PARSE_KEYS {
            overrides = overrides.with_list_parse_key(key);
        }
    }

    builder
        .add_source(overrides)
        .build()
        .and_then(config::Config::try_deserialize)
        .map_err(LoadConfigError::Build)
}

fn locate(directory: &Path, stem: &'static str) -> Result<PathBuf, LoadConfigError> {
    let candidates: Vec<PathBuf> = EXTENSIONS
        .iter()
        .map(|extension| directory.join(format!("{stem}.{extension}")))
        .collect();

    match candidates.iter().find(|path| path.is_file()) {
        Some(path) => Ok(path.clone()),
        None => Err(LoadConfigError::MissingFile {
            stem,
            directory: directory.to_path_buf(),
            tried: candidates
                .iter()
                .map(|path| path.display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
        }),
    }
}
