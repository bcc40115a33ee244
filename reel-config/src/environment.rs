use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Variable selecting the override file layered on top of `base`.
const ENVIRONMENT_VAR: &str = "APP_ENVIRONMENT";

/// Deployment a worker runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// Local runs, including the in-process topology.
    #[default]
    Dev,
    Prod,
}

/// `APP_ENVIRONMENT` names neither `dev` nor `prod`.
#[derive(Debug, Error)]
#[error("unsupported environment `{0}`, expected `dev` or `prod`")]
pub struct UnknownEnvironment(pub String);

impl Environment {
    /// Reads `APP_ENVIRONMENT`; an unset variable means [`Environment::Dev`].
    pub fn load() -> Result<Environment, UnknownEnvironment> {
        match std::env::var(ENVIRONMENT_VAR) {
            Ok(name) => name.parse(),
            Err(_) => Ok(Environment::default()),
        }
    }

    /// File stem of this environment's configuration file.
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Dev => "dev",
            Environment::Prod => "prod",
        }
    }
}

impl FromStr for Environment {
    type Err = UnknownEnvironment;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        if name.eq_ignore_ascii_case("dev") {
            Ok(Environment::Dev)
        } else if name.eq_ignore_ascii_case("prod") {
            Ok(Environment::Prod)
        } else {
            Err(UnknownEnvironment(name.to_string()))
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
