use camino::Utf8PathBuf;
use thiserror::Error;

pub use anyhow::Error as UnitError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Unit '{0}' is registered more than once")]
    Duplicate(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("No unit produces the required tag '{0}'")]
    NoProviderFound(String),

    #[error("Cannot satisfy required outputs: {}", .0.join(", "))]
    UnsatisfiedOutputs(Vec<String>),

    #[error("Cyclic dependency detected involving '{0}'")]
    CyclicDependency(String),
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(
        "Required outputs {} are no longer produced after dropping {}",
        .missing.join(", "),
        .dropped.join(", ")
    )]
    Unsatisfied {
        missing: Vec<String>,
        dropped: Vec<String>,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't read config file '{0}'.\n{1}")]
    Read(Utf8PathBuf, std::io::Error),

    #[error("Couldn't parse config file '{0}'.\n{1}")]
    Parse(Utf8PathBuf, serde_json::Error),

    #[error("Config file '{0}' must contain a flat JSON object")]
    NotAnObject(Utf8PathBuf),

    #[error("Config key '{1}' in '{0}' must be a string, number or boolean")]
    Nested(Utf8PathBuf, String),
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Couldn't install the global tracing subscriber.\n{0}")]
    Install(String),
}
