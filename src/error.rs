//! Error types shared by the script loader, the vehicle core and the host.

use std::path::PathBuf;

/// Failures while reading or interpreting a key-value script.
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("failed to read script {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("missing required block \"{0}\"")]
    MissingBlock(&'static str),

    #[error("key \"{key}\": cannot parse \"{value}\" as a number")]
    InvalidNumber { key: String, value: String },

    #[error("key \"{key}\": expected three components, got \"{value}\"")]
    InvalidVector { key: String, value: String },

    #[error("vehicle declares {0} axles, at most 4 are supported")]
    TooManyAxles(usize),

    #[error("vehicle declares {0} wheels per axle, at most 2 are supported")]
    TooManyWheelsPerAxle(usize),

    #[error("engine declares {0} gears, at most 6 are supported")]
    TooManyGears(usize),

    #[error("{what}: slow speed {slow} is above fast speed {fast}")]
    InvertedRange {
        what: &'static str,
        slow: f32,
        fast: f32,
    },

    #[error("{key}: rate {value} is negative")]
    NegativeRate { key: &'static str, value: f32 },

    #[error("unknown sound state \"{0}\"")]
    UnknownSoundState(String),
}

/// Failures while constructing a vehicle. Each of these is fatal: the entity
/// that requested construction is removed rather than kept half-built.
#[derive(Debug, thiserror::Error)]
pub enum VehicleError {
    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error("model has no \"{0}\" attachment")]
    MissingAttachment(&'static str),

    #[error("physics environment refused to create the chassis body")]
    ChassisCreation,

    #[error("physics environment refused to create the vehicle controller")]
    ControllerCreation,

    #[error("controller exposes {actual} wheels, script expects {expected}")]
    WheelCountMismatch { expected: usize, actual: usize },
}

/// Server configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value for {0}")]
    Invalid(&'static str),
}
