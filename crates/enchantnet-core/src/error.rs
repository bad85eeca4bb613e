//! Error types for enchantnet-core.

use crate::InstanceName;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for enchantnet-core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors produced while parsing and validating a configuration blob.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The blob was empty or whitespace only.
    #[error("configuration is empty")]
    Empty,

    /// The blob is not well-formed TOML or does not match the schema.
    #[error("configuration syntax error: {0}")]
    Syntax(#[from] toml::de::Error),

    /// A required field is absent or blank.
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    /// The instance name violates naming rules.
    #[error("invalid instance name {name:?}: {reason}")]
    InvalidName {
        /// Offending name
        name: String,
        /// Why it was rejected
        reason: &'static str,
    },

    /// An address field could not be parsed.
    #[error("invalid address in `{field}`: {value:?} ({reason})")]
    InvalidAddress {
        /// Field the value came from
        field: &'static str,
        /// Raw value
        value: String,
        /// Parser message
        reason: String,
    },

    /// A listener or peer URI is malformed or uses an unsupported scheme.
    #[error("invalid uri in `{field}`: {value:?} ({reason})")]
    InvalidUri {
        /// Field the value came from
        field: &'static str,
        /// Raw value
        value: String,
        /// What is wrong with it
        reason: String,
    },

    /// A value is syntactically fine but out of its allowed range.
    #[error("invalid value for `{field}`: {reason}")]
    InvalidValue {
        /// Field the value came from
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },

    /// The same listener appears twice.
    #[error("duplicate listener {0}")]
    DuplicateListener(String),

    /// Rendering a config back into TOML failed.
    #[error("failed to render configuration: {0}")]
    Render(#[from] toml::ser::Error),
}

/// Errors from starting a new instance.
#[derive(Debug, Error)]
pub enum StartError {
    /// An instance with the same name is already running.
    #[error("instance {0} is already running")]
    NameCollision(InstanceName),

    /// The registry is at its configured capacity.
    #[error("instance limit reached ({0})")]
    CapacityExhausted(usize),

    /// The config is valid on its own but conflicts with running state.
    #[error("instance {name} rejected: {reason}")]
    Rejected {
        /// Instance being started
        name: InstanceName,
        /// Why it was rejected
        reason: String,
    },
}

/// Errors from binding a tunnel handle.
#[derive(Debug, Error)]
pub enum BindError {
    /// No running instance has this name.
    #[error("instance {0} not found")]
    NotFound(InstanceName),

    /// The descriptor can never be valid.
    #[error("invalid tunnel descriptor {0}")]
    InvalidHandle(i32),
}

/// Errors from stopping a single instance.
#[derive(Debug, Error)]
pub enum StopError {
    /// No running instance has this name.
    #[error("instance {0} not found")]
    NotFound(InstanceName),

    /// The instance did not wind down in time and was aborted.
    #[error("instance {name} did not stop within {timeout:?}")]
    Timeout {
        /// Instance being stopped
        name: InstanceName,
        /// Grace period that elapsed
        timeout: Duration,
    },

    /// The instance task panicked.
    #[error("instance {name} task panicked: {message}")]
    Panicked {
        /// Instance being stopped
        name: InstanceName,
        /// Panic payload, when printable
        message: String,
    },
}

/// Aggregate failure of a retention sweep.
///
/// Every instance outside the retention set was removed from the registry;
/// `failures` lists the ones that did not stop cleanly.
#[derive(Debug, Error)]
#[error("{} of {attempted} instance(s) failed to stop: {}", failures.len(), summary(failures))]
pub struct RetainError {
    /// Number of instances the sweep tried to stop
    pub attempted: usize,
    /// Individual stop failures, in sweep order
    pub failures: Vec<StopError>,
}

fn summary(failures: &[StopError]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors produced while reading an invite code.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InviteError {
    /// Neither invite format matched.
    #[error("unrecognized invite code")]
    Unrecognized,

    /// The room carries no game port to forward to.
    #[error("invite code carries no game port")]
    NoPort,
}

/// Crate-level error wrapping every operation's error type.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Configuration rejected by the parser
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Instance could not be started
    #[error(transparent)]
    Start(#[from] StartError),

    /// Tunnel could not be bound
    #[error(transparent)]
    Bind(#[from] BindError),

    /// Instance could not be stopped
    #[error(transparent)]
    Stop(#[from] StopError),

    /// Retention sweep had failures
    #[error(transparent)]
    Retain(#[from] RetainError),

    /// Invite code could not be used
    #[error(transparent)]
    Invite(#[from] InviteError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> InstanceName {
        InstanceName::new(s).unwrap()
    }

    #[test]
    fn test_retain_error_lists_every_failure() {
        let err = RetainError {
            attempted: 3,
            failures: vec![
                StopError::Timeout {
                    name: name("a"),
                    timeout: Duration::from_secs(1),
                },
                StopError::Panicked {
                    name: name("b"),
                    message: "boom".into(),
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("2 of 3 instance(s) failed to stop"));
        assert!(msg.contains("instance a did not stop"));
        assert!(msg.contains("instance b task panicked: boom"));
    }

    #[test]
    fn test_core_error_is_transparent() {
        let err: CoreError = BindError::NotFound(name("n1")).into();
        assert_eq!(err.to_string(), "instance n1 not found");
    }
}
