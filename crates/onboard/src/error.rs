//! CLI error types with miette diagnostics.
//!
//! Maps config and reconciler failures into user-facing errors with exit
//! codes and help text.

use miette::Diagnostic;
use thiserror::Error;

use onboard_config::ConfigError;
use onboard_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONFLICT: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Configuration ────────────────────────────────────────────────

    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(onboard::profile_not_found),
        help("Available profiles: {available}\nConfig file: {path}")
    )]
    ProfileNotFound {
        name: String,
        available: String,
        path: String,
    },

    #[error("No credentials configured for profile '{profile}'")]
    #[diagnostic(
        code(onboard::no_credentials),
        help(
            "Set password_env or password in the profile, store one in the keyring\n\
             under service 'onboard' as '{profile}/password', or set ONBOARD_PASSWORD."
        )
    )]
    NoCredentials { profile: String },

    #[error(transparent)]
    #[diagnostic(code(onboard::config))]
    Config(ConfigError),

    // ── Input ────────────────────────────────────────────────────────

    #[error("Could not read {path}")]
    #[diagnostic(code(onboard::read))]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not write {path}")]
    #[diagnostic(code(onboard::write))]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in {path}: {source}")]
    #[diagnostic(code(onboard::json), help("Check the file contents and try again."))]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    // ── Reconciliation ───────────────────────────────────────────────

    #[error("Could not reach the device: {0}")]
    #[diagnostic(
        code(onboard::connection),
        help("Check the profile's host and port, or use insecure = true for self-signed certificates.")
    )]
    Connection(onboard_api::Error),

    #[error("{0}")]
    #[diagnostic(code(onboard::onboarding_failed))]
    Onboarding(CoreError),
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NoCredentials { profile } => Self::NoCredentials { profile },
            other => Self::Config(other),
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        Self::Onboarding(err)
    }
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ProfileNotFound { .. } | Self::Read { .. } | Self::Json { .. } => {
                exit_code::USAGE
            }
            Self::NoCredentials { .. } => exit_code::AUTH,
            Self::Connection(_) => exit_code::CONNECTION,
            Self::Onboarding(err) => match err.root_cause() {
                CoreError::Declaration { .. } => exit_code::USAGE,
                CoreError::Precondition { .. } => exit_code::CONFLICT,
                CoreError::Resolution { .. } => exit_code::CONNECTION,
                CoreError::RevokeTimeout => exit_code::TIMEOUT,
                CoreError::NotFound { .. } => exit_code::NOT_FOUND,
                CoreError::Api(api) => api_exit_code(api),
                _ => exit_code::GENERAL,
            },
            Self::Config(_) | Self::Write { .. } => exit_code::GENERAL,
        }
    }
}

fn api_exit_code(err: &onboard_api::Error) -> i32 {
    match err {
        onboard_api::Error::Authentication { .. } => exit_code::AUTH,
        onboard_api::Error::Timeout { .. } => exit_code::TIMEOUT,
        onboard_api::Error::Transport(_) | onboard_api::Error::Tls(_) => exit_code::CONNECTION,
        e if e.is_not_found() => exit_code::NOT_FOUND,
        _ => exit_code::GENERAL,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn phase_wrapped_precondition_is_a_conflict() {
        let err = CliError::from(
            CoreError::precondition("Cannot find MAC for given interface")
                .in_phase("Error processing DSC declaration"),
        );
        assert_eq!(err.exit_code(), exit_code::CONFLICT);
    }

    #[test]
    fn revoke_timeout_maps_to_timeout() {
        let err = CliError::from(CoreError::RevokeTimeout.in_phase("Error licensing"));
        assert_eq!(err.exit_code(), exit_code::TIMEOUT);
    }

    #[test]
    fn missing_credentials_are_an_auth_failure() {
        let err = CliError::from(ConfigError::NoCredentials {
            profile: "lab".into(),
        });
        assert_eq!(err.exit_code(), exit_code::AUTH);
    }
}
