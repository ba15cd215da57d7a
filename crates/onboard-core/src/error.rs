// ── Core error types ──
//
// Errors surfaced by the reconcilers. Gateway failures arrive as `Api`
// and get wrapped in `Phase` at natural boundaries (licensing, the system
// declaration as a whole, the DSC declaration as a whole) so the message
// the submitter sees reads "<phase>: <cause>".

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    // ── Preconditions ────────────────────────────────────────────────
    #[error("Unable to resolve host {address}")]
    Resolution { address: String },

    /// Declared change the device cannot safely apply. Not retried.
    #[error("{message}")]
    Precondition { message: String },

    #[error("Invalid declaration: {message}")]
    Declaration { message: String },

    // ── Runtime ──────────────────────────────────────────────────────
    #[error("{phase}: {source}")]
    Phase {
        phase: &'static str,
        #[source]
        source: Box<CoreError>,
    },

    #[error("Timed out waiting for revoke ready event")]
    RevokeTimeout,

    #[error(transparent)]
    Api(#[from] onboard_api::Error),

    #[error("{what} not found: {identifier}")]
    NotFound {
        what: &'static str,
        identifier: String,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition {
            message: message.into(),
        }
    }

    pub fn resolution(address: impl Into<String>) -> Self {
        Self::Resolution {
            address: address.into(),
        }
    }

    /// Wrap with a phase prefix. Already-wrapped errors keep their
    /// innermost phase so messages never stack prefixes.
    #[must_use]
    pub fn in_phase(self, phase: &'static str) -> Self {
        match self {
            already @ Self::Phase { .. } => already,
            other => Self::Phase {
                phase,
                source: Box::new(other),
            },
        }
    }

    /// Innermost error, skipping phase wrappers.
    pub fn root_cause(&self) -> &CoreError {
        match self {
            Self::Phase { source, .. } => source.root_cause(),
            other => other,
        }
    }
}
