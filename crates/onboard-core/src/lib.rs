// onboard-core: Declaration model and the settings/cluster reconcilers that drive onboard-api.

pub mod cluster;
pub mod config;
pub mod error;
pub mod events;
pub mod model;
pub mod rollback;
pub mod secret;
pub mod settings;
pub mod state;
pub mod util;

#[cfg(test)]
mod testing;

// ── Primary re-exports ──────────────────────────────────────────────
pub use cluster::ClusterReconciler;
pub use config::{Platform, ReconcilerOptions};
pub use error::CoreError;
pub use events::{EventBus, OnboardEvent};
pub use model::{CommonClasses, Declaration};
pub use rollback::{FileCopy, RollbackInfo};
pub use secret::{DeviceSecretCodec, SecretCodec};
pub use settings::{SettingsReconciler, SystemStatus};
pub use state::TaskState;
