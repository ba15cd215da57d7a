// ── Reconciler tuning ──
//
// Knobs the driver hands to the reconcilers. Defaults are the production
// timings; tests shorten them. Core never reads config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio_util::sync::CancellationToken;

/// Where the reconciler runs relative to the device.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Platform {
    /// On the device itself.
    #[default]
    BigIp,
    /// In a container, talking to the device remotely.
    Container,
}

#[derive(Debug, Clone)]
pub struct ReconcilerOptions {
    pub platform: Platform,
    /// How long to wait for `ReadyForRevoke` after announcing a revoke.
    pub revoke_ready_timeout: Duration,
    /// Pause after revoking a reachable license while services restart.
    pub post_revoke_wait: Duration,
    /// Pause after asking a remote device to reboot, before polling readiness.
    pub reboot_delay: Duration,
    /// Cancelled only when the process shuts down. A device rebooting
    /// itself waits on this instead of racing its own restart.
    pub shutdown: CancellationToken,
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        Self {
            platform: Platform::BigIp,
            revoke_ready_timeout: Duration::from_secs(30),
            post_revoke_wait: Duration::from_secs(120),
            reboot_delay: Duration::from_secs(60),
            shutdown: CancellationToken::new(),
        }
    }
}
