// ── Settings reconciler ──
//
// Applies every non-clustering class of a declaration in a fixed order.
// Later phases depend on earlier ones (DHCP must release an option before
// the static value is written, DNS must be in place before NTP hostnames
// are checked), so the sequence in `process` is load-bearing.

mod certificate;
mod license;
mod network;
mod services;
mod snmp;
mod system;
mod users;

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info};

use onboard_api::{DeviceGateway, DeviceInfo};

use crate::config::ReconcilerOptions;
use crate::error::CoreError;
use crate::events::EventBus;
use crate::model::Declaration;
use crate::rollback::RollbackInfo;
use crate::secret::{DeviceSecretCodec, SecretCodec};
use crate::state::TaskState;

const PHASE: &str = "Error processing system declaration";

/// Outcome of a settings run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub reboot_required: bool,
    pub rollback_info: RollbackInfo,
}

pub struct SettingsReconciler {
    declaration: Arc<Declaration>,
    gateway: Arc<dyn DeviceGateway>,
    events: EventBus,
    codec: Arc<dyn SecretCodec>,
    options: ReconcilerOptions,
}

impl SettingsReconciler {
    pub fn new(
        declaration: Arc<Declaration>,
        gateway: Arc<dyn DeviceGateway>,
        events: EventBus,
    ) -> Self {
        Self {
            declaration,
            gateway,
            events,
            codec: Arc::new(DeviceSecretCodec::default()),
            options: ReconcilerOptions::default(),
        }
    }

    pub fn with_codec(mut self, codec: Arc<dyn SecretCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_options(mut self, options: ReconcilerOptions) -> Self {
        self.options = options;
        self
    }

    /// Run every phase in order. The first failure aborts the run; rollback
    /// entries recorded before it stay in `state`.
    pub async fn process(&self, state: &mut TaskState) -> Result<SystemStatus, CoreError> {
        info!(task_id = %state.id, "processing system declaration");
        match self.run(state).await {
            Ok(reboot_required) => Ok(SystemStatus {
                reboot_required,
                rollback_info: state.rollback_info.clone(),
            }),
            Err(err) => {
                let err = match err {
                    api @ CoreError::Api(_) => api.in_phase(PHASE),
                    other => other,
                };
                error!(task_id = %state.id, "{PHASE}: {err}");
                Err(err)
            }
        }
    }

    async fn run(&self, state: &mut TaskState) -> Result<bool, CoreError> {
        let device = self.gateway.device_info().await?;
        let mut reboot_required = false;

        self.apply_db_vars().await?;
        self.release_dhcp_options().await?;
        self.apply_mgmt_dhcp(state).await?;
        self.apply_management_ip(state).await?;
        self.apply_management_routes(state).await?;
        self.apply_dns().await?;
        self.apply_ntp().await?;
        reboot_required |= self.apply_device_certificate(state).await?;
        self.apply_system(state, &device).await?;
        self.apply_users().await?;
        self.apply_license(state).await?;
        self.apply_snmp(&device).await?;
        self.apply_syslog().await?;
        self.apply_traffic_control().await?;
        self.apply_httpd().await?;
        self.apply_sshd().await?;
        self.apply_disk(state).await?;

        Ok(reboot_required)
    }

    fn is_localhost(&self) -> bool {
        self.gateway.host() == "localhost"
    }

    async fn refresh_device(&self) -> Result<DeviceInfo, CoreError> {
        Ok(self.gateway.device_info().await?)
    }
}
