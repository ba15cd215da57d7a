// ── DeviceGateway ──
//
// The verb surface reconcilers consume. Generic REST verbs take a path
// relative to `/mgmt` (e.g. `/tm/sys/ntp`); domain verbs wrap multi-step
// device workflows (clustering, licensing, passwords). Implementations own
// retrying: reconcilers only pick a `RetryPolicy` per call site.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use strum::{Display, EnumString};

use crate::error::Error;
use crate::retry::RetryPolicy;

/// Path of the shell execution endpoint.
pub const BASH_PATH: &str = "/tm/util/bash";

/// Identity and version of the device a gateway talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub hostname: String,
    pub management_address: String,
    pub version: String,
}

/// Device-group flavour.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
pub enum DeviceGroupType {
    #[default]
    #[serde(rename = "sync-failover")]
    #[strum(serialize = "sync-failover")]
    SyncFailover,
    #[serde(rename = "sync-only")]
    #[strum(serialize = "sync-only")]
    SyncOnly,
}

/// Device-group knobs, sent as `enabled`/`disabled` strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct DeviceGroupOptions {
    pub auto_sync: bool,
    pub save_on_auto_sync: bool,
    pub network_failover: bool,
    pub full_load_on_sync: bool,
    pub asm_sync: bool,
}

impl DeviceGroupOptions {
    /// Body fragment understood by `/tm/cm/device-group`.
    pub fn to_body(&self) -> Value {
        json!({
            "autoSync": enabled(self.auto_sync),
            "saveOnAutoSync": self.save_on_auto_sync,
            "networkFailover": enabled(self.network_failover),
            "fullLoadOnSync": self.full_load_on_sync,
            "asmSync": enabled(self.asm_sync),
        })
    }
}

/// `true` → `"enabled"`, `false` → `"disabled"`.
pub fn enabled(value: bool) -> &'static str {
    if value { "enabled" } else { "disabled" }
}

/// Join this device to a cluster whose authority is `remote_host`.
///
/// Establishes trust from the remote side and adds the local device to
/// `device_group` there, then syncs.
#[derive(Debug, Clone)]
pub struct JoinClusterRequest {
    pub device_group: String,
    pub remote_host: String,
    pub remote_username: String,
    pub remote_password: SecretString,
    pub group_type: DeviceGroupType,
    pub options: DeviceGroupOptions,
    /// Desired group members; those already trusted by the authority are
    /// placed in the group alongside this device.
    pub sync_comp_devices: Vec<String>,
}

/// Registration-key licensing.
#[derive(Debug, Clone, Default)]
pub struct RegKeyLicenseRequest {
    pub reg_key: String,
    pub add_on_keys: Vec<String>,
    pub overwrite: bool,
}

/// Credentials and pool identity on a BIG-IQ.
#[derive(Debug, Clone)]
pub struct BigIqTarget {
    pub host: String,
    pub username: String,
    pub password: SecretString,
    pub license_pool: String,
}

/// Assign a license from a BIG-IQ pool.
#[derive(Debug, Clone)]
pub struct BigIqLicenseRequest {
    pub target: BigIqTarget,
    /// Address BIG-IQ uses to reach the device (reachable mode).
    pub management_address: String,
    pub management_port: u16,
    pub bigip_username: Option<String>,
    pub bigip_password: Option<SecretString>,
    pub reachable: bool,
    pub sku_keyword1: Option<String>,
    pub sku_keyword2: Option<String>,
    pub unit_of_measure: Option<String>,
    pub hypervisor: Option<String>,
    pub tenant: Option<String>,
    pub overwrite: bool,
}

/// Revoke the device's license back to a BIG-IQ pool.
#[derive(Debug, Clone)]
pub struct BigIqRevokeRequest {
    pub target: BigIqTarget,
    pub management_address: String,
    pub bigip_username: Option<String>,
    pub bigip_password: Option<SecretString>,
    pub reachable: bool,
}

#[async_trait]
pub trait DeviceGateway: Send + Sync {
    // ── Connection ───────────────────────────────────────────────────

    /// Host this gateway currently targets.
    fn host(&self) -> String;

    /// Management port of the target.
    fn port(&self) -> u16;

    /// Re-point the gateway after the management address changed.
    fn set_host(&self, host: &str);

    /// Open a gateway to another device using this gateway's transport.
    async fn remote(
        &self,
        host: &str,
        username: &str,
        password: &SecretString,
    ) -> Result<Arc<dyn DeviceGateway>, Error>;

    // ── REST verbs ───────────────────────────────────────────────────

    /// GET a resource. Collections are unwrapped to their `items` array.
    async fn list(&self, path: &str, retry: RetryPolicy) -> Result<Value, Error>;

    async fn create(&self, path: &str, body: Value, retry: RetryPolicy) -> Result<Value, Error>;

    async fn modify(&self, path: &str, body: Value, retry: RetryPolicy) -> Result<Value, Error>;

    async fn replace(&self, path: &str, body: Value, retry: RetryPolicy) -> Result<Value, Error>;

    async fn delete(&self, path: &str, retry: RetryPolicy) -> Result<(), Error>;

    /// Create `body["name"]` under `path`, or modify it if it already exists.
    async fn create_or_modify(
        &self,
        path: &str,
        body: Value,
        retry: RetryPolicy,
    ) -> Result<(), Error> {
        let name = body
            .get("name")
            .and_then(Value::as_str)
            .ok_or(Error::MissingField {
                path: path.to_owned(),
                field: "name",
            })?
            .to_owned();
        let existing = self.list(path, retry).await?;
        let exists = existing.as_array().is_some_and(|items| {
            items
                .iter()
                .any(|item| item.get("name").and_then(Value::as_str) == Some(name.as_str()))
        });
        if exists {
            self.modify(&format!("{path}/~Common~{name}"), body, retry)
                .await?;
        } else {
            self.create(path, body, retry).await?;
        }
        Ok(())
    }

    /// Run a shell command on the device, returning its `commandResult`.
    async fn run_bash(&self, command: &str) -> Result<String, Error> {
        let quoted = command.replace('\'', r"'\''");
        let response = self
            .create(
                BASH_PATH,
                json!({ "command": "run", "utilCmdArgs": format!("-c '{quoted}'") }),
                RetryPolicy::SHORT,
            )
            .await?;
        Ok(response
            .get("commandResult")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned())
    }

    // ── Device lifecycle ─────────────────────────────────────────────

    async fn device_info(&self) -> Result<DeviceInfo, Error>;

    /// Persist running config.
    async fn save(&self) -> Result<(), Error>;

    async fn reboot(&self) -> Result<(), Error>;

    /// Resolve once the device reports all services ready.
    async fn ready(&self) -> Result<(), Error>;

    /// Resolve once the device reports an active (licensed) state.
    async fn active(&self) -> Result<(), Error>;

    // ── Clustering ───────────────────────────────────────────────────

    async fn cluster_config_sync_ip(&self, ip: &str) -> Result<(), Error>;

    /// Subset of `devices` already present in the local trust domain.
    async fn cluster_are_in_trust_group(&self, devices: &[String]) -> Result<Vec<String>, Error>;

    async fn cluster_create_device_group(
        &self,
        name: &str,
        group_type: DeviceGroupType,
        devices: &[String],
        options: &DeviceGroupOptions,
    ) -> Result<(), Error>;

    /// Sync config to every member of `group`.
    async fn cluster_sync(&self, group: &str) -> Result<(), Error>;

    async fn cluster_sync_complete(&self, retry: RetryPolicy) -> Result<(), Error>;

    async fn cluster_has_device_group(&self, name: &str) -> Result<bool, Error>;

    async fn cluster_add_to_device_group(&self, device: &str, group: &str) -> Result<(), Error>;

    async fn cluster_join_cluster(&self, request: &JoinClusterRequest) -> Result<(), Error>;

    async fn cluster_remove_from_device_group(
        &self,
        devices: &[String],
        group: &str,
    ) -> Result<(), Error>;

    /// Add the device at `address` to this device's trust domain.
    async fn cluster_add_to_trust(
        &self,
        device_name: &str,
        address: &str,
        username: &str,
        password: &SecretString,
    ) -> Result<(), Error>;

    // ── Onboarding ───────────────────────────────────────────────────

    async fn onboard_set_db_vars(&self, vars: &BTreeMap<String, String>) -> Result<(), Error>;

    async fn onboard_hostname(&self, hostname: &str) -> Result<(), Error>;

    async fn onboard_password(
        &self,
        user: &str,
        new_password: &SecretString,
        old_password: Option<&SecretString>,
    ) -> Result<(), Error>;

    async fn onboard_license(&self, request: &RegKeyLicenseRequest) -> Result<(), Error>;

    async fn onboard_license_via_bigiq(&self, request: &BigIqLicenseRequest) -> Result<(), Error>;

    async fn onboard_revoke_license_via_bigiq(
        &self,
        request: &BigIqRevokeRequest,
    ) -> Result<(), Error>;
}
