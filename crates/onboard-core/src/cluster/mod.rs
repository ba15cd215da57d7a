// ── Cluster reconciler ──
//
// Device service clustering: config-sync address, failover addresses,
// trust and device groups, traffic groups, MAC masquerade, mirroring.
// Phases run strictly in that order; trust must exist before groups, and
// groups before traffic groups reference them.

mod masquerade;
mod trust;

use std::sync::Arc;

use futures_util::future::try_join_all;
use serde_json::{Value, json};
use tracing::{error, info};

use onboard_api::{DeviceGateway, DeviceInfo, RetryPolicy};

use crate::error::CoreError;
use crate::model::Declaration;
use crate::util::strip_cidr;

const PHASE: &str = "Error processing DSC declaration";

pub struct ClusterReconciler {
    declaration: Arc<Declaration>,
    gateway: Arc<dyn DeviceGateway>,
}

impl ClusterReconciler {
    pub fn new(declaration: Arc<Declaration>, gateway: Arc<dyn DeviceGateway>) -> Self {
        Self {
            declaration,
            gateway,
        }
    }

    pub async fn process(&self) -> Result<(), CoreError> {
        info!("processing DSC declaration");
        self.run().await.map_err(|err| {
            let err = match err {
                api @ CoreError::Api(_) => api.in_phase(PHASE),
                other => other,
            };
            error!("{PHASE}: {err}");
            err
        })
    }

    async fn run(&self) -> Result<(), CoreError> {
        let device = self.gateway.device_info().await?;
        self.apply_config_sync(&device).await?;
        self.apply_failover_unicast(&device).await?;
        self.apply_failover_multicast(&device).await?;
        self.apply_trust_and_groups(&device).await?;
        self.apply_traffic_groups().await?;
        self.apply_mac_masquerade().await?;
        self.apply_mirror_ip(&device).await?;
        Ok(())
    }

    fn device_path(device: &DeviceInfo) -> String {
        format!("/tm/cm/device/~Common~{}", device.hostname)
    }

    async fn apply_config_sync(&self, device: &DeviceInfo) -> Result<(), CoreError> {
        let Some(ip) = self
            .declaration
            .common()
            .config_sync
            .as_ref()
            .and_then(|c| c.configsync_ip.as_deref())
        else {
            return Ok(());
        };
        let ip = self.declaration.resolve(ip)?;
        info!(host = %device.hostname, "setting config sync IP");
        self.gateway
            .cluster_config_sync_ip(strip_cidr(&ip))
            .await?;
        Ok(())
    }

    async fn apply_failover_unicast(&self, device: &DeviceInfo) -> Result<(), CoreError> {
        let Some(unicast) = &self.declaration.common().failover_unicast else {
            return Ok(());
        };
        let mut addresses = Vec::new();
        for entry in unicast.address_ports() {
            let address = self.declaration.resolve(&entry.address)?;
            addresses.push((address, entry.port));
        }
        let body = if addresses.iter().all(|(a, _)| a == "none") {
            json!({ "unicastAddress": "none" })
        } else {
            let list: Vec<Value> = addresses
                .iter()
                .map(|(address, port)| {
                    let ip = strip_cidr(address);
                    json!({ "effectiveIp": ip, "effectivePort": port, "ip": ip, "port": port })
                })
                .collect();
            json!({ "unicastAddress": list })
        };
        self.gateway
            .modify(&Self::device_path(device), body, RetryPolicy::SHORT)
            .await?;
        Ok(())
    }

    async fn apply_failover_multicast(&self, device: &DeviceInfo) -> Result<(), CoreError> {
        let Some(multicast) = &self.declaration.common().failover_multicast else {
            return Ok(());
        };
        let body = json!({
            "multicastInterface": multicast.interface.as_deref().unwrap_or("none"),
            "multicastIp": multicast.address.as_deref().unwrap_or("any6"),
            "multicastPort": multicast.port.unwrap_or(0),
        });
        self.gateway
            .modify(&Self::device_path(device), body, RetryPolicy::SHORT)
            .await?;
        Ok(())
    }

    async fn apply_traffic_groups(&self) -> Result<(), CoreError> {
        let Some(groups) = &self.declaration.common().traffic_group else {
            return Ok(());
        };
        try_join_all(groups.iter().map(|(name, group)| {
            let mut body = json!({ "name": name });
            if let Some(enabled) = group.auto_failback_enabled {
                body["autoFailbackEnabled"] = json!(enabled.to_string());
            }
            if let Some(time) = group.auto_failback_time {
                body["autoFailbackTime"] = json!(time);
            }
            if let Some(method) = &group.failover_method {
                body["failoverMethod"] = json!(method);
            }
            if let Some(ha_group) = &group.ha_group {
                body["haGroup"] = json!(ha_group);
            }
            if let Some(factor) = group.ha_load_factor {
                body["haLoadFactor"] = json!(factor);
            }
            if let Some(order) = &group.ha_order {
                body["haOrder"] = json!(order);
            }
            self.gateway
                .create_or_modify("/tm/cm/traffic-group", body, RetryPolicy::SHORT)
        }))
        .await?;
        Ok(())
    }

    async fn apply_mirror_ip(&self, device: &DeviceInfo) -> Result<(), CoreError> {
        let Some(mirror) = &self.declaration.common().mirror_ip else {
            return Ok(());
        };
        let body = json!({
            "mirrorIp": mirror.primary_ip.as_deref().map_or("any6", strip_cidr),
            "mirrorSecondaryIp": mirror.secondary_ip.as_deref().map_or("any6", strip_cidr),
        });
        self.gateway
            .modify(&Self::device_path(device), body, RetryPolicy::SHORT)
            .await?;
        Ok(())
    }
}
