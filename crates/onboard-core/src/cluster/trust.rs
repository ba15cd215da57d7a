// Device trust and device group formation.
//
// With both a DeviceTrust and DeviceGroups declared this is a cluster join:
// a non-authority device joins through the authority in one operation,
// while the authority only creates its groups. Otherwise trust and groups
// are handled independently: owners create their groups, everyone else
// waits for the group to appear and joins it. Every path ends with a prune
// of members that are no longer declared.

use tracing::{debug, info, warn};

use onboard_api::{DeviceInfo, JoinClusterRequest, RetryPolicy};

use super::ClusterReconciler;
use crate::error::CoreError;
use crate::model::{DeviceGroup, DeviceTrust};
use crate::util::{check_dns_resolution, is_ip, item_names, minimize_ip, missing_from, strip_cidr};

/// A device from the live inventory, for mapping IPs to hostnames.
#[derive(Debug, Clone, PartialEq, Eq)]
struct InventoryDevice {
    hostname: String,
    configsync_ip: Option<String>,
    management_ip: Option<String>,
}

impl InventoryDevice {
    fn matches(&self, ip: &str) -> bool {
        let ip = minimize_ip(ip);
        [&self.configsync_ip, &self.management_ip]
            .into_iter()
            .flatten()
            .any(|candidate| minimize_ip(candidate) == ip)
    }
}

impl ClusterReconciler {
    pub(super) async fn apply_trust_and_groups(&self, device: &DeviceInfo) -> Result<(), CoreError> {
        let common = self.declaration.common();
        let groups: Vec<(&String, &DeviceGroup)> =
            common.device_group.iter().flatten().collect();

        match &common.device_trust {
            Some(trust) if !groups.is_empty() => {
                for (name, group) in groups {
                    self.join_cluster(trust, name, group, device).await?;
                }
            }
            trust => {
                if let Some(trust) = trust {
                    self.establish_trust(trust, device).await?;
                }
                for (name, group) in groups {
                    self.apply_device_group(name, group, device).await?;
                }
            }
        }
        Ok(())
    }

    async fn join_cluster(
        &self,
        trust: &DeviceTrust,
        name: &str,
        group: &DeviceGroup,
        device: &DeviceInfo,
    ) -> Result<(), CoreError> {
        let members = self.resolve_members(&group.members).await?;
        let remote_host = self.declaration.resolve(&trust.remote_host)?;
        check_dns_resolution(self.gateway.as_ref(), &remote_host).await?;

        if self.is_authority(&remote_host, device).await? {
            info!(group = name, "this device is the authority; creating group only");
            return self.create_device_group(name, group, &members).await;
        }

        info!(group = name, authority = %remote_host, "joining cluster");
        self.gateway
            .cluster_join_cluster(&JoinClusterRequest {
                device_group: name.to_owned(),
                remote_host,
                remote_username: trust.remote_username.clone(),
                remote_password: trust.remote_password.clone(),
                group_type: group.group_type,
                options: group.options(),
                sync_comp_devices: members.clone(),
            })
            .await?;
        self.prune(name, &members).await?;
        Ok(())
    }

    async fn establish_trust(&self, trust: &DeviceTrust, device: &DeviceInfo) -> Result<(), CoreError> {
        let remote_host = self.declaration.resolve(&trust.remote_host)?;
        check_dns_resolution(self.gateway.as_ref(), &remote_host).await?;

        if self.is_authority(&remote_host, device).await? {
            debug!("this device is the trust authority; nothing to do");
            return Ok(());
        }

        info!(authority = %remote_host, "adding device to trust");
        let remote = self
            .gateway
            .remote(&remote_host, &trust.remote_username, &trust.remote_password)
            .await?;
        remote
            .cluster_add_to_trust(
                &device.hostname,
                &device.management_address,
                &trust.local_username,
                &trust.local_password,
            )
            .await?;
        remote.cluster_sync_complete(RetryPolicy::MEDIUM).await?;
        Ok(())
    }

    async fn apply_device_group(
        &self,
        name: &str,
        group: &DeviceGroup,
        device: &DeviceInfo,
    ) -> Result<(), CoreError> {
        let members = self.resolve_members(&group.members).await?;
        let owner = match &group.owner {
            Some(owner) => {
                let owner = self.declaration.resolve(owner)?;
                self.resolve_members(&[owner]).await?.into_iter().next()
            }
            None => None,
        };

        if owner.as_deref() == Some(device.hostname.as_str()) {
            return self.create_device_group(name, group, &members).await;
        }

        info!(group = name, owner = ?owner, "waiting for device group");
        let gateway = &self.gateway;
        RetryPolicy::SHORT
            .poll(&format!("device group {name}"), || {
                gateway.cluster_has_device_group(name)
            })
            .await?;
        self.gateway
            .cluster_add_to_device_group(&device.hostname, name)
            .await?;
        self.prune(name, &members).await?;
        Ok(())
    }

    /// Create (or top up) a group with the already-trusted members, prune,
    /// and sync only when membership actually changed.
    async fn create_device_group(
        &self,
        name: &str,
        group: &DeviceGroup,
        members: &[String],
    ) -> Result<(), CoreError> {
        let trusted = self.gateway.cluster_are_in_trust_group(members).await?;
        let before = self.group_members(name).await?;
        self.gateway
            .cluster_create_device_group(name, group.group_type, &trusted, &group.options())
            .await?;
        let added = missing_from(&trusted, &before);
        let removed = self.prune(name, members).await?;

        if added.is_empty() && removed.is_empty() {
            debug!(group = name, "device group unchanged; skipping sync");
            return Ok(());
        }
        info!(group = name, added = added.len(), removed = removed.len(), "syncing device group");
        self.gateway.cluster_sync(name).await?;
        Ok(())
    }

    /// Remove members not in `desired`. Returns who was removed.
    async fn prune(&self, name: &str, desired: &[String]) -> Result<Vec<String>, CoreError> {
        let current = self.group_members(name).await?;
        let extra = missing_from(&current, desired);
        if !extra.is_empty() {
            info!(group = name, devices = ?extra, "pruning device group");
            self.gateway
                .cluster_remove_from_device_group(&extra, name)
                .await?;
        }
        Ok(extra)
    }

    async fn group_members(&self, name: &str) -> Result<Vec<String>, CoreError> {
        let devices = self
            .gateway
            .list(
                &format!("/tm/cm/device-group/~Common~{name}/devices"),
                RetryPolicy::SHORT,
            )
            .await?;
        Ok(item_names(&devices))
    }

    /// Map IP members to hostnames via the live inventory. Hostnames pass
    /// through; IPs with no matching device are dropped.
    async fn resolve_members(&self, members: &[String]) -> Result<Vec<String>, CoreError> {
        if !members.iter().any(|m| is_ip(m)) {
            return Ok(members.to_vec());
        }
        let inventory = self.inventory().await?;
        let mut resolved = Vec::with_capacity(members.len());
        for member in members {
            if !is_ip(member) {
                resolved.push(member.clone());
                continue;
            }
            match inventory.iter().find(|d| d.matches(member)) {
                Some(device) => resolved.push(device.hostname.clone()),
                None => warn!(address = %member, "no known device has this address; ignoring"),
            }
        }
        Ok(resolved)
    }

    async fn inventory(&self) -> Result<Vec<InventoryDevice>, CoreError> {
        let devices = self.gateway.list("/tm/cm/device", RetryPolicy::SHORT).await?;
        let field = |item: &serde_json::Value, key: &str| {
            item.get(key)
                .and_then(serde_json::Value::as_str)
                .filter(|v| *v != "none")
                .map(str::to_owned)
        };
        Ok(devices
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|item| {
                Some(InventoryDevice {
                    hostname: field(item, "hostname")?,
                    configsync_ip: field(item, "configsyncIp"),
                    management_ip: field(item, "managementIp"),
                })
            })
            .collect())
    }

    /// Whether `remote_host` names this device: by hostname, management
    /// address, or any local self IP.
    async fn is_authority(&self, remote_host: &str, device: &DeviceInfo) -> Result<bool, CoreError> {
        if remote_host == device.hostname {
            return Ok(true);
        }
        let remote_ip = minimize_ip(remote_host);
        if remote_ip == minimize_ip(&device.management_address) {
            return Ok(true);
        }
        if !is_ip(remote_host) {
            return Ok(false);
        }
        let self_ips = self.gateway.list("/tm/net/self", RetryPolicy::SHORT).await?;
        Ok(self_ips.as_array().into_iter().flatten().any(|item| {
            item.get("address")
                .and_then(serde_json::Value::as_str)
                .is_some_and(|address| minimize_ip(strip_cidr(address)) == remote_ip)
        }))
    }
}
