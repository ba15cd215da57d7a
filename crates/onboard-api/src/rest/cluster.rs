// Device service clustering endpoints
//
// Trust domain, device groups, and config sync under `/tm/cm`.

use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tracing::{debug, info};

use super::{RestGateway, stat_descriptions};
use crate::error::Error;
use crate::gateway::{DeviceGateway, DeviceGroupOptions, DeviceGroupType, JoinClusterRequest};
use crate::retry::RetryPolicy;

/// Strip the partition prefix from a full path (`/Common/bigip1` → `bigip1`).
fn short_name(full_path: &str) -> &str {
    full_path.rsplit('/').next().unwrap_or(full_path)
}

fn names(items: &Value) -> Vec<String> {
    items
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("name").and_then(Value::as_str))
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

impl RestGateway {
    /// `PATCH /tm/cm/device/~Common~{hostname}` with `configsyncIp`.
    pub(crate) async fn config_sync_ip(&self, ip: &str) -> Result<(), Error> {
        let info = self.device_info().await?;
        debug!(ip, device = %info.hostname, "setting config sync address");
        self.modify(
            &format!("/tm/cm/device/~Common~{}", info.hostname),
            json!({ "configsyncIp": ip }),
            RetryPolicy::MEDIUM,
        )
        .await?;
        Ok(())
    }

    /// Devices listed as certificate-authority members of the `Root` trust domain.
    pub(crate) async fn are_in_trust_group(&self, devices: &[String]) -> Result<Vec<String>, Error> {
        let domain = self
            .list("/tm/cm/trust-domain/~Common~Root", RetryPolicy::SHORT)
            .await?;
        let trusted: Vec<&str> = domain
            .get("caDevices")
            .and_then(Value::as_array)
            .map(|ca| ca.iter().filter_map(Value::as_str).map(short_name).collect())
            .unwrap_or_default();
        Ok(devices
            .iter()
            .filter(|d| trusted.contains(&d.as_str()))
            .cloned()
            .collect())
    }

    pub(crate) async fn has_device_group(&self, name: &str) -> Result<bool, Error> {
        let groups = self.list("/tm/cm/device-group", RetryPolicy::SHORT).await?;
        Ok(names(&groups).iter().any(|g| g == name))
    }

    async fn device_group_members(&self, group: &str) -> Result<Vec<String>, Error> {
        let devices = self
            .list(
                &format!("/tm/cm/device-group/~Common~{group}/devices"),
                RetryPolicy::SHORT,
            )
            .await?;
        Ok(names(&devices))
    }

    /// Create `name`, or add any missing `devices` if it already exists.
    pub(crate) async fn create_device_group(
        &self,
        name: &str,
        group_type: DeviceGroupType,
        devices: &[String],
        options: &DeviceGroupOptions,
    ) -> Result<(), Error> {
        if self.has_device_group(name).await? {
            let members = self.device_group_members(name).await?;
            for device in devices.iter().filter(|d| !members.contains(d)) {
                self.add_to_device_group(device, name).await?;
            }
            return Ok(());
        }

        info!(group = name, %group_type, count = devices.len(), "creating device group");
        let mut body = options.to_body();
        body["name"] = json!(name);
        body["type"] = json!(group_type.to_string());
        body["devices"] = json!(devices);
        self.create("/tm/cm/device-group", body, RetryPolicy::MEDIUM)
            .await?;
        Ok(())
    }

    pub(crate) async fn add_to_device_group(&self, device: &str, group: &str) -> Result<(), Error> {
        if self.device_group_members(group).await?.iter().any(|d| d == device) {
            return Ok(());
        }
        debug!(device, group, "adding device to group");
        self.create(
            &format!("/tm/cm/device-group/~Common~{group}/devices"),
            json!({ "name": device }),
            RetryPolicy::MEDIUM,
        )
        .await?;
        Ok(())
    }

    pub(crate) async fn remove_from_device_group(
        &self,
        devices: &[String],
        group: &str,
    ) -> Result<(), Error> {
        for device in devices {
            debug!(device, group, "removing device from group");
            self.delete(
                &format!("/tm/cm/device-group/~Common~{group}/devices/~Common~{device}"),
                RetryPolicy::SHORT,
            )
            .await?;
        }
        Ok(())
    }

    /// `run cm config-sync to-group <group>`
    pub(crate) async fn sync(&self, group: &str) -> Result<(), Error> {
        info!(group, "syncing config to group");
        self.create(
            "/tm/cm",
            json!({ "command": "run", "utilCmdArgs": format!("config-sync to-group {group}") }),
            RetryPolicy::MEDIUM,
        )
        .await?;
        Ok(())
    }

    pub(crate) async fn sync_complete(&self, retry: RetryPolicy) -> Result<(), Error> {
        retry
            .poll("sync complete", || async {
                let status = self.list("/tm/cm/sync-status", RetryPolicy::NONE).await?;
                let descriptions = stat_descriptions(&status);
                Ok(descriptions.iter().any(|d| d == "green")
                    && !descriptions.iter().any(|d| d == "red"))
            })
            .await
    }

    pub(crate) async fn add_to_trust(
        &self,
        device_name: &str,
        address: &str,
        username: &str,
        password: &SecretString,
    ) -> Result<(), Error> {
        let already = self.are_in_trust_group(&[device_name.to_owned()]).await?;
        if !already.is_empty() {
            debug!(device_name, "device already trusted");
            return Ok(());
        }
        info!(device_name, address, "adding device to trust");
        self.create(
            "/tm/cm/add-to-trust",
            json!({
                "command": "run",
                "name": "Root",
                "caDevice": true,
                "device": address,
                "deviceName": device_name,
                "username": username,
                "password": password.expose_secret(),
            }),
            RetryPolicy::MEDIUM,
        )
        .await?;
        Ok(())
    }

    /// Ask the authority at `remote_host` to trust this device and add it
    /// to the group, then sync from there.
    pub(crate) async fn join_cluster(&self, request: &JoinClusterRequest) -> Result<(), Error> {
        let local = self.device_info().await?;
        let remote = self
            .remote(
                &request.remote_host,
                &request.remote_username,
                &request.remote_password,
            )
            .await?;

        info!(
            group = %request.device_group,
            remote = %request.remote_host,
            "joining cluster"
        );
        remote
            .cluster_add_to_trust(
                &local.hostname,
                &local.management_address,
                &self.config.username,
                &self.config.password,
            )
            .await?;
        remote.cluster_sync_complete(RetryPolicy::LONG).await?;

        let mut devices = remote
            .cluster_are_in_trust_group(&request.sync_comp_devices)
            .await?;
        if !devices.contains(&local.hostname) {
            devices.push(local.hostname.clone());
        }
        remote
            .cluster_create_device_group(
                &request.device_group,
                request.group_type,
                &devices,
                &request.options,
            )
            .await?;
        remote.cluster_sync(&request.device_group).await?;
        self.sync_complete(RetryPolicy::LONG).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_name_strips_partition() {
        assert_eq!(short_name("/Common/bigip1.example.com"), "bigip1.example.com");
        assert_eq!(short_name("bigip1"), "bigip1");
    }

    #[test]
    fn names_skips_items_without_name() {
        let items = json!([{ "name": "a" }, { "fullPath": "/Common/b" }, { "name": "c" }]);
        assert_eq!(names(&items), vec!["a".to_owned(), "c".to_owned()]);
    }
}
