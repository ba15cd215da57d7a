// ── Device service clustering classes ──

use secrecy::SecretString;
use serde::Deserialize;

use onboard_api::{DeviceGroupOptions, DeviceGroupType};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ConfigSync {
    /// Address (optionally CIDR, or a JSON pointer); `none` disables.
    #[serde(rename = "configsyncIp")]
    pub configsync_ip: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FailoverUnicast {
    pub address: Option<String>,
    pub port: Option<u16>,
    pub address_ports: Option<Vec<AddressPort>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AddressPort {
    pub address: String,
    #[serde(default = "default_unicast_port")]
    pub port: u16,
}

fn default_unicast_port() -> u16 {
    1026
}

impl FailoverUnicast {
    /// Both the single-address and the list form, flattened.
    pub fn address_ports(&self) -> Vec<AddressPort> {
        if let Some(list) = &self.address_ports {
            return list.clone();
        }
        self.address
            .iter()
            .map(|address| AddressPort {
                address: address.clone(),
                port: self.port.unwrap_or_else(default_unicast_port),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FailoverMulticast {
    pub interface: Option<String>,
    pub address: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceTrust {
    pub local_username: String,
    pub local_password: SecretString,
    /// Hostname, IP, or JSON pointer of the authority device.
    pub remote_host: String,
    pub remote_username: String,
    pub remote_password: SecretString,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
#[allow(clippy::struct_excessive_bools)]
pub struct DeviceGroup {
    #[serde(rename = "type")]
    pub group_type: DeviceGroupType,
    /// Hostname, IP, or JSON pointer of the device that creates the group.
    pub owner: Option<String>,
    /// Hostnames or IPs.
    pub members: Vec<String>,
    pub auto_sync: bool,
    pub save_on_auto_sync: bool,
    pub network_failover: bool,
    pub full_load_on_sync: bool,
    pub asm_sync: bool,
}

impl DeviceGroup {
    pub fn options(&self) -> DeviceGroupOptions {
        DeviceGroupOptions {
            auto_sync: self.auto_sync,
            save_on_auto_sync: self.save_on_auto_sync,
            network_failover: self.network_failover,
            full_load_on_sync: self.full_load_on_sync,
            asm_sync: self.asm_sync,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrafficGroup {
    pub auto_failback_enabled: Option<bool>,
    pub auto_failback_time: Option<u32>,
    pub failover_method: Option<String>,
    pub ha_group: Option<String>,
    pub ha_load_factor: Option<u32>,
    pub ha_order: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MacSource {
    pub interface: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MacMasquerade {
    pub source: Option<MacSource>,
    #[serde(default = "default_traffic_group")]
    pub traffic_group: String,
    /// Previously derived address; carried by rollback declarations.
    pub mac: Option<String>,
}

fn default_traffic_group() -> String {
    "traffic-group-1".into()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MirrorIp {
    pub primary_ip: Option<String>,
    pub secondary_ip: Option<String>,
}
