// ── Declaration model ──
//
// A declaration is keyed by partition ("Common"), then class, then object
// name. Ingestion parses the JSON tree once into typed per-class structs;
// reconcilers work on typed optional fields. The raw tree is kept so
// JSON-pointer references (`/Common/...`) can be dereferenced later.

pub mod cluster;
pub mod system;

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::CoreError;

pub use cluster::{
    AddressPort, ConfigSync, DeviceGroup, DeviceTrust, FailoverMulticast, FailoverUnicast,
    MacMasquerade, MacSource, MirrorIp, TrafficGroup,
};
pub use system::{
    DeviceCertificate, Disk, Dns, Httpd, License, ManagementIp, ManagementRoute, Ntp,
    PartitionAccess, PoolLicense, RegKeyLicense, RevokeFrom, RevokeTarget, SnmpAgent, SnmpAuth,
    SnmpCommunity, SnmpTrapDestination, SnmpTrapEvents, SnmpUser, Sshd, SyslogRemoteServer,
    SystemSettings, TrafficControl, User, UserType,
};

/// Every class the reconcilers understand, under the `Common` partition.
///
/// Singleton classes hold their properties directly; multi-instance
/// classes are maps from object name to properties.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CommonClasses {
    pub db_variables: Option<BTreeMap<String, Value>>,
    #[serde(rename = "DNS")]
    pub dns: Option<Dns>,
    #[serde(rename = "NTP")]
    pub ntp: Option<Ntp>,
    pub system: Option<SystemSettings>,
    pub management_ip: Option<BTreeMap<String, ManagementIp>>,
    pub management_route: Option<BTreeMap<String, ManagementRoute>>,
    pub device_certificate: Option<BTreeMap<String, DeviceCertificate>>,
    pub user: Option<BTreeMap<String, User>>,
    pub license: Option<License>,
    pub snmp_agent: Option<SnmpAgent>,
    pub snmp_trap_events: Option<SnmpTrapEvents>,
    pub snmp_user: Option<BTreeMap<String, SnmpUser>>,
    pub snmp_community: Option<BTreeMap<String, SnmpCommunity>>,
    pub snmp_trap_destination: Option<BTreeMap<String, SnmpTrapDestination>>,
    pub syslog_remote_server: Option<BTreeMap<String, SyslogRemoteServer>>,
    pub traffic_control: Option<TrafficControl>,
    #[serde(rename = "HTTPD")]
    pub httpd: Option<Httpd>,
    #[serde(rename = "SSHD")]
    pub sshd: Option<Sshd>,
    pub disk: Option<Disk>,

    pub config_sync: Option<ConfigSync>,
    pub failover_unicast: Option<FailoverUnicast>,
    pub failover_multicast: Option<FailoverMulticast>,
    pub device_trust: Option<DeviceTrust>,
    pub device_group: Option<BTreeMap<String, DeviceGroup>>,
    pub traffic_group: Option<BTreeMap<String, TrafficGroup>>,
    #[serde(rename = "MAC_Masquerade")]
    pub mac_masquerade: Option<BTreeMap<String, MacMasquerade>>,
    pub mirror_ip: Option<MirrorIp>,
}

impl CommonClasses {
    /// DB variables as strings, without the `class` marker.
    pub fn db_vars(&self) -> BTreeMap<String, String> {
        self.db_variables
            .iter()
            .flatten()
            .filter(|(name, _)| name.as_str() != "class")
            .map(|(name, value)| {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (name.clone(), value)
            })
            .collect()
    }

    /// The single declared management IP, if any.
    pub fn management_ip(&self) -> Option<&ManagementIp> {
        self.management_ip.as_ref().and_then(|ips| ips.values().next())
    }

    /// The single declared device certificate, if any.
    pub fn device_certificate(&self) -> Option<&DeviceCertificate> {
        self.device_certificate
            .as_ref()
            .and_then(|certs| certs.values().next())
    }
}

/// A parsed declaration.
///
/// The same type doubles as the CurrentConfig snapshot: the device state
/// recorded after the previous run, in declaration shape.
#[derive(Debug, Clone, Default)]
pub struct Declaration {
    common: CommonClasses,
    raw: Value,
}

impl Declaration {
    /// Parse a declaration tree. Unknown classes are ignored.
    pub fn from_value(raw: Value) -> Result<Self, CoreError> {
        let common = match raw.get("Common") {
            Some(common) => CommonClasses::deserialize(common).map_err(|e| {
                CoreError::Declaration {
                    message: e.to_string(),
                }
            })?,
            None => CommonClasses::default(),
        };
        Ok(Self { common, raw })
    }

    pub fn from_json(text: &str) -> Result<Self, CoreError> {
        let raw: Value = serde_json::from_str(text).map_err(|e| CoreError::Declaration {
            message: e.to_string(),
        })?;
        Self::from_value(raw)
    }

    pub fn common(&self) -> &CommonClasses {
        &self.common
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Dereference `value` if it is a JSON pointer, otherwise return it as is.
    pub fn resolve(&self, value: &str) -> Result<String, CoreError> {
        if !value.starts_with('/') {
            return Ok(value.to_owned());
        }
        match self.raw.pointer(value) {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(Value::Number(n)) => Ok(n.to_string()),
            _ => Err(CoreError::Declaration {
                message: format!("Unable to dereference {value}"),
            }),
        }
    }
}

impl<'de> Deserialize<'de> for Declaration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        Self::from_value(raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_singleton_and_multi_instance_classes() {
        let decl = Declaration::from_value(json!({
            "Common": {
                "DNS": { "nameServers": ["1.1.1.1"], "search": ["example.com"] },
                "User": {
                    "alice": { "userType": "regular", "password": "pw", "shell": "bash" }
                },
                "SomethingNew": { "class": "SomethingNew" }
            }
        }))
        .unwrap();

        let dns = decl.common().dns.as_ref().unwrap();
        assert_eq!(dns.name_servers, vec!["1.1.1.1".to_owned()]);
        let users = decl.common().user.as_ref().unwrap();
        assert_eq!(users["alice"].user_type, UserType::Regular);
    }

    #[test]
    fn db_vars_drop_class_and_stringify() {
        let decl = Declaration::from_value(json!({
            "Common": {
                "DbVariables": {
                    "class": "DbVariables",
                    "ui.advisory.enabled": true,
                    "ui.advisory.text": "Lab"
                }
            }
        }))
        .unwrap();
        let vars = decl.common().db_vars();
        assert_eq!(vars.len(), 2);
        assert_eq!(vars["ui.advisory.enabled"], "true");
        assert_eq!(vars["ui.advisory.text"], "Lab");
    }

    #[test]
    fn resolve_dereferences_json_pointers() {
        let decl = Declaration::from_value(json!({
            "Common": {
                "ConfigSync": { "configsyncIp": "10.1.1.10/24" }
            }
        }))
        .unwrap();
        assert_eq!(
            decl.resolve("/Common/ConfigSync/configsyncIp").unwrap(),
            "10.1.1.10/24"
        );
        assert_eq!(decl.resolve("bigip1.example.com").unwrap(), "bigip1.example.com");
        assert!(decl.resolve("/Common/Missing/value").is_err());
    }

    #[test]
    fn missing_common_yields_empty_classes() {
        let decl = Declaration::from_value(json!({ "schemaVersion": "1.0.0" })).unwrap();
        assert!(decl.common().dns.is_none());
        assert!(decl.common().db_vars().is_empty());
    }

    #[test]
    fn malformed_class_is_a_declaration_error() {
        let result = Declaration::from_value(json!({
            "Common": { "Disk": { "applicationData": "lots" } }
        }));
        assert!(matches!(result, Err(CoreError::Declaration { .. })));
    }
}
