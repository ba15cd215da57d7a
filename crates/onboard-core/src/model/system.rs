// ── System classes ──
//
// Everything the settings reconciler applies: network basics, identity,
// users, licensing, SNMP, syslog, and service tuning.

use std::collections::BTreeMap;

use secrecy::SecretString;
use serde::Deserialize;

// ── Networking ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Dns {
    pub name_servers: Vec<String>,
    pub search: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Ntp {
    pub servers: Vec<String>,
    pub timezone: Option<String>,
}

/// Management address. `name` is the address in CIDR form; an entry
/// without a name marks a deletion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ManagementIp {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ManagementRoute {
    pub name: Option<String>,
    pub gw: Option<String>,
    pub network: Option<String>,
    pub mtu: Option<u32>,
    #[serde(rename = "type")]
    pub route_type: Option<String>,
    pub description: Option<String>,
}

// ── Identity ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
#[allow(clippy::struct_excessive_bools)]
pub struct SystemSettings {
    pub hostname: Option<String>,
    pub console_inactivity_timeout: Option<u32>,
    pub cli_inactivity_timeout: Option<u32>,
    pub auto_phonehome: Option<bool>,
    pub auto_check: Option<bool>,
    pub tmsh_audit_log: Option<bool>,
    pub gui_audit_log: Option<bool>,
    pub mcp_audit_log: Option<String>,
    pub gui_security_banner: Option<bool>,
    pub gui_security_banner_text: Option<String>,
    pub preserve_orig_dhcp_routes: Option<bool>,
}

/// Web server certificate and key, as PEM text.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCertificate {
    pub certificate: String,
    pub private_key: Option<SecretString>,
}

// ── Users ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum UserType {
    Root,
    Regular,
    Unsupported(String),
}

impl From<String> for UserType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "root" => Self::Root,
            "regular" => Self::Regular,
            _ => Self::Unsupported(value),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PartitionAccess {
    pub role: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub user_type: UserType,
    /// Root only.
    pub old_password: Option<SecretString>,
    /// Root only.
    pub new_password: Option<SecretString>,
    pub password: Option<SecretString>,
    #[serde(default)]
    pub partition_access: BTreeMap<String, PartitionAccess>,
    pub shell: Option<String>,
    #[serde(default)]
    pub keys: Vec<String>,
}

// ── Licensing ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "licenseType")]
pub enum License {
    #[serde(rename = "regKey")]
    RegKey(RegKeyLicense),
    #[serde(rename = "licensePool")]
    LicensePool(PoolLicense),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegKeyLicense {
    pub reg_key: String,
    pub add_on_keys: Vec<String>,
    pub overwrite: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolLicense {
    pub big_iq_host: Option<String>,
    pub big_iq_username: Option<String>,
    pub big_iq_password: Option<SecretString>,
    /// Absent when only a revoke is requested.
    pub license_pool: Option<String>,
    pub sku_keyword1: Option<String>,
    pub sku_keyword2: Option<String>,
    pub unit_of_measure: Option<String>,
    pub hypervisor: Option<String>,
    pub tenant: Option<String>,
    pub reachable: bool,
    pub big_ip_username: Option<String>,
    pub big_ip_password: Option<SecretString>,
    pub revoke_from: Option<RevokeFrom>,
    pub overwrite: bool,
}

/// Where a license is revoked from: a pool name on the same BIG-IQ, or a
/// different BIG-IQ entirely.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RevokeFrom {
    Pool(String),
    Target(RevokeTarget),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeTarget {
    pub big_iq_host: String,
    pub big_iq_username: String,
    pub big_iq_password: SecretString,
    pub license_pool: String,
    #[serde(default)]
    pub reachable: bool,
}

// ── SNMP ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SnmpAgent {
    pub contact: Option<String>,
    pub location: Option<String>,
    pub allow_list: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SnmpTrapEvents {
    pub agent_start_stop: Option<bool>,
    pub authentication: Option<bool>,
    pub device: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnmpAuth {
    pub protocol: String,
    pub password: SecretString,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SnmpUser {
    pub authentication: Option<SnmpAuth>,
    pub privacy: Option<SnmpAuth>,
    pub oid: Option<String>,
    pub access: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SnmpCommunity {
    /// Community string; defaults to the object name.
    pub name: Option<String>,
    pub ipv6: bool,
    pub source: Option<String>,
    pub oid: Option<String>,
    pub access: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SnmpTrapDestination {
    pub version: String,
    pub community: Option<String>,
    pub destination: String,
    pub port: u16,
    pub network: Option<String>,
    pub security_name: Option<String>,
    pub authentication: Option<SnmpAuth>,
    pub privacy: Option<SnmpAuth>,
    pub engine_id: Option<String>,
}

// ── Services ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyslogRemoteServer {
    pub host: String,
    pub local_ip: Option<String>,
    pub remote_port: Option<u16>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
#[allow(clippy::struct_excessive_bools)]
pub struct TrafficControl {
    pub accept_ip_options: Option<bool>,
    pub accept_ip_source_route: Option<bool>,
    pub allow_ip_source_route: Option<bool>,
    pub continue_matching: Option<bool>,
    pub max_icmp_rate: Option<u32>,
    pub max_port_find_linear: Option<u32>,
    pub max_port_find_random: Option<u32>,
    pub max_reject_rate: Option<u32>,
    pub max_reject_rate_timeout: Option<u32>,
    pub min_path_mtu: Option<u32>,
    pub path_mtu_discovery: Option<bool>,
    pub port_find_threshold_warning: Option<bool>,
    pub port_find_threshold_trigger: Option<u32>,
    pub port_find_threshold_timeout: Option<u32>,
    pub reject_unmatched: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Httpd {
    pub allow: Option<Vec<String>>,
    pub auth_pam_idle_timeout: Option<u32>,
    pub max_clients: Option<u32>,
    pub ssl_ciphersuite: Option<Vec<String>>,
    pub ssl_protocol: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Sshd {
    pub allow: Option<Vec<String>>,
    pub banner: Option<String>,
    pub ciphers: Option<Vec<String>>,
    pub inactivity_timeout: Option<u32>,
    pub login_grace_time: Option<u32>,
    #[serde(rename = "MACS")]
    pub macs: Option<Vec<String>>,
    pub max_auth_tries: Option<u32>,
    pub max_startups: Option<String>,
    pub protocol: Option<u32>,
}

/// Sizes in KB.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Disk {
    pub application_data: u64,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn license_is_tagged_by_license_type() {
        let reg: License = serde_json::from_value(json!({
            "licenseType": "regKey",
            "regKey": "AAAAA-BBBBB-CCCCC-DDDDD-EEEEEEE",
            "overwrite": true
        }))
        .unwrap();
        assert!(matches!(reg, License::RegKey(ref r) if r.overwrite));

        let pool: License = serde_json::from_value(json!({
            "licenseType": "licensePool",
            "bigIqHost": "10.0.0.200",
            "bigIqUsername": "admin",
            "bigIqPassword": "secret",
            "licensePool": "production",
            "reachable": true,
            "revokeFrom": "staging"
        }))
        .unwrap();
        let License::LicensePool(pool) = pool else {
            panic!("expected pool license");
        };
        assert!(pool.reachable);
        assert!(matches!(pool.revoke_from, Some(RevokeFrom::Pool(ref p)) if p == "staging"));
    }

    #[test]
    fn revoke_from_accepts_a_remote_target() {
        let from: RevokeFrom = serde_json::from_value(json!({
            "bigIqHost": "10.0.0.201",
            "bigIqUsername": "admin",
            "bigIqPassword": "secret",
            "licensePool": "legacy",
            "reachable": true
        }))
        .unwrap();
        assert!(matches!(from, RevokeFrom::Target(ref t) if t.reachable && t.license_pool == "legacy"));
    }

    #[test]
    fn unknown_user_type_is_preserved() {
        let user: User = serde_json::from_value(json!({ "userType": "guest" })).unwrap();
        assert_eq!(user.user_type, UserType::Unsupported("guest".into()));
    }
}
