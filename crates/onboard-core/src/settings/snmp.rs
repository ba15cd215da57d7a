// SNMP agent, trap events, users, communities, trap destinations.

use futures_util::future::try_join_all;
use secrecy::ExposeSecret;
use serde_json::{Value, json};
use tracing::info;

use onboard_api::{DeviceInfo, RetryPolicy, enabled};

use super::SettingsReconciler;
use crate::error::CoreError;
use crate::model::SnmpAuth;
use crate::util::version_at_least;

const SNMP_PATH: &str = "/tm/sys/snmp";

/// Protocol/password pair for an optional auth or privacy block. Older
/// versions reject a `"none"` password, so it is only defaulted on 14.0+.
fn auth_fields(
    body: &mut Value,
    auth: Option<&SnmpAuth>,
    protocol_key: &str,
    password_key: &str,
    default_password: bool,
) {
    match auth {
        Some(auth) => {
            body[protocol_key] = json!(auth.protocol);
            body[password_key] = json!(auth.password.expose_secret());
        }
        None => {
            body[protocol_key] = json!("none");
            if default_password {
                body[password_key] = json!("none");
            }
        }
    }
}

impl SettingsReconciler {
    pub(super) async fn apply_snmp(&self, device: &DeviceInfo) -> Result<(), CoreError> {
        let common = self.declaration.common();
        let default_password = version_at_least(&device.version, "14.0");

        if let Some(agent) = &common.snmp_agent {
            let mut body = json!({});
            if let Some(contact) = &agent.contact {
                body["sysContact"] = json!(contact);
            }
            if let Some(location) = &agent.location {
                body["sysLocation"] = json!(location);
            }
            if let Some(allow) = &agent.allow_list {
                body["allowedAddresses"] = json!(allow);
            }
            info!("setting SNMP agent");
            self.gateway
                .modify(SNMP_PATH, body, RetryPolicy::SHORT)
                .await?;
        }

        if let Some(events) = &common.snmp_trap_events {
            let mut body = json!({});
            for (key, value) in [
                ("agentTrap", events.agent_start_stop),
                ("authTrap", events.authentication),
                ("bigipTraps", events.device),
            ] {
                if let Some(value) = value {
                    body[key] = json!(enabled(value));
                }
            }
            self.gateway
                .modify(SNMP_PATH, body, RetryPolicy::SHORT)
                .await?;
        }

        if let Some(users) = &common.snmp_user {
            let bodies = users.iter().map(|(name, user)| {
                let mut body = json!({ "name": name, "username": name });
                auth_fields(
                    &mut body,
                    user.authentication.as_ref(),
                    "authProtocol",
                    "authPassword",
                    default_password,
                );
                auth_fields(
                    &mut body,
                    user.privacy.as_ref(),
                    "privacyProtocol",
                    "privacyPassword",
                    default_password,
                );
                body["oidSubset"] = json!(user.oid.as_deref().unwrap_or(".1"));
                body["access"] = json!(user.access.as_deref().unwrap_or("ro"));
                body
            });
            self.upsert_all(&format!("{SNMP_PATH}/users"), bodies)
                .await?;
        }

        if let Some(communities) = &common.snmp_community {
            let bodies = communities.iter().map(|(name, community)| {
                let mut body = json!({
                    "name": name,
                    "communityName": community.name.as_deref().unwrap_or(name),
                    "ipv6": enabled(community.ipv6),
                    "oidSubset": community.oid.as_deref().unwrap_or(".1"),
                    "access": community.access.as_deref().unwrap_or("ro"),
                });
                if let Some(source) = &community.source {
                    body["source"] = json!(source);
                }
                body
            });
            self.upsert_all(&format!("{SNMP_PATH}/communities"), bodies)
                .await?;
        }

        if let Some(destinations) = &common.snmp_trap_destination {
            let bodies = destinations.iter().map(|(name, dest)| {
                let mut body = json!({
                    "name": name,
                    "version": dest.version,
                    "host": dest.destination,
                    "port": dest.port,
                });
                if let Some(network) = &dest.network {
                    body["network"] = json!(network);
                }
                if dest.version == "3" {
                    if let Some(security_name) = &dest.security_name {
                        body["securityName"] = json!(security_name);
                    }
                    if let Some(engine_id) = &dest.engine_id {
                        body["engineId"] = json!(engine_id);
                    }
                    auth_fields(
                        &mut body,
                        dest.authentication.as_ref(),
                        "authProtocol",
                        "authPassword",
                        default_password,
                    );
                    auth_fields(
                        &mut body,
                        dest.privacy.as_ref(),
                        "privacyProtocol",
                        "privacyPassword",
                        default_password,
                    );
                } else if let Some(community) = &dest.community {
                    body["community"] = json!(community);
                }
                body
            });
            self.upsert_all(&format!("{SNMP_PATH}/traps"), bodies)
                .await?;
        }
        Ok(())
    }

    /// Upsert independent items concurrently; no ordering between them.
    pub(super) async fn upsert_all(
        &self,
        path: &str,
        bodies: impl Iterator<Item = Value>,
    ) -> Result<(), CoreError> {
        try_join_all(
            bodies.map(|body| self.gateway.create_or_modify(path, body, RetryPolicy::SHORT)),
        )
        .await?;
        Ok(())
    }
}
