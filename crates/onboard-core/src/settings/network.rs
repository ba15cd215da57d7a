// Management networking: DHCP ownership, management IP, routes, DNS, NTP.

use futures_util::future::try_join_all;
use serde_json::{Value, json};
use tracing::{debug, info};

use onboard_api::RetryPolicy;

use super::SettingsReconciler;
use crate::config::Platform;
use crate::error::CoreError;
use crate::model::{ManagementIp, ManagementRoute};
use crate::state::TaskState;
use crate::util::{check_dns_resolution, prefix_len, strip_cidr, with_default_prefix};

/// Marker the device writes into descriptions of DHCP-provided objects.
pub const DHCP_SENTINEL: &str = "configured-by-dhcp";

const DHCP_CONFIG_PATH: &str = "/tm/sys/management-dhcp/sys-mgmt-dhcp-config";
const GLOBAL_SETTINGS_PATH: &str = "/tm/sys/global-settings";
const MGMT_IP_PATH: &str = "/tm/sys/management-ip";
const MGMT_ROUTE_PATH: &str = "/tm/sys/management-route";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DhcpVote {
    Enabled,
    Disabled,
}

impl DhcpVote {
    fn as_str(self) -> &'static str {
        match self {
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
        }
    }
}

fn dhcp_originated(name: Option<&String>, description: Option<&String>) -> bool {
    name.is_none() || description.is_some_and(|d| d.contains(DHCP_SENTINEL))
}

fn resolve_votes(ip: Option<DhcpVote>, route: Option<DhcpVote>) -> Option<DhcpVote> {
    match (ip, route) {
        (Some(a), Some(b)) if a == b => Some(a),
        (Some(_), Some(_)) => Some(DhcpVote::Disabled),
        (a, b) => a.or(b),
    }
}

/// Management IP path segment: `/` is not allowed in the URL.
fn mgmt_ip_path(name: &str) -> String {
    format!("{MGMT_IP_PATH}/{}", name.replace('/', "~"))
}

impl SettingsReconciler {
    pub(super) async fn apply_db_vars(&self) -> Result<(), CoreError> {
        let vars = self.declaration.common().db_vars();
        if vars.is_empty() {
            return Ok(());
        }
        info!(count = vars.len(), "setting db variables");
        self.gateway.onboard_set_db_vars(&vars).await?;
        Ok(())
    }

    /// Stop the management DHCP client from requesting options the
    /// declaration sets statically; otherwise the next lease overwrites them.
    pub(super) async fn release_dhcp_options(&self) -> Result<(), CoreError> {
        let common = self.declaration.common();
        let mut owned = Vec::new();
        if common.ntp.as_ref().is_some_and(|n| !n.servers.is_empty()) {
            owned.push("ntp-servers");
        }
        if let Some(dns) = &common.dns {
            if !dns.name_servers.is_empty() {
                owned.push("domain-name-servers");
            }
            if !dns.search.is_empty() {
                owned.push("domain-name");
            }
        }
        if common.system.as_ref().is_some_and(|s| s.hostname.is_some()) {
            owned.push("host-name");
        }
        if owned.is_empty() {
            return Ok(());
        }

        let config = self.gateway.list(DHCP_CONFIG_PATH, RetryPolicy::SHORT).await?;
        let Some(requested) = config.get("requestOptions").and_then(Value::as_array) else {
            return Ok(());
        };
        let kept: Vec<&Value> = requested
            .iter()
            .filter(|opt| opt.as_str().is_none_or(|o| !owned.contains(&o)))
            .collect();
        if kept.len() == requested.len() {
            return Ok(());
        }
        debug!(?owned, "releasing DHCP options");
        self.gateway
            .modify(
                DHCP_CONFIG_PATH,
                json!({ "requestOptions": kept }),
                RetryPolicy::SHORT,
            )
            .await?;
        Ok(())
    }

    pub(super) async fn apply_mgmt_dhcp(&self, state: &TaskState) -> Result<(), CoreError> {
        let common = self.declaration.common();
        let ip_vote = common.management_ip().map(|ip| {
            if dhcp_originated(ip.name.as_ref(), ip.description.as_ref()) {
                DhcpVote::Enabled
            } else {
                DhcpVote::Disabled
            }
        });
        let preserve = common
            .system
            .as_ref()
            .and_then(|s| s.preserve_orig_dhcp_routes)
            .unwrap_or(false);
        let route_vote = match &common.management_route {
            _ if preserve => Some(DhcpVote::Enabled),
            Some(routes) if !routes.is_empty() => {
                let all_dhcp = routes
                    .values()
                    .all(|r| dhcp_originated(r.name.as_ref(), r.description.as_ref()));
                Some(if all_dhcp {
                    DhcpVote::Enabled
                } else {
                    DhcpVote::Disabled
                })
            }
            _ => None,
        };
        let Some(desired) = resolve_votes(ip_vote, route_vote) else {
            return Ok(());
        };

        let settings = self
            .gateway
            .list(GLOBAL_SETTINGS_PATH, RetryPolicy::SHORT)
            .await?;
        let current = settings.get("mgmtDhcp").and_then(Value::as_str);
        if matches!(current, Some("dhcpv4" | "dhcpv6")) || current == Some(desired.as_str()) {
            return Ok(());
        }
        info!(task_id = %state.id, mode = desired.as_str(), "setting management DHCP");
        self.gateway
            .modify(
                GLOBAL_SETTINGS_PATH,
                json!({ "mgmtDhcp": desired.as_str() }),
                RetryPolicy::SHORT,
            )
            .await?;
        Ok(())
    }

    pub(super) async fn apply_management_ip(&self, state: &TaskState) -> Result<(), CoreError> {
        let Some(ManagementIp {
            name: Some(name),
            description,
        }) = self.declaration.common().management_ip()
        else {
            return Ok(());
        };
        let current = state.current_config.common().management_ip();
        let current_name = current.and_then(|c| c.name.as_deref());
        let current_description = current.and_then(|c| c.description.as_ref());

        if current_name == Some(name.as_str()) {
            if current_description != description.as_ref() {
                self.gateway
                    .modify(
                        &mgmt_ip_path(name),
                        json!({ "description": description }),
                        RetryPolicy::SHORT,
                    )
                    .await?;
            }
            return Ok(());
        }

        let mask_only = current_name.is_some_and(|c| {
            strip_cidr(c) == strip_cidr(name) && prefix_len(c) != prefix_len(name)
        });
        if mask_only {
            if !self.is_localhost() {
                return Err(CoreError::precondition(
                    "Cannot change management IP netmask when running remotely",
                ));
            }
            if let Some(old) = current_name {
                self.gateway
                    .delete(&mgmt_ip_path(old), RetryPolicy::SHORT)
                    .await?;
            }
        }

        info!(address = %name, "setting management IP");
        let mut body = json!({ "name": name });
        if let Some(description) = description {
            body["description"] = json!(description);
        }
        self.gateway
            .create(MGMT_IP_PATH, body, RetryPolicy::SHORT)
            .await?;

        if !self.is_localhost() {
            self.gateway.set_host(strip_cidr(name));
        }
        Ok(())
    }

    pub(super) async fn apply_management_routes(&self, state: &TaskState) -> Result<(), CoreError> {
        let Some(routes) = &self.declaration.common().management_route else {
            return Ok(());
        };
        let current = state.current_config.common().management_route.as_ref();
        let route_name = |key: &String, route: &ManagementRoute| {
            route.name.clone().unwrap_or_else(|| key.clone())
        };
        let network_of =
            |route: &ManagementRoute| with_default_prefix(route.network.as_deref().unwrap_or("default"));

        let mut stale = Vec::new();
        let mut bodies = Vec::new();
        for (key, route) in routes {
            let name = route_name(key, route);
            let network = network_of(route);

            for (current_key, existing) in current.into_iter().flatten() {
                let existing_name = route_name(current_key, existing);
                let existing_network = network_of(existing);
                let declared_elsewhere = routes
                    .iter()
                    .any(|(k, r)| route_name(k, r) == existing_name);
                if existing_name != name && existing_network == network && !declared_elsewhere {
                    debug!(from = %existing_name, to = %name, "route renamed");
                    stale.push(existing_name);
                } else if existing_name == name && existing_network != network {
                    if self.options.platform != Platform::BigIp {
                        return Err(CoreError::precondition(
                            "Cannot update network property when running remotely",
                        ));
                    }
                    stale.push(existing_name);
                }
            }

            let mut body = json!({
                "name": name,
                "gateway": route.gw,
                "network": network,
            });
            if let Some(mtu) = route.mtu {
                body["mtu"] = json!(mtu);
            }
            if let Some(route_type) = &route.route_type {
                body["type"] = json!(route_type);
            }
            if let Some(description) = &route.description {
                body["description"] = json!(description);
            }
            bodies.push(body);
        }

        for name in &stale {
            self.gateway
                .delete(&format!("{MGMT_ROUTE_PATH}/~Common~{name}"), RetryPolicy::SHORT)
                .await?;
        }
        try_join_all(bodies.into_iter().map(|body| {
            self.gateway
                .create_or_modify(MGMT_ROUTE_PATH, body, RetryPolicy::SHORT)
        }))
        .await?;
        Ok(())
    }

    pub(super) async fn apply_dns(&self) -> Result<(), CoreError> {
        let Some(dns) = &self.declaration.common().dns else {
            return Ok(());
        };
        info!("setting DNS");
        self.gateway
            .replace(
                "/tm/sys/dns",
                json!({ "nameServers": dns.name_servers, "search": dns.search }),
                RetryPolicy::SHORT,
            )
            .await?;
        Ok(())
    }

    /// Runs after DNS so server hostnames resolve against the new name
    /// servers.
    pub(super) async fn apply_ntp(&self) -> Result<(), CoreError> {
        let Some(ntp) = &self.declaration.common().ntp else {
            return Ok(());
        };
        for server in &ntp.servers {
            check_dns_resolution(self.gateway.as_ref(), server).await?;
        }
        info!("setting NTP");
        let mut body = json!({ "servers": ntp.servers });
        if let Some(timezone) = &ntp.timezone {
            body["timezone"] = json!(timezone);
        }
        self.gateway
            .replace("/tm/sys/ntp", body, RetryPolicy::SHORT)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::model::Declaration;
    use crate::settings::tests::reconciler;
    use crate::testing::MockGateway;

    #[test]
    fn disagreement_resolves_to_disabled() {
        assert_eq!(
            resolve_votes(Some(DhcpVote::Disabled), Some(DhcpVote::Enabled)),
            Some(DhcpVote::Disabled)
        );
        assert_eq!(resolve_votes(None, Some(DhcpVote::Enabled)), Some(DhcpVote::Enabled));
        assert_eq!(resolve_votes(None, None), None);
    }

    #[tokio::test]
    async fn static_ip_with_preserved_dhcp_routes_disables_dhcp() {
        let gateway = MockGateway::new();
        gateway.on_list(GLOBAL_SETTINGS_PATH, json!({ "mgmtDhcp": "enabled" }));
        reconciler(
            json!({
                "Common": {
                    "ManagementIp": { "mgmt": { "name": "10.0.0.5/24", "description": "static" } },
                    "System": { "preserveOrigDhcpRoutes": true }
                }
            }),
            &gateway,
        )
        .process(&mut TaskState::default())
        .await
        .unwrap();

        let sent = gateway.calls_to("modify", GLOBAL_SETTINGS_PATH);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].body, Some(json!({ "mgmtDhcp": "disabled" })));
    }

    #[tokio::test]
    async fn dual_stack_dhcp_is_left_alone() {
        let gateway = MockGateway::new();
        gateway.on_list(GLOBAL_SETTINGS_PATH, json!({ "mgmtDhcp": "dhcpv6" }));
        reconciler(
            json!({ "Common": { "ManagementIp": { "mgmt": { "name": "10.0.0.5/24" } } } }),
            &gateway,
        )
        .process(&mut TaskState::default())
        .await
        .unwrap();
        assert!(gateway.calls_to("modify", GLOBAL_SETTINGS_PATH).is_empty());
    }

    #[tokio::test]
    async fn dhcp_options_owned_by_declaration_are_released() {
        let gateway = MockGateway::new();
        gateway.on_list(
            DHCP_CONFIG_PATH,
            json!({ "requestOptions": ["subnet-mask", "ntp-servers", "domain-name-servers", "host-name"] }),
        );
        reconciler(
            json!({ "Common": { "NTP": { "servers": ["10.1.1.1"] } } }),
            &gateway,
        )
        .process(&mut TaskState::default())
        .await
        .unwrap();
        let sent = gateway.calls_to("modify", DHCP_CONFIG_PATH);
        assert_eq!(
            sent[0].body,
            Some(json!({ "requestOptions": ["subnet-mask", "domain-name-servers", "host-name"] }))
        );
    }

    #[tokio::test]
    async fn mask_change_remotely_is_rejected() {
        let gateway = MockGateway::for_host("10.0.0.5");
        let mut state = TaskState::new(
            Declaration::from_value(json!({
                "Common": { "ManagementIp": { "mgmt": { "name": "10.0.0.5/24" } } }
            }))
            .unwrap(),
        );
        let err = reconciler(
            json!({ "Common": { "ManagementIp": { "mgmt": { "name": "10.0.0.5/16" } } } }),
            &gateway,
        )
        .process(&mut state)
        .await
        .unwrap_err();
        assert!(matches!(err, CoreError::Precondition { .. }));
        assert!(gateway.calls_to("create", MGMT_IP_PATH).is_empty());
    }

    #[tokio::test]
    async fn mask_change_on_localhost_deletes_then_creates() {
        let gateway = MockGateway::new();
        let mut state = TaskState::new(
            Declaration::from_value(json!({
                "Common": { "ManagementIp": { "mgmt": { "name": "10.0.0.5/24" } } }
            }))
            .unwrap(),
        );
        reconciler(
            json!({ "Common": { "ManagementIp": { "mgmt": { "name": "10.0.0.5/16" } } } }),
            &gateway,
        )
        .process(&mut state)
        .await
        .unwrap();
        let writes: Vec<_> = gateway
            .writes()
            .into_iter()
            .map(|c| (c.verb, c.path))
            .collect();
        assert_eq!(
            writes,
            vec![
                ("modify", GLOBAL_SETTINGS_PATH.to_owned()),
                ("delete", "/tm/sys/management-ip/10.0.0.5~24".to_owned()),
                ("create", MGMT_IP_PATH.to_owned()),
            ]
        );
    }

    #[tokio::test]
    async fn description_change_modifies_in_place() {
        let gateway = MockGateway::for_host("10.0.0.5");
        let mut state = TaskState::new(
            Declaration::from_value(json!({
                "Common": { "ManagementIp": { "mgmt": { "name": "10.0.0.5/24", "description": "old" } } }
            }))
            .unwrap(),
        );
        reconciler(
            json!({ "Common": { "ManagementIp": { "mgmt": { "name": "10.0.0.5/24", "description": "new" } } } }),
            &gateway,
        )
        .process(&mut state)
        .await
        .unwrap();

        let sent = gateway.calls_to("modify", "/tm/sys/management-ip/10.0.0.5~24");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].body, Some(json!({ "description": "new" })));
        assert!(gateway.calls_to("create", MGMT_IP_PATH).is_empty());
        assert!(!gateway.verbs().contains(&"delete"));
        assert_eq!(onboard_api::DeviceGateway::host(&gateway), "10.0.0.5");
    }

    #[tokio::test]
    async fn new_address_repoints_remote_gateway() {
        let gateway = MockGateway::for_host("10.0.0.5");
        reconciler(
            json!({ "Common": { "ManagementIp": { "mgmt": { "name": "10.0.0.9/24" } } } }),
            &gateway,
        )
        .process(&mut TaskState::default())
        .await
        .unwrap();
        assert_eq!(onboard_api::DeviceGateway::host(&gateway), "10.0.0.9");
    }

    #[tokio::test]
    async fn renamed_route_is_deleted_first() {
        let gateway = MockGateway::new();
        let mut state = TaskState::new(
            Declaration::from_value(json!({
                "Common": { "ManagementRoute": { "old": { "gw": "10.0.0.1", "network": "10.2.0.0/16" } } }
            }))
            .unwrap(),
        );
        reconciler(
            json!({
                "Common": { "ManagementRoute": { "new": { "gw": "10.0.0.1", "network": "10.2.0.0/16" } } }
            }),
            &gateway,
        )
        .process(&mut state)
        .await
        .unwrap();
        let delete = gateway.calls_to("delete", "/tm/sys/management-route/~Common~old");
        assert_eq!(delete.len(), 1);
        let upsert = gateway.calls_to("create_or_modify", MGMT_ROUTE_PATH);
        assert_eq!(upsert[0].body.as_ref().unwrap()["name"], "new");
    }

    #[tokio::test]
    async fn network_change_requires_local_platform() {
        let gateway = MockGateway::new();
        let mut state = TaskState::new(
            Declaration::from_value(json!({
                "Common": { "ManagementRoute": { "r": { "gw": "10.0.0.1", "network": "10.2.0.0/16" } } }
            }))
            .unwrap(),
        );
        let err = reconciler(
            json!({ "Common": { "ManagementRoute": { "r": { "gw": "10.0.0.1", "network": "10.3.0.0/16" } } } }),
            &gateway,
        )
        .with_options(crate::config::ReconcilerOptions {
            platform: Platform::Container,
            ..crate::config::ReconcilerOptions::default()
        })
        .process(&mut state)
        .await
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot update network property when running remotely"
        );
    }

    #[tokio::test]
    async fn network_change_on_device_deletes_then_recreates() {
        let gateway = MockGateway::new();
        let mut state = TaskState::new(
            Declaration::from_value(json!({
                "Common": { "ManagementRoute": { "r": { "gw": "10.0.0.1", "network": "10.2.0.0/16" } } }
            }))
            .unwrap(),
        );
        reconciler(
            json!({ "Common": { "ManagementRoute": { "r": { "gw": "10.0.0.1", "network": "10.3.0.0/16" } } } }),
            &gateway,
        )
        .with_options(crate::config::ReconcilerOptions {
            platform: Platform::BigIp,
            ..crate::config::ReconcilerOptions::default()
        })
        .process(&mut state)
        .await
        .unwrap();

        let writes: Vec<_> = gateway
            .writes()
            .into_iter()
            .filter(|c| c.path.starts_with(MGMT_ROUTE_PATH))
            .map(|c| (c.verb, c.path))
            .collect();
        assert_eq!(
            writes,
            vec![
                ("delete", "/tm/sys/management-route/~Common~r".to_owned()),
                ("create_or_modify", MGMT_ROUTE_PATH.to_owned()),
            ]
        );
        let upsert = gateway.calls_to("create_or_modify", MGMT_ROUTE_PATH);
        assert_eq!(upsert[0].body.as_ref().unwrap()["network"], "10.3.0.0/16");
    }

    #[tokio::test]
    async fn route_network_gets_host_prefix() {
        let gateway = MockGateway::new();
        reconciler(
            json!({ "Common": { "ManagementRoute": { "host": { "gw": "10.0.0.1", "network": "10.9.9.9" } } } }),
            &gateway,
        )
        .process(&mut TaskState::default())
        .await
        .unwrap();
        let upsert = gateway.calls_to("create_or_modify", MGMT_ROUTE_PATH);
        assert_eq!(upsert[0].body.as_ref().unwrap()["network"], "10.9.9.9/32");
    }

    #[tokio::test]
    async fn unresolvable_ntp_server_aborts() {
        let gateway = MockGateway::new();
        gateway.unresolvable("time.invalid");
        let err = reconciler(
            json!({ "Common": { "NTP": { "servers": ["time.invalid"] } } }),
            &gateway,
        )
        .process(&mut TaskState::default())
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "Unable to resolve host time.invalid");
        assert!(gateway.calls_to("replace", "/tm/sys/ntp").is_empty());
    }
}
