// Syslog, traffic control, HTTPD, SSHD, and disk resize.

use serde_json::{Value, json};
use tracing::info;

use onboard_api::{RetryPolicy, enabled};

use super::SettingsReconciler;
use crate::error::CoreError;
use crate::events::OnboardEvent;
use crate::model::Sshd;
use crate::state::TaskState;

const LOGICAL_DISK_PATH: &str = "/tm/sys/disk/logical-disk/~Common~HD1";

/// `include` fragment for settings sshd exposes no dedicated field for.
fn sshd_include(sshd: &Sshd) -> String {
    let mut lines = Vec::new();
    if let Some(ciphers) = &sshd.ciphers {
        lines.push(format!("Ciphers {}", ciphers.join(",")));
    }
    if let Some(grace) = sshd.login_grace_time {
        lines.push(format!("LoginGraceTime {grace}"));
    }
    if let Some(macs) = &sshd.macs {
        lines.push(format!("MACs {}", macs.join(",")));
    }
    if let Some(tries) = sshd.max_auth_tries {
        lines.push(format!("MaxAuthTries {tries}"));
    }
    if let Some(startups) = &sshd.max_startups {
        lines.push(format!("MaxStartups {startups}"));
    }
    if let Some(protocol) = sshd.protocol {
        lines.push(format!("Protocol {protocol}"));
    }
    if lines.is_empty() {
        return String::new();
    }
    lines.push(String::new());
    lines.join("\n")
}

impl SettingsReconciler {
    pub(super) async fn apply_syslog(&self) -> Result<(), CoreError> {
        let Some(servers) = &self.declaration.common().syslog_remote_server else {
            return Ok(());
        };
        let remote: Vec<Value> = servers
            .iter()
            .map(|(name, server)| {
                let mut entry = json!({ "name": name, "host": server.host });
                if let Some(local_ip) = &server.local_ip {
                    entry["localIp"] = json!(local_ip);
                }
                if let Some(port) = server.remote_port {
                    entry["remotePort"] = json!(port);
                }
                entry
            })
            .collect();
        info!(count = remote.len(), "setting remote syslog servers");
        self.gateway
            .modify(
                "/tm/sys/syslog",
                json!({ "remoteServers": remote }),
                RetryPolicy::SHORT,
            )
            .await?;
        Ok(())
    }

    pub(super) async fn apply_traffic_control(&self) -> Result<(), CoreError> {
        let Some(tc) = &self.declaration.common().traffic_control else {
            return Ok(());
        };
        let mut body = json!({});
        for (key, value) in [
            ("acceptIpOptions", tc.accept_ip_options),
            ("acceptIpSourceRoute", tc.accept_ip_source_route),
            ("allowIpSourceRoute", tc.allow_ip_source_route),
            ("continueMatching", tc.continue_matching),
            ("pathMtuDiscovery", tc.path_mtu_discovery),
            ("portFindThresholdWarning", tc.port_find_threshold_warning),
            ("rejectUnmatched", tc.reject_unmatched),
        ] {
            if let Some(value) = value {
                body[key] = json!(enabled(value));
            }
        }
        for (key, value) in [
            ("maxIcmpRate", tc.max_icmp_rate),
            ("maxPortFindLinear", tc.max_port_find_linear),
            ("maxPortFindRandom", tc.max_port_find_random),
            ("maxRejectRate", tc.max_reject_rate),
            ("maxRejectRateTimeout", tc.max_reject_rate_timeout),
            ("minPathMtu", tc.min_path_mtu),
            ("portFindThresholdTrigger", tc.port_find_threshold_trigger),
            ("portFindThresholdTimeout", tc.port_find_threshold_timeout),
        ] {
            if let Some(value) = value {
                body[key] = json!(value);
            }
        }
        self.gateway
            .modify(
                "/tm/ltm/global-settings/traffic-control",
                body,
                RetryPolicy::SHORT,
            )
            .await?;
        Ok(())
    }

    pub(super) async fn apply_httpd(&self) -> Result<(), CoreError> {
        let Some(httpd) = &self.declaration.common().httpd else {
            return Ok(());
        };
        let mut body = json!({});
        if let Some(allow) = &httpd.allow {
            body["allow"] = json!(allow);
        }
        if let Some(timeout) = httpd.auth_pam_idle_timeout {
            body["authPamIdleTimeout"] = json!(timeout);
        }
        if let Some(max) = httpd.max_clients {
            body["maxClients"] = json!(max);
        }
        if let Some(ciphers) = &httpd.ssl_ciphersuite {
            body["sslCiphersuite"] = json!(ciphers.join(":"));
        }
        if let Some(protocol) = &httpd.ssl_protocol {
            body["sslProtocol"] = json!(protocol);
        }
        self.gateway
            .modify("/tm/sys/httpd", body, RetryPolicy::SHORT)
            .await?;
        Ok(())
    }

    pub(super) async fn apply_sshd(&self) -> Result<(), CoreError> {
        let Some(sshd) = &self.declaration.common().sshd else {
            return Ok(());
        };
        let mut body = json!({ "include": sshd_include(sshd) });
        if let Some(allow) = &sshd.allow {
            body["allow"] = json!(allow);
        }
        match &sshd.banner {
            Some(text) => {
                body["banner"] = json!("enabled");
                body["bannerText"] = json!(text);
            }
            None => body["banner"] = json!("disabled"),
        }
        if let Some(timeout) = sshd.inactivity_timeout {
            body["inactivityTimeout"] = json!(timeout);
        }
        self.gateway
            .modify("/tm/sys/sshd", body, RetryPolicy::SHORT)
            .await?;
        Ok(())
    }

    /// Grow the application data volume, then reboot and wait for the
    /// device to return.
    pub(super) async fn apply_disk(&self, state: &TaskState) -> Result<(), CoreError> {
        let Some(disk) = self.declaration.common().disk else {
            return Ok(());
        };
        let recorded = state
            .current_config
            .common()
            .disk
            .map_or(0, |d| d.application_data);
        let live = self
            .gateway
            .list(LOGICAL_DISK_PATH, RetryPolicy::SHORT)
            .await?
            .get("appdataSize")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let current = recorded.max(live);
        if disk.application_data <= current {
            return Err(CoreError::precondition(format!(
                "Cannot shrink or keep disk size the same: applicationData must be greater than {current}"
            )));
        }

        info!(task_id = %state.id, size = disk.application_data, "resizing application data");
        self.gateway
            .modify(
                LOGICAL_DISK_PATH,
                json!({ "appdataSize": disk.application_data }),
                RetryPolicy::SHORT,
            )
            .await?;
        self.gateway.save().await?;
        self.events.emit(OnboardEvent::RebootNow { task_id: state.id });
        self.wait_for_reboot().await
    }

    /// On the device itself the reboot takes this process down with it, so
    /// wait for shutdown rather than racing a health check.
    async fn wait_for_reboot(&self) -> Result<(), CoreError> {
        if self.is_localhost() {
            info!("waiting for local reboot");
            self.options.shutdown.cancelled().await;
            return Ok(());
        }
        tokio::time::sleep(self.options.reboot_delay).await;
        self.gateway.ready().await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::config::ReconcilerOptions;
    use crate::events::EventBus;
    use crate::model::Declaration;
    use crate::settings::tests::reconciler;
    use crate::testing::MockGateway;

    #[test]
    fn sshd_include_fragment() {
        let sshd: Sshd = serde_json::from_value(json!({
            "ciphers": ["aes128-ctr", "aes256-ctr"],
            "MACS": ["hmac-sha2-256"],
            "maxAuthTries": 3,
            "protocol": 2
        }))
        .unwrap();
        assert_eq!(
            sshd_include(&sshd),
            "Ciphers aes128-ctr,aes256-ctr\nMACs hmac-sha2-256\nMaxAuthTries 3\nProtocol 2\n"
        );
    }

    #[tokio::test]
    async fn disk_shrink_is_rejected_without_writes() {
        let gateway = MockGateway::new();
        gateway.on_list(LOGICAL_DISK_PATH, json!({ "appdataSize": 26_128_384 }));
        let err = reconciler(
            json!({ "Common": { "Disk": { "applicationData": 26_128_384 } } }),
            &gateway,
        )
        .process(&mut TaskState::default())
        .await
        .unwrap_err();
        assert!(matches!(err, CoreError::Precondition { .. }));
        assert_eq!(gateway.writes(), vec![]);
    }

    #[tokio::test]
    async fn recorded_disk_size_rejects_same_size() {
        let gateway = MockGateway::new();
        let decl = json!({ "Common": { "Disk": { "applicationData": 26_128_384 } } });
        let mut state = TaskState::new(Declaration::from_value(decl.clone()).unwrap());
        let err = reconciler(decl, &gateway).process(&mut state).await.unwrap_err();
        assert!(matches!(err, CoreError::Precondition { .. }));
        assert_eq!(gateway.writes(), vec![]);
    }

    #[tokio::test]
    async fn recorded_disk_size_wins_over_smaller_live_size() {
        let gateway = MockGateway::new();
        gateway.on_list(LOGICAL_DISK_PATH, json!({ "appdataSize": 20_000_000 }));
        let recorded = json!({ "Common": { "Disk": { "applicationData": 30_000_000 } } });
        let mut state = TaskState::new(Declaration::from_value(recorded).unwrap());
        let err = reconciler(
            json!({ "Common": { "Disk": { "applicationData": 26_000_000 } } }),
            &gateway,
        )
        .process(&mut state)
        .await
        .unwrap_err();
        assert!(err.to_string().contains("greater than 30000000"));
        assert_eq!(gateway.writes(), vec![]);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_disk_growth_saves_reboots_and_waits() {
        let gateway = MockGateway::for_host("10.0.0.5");
        gateway.on_list(LOGICAL_DISK_PATH, json!({ "appdataSize": 26_128_384 }));
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let reconciler = SettingsReconciler::new(
            Arc::new(
                Declaration::from_value(json!({ "Common": { "Disk": { "applicationData": 30_000_000 } } }))
                    .unwrap(),
            ),
            Arc::new(gateway.clone()),
            events,
        )
        .with_options(ReconcilerOptions {
            reboot_delay: Duration::from_secs(5),
            ..ReconcilerOptions::default()
        });
        reconciler.process(&mut TaskState::default()).await.unwrap();

        assert!(matches!(*rx.recv().await.unwrap(), OnboardEvent::RebootNow { .. }));
        let verbs = gateway.verbs();
        let save = verbs.iter().position(|v| *v == "save").unwrap();
        let ready = verbs.iter().rposition(|v| *v == "ready").unwrap();
        assert!(save < ready);
    }

    #[tokio::test]
    async fn local_disk_growth_waits_for_shutdown() {
        let gateway = MockGateway::new();
        gateway.on_list(LOGICAL_DISK_PATH, json!({ "appdataSize": 100 }));
        let options = ReconcilerOptions::default();
        let shutdown = options.shutdown.clone();
        let reconciler = reconciler(
            json!({ "Common": { "Disk": { "applicationData": 200 } } }),
            &gateway,
        )
        .with_options(options);

        let run = tokio::spawn(async move { reconciler.process(&mut TaskState::default()).await });
        tokio::task::yield_now().await;
        shutdown.cancel();
        run.await.unwrap().unwrap();
        assert!(!gateway.verbs().contains(&"ready"));
    }

    #[tokio::test]
    async fn syslog_servers_are_sent_together() {
        let gateway = MockGateway::new();
        reconciler(
            json!({
                "Common": {
                    "SyslogRemoteServer": {
                        "a": { "host": "10.0.0.50", "remotePort": 514 },
                        "b": { "host": "10.0.0.51", "localIp": "10.0.0.1" }
                    }
                }
            }),
            &gateway,
        )
        .process(&mut TaskState::default())
        .await
        .unwrap();
        let sent = gateway.calls_to("modify", "/tm/sys/syslog");
        assert_eq!(
            sent[0].body,
            Some(json!({
                "remoteServers": [
                    { "name": "a", "host": "10.0.0.50", "remotePort": 514 },
                    { "name": "b", "host": "10.0.0.51", "localIp": "10.0.0.1" }
                ]
            }))
        );
    }
}
