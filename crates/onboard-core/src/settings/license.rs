// Licensing: registration key, or BIG-IQ license pool with optional
// revoke-then-relicense.
//
// Pool flow:
//   revokeFrom set  -> (reachable) announce + wait for ReadyForRevoke
//                   -> revoke -> (reachable) settle for post_revoke_wait
//   licensePool set -> assign -> wait for active

use tracing::info;

use onboard_api::{BigIqLicenseRequest, BigIqRevokeRequest, BigIqTarget, RegKeyLicenseRequest};

use super::SettingsReconciler;
use crate::config::Platform;
use crate::error::CoreError;
use crate::events::OnboardEvent;
use crate::model::{License, PoolLicense, RegKeyLicense, RevokeFrom};
use crate::state::TaskState;

const PHASE: &str = "Error licensing";

impl SettingsReconciler {
    pub(super) async fn apply_license(&self, state: &TaskState) -> Result<(), CoreError> {
        let result = match &self.declaration.common().license {
            None => return Ok(()),
            Some(License::RegKey(license)) => self.license_reg_key(license).await,
            Some(License::LicensePool(license)) => self.license_pool(state, license).await,
        };
        result.map_err(|e| e.in_phase(PHASE))
    }

    async fn license_reg_key(&self, license: &RegKeyLicense) -> Result<(), CoreError> {
        info!("licensing with registration key");
        self.gateway
            .onboard_license(&RegKeyLicenseRequest {
                reg_key: license.reg_key.clone(),
                add_on_keys: license.add_on_keys.clone(),
                overwrite: license.overwrite,
            })
            .await?;
        self.gateway.active().await?;
        Ok(())
    }

    async fn license_pool(&self, state: &TaskState, license: &PoolLicense) -> Result<(), CoreError> {
        if let Some(revoke_from) = &license.revoke_from {
            self.revoke(state, license, revoke_from).await?;
        }

        let Some(pool) = &license.license_pool else {
            // Unlicensed devices report OFFLINE; nothing further to check.
            return Ok(());
        };
        let target = BigIqTarget {
            host: required(license.big_iq_host.as_ref(), "bigIqHost")?,
            username: required(license.big_iq_username.as_ref(), "bigIqUsername")?,
            password: required(license.big_iq_password.as_ref(), "bigIqPassword")?,
            license_pool: pool.clone(),
        };
        let management_address = self.management_address(license.reachable).await?;
        info!(task_id = %state.id, pool = %pool, "licensing from pool");
        self.gateway
            .onboard_license_via_bigiq(&BigIqLicenseRequest {
                target,
                management_address,
                management_port: self.gateway.port(),
                bigip_username: license.big_ip_username.clone(),
                bigip_password: license.big_ip_password.clone(),
                reachable: license.reachable,
                sku_keyword1: license.sku_keyword1.clone(),
                sku_keyword2: license.sku_keyword2.clone(),
                unit_of_measure: license.unit_of_measure.clone(),
                hypervisor: license.hypervisor.clone(),
                tenant: license.tenant.clone(),
                overwrite: license.overwrite,
            })
            .await?;
        self.gateway.active().await?;
        Ok(())
    }

    async fn revoke(
        &self,
        state: &TaskState,
        license: &PoolLicense,
        revoke_from: &RevokeFrom,
    ) -> Result<(), CoreError> {
        let (target, reachable) = match revoke_from {
            RevokeFrom::Pool(pool) => (
                BigIqTarget {
                    host: required(license.big_iq_host.as_ref(), "bigIqHost")?,
                    username: required(license.big_iq_username.as_ref(), "bigIqUsername")?,
                    password: required(license.big_iq_password.as_ref(), "bigIqPassword")?,
                    license_pool: pool.clone(),
                },
                license.reachable,
            ),
            RevokeFrom::Target(remote) => (
                BigIqTarget {
                    host: remote.big_iq_host.clone(),
                    username: remote.big_iq_username.clone(),
                    password: remote.big_iq_password.clone(),
                    license_pool: remote.license_pool.clone(),
                },
                remote.reachable,
            ),
        };

        if reachable {
            self.events
                .await_revoke_ready(
                    OnboardEvent::LicenseWillBeRevoked {
                        task_id: state.id,
                        bigip_password: license.big_ip_password.clone(),
                        bigiq_password: Some(target.password.clone()),
                    },
                    self.options.revoke_ready_timeout,
                )
                .await?;
        }

        let management_address = self.management_address(reachable).await?;
        info!(task_id = %state.id, pool = %target.license_pool, "revoking license");
        self.gateway
            .onboard_revoke_license_via_bigiq(&BigIqRevokeRequest {
                target,
                management_address,
                bigip_username: license.big_ip_username.clone(),
                bigip_password: license.big_ip_password.clone(),
                reachable,
            })
            .await?;

        if reachable {
            info!(
                wait_secs = self.options.post_revoke_wait.as_secs(),
                "waiting for services after revoke"
            );
            tokio::time::sleep(self.options.post_revoke_wait).await;
        }
        Ok(())
    }

    /// Address the BIG-IQ should use for this device. On the device itself
    /// the gateway host is `localhost`, which the pool cannot reach, so the
    /// device's self-reported management address is used instead.
    async fn management_address(&self, reachable: bool) -> Result<String, CoreError> {
        if reachable && self.options.platform == Platform::BigIp {
            let device = self.refresh_device().await?;
            return Ok(device.management_address);
        }
        Ok(self.gateway.host())
    }
}

fn required<T: Clone>(value: Option<&T>, field: &'static str) -> Result<T, CoreError> {
    value.cloned().ok_or_else(|| CoreError::Declaration {
        message: format!("License is missing {field}"),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};

    use super::*;
    use crate::config::ReconcilerOptions;
    use crate::events::EventBus;
    use crate::model::Declaration;
    use crate::settings::SettingsReconciler;
    use crate::settings::tests::reconciler;
    use crate::testing::MockGateway;

    fn pool(extra: Value) -> Value {
        let mut license = json!({
            "licenseType": "licensePool",
            "bigIqHost": "10.0.0.200",
            "bigIqUsername": "admin",
            "bigIqPassword": "iq-secret",
            "bigIpUsername": "admin",
            "bigIpPassword": "ip-secret"
        });
        for (k, v) in extra.as_object().unwrap() {
            license[k] = v.clone();
        }
        json!({ "Common": { "License": license } })
    }

    #[tokio::test]
    async fn reg_key_failures_are_prefixed() {
        let gateway = MockGateway::new();
        gateway.fail("onboard_license", "AAAAA-BBBBB");
        let err = reconciler(
            json!({ "Common": { "License": { "licenseType": "regKey", "regKey": "AAAAA-BBBBB" } } }),
            &gateway,
        )
        .process(&mut TaskState::default())
        .await
        .unwrap_err();
        assert!(err.to_string().starts_with("Error licensing: "));
    }

    #[tokio::test(start_paused = true)]
    async fn revoke_handshake_times_out_without_supervisor() {
        let gateway = MockGateway::new();
        let err = reconciler(
            pool(json!({ "revokeFrom": "old-pool", "reachable": true, "licensePool": "new-pool" })),
            &gateway,
        )
        .process(&mut TaskState::default())
        .await
        .unwrap_err();

        assert!(matches!(err.root_cause(), CoreError::RevokeTimeout));
        assert_eq!(
            err.to_string(),
            "Error licensing: Timed out waiting for revoke ready event"
        );
        assert!(
            gateway
                .calls_to("onboard_revoke_license_via_bigiq", "old-pool")
                .is_empty()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn revoke_only_skips_active_check() {
        let gateway = MockGateway::new();
        let events = EventBus::new();
        let mut supervisor = events.subscribe();
        let answering = events.clone();
        tokio::spawn(async move {
            while let Ok(event) = supervisor.recv().await {
                if matches!(*event, OnboardEvent::LicenseWillBeRevoked { .. }) {
                    answering.emit(OnboardEvent::ReadyForRevoke);
                }
            }
        });

        let started = tokio::time::Instant::now();
        SettingsReconciler::new(
            Arc::new(Declaration::from_value(pool(json!({ "revokeFrom": "old-pool", "reachable": true }))).unwrap()),
            Arc::new(gateway.clone()),
            events,
        )
        .process(&mut TaskState::default())
        .await
        .unwrap();

        let revoke = gateway.calls_to("onboard_revoke_license_via_bigiq", "old-pool");
        assert_eq!(revoke.len(), 1);
        assert!(!gateway.verbs().contains(&"active"));
        assert!(started.elapsed() >= Duration::from_secs(120));
    }

    #[tokio::test]
    async fn reachable_on_device_uses_reported_management_address() {
        let gateway = MockGateway::new().with_device("bigip1.example.com", "10.0.0.44");
        reconciler(
            pool(json!({ "licensePool": "prod", "reachable": true })),
            &gateway,
        )
        .process(&mut TaskState::default())
        .await
        .unwrap();
        let assign = gateway.calls_to("onboard_license_via_bigiq", "prod");
        assert_eq!(assign[0].body.as_ref().unwrap()["address"], "10.0.0.44");
        assert!(gateway.verbs().contains(&"active"));
    }

    #[tokio::test]
    async fn container_uses_gateway_host() {
        let gateway = MockGateway::for_host("192.0.2.7");
        reconciler(
            pool(json!({ "licensePool": "prod", "reachable": true })),
            &gateway,
        )
        .with_options(ReconcilerOptions {
            platform: Platform::Container,
            ..ReconcilerOptions::default()
        })
        .process(&mut TaskState::default())
        .await
        .unwrap();
        let assign = gateway.calls_to("onboard_license_via_bigiq", "prod");
        assert_eq!(assign[0].body.as_ref().unwrap()["address"], "192.0.2.7");
    }
}
