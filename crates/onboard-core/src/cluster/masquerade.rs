// MAC masquerade for traffic groups. A source interface yields a derived,
// locally administered address; otherwise the declared MAC (or "none").

use serde_json::{Value, json};
use tracing::info;

use onboard_api::RetryPolicy;

use super::ClusterReconciler;
use crate::error::CoreError;
use crate::model::MacMasquerade;
use crate::util::derive_masquerade_mac;

impl ClusterReconciler {
    pub(super) async fn apply_mac_masquerade(&self) -> Result<(), CoreError> {
        let Some(masquerades) = &self.declaration.common().mac_masquerade else {
            return Ok(());
        };
        for (name, masquerade) in masquerades {
            let mac = self.masquerade_mac(masquerade).await?;
            info!(name = %name, traffic_group = %masquerade.traffic_group, mac = %mac, "setting MAC masquerade");
            self.gateway
                .modify(
                    &format!("/tm/cm/traffic-group/~Common~{}", masquerade.traffic_group),
                    json!({ "mac": mac }),
                    RetryPolicy::SHORT,
                )
                .await?;
        }
        Ok(())
    }

    async fn masquerade_mac(&self, masquerade: &MacMasquerade) -> Result<String, CoreError> {
        let Some(source) = &masquerade.source else {
            return Ok(masquerade.mac.clone().unwrap_or_else(|| "none".into()));
        };
        let interfaces = self
            .gateway
            .list("/tm/net/interface", RetryPolicy::SHORT)
            .await?;
        interfaces
            .as_array()
            .into_iter()
            .flatten()
            .find(|item| item.get("name").and_then(Value::as_str) == Some(source.interface.as_str()))
            .and_then(|item| item.get("macAddress").and_then(Value::as_str))
            .and_then(derive_masquerade_mac)
            .ok_or_else(|| CoreError::precondition("Cannot find MAC for given interface"))
    }
}
