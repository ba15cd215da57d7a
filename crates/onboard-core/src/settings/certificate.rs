// Web server certificate and key.
//
// The live files are the source of truth and are read fresh every run.

use secrecy::{ExposeSecret, SecretString};
use tracing::info;

use super::SettingsReconciler;
use crate::error::CoreError;
use crate::rollback::{preserve_original, restore_original};
use crate::state::TaskState;
use crate::util::shell_quote;

pub const CERT_PATH: &str = "/config/httpd/conf/ssl.crt/server.crt";
pub const KEY_PATH: &str = "/config/httpd/conf/ssl.key/server.key";

fn same_pem(a: &str, b: &str) -> bool {
    a.trim() == b.trim()
}

impl SettingsReconciler {
    /// Returns whether the web server needs a reboot to pick up changes.
    pub(super) async fn apply_device_certificate(
        &self,
        state: &mut TaskState,
    ) -> Result<bool, CoreError> {
        let gateway = self.gateway.as_ref();
        let Some(declared) = self.declaration.common().device_certificate() else {
            if state.rollback_info.has_pending() {
                state.rollback_info.restore(gateway).await?;
                return Ok(true);
            }
            let cert = restore_original(gateway, CERT_PATH).await?;
            let key = restore_original(gateway, KEY_PATH).await?;
            return Ok(cert || key);
        };

        let mut changed = false;

        let live_cert = gateway.run_bash(&format!("cat {CERT_PATH}")).await?;
        if !same_pem(&live_cert, &declared.certificate) {
            info!(task_id = %state.id, "updating device certificate");
            preserve_original(gateway, CERT_PATH).await?;
            state.rollback_info.backup(gateway, CERT_PATH).await?;
            gateway
                .run_bash(&format!(
                    "printf '%s\\n' {} > {CERT_PATH}",
                    shell_quote(declared.certificate.trim())
                ))
                .await?;
            changed = true;
        }

        if let Some(key) = &declared.private_key {
            let live_key = SecretString::from(gateway.run_bash(&format!("cat {KEY_PATH}")).await?);
            if !same_pem(live_key.expose_secret(), key.expose_secret()) {
                info!(task_id = %state.id, "updating device private key");
                preserve_original(gateway, KEY_PATH).await?;
                state.rollback_info.backup(gateway, KEY_PATH).await?;
                self.codec.write_file(gateway, key, KEY_PATH, state.id).await?;
                changed = true;
            }
        }

        Ok(changed)
    }
}
