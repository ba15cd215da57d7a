// Hostname, timeouts, audit logging, banners, software update checks.

use serde_json::{Map, Value, json};
use tracing::info;

use onboard_api::{DeviceInfo, RetryPolicy, enabled};

use super::SettingsReconciler;
use crate::error::CoreError;
use crate::model::SystemSettings;
use crate::state::TaskState;
use crate::util::version_at_least;

/// Collects only the fields whose declared value differs from the
/// recorded one.
struct Patch<'a> {
    declared: &'a SystemSettings,
    current: &'a SystemSettings,
    body: Map<String, Value>,
}

impl<'a> Patch<'a> {
    fn new(declared: &'a SystemSettings, current: &'a SystemSettings) -> Self {
        Self {
            declared,
            current,
            body: Map::new(),
        }
    }

    fn field<T: PartialEq>(
        &mut self,
        key: &str,
        pick: impl Fn(&SystemSettings) -> &Option<T>,
        render: impl Fn(&T) -> Value,
    ) {
        if let Some(value) = pick(self.declared) {
            if pick(self.current).as_ref() != Some(value) {
                self.body.insert(key.to_owned(), render(value));
            }
        }
    }

    fn take(&mut self) -> Option<Value> {
        if self.body.is_empty() {
            None
        } else {
            Some(Value::Object(std::mem::take(&mut self.body)))
        }
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn on_off(value: &bool) -> Value {
    json!(enabled(*value))
}

impl SettingsReconciler {
    pub(super) async fn apply_system(
        &self,
        state: &TaskState,
        device: &DeviceInfo,
    ) -> Result<(), CoreError> {
        let Some(declared) = &self.declaration.common().system else {
            return Ok(());
        };
        let empty = SystemSettings::default();
        let current = state.current_config.common().system.as_ref().unwrap_or(&empty);

        if let Some(hostname) = &declared.hostname {
            if *hostname != device.hostname {
                info!(%hostname, "setting hostname");
                self.gateway.onboard_hostname(hostname).await?;
            }
        }

        let mut patch = Patch::new(declared, current);

        patch.field(
            "consoleInactivityTimeout",
            |s| &s.console_inactivity_timeout,
            |v| json!(v),
        );
        if version_at_least(&device.version, "14.0") {
            patch.field("guiAudit", |s| &s.gui_audit_log, on_off);
        }
        patch.field("guiSecurityBanner", |s| &s.gui_security_banner, on_off);
        patch.field(
            "guiSecurityBannerText",
            |s| &s.gui_security_banner_text,
            |v| json!(v),
        );
        if let Some(body) = patch.take() {
            self.modify("/tm/sys/global-settings", body).await?;
        }

        // Seconds in the declaration; the CLI setting is whole minutes.
        patch.field(
            "idleTimeout",
            |s| &s.cli_inactivity_timeout,
            |v| match v / 60 {
                0 => json!("disabled"),
                minutes => json!(minutes),
            },
        );
        patch.field("audit", |s| &s.tmsh_audit_log, on_off);
        if let Some(body) = patch.take() {
            self.modify("/tm/cli/global-settings", body).await?;
        }

        patch.field("autoCheck", |s| &s.auto_check, on_off);
        patch.field("autoPhonehome", |s| &s.auto_phonehome, on_off);
        if let Some(body) = patch.take() {
            self.modify("/tm/sys/software/update", body).await?;
        }

        patch.field("value", |s| &s.mcp_audit_log, |v| json!(v));
        if let Some(body) = patch.take() {
            self.modify("/tm/sys/db/config.auditing", body).await?;
        }
        Ok(())
    }

    async fn modify(&self, path: &str, body: Value) -> Result<(), CoreError> {
        self.gateway.modify(path, body, RetryPolicy::SHORT).await?;
        Ok(())
    }
}
