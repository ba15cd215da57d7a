// Users: root password and keys, regular accounts.

use secrecy::ExposeSecret;
use serde_json::json;
use tracing::{info, warn};

use onboard_api::RetryPolicy;

use super::SettingsReconciler;
use crate::error::CoreError;
use crate::model::{User, UserType};
use crate::util::shell_quote;

/// Line suffix of the device's own superuser key; it must survive any
/// rewrite of root's `authorized_keys`.
pub const SUPERUSER_KEY_MARKER: &str = " Host Processor Superuser";

const ROOT_KEYS_PATH: &str = "/root/.ssh/authorized_keys";

impl SettingsReconciler {
    pub(super) async fn apply_users(&self) -> Result<(), CoreError> {
        let Some(users) = &self.declaration.common().user else {
            return Ok(());
        };
        for (name, user) in users {
            match &user.user_type {
                UserType::Root => self.apply_root(user).await?,
                UserType::Regular => self.apply_regular(name, user).await?,
                UserType::Unsupported(kind) => {
                    warn!(user = %name, user_type = %kind, "skipping user with unsupported userType");
                }
            }
        }
        Ok(())
    }

    async fn apply_root(&self, user: &User) -> Result<(), CoreError> {
        if let Some(new_password) = &user.new_password {
            info!("setting root password");
            self.gateway
                .onboard_password("root", new_password, user.old_password.as_ref())
                .await?;
        }
        if user.keys.is_empty() {
            return Ok(());
        }

        let existing = self
            .gateway
            .run_bash(&format!("cat {ROOT_KEYS_PATH}"))
            .await?;
        let mut lines = user.keys.clone();
        lines.extend(
            existing
                .lines()
                .filter(|line| line.ends_with(SUPERUSER_KEY_MARKER))
                .map(str::to_owned),
        );
        self.gateway
            .run_bash(&format!(
                "printf '%s\\n' {} > {ROOT_KEYS_PATH}",
                shell_quote(&lines.join("\n"))
            ))
            .await?;
        Ok(())
    }

    async fn apply_regular(&self, name: &str, user: &User) -> Result<(), CoreError> {
        info!(user = %name, "setting user");
        let mut body = json!({ "name": name });
        if let Some(shell) = &user.shell {
            body["shell"] = json!(shell);
        }
        if let Some(password) = &user.password {
            body["password"] = json!(password.expose_secret());
        }
        if !user.partition_access.is_empty() {
            body["partitionAccess"] = user
                .partition_access
                .iter()
                .map(|(partition, access)| json!({ "name": partition, "role": access.role }))
                .collect();
        }
        self.gateway
            .create_or_modify("/tm/auth/user", body, RetryPolicy::SHORT)
            .await?;

        if !user.keys.is_empty() {
            let ssh_dir = format!("/home/{name}/.ssh");
            let keys_path = format!("{ssh_dir}/authorized_keys");
            self.gateway
                .run_bash(&format!(
                    "mkdir -p {ssh_dir}; printf '%s\\n' {keys} > {keys_path}; \
                     chown -R {name}:webusers {ssh_dir}; chmod 700 {ssh_dir}; chmod 600 {keys_path}",
                    keys = shell_quote(&user.keys.join("\n"))
                ))
                .await?;
        }
        Ok(())
    }
}
