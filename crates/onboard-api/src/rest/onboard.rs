// Onboarding endpoints
//
// DB variables, hostname, passwords, and registration-key licensing.

use std::collections::BTreeMap;

use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tracing::{debug, info};

use super::RestGateway;
use crate::error::Error;
use crate::gateway::{DeviceGateway, RegKeyLicenseRequest};
use crate::retry::RetryPolicy;

impl RestGateway {
    /// `PATCH /tm/sys/db/{name}` for each variable.
    pub(crate) async fn set_db_vars(&self, vars: &BTreeMap<String, String>) -> Result<(), Error> {
        for (name, value) in vars {
            debug!(name, value, "setting db variable");
            self.modify(
                &format!("/tm/sys/db/{name}"),
                json!({ "value": value }),
                RetryPolicy::SHORT,
            )
            .await?;
        }
        Ok(())
    }

    /// Rename the local device object, then set the global hostname.
    pub(crate) async fn set_hostname(&self, hostname: &str) -> Result<(), Error> {
        let info = self.device_info().await?;
        if info.hostname != hostname {
            info!(from = %info.hostname, to = hostname, "renaming device");
            self.create(
                "/tm/cm/device",
                json!({ "command": "mv", "name": info.hostname, "target": hostname }),
                RetryPolicy::MEDIUM,
            )
            .await?;
        }
        self.modify(
            "/tm/sys/global-settings",
            json!({ "hostname": hostname }),
            RetryPolicy::MEDIUM,
        )
        .await?;
        Ok(())
    }

    /// Root goes through `/shared/authn/root`, which requires the old
    /// password; everyone else is a plain `auth user` modify.
    pub(crate) async fn set_password(
        &self,
        user: &str,
        new_password: &SecretString,
        old_password: Option<&SecretString>,
    ) -> Result<(), Error> {
        if user == "root" {
            let old = old_password
                .ok_or(Error::UnsupportedOperation("root password change without oldPassword"))?;
            debug!("changing root password");
            self.create(
                "/shared/authn/root",
                json!({
                    "oldPassword": old.expose_secret(),
                    "newPassword": new_password.expose_secret(),
                }),
                RetryPolicy::SHORT,
            )
            .await?;
            return Ok(());
        }

        debug!(user, "changing password");
        self.modify(
            &format!("/tm/auth/user/{user}"),
            json!({ "password": new_password.expose_secret() }),
            RetryPolicy::SHORT,
        )
        .await?;
        Ok(())
    }

    /// Install a registration key unless it is already the active one.
    pub(crate) async fn license_reg_key(&self, request: &RegKeyLicenseRequest) -> Result<(), Error> {
        if !request.overwrite {
            let current = self.list("/tm/sys/license", RetryPolicy::SHORT).await?;
            let installed = current
                .get("registrationKey")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if installed == request.reg_key {
                debug!("registration key already installed");
                return Ok(());
            }
        }

        info!(add_ons = request.add_on_keys.len(), "installing registration key");
        self.create(
            "/tm/sys/license",
            json!({
                "command": "install",
                "registrationKey": request.reg_key,
                "addOnKeys": request.add_on_keys,
            }),
            RetryPolicy::MEDIUM,
        )
        .await?;
        self.ready().await
    }
}
