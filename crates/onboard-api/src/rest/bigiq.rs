// BIG-IQ license pool client
//
// Assign and revoke go through the pool member-management task endpoint
// on the BIG-IQ, then poll the task until it settles. Unreachable
// assignments return license text that is installed on the device
// directly.

use reqwest::Method;
use secrecy::ExposeSecret;
use serde_json::{Value, json};
use tracing::{debug, info};

use super::{RestGateway, parse_response};
use crate::error::Error;
use crate::gateway::{BigIqLicenseRequest, BigIqRevokeRequest, BigIqTarget, DeviceGateway};
use crate::retry::RetryPolicy;

const MEMBER_MANAGEMENT: &str = "/cm/device/tasks/licensing/pool/member-management";

impl RestGateway {
    async fn bigiq_request(
        &self,
        target: &BigIqTarget,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, Error> {
        let url = format!("https://{}/mgmt{path}", target.host);
        debug!("BIG-IQ {method} {url}");
        let mut builder = self
            .http
            .request(method, &url)
            .basic_auth(&target.username, Some(target.password.expose_secret()));
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let resp = builder.send().await.map_err(Error::Transport)?;
        parse_response(path, resp).await
    }

    /// Submit a member-management task and wait for it to finish.
    async fn run_pool_task(&self, target: &BigIqTarget, body: Value) -> Result<Value, Error> {
        let task = RetryPolicy::SHORT
            .run("submit license task", || {
                self.bigiq_request(target, Method::POST, MEMBER_MANAGEMENT, Some(&body))
            })
            .await?;
        let id = task
            .get("id")
            .and_then(Value::as_str)
            .ok_or(Error::MissingField {
                path: MEMBER_MANAGEMENT.to_owned(),
                field: "id",
            })?
            .to_owned();

        let task_path = format!("{MEMBER_MANAGEMENT}/{id}");
        let mut attempts = 0;
        loop {
            attempts += 1;
            let status = self
                .bigiq_request(target, Method::GET, &task_path, None)
                .await?;
            match status.get("status").and_then(Value::as_str) {
                Some("FINISHED") => return Ok(status),
                Some("FAILED") => {
                    return Err(Error::LicenseTask {
                        message: status
                            .get("errorMessage")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown error")
                            .to_owned(),
                    });
                }
                other => debug!(task = %id, status = ?other, "license task pending"),
            }
            if attempts >= RetryPolicy::LONG.attempts() {
                return Err(Error::Timeout {
                    operation: format!("license task {id}"),
                    attempts,
                });
            }
            tokio::time::sleep(RetryPolicy::LONG.interval).await;
        }
    }

    pub(crate) async fn license_via_bigiq(&self, request: &BigIqLicenseRequest) -> Result<(), Error> {
        let mut body = json!({
            "command": "assign",
            "licensePoolName": request.target.license_pool,
            "address": request.management_address,
            "port": request.management_port,
        });
        if request.reachable {
            body["user"] = json!(request.bigip_username);
            body["password"] = json!(request.bigip_password.as_ref().map(|p| p.expose_secret()));
        } else {
            body["assignmentType"] = json!("UNREACHABLE");
        }
        for (key, value) in [
            ("skuKeyword1", &request.sku_keyword1),
            ("skuKeyword2", &request.sku_keyword2),
            ("unitOfMeasure", &request.unit_of_measure),
            ("hypervisor", &request.hypervisor),
            ("tenant", &request.tenant),
        ] {
            if let Some(value) = value {
                body[key] = json!(value);
            }
        }
        if request.overwrite {
            body["overwrite"] = json!(true);
        }

        info!(
            pool = %request.target.license_pool,
            bigiq = %request.target.host,
            reachable = request.reachable,
            "requesting license from pool"
        );
        let task = self.run_pool_task(&request.target, body).await?;

        if !request.reachable {
            let license_text = task
                .get("licenseText")
                .and_then(Value::as_str)
                .ok_or(Error::MissingField {
                    path: MEMBER_MANAGEMENT.to_owned(),
                    field: "licenseText",
                })?;
            self.replace(
                "/tm/shared/licensing/registration",
                json!({ "licenseText": license_text }),
                RetryPolicy::MEDIUM,
            )
            .await?;
        }
        Ok(())
    }

    pub(crate) async fn revoke_via_bigiq(&self, request: &BigIqRevokeRequest) -> Result<(), Error> {
        let mut body = json!({
            "command": "revoke",
            "licensePoolName": request.target.license_pool,
            "address": request.management_address,
        });
        if request.reachable {
            body["user"] = json!(request.bigip_username);
            body["password"] = json!(request.bigip_password.as_ref().map(|p| p.expose_secret()));
        } else {
            body["assignmentType"] = json!("UNREACHABLE");
        }

        info!(
            pool = %request.target.license_pool,
            bigiq = %request.target.host,
            "revoking license"
        );
        self.run_pool_task(&request.target, body).await?;
        Ok(())
    }
}
