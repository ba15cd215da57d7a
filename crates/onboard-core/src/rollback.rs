// ── Rollback ledger ──
//
// Certificate writes overwrite files on the device. Before each overwrite
// the current file is copied to `<file>.DO.bak` and the pair is recorded
// here; a later task that finds pending pairs copies them back. The very
// first content of each tracked file is also kept, once, at
// `<file>.DO.orig` for restoring factory state.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use onboard_api::DeviceGateway;

use crate::error::CoreError;

pub const BACKUP_SUFFIX: &str = ".DO.bak";
pub const ORIGINAL_SUFFIX: &str = ".DO.orig";

const OK_MARKER: &str = "ONBOARD_OK";
const RESTORED_MARKER: &str = "ONBOARD_RESTORED";

/// One backup copy: `from` is the backup, `to` the file it protects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCopy {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRollback {
    #[serde(default)]
    pub files: Vec<FileCopy>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemRollback {
    #[serde(default)]
    pub device_certificate: CertificateRollback,
}

/// Rollback bookkeeping carried in task state and returned to the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackInfo {
    #[serde(default)]
    pub system_handler: SystemRollback,
}

impl RollbackInfo {
    pub fn certificate_files(&self) -> &[FileCopy] {
        &self.system_handler.device_certificate.files
    }

    pub fn has_pending(&self) -> bool {
        !self.certificate_files().is_empty()
    }

    /// Copy `path` to its `.DO.bak` sibling and record the pair. A failed
    /// copy aborts, leaving the ledger unchanged.
    pub async fn backup(&mut self, gateway: &dyn DeviceGateway, path: &str) -> Result<(), CoreError> {
        let backup = format!("{path}{BACKUP_SUFFIX}");
        copy_file(gateway, path, &backup).await?;
        let files = &mut self.system_handler.device_certificate.files;
        if !files.iter().any(|f| f.to == path) {
            files.push(FileCopy {
                from: backup,
                to: path.to_owned(),
            });
        }
        debug!(path, "backed up file");
        Ok(())
    }

    /// Copy every pending backup over its original, then clear the ledger.
    pub async fn restore(&mut self, gateway: &dyn DeviceGateway) -> Result<(), CoreError> {
        let files = &self.system_handler.device_certificate.files;
        info!(count = files.len(), "restoring files from rollback ledger");
        for copy in files {
            copy_file(gateway, &copy.from, &copy.to).await?;
        }
        self.system_handler.device_certificate.files.clear();
        Ok(())
    }
}

/// Keep the first-ever content of `path` at `<path>.DO.orig`.
pub async fn preserve_original(gateway: &dyn DeviceGateway, path: &str) -> Result<(), CoreError> {
    let original = format!("{path}{ORIGINAL_SUFFIX}");
    gateway
        .run_bash(&format!(
            "if [ ! -f {original} ] && [ -f {path} ]; then cp -f {path} {original}; fi"
        ))
        .await?;
    Ok(())
}

/// Put `<path>.DO.orig` back in place when it exists and differs from the
/// live file. Returns whether a restore happened.
pub async fn restore_original(gateway: &dyn DeviceGateway, path: &str) -> Result<bool, CoreError> {
    let original = format!("{path}{ORIGINAL_SUFFIX}");
    let out = gateway
        .run_bash(&format!(
            "if [ -f {original} ] && ! cmp -s {original} {path}; then cp -f {original} {path} && echo {RESTORED_MARKER}; fi"
        ))
        .await?;
    Ok(out.contains(RESTORED_MARKER))
}

async fn copy_file(gateway: &dyn DeviceGateway, from: &str, to: &str) -> Result<(), CoreError> {
    let out = gateway
        .run_bash(&format!("cp -f {from} {to} && echo {OK_MARKER}"))
        .await?;
    if out.contains(OK_MARKER) {
        Ok(())
    } else {
        Err(CoreError::Internal(format!(
            "Failed to copy {from} to {to}: {}",
            out.trim()
        )))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::testing::MockGateway;

    #[test]
    fn serializes_in_nested_camel_case() {
        let mut info = RollbackInfo::default();
        info.system_handler.device_certificate.files.push(FileCopy {
            from: "/a.DO.bak".into(),
            to: "/a".into(),
        });
        assert_eq!(
            serde_json::to_value(&info).unwrap(),
            json!({
                "systemHandler": {
                    "deviceCertificate": { "files": [{ "from": "/a.DO.bak", "to": "/a" }] }
                }
            })
        );
    }

    #[tokio::test]
    async fn backup_records_pair_once() {
        let gateway = MockGateway::new();
        let mut info = RollbackInfo::default();
        info.backup(&gateway, "/config/server.crt").await.unwrap();
        info.backup(&gateway, "/config/server.crt").await.unwrap();
        assert_eq!(
            info.certificate_files(),
            &[FileCopy {
                from: "/config/server.crt.DO.bak".into(),
                to: "/config/server.crt".into(),
            }]
        );
    }

    #[tokio::test]
    async fn failed_backup_aborts_without_recording() {
        let gateway = MockGateway::new();
        gateway.on_bash("cp -f /config/server.crt ", "cp: cannot stat '/config/server.crt'");
        let mut info = RollbackInfo::default();
        let result = info.backup(&gateway, "/config/server.crt").await;
        assert!(matches!(result, Err(CoreError::Internal(_))));
        assert!(!info.has_pending());
    }

    #[tokio::test]
    async fn original_restored_only_when_it_differs() {
        let gateway = MockGateway::new();
        assert!(!restore_original(&gateway, "/k").await.unwrap());
        gateway.on_bash("cmp -s /k.DO.orig /k", "ONBOARD_RESTORED\n");
        assert!(restore_original(&gateway, "/k").await.unwrap());
    }

    #[tokio::test]
    async fn restore_copies_back_and_clears() {
        let gateway = MockGateway::new();
        let mut info = RollbackInfo::default();
        info.system_handler.device_certificate.files.push(FileCopy {
            from: "/k.DO.bak".into(),
            to: "/k".into(),
        });
        info.restore(&gateway).await.unwrap();
        assert!(!info.has_pending());
        assert!(
            gateway
                .bash_commands()
                .iter()
                .any(|c| c.starts_with("cp -f /k.DO.bak /k"))
        );
    }
}
