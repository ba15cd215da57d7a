// ── Secret codec ──
//
// Secrets bound for files on the device (private keys) never cross the
// shell in clear text. The device itself encrypts them: the value is set
// as the secret of a throwaway RADIUS server object and read back in its
// encrypted form. An on-box helper decrypts the tokens while writing the
// file.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tracing::debug;
use uuid::Uuid;

use onboard_api::{DeviceGateway, RetryPolicy};

use crate::error::CoreError;

/// Values longer than this are split across several tokens.
pub const CHUNK_SIZE: usize = 500;

const RADIUS_PATH: &str = "/tm/auth/radius-server";

pub const DEFAULT_DECRYPT_HELPER: &str = "/usr/local/bin/onboard-decrypt";

#[async_trait]
pub trait SecretCodec: Send + Sync {
    /// Encrypt `value` on the device, one token per chunk.
    async fn encrypt(
        &self,
        gateway: &dyn DeviceGateway,
        value: &SecretString,
        task_id: Uuid,
    ) -> Result<Vec<SecretString>, CoreError>;

    /// Write `value` to `path` on the device without exposing it to the
    /// shell.
    async fn write_file(
        &self,
        gateway: &dyn DeviceGateway,
        value: &SecretString,
        path: &str,
        task_id: Uuid,
    ) -> Result<(), CoreError>;
}

#[derive(Debug, Clone)]
pub struct DeviceSecretCodec {
    decrypt_helper: String,
}

impl Default for DeviceSecretCodec {
    fn default() -> Self {
        Self::new(DEFAULT_DECRYPT_HELPER)
    }
}

impl DeviceSecretCodec {
    pub fn new(decrypt_helper: impl Into<String>) -> Self {
        Self {
            decrypt_helper: decrypt_helper.into(),
        }
    }
}

#[async_trait]
impl SecretCodec for DeviceSecretCodec {
    async fn encrypt(
        &self,
        gateway: &dyn DeviceGateway,
        value: &SecretString,
        task_id: Uuid,
    ) -> Result<Vec<SecretString>, CoreError> {
        let chunks = chunk(value.expose_secret(), CHUNK_SIZE);
        let mut tokens = Vec::with_capacity(chunks.len());
        for (index, piece) in chunks.iter().enumerate() {
            let name = format!("onboard_{}_{index}", task_id.simple());
            let created = gateway
                .create(
                    RADIUS_PATH,
                    json!({ "name": name, "server": "127.0.0.1", "secret": piece }),
                    RetryPolicy::SHORT,
                )
                .await;
            // Always remove the temporary object, even when reading it failed.
            let secret = created.map(|resp| {
                resp.get("secret")
                    .and_then(Value::as_str)
                    .map(|s| SecretString::from(s.to_owned()))
            });
            gateway
                .delete(&format!("{RADIUS_PATH}/~Common~{name}"), RetryPolicy::SHORT)
                .await?;
            let token = secret?.ok_or(onboard_api::Error::MissingField {
                path: RADIUS_PATH.to_owned(),
                field: "secret",
            })?;
            tokens.push(token);
        }
        debug!(%task_id, chunks = tokens.len(), "encrypted secret");
        Ok(tokens)
    }

    async fn write_file(
        &self,
        gateway: &dyn DeviceGateway,
        value: &SecretString,
        path: &str,
        task_id: Uuid,
    ) -> Result<(), CoreError> {
        let tokens = self.encrypt(gateway, value, task_id).await?;
        let mut script = format!("rm -f {path}.tmp");
        for token in &tokens {
            script.push_str(&format!(
                "; echo '{}' | {} >> {path}.tmp",
                token.expose_secret(),
                self.decrypt_helper
            ));
        }
        script.push_str(&format!("; mv -f {path}.tmp {path}"));
        gateway.run_bash(&script).await?;
        Ok(())
    }
}

/// Split on char boundaries into pieces of at most `size` bytes.
fn chunk(value: &str, size: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut rest = value;
    while rest.len() > size {
        let mut cut = size;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        let (head, tail) = rest.split_at(cut);
        pieces.push(head);
        rest = tail;
    }
    pieces.push(rest);
    pieces
}
