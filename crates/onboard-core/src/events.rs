// ── Onboarding events ──
//
// In-process pub/sub between the reconcilers and whatever supervises them.
// The license revoke handshake is a rendezvous: the reconciler subscribes,
// announces the revoke, and blocks until the supervisor answers with
// `ReadyForRevoke` or the deadline passes.

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::CoreError;

const EVENT_CHANNEL_SIZE: usize = 64;

#[derive(Debug, Clone)]
pub enum OnboardEvent {
    /// A license is about to be revoked; the device will briefly lose its
    /// license-derived identity.
    LicenseWillBeRevoked {
        task_id: Uuid,
        bigip_password: Option<SecretString>,
        bigiq_password: Option<SecretString>,
    },
    /// Supervisor is ready for the revoke to proceed.
    ReadyForRevoke,
    /// The device must be rebooted now.
    RebootNow { task_id: Uuid },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Arc<OnboardEvent>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<OnboardEvent>> {
        self.tx.subscribe()
    }

    /// Publish to current subscribers. Having none is not an error.
    pub fn emit(&self, event: OnboardEvent) {
        if self.tx.send(Arc::new(event)).is_err() {
            debug!("event emitted with no subscribers");
        }
    }

    /// Announce an imminent revoke and wait for `ReadyForRevoke`.
    pub async fn await_revoke_ready(
        &self,
        announce: OnboardEvent,
        deadline: Duration,
    ) -> Result<(), CoreError> {
        let mut rx = self.subscribe();
        self.emit(announce);
        let wait = async {
            loop {
                match rx.recv().await {
                    Ok(event) if matches!(*event, OnboardEvent::ReadyForRevoke) => return true,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return false,
                }
            }
        };
        match tokio::time::timeout(deadline, wait).await {
            Ok(true) => Ok(()),
            Ok(false) | Err(_) => Err(CoreError::RevokeTimeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn announce() -> OnboardEvent {
        OnboardEvent::LicenseWillBeRevoked {
            task_id: Uuid::nil(),
            bigip_password: None,
            bigiq_password: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn revoke_ready_times_out() {
        let bus = EventBus::new();
        let result = bus
            .await_revoke_ready(announce(), Duration::from_secs(30))
            .await;
        assert!(matches!(result, Err(CoreError::RevokeTimeout)));
    }

    #[tokio::test(start_paused = true)]
    async fn revoke_ready_resolves_when_answered() {
        let bus = EventBus::new();
        let mut supervisor = bus.subscribe();
        let answering = bus.clone();
        tokio::spawn(async move {
            while let Ok(event) = supervisor.recv().await {
                if matches!(*event, OnboardEvent::LicenseWillBeRevoked { .. }) {
                    answering.emit(OnboardEvent::ReadyForRevoke);
                }
            }
        });
        bus.await_revoke_ready(announce(), Duration::from_secs(30))
            .await
            .expect("supervisor answers");
    }
}
