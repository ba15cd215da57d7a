// ── Event supervisor ──
//
// Answers the reconcilers' events on behalf of the task owner: confirms
// revokes and reboots the device when asked. Runs until the bus closes or
// the task is cancelled.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use onboard_api::DeviceGateway;
use onboard_core::{EventBus, OnboardEvent};

pub fn spawn(
    events: &EventBus,
    gateway: Arc<dyn DeviceGateway>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let mut rx = events.subscribe();
    let events = events.clone();
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                () = cancel.cancelled() => break,
                event = rx.recv() => event,
            };
            match event {
                Ok(event) => handle(&events, gateway.as_ref(), &event).await,
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "supervisor lagged"),
                Err(RecvError::Closed) => break,
            }
        }
        debug!("supervisor stopped");
    })
}

/// Wait for the supervisor to stop. Returns `false` if it panicked.
pub async fn join(handle: JoinHandle<()>) -> bool {
    match handle.await {
        Ok(()) => true,
        Err(err) => {
            warn!(error = %err, "event supervisor did not exit cleanly");
            false
        }
    }
}

async fn handle(events: &EventBus, gateway: &dyn DeviceGateway, event: &OnboardEvent) {
    match event {
        OnboardEvent::LicenseWillBeRevoked { task_id, .. } => {
            info!(task_id = %task_id, "license revoke announced; confirming");
            events.emit(OnboardEvent::ReadyForRevoke);
        }
        OnboardEvent::RebootNow { task_id } => {
            info!(task_id = %task_id, "rebooting device");
            if let Err(e) = gateway.reboot().await {
                error!(task_id = %task_id, error = %e, "reboot request failed");
            }
        }
        OnboardEvent::ReadyForRevoke => {}
    }
}
