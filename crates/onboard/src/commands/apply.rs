//! `onboard apply`: run the reconcilers against one device.

use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use onboard_api::{DeviceGateway, RestGateway};
use onboard_core::{
    ClusterReconciler, Declaration, DeviceSecretCodec, EventBus, ReconcilerOptions, RollbackInfo,
    SettingsReconciler, SystemStatus, TaskState,
};

use crate::cli::{ApplyArgs, GlobalOpts};
use crate::error::CliError;
use crate::supervisor;

use super::{load_target, read_file};

pub async fn handle(args: &ApplyArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let declaration = Arc::new(read_declaration(&args.declaration)?);
    let current = match &args.current {
        Some(path) => read_declaration(path)?,
        None => Declaration::default(),
    };
    let rollback = match &args.rollback {
        Some(path) if path.exists() => read_json::<RollbackInfo>(path)?,
        _ => RollbackInfo::default(),
    };
    let mut state = TaskState::new(current).with_rollback(rollback);

    let target = load_target(global)?;
    let gateway: Arc<dyn DeviceGateway> =
        Arc::new(RestGateway::new(target.gateway).map_err(CliError::Connection)?);

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted; shutting down");
                shutdown.cancel();
            }
        }
    });

    let events = EventBus::new();
    let supervisor = supervisor::spawn(&events, Arc::clone(&gateway), shutdown.child_token());

    let options = ReconcilerOptions {
        platform: target.platform,
        shutdown: shutdown.clone(),
        ..ReconcilerOptions::default()
    };
    let run = Run {
        declaration,
        gateway,
        events,
        codec: Arc::new(DeviceSecretCodec::new(target.decrypt_helper)),
        options,
    };

    info!(task_id = %state.id, host = %run.gateway.host(), "starting onboarding");
    let result = run.reconcile(args, &mut state).await;

    // Persist the ledger even on failure: backups taken before the error
    // still need restoring on the next run.
    if let Some(path) = &args.rollback {
        write_json(path, &state.rollback_info)?;
    }
    shutdown.cancel();
    supervisor::join(supervisor).await;

    let status = result?;
    let rendered = serde_json::to_string_pretty(&status).map_err(|source| CliError::Json {
        path: "<status>".into(),
        source,
    })?;
    println!("{rendered}");
    Ok(())
}

struct Run {
    declaration: Arc<Declaration>,
    gateway: Arc<dyn DeviceGateway>,
    events: EventBus,
    codec: Arc<DeviceSecretCodec>,
    options: ReconcilerOptions,
}

impl Run {
    async fn reconcile(self, args: &ApplyArgs, state: &mut TaskState) -> Result<SystemStatus, CliError> {
        let mut status = SystemStatus::default();

        if !args.cluster_only {
            status = SettingsReconciler::new(
                Arc::clone(&self.declaration),
                Arc::clone(&self.gateway),
                self.events,
            )
            .with_codec(self.codec)
            .with_options(self.options)
            .process(state)
            .await?;
        }

        if !args.settings_only {
            ClusterReconciler::new(self.declaration, self.gateway)
                .process()
                .await?;
        }

        status.rollback_info = state.rollback_info.clone();
        Ok(status)
    }
}

fn read_declaration(path: &Path) -> Result<Declaration, CliError> {
    let raw: Value = read_json(path)?;
    Ok(Declaration::from_value(raw)?)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, CliError> {
    let text = read_file(path)?;
    serde_json::from_str(&text).map_err(|source| CliError::Json {
        path: path.display().to_string(),
        source,
    })
}

fn write_json(path: &Path, value: &impl serde::Serialize) -> Result<(), CliError> {
    let text = serde_json::to_string_pretty(value).map_err(|source| CliError::Json {
        path: path.display().to_string(),
        source,
    })?;
    std::fs::write(path, text).map_err(|source| CliError::Write {
        path: path.display().to_string(),
        source,
    })
}
