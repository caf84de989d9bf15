// src/engine/handle.rs

use tokio::sync::{mpsc, oneshot};

use crate::errors::{Result, ScriptdError};
use crate::exec::ExecutionRecord;
use crate::registry::{RefreshSummary, Script};
use crate::triggers::{NewTrigger, Trigger, TriggerPatch};

use super::{ControlRequest, DispatchEvent, RunOutcome, Snapshot};

/// Client side of the dispatcher's control surface.
///
/// Every call is one message on the intake channel, answered through a
/// oneshot reply once the dispatcher gets to it. Fails with
/// `DispatcherClosed` once the dispatcher loop is gone.
#[derive(Debug, Clone)]
pub struct DispatcherHandle {
    intake_tx: mpsc::Sender<DispatchEvent>,
}

impl DispatcherHandle {
    pub fn new(intake_tx: mpsc::Sender<DispatchEvent>) -> Self {
        Self { intake_tx }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> ControlRequest,
    ) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.intake_tx
            .send(DispatchEvent::Control(make(reply_tx)))
            .await
            .map_err(|_| ScriptdError::DispatcherClosed)?;
        reply_rx.await.map_err(|_| ScriptdError::DispatcherClosed)
    }

    pub async fn add_trigger(&self, trigger: NewTrigger) -> Result<Trigger> {
        self.request(|reply| ControlRequest::AddTrigger { trigger, reply })
            .await?
    }

    pub async fn remove_trigger(&self, id: &str) -> Result<Trigger> {
        let id = id.to_string();
        self.request(|reply| ControlRequest::RemoveTrigger { id, reply })
            .await?
    }

    pub async fn update_trigger(&self, id: &str, patch: TriggerPatch) -> Result<Trigger> {
        let id = id.to_string();
        self.request(|reply| ControlRequest::UpdateTrigger { id, patch, reply })
            .await?
    }

    pub async fn list_triggers(&self) -> Result<Vec<Trigger>> {
        self.request(|reply| ControlRequest::ListTriggers { reply })
            .await
    }

    pub async fn list_scripts(&self) -> Result<Vec<Script>> {
        self.request(|reply| ControlRequest::ListScripts { reply })
            .await
    }

    pub async fn refresh_scripts(&self) -> Result<RefreshSummary> {
        self.request(|reply| ControlRequest::RefreshScripts { reply })
            .await?
    }

    pub async fn set_script_enabled(&self, script: &str, enabled: bool) -> Result<Script> {
        let script = script.to_string();
        self.request(|reply| ControlRequest::SetScriptEnabled {
            script,
            enabled,
            reply,
        })
        .await?
    }

    /// Start a manual run. `Busy` and `NotFound` come back as outcomes.
    pub async fn run_manual(&self, script: &str) -> Result<RunOutcome> {
        let script = script.to_string();
        self.request(|reply| ControlRequest::RunManual { script, reply })
            .await
    }

    pub async fn last_record(&self, script: &str) -> Result<Option<ExecutionRecord>> {
        let script = script.to_string();
        self.request(|reply| ControlRequest::LastRecord { script, reply })
            .await
    }

    pub async fn snapshot(&self) -> Result<Snapshot> {
        self.request(|reply| ControlRequest::Snapshot { reply })
            .await
    }

    /// Ask the dispatcher to shut down gracefully. Returns once the request
    /// is queued, not when shutdown completes.
    pub async fn shutdown(&self) -> Result<()> {
        self.intake_tx
            .send(DispatchEvent::ShutdownRequested)
            .await
            .map_err(|_| ScriptdError::DispatcherClosed)
    }
}
