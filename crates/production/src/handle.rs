//! Async client handle for a running provisioner.

use crate::runner::Input;
use fleet_core::{Operation, OperationFailure, OperationOutput, OperationResult};
use fleet_provisioner::{OrphanBindings, OrphanInstances, ProvisionerStatus};
use fleet_types::{Configuration, NodeId, ServiceHandle, ServiceId};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Errors returned to callers of [`ProvisionerHandle`].
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Operation(#[from] OperationFailure),

    #[error("Provisioner runner stopped")]
    Stopped,
}

/// Outcome of a purge: one entry per node as it completed, then the totals.
#[derive(Debug, Clone, PartialEq)]
pub struct PurgeOutcome {
    pub per_node: Vec<(NodeId, OperationResult)>,
    pub succeeded: Vec<NodeId>,
    pub failed: Vec<NodeId>,
}

/// Cloneable handle submitting operations to a [`ProductionRunner`].
///
/// [`ProductionRunner`]: crate::ProductionRunner
#[derive(Clone)]
pub struct ProvisionerHandle {
    tx: mpsc::UnboundedSender<Input>,
}

impl ProvisionerHandle {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Input>) -> Self {
        Self { tx }
    }

    pub async fn provision(
        &self,
        request: Configuration,
        prior: Option<ServiceHandle>,
    ) -> Result<ServiceHandle, ClientError> {
        let output = self.submit(Operation::Provision { request, prior }).await?;
        into_handle(output)
    }

    pub async fn unprovision(&self, instance_id: ServiceId) -> Result<(), ClientError> {
        self.submit(Operation::Unprovision { instance_id }).await?;
        Ok(())
    }

    pub async fn bind(
        &self,
        instance_id: ServiceId,
        binding_options: Value,
        prior: Option<ServiceHandle>,
    ) -> Result<ServiceHandle, ClientError> {
        let output = self
            .submit(Operation::Bind {
                instance_id,
                binding_options,
                prior,
            })
            .await?;
        into_handle(output)
    }

    pub async fn unbind(
        &self,
        instance_id: ServiceId,
        handle_id: ServiceId,
        binding_options: Value,
    ) -> Result<(), ClientError> {
        self.submit(Operation::Unbind {
            instance_id,
            handle_id,
            binding_options,
        })
        .await?;
        Ok(())
    }

    pub async fn restore(
        &self,
        instance_id: ServiceId,
        backup_path: impl Into<String>,
    ) -> Result<(), ClientError> {
        self.submit(Operation::Restore {
            instance_id,
            backup_path: backup_path.into(),
        })
        .await?;
        Ok(())
    }

    pub async fn recover(
        &self,
        instance_id: ServiceId,
        backup_path: impl Into<String>,
        handles: Vec<ServiceHandle>,
    ) -> Result<(), ClientError> {
        self.submit(Operation::Recover {
            instance_id,
            backup_path: backup_path.into(),
            handles,
        })
        .await?;
        Ok(())
    }

    /// Start an orphan-detection cycle; results accumulate asynchronously.
    pub async fn check_orphan(&self, handles: Vec<ServiceHandle>) -> Result<(), ClientError> {
        self.submit(Operation::CheckOrphan { handles }).await?;
        Ok(())
    }

    pub async fn purge_orphan(
        &self,
        orphan_instances: OrphanInstances,
        orphan_bindings: OrphanBindings,
    ) -> Result<PurgeOutcome, ClientError> {
        let (purge_tx, mut purge_rx) = mpsc::unbounded_channel();
        let (reply, result) = oneshot::channel();
        self.send(Input::Submit {
            op: Operation::PurgeOrphan {
                orphan_instances,
                orphan_bindings,
            },
            reply,
            purge: Some(purge_tx),
        })?;
        let output = result.await.map_err(|_| ClientError::Stopped)??;

        // Per-node results are queued before the terminal result is sent.
        let mut per_node = Vec::new();
        while let Ok(entry) = purge_rx.try_recv() {
            per_node.push(entry);
        }

        match output {
            OperationOutput::PurgeSummary { succeeded, failed } => Ok(PurgeOutcome {
                per_node,
                succeeded,
                failed,
            }),
            _ => Err(OperationFailure::internal().into()),
        }
    }

    pub async fn update_handles(&self, handles: Vec<ServiceHandle>) -> Result<(), ClientError> {
        self.submit(Operation::UpdateHandles { handles }).await?;
        Ok(())
    }

    pub async fn status(&self) -> Result<ProvisionerStatus, ClientError> {
        let (reply, status) = oneshot::channel();
        self.send(Input::Status(reply))?;
        status.await.map_err(|_| ClientError::Stopped)
    }

    /// Orphans gathered by the most recent check cycle.
    pub async fn orphan_snapshot(
        &self,
    ) -> Result<(OrphanInstances, OrphanBindings), ClientError> {
        let (reply, snapshot) = oneshot::channel();
        self.send(Input::OrphanSnapshot(reply))?;
        snapshot.await.map_err(|_| ClientError::Stopped)
    }

    /// Stop the runner loop. Operations still in flight resolve as
    /// [`ClientError::Stopped`].
    pub fn shutdown(&self) {
        let _ = self.tx.send(Input::Shutdown);
    }

    async fn submit(&self, op: Operation) -> Result<OperationOutput, ClientError> {
        let (reply, result) = oneshot::channel();
        self.send(Input::Submit {
            op,
            reply,
            purge: None,
        })?;
        Ok(result.await.map_err(|_| ClientError::Stopped)??)
    }

    fn send(&self, input: Input) -> Result<(), ClientError> {
        self.tx.send(input).map_err(|_| ClientError::Stopped)
    }
}

fn into_handle(output: OperationOutput) -> Result<ServiceHandle, ClientError> {
    match output {
        OperationOutput::Handle(handle) => Ok(handle),
        _ => Err(OperationFailure::internal().into()),
    }
}
