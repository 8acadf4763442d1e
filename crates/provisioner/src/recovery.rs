//! Instance recovery.
//!
//! Recovery is a chain of steps, each completing into the next:
//!
//! ```text
//! provision (prior credentials) ─► update instance handle ─► restore
//!     ─► rebind every binding (barrier) ─► each rebind: update binding handle
//! ```
//!
//! Any failed step fails the recovery. Bindings already rebound when another
//! rebind fails stay rebound; nothing is rolled back.

use crate::barrier::BarrierStart;
use crate::pending::{Completion, UpdatePurpose};
use crate::{Barrier, ProvisionerState};
use fleet_core::{Action, OperationFailure, OperationOutput, OperationResult, RequestId, TimerId};
use fleet_types::{ServiceHandle, ServiceId};
use serde_json::Value;
use tracing::{debug, error, info};

/// Where a recovery currently is.
#[derive(Debug)]
pub enum RecoveryStage {
    Provisioning,
    UpdatingInstance,
    Restoring,
    /// One slot per binding; `true` once rebound and updated.
    Rebinding(Barrier<bool>),
}

impl RecoveryStage {
    pub fn name(&self) -> &'static str {
        match self {
            RecoveryStage::Provisioning => "provisioning",
            RecoveryStage::UpdatingInstance => "updating_instance",
            RecoveryStage::Restoring => "restoring",
            RecoveryStage::Rebinding(_) => "rebinding",
        }
    }
}

/// An in-progress recovery.
#[derive(Debug)]
pub struct RecoveryTask {
    request_id: RequestId,
    instance_id: ServiceId,
    backup_path: String,
    bindings: Vec<ServiceHandle>,
    stage: RecoveryStage,
}

impl RecoveryTask {
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn instance_id(&self) -> &ServiceId {
        &self.instance_id
    }

    pub fn stage(&self) -> &RecoveryStage {
        &self.stage
    }
}

/// Split `handles` into the instance's own handle and its bindings.
pub fn split_handles(
    instance_id: &ServiceId,
    handles: Vec<ServiceHandle>,
) -> (Option<ServiceHandle>, Vec<ServiceHandle>) {
    let mut instance = None;
    let mut bindings = Vec::new();
    for handle in handles {
        if &handle.service_id == instance_id {
            instance = Some(handle);
        } else if handle.is_binding_of(instance_id) {
            bindings.push(handle);
        }
    }
    (instance, bindings)
}

impl ProvisionerState {
    pub(crate) fn recover(
        &mut self,
        request_id: RequestId,
        instance_id: ServiceId,
        backup_path: String,
        handles: Vec<ServiceHandle>,
    ) -> Vec<Action> {
        let (instance, bindings) = split_handles(&instance_id, handles);
        let Some(instance) = instance else {
            error!(instance = %instance_id, "Recover: no provision handle for instance");
            let what = format!("instance_id {}", instance_id);
            return vec![Action::EmitResult {
                request_id,
                result: Err(OperationFailure::not_found(&what)),
            }];
        };
        debug!(
            instance = %instance_id,
            backup_path = %backup_path,
            bindings = bindings.len(),
            "Recover instance"
        );

        let id = self.next_recovery;
        self.next_recovery += 1;
        self.recoveries.insert(
            id,
            RecoveryTask {
                request_id,
                instance_id,
                backup_path,
                bindings,
                stage: RecoveryStage::Provisioning,
            },
        );

        let request = instance.configuration.clone();
        self.provision_service(request, Some(instance), Completion::RecoveryProvision(id))
    }

    pub(crate) fn on_recovery_provisioned(&mut self, id: u64, result: OperationResult) -> Vec<Action> {
        if !self.recoveries.contains_key(&id) {
            return vec![];
        }
        let handle = match result {
            Ok(OperationOutput::Handle(handle)) => handle,
            _ => return self.fail_recovery(id, "re-provision instance"),
        };
        info!(recovery = id, service_id = %handle.service_id, "Recover: re-provisioned instance");
        self.advance(id, RecoveryStage::UpdatingInstance);
        self.update_handle(handle, UpdatePurpose::RecoveryInstance(id))
    }

    pub(crate) fn on_recovery_instance_updated(&mut self, id: u64, success: bool) -> Vec<Action> {
        if !success {
            return self.fail_recovery(id, "update provision handle");
        }
        let Some(task) = self.recoveries.get(&id) else {
            return vec![];
        };
        let instance_id = task.instance_id.clone();
        let backup_path = task.backup_path.clone();
        info!(recovery = id, instance = %instance_id, "Recover: updated provision handle");
        self.advance(id, RecoveryStage::Restoring);
        self.restore_instance(instance_id, backup_path, Completion::RecoveryRestore(id))
    }

    pub(crate) fn on_recovery_restored(&mut self, id: u64, result: OperationResult) -> Vec<Action> {
        if result.is_err() {
            return self.fail_recovery(id, "restore instance");
        }
        let Some(task) = self.recoveries.get_mut(&id) else {
            return vec![];
        };
        info!(recovery = id, instance = %task.instance_id, "Recover: restored instance data");

        let instance_id = task.instance_id.clone();
        let bindings = std::mem::take(&mut task.bindings);
        let mut barrier = Barrier::new(bindings.len(), self.config.node_timeout);
        let start = barrier.open();
        task.stage = RecoveryStage::Rebinding(barrier);

        match start {
            BarrierStart::Completed(slots) => self.finish_rebind(id, slots),
            BarrierStart::Armed(timeout) => {
                debug!(recovery = id, bindings = bindings.len(), "Recover: rebinding bindings");
                let mut actions = vec![Action::SetTimer {
                    id: TimerId::Rebind(id),
                    duration: timeout,
                }];
                for binding in bindings {
                    let options = binding.binding_options().cloned().unwrap_or(Value::Null);
                    actions.extend(self.bind_instance(
                        instance_id.clone(),
                        options,
                        Some(binding),
                        Completion::RecoveryRebind(id),
                    ));
                }
                actions
            }
        }
    }

    pub(crate) fn on_recovery_rebound(&mut self, id: u64, result: OperationResult) -> Vec<Action> {
        match result {
            Ok(OperationOutput::Handle(handle)) if self.recoveries.contains_key(&id) => {
                info!(recovery = id, binding = %handle.service_id, "Recover: re-bound binding");
                self.update_handle(handle, UpdatePurpose::RecoveryBinding(id))
            }
            Ok(_) | Err(_) => {
                debug!(recovery = id, "Recover: binding not rebound");
                self.record_rebind(id, false)
            }
        }
    }

    pub(crate) fn on_recovery_binding_updated(&mut self, id: u64, success: bool) -> Vec<Action> {
        if !success {
            error!(recovery = id, "Recover: failed to update binding handle");
        }
        self.record_rebind(id, success)
    }

    pub(crate) fn on_rebind_timeout(&mut self, id: u64) -> Vec<Action> {
        let Some(RecoveryTask {
            stage: RecoveryStage::Rebinding(barrier),
            ..
        }) = self.recoveries.get_mut(&id)
        else {
            return vec![];
        };
        match barrier.expire() {
            Some(slots) => self.finish_rebind(id, slots),
            None => vec![],
        }
    }

    fn record_rebind(&mut self, id: u64, success: bool) -> Vec<Action> {
        let Some(RecoveryTask {
            stage: RecoveryStage::Rebinding(barrier),
            ..
        }) = self.recoveries.get_mut(&id)
        else {
            return vec![];
        };
        let Some(slots) = barrier.record(success) else {
            return vec![];
        };
        let mut actions = vec![Action::CancelTimer {
            id: TimerId::Rebind(id),
        }];
        actions.extend(self.finish_rebind(id, slots));
        actions
    }

    fn finish_rebind(&mut self, id: u64, slots: Vec<bool>) -> Vec<Action> {
        let Some(task) = self.recoveries.remove(&id) else {
            return vec![];
        };
        let expected = match &task.stage {
            RecoveryStage::Rebinding(barrier) => barrier.expected(),
            _ => slots.len(),
        };
        let succeeded = slots.iter().filter(|ok| **ok).count();
        let result = if succeeded == expected {
            info!(instance = %task.instance_id, "Recover: recovery complete");
            Ok(OperationOutput::Done)
        } else {
            error!(
                instance = %task.instance_id,
                expected,
                succeeded,
                "Recover: re-bind or update handle failed"
            );
            Err(OperationFailure::internal())
        };
        vec![Action::EmitResult {
            request_id: task.request_id,
            result,
        }]
    }

    fn advance(&mut self, id: u64, stage: RecoveryStage) {
        if let Some(task) = self.recoveries.get_mut(&id) {
            task.stage = stage;
        }
    }

    fn fail_recovery(&mut self, id: u64, step: &str) -> Vec<Action> {
        let Some(task) = self.recoveries.remove(&id) else {
            return vec![];
        };
        error!(instance = %task.instance_id, step, "Recover: step failed");
        vec![Action::EmitResult {
            request_id: task.request_id,
            result: Err(OperationFailure::internal()),
        }]
    }
}
