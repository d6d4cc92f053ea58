//! Operation registry: definitions and in-flight instances.
//!
//! The registry is the protocol's core state. It tracks which operation
//! names this server implements, which of those DCSS has registered on the
//! current connection, and the live state of every in-flight operation
//! instance. All mutation happens on the control task.
//!
//! Instance state machine: `Requested → Running → {Completed, Failed}`.
//! Terminal instances are removed from the active set immediately; nothing
//! is retained for them, so any later report against that handle is a stale
//! report and is rejected. No message referencing a handle is ever sent
//! after that handle's instance reached a terminal state.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::{DhsError, DhsResult};
use crate::link::OutboundSender;
use crate::operations::{OperationHandler, OperationReport};
use crate::protocol::{OperationHandle, OperationStatus, OutboundMessage};

/// Registration status of one operation name on the current connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationStatus {
    /// Locally defined, not yet assigned by DCSS.
    Defined,
    /// Locally defined and assigned by DCSS.
    Registered,
    /// Assigned by DCSS but not implemented here. This server advertises a
    /// partial capability set; an unimplemented assignment is recorded, not
    /// fatal.
    Unimplemented,
}

struct OperationDefinition {
    handler: Option<Arc<dyn OperationHandler>>,
    status: RegistrationStatus,
}

/// State of one in-flight operation instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// Created from a start request; handler not yet handed off.
    Requested,
    /// Handler worker is executing.
    Running,
}

/// One live operation invocation.
#[derive(Debug, Clone)]
pub struct OperationInstance {
    /// Registered operation name.
    pub operation: String,
    /// Sequencer-issued handle.
    pub handle: OperationHandle,
    /// Current lifecycle state.
    pub state: InstanceState,
    /// When the start request was accepted.
    pub started_at: DateTime<Utc>,
}

/// Registry of operation definitions and active instances.
pub struct OperationRegistry {
    definitions: HashMap<String, OperationDefinition>,
    active: HashMap<OperationHandle, OperationInstance>,
    outbound: OutboundSender,
}

impl OperationRegistry {
    /// Create a registry emitting protocol messages on `outbound`.
    pub fn new(outbound: OutboundSender) -> Self {
        Self {
            definitions: HashMap::new(),
            active: HashMap::new(),
            outbound,
        }
    }

    /// Point outbound emission at a new connection.
    pub fn rebind_outbound(&mut self, outbound: OutboundSender) {
        self.outbound = outbound;
    }

    /// Define an operation this server implements.
    ///
    /// Names are unique; a duplicate definition is a startup configuration
    /// error, never a silent override.
    pub fn define(&mut self, name: &str, handler: Arc<dyn OperationHandler>) -> DhsResult<()> {
        if self.definitions.contains_key(name) {
            return Err(DhsError::Configuration(format!(
                "operation '{name}' is already defined"
            )));
        }
        self.definitions.insert(
            name.to_string(),
            OperationDefinition {
                handler: Some(handler),
                status: RegistrationStatus::Defined,
            },
        );
        Ok(())
    }

    /// Record that DCSS assigned `name` to this server.
    ///
    /// A name with no local definition is recorded as unimplemented rather
    /// than raising; DCSS may assign optional capabilities we don't carry.
    pub fn mark_registered(&mut self, name: &str) {
        match self.definitions.get_mut(name) {
            Some(definition) if definition.handler.is_some() => {
                definition.status = RegistrationStatus::Registered;
                info!(operation = %name, "operation registered");
            }
            Some(_) => {
                debug!(operation = %name, "unimplemented operation re-registered");
            }
            None => {
                warn!(operation = %name, "DCSS registered an operation this DHS does not implement");
                self.definitions.insert(
                    name.to_string(),
                    OperationDefinition {
                        handler: None,
                        status: RegistrationStatus::Unimplemented,
                    },
                );
            }
        }
    }

    /// Registration status of one name, if known at all.
    pub fn registration_status(&self, name: &str) -> Option<RegistrationStatus> {
        self.definitions.get(name).map(|d| d.status)
    }

    /// True once every locally defined operation has been registered.
    pub fn all_defined_registered(&self) -> bool {
        self.definitions
            .values()
            .filter(|d| d.handler.is_some())
            .all(|d| d.status == RegistrationStatus::Registered)
    }

    /// Forget per-connection registration state (connection loss).
    pub fn reset_registration(&mut self) {
        self.definitions.retain(|_, d| d.handler.is_some());
        for definition in self.definitions.values_mut() {
            definition.status = RegistrationStatus::Defined;
        }
    }

    /// Accept a start request, creating an instance in state `Requested`.
    ///
    /// Returns the handler for the caller to hand off to a worker. Fails
    /// without creating an instance if the name has no local implementation
    /// or the handle is still active.
    pub fn begin(&mut self, operation: &str, handle: OperationHandle) -> DhsResult<Arc<dyn OperationHandler>> {
        let handler = match self.definitions.get(operation) {
            Some(definition) => match &definition.handler {
                Some(handler) => {
                    if definition.status != RegistrationStatus::Registered {
                        warn!(
                            operation = %operation,
                            "start request for an operation DCSS has not registered yet"
                        );
                    }
                    Arc::clone(handler)
                }
                None => return Err(DhsError::UnknownOperation(operation.to_string())),
            },
            None => return Err(DhsError::UnknownOperation(operation.to_string())),
        };

        if self.active.contains_key(&handle) {
            return Err(DhsError::HandleInUse(handle.as_str().to_string()));
        }

        self.active.insert(
            handle.clone(),
            OperationInstance {
                operation: operation.to_string(),
                handle,
                state: InstanceState::Requested,
                started_at: Utc::now(),
            },
        );
        Ok(handler)
    }

    /// Transition an instance to `Running` after handler hand-off.
    pub fn set_running(&mut self, handle: &OperationHandle) {
        match self.active.get_mut(handle) {
            Some(instance) => instance.state = InstanceState::Running,
            None => error!(%handle, "set_running on unknown handle"),
        }
    }

    /// Apply one worker report: emit the corresponding protocol message and
    /// advance instance state.
    ///
    /// Stale reports (a handle that is unknown or already reached a
    /// terminal state) are a programming defect in the reporting worker.
    /// They are logged at error severity and rejected; no message is sent
    /// and no state changes.
    pub fn apply_report(&mut self, report: OperationReport) -> DhsResult<()> {
        match report {
            OperationReport::Update { handle, arguments } => {
                let instance = self
                    .active
                    .get(&handle)
                    .ok_or_else(|| self.stale(&handle, "update"))?;
                self.send(OutboundMessage::OperationUpdate {
                    operation: instance.operation.clone(),
                    handle,
                    arguments,
                });
                Ok(())
            }
            OperationReport::Completed { handle, arguments } => {
                let instance = self
                    .active
                    .remove(&handle)
                    .ok_or_else(|| self.stale(&handle, "completion"))?;
                info!(operation = %instance.operation, %handle, "operation completed");
                self.send(OutboundMessage::OperationCompleted {
                    operation: instance.operation,
                    handle,
                    status: OperationStatus::Normal,
                    arguments,
                });
                Ok(())
            }
            OperationReport::Failed { handle, reason } => {
                let instance = self
                    .active
                    .remove(&handle)
                    .ok_or_else(|| self.stale(&handle, "failure"))?;
                warn!(operation = %instance.operation, %handle, %reason, "operation failed");
                self.send(OutboundMessage::OperationCompleted {
                    operation: instance.operation,
                    handle,
                    status: OperationStatus::Error(reason),
                    arguments: Vec::new(),
                });
                Ok(())
            }
        }
    }

    /// Force-fail every active instance (shutdown grace expiry, transport
    /// loss). Completion messages are sent best-effort.
    pub fn fail_all(&mut self, reason: &str) {
        for (handle, instance) in std::mem::take(&mut self.active) {
            warn!(operation = %instance.operation, %handle, %reason, "force-failing operation");
            self.send(OutboundMessage::OperationCompleted {
                operation: instance.operation,
                handle,
                status: OperationStatus::Error(reason.to_string()),
                arguments: Vec::new(),
            });
        }
    }

    /// Number of in-flight instances.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Look up a live instance by handle.
    pub fn instance(&self, handle: &OperationHandle) -> Option<&OperationInstance> {
        self.active.get(handle)
    }

    fn stale(&self, handle: &OperationHandle, kind: &str) -> DhsError {
        error!(
            %handle,
            report = %kind,
            "report for unknown or already-terminal handle rejected"
        );
        DhsError::StaleHandle(handle.as_str().to_string())
    }

    fn send(&self, message: OutboundMessage) {
        if self.outbound.send(message).is_err() {
            warn!("DCSS connection writer is gone; dropping outbound message");
        }
    }
}
