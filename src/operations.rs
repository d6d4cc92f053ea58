//! Operation handlers and worker plumbing.
//!
//! Each started operation runs in its own tokio task so a long-running
//! instrument move never blocks message dispatch. Workers do not touch the
//! registry: every progress or completion report goes through an
//! [`OperationReporter`], which queues an [`OperationReport`] onto a channel
//! drained by the control loop. The control loop applies reports to the
//! registry one at a time, so registry state only ever mutates on the
//! control task.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::DhsResult;
use crate::protocol::OperationHandle;

/// One start request as handed to an operation handler.
#[derive(Debug, Clone)]
pub struct OperationRequest {
    /// Registered operation name.
    pub operation: String,
    /// Sequencer-issued handle for this invocation.
    pub handle: OperationHandle,
    /// Arguments from the start message, verbatim.
    pub arguments: Vec<String>,
}

/// Report from an operation worker back to the control loop.
#[derive(Debug, Clone)]
pub enum OperationReport {
    /// Intermediate progress; does not change the operation's state.
    Update {
        /// Handle of the running operation.
        handle: OperationHandle,
        /// Progress payload tokens.
        arguments: Vec<String>,
    },
    /// The operation finished successfully.
    Completed {
        /// Handle of the finished operation.
        handle: OperationHandle,
        /// Result payload tokens.
        arguments: Vec<String>,
    },
    /// The operation failed.
    Failed {
        /// Handle of the failed operation.
        handle: OperationHandle,
        /// Human-readable failure reason.
        reason: String,
    },
}

/// Sending half of the report channel, owned by one worker.
#[derive(Debug, Clone)]
pub struct OperationReporter {
    handle: OperationHandle,
    reports: mpsc::UnboundedSender<OperationReport>,
}

impl OperationReporter {
    /// Create a reporter bound to one operation instance.
    pub fn new(handle: OperationHandle, reports: mpsc::UnboundedSender<OperationReport>) -> Self {
        Self { handle, reports }
    }

    /// Queue a progress report.
    ///
    /// A send can only fail during shutdown, when the control loop is gone;
    /// the report is dropped silently in that case.
    pub fn update(&self, arguments: Vec<String>) {
        let _ = self.reports.send(OperationReport::Update {
            handle: self.handle.clone(),
            arguments,
        });
    }

    fn complete(self, arguments: Vec<String>) {
        let _ = self.reports.send(OperationReport::Completed {
            handle: self.handle,
            arguments,
        });
    }

    fn fail(self, reason: String) {
        let _ = self.reports.send(OperationReport::Failed {
            handle: self.handle,
            reason,
        });
    }
}

/// A named unit of work this server performs on request from DCSS.
///
/// `execute` returns the completion payload on success; the worker wrapper
/// turns the return value into exactly one terminal report, so a handler
/// cannot double-complete its own instance.
#[async_trait]
pub trait OperationHandler: Send + Sync {
    /// Run the operation to completion.
    async fn execute(
        &self,
        request: OperationRequest,
        progress: &OperationReporter,
    ) -> DhsResult<Vec<String>>;
}

/// Drive one handler invocation and emit its terminal report.
pub async fn run_operation(
    handler: std::sync::Arc<dyn OperationHandler>,
    request: OperationRequest,
    reporter: OperationReporter,
) {
    let operation = request.operation.clone();
    let handle = request.handle.clone();
    match handler.execute(request, &reporter).await {
        Ok(arguments) => {
            debug!(%operation, %handle, "operation completed");
            reporter.complete(arguments);
        }
        Err(err) => {
            debug!(%operation, %handle, error = %err, "operation failed");
            reporter.fail(err.to_string());
        }
    }
}

/// Trivial built-in operation: completes immediately, echoing its arguments.
///
/// Useful for exercising the protocol path against a live DCSS without any
/// instrument attached.
#[derive(Debug, Default)]
pub struct EchoOperation;

#[async_trait]
impl OperationHandler for EchoOperation {
    async fn execute(
        &self,
        request: OperationRequest,
        _progress: &OperationReporter,
    ) -> DhsResult<Vec<String>> {
        Ok(request.arguments)
    }
}
