//! DCSS handshake sequencing.
//!
//! After the transport connects, DCSS leads a fixed exchange: it asks the
//! new connection to identify (`stoc_send_client_type`), the DHS answers
//! with `htos_client_is_hardware <name>`, then DCSS registers the
//! operations it has assigned to this server. Once every locally defined
//! operation has been registered the server is ready for start requests.
//!
//! The sequencer is the protocol's authority: messages arriving in an
//! unexpected phase are logged and handled best-effort, never fatally. A
//! remote peer's misbehavior must not take this process down.

use tracing::{debug, info, warn};

use crate::dispatch::MessageHandler;
use crate::error::DhsResult;
use crate::operations::{OperationReporter, OperationRequest};
use crate::protocol::{InboundMessage, OutboundMessage};
use crate::server::DhsContext;

/// Progress of one connection through the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HandshakePhase {
    /// No transport connection.
    Disconnected,
    /// Transport connected; DCSS has not asked for identity yet.
    Connected,
    /// Identity message sent.
    IdentitySent,
    /// At least one operation registration processed.
    OperationsRegistered,
    /// All locally defined operations registered; accepting start requests.
    Ready,
}

/// Tracks the handshake phase for the single DCSS connection.
///
/// Lifecycle is tied 1:1 to the connection: reset to `Disconnected` whenever
/// the transport drops.
#[derive(Debug)]
pub struct HandshakeSequencer {
    phase: HandshakePhase,
}

impl HandshakeSequencer {
    /// Start out disconnected.
    pub fn new() -> Self {
        Self {
            phase: HandshakePhase::Disconnected,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> HandshakePhase {
        self.phase
    }

    /// Transport connection established. The sequencer leads; nothing is
    /// sent until it asks for identity.
    pub fn on_connected(&mut self) {
        self.phase = HandshakePhase::Connected;
    }

    /// Transport connection lost.
    pub fn on_disconnected(&mut self) {
        self.phase = HandshakePhase::Disconnected;
    }

    fn advance(&mut self, phase: HandshakePhase) {
        if self.phase != phase {
            debug!(from = ?self.phase, to = ?phase, "handshake phase change");
            self.phase = phase;
        }
    }
}

impl Default for HandshakeSequencer {
    fn default() -> Self {
        Self::new()
    }
}

/// Handles `stoc_send_client_type`: declare this server as hardware.
pub struct ClientTypeHandler;

impl MessageHandler for ClientTypeHandler {
    fn handle(&self, _message: &InboundMessage, ctx: &mut DhsContext) -> DhsResult<()> {
        match ctx.handshake.phase() {
            HandshakePhase::Disconnected => {
                // Cannot happen without a connection; log and ignore.
                warn!("identity request while disconnected; ignoring");
                Ok(())
            }
            HandshakePhase::Connected | HandshakePhase::IdentitySent => {
                let dhs_name = ctx.settings.dhs_name().to_string();
                info!(%dhs_name, "declaring hardware client type to DCSS");
                ctx.send(OutboundMessage::ClientIsHardware { dhs_name });
                ctx.handshake.advance(HandshakePhase::IdentitySent);
                Ok(())
            }
            phase => {
                warn!(?phase, "unexpected identity request after handshake; ignoring");
                Ok(())
            }
        }
    }
}

/// Handles `stoh_register_operation`: record one assigned operation.
pub struct RegisterOperationHandler;

impl MessageHandler for RegisterOperationHandler {
    fn handle(&self, message: &InboundMessage, ctx: &mut DhsContext) -> DhsResult<()> {
        let InboundMessage::RegisterOperation { operation } = message else {
            return Ok(());
        };
        if ctx.handshake.phase() < HandshakePhase::IdentitySent {
            warn!(
                phase = ?ctx.handshake.phase(),
                operation = %operation,
                "operation registration before identity exchange; recording anyway"
            );
        }
        ctx.registry.mark_registered(operation);
        ctx.handshake.advance(HandshakePhase::OperationsRegistered);
        if ctx.registry.all_defined_registered() {
            info!("all defined operations registered; DHS ready");
            ctx.handshake.advance(HandshakePhase::Ready);
        }
        Ok(())
    }
}

/// Handles `stoh_start_operation`: create an instance and hand off to the
/// operation's worker.
pub struct StartOperationHandler;

impl MessageHandler for StartOperationHandler {
    fn handle(&self, message: &InboundMessage, ctx: &mut DhsContext) -> DhsResult<()> {
        let InboundMessage::StartOperation {
            operation,
            handle,
            arguments,
        } = message
        else {
            return Ok(());
        };

        if !ctx.accepting {
            warn!(operation = %operation, %handle, "shutting down; start request refused");
            return Ok(());
        }
        if ctx.handshake.phase() < HandshakePhase::Ready {
            warn!(
                phase = ?ctx.handshake.phase(),
                operation = %operation,
                "start request before registration completed; attempting anyway"
            );
        }

        match ctx.registry.begin(operation, handle.clone()) {
            Ok(handler) => {
                info!(operation = %operation, %handle, "starting operation");
                let request = OperationRequest {
                    operation: operation.clone(),
                    handle: handle.clone(),
                    arguments: arguments.clone(),
                };
                let reporter = OperationReporter::new(handle.clone(), ctx.reports.clone());
                tokio::spawn(crate::operations::run_operation(handler, request, reporter));
                ctx.registry.set_running(handle);
            }
            Err(crate::error::DhsError::UnknownOperation(name)) => {
                warn!(operation = %name, "unknown operation requested; no instance created");
            }
            Err(err) => {
                warn!(operation = %operation, %handle, error = %err, "start request rejected");
            }
        }
        Ok(())
    }
}
