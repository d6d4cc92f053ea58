//! Server lifecycle and the control loop.
//!
//! [`Dhs`] is the top-level orchestration: build the dispatcher, define the
//! operation set, then `run()`: connect to DCSS, drive the handshake, and
//! keep serving until a termination signal arrives.
//!
//! All protocol state (handshake phase, operation registry) lives in one
//! [`DhsContext`] owned by a single control task. The control loop is the
//! only place that mutates it, selecting over link events, worker reports,
//! and the shutdown signal; operation workers run on their own tasks and
//! only ever talk back through the report channel. The handshake state
//! machine and the registry's uniqueness invariants are not built to
//! tolerate concurrent mutation, and this structure makes sure they never
//! see any.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::Settings;
use crate::dispatch::Dispatcher;
use crate::error::DhsResult;
use crate::handshake::{
    ClientTypeHandler, HandshakeSequencer, RegisterOperationHandler, StartOperationHandler,
};
use crate::link::{DcssLink, LinkEvent, OutboundSender};
use crate::operations::{OperationHandler, OperationReport};
use crate::protocol::{MessageTag, OutboundMessage};
use crate::registry::OperationRegistry;

/// Process-scoped state shared by the message handlers.
///
/// Constructed once at startup and passed explicitly; there are no ambient
/// globals. Everything in here belongs to the control task.
pub struct DhsContext {
    /// Resolved beamline configuration.
    pub settings: Arc<Settings>,
    /// Outbound queue of the current connection.
    pub outbound: OutboundSender,
    /// Handshake progress for the current connection.
    pub handshake: HandshakeSequencer,
    /// Operation definitions and in-flight instances.
    pub registry: OperationRegistry,
    /// Sender cloned into each operation worker's reporter.
    pub reports: mpsc::UnboundedSender<OperationReport>,
    /// Cleared during shutdown; start requests are refused once false.
    pub accepting: bool,
}

impl DhsContext {
    /// Build a context around the given channels.
    pub fn new(
        settings: Arc<Settings>,
        outbound: OutboundSender,
        reports: mpsc::UnboundedSender<OperationReport>,
    ) -> Self {
        Self {
            settings,
            registry: OperationRegistry::new(outbound.clone()),
            outbound,
            handshake: HandshakeSequencer::new(),
            reports,
            accepting: true,
        }
    }

    /// Queue a message to DCSS.
    pub fn send(&self, message: OutboundMessage) {
        if self.outbound.send(message).is_err() {
            warn!("DCSS connection writer is gone; dropping outbound message");
        }
    }

    /// Point the context (and registry) at a new connection's queue.
    pub fn rebind_outbound(&mut self, outbound: OutboundSender) {
        self.registry.rebind_outbound(outbound.clone());
        self.outbound = outbound;
    }
}

/// The Data Handling Server.
pub struct Dhs {
    settings: Arc<Settings>,
    dispatcher: Dispatcher,
    ctx: DhsContext,
    reports_rx: mpsc::UnboundedReceiver<OperationReport>,
}

impl Dhs {
    /// Build a server from resolved settings, with all message handlers
    /// bound. Binding failures are configuration errors and abort startup.
    pub fn new(settings: Arc<Settings>) -> DhsResult<Self> {
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        // Placeholder queue until the first connection; the handshake is
        // Disconnected so nothing sends into it.
        let (outbound_tx, _outbound_rx) = mpsc::unbounded_channel();
        let ctx = DhsContext::new(Arc::clone(&settings), outbound_tx, reports_tx);

        let mut dispatcher = Dispatcher::new();
        dispatcher.bind(MessageTag::SendClientType, Box::new(ClientTypeHandler))?;
        dispatcher.bind(MessageTag::RegisterOperation, Box::new(RegisterOperationHandler))?;
        dispatcher.bind(MessageTag::StartOperation, Box::new(StartOperationHandler))?;

        Ok(Self {
            settings,
            dispatcher,
            ctx,
            reports_rx,
        })
    }

    /// Define an operation this server implements. Must happen before
    /// [`run`](Self::run); duplicate names are a configuration error.
    pub fn define_operation(
        &mut self,
        name: &str,
        handler: Arc<dyn OperationHandler>,
    ) -> DhsResult<()> {
        self.ctx.registry.define(name, handler)
    }

    /// Connect to DCSS and serve until `shutdown` resolves.
    ///
    /// A lost connection resets the handshake, force-fails in-flight
    /// operations (their results can no longer be reported reliably), and
    /// re-dials after the configured delay. When `shutdown` fires the
    /// server stops accepting starts, gives in-flight operations the
    /// configured grace period, force-fails the rest, and closes the link.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> DhsResult<()> {
        tokio::pin!(shutdown);
        let addr = self.settings.dcss_addr();

        loop {
            let mut link = tokio::select! {
                _ = &mut shutdown => return self.finish(None).await,
                result = DcssLink::connect(&addr) => match result {
                    Ok(link) => link,
                    Err(err) => {
                        warn!(%addr, error = %err, "DCSS connect failed; retrying");
                        tokio::select! {
                            _ = &mut shutdown => return self.finish(None).await,
                            _ = tokio::time::sleep(self.settings.dhs.reconnect_delay) => continue,
                        }
                    }
                },
            };

            self.ctx.rebind_outbound(link.sender());
            self.ctx.handshake.on_connected();

            let reason = loop {
                tokio::select! {
                    _ = &mut shutdown => return self.finish(Some(link)).await,
                    event = link.next_event() => match event {
                        Some(LinkEvent::Message(message)) => {
                            if let Err(err) = self.dispatcher.dispatch(&message, &mut self.ctx) {
                                warn!(error = %err, "message handler failed");
                            }
                        }
                        Some(LinkEvent::Disconnected { reason }) => break reason,
                        None => break "link closed".to_string(),
                    },
                    Some(report) = self.reports_rx.recv() => {
                        // Stale reports are logged inside the registry.
                        let _ = self.ctx.registry.apply_report(report);
                    }
                }
            };

            warn!(%reason, "DCSS connection lost");
            self.ctx.handshake.on_disconnected();
            self.ctx.registry.fail_all("connection_lost");
            self.ctx.registry.reset_registration();
            self.drop_link(link).await;

            tokio::select! {
                _ = &mut shutdown => return self.finish(None).await,
                _ = tokio::time::sleep(self.settings.dhs.reconnect_delay) => {}
            }
        }
    }

    /// Orderly shutdown: refuse new starts, drain in-flight operations for
    /// the grace period, force-fail stragglers, close the connection.
    async fn finish(mut self, link: Option<DcssLink>) -> DhsResult<()> {
        info!("shutdown requested");
        self.ctx.accepting = false;

        if self.ctx.registry.active_count() > 0 {
            info!(
                active = self.ctx.registry.active_count(),
                grace = ?self.settings.dhs.shutdown_grace,
                "waiting for in-flight operations"
            );
            let deadline = Instant::now() + self.settings.dhs.shutdown_grace;
            while self.ctx.registry.active_count() > 0 {
                match tokio::time::timeout_at(deadline, self.reports_rx.recv()).await {
                    Ok(Some(report)) => {
                        let _ = self.ctx.registry.apply_report(report);
                    }
                    Ok(None) => break,
                    Err(_) => {
                        warn!(
                            active = self.ctx.registry.active_count(),
                            "shutdown grace period elapsed; force-failing operations"
                        );
                        self.ctx.registry.fail_all("shutdown_timeout");
                        break;
                    }
                }
            }
        }

        if let Some(link) = link {
            self.drop_link(link).await;
        }
        info!("DHS stopped");
        Ok(())
    }

    /// Release our senders into the link's queue and close it, letting the
    /// writer drain whatever is still pending.
    async fn drop_link(&mut self, link: DcssLink) {
        let (placeholder, _rx) = mpsc::unbounded_channel();
        self.ctx.rebind_outbound(placeholder);
        link.close().await;
    }
}
