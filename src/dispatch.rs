//! Message dispatch.
//!
//! Routes each inbound DCSS message, keyed by its [`MessageTag`], to exactly
//! one registered handler. The mapping is populated once at startup;
//! re-binding a tag is a configuration error, never a silent override.
//! Handlers are stateless routing objects; all protocol state lives in the
//! [`DhsContext`](crate::server::DhsContext) they operate on, which keeps
//! every state transition on the control task.

use std::collections::HashMap;
use tracing::{debug, warn};

use crate::error::{DhsError, DhsResult};
use crate::protocol::{InboundMessage, MessageTag};
use crate::server::DhsContext;

/// A routing target for one message type.
pub trait MessageHandler: Send {
    /// Act on one inbound message.
    fn handle(&self, message: &InboundMessage, ctx: &mut DhsContext) -> DhsResult<()>;
}

/// Message-type → handler map.
#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<MessageTag, Box<dyn MessageHandler>>,
}

impl Dispatcher {
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind exactly one handler to a message tag.
    pub fn bind(&mut self, tag: MessageTag, handler: Box<dyn MessageHandler>) -> DhsResult<()> {
        if self.handlers.contains_key(&tag) {
            return Err(DhsError::Configuration(format!(
                "handler for '{}' is already bound",
                tag.as_str()
            )));
        }
        self.handlers.insert(tag, handler);
        Ok(())
    }

    /// Route one message to its handler.
    ///
    /// A message with no binding is logged and dropped, since DCSS legitimately
    /// sends message types this server does not act on.
    pub fn dispatch(&self, message: &InboundMessage, ctx: &mut DhsContext) -> DhsResult<()> {
        let tag = match message.tag() {
            Some(tag) => tag,
            None => {
                if let InboundMessage::Unrecognized { tag } = message {
                    debug!(%tag, "dropping message type this DHS does not act on");
                }
                return Ok(());
            }
        };
        match self.handlers.get(&tag) {
            Some(handler) => handler.handle(message, ctx),
            None => {
                warn!(tag = tag.as_str(), "no handler bound for message type; dropping");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingHandler(Arc<AtomicUsize>);

    impl MessageHandler for CountingHandler {
        fn handle(&self, _message: &InboundMessage, _ctx: &mut DhsContext) -> DhsResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn test_context() -> DhsContext {
        let settings = Settings {
            dcss: crate::config::DcssSettings {
                host: "localhost".to_string(),
                port: 14242,
            },
            dhs: Default::default(),
        };
        let (outbound, _outbound_rx) = tokio::sync::mpsc::unbounded_channel();
        let (reports, _reports_rx) = tokio::sync::mpsc::unbounded_channel();
        DhsContext::new(Arc::new(settings), outbound, reports)
    }

    #[test]
    fn duplicate_binding_is_rejected() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = Dispatcher::new();
        dispatcher
            .bind(MessageTag::SendClientType, Box::new(CountingHandler(count.clone())))
            .unwrap();
        let err = dispatcher
            .bind(MessageTag::SendClientType, Box::new(CountingHandler(count)))
            .unwrap_err();
        assert!(matches!(err, DhsError::Configuration(_)));
    }

    #[test]
    fn dispatch_routes_by_tag() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = Dispatcher::new();
        dispatcher
            .bind(MessageTag::SendClientType, Box::new(CountingHandler(count.clone())))
            .unwrap();

        let mut ctx = test_context();
        dispatcher
            .dispatch(&InboundMessage::SendClientType, &mut ctx)
            .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unrecognized_message_is_dropped() {
        let dispatcher = Dispatcher::new();
        let mut ctx = test_context();
        let msg = InboundMessage::Unrecognized {
            tag: "stoh_abort_all".to_string(),
        };
        assert!(dispatcher.dispatch(&msg, &mut ctx).is_ok());
    }

    #[test]
    fn unbound_known_tag_is_dropped() {
        let dispatcher = Dispatcher::new();
        let mut ctx = test_context();
        assert!(dispatcher
            .dispatch(&InboundMessage::SendClientType, &mut ctx)
            .is_ok());
    }
}
