//! DCSS wire protocol.
//!
//! DCSS and its hardware servers exchange fixed-size frames: 200 bytes of
//! ASCII text, NUL-padded, where the text is a sequence of space-separated
//! tokens and the first token names the message type. Message tags carry a
//! direction prefix: `stoc_`/`stoh_` flow from the sequencer to a client or
//! hardware server, `htos_` flows from hardware to the sequencer.
//!
//! This module owns the frame codec and the typed inbound/outbound message
//! representations. It holds no protocol state; ordering and bookkeeping
//! live in [`crate::handshake`] and [`crate::registry`].

use crate::error::{DhsError, DhsResult};

/// Fixed size of every DCSS wire frame.
pub const FRAME_SIZE: usize = 200;

/// Message-type tags this server dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageTag {
    /// `stoc_send_client_type`: DCSS asks the new connection to identify.
    SendClientType,
    /// `stoh_register_operation`: DCSS assigns an operation to this server.
    RegisterOperation,
    /// `stoh_start_operation`: DCSS requests an operation start.
    StartOperation,
}

impl MessageTag {
    /// The wire token for this tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageTag::SendClientType => "stoc_send_client_type",
            MessageTag::RegisterOperation => "stoh_register_operation",
            MessageTag::StartOperation => "stoh_start_operation",
        }
    }

    /// Parse a wire token into a tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "stoc_send_client_type" => Some(MessageTag::SendClientType),
            "stoh_register_operation" => Some(MessageTag::RegisterOperation),
            "stoh_start_operation" => Some(MessageTag::StartOperation),
            _ => None,
        }
    }
}

/// Opaque operation handle issued by DCSS (e.g. `1.4`).
///
/// The server never interprets the contents; it only correlates start,
/// update, and completion messages by equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationHandle(String);

impl OperationHandle {
    /// The handle as it appears on the wire.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OperationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OperationHandle {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for OperationHandle {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A message received from DCSS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// The sequencer asks this connection to declare its client type.
    SendClientType,
    /// The sequencer registers one operation name with this server.
    RegisterOperation {
        /// Operation name being assigned.
        operation: String,
    },
    /// The sequencer requests the start of an operation.
    StartOperation {
        /// Registered operation name.
        operation: String,
        /// Sequencer-issued handle correlating this invocation.
        handle: OperationHandle,
        /// Remaining tokens, passed to the operation verbatim.
        arguments: Vec<String>,
    },
    /// A message type this server does not act on. Kept so the dispatcher
    /// can log and drop it without treating it as an error.
    Unrecognized {
        /// The unparsed message-type token.
        tag: String,
    },
}

impl InboundMessage {
    /// The dispatch tag, if this is a message type the server knows.
    pub fn tag(&self) -> Option<MessageTag> {
        match self {
            InboundMessage::SendClientType => Some(MessageTag::SendClientType),
            InboundMessage::RegisterOperation { .. } => Some(MessageTag::RegisterOperation),
            InboundMessage::StartOperation { .. } => Some(MessageTag::StartOperation),
            InboundMessage::Unrecognized { .. } => None,
        }
    }

    /// Parse the text of one frame into a typed message.
    pub fn parse(text: &str) -> DhsResult<Self> {
        let mut tokens = text.split_whitespace();
        let tag = tokens
            .next()
            .ok_or_else(|| DhsError::Frame("empty message".to_string()))?;

        match MessageTag::from_tag(tag) {
            Some(MessageTag::SendClientType) => Ok(InboundMessage::SendClientType),
            Some(MessageTag::RegisterOperation) => {
                let operation = tokens.next().ok_or_else(|| {
                    DhsError::Frame("stoh_register_operation missing operation name".to_string())
                })?;
                Ok(InboundMessage::RegisterOperation {
                    operation: operation.to_string(),
                })
            }
            Some(MessageTag::StartOperation) => {
                let operation = tokens.next().ok_or_else(|| {
                    DhsError::Frame("stoh_start_operation missing operation name".to_string())
                })?;
                let handle = tokens.next().ok_or_else(|| {
                    DhsError::Frame("stoh_start_operation missing operation handle".to_string())
                })?;
                Ok(InboundMessage::StartOperation {
                    operation: operation.to_string(),
                    handle: OperationHandle::from(handle),
                    arguments: tokens.map(str::to_string).collect(),
                })
            }
            None => Ok(InboundMessage::Unrecognized {
                tag: tag.to_string(),
            }),
        }
    }
}

/// Terminal status reported in an `htos_operation_completed` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    /// The operation succeeded; encoded as the token `normal`.
    Normal,
    /// The operation failed for the given reason. The reason is collapsed
    /// to a single token on the wire.
    Error(String),
}

impl OperationStatus {
    fn wire_token(&self) -> String {
        match self {
            OperationStatus::Normal => "normal".to_string(),
            OperationStatus::Error(reason) => {
                let token: String = reason
                    .trim()
                    .chars()
                    .map(|c| if c.is_whitespace() { '_' } else { c })
                    .collect();
                if token.is_empty() {
                    "error".to_string()
                } else {
                    token
                }
            }
        }
    }
}

/// A message sent to DCSS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    /// Identity declaration: this connection is a hardware server.
    ClientIsHardware {
        /// The DHS name DCSS expects for this server.
        dhs_name: String,
    },
    /// Progress report for a running operation.
    OperationUpdate {
        /// Operation name.
        operation: String,
        /// Handle from the start request.
        handle: OperationHandle,
        /// Progress payload tokens.
        arguments: Vec<String>,
    },
    /// Terminal report for an operation.
    OperationCompleted {
        /// Operation name.
        operation: String,
        /// Handle from the start request.
        handle: OperationHandle,
        /// Success or failure.
        status: OperationStatus,
        /// Result payload tokens.
        arguments: Vec<String>,
    },
}

impl OutboundMessage {
    /// Render the message as frame text.
    pub fn to_text(&self) -> String {
        match self {
            OutboundMessage::ClientIsHardware { dhs_name } => {
                format!("htos_client_is_hardware {dhs_name}")
            }
            OutboundMessage::OperationUpdate {
                operation,
                handle,
                arguments,
            } => join_tokens(
                &["htos_operation_update", operation.as_str(), handle.as_str()],
                arguments,
            ),
            OutboundMessage::OperationCompleted {
                operation,
                handle,
                status,
                arguments,
            } => {
                let status = status.wire_token();
                join_tokens(
                    &[
                        "htos_operation_completed",
                        operation.as_str(),
                        handle.as_str(),
                        status.as_str(),
                    ],
                    arguments,
                )
            }
        }
    }

    /// Encode the message into one wire frame.
    pub fn encode(&self) -> DhsResult<[u8; FRAME_SIZE]> {
        encode_frame(&self.to_text())
    }
}

fn join_tokens(head: &[&str], tail: &[String]) -> String {
    let mut text = head.join(" ");
    for token in tail {
        text.push(' ');
        text.push_str(token);
    }
    text
}

/// Pad message text into a fixed-size frame.
///
/// The text must be ASCII and leave room for at least one NUL terminator.
pub fn encode_frame(text: &str) -> DhsResult<[u8; FRAME_SIZE]> {
    if !text.is_ascii() {
        return Err(DhsError::Frame(format!("non-ASCII message text: {text:?}")));
    }
    let bytes = text.as_bytes();
    if bytes.len() >= FRAME_SIZE {
        return Err(DhsError::Frame(format!(
            "message of {} bytes exceeds the {}-byte frame",
            bytes.len(),
            FRAME_SIZE
        )));
    }
    let mut frame = [0u8; FRAME_SIZE];
    frame[..bytes.len()].copy_from_slice(bytes);
    Ok(frame)
}

/// Extract the message text from a received frame.
///
/// The text runs up to the first NUL; an unterminated or non-ASCII frame is
/// malformed.
pub fn decode_frame(frame: &[u8]) -> DhsResult<String> {
    if frame.len() != FRAME_SIZE {
        return Err(DhsError::Frame(format!(
            "frame of {} bytes, expected {}",
            frame.len(),
            FRAME_SIZE
        )));
    }
    let end = frame
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| DhsError::Frame("unterminated frame".to_string()))?;
    let text = std::str::from_utf8(&frame[..end])
        .map_err(|e| DhsError::Frame(format!("invalid frame text: {e}")))?;
    if !text.is_ascii() {
        return Err(DhsError::Frame("non-ASCII frame text".to_string()));
    }
    Ok(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_send_client_type() {
        let msg = InboundMessage::parse("stoc_send_client_type").unwrap();
        assert_eq!(msg, InboundMessage::SendClientType);
        assert_eq!(msg.tag(), Some(MessageTag::SendClientType));
    }

    #[test]
    fn parses_register_operation() {
        let msg = InboundMessage::parse("stoh_register_operation centerLoop").unwrap();
        assert_eq!(
            msg,
            InboundMessage::RegisterOperation {
                operation: "centerLoop".to_string()
            }
        );
    }

    #[test]
    fn parses_start_operation_with_arguments() {
        let msg = InboundMessage::parse("stoh_start_operation collectLoop 1.4 0 90 fast").unwrap();
        match msg {
            InboundMessage::StartOperation {
                operation,
                handle,
                arguments,
            } => {
                assert_eq!(operation, "collectLoop");
                assert_eq!(handle.as_str(), "1.4");
                assert_eq!(arguments, vec!["0", "90", "fast"]);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn start_operation_without_handle_is_malformed() {
        let result = InboundMessage::parse("stoh_start_operation collectLoop");
        assert!(matches!(result, Err(DhsError::Frame(_))));
    }

    #[test]
    fn unknown_tag_is_preserved_not_fatal() {
        let msg = InboundMessage::parse("stoh_abort_all").unwrap();
        assert_eq!(
            msg,
            InboundMessage::Unrecognized {
                tag: "stoh_abort_all".to_string()
            }
        );
        assert_eq!(msg.tag(), None);
    }

    #[test]
    fn encodes_identity_message() {
        let msg = OutboundMessage::ClientIsHardware {
            dhs_name: "loopDHS".to_string(),
        };
        assert_eq!(msg.to_text(), "htos_client_is_hardware loopDHS");
    }

    #[test]
    fn encodes_completion_statuses() {
        let ok = OutboundMessage::OperationCompleted {
            operation: "centerLoop".to_string(),
            handle: OperationHandle::from("1.2"),
            status: OperationStatus::Normal,
            arguments: vec!["done".to_string()],
        };
        assert_eq!(ok.to_text(), "htos_operation_completed centerLoop 1.2 normal done");

        let failed = OutboundMessage::OperationCompleted {
            operation: "centerLoop".to_string(),
            handle: OperationHandle::from("1.2"),
            status: OperationStatus::Error("no loop found".to_string()),
            arguments: vec![],
        };
        assert_eq!(
            failed.to_text(),
            "htos_operation_completed centerLoop 1.2 no_loop_found"
        );
    }

    #[test]
    fn frame_roundtrip() {
        let frame = encode_frame("htos_operation_update centerLoop 1.2 50%").unwrap();
        assert_eq!(frame.len(), FRAME_SIZE);
        let text = decode_frame(&frame).unwrap();
        assert_eq!(text, "htos_operation_update centerLoop 1.2 50%");
    }

    #[test]
    fn oversized_message_is_rejected() {
        let text = "htos_operation_update ".to_string() + &"x".repeat(FRAME_SIZE);
        assert!(matches!(encode_frame(&text), Err(DhsError::Frame(_))));
    }

    #[test]
    fn unterminated_frame_is_rejected() {
        let frame = [b'a'; FRAME_SIZE];
        assert!(matches!(decode_frame(&frame), Err(DhsError::Frame(_))));
    }

    #[test]
    fn short_frame_is_rejected() {
        assert!(matches!(decode_frame(&[0u8; 10]), Err(DhsError::Frame(_))));
    }
}
