//! Frame dispatch: bytes in, one controller call out.
//!
//! Each endpoint's event loop hands every inbound frame to [`dispatch_frame`]
//! together with the controller that owns the endpoint.  The frame is
//! decoded in full before anything else happens; a frame that fails any
//! check is logged and dropped, and the channel stays open.

use dinput_core::protocol::codec::{decode_message, ParseError};
use dinput_core::protocol::messages::{DInputMessage, Role};
use dinput_core::SessionId;
use tracing::{trace, warn};

use crate::application::sink_session::SinkController;
use crate::application::source_session::SourceController;

/// A controller that consumes decoded messages for one endpoint role.
pub trait MessageHandler {
    /// Role of the endpoint this handler serves.
    fn role(&self) -> Role;

    fn handle_message(&mut self, session: SessionId, msg: DInputMessage);
}

impl MessageHandler for SourceController {
    fn role(&self) -> Role {
        Role::Source
    }

    fn handle_message(&mut self, session: SessionId, msg: DInputMessage) {
        SourceController::handle_message(self, session, msg)
    }
}

impl MessageHandler for SinkController {
    fn role(&self) -> Role {
        Role::Sink
    }

    fn handle_message(&mut self, session: SessionId, msg: DInputMessage) {
        SinkController::handle_message(self, session, msg)
    }
}

/// Outcome of dispatching one frame, mostly for logging and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    Handled,
    /// The frame did not decode.
    Malformed(ParseError),
    /// The message is addressed to the other endpoint role.
    WrongRole(Role),
}

/// Decodes `bytes` and routes the message to `handler`.
pub fn dispatch_frame<H: MessageHandler + ?Sized>(
    handler: &mut H,
    session: SessionId,
    bytes: &[u8],
) -> Dispatched {
    let (msg, consumed) = match decode_message(bytes) {
        Ok(decoded) => decoded,
        Err(ParseError::UnknownCommand(code)) => {
            warn!(%session, code = format_args!("{code:#x}"), "unknown command dropped");
            return Dispatched::Malformed(ParseError::UnknownCommand(code));
        }
        Err(e) => {
            warn!(%session, "malformed frame dropped: {e}");
            return Dispatched::Malformed(e);
        }
    };
    if consumed < bytes.len() {
        warn!(%session, extra = bytes.len() - consumed, "trailing bytes after frame ignored");
    }

    let addressed_to = msg.role();
    if addressed_to != handler.role() {
        warn!(
            %session,
            command = ?msg.command(),
            endpoint = ?handler.role(),
            "message for the other role dropped"
        );
        return Dispatched::WrongRole(addressed_to);
    }

    trace!(%session, command = ?msg.command(), "dispatching");
    handler.handle_message(session, msg);
    Dispatched::Handled
}
