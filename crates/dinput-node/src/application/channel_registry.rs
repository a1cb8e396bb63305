//! ChannelRegistry: maps peer device ids to open transport channels.
//!
//! The registry is the only component that talks to the [`Transport`].  It
//! keeps a bidirectional index between peers and sessions so a controller
//! can go from an inbound frame's session to the peer that sent it, and from
//! a peer to the channel on which to answer.
//!
//! # Endpoints
//!
//! Every node exposes two transport endpoints: one served by its source
//! loop and one by its sink loop.  A source opens channels to a peer's
//! *sink* endpoint to request devices, and to a peer's *source* endpoint
//! to ask it to relay.  Channels are therefore keyed by `(peer, role)`.
//!
//! # Close handling
//!
//! [`ChannelRegistry::on_closed`] is the single cleanup point for a channel
//! that died.  It removes the session from both indexes and hands the closed
//! [`PeerSession`] back so the owning controller can fail what was pending
//! on it.  A locally initiated [`close`](ChannelRegistry::close) removes the
//! entry immediately; a later `Closed` event for it is then ignored.

use std::collections::HashMap;

use dinput_core::protocol::codec::{encode_message_now, ParseError};
use dinput_core::protocol::messages::{DInputMessage, Role};
use dinput_core::protocol::SequenceCounter;
use dinput_core::{DeviceId, SessionId};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::application::error::SharingError;

/// Errors reported by a [`Transport`] implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("no address known for peer {0}")]
    UnknownPeer(DeviceId),
    #[error("{0} is not open")]
    SessionClosed(SessionId),
    #[error("transport I/O error: {0}")]
    Io(String),
}

/// Inbound notifications produced by a transport endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A remote peer opened a channel to this endpoint.
    Opened { session: SessionId, peer: DeviceId },
    /// One complete frame arrived.
    Bytes { session: SessionId, bytes: Vec<u8> },
    /// The channel is gone, whoever closed it.
    Closed { session: SessionId },
}

/// Point-to-point reliable frame transport consumed by the registry.
///
/// Implementations never block: `open` allocates the session id at once and
/// connects in the background, reporting failure later as a `Closed` event.
/// Frames queued with `send` before the connection completes are delivered
/// in order once it does.
pub trait Transport: Send {
    /// Opens a channel to `peer`'s endpoint for `role`.
    fn open(&mut self, peer: &DeviceId, role: Role) -> Result<SessionId, TransportError>;

    /// Queues one complete frame on `session`.
    fn send(&mut self, session: SessionId, frame: Vec<u8>) -> Result<(), TransportError>;

    /// Best-effort shutdown of `session`.
    fn close(&mut self, session: SessionId);
}

/// One channel to one remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSession {
    pub peer: DeviceId,
    /// Role of the remote endpoint this channel reaches.
    pub remote_role: Role,
    pub session: SessionId,
    /// `true` when this node opened the channel.
    pub outbound: bool,
    pub is_open: bool,
}

/// Bidirectional peer ↔ session index over one transport endpoint.
pub struct ChannelRegistry {
    transport: Box<dyn Transport>,
    by_peer: HashMap<(DeviceId, Role), SessionId>,
    by_session: HashMap<SessionId, PeerSession>,
    sequence: SequenceCounter,
}

impl ChannelRegistry {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            by_peer: HashMap::new(),
            by_session: HashMap::new(),
            sequence: SequenceCounter::new(),
        }
    }

    /// Returns the open channel to `peer`'s `role` endpoint, opening one if
    /// needed.
    ///
    /// # Errors
    ///
    /// Returns [`SharingError::ChannelOpenError`] if the transport refuses.
    pub fn open(&mut self, peer: &DeviceId, role: Role) -> Result<SessionId, SharingError> {
        if let Some(session) = self.resolve_channel(peer, role) {
            trace!(%peer, %session, "reusing open channel");
            return Ok(session);
        }

        let session = self.transport.open(peer, role).map_err(|e| {
            warn!(%peer, ?role, "channel open failed: {e}");
            SharingError::ChannelOpenError(e.to_string())
        })?;

        info!(%peer, ?role, %session, "channel opened");
        self.by_peer.insert((peer.clone(), role), session);
        self.by_session.insert(
            session,
            PeerSession {
                peer: peer.clone(),
                remote_role: role,
                session,
                outbound: true,
                is_open: true,
            },
        );
        Ok(session)
    }

    /// Closes the channel to `peer`'s `role` endpoint.  No-op if absent.
    pub fn close(&mut self, peer: &DeviceId, role: Role) {
        let Some(session) = self.by_peer.remove(&(peer.clone(), role)) else {
            return;
        };
        self.by_session.remove(&session);
        self.transport.close(session);
        info!(%peer, ?role, %session, "channel closed locally");
    }

    /// Registers a channel that a remote peer opened to this endpoint.
    ///
    /// Inbound channels always come from a peer's source role.  A newer
    /// inbound channel from the same peer replaces the older one in the
    /// peer index; the older one stays resolvable by session until it closes.
    pub fn on_opened(&mut self, session: SessionId, peer: DeviceId) {
        info!(%peer, %session, "inbound channel accepted");
        if let Some(previous) = self.by_peer.insert((peer.clone(), Role::Source), session) {
            debug!(%peer, %previous, %session, "inbound channel superseded");
        }
        self.by_session.insert(
            session,
            PeerSession {
                peer,
                remote_role: Role::Source,
                session,
                outbound: false,
                is_open: true,
            },
        );
    }

    /// Removes a dead channel and returns what it was bound to.
    ///
    /// Returns `None` for sessions that were already closed locally.
    pub fn on_closed(&mut self, session: SessionId) -> Option<PeerSession> {
        let mut closed = self.by_session.remove(&session)?;
        closed.is_open = false;
        let key = (closed.peer.clone(), closed.remote_role);
        if self.by_peer.get(&key) == Some(&session) {
            self.by_peer.remove(&key);
        }
        info!(peer = %closed.peer, %session, "channel closed by transport");
        Some(closed)
    }

    pub fn resolve_peer(&self, session: SessionId) -> Option<&DeviceId> {
        self.by_session.get(&session).map(|s| &s.peer)
    }

    pub fn resolve_channel(&self, peer: &DeviceId, role: Role) -> Option<SessionId> {
        self.by_peer.get(&(peer.clone(), role)).copied()
    }

    pub fn session(&self, session: SessionId) -> Option<&PeerSession> {
        self.by_session.get(&session)
    }

    /// Encodes `msg` and queues it on `session`.
    ///
    /// # Errors
    ///
    /// Returns [`SharingError::SendFailed`] if encoding fails or the
    /// transport rejects the frame.
    pub fn send(&mut self, session: SessionId, msg: &DInputMessage) -> Result<(), SharingError> {
        let seq = self.sequence.next();
        let frame = encode_message_now(msg, seq)
            .map_err(|e: ParseError| SharingError::SendFailed(e.to_string()))?;
        debug!(%session, command = ?msg.command(), seq, "sending");
        self.transport
            .send(session, frame)
            .map_err(|e| SharingError::SendFailed(e.to_string()))
    }
}
