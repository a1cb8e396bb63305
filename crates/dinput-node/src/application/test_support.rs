//! Test doubles shared by the application-layer unit tests.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use dinput_core::protocol::decode_message;
use dinput_core::protocol::messages::{DInputMessage, Role};
use dinput_core::{DeviceId, SessionId};

use crate::application::channel_registry::{Transport, TransportError};
use crate::application::error::SharingError;
use crate::application::pending::Completion;

pub type Shared<T> = Arc<Mutex<Vec<T>>>;

/// Transport that records every call and never touches a network.
///
/// Session ids start at 100 so they cannot collide with the small ids
/// tests use for hand-registered inbound channels.
pub struct RecordingTransport {
    next: u32,
    refused: HashSet<DeviceId>,
    live: HashSet<SessionId>,
    opens: Shared<(DeviceId, Role, SessionId)>,
    sent: Shared<(SessionId, Vec<u8>)>,
    closed: Shared<SessionId>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self {
            next: 100,
            refused: HashSet::new(),
            live: HashSet::new(),
            opens: Arc::default(),
            sent: Arc::default(),
            closed: Arc::default(),
        }
    }

    /// Makes `open` fail for `peer`.
    pub fn refusing(mut self, peer: &str) -> Self {
        self.refused.insert(DeviceId::from(peer));
        self
    }

    /// Accepts frames on an inbound session the test registers by hand.
    pub fn with_inbound(mut self, session: SessionId) -> Self {
        self.live.insert(session);
        self
    }

    pub fn opens(&self) -> Shared<(DeviceId, Role, SessionId)> {
        Arc::clone(&self.opens)
    }

    pub fn sent(&self) -> Shared<(SessionId, Vec<u8>)> {
        Arc::clone(&self.sent)
    }

    pub fn closed(&self) -> Shared<SessionId> {
        Arc::clone(&self.closed)
    }
}

impl Transport for RecordingTransport {
    fn open(&mut self, peer: &DeviceId, role: Role) -> Result<SessionId, TransportError> {
        if self.refused.contains(peer) {
            return Err(TransportError::UnknownPeer(peer.clone()));
        }
        let session = SessionId(self.next);
        self.next += 1;
        self.live.insert(session);
        self.opens.lock().unwrap().push((peer.clone(), role, session));
        Ok(session)
    }

    fn send(&mut self, session: SessionId, frame: Vec<u8>) -> Result<(), TransportError> {
        if !self.live.contains(&session) {
            return Err(TransportError::SessionClosed(session));
        }
        self.sent.lock().unwrap().push((session, frame));
        Ok(())
    }

    fn close(&mut self, session: SessionId) {
        self.live.remove(&session);
        self.closed.lock().unwrap().push(session);
    }
}

/// Decodes and drains everything sent so far.
pub fn take_sent(sent: &Shared<(SessionId, Vec<u8>)>) -> Vec<(SessionId, DInputMessage)> {
    sent.lock()
        .unwrap()
        .drain(..)
        .map(|(session, frame)| {
            let (msg, _) = decode_message(&frame).expect("controller sent an undecodable frame");
            (session, msg)
        })
        .collect()
}

/// Completion that appends its outcome to a shared log.
pub fn recorder<T: Send + 'static>() -> (Completion<T>, Shared<Result<T, SharingError>>) {
    let log: Shared<Result<T, SharingError>> = Arc::default();
    let sink = Arc::clone(&log);
    (Box::new(move |r| sink.lock().unwrap().push(r)), log)
}
