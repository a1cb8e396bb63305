//! In-process transport: every endpoint of every node on one hub.
//!
//! The hub stands in for the network in integration tests and local demos.
//! Each `(device, role)` pair registers one endpoint; opening a channel to
//! an endpoint that was never registered fails at once, the way an
//! unreachable address would.
//!
//! Session ids are unique across the whole hub and both ends of a channel
//! see the same id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dinput_core::protocol::messages::Role;
use dinput_core::{DeviceId, SessionId};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::application::channel_registry::{Transport, TransportError, TransportEvent};

type Endpoint = (DeviceId, Role);

#[derive(Debug, Clone)]
struct Link {
    opener: Endpoint,
    acceptor: Endpoint,
}

impl Link {
    fn other_end(&self, me: &Endpoint) -> &Endpoint {
        if &self.opener == me {
            &self.acceptor
        } else {
            &self.opener
        }
    }
}

#[derive(Default)]
struct HubInner {
    next_session: u32,
    endpoints: HashMap<Endpoint, mpsc::UnboundedSender<TransportEvent>>,
    links: HashMap<SessionId, Link>,
}

impl HubInner {
    fn deliver(&self, to: &Endpoint, event: TransportEvent) -> bool {
        match self.endpoints.get(to) {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }
}

/// Shared switchboard connecting in-process endpoints.
#[derive(Clone, Default)]
pub struct MemoryHub {
    inner: Arc<Mutex<HubInner>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the `(device, role)` endpoint and returns its transport
    /// together with the stream of events addressed to it.
    pub fn endpoint(
        &self,
        device: DeviceId,
        role: Role,
    ) -> (MemoryTransport, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let local = (device, role);
        self.lock().endpoints.insert(local.clone(), tx);
        let transport = MemoryTransport {
            inner: Arc::clone(&self.inner),
            local,
        };
        (transport, rx)
    }

    /// Drops a channel as if the network failed, notifying both ends.
    pub fn sever(&self, session: SessionId) {
        let mut inner = self.lock();
        let Some(link) = inner.links.remove(&session) else {
            return;
        };
        debug!(%session, "hub severed channel");
        inner.deliver(&link.opener, TransportEvent::Closed { session });
        inner.deliver(&link.acceptor, TransportEvent::Closed { session });
    }

    /// Sessions currently linking `a` and `b`, in either direction.
    pub fn sessions_between(&self, a: &DeviceId, b: &DeviceId) -> Vec<SessionId> {
        let inner = self.lock();
        let mut sessions: Vec<SessionId> = inner
            .links
            .iter()
            .filter(|(_, l)| {
                (&l.opener.0 == a && &l.acceptor.0 == b) || (&l.opener.0 == b && &l.acceptor.0 == a)
            })
            .map(|(s, _)| *s)
            .collect();
        sessions.sort();
        sessions
    }

    fn lock(&self) -> MutexGuard<'_, HubInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One endpoint's view of the hub.
pub struct MemoryTransport {
    inner: Arc<Mutex<HubInner>>,
    local: Endpoint,
}

impl MemoryTransport {
    fn lock(&self) -> MutexGuard<'_, HubInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for MemoryTransport {
    fn open(&mut self, peer: &DeviceId, role: Role) -> Result<SessionId, TransportError> {
        let remote = (peer.clone(), role);
        let mut inner = self.lock();
        if !inner.endpoints.contains_key(&remote) {
            return Err(TransportError::UnknownPeer(peer.clone()));
        }
        inner.next_session += 1;
        let session = SessionId(inner.next_session);
        inner.links.insert(
            session,
            Link {
                opener: self.local.clone(),
                acceptor: remote.clone(),
            },
        );
        inner.deliver(
            &remote,
            TransportEvent::Opened {
                session,
                peer: self.local.0.clone(),
            },
        );
        trace!(%session, from = %self.local.0, to = %peer, "memory channel opened");
        Ok(session)
    }

    fn send(&mut self, session: SessionId, frame: Vec<u8>) -> Result<(), TransportError> {
        let inner = self.lock();
        let Some(link) = inner.links.get(&session) else {
            return Err(TransportError::SessionClosed(session));
        };
        let to = link.other_end(&self.local).clone();
        if inner.deliver(&to, TransportEvent::Bytes { session, bytes: frame }) {
            Ok(())
        } else {
            Err(TransportError::SessionClosed(session))
        }
    }

    fn close(&mut self, session: SessionId) {
        let mut inner = self.lock();
        let Some(link) = inner.links.remove(&session) else {
            return;
        };
        let to = link.other_end(&self.local).clone();
        inner.deliver(&to, TransportEvent::Closed { session });
    }
}
