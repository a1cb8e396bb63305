//! TCP transport for one node endpoint.
//!
//! # Connection lifecycle (for beginners)
//!
//! ```text
//!  open(peer, role)                         remote listener
//!  ────────────────                         ───────────────
//!  allocate session id, return at once
//!  spawn: connect ────────────────────────► accept
//!         write preamble [len:u16][id] ───► read preamble, emit Opened
//!         writer task  ◄── frames queued by send()
//!         reader task  ──► Bytes events          (same on the remote side)
//!  EOF / I/O error  ──► Closed event
//! ```
//!
//! The preamble tells the accepting side which device opened the channel.
//! After it, both directions carry protocol frames back to back; the reader
//! uses the length in each 28-byte header to find frame boundaries.
//!
//! `open` never blocks the event loop: a connect failure shows up later as
//! a `Closed` event for the session, which the controllers already treat as
//! "peer disconnected".

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dinput_core::protocol::codec::frame_length;
use dinput_core::protocol::messages::{Role, HEADER_SIZE};
use dinput_core::{DeviceId, SessionId};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::application::channel_registry::{Transport, TransportError, TransportEvent};

/// Largest payload accepted from the network.
const MAX_PAYLOAD: usize = 1 << 20;

/// Error type for setting up a TCP endpoint.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("bind failed on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Addresses of one remote node's two endpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeerAddrs {
    pub source: Option<SocketAddr>,
    pub sink: Option<SocketAddr>,
}

impl PeerAddrs {
    fn for_role(&self, role: Role) -> Option<SocketAddr> {
        match role {
            Role::Source => self.source,
            Role::Sink => self.sink,
        }
    }
}

type Writers = Arc<Mutex<HashMap<SessionId, mpsc::UnboundedSender<Vec<u8>>>>>;

/// Shared between every endpoint of one node so session ids never collide.
#[derive(Debug, Clone, Default)]
pub struct SessionIds(Arc<AtomicU32>);

impl SessionIds {
    fn next(&self) -> SessionId {
        SessionId(self.0.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

/// One listening endpoint plus the channels it opened or accepted.
pub struct TcpTransport {
    local_id: DeviceId,
    peers: Arc<HashMap<DeviceId, PeerAddrs>>,
    ids: SessionIds,
    writers: Writers,
    events: mpsc::UnboundedSender<TransportEvent>,
    local_addr: SocketAddr,
}

impl TcpTransport {
    /// Binds `listen` and starts accepting channels.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::BindFailed`] if the address cannot be bound.
    pub async fn bind(
        local_id: DeviceId,
        listen: SocketAddr,
        peers: Arc<HashMap<DeviceId, PeerAddrs>>,
        ids: SessionIds,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Self, NetworkError> {
        let listener = TcpListener::bind(listen)
            .await
            .map_err(|source| NetworkError::BindFailed {
                addr: listen,
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| NetworkError::BindFailed {
                addr: listen,
                source,
            })?;
        info!(%local_addr, "endpoint listening");

        let writers: Writers = Arc::default();
        tokio::spawn(accept_loop(
            listener,
            ids.clone(),
            Arc::clone(&writers),
            events.clone(),
        ));

        Ok(Self {
            local_id,
            peers,
            ids,
            writers,
            events,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Transport for TcpTransport {
    fn open(&mut self, peer: &DeviceId, role: Role) -> Result<SessionId, TransportError> {
        let addr = self
            .peers
            .get(peer)
            .and_then(|p| p.for_role(role))
            .ok_or_else(|| TransportError::UnknownPeer(peer.clone()))?;

        let session = self.ids.next();
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.writers).insert(session, tx);

        tokio::spawn(connect(
            session,
            addr,
            self.local_id.clone(),
            rx,
            Arc::clone(&self.writers),
            self.events.clone(),
        ));
        debug!(%session, %peer, %addr, "connecting");
        Ok(session)
    }

    fn send(&mut self, session: SessionId, frame: Vec<u8>) -> Result<(), TransportError> {
        let writers = lock(&self.writers);
        let tx = writers
            .get(&session)
            .ok_or(TransportError::SessionClosed(session))?;
        tx.send(frame)
            .map_err(|_| TransportError::SessionClosed(session))
    }

    fn close(&mut self, session: SessionId) {
        // Dropping the sender ends the writer task, which shuts the stream down.
        lock(&self.writers).remove(&session);
    }
}

fn lock(writers: &Writers) -> MutexGuard<'_, HashMap<SessionId, mpsc::UnboundedSender<Vec<u8>>>> {
    writers.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn accept_loop(
    listener: TcpListener,
    ids: SessionIds,
    writers: Writers,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    loop {
        let (stream, remote) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("accept failed: {e}");
                continue;
            }
        };
        if events.is_closed() {
            debug!("endpoint closed; accept loop ending");
            break;
        }
        let ids = ids.clone();
        let writers = Arc::clone(&writers);
        let events = events.clone();
        tokio::spawn(async move {
            let (mut read, write) = stream.into_split();
            let peer = match read_preamble(&mut read).await {
                Ok(peer) => peer,
                Err(e) => {
                    warn!(%remote, "bad preamble: {e}");
                    return;
                }
            };
            let session = ids.next();
            let (tx, rx) = mpsc::unbounded_channel();
            lock(&writers).insert(session, tx);
            info!(%peer, %remote, %session, "channel accepted");
            if events.send(TransportEvent::Opened { session, peer }).is_err() {
                return;
            }
            tokio::spawn(write_frames(session, write, rx));
            read_frames(session, read, writers, events).await;
        });
    }
}

async fn connect(
    session: SessionId,
    addr: SocketAddr,
    local_id: DeviceId,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    writers: Writers,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let stream = match TcpStream::connect(addr).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(%session, %addr, "connect failed: {e}");
            lock(&writers).remove(&session);
            let _ = events.send(TransportEvent::Closed { session });
            return;
        }
    };
    let _ = stream.set_nodelay(true);
    let (read, mut write) = stream.into_split();
    if let Err(e) = write_preamble(&mut write, &local_id).await {
        warn!(%session, %addr, "preamble not sent: {e}");
        lock(&writers).remove(&session);
        let _ = events.send(TransportEvent::Closed { session });
        return;
    }
    tokio::spawn(write_frames(session, write, rx));
    read_frames(session, read, writers, events).await;
}

async fn write_preamble(write: &mut OwnedWriteHalf, id: &DeviceId) -> std::io::Result<()> {
    let bytes = id.as_str().as_bytes();
    let len = u16::try_from(bytes.len()).map_err(|_| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "device id too long")
    })?;
    write.write_all(&len.to_be_bytes()).await?;
    write.write_all(bytes).await
}

async fn read_preamble(read: &mut OwnedReadHalf) -> std::io::Result<DeviceId> {
    let len = read.read_u16().await? as usize;
    let mut buf = vec![0u8; len];
    read.read_exact(&mut buf).await?;
    let id = String::from_utf8(buf)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    Ok(DeviceId::new(id))
}

async fn write_frames(
    session: SessionId,
    mut write: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    while let Some(frame) = rx.recv().await {
        if let Err(e) = write.write_all(&frame).await {
            debug!(%session, "write failed: {e}");
            return;
        }
    }
    let _ = write.shutdown().await;
}

/// Reads frames until the stream ends, then reports the session closed.
async fn read_frames(
    session: SessionId,
    mut read: OwnedReadHalf,
    writers: Writers,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let mut header = [0u8; HEADER_SIZE];
    loop {
        if let Err(e) = read.read_exact(&mut header).await {
            debug!(%session, "stream ended: {e}");
            break;
        }
        let total = match frame_length(&header) {
            Ok(total) if total - HEADER_SIZE <= MAX_PAYLOAD => total,
            Ok(total) => {
                warn!(%session, size = total, "oversized frame; dropping channel");
                break;
            }
            Err(e) => {
                warn!(%session, "unframeable header; dropping channel: {e}");
                break;
            }
        };
        let mut frame = Vec::with_capacity(total);
        frame.extend_from_slice(&header);
        frame.resize(total, 0);
        if let Err(e) = read.read_exact(&mut frame[HEADER_SIZE..]).await {
            debug!(%session, "stream ended mid-frame: {e}");
            break;
        }
        if events
            .send(TransportEvent::Bytes {
                session,
                bytes: frame,
            })
            .is_err()
        {
            return;
        }
    }
    lock(&writers).remove(&session);
    let _ = events.send(TransportEvent::Closed { session });
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use tokio::time::timeout;

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> TransportEvent {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event within timeout")
            .expect("channel open")
    }

    #[tokio::test]
    async fn test_frames_cross_a_real_socket() {
        // Arrange
        let ids = SessionIds::default();
        let (sink_tx, mut sink_rx) = mpsc::unbounded_channel();
        let sink = TcpTransport::bind(
            "sink".into(),
            "127.0.0.1:0".parse().unwrap(),
            Arc::new(HashMap::new()),
            ids.clone(),
            sink_tx,
        )
        .await
        .unwrap();
        let peers: HashMap<DeviceId, PeerAddrs> = [(
            DeviceId::from("sink"),
            PeerAddrs {
                source: None,
                sink: Some(sink.local_addr()),
            },
        )]
        .into_iter()
        .collect();
        let (src_tx, _src_rx) = mpsc::unbounded_channel();
        let mut source = TcpTransport::bind(
            "src".into(),
            "127.0.0.1:0".parse().unwrap(),
            Arc::new(peers),
            ids,
            src_tx,
        )
        .await
        .unwrap();
        let frame = dinput_core::encode_message(
            &dinput_core::DInputMessage::Prepare(
                dinput_core::protocol::messages::SessionRequest {
                    device_id: "src".into(),
                },
            ),
            0,
            0,
        )
        .unwrap();

        // Act
        let session = source.open(&"sink".into(), Role::Sink).unwrap();
        source.send(session, frame.clone()).unwrap();

        // Assert
        let TransportEvent::Opened { session: accepted, peer } = next_event(&mut sink_rx).await
        else {
            panic!("expected Opened first");
        };
        assert_eq!(peer, DeviceId::from("src"));
        assert_eq!(
            next_event(&mut sink_rx).await,
            TransportEvent::Bytes {
                session: accepted,
                bytes: frame
            }
        );
    }

    #[tokio::test]
    async fn test_open_to_unknown_peer_fails_synchronously() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut transport = TcpTransport::bind(
            "src".into(),
            "127.0.0.1:0".parse().unwrap(),
            Arc::new(HashMap::new()),
            SessionIds::default(),
            tx,
        )
        .await
        .unwrap();

        let result = transport.open(&"nobody".into(), Role::Sink);

        assert_eq!(result, Err(TransportError::UnknownPeer("nobody".into())));
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported_as_closed() {
        // Arrange: bind then drop a listener so the port refuses connections
        let refused = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = refused.local_addr().unwrap();
        drop(refused);
        let peers: HashMap<DeviceId, PeerAddrs> = [(
            DeviceId::from("gone"),
            PeerAddrs {
                source: None,
                sink: Some(addr),
            },
        )]
        .into_iter()
        .collect();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut transport = TcpTransport::bind(
            "src".into(),
            "127.0.0.1:0".parse().unwrap(),
            Arc::new(peers),
            SessionIds::default(),
            tx,
        )
        .await
        .unwrap();

        // Act
        let session = transport.open(&"gone".into(), Role::Sink).unwrap();

        // Assert
        assert_eq!(next_event(&mut rx).await, TransportEvent::Closed { session });
    }
}
