//! SourceController: the requesting side of distributed input.
//!
//! A source asks remote sinks to share their physical devices and injects
//! the events it receives through an [`EventInjector`].  It also serves as a
//! relay node: another source may ask it to request devices from a third
//! node on its behalf.
//!
//! # Request lifecycle
//!
//! Every public request follows the same path:
//!
//! 1. Refuse synchronously if an identical request is outstanding
//!    (`AlreadyPending`) or the peer is not in the right state.
//! 2. Open (or reuse) the channel and send the request.
//! 3. Park the completion in a [`PendingMap`] keyed by the request content.
//! 4. Complete it when the matching answer arrives, or with `Disconnected`
//!    when the channel closes first.
//!
//! A refused request still has its completion invoked, with the same error
//! that is returned, so every completion runs exactly once.
//!
//! # State updates use the acknowledged subset
//!
//! `SourceSessionState` only ever reflects what a sink *answered*: the
//! granted mask or handle set from the answer, never what was asked for.

use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;
use std::time::Duration;

use dinput_core::domain::event::{event_type, key_value};
use dinput_core::protocol::codec::now_us;
use dinput_core::protocol::messages::{
    status, DInputMessage, HandleReply, HandleRequest, LatencyMessage, RelayHandleRequest,
    RelayHandleResult, RelayResult, RelayTarget, RelayTypeRequest, RelayTypeResult, Role,
    SessionRequest, TypeReply, TypeRequest,
};
use dinput_core::{
    AllowList, DeviceId, HandleId, InputEvent, InputTypeMask, KeyStateEntry, RelayToken,
    SessionId,
};
use tracing::{debug, info, warn};

use crate::application::channel_registry::ChannelRegistry;
use crate::application::error::{HardwareError, SharingError};
use crate::application::pending::{Completion, PendingMap};
use crate::application::relay::{RelayCorrelator, RelayRequest};

/// Local injection of events received from a sink.
pub trait EventInjector: Send {
    /// Replays one event on the virtual device standing in for `from`'s
    /// physical device.
    fn inject_event(&mut self, from: &DeviceId, event: &InputEvent) -> Result<(), HardwareError>;
}

/// What this node believes a sink currently shares with it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceSessionState {
    pub shared_types: InputTypeMask,
    pub sharing_handles: BTreeSet<HandleId>,
}

impl SourceSessionState {
    pub fn is_sharing(&self) -> bool {
        !self.shared_types.is_empty() || !self.sharing_handles.is_empty()
    }
}

type TypeKey = (DeviceId, InputTypeMask);
type HandleKey = (DeviceId, BTreeSet<HandleId>);
type RelayKey = (DeviceId, DeviceId);
type RelayTypeKey = (DeviceId, DeviceId, InputTypeMask);
type RelayHandleKey = (DeviceId, DeviceId, BTreeSet<HandleId>);

#[derive(Default)]
struct SourcePending {
    prepare: PendingMap<DeviceId, AllowList>,
    unprepare: PendingMap<DeviceId, ()>,
    start_by_type: PendingMap<TypeKey, InputTypeMask>,
    stop_by_type: PendingMap<TypeKey, InputTypeMask>,
    start_by_handles: PendingMap<HandleKey, BTreeSet<HandleId>>,
    stop_by_handles: PendingMap<HandleKey, BTreeSet<HandleId>>,
    relay_prepare: PendingMap<RelayKey, ()>,
    relay_unprepare: PendingMap<RelayKey, ()>,
    relay_start_by_type: PendingMap<RelayTypeKey, InputTypeMask>,
    relay_stop_by_type: PendingMap<RelayTypeKey, InputTypeMask>,
    relay_start_by_handles: PendingMap<RelayHandleKey, BTreeSet<HandleId>>,
    relay_stop_by_handles: PendingMap<RelayHandleKey, BTreeSet<HandleId>>,
}

impl SourcePending {
    /// Fails every direct request addressed to `sink`.
    fn fail_sink(&mut self, sink: &DeviceId, error: &SharingError) -> usize {
        self.prepare.fail_where(|k| k == sink, error)
            + self.unprepare.fail_where(|k| k == sink, error)
            + self.start_by_type.fail_where(|(p, _)| p == sink, error)
            + self.stop_by_type.fail_where(|(p, _)| p == sink, error)
            + self.start_by_handles.fail_where(|(p, _)| p == sink, error)
            + self.stop_by_handles.fail_where(|(p, _)| p == sink, error)
    }

    /// Fails every relay request sent through `relay_node`.
    fn fail_relay_node(&mut self, relay_node: &DeviceId, error: &SharingError) -> usize {
        self.relay_prepare.fail_where(|(s, _)| s == relay_node, error)
            + self.relay_unprepare.fail_where(|(s, _)| s == relay_node, error)
            + self.relay_start_by_type.fail_where(|(s, _, _)| s == relay_node, error)
            + self.relay_stop_by_type.fail_where(|(s, _, _)| s == relay_node, error)
            + self.relay_start_by_handles.fail_where(|(s, _, _)| s == relay_node, error)
            + self.relay_stop_by_handles.fail_where(|(s, _, _)| s == relay_node, error)
    }
}

/// Invokes `completion` with `error` and returns the same error.
fn refuse<T>(completion: Completion<T>, error: SharingError) -> Result<(), SharingError> {
    completion(Err(error.clone()));
    Err(error)
}

/// Shared send-and-park path for every outgoing request.
fn submit<K, T, F>(
    registry: &mut ChannelRegistry,
    pending: &mut PendingMap<K, T>,
    key: K,
    channel: F,
    msg: &DInputMessage,
    completion: Completion<T>,
) -> Result<(), SharingError>
where
    K: Eq + Hash,
    F: FnOnce(&mut ChannelRegistry) -> Result<SessionId, SharingError>,
{
    if pending.contains(&key) {
        return refuse(completion, SharingError::AlreadyPending);
    }
    let session = match channel(registry) {
        Ok(session) => session,
        Err(e) => return refuse(completion, e),
    };
    if let Err(e) = registry.send(session, msg) {
        return refuse(completion, e);
    }
    pending.insert(key, completion);
    Ok(())
}

/// Source-role controller.  Owned by the source event loop.
pub struct SourceController {
    local_id: DeviceId,
    registry: ChannelRegistry,
    injector: Box<dyn EventInjector>,
    sessions: HashMap<DeviceId, SourceSessionState>,
    pending: SourcePending,
    relay: RelayCorrelator,
    latencies: HashMap<DeviceId, Duration>,
}

impl SourceController {
    pub fn new(
        local_id: DeviceId,
        registry: ChannelRegistry,
        injector: Box<dyn EventInjector>,
    ) -> Self {
        Self {
            local_id,
            registry,
            injector,
            sessions: HashMap::new(),
            pending: SourcePending::default(),
            relay: RelayCorrelator::new(),
            latencies: HashMap::new(),
        }
    }

    pub fn local_id(&self) -> &DeviceId {
        &self.local_id
    }

    /// Snapshot of what `sink` currently shares with this node.
    pub fn source_state(&self, sink: &DeviceId) -> Option<SourceSessionState> {
        self.sessions.get(sink).cloned()
    }

    /// Last measured round-trip time to `sink`.
    pub fn latency_of(&self, sink: &DeviceId) -> Option<Duration> {
        self.latencies.get(sink).copied()
    }

    /// Number of relay hops this node is currently forwarding.
    pub fn relays_in_flight(&self) -> usize {
        self.relay.len()
    }

    // ── Direct requests ───────────────────────────────────────────────────────

    /// Opens a session with `sink`.  Completes with the sink's allow-list.
    pub fn prepare(
        &mut self,
        sink: &DeviceId,
        completion: Completion<AllowList>,
    ) -> Result<(), SharingError> {
        let msg = DInputMessage::Prepare(SessionRequest {
            device_id: self.local_id.clone(),
        });
        submit(
            &mut self.registry,
            &mut self.pending.prepare,
            sink.clone(),
            |reg| reg.open(sink, Role::Sink),
            &msg,
            completion,
        )?;
        info!(%sink, "prepare requested");
        Ok(())
    }

    /// Tears down the session with `sink`.
    pub fn unprepare(
        &mut self,
        sink: &DeviceId,
        completion: Completion<()>,
    ) -> Result<(), SharingError> {
        let msg = DInputMessage::Unprepare(SessionRequest {
            device_id: self.local_id.clone(),
        });
        submit(
            &mut self.registry,
            &mut self.pending.unprepare,
            sink.clone(),
            |reg| {
                reg.resolve_channel(sink, Role::Sink)
                    .ok_or(SharingError::NotPrepared)
            },
            &msg,
            completion,
        )?;
        info!(%sink, "unprepare requested");
        Ok(())
    }

    /// Asks `sink` to share every device of the classes in `mask`.
    ///
    /// Completes with the mask the sink actually granted.
    pub fn start_by_type(
        &mut self,
        sink: &DeviceId,
        mask: InputTypeMask,
        completion: Completion<InputTypeMask>,
    ) -> Result<(), SharingError> {
        let msg = DInputMessage::StartByType(TypeRequest {
            device_id: self.local_id.clone(),
            input_types: mask,
        });
        let prepared = self.sessions.contains_key(sink);
        submit(
            &mut self.registry,
            &mut self.pending.start_by_type,
            (sink.clone(), mask),
            |reg| prepared_channel(reg, sink, prepared),
            &msg,
            completion,
        )?;
        debug!(%sink, %mask, "start by type requested");
        Ok(())
    }

    /// Asks `sink` to stop sharing the classes in `mask`.
    ///
    /// Completes with the mask the sink actually stopped.
    pub fn stop_by_type(
        &mut self,
        sink: &DeviceId,
        mask: InputTypeMask,
        completion: Completion<InputTypeMask>,
    ) -> Result<(), SharingError> {
        let msg = DInputMessage::StopByType(TypeRequest {
            device_id: self.local_id.clone(),
            input_types: mask,
        });
        let prepared = self.sessions.contains_key(sink);
        submit(
            &mut self.registry,
            &mut self.pending.stop_by_type,
            (sink.clone(), mask),
            |reg| prepared_channel(reg, sink, prepared),
            &msg,
            completion,
        )?;
        debug!(%sink, %mask, "stop by type requested");
        Ok(())
    }

    /// Asks `sink` to share exactly the listed handles.
    pub fn start_by_handles(
        &mut self,
        sink: &DeviceId,
        handles: BTreeSet<HandleId>,
        completion: Completion<BTreeSet<HandleId>>,
    ) -> Result<(), SharingError> {
        let msg = DInputMessage::StartByHandles(HandleRequest {
            device_id: self.local_id.clone(),
            handles: handles.clone(),
        });
        let prepared = self.sessions.contains_key(sink);
        submit(
            &mut self.registry,
            &mut self.pending.start_by_handles,
            (sink.clone(), handles),
            |reg| prepared_channel(reg, sink, prepared),
            &msg,
            completion,
        )?;
        debug!(%sink, "start by handles requested");
        Ok(())
    }

    /// Asks `sink` to stop sharing the listed handles.
    pub fn stop_by_handles(
        &mut self,
        sink: &DeviceId,
        handles: BTreeSet<HandleId>,
        completion: Completion<BTreeSet<HandleId>>,
    ) -> Result<(), SharingError> {
        let msg = DInputMessage::StopByHandles(HandleRequest {
            device_id: self.local_id.clone(),
            handles: handles.clone(),
        });
        let prepared = self.sessions.contains_key(sink);
        submit(
            &mut self.registry,
            &mut self.pending.stop_by_handles,
            (sink.clone(), handles),
            |reg| prepared_channel(reg, sink, prepared),
            &msg,
            completion,
        )?;
        debug!(%sink, "stop by handles requested");
        Ok(())
    }

    // ── Relay requests (this node is the originator) ─────────────────────────

    /// Asks `src` to prepare `sink` on this node's behalf.
    pub fn relay_prepare(
        &mut self,
        src: &DeviceId,
        sink: &DeviceId,
        completion: Completion<()>,
    ) -> Result<(), SharingError> {
        let msg = DInputMessage::RelayPrepare(self.relay_target(src, sink));
        submit(
            &mut self.registry,
            &mut self.pending.relay_prepare,
            (src.clone(), sink.clone()),
            |reg| reg.open(src, Role::Source),
            &msg,
            completion,
        )
    }

    pub fn relay_unprepare(
        &mut self,
        src: &DeviceId,
        sink: &DeviceId,
        completion: Completion<()>,
    ) -> Result<(), SharingError> {
        let msg = DInputMessage::RelayUnprepare(self.relay_target(src, sink));
        submit(
            &mut self.registry,
            &mut self.pending.relay_unprepare,
            (src.clone(), sink.clone()),
            |reg| reg.open(src, Role::Source),
            &msg,
            completion,
        )
    }

    pub fn relay_start_by_type(
        &mut self,
        src: &DeviceId,
        sink: &DeviceId,
        mask: InputTypeMask,
        completion: Completion<InputTypeMask>,
    ) -> Result<(), SharingError> {
        let msg = DInputMessage::RelayStartByType(self.relay_type_request(src, sink, mask));
        submit(
            &mut self.registry,
            &mut self.pending.relay_start_by_type,
            (src.clone(), sink.clone(), mask),
            |reg| reg.open(src, Role::Source),
            &msg,
            completion,
        )
    }

    pub fn relay_stop_by_type(
        &mut self,
        src: &DeviceId,
        sink: &DeviceId,
        mask: InputTypeMask,
        completion: Completion<InputTypeMask>,
    ) -> Result<(), SharingError> {
        let msg = DInputMessage::RelayStopByType(self.relay_type_request(src, sink, mask));
        submit(
            &mut self.registry,
            &mut self.pending.relay_stop_by_type,
            (src.clone(), sink.clone(), mask),
            |reg| reg.open(src, Role::Source),
            &msg,
            completion,
        )
    }

    pub fn relay_start_by_handles(
        &mut self,
        src: &DeviceId,
        sink: &DeviceId,
        handles: BTreeSet<HandleId>,
        completion: Completion<BTreeSet<HandleId>>,
    ) -> Result<(), SharingError> {
        let msg = DInputMessage::RelayStartByHandles(self.relay_handle_request(
            src,
            sink,
            handles.clone(),
        ));
        submit(
            &mut self.registry,
            &mut self.pending.relay_start_by_handles,
            (src.clone(), sink.clone(), handles),
            |reg| reg.open(src, Role::Source),
            &msg,
            completion,
        )
    }

    pub fn relay_stop_by_handles(
        &mut self,
        src: &DeviceId,
        sink: &DeviceId,
        handles: BTreeSet<HandleId>,
        completion: Completion<BTreeSet<HandleId>>,
    ) -> Result<(), SharingError> {
        let msg = DInputMessage::RelayStopByHandles(self.relay_handle_request(
            src,
            sink,
            handles.clone(),
        ));
        submit(
            &mut self.registry,
            &mut self.pending.relay_stop_by_handles,
            (src.clone(), sink.clone(), handles),
            |reg| reg.open(src, Role::Source),
            &msg,
            completion,
        )
    }

    fn relay_target(&self, src: &DeviceId, sink: &DeviceId) -> RelayTarget {
        RelayTarget {
            device_id: self.local_id.clone(),
            src_id: src.clone(),
            sink_id: sink.clone(),
        }
    }

    fn relay_type_request(
        &self,
        src: &DeviceId,
        sink: &DeviceId,
        mask: InputTypeMask,
    ) -> RelayTypeRequest {
        RelayTypeRequest {
            device_id: self.local_id.clone(),
            src_id: src.clone(),
            sink_id: sink.clone(),
            input_types: mask,
        }
    }

    fn relay_handle_request(
        &self,
        src: &DeviceId,
        sink: &DeviceId,
        handles: BTreeSet<HandleId>,
    ) -> RelayHandleRequest {
        RelayHandleRequest {
            device_id: self.local_id.clone(),
            src_id: src.clone(),
            sink_id: sink.clone(),
            handles,
        }
    }

    // ── Channel lifecycle ─────────────────────────────────────────────────────

    pub fn on_channel_opened(&mut self, session: SessionId, peer: DeviceId) {
        self.registry.on_opened(session, peer);
    }

    /// Cleans up after a channel the transport reports as gone.
    pub fn on_channel_closed(&mut self, session: SessionId) {
        let Some(closed) = self.registry.on_closed(session) else {
            return;
        };
        match (closed.remote_role, closed.outbound) {
            (Role::Sink, _) => {
                info!(sink = %closed.peer, "sink disconnected");
                self.drop_sink(&closed.peer);
            }
            (Role::Source, true) => {
                let failed = self
                    .pending
                    .fail_relay_node(&closed.peer, &SharingError::Disconnected);
                info!(relay = %closed.peer, failed, "relay node disconnected");
            }
            (Role::Source, false) => {
                let detached = self.relay.abandon_origin(session);
                info!(origin = %closed.peer, detached, "relay originator disconnected");
            }
        }
    }

    /// Forgets everything about `sink` and fails what depended on it.
    fn drop_sink(&mut self, sink: &DeviceId) {
        self.sessions.remove(sink);
        self.latencies.remove(sink);
        let failed = self.pending.fail_sink(sink, &SharingError::Disconnected);
        if failed > 0 {
            debug!(%sink, failed, "pending requests failed with Disconnected");
        }
        for (token, correlation) in self.relay.abandon_target(sink) {
            let Some(origin) = correlation.origin else {
                continue;
            };
            let failure = correlation
                .request
                .failure(&correlation.src_id, sink, status::DISCONNECTED);
            if let Err(e) = self.registry.send(origin, &failure) {
                warn!(%token, "could not report relay failure: {e}");
            }
        }
    }

    /// Ends the session with `sink` after it acknowledged an unprepare.
    fn retire_sink(&mut self, sink: &DeviceId) {
        self.drop_sink(sink);
        self.registry.close(sink, Role::Sink);
        info!(%sink, "session closed");
    }

    // ── Background ticks ──────────────────────────────────────────────────────

    /// Sends a latency probe to every sink that currently shares something.
    pub fn on_latency_tick(&mut self, now: u64) {
        for (sink, state) in &self.sessions {
            if !state.is_sharing() {
                continue;
            }
            let Some(session) = self.registry.resolve_channel(sink, Role::Sink) else {
                continue;
            };
            let probe = DInputMessage::LatencyProbe(LatencyMessage {
                device_id: self.local_id.clone(),
                sent_at_us: now,
            });
            if let Err(e) = self.registry.send(session, &probe) {
                debug!(%sink, "latency probe not sent: {e}");
            }
        }
    }

    // ── Inbound dispatch ──────────────────────────────────────────────────────

    /// Handles one decoded message that arrived on `session`.
    pub fn handle_message(&mut self, session: SessionId, msg: DInputMessage) {
        let Some(peer) = self.registry.resolve_peer(session).cloned() else {
            warn!(%session, command = ?msg.command(), "message on unknown channel dropped");
            return;
        };

        match msg {
            DInputMessage::OnPrepared(reply) => {
                let result = SharingError::check_status(reply.status).map(|()| reply.allow_list);
                if result.is_ok() {
                    self.sessions.entry(peer.clone()).or_default();
                    info!(sink = %peer, "sink prepared");
                }
                if !self.pending.prepare.complete(&peer, result) {
                    warn!(sink = %peer, "unsolicited OnPrepared");
                }
            }
            DInputMessage::OnUnprepared(reply) => {
                let result = SharingError::check_status(reply.status);
                let ok = result.is_ok();
                if !self.pending.unprepare.complete(&peer, result) {
                    warn!(sink = %peer, "unsolicited OnUnprepared");
                }
                if ok {
                    self.retire_sink(&peer);
                }
            }
            DInputMessage::OnStartedByType(reply) => self.on_type_answer(&peer, reply, true),
            DInputMessage::OnStoppedByType(reply) => self.on_type_answer(&peer, reply, false),
            DInputMessage::OnStartedByHandles(reply) => self.on_handle_answer(&peer, reply, true),
            DInputMessage::OnStoppedByHandles(reply) => {
                self.on_handle_answer(&peer, reply, false)
            }
            DInputMessage::KeyState { entry, .. } => self.release_keys(&peer, vec![entry]),
            DInputMessage::KeyStateBatch(batch) => self.release_keys(&peer, batch.entries),
            DInputMessage::InputEventBatch(batch) => self.inject(&peer, &batch.events),
            DInputMessage::LatencyEcho(echo) => {
                let rtt = Duration::from_micros(now_us().saturating_sub(echo.sent_at_us));
                debug!(sink = %peer, ?rtt, "latency measured");
                self.latencies.insert(peer, rtt);
            }

            // Answers from a sink to a request this node relayed.
            DInputMessage::OnRelayPrepared { token, reply } => {
                if !self.accept_relay_answer(&peer, token) {
                    return;
                }
                if reply.status == status::OK {
                    self.sessions.entry(peer.clone()).or_default();
                }
                self.relay.complete_relay(token, &mut self.registry, |c| {
                    DInputMessage::RelayPrepareResult(RelayResult {
                        src_id: c.src_id.clone(),
                        sink_id: c.target.clone(),
                        status: reply.status,
                    })
                });
            }
            DInputMessage::OnRelayUnprepared { token, reply } => {
                if !self.accept_relay_answer(&peer, token) {
                    return;
                }
                self.relay.complete_relay(token, &mut self.registry, |c| {
                    DInputMessage::RelayUnprepareResult(RelayResult {
                        src_id: c.src_id.clone(),
                        sink_id: c.target.clone(),
                        status: reply.status,
                    })
                });
                if reply.status == status::OK {
                    self.retire_sink(&peer);
                }
            }
            DInputMessage::OnRelayStartedByType { token, reply } => {
                self.on_relay_type_answer(&peer, token, reply, true)
            }
            DInputMessage::OnRelayStoppedByType { token, reply } => {
                self.on_relay_type_answer(&peer, token, reply, false)
            }
            DInputMessage::OnRelayStartedByHandles { token, reply } => {
                self.on_relay_handle_answer(&peer, token, reply, true)
            }
            DInputMessage::OnRelayStoppedByHandles { token, reply } => {
                self.on_relay_handle_answer(&peer, token, reply, false)
            }

            // Requests from an originator asking this node to relay.
            DInputMessage::RelayPrepare(t) => {
                self.forward_relay(session, t.src_id, t.sink_id, RelayRequest::Prepare)
            }
            DInputMessage::RelayUnprepare(t) => {
                self.forward_relay(session, t.src_id, t.sink_id, RelayRequest::Unprepare)
            }
            DInputMessage::RelayStartByType(r) => self.forward_relay(
                session,
                r.src_id,
                r.sink_id,
                RelayRequest::StartByType(r.input_types),
            ),
            DInputMessage::RelayStopByType(r) => self.forward_relay(
                session,
                r.src_id,
                r.sink_id,
                RelayRequest::StopByType(r.input_types),
            ),
            DInputMessage::RelayStartByHandles(r) => self.forward_relay(
                session,
                r.src_id,
                r.sink_id,
                RelayRequest::StartByHandles(r.handles),
            ),
            DInputMessage::RelayStopByHandles(r) => self.forward_relay(
                session,
                r.src_id,
                r.sink_id,
                RelayRequest::StopByHandles(r.handles),
            ),

            // Results from a relay node for requests this node originated.
            DInputMessage::RelayPrepareResult(r) => {
                let key = (r.src_id, r.sink_id);
                let done = self
                    .pending
                    .relay_prepare
                    .complete(&key, SharingError::check_status(r.status));
                log_unmatched_relay_result(done, &key.0, &key.1);
            }
            DInputMessage::RelayUnprepareResult(r) => {
                let key = (r.src_id, r.sink_id);
                let done = self
                    .pending
                    .relay_unprepare
                    .complete(&key, SharingError::check_status(r.status));
                log_unmatched_relay_result(done, &key.0, &key.1);
            }
            DInputMessage::RelayStartByTypeResult(r) => {
                let done = complete_relay_type(&mut self.pending.relay_start_by_type, r);
                log_unmatched_relay_result(done.0, &done.1, &done.2);
            }
            DInputMessage::RelayStopByTypeResult(r) => {
                let done = complete_relay_type(&mut self.pending.relay_stop_by_type, r);
                log_unmatched_relay_result(done.0, &done.1, &done.2);
            }
            DInputMessage::RelayStartByHandlesResult(r) => {
                let done = complete_relay_handles(&mut self.pending.relay_start_by_handles, r);
                log_unmatched_relay_result(done.0, &done.1, &done.2);
            }
            DInputMessage::RelayStopByHandlesResult(r) => {
                let done = complete_relay_handles(&mut self.pending.relay_stop_by_handles, r);
                log_unmatched_relay_result(done.0, &done.1, &done.2);
            }

            DInputMessage::Prepare(_)
            | DInputMessage::Unprepare(_)
            | DInputMessage::StartByType(_)
            | DInputMessage::StopByType(_)
            | DInputMessage::StartByHandles(_)
            | DInputMessage::StopByHandles(_)
            | DInputMessage::LatencyProbe(_)
            | DInputMessage::RelayedPrepare { .. }
            | DInputMessage::RelayedUnprepare { .. }
            | DInputMessage::RelayedStartByType { .. }
            | DInputMessage::RelayedStopByType { .. }
            | DInputMessage::RelayedStartByHandles { .. }
            | DInputMessage::RelayedStopByHandles { .. } => {
                warn!(
                    %peer,
                    command = ?msg.command(),
                    "sink-role message on source endpoint dropped"
                );
            }
        }
    }

    fn on_type_answer(&mut self, peer: &DeviceId, reply: TypeReply, starting: bool) {
        let result = SharingError::check_status(reply.status).map(|()| reply.granted);
        if result.is_ok() {
            if let Some(state) = self.sessions.get_mut(peer) {
                state.shared_types = if starting {
                    state.shared_types | reply.granted
                } else {
                    state.shared_types.without(reply.granted)
                };
                info!(sink = %peer, shared = %state.shared_types, "shared types updated");
            }
        }
        let pending = if starting {
            &mut self.pending.start_by_type
        } else {
            &mut self.pending.stop_by_type
        };
        if !pending.complete(&(peer.clone(), reply.requested), result) {
            warn!(sink = %peer, requested = %reply.requested, "answer matches no pending request");
        }
    }

    fn on_handle_answer(&mut self, peer: &DeviceId, reply: HandleReply, starting: bool) {
        let result = SharingError::check_status(reply.status).map(|()| reply.granted.clone());
        if result.is_ok() {
            if let Some(state) = self.sessions.get_mut(peer) {
                if starting {
                    state.sharing_handles.extend(reply.granted.iter().cloned());
                } else {
                    for handle in &reply.granted {
                        state.sharing_handles.remove(handle);
                    }
                }
                info!(
                    sink = %peer,
                    sharing = state.sharing_handles.len(),
                    "shared handles updated"
                );
            }
        }
        let pending = if starting {
            &mut self.pending.start_by_handles
        } else {
            &mut self.pending.stop_by_handles
        };
        if !pending.complete(&(peer.clone(), reply.requested), result) {
            warn!(sink = %peer, "answer matches no pending request");
        }
    }

    fn inject(&mut self, peer: &DeviceId, events: &[InputEvent]) {
        if !self.sessions.contains_key(peer) {
            debug!(sink = %peer, count = events.len(), "events from unprepared peer dropped");
            return;
        }
        for event in events {
            if let Err(e) = self.injector.inject_event(peer, event) {
                warn!(sink = %peer, handle = %event.handle, "injection failed: {e}");
            }
        }
    }

    /// Injects a release for every key the sink reported as still held.
    fn release_keys(&mut self, peer: &DeviceId, entries: Vec<KeyStateEntry>) {
        let when_us = now_us();
        let releases: Vec<InputEvent> = entries
            .into_iter()
            .filter(|k| k.value != key_value::RELEASED)
            .map(|k| InputEvent {
                handle: k.handle,
                event_type: event_type::EV_KEY,
                code: k.code,
                value: key_value::RELEASED,
                when_us,
            })
            .collect();
        debug!(sink = %peer, count = releases.len(), "releasing held keys");
        self.inject(peer, &releases);
    }

    // ── Relay node side ───────────────────────────────────────────────────────

    /// Forwards an originator's request to the target sink.
    fn forward_relay(
        &mut self,
        origin: SessionId,
        src_id: DeviceId,
        sink_id: DeviceId,
        request: RelayRequest,
    ) {
        if src_id != self.local_id {
            debug!(
                %src_id,
                local = %self.local_id,
                "relay request names another source; serving it here"
            );
        }

        if let Err(e) = self.registry.open(&sink_id, Role::Sink) {
            let failure = request.failure(&src_id, &sink_id, e.status_code());
            if let Err(e) = self.registry.send(origin, &failure) {
                warn!(%origin, "could not report relay failure: {e}");
            }
            return;
        }
        let Some(channel) = self.registry.resolve_channel(&sink_id, Role::Sink) else {
            return;
        };

        let token = self
            .relay
            .begin_relay(origin, src_id, sink_id.clone(), request.clone());
        let forwarded = self.relayed_message(token, &request);
        if let Err(e) = self.registry.send(channel, &forwarded) {
            let code = e.status_code();
            self.relay.complete_relay(token, &mut self.registry, |c| {
                c.request.failure(&c.src_id, &c.target, code)
            });
            return;
        }
        info!(%token, sink = %sink_id, ?request, "relay forwarded");
    }

    fn relayed_message(&self, token: RelayToken, request: &RelayRequest) -> DInputMessage {
        let device_id = self.local_id.clone();
        match request {
            RelayRequest::Prepare => DInputMessage::RelayedPrepare {
                token,
                request: SessionRequest { device_id },
            },
            RelayRequest::Unprepare => DInputMessage::RelayedUnprepare {
                token,
                request: SessionRequest { device_id },
            },
            RelayRequest::StartByType(mask) => DInputMessage::RelayedStartByType {
                token,
                request: TypeRequest {
                    device_id,
                    input_types: *mask,
                },
            },
            RelayRequest::StopByType(mask) => DInputMessage::RelayedStopByType {
                token,
                request: TypeRequest {
                    device_id,
                    input_types: *mask,
                },
            },
            RelayRequest::StartByHandles(handles) => DInputMessage::RelayedStartByHandles {
                token,
                request: HandleRequest {
                    device_id,
                    handles: handles.clone(),
                },
            },
            RelayRequest::StopByHandles(handles) => DInputMessage::RelayedStopByHandles {
                token,
                request: HandleRequest {
                    device_id,
                    handles: handles.clone(),
                },
            },
        }
    }

    /// Returns `true` when `token` is live and was forwarded to `peer`.
    fn accept_relay_answer(&self, peer: &DeviceId, token: RelayToken) -> bool {
        match self.relay.peek(token) {
            None => {
                debug!(%token, sink = %peer, "duplicate or unknown relay answer dropped");
                false
            }
            Some(c) if &c.target != peer => {
                warn!(
                    %token,
                    sink = %peer,
                    expected = %c.target,
                    "relay answer from wrong sink dropped"
                );
                false
            }
            Some(_) => true,
        }
    }

    fn on_relay_type_answer(
        &mut self,
        peer: &DeviceId,
        token: RelayToken,
        reply: TypeReply,
        starting: bool,
    ) {
        if !self.accept_relay_answer(peer, token) {
            return;
        }
        if reply.status == status::OK {
            if let Some(state) = self.sessions.get_mut(peer) {
                state.shared_types = if starting {
                    state.shared_types | reply.granted
                } else {
                    state.shared_types.without(reply.granted)
                };
            }
        }
        self.relay.complete_relay(token, &mut self.registry, |c| {
            let result = RelayTypeResult {
                src_id: c.src_id.clone(),
                sink_id: c.target.clone(),
                status: reply.status,
                requested: reply.requested,
                granted: reply.granted,
            };
            if starting {
                DInputMessage::RelayStartByTypeResult(result)
            } else {
                DInputMessage::RelayStopByTypeResult(result)
            }
        });
    }

    fn on_relay_handle_answer(
        &mut self,
        peer: &DeviceId,
        token: RelayToken,
        reply: HandleReply,
        starting: bool,
    ) {
        if !self.accept_relay_answer(peer, token) {
            return;
        }
        if reply.status == status::OK {
            if let Some(state) = self.sessions.get_mut(peer) {
                if starting {
                    state.sharing_handles.extend(reply.granted.iter().cloned());
                } else {
                    for handle in &reply.granted {
                        state.sharing_handles.remove(handle);
                    }
                }
            }
        }
        self.relay.complete_relay(token, &mut self.registry, |c| {
            let result = RelayHandleResult {
                src_id: c.src_id.clone(),
                sink_id: c.target.clone(),
                status: reply.status,
                requested: reply.requested,
                granted: reply.granted,
            };
            if starting {
                DInputMessage::RelayStartByHandlesResult(result)
            } else {
                DInputMessage::RelayStopByHandlesResult(result)
            }
        });
    }
}

/// Channel for a request that needs a prepared sink.
fn prepared_channel(
    registry: &mut ChannelRegistry,
    sink: &DeviceId,
    prepared: bool,
) -> Result<SessionId, SharingError> {
    if !prepared {
        return Err(SharingError::NotPrepared);
    }
    registry
        .resolve_channel(sink, Role::Sink)
        .ok_or(SharingError::NotPrepared)
}

fn complete_relay_type(
    pending: &mut PendingMap<RelayTypeKey, InputTypeMask>,
    r: RelayTypeResult,
) -> (bool, DeviceId, DeviceId) {
    let result = SharingError::check_status(r.status).map(|()| r.granted);
    let key = (r.src_id, r.sink_id, r.requested);
    let done = pending.complete(&key, result);
    (done, key.0, key.1)
}

fn complete_relay_handles(
    pending: &mut PendingMap<RelayHandleKey, BTreeSet<HandleId>>,
    r: RelayHandleResult,
) -> (bool, DeviceId, DeviceId) {
    let result = SharingError::check_status(r.status).map(|()| r.granted);
    let key = (r.src_id, r.sink_id, r.requested);
    let done = pending.complete(&key, result);
    (done, key.0, key.1)
}

fn log_unmatched_relay_result(done: bool, src: &DeviceId, sink: &DeviceId) {
    if !done {
        warn!(%src, %sink, "relay result matches no pending request");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::application::test_support::{recorder, take_sent, RecordingTransport, Shared};
    use dinput_core::protocol::messages::{InputEventBatch, PreparedReply, UnpreparedReply};

    struct RecordingInjector {
        injected: Shared<(DeviceId, InputEvent)>,
    }

    impl EventInjector for RecordingInjector {
        fn inject_event(
            &mut self,
            from: &DeviceId,
            event: &InputEvent,
        ) -> Result<(), HardwareError> {
            self.injected
                .lock()
                .unwrap()
                .push((from.clone(), event.clone()));
            Ok(())
        }
    }

    struct Harness {
        controller: SourceController,
        sent: Shared<(SessionId, Vec<u8>)>,
        closed: Shared<SessionId>,
        injected: Shared<(DeviceId, InputEvent)>,
    }

    fn harness(transport: RecordingTransport) -> Harness {
        let sent = transport.sent();
        let closed = transport.closed();
        let injected: Shared<(DeviceId, InputEvent)> = Arc::new(Mutex::new(Vec::new()));
        let injector = RecordingInjector {
            injected: Arc::clone(&injected),
        };
        let controller = SourceController::new(
            DeviceId::from("b"),
            ChannelRegistry::new(Box::new(transport)),
            Box::new(injector),
        );
        Harness {
            controller,
            sent,
            closed,
            injected,
        }
    }

    fn sink() -> DeviceId {
        DeviceId::from("sink-1")
    }

    fn handles(ids: &[&str]) -> BTreeSet<HandleId> {
        ids.iter().map(|h| HandleId::from(*h)).collect()
    }

    fn prepared_reply(status: i32) -> DInputMessage {
        DInputMessage::OnPrepared(PreparedReply {
            device_id: sink(),
            status,
            allow_list: vec![vec![30, 31]],
        })
    }

    /// Prepares `sink-1` and returns the channel it lives on.
    fn prepare_sink(h: &mut Harness) -> SessionId {
        let (done, _log) = recorder::<AllowList>();
        h.controller.prepare(&sink(), done).unwrap();
        let session = take_sent(&h.sent)[0].0;
        h.controller.handle_message(session, prepared_reply(status::OK));
        session
    }

    fn type_reply(requested: InputTypeMask, granted: InputTypeMask) -> TypeReply {
        TypeReply {
            device_id: sink(),
            status: status::OK,
            requested,
            granted,
        }
    }

    #[test]
    fn test_prepare_completes_with_allow_list_and_creates_state() {
        // Arrange
        let mut h = harness(RecordingTransport::new());
        let (done, log) = recorder::<AllowList>();

        // Act
        h.controller.prepare(&sink(), done).unwrap();
        let frames = take_sent(&h.sent);
        h.controller.handle_message(frames[0].0, prepared_reply(status::OK));

        // Assert
        assert!(matches!(frames[0].1, DInputMessage::Prepare(_)));
        assert_eq!(*log.lock().unwrap(), vec![Ok(vec![vec![30, 31]])]);
        assert_eq!(
            h.controller.source_state(&sink()),
            Some(SourceSessionState::default())
        );
    }

    #[test]
    fn test_duplicate_prepare_is_refused_and_first_still_succeeds() {
        // Arrange
        let mut h = harness(RecordingTransport::new());
        let (first, first_log) = recorder::<AllowList>();
        let (second, second_log) = recorder::<AllowList>();
        h.controller.prepare(&sink(), first).unwrap();

        // Act
        let refused = h.controller.prepare(&sink(), second);
        let session = take_sent(&h.sent)[0].0;
        h.controller.handle_message(session, prepared_reply(status::OK));

        // Assert
        assert_eq!(refused, Err(SharingError::AlreadyPending));
        assert_eq!(
            *second_log.lock().unwrap(),
            vec![Err(SharingError::AlreadyPending)]
        );
        assert_eq!(first_log.lock().unwrap().len(), 1);
        assert!(first_log.lock().unwrap()[0].is_ok());
    }

    #[test]
    fn test_prepare_to_unreachable_sink_fails_synchronously() {
        let mut h = harness(RecordingTransport::new().refusing("sink-1"));
        let (done, log) = recorder::<AllowList>();

        let result = h.controller.prepare(&sink(), done);

        assert!(matches!(result, Err(SharingError::ChannelOpenError(_))));
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_start_before_prepare_is_not_prepared() {
        let mut h = harness(RecordingTransport::new());
        let (done, log) = recorder::<InputTypeMask>();

        let result = h
            .controller
            .start_by_type(&sink(), InputTypeMask::MOUSE, done);

        assert_eq!(result, Err(SharingError::NotPrepared));
        assert_eq!(*log.lock().unwrap(), vec![Err(SharingError::NotPrepared)]);
        assert!(take_sent(&h.sent).is_empty());
    }

    #[test]
    fn test_stop_subset_leaves_remaining_types_shared() {
        // Arrange
        let mut h = harness(RecordingTransport::new());
        let session = prepare_sink(&mut h);
        let both = InputTypeMask::MOUSE | InputTypeMask::KEYBOARD;
        let (start, start_log) = recorder::<InputTypeMask>();
        let (stop, stop_log) = recorder::<InputTypeMask>();

        // Act
        h.controller.start_by_type(&sink(), both, start).unwrap();
        h.controller
            .handle_message(session, DInputMessage::OnStartedByType(type_reply(both, both)));
        h.controller
            .stop_by_type(&sink(), InputTypeMask::MOUSE, stop)
            .unwrap();
        h.controller.handle_message(
            session,
            DInputMessage::OnStoppedByType(type_reply(InputTypeMask::MOUSE, InputTypeMask::MOUSE)),
        );

        // Assert
        assert_eq!(*start_log.lock().unwrap(), vec![Ok(both)]);
        assert_eq!(*stop_log.lock().unwrap(), vec![Ok(InputTypeMask::MOUSE)]);
        let state = h.controller.source_state(&sink()).unwrap();
        assert_eq!(state.shared_types, InputTypeMask::KEYBOARD);
    }

    #[test]
    fn test_state_follows_granted_not_requested() {
        let mut h = harness(RecordingTransport::new());
        let session = prepare_sink(&mut h);
        let (start, log) = recorder::<BTreeSet<HandleId>>();

        h.controller
            .start_by_handles(&sink(), handles(&["H1", "H2"]), start)
            .unwrap();
        h.controller.handle_message(
            session,
            DInputMessage::OnStartedByHandles(HandleReply {
                device_id: sink(),
                status: status::OK,
                requested: handles(&["H1", "H2"]),
                granted: handles(&["H1"]),
            }),
        );

        assert_eq!(*log.lock().unwrap(), vec![Ok(handles(&["H1"]))]);
        let state = h.controller.source_state(&sink()).unwrap();
        assert_eq!(state.sharing_handles, handles(&["H1"]));
    }

    #[test]
    fn test_answer_with_different_requested_mask_completes_nothing() {
        let mut h = harness(RecordingTransport::new());
        let session = prepare_sink(&mut h);
        let (start, log) = recorder::<InputTypeMask>();
        h.controller
            .start_by_type(&sink(), InputTypeMask::MOUSE, start)
            .unwrap();

        h.controller.handle_message(
            session,
            DInputMessage::OnStartedByType(type_reply(
                InputTypeMask::KEYBOARD,
                InputTypeMask::KEYBOARD,
            )),
        );

        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_failure_status_maps_to_error() {
        let mut h = harness(RecordingTransport::new());
        let (done, log) = recorder::<AllowList>();
        h.controller.prepare(&sink(), done).unwrap();
        let session = take_sent(&h.sent)[0].0;

        h.controller
            .handle_message(session, prepared_reply(status::SWITCH_NOT_FOUND));

        assert_eq!(*log.lock().unwrap(), vec![Err(SharingError::SwitchNotFound)]);
        assert_eq!(h.controller.source_state(&sink()), None);
    }

    #[test]
    fn test_disconnect_fails_pending_and_drops_state() {
        // Arrange
        let mut h = harness(RecordingTransport::new());
        let session = prepare_sink(&mut h);
        let (start, log) = recorder::<InputTypeMask>();
        h.controller
            .start_by_type(&sink(), InputTypeMask::MOUSE, start)
            .unwrap();

        // Act
        h.controller.on_channel_closed(session);

        // Assert
        assert_eq!(*log.lock().unwrap(), vec![Err(SharingError::Disconnected)]);
        assert_eq!(h.controller.source_state(&sink()), None);
    }

    #[test]
    fn test_unprepare_success_closes_channel() {
        let mut h = harness(RecordingTransport::new());
        let session = prepare_sink(&mut h);
        let (done, log) = recorder::<()>();

        h.controller.unprepare(&sink(), done).unwrap();
        h.controller.handle_message(
            session,
            DInputMessage::OnUnprepared(UnpreparedReply {
                device_id: sink(),
                status: status::OK,
            }),
        );

        assert_eq!(*log.lock().unwrap(), vec![Ok(())]);
        assert_eq!(*h.closed.lock().unwrap(), vec![session]);
        assert_eq!(h.controller.source_state(&sink()), None);
    }

    #[test]
    fn test_unprepare_without_channel_is_not_prepared() {
        let mut h = harness(RecordingTransport::new());
        let (done, _log) = recorder::<()>();

        assert_eq!(
            h.controller.unprepare(&sink(), done),
            Err(SharingError::NotPrepared)
        );
    }

    #[test]
    fn test_events_are_injected_only_for_prepared_sinks() {
        // Arrange
        let mut h = harness(RecordingTransport::new());
        let event = InputEvent {
            handle: HandleId::from("H1"),
            event_type: event_type::EV_REL,
            code: 0,
            value: 5,
            when_us: 1,
        };
        let batch = DInputMessage::InputEventBatch(InputEventBatch {
            device_id: sink(),
            events: vec![event.clone()],
        });
        h.controller.on_channel_opened(SessionId(9), DeviceId::from("stranger"));

        // Act
        h.controller.handle_message(SessionId(9), batch.clone());
        let session = prepare_sink(&mut h);
        h.controller.handle_message(session, batch);

        // Assert
        assert_eq!(*h.injected.lock().unwrap(), vec![(sink(), event)]);
    }

    #[test]
    fn test_key_state_injects_release() {
        let mut h = harness(RecordingTransport::new());
        let session = prepare_sink(&mut h);

        h.controller.handle_message(
            session,
            DInputMessage::KeyState {
                device_id: sink(),
                entry: KeyStateEntry {
                    handle: HandleId::from("kbd"),
                    code: 30,
                    value: key_value::PRESSED,
                },
            },
        );

        let injected = h.injected.lock().unwrap();
        assert_eq!(injected.len(), 1);
        assert_eq!(injected[0].1.event_type, event_type::EV_KEY);
        assert_eq!(injected[0].1.code, 30);
        assert_eq!(injected[0].1.value, key_value::RELEASED);
    }

    #[test]
    fn test_latency_probe_only_goes_to_sharing_sinks() {
        // Arrange
        let mut h = harness(RecordingTransport::new());
        let session = prepare_sink(&mut h);
        take_sent(&h.sent);

        // Act: nothing shared yet
        h.controller.on_latency_tick(1_000);
        let idle = take_sent(&h.sent);

        let (start, _log) = recorder::<InputTypeMask>();
        h.controller
            .start_by_type(&sink(), InputTypeMask::MOUSE, start)
            .unwrap();
        h.controller.handle_message(
            session,
            DInputMessage::OnStartedByType(type_reply(InputTypeMask::MOUSE, InputTypeMask::MOUSE)),
        );
        take_sent(&h.sent);
        h.controller.on_latency_tick(2_000);

        // Assert
        assert!(idle.is_empty());
        let frames = take_sent(&h.sent);
        assert_eq!(frames.len(), 1);
        assert!(matches!(
            &frames[0].1,
            DInputMessage::LatencyProbe(p) if p.sent_at_us == 2_000
        ));
    }

    // ── Relay node ────────────────────────────────────────────────────────────

    const ORIGIN: SessionId = SessionId(5);

    fn relay_node(transport: RecordingTransport) -> Harness {
        let mut h = harness(transport.with_inbound(ORIGIN));
        h.controller.on_channel_opened(ORIGIN, DeviceId::from("a"));
        h
    }

    fn relay_prepare_request() -> DInputMessage {
        DInputMessage::RelayPrepare(RelayTarget {
            device_id: DeviceId::from("a"),
            src_id: DeviceId::from("b"),
            sink_id: DeviceId::from("c"),
        })
    }

    #[test]
    fn test_relay_node_forwards_and_answers_exactly_once() {
        // Arrange
        let mut h = relay_node(RecordingTransport::new());

        // Act
        h.controller.handle_message(ORIGIN, relay_prepare_request());
        let forwarded = take_sent(&h.sent);
        let (to_c, token) = match &forwarded[..] {
            [(session, DInputMessage::RelayedPrepare { token, request })] => {
                assert_eq!(request.device_id, DeviceId::from("b"));
                (*session, *token)
            }
            other => panic!("unexpected frames {other:?}"),
        };
        let answer = DInputMessage::OnRelayPrepared {
            token,
            reply: PreparedReply {
                device_id: DeviceId::from("c"),
                status: status::OK,
                allow_list: vec![],
            },
        };
        h.controller.handle_message(to_c, answer.clone());
        h.controller.handle_message(to_c, answer);

        // Assert
        let results = take_sent(&h.sent);
        assert_eq!(results.len(), 1, "duplicate answer must not produce a second result");
        assert_eq!(results[0].0, ORIGIN);
        assert!(matches!(
            &results[0].1,
            DInputMessage::RelayPrepareResult(r)
                if r.status == status::OK
                    && r.src_id == DeviceId::from("b")
                    && r.sink_id == DeviceId::from("c")
        ));
        assert_eq!(h.controller.relays_in_flight(), 0);
        assert!(h.controller.source_state(&DeviceId::from("c")).is_some());
    }

    #[test]
    fn test_relay_result_echoes_the_source_id_the_originator_named() {
        // Arrange: the originator knows this node as "laptop-alias"
        let mut h = relay_node(RecordingTransport::new());
        let request = DInputMessage::RelayStartByType(RelayTypeRequest {
            device_id: DeviceId::from("a"),
            src_id: DeviceId::from("laptop-alias"),
            sink_id: DeviceId::from("c"),
            input_types: InputTypeMask::MOUSE,
        });

        // Act
        h.controller.handle_message(ORIGIN, request);
        let (to_c, token) = match &take_sent(&h.sent)[..] {
            [(session, DInputMessage::RelayedStartByType { token, .. })] => (*session, *token),
            other => panic!("unexpected frames {other:?}"),
        };
        h.controller.handle_message(
            to_c,
            DInputMessage::OnRelayStartedByType {
                token,
                reply: TypeReply {
                    device_id: DeviceId::from("c"),
                    status: status::OK,
                    requested: InputTypeMask::MOUSE,
                    granted: InputTypeMask::MOUSE,
                },
            },
        );

        // Assert
        let results = take_sent(&h.sent);
        assert_eq!(results.len(), 1);
        assert!(matches!(
            &results[0].1,
            DInputMessage::RelayStartByTypeResult(r)
                if r.src_id == DeviceId::from("laptop-alias") && r.granted == InputTypeMask::MOUSE
        ));
    }

    #[test]
    fn test_relay_failure_echoes_the_source_id_the_originator_named() {
        let mut h = relay_node(RecordingTransport::new().refusing("c"));

        h.controller.handle_message(
            ORIGIN,
            DInputMessage::RelayPrepare(RelayTarget {
                device_id: DeviceId::from("a"),
                src_id: DeviceId::from("laptop-alias"),
                sink_id: DeviceId::from("c"),
            }),
        );

        let results = take_sent(&h.sent);
        assert!(matches!(
            &results[..],
            [(_, DInputMessage::RelayPrepareResult(r))]
                if r.src_id == DeviceId::from("laptop-alias") && r.status != status::OK
        ));
    }

    #[test]
    fn test_relay_node_reports_unreachable_target_immediately() {
        let mut h = relay_node(RecordingTransport::new().refusing("c"));

        h.controller.handle_message(ORIGIN, relay_prepare_request());

        let results = take_sent(&h.sent);
        assert_eq!(results.len(), 1);
        assert!(matches!(
            &results[0].1,
            DInputMessage::RelayPrepareResult(r) if r.status == status::CHANNEL_OPEN_FAILED
        ));
        assert_eq!(h.controller.relays_in_flight(), 0);
    }

    #[test]
    fn test_relay_target_disconnect_reports_failure_to_origin() {
        // Arrange
        let mut h = relay_node(RecordingTransport::new());
        h.controller.handle_message(
            ORIGIN,
            DInputMessage::RelayStartByType(RelayTypeRequest {
                device_id: DeviceId::from("a"),
                src_id: DeviceId::from("b"),
                sink_id: DeviceId::from("c"),
                input_types: InputTypeMask::KEYBOARD,
            }),
        );
        let to_c = take_sent(&h.sent)[0].0;

        // Act
        h.controller.on_channel_closed(to_c);

        // Assert
        let results = take_sent(&h.sent);
        assert_eq!(results.len(), 1);
        assert!(matches!(
            &results[0].1,
            DInputMessage::RelayStartByTypeResult(r)
                if r.status == status::DISCONNECTED && r.requested == InputTypeMask::KEYBOARD
        ));
    }

    #[test]
    fn test_relay_answer_after_origin_closed_updates_state_silently() {
        let mut h = relay_node(RecordingTransport::new());
        h.controller.handle_message(ORIGIN, relay_prepare_request());
        let forwarded = take_sent(&h.sent);
        let (to_c, token) = match &forwarded[..] {
            [(session, DInputMessage::RelayedPrepare { token, .. })] => (*session, *token),
            other => panic!("unexpected frames {other:?}"),
        };

        h.controller.on_channel_closed(ORIGIN);
        h.controller.handle_message(
            to_c,
            DInputMessage::OnRelayPrepared {
                token,
                reply: PreparedReply {
                    device_id: DeviceId::from("c"),
                    status: status::OK,
                    allow_list: vec![],
                },
            },
        );

        assert!(take_sent(&h.sent).is_empty());
        assert!(h.controller.source_state(&DeviceId::from("c")).is_some());
    }

    // ── Relay originator ──────────────────────────────────────────────────────

    #[test]
    fn test_originator_completes_from_relay_result() {
        // Arrange
        let mut h = harness(RecordingTransport::new());
        let (done, log) = recorder::<InputTypeMask>();
        let relay = DeviceId::from("relay");
        let target = DeviceId::from("c");

        // Act
        h.controller
            .relay_start_by_type(&relay, &target, InputTypeMask::MOUSE, done)
            .unwrap();
        let session = take_sent(&h.sent)[0].0;
        h.controller.handle_message(
            session,
            DInputMessage::RelayStartByTypeResult(RelayTypeResult {
                src_id: relay.clone(),
                sink_id: target.clone(),
                status: status::OK,
                requested: InputTypeMask::MOUSE,
                granted: InputTypeMask::MOUSE,
            }),
        );

        // Assert
        assert_eq!(*log.lock().unwrap(), vec![Ok(InputTypeMask::MOUSE)]);
    }

    #[test]
    fn test_originator_pending_fails_when_relay_node_drops() {
        let mut h = harness(RecordingTransport::new());
        let (done, log) = recorder::<()>();
        h.controller
            .relay_prepare(&DeviceId::from("relay"), &DeviceId::from("c"), done)
            .unwrap();
        let session = take_sent(&h.sent)[0].0;

        h.controller.on_channel_closed(session);

        assert_eq!(*log.lock().unwrap(), vec![Err(SharingError::Disconnected)]);
    }
}
