//! SinkController: the device-owning side of distributed input.
//!
//! A sink owns physical input devices.  Remote sources prepare a session
//! with it and then ask it to share devices by class or by handle.  A shared
//! device's events are captured by the [`HardwareCollector`] and forwarded
//! to the owning session's peer instead of being delivered locally.
//!
//! # Switch table
//!
//! Every prepared session has an entry (its *switch*) holding the handles
//! it owns.  A handle is owned by at most one session at a time.  The union
//! of all owned handles is the *global sharing set*; capture runs exactly
//! while that set is non-empty.
//!
//! ```text
//!  first handle granted   ──► start_capture()
//!  last handle released   ──► stop_capture()
//! ```
//!
//! Every ownership change is mirrored into the [`SharingStateTracker`]
//! (ThroughOut while owned, ThroughIn otherwise) and reported to registered
//! [`SharingListener`]s once per actual transition.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use dinput_core::protocol::messages::{
    status, DInputMessage, HandleReply, InputEventBatch, KeyStateBatch, LatencyMessage,
    PreparedReply, TypeReply, UnpreparedReply,
};
use dinput_core::{
    AllowList, DeviceId, DeviceInfo, HandleId, InputEvent, InputTypeMask, KeyStateEntry,
    RelayToken, SessionId, SharingState, SharingStateTracker,
};
use tracing::{debug, error, info, trace, warn};

use crate::application::channel_registry::ChannelRegistry;
use crate::application::error::{HardwareError, SharingError};

/// Physical input hardware on the sink machine.
#[cfg_attr(test, mockall::automock)]
pub trait HardwareCollector: Send {
    /// Devices whose class intersects `mask`, keyed by handle.
    fn list_devices_by_type(&self, mask: InputTypeMask) -> BTreeMap<HandleId, DeviceInfo>;

    /// The subset of `handles` that exists on this machine.
    fn list_devices_by_handle_ids(
        &self,
        handles: &BTreeSet<HandleId>,
    ) -> BTreeMap<HandleId, DeviceInfo>;

    /// Begins delivering captured events to the sink loop.
    fn start_capture(&mut self) -> Result<(), HardwareError>;

    fn stop_capture(&mut self);

    /// Keys currently held down on any of `handles`.
    fn pressed_keys(&self, handles: &BTreeSet<HandleId>) -> Vec<KeyStateEntry>;
}

/// Observer of per-handle sharing transitions.
pub trait SharingListener: Send {
    /// `handle` is now forwarded to a remote node.
    fn on_sharing(&mut self, handle: &HandleId);
    /// `handle` is delivered locally again.
    fn on_no_sharing(&mut self, handle: &HandleId);
}

/// Whether an answer goes straight back or through a relay token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Via {
    Direct,
    Relayed(RelayToken),
}

impl Via {
    fn prepared(self, reply: PreparedReply) -> DInputMessage {
        match self {
            Via::Direct => DInputMessage::OnPrepared(reply),
            Via::Relayed(token) => DInputMessage::OnRelayPrepared { token, reply },
        }
    }

    fn unprepared(self, reply: UnpreparedReply) -> DInputMessage {
        match self {
            Via::Direct => DInputMessage::OnUnprepared(reply),
            Via::Relayed(token) => DInputMessage::OnRelayUnprepared { token, reply },
        }
    }

    fn type_answer(self, starting: bool, reply: TypeReply) -> DInputMessage {
        match (self, starting) {
            (Via::Direct, true) => DInputMessage::OnStartedByType(reply),
            (Via::Direct, false) => DInputMessage::OnStoppedByType(reply),
            (Via::Relayed(token), true) => DInputMessage::OnRelayStartedByType { token, reply },
            (Via::Relayed(token), false) => DInputMessage::OnRelayStoppedByType { token, reply },
        }
    }

    fn handle_answer(self, starting: bool, reply: HandleReply) -> DInputMessage {
        match (self, starting) {
            (Via::Direct, true) => DInputMessage::OnStartedByHandles(reply),
            (Via::Direct, false) => DInputMessage::OnStoppedByHandles(reply),
            (Via::Relayed(token), true) => DInputMessage::OnRelayStartedByHandles { token, reply },
            (Via::Relayed(token), false) => {
                DInputMessage::OnRelayStoppedByHandles { token, reply }
            }
        }
    }
}

/// Switch-table entry for one prepared session.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SinkSession {
    peer: DeviceId,
    /// Owned handles with the device classes they were granted for.
    handles: BTreeMap<HandleId, InputTypeMask>,
}

impl SinkSession {
    fn is_active(&self) -> bool {
        !self.handles.is_empty()
    }
}

/// Sink-role controller.  Owned by the sink event loop.
pub struct SinkController {
    local_id: DeviceId,
    registry: ChannelRegistry,
    collector: Box<dyn HardwareCollector>,
    tracker: SharingStateTracker,
    sessions: HashMap<SessionId, SinkSession>,
    owner: HashMap<HandleId, SessionId>,
    capture_running: bool,
    listeners: Vec<Box<dyn SharingListener>>,
    allow_list: AllowList,
    batch_max: usize,
    outbox: HashMap<SessionId, Vec<InputEvent>>,
}

impl SinkController {
    pub fn new(
        local_id: DeviceId,
        registry: ChannelRegistry,
        collector: Box<dyn HardwareCollector>,
        allow_list: AllowList,
        batch_max: usize,
    ) -> Self {
        Self {
            local_id,
            registry,
            collector,
            tracker: SharingStateTracker::new(),
            sessions: HashMap::new(),
            owner: HashMap::new(),
            capture_running: false,
            listeners: Vec::new(),
            allow_list,
            batch_max: batch_max.max(1),
            outbox: HashMap::new(),
        }
    }

    pub fn register_listener(&mut self, listener: Box<dyn SharingListener>) {
        self.listeners.push(listener);
    }

    /// Every handle ever shared, with its current state.
    pub fn query_sharing_state(&self) -> BTreeMap<HandleId, SharingState> {
        self.tracker.snapshot()
    }

    pub fn is_capturing(&self) -> bool {
        self.capture_running
    }

    /// Handles owned by `session`, or `None` if it was never prepared.
    pub fn session_handles(&self, session: SessionId) -> Option<BTreeSet<HandleId>> {
        self.sessions
            .get(&session)
            .map(|s| s.handles.keys().cloned().collect())
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.values().filter(|s| s.is_active()).count()
    }

    // ── Channel lifecycle ─────────────────────────────────────────────────────

    pub fn on_channel_opened(&mut self, session: SessionId, peer: DeviceId) {
        self.registry.on_opened(session, peer);
    }

    /// Releases everything the closed channel's session owned.
    pub fn on_channel_closed(&mut self, session: SessionId) {
        let closed = self.registry.on_closed(session);
        self.outbox.remove(&session);
        let Some(entry) = self.sessions.get(&session) else {
            return;
        };
        let owned: BTreeSet<HandleId> = entry.handles.keys().cloned().collect();
        let peer = entry.peer.clone();
        let released = self.release(session, &owned, false);
        self.sessions.remove(&session);
        info!(
            %peer,
            %session,
            released = released.len(),
            known = closed.is_some(),
            "session closed; sharing released"
        );
    }

    // ── Inbound dispatch ──────────────────────────────────────────────────────

    /// Handles one decoded message that arrived on `session`.
    pub fn handle_message(&mut self, session: SessionId, msg: DInputMessage) {
        match msg {
            DInputMessage::Prepare(_) => self.on_prepare(session, Via::Direct),
            DInputMessage::Unprepare(_) => self.on_unprepare(session, Via::Direct),
            DInputMessage::StartByType(r) => {
                self.on_start_by_type(session, Via::Direct, r.input_types)
            }
            DInputMessage::StopByType(r) => {
                self.on_stop_by_type(session, Via::Direct, r.input_types)
            }
            DInputMessage::StartByHandles(r) => {
                self.on_start_by_handles(session, Via::Direct, r.handles)
            }
            DInputMessage::StopByHandles(r) => {
                self.on_stop_by_handles(session, Via::Direct, r.handles)
            }
            DInputMessage::LatencyProbe(probe) => {
                let echo = DInputMessage::LatencyEcho(LatencyMessage {
                    device_id: self.local_id.clone(),
                    sent_at_us: probe.sent_at_us,
                });
                self.reply(session, &echo);
            }

            DInputMessage::RelayedPrepare { token, .. } => {
                self.on_prepare(session, Via::Relayed(token))
            }
            DInputMessage::RelayedUnprepare { token, .. } => {
                self.on_unprepare(session, Via::Relayed(token))
            }
            DInputMessage::RelayedStartByType { token, request } => {
                self.on_start_by_type(session, Via::Relayed(token), request.input_types)
            }
            DInputMessage::RelayedStopByType { token, request } => {
                self.on_stop_by_type(session, Via::Relayed(token), request.input_types)
            }
            DInputMessage::RelayedStartByHandles { token, request } => {
                self.on_start_by_handles(session, Via::Relayed(token), request.handles)
            }
            DInputMessage::RelayedStopByHandles { token, request } => {
                self.on_stop_by_handles(session, Via::Relayed(token), request.handles)
            }

            other => {
                warn!(
                    %session,
                    command = ?other.command(),
                    "source-role message on sink endpoint dropped"
                );
            }
        }
    }

    fn on_prepare(&mut self, session: SessionId, via: Via) {
        let Some(peer) = self.registry.resolve_peer(session).cloned() else {
            warn!(%session, "prepare on unknown channel dropped");
            return;
        };
        self.sessions.entry(session).or_insert_with(|| {
            info!(%peer, %session, "session prepared");
            SinkSession {
                peer,
                handles: BTreeMap::new(),
            }
        });
        let reply = via.prepared(PreparedReply {
            device_id: self.local_id.clone(),
            status: status::OK,
            allow_list: self.allow_list.clone(),
        });
        self.reply(session, &reply);
    }

    fn on_unprepare(&mut self, session: SessionId, via: Via) {
        let code = match self.sessions.get(&session) {
            None => SharingError::NotPrepared.status_code(),
            Some(entry) => {
                let owned: BTreeSet<HandleId> = entry.handles.keys().cloned().collect();
                self.release(session, &owned, true);
                self.flush_session(session);
                self.sessions.remove(&session);
                self.outbox.remove(&session);
                info!(%session, "session unprepared");
                status::OK
            }
        };
        let reply = via.unprepared(UnpreparedReply {
            device_id: self.local_id.clone(),
            status: code,
        });
        self.reply(session, &reply);
    }

    fn on_start_by_type(&mut self, session: SessionId, via: Via, mask: InputTypeMask) {
        let candidates: BTreeMap<HandleId, InputTypeMask> = self
            .collector
            .list_devices_by_type(mask)
            .into_iter()
            .filter(|(_, info)| info.types.intersects(mask))
            .map(|(handle, info)| (handle, info.types & mask))
            .collect();
        let (code, granted) = match self.grant(session, candidates) {
            Ok(granted) => (
                status::OK,
                granted
                    .values()
                    .fold(InputTypeMask::NONE, |acc, types| acc | *types),
            ),
            Err(e) => (e.status_code(), InputTypeMask::NONE),
        };
        let reply = via.type_answer(
            true,
            TypeReply {
                device_id: self.local_id.clone(),
                status: code,
                requested: mask,
                granted,
            },
        );
        self.reply(session, &reply);
    }

    fn on_start_by_handles(&mut self, session: SessionId, via: Via, handles: BTreeSet<HandleId>) {
        let candidates: BTreeMap<HandleId, InputTypeMask> = self
            .collector
            .list_devices_by_handle_ids(&handles)
            .into_iter()
            .filter(|(handle, _)| handles.contains(handle))
            .map(|(handle, info)| (handle, info.types))
            .collect();
        let (code, granted) = match self.grant(session, candidates) {
            Ok(granted) => (status::OK, granted.into_keys().collect()),
            Err(e) => (e.status_code(), BTreeSet::new()),
        };
        let reply = via.handle_answer(
            true,
            HandleReply {
                device_id: self.local_id.clone(),
                status: code,
                requested: handles,
                granted,
            },
        );
        self.reply(session, &reply);
    }

    /// Withdraws the classes in `mask` from every owned handle.  A handle is
    /// released only once none of its shared classes remain.
    fn on_stop_by_type(&mut self, session: SessionId, via: Via, mask: InputTypeMask) {
        let (code, stopped) = match self.sessions.get_mut(&session) {
            None => (SharingError::SwitchNotFound.status_code(), InputTypeMask::NONE),
            Some(entry) => {
                let mut stopped = InputTypeMask::NONE;
                let mut emptied = BTreeSet::new();
                for (handle, types) in entry.handles.iter_mut() {
                    if !types.intersects(mask) {
                        continue;
                    }
                    stopped = stopped | (*types & mask);
                    *types = types.without(mask);
                    if types.is_empty() {
                        emptied.insert(handle.clone());
                    }
                }
                self.release(session, &emptied, true);
                (status::OK, stopped)
            }
        };
        let reply = via.type_answer(
            false,
            TypeReply {
                device_id: self.local_id.clone(),
                status: code,
                requested: mask,
                granted: stopped,
            },
        );
        self.reply(session, &reply);
    }

    fn on_stop_by_handles(&mut self, session: SessionId, via: Via, handles: BTreeSet<HandleId>) {
        let (code, stopped) = if self.sessions.contains_key(&session) {
            let released = self.release(session, &handles, true);
            (status::OK, released.into_keys().collect())
        } else {
            (SharingError::SwitchNotFound.status_code(), BTreeSet::new())
        };
        let reply = via.handle_answer(
            false,
            HandleReply {
                device_id: self.local_id.clone(),
                status: code,
                requested: handles,
                granted: stopped,
            },
        );
        self.reply(session, &reply);
    }

    // ── Switch table ──────────────────────────────────────────────────────────

    /// Gives `session` every candidate not owned by another session.
    ///
    /// `candidates` carry the classes each handle is shared for; a handle the
    /// session already owns gains the new classes.  Returns the granted
    /// handles with the classes granted by this call.
    fn grant(
        &mut self,
        session: SessionId,
        candidates: BTreeMap<HandleId, InputTypeMask>,
    ) -> Result<BTreeMap<HandleId, InputTypeMask>, SharingError> {
        if !self.sessions.contains_key(&session) {
            debug!(%session, "start on unprepared session");
            return Err(SharingError::SwitchNotFound);
        }

        let granted: BTreeMap<HandleId, InputTypeMask> = candidates
            .into_iter()
            .filter(|(handle, _)| match self.owner.get(handle) {
                None => true,
                Some(holder) => *holder == session,
            })
            .collect();

        if !granted.is_empty() && !self.capture_running {
            if let Err(e) = self.collector.start_capture() {
                error!(%session, "capture could not start: {e}");
                return Err(SharingError::CaptureFailed);
            }
            self.capture_running = true;
            info!("capture started");
        }

        let Some(entry) = self.sessions.get_mut(&session) else {
            return Err(SharingError::SwitchNotFound);
        };
        let mut newly = Vec::new();
        for (handle, types) in &granted {
            match entry.handles.get_mut(handle) {
                Some(owned) => *owned = *owned | *types,
                None => {
                    entry.handles.insert(handle.clone(), *types);
                    self.owner.insert(handle.clone(), session);
                    newly.push(handle.clone());
                }
            }
        }
        let changed = self.tracker.mark_through_out(&newly);
        for handle in &changed {
            for listener in &mut self.listeners {
                listener.on_sharing(handle);
            }
        }
        info!(%session, granted = granted.len(), newly = newly.len(), "sharing granted");
        Ok(granted)
    }

    /// Takes `requested ∩ owned` away from `session`.
    ///
    /// Reports held keys first when `report_keys` is set.  Stops capture
    /// when the global sharing set becomes empty.  Returns the released
    /// handles with their device classes.
    fn release(
        &mut self,
        session: SessionId,
        requested: &BTreeSet<HandleId>,
        report_keys: bool,
    ) -> BTreeMap<HandleId, InputTypeMask> {
        let Some(entry) = self.sessions.get_mut(&session) else {
            return BTreeMap::new();
        };
        let released: BTreeMap<HandleId, InputTypeMask> = requested
            .iter()
            .filter_map(|h| entry.handles.remove(h).map(|types| (h.clone(), types)))
            .collect();
        if released.is_empty() {
            debug!(%session, "stop released nothing");
            return released;
        }

        let handles: BTreeSet<HandleId> = released.keys().cloned().collect();
        if report_keys {
            self.flush_session(session);
            self.report_held_keys(session, &handles);
        }

        for handle in &handles {
            self.owner.remove(handle);
        }
        if let Some(buffered) = self.outbox.get_mut(&session) {
            buffered.retain(|e| !handles.contains(&e.handle));
        }
        let changed = self.tracker.mark_through_in(&handles);
        for handle in &changed {
            for listener in &mut self.listeners {
                listener.on_no_sharing(handle);
            }
        }
        info!(%session, released = handles.len(), "sharing released");

        if self.owner.is_empty() && self.capture_running {
            self.collector.stop_capture();
            self.capture_running = false;
            info!("global sharing set empty; capture stopped");
        }
        released
    }

    fn report_held_keys(&mut self, session: SessionId, handles: &BTreeSet<HandleId>) {
        let mut entries = self.collector.pressed_keys(handles);
        let msg = match entries.len() {
            0 => return,
            1 => DInputMessage::KeyState {
                device_id: self.local_id.clone(),
                entry: entries.remove(0),
            },
            _ => DInputMessage::KeyStateBatch(KeyStateBatch {
                device_id: self.local_id.clone(),
                entries,
            }),
        };
        self.reply(session, &msg);
    }

    // ── Captured input ────────────────────────────────────────────────────────

    /// Routes one captured event by its handle's sharing state.
    ///
    /// ThroughOut events are buffered for the owning session and sent once
    /// `batch_max` accumulate or [`flush_events`](Self::flush_events) runs.
    /// ThroughIn events are left for local delivery.
    pub fn on_captured(&mut self, event: InputEvent) -> SharingState {
        if self.tracker.state_of(&event.handle) != SharingState::ThroughOut {
            return SharingState::ThroughIn;
        }
        let Some(session) = self.owner.get(&event.handle).copied() else {
            return SharingState::ThroughIn;
        };
        let buffered = self.outbox.entry(session).or_default();
        buffered.push(event);
        if buffered.len() >= self.batch_max {
            self.flush_session(session);
        }
        SharingState::ThroughOut
    }

    /// Sends every buffered event batch.
    pub fn flush_events(&mut self) {
        let sessions: Vec<SessionId> = self
            .outbox
            .iter()
            .filter(|(_, events)| !events.is_empty())
            .map(|(session, _)| *session)
            .collect();
        for session in sessions {
            self.flush_session(session);
        }
    }

    fn flush_session(&mut self, session: SessionId) {
        let Some(buffered) = self.outbox.get_mut(&session) else {
            return;
        };
        if buffered.is_empty() {
            return;
        }
        let events = std::mem::take(buffered);
        trace!(%session, count = events.len(), "flushing input batch");
        let batch = DInputMessage::InputEventBatch(InputEventBatch {
            device_id: self.local_id.clone(),
            events,
        });
        self.reply(session, &batch);
    }

    fn reply(&mut self, session: SessionId, msg: &DInputMessage) {
        if let Err(e) = self.registry.send(session, msg) {
            warn!(%session, command = ?msg.command(), "reply not sent: {e}");
        }
    }
}
