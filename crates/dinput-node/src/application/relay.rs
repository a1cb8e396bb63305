//! RelayCorrelator: routes a sink's answer back to the node that asked a
//! relay to forward a request.
//!
//! # The relay hop (for beginners)
//!
//! ```text
//!  originator A            relay node B                 sink C
//!  ────────────            ────────────                 ──────
//!  RelayPrepare(B,C) ────► begin_relay(sA, B, C) = t
//!                          RelayedPrepare{t} ─────────► prepare as usual
//!                          complete_relay(t) ◄───────── OnRelayPrepared{t}
//!  RelayPrepareResult ◄─── (sent on sA)
//! ```
//!
//! Results name the source exactly as the originator did, since that name
//! is half of the originator's pending key.
//!
//! The token `t` is single-use.  If C answers twice, the second answer
//! finds no correlation and is dropped.  The correlator has no timers: when
//! a channel dies, the source controller drains the affected correlations
//! with [`abandon_target`](RelayCorrelator::abandon_target) or
//! [`abandon_origin`](RelayCorrelator::abandon_origin) and reports the
//! failures itself.

use std::collections::{BTreeSet, HashMap};

use dinput_core::protocol::messages::{
    DInputMessage, RelayHandleResult, RelayResult, RelayTypeResult,
};
use dinput_core::{DeviceId, HandleId, InputTypeMask, RelayToken, SessionId};
use tracing::{debug, warn};

use crate::application::channel_registry::ChannelRegistry;

/// The request a relay node forwarded, kept so a failure result of the right
/// shape can be synthesized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayRequest {
    Prepare,
    Unprepare,
    StartByType(InputTypeMask),
    StopByType(InputTypeMask),
    StartByHandles(BTreeSet<HandleId>),
    StopByHandles(BTreeSet<HandleId>),
}

impl RelayRequest {
    /// Builds the `*Result` message reporting `status` for this request with
    /// nothing granted.
    pub fn failure(&self, src_id: &DeviceId, sink_id: &DeviceId, status: i32) -> DInputMessage {
        let src_id = src_id.clone();
        let sink_id = sink_id.clone();
        match self {
            RelayRequest::Prepare => DInputMessage::RelayPrepareResult(RelayResult {
                src_id,
                sink_id,
                status,
            }),
            RelayRequest::Unprepare => DInputMessage::RelayUnprepareResult(RelayResult {
                src_id,
                sink_id,
                status,
            }),
            RelayRequest::StartByType(mask) => {
                DInputMessage::RelayStartByTypeResult(RelayTypeResult {
                    src_id,
                    sink_id,
                    status,
                    requested: *mask,
                    granted: InputTypeMask::NONE,
                })
            }
            RelayRequest::StopByType(mask) => DInputMessage::RelayStopByTypeResult(RelayTypeResult {
                src_id,
                sink_id,
                status,
                requested: *mask,
                granted: InputTypeMask::NONE,
            }),
            RelayRequest::StartByHandles(handles) => {
                DInputMessage::RelayStartByHandlesResult(RelayHandleResult {
                    src_id,
                    sink_id,
                    status,
                    requested: handles.clone(),
                    granted: BTreeSet::new(),
                })
            }
            RelayRequest::StopByHandles(handles) => {
                DInputMessage::RelayStopByHandlesResult(RelayHandleResult {
                    src_id,
                    sink_id,
                    status,
                    requested: handles.clone(),
                    granted: BTreeSet::new(),
                })
            }
        }
    }
}

/// One outstanding forwarded request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayCorrelation {
    /// Channel the original request arrived on; `None` once it closed.
    pub origin: Option<SessionId>,
    /// Source id as named in the original request, echoed in the result.
    pub src_id: DeviceId,
    /// Sink the request was forwarded to.
    pub target: DeviceId,
    pub request: RelayRequest,
}

/// Token-indexed table of outstanding relay hops.
#[derive(Debug, Default)]
pub struct RelayCorrelator {
    next_token: u64,
    live: HashMap<RelayToken, RelayCorrelation>,
}

impl RelayCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a forwarded request and mints its token.
    pub fn begin_relay(
        &mut self,
        origin: SessionId,
        src_id: DeviceId,
        target: DeviceId,
        request: RelayRequest,
    ) -> RelayToken {
        self.next_token = self.next_token.wrapping_add(1);
        let token = RelayToken(self.next_token);
        debug!(%token, %origin, %target, ?request, "relay started");
        self.live.insert(
            token,
            RelayCorrelation {
                origin: Some(origin),
                src_id,
                target,
                request,
            },
        );
        token
    }

    /// Returns the correlation for `token` without consuming it.
    pub fn peek(&self, token: RelayToken) -> Option<&RelayCorrelation> {
        self.live.get(&token)
    }

    /// Consumes `token` and sends the result built by `build` on the origin
    /// channel.
    ///
    /// Returns the consumed correlation, or `None` when the token is unknown
    /// (already completed or never issued).  When the origin channel has
    /// closed the token is still consumed but nothing is sent.
    pub fn complete_relay<F>(
        &mut self,
        token: RelayToken,
        registry: &mut ChannelRegistry,
        build: F,
    ) -> Option<RelayCorrelation>
    where
        F: FnOnce(&RelayCorrelation) -> DInputMessage,
    {
        let Some(correlation) = self.live.remove(&token) else {
            debug!(%token, "duplicate or unknown relay answer dropped");
            return None;
        };
        match correlation.origin {
            Some(origin) => {
                let result = build(&correlation);
                if let Err(e) = registry.send(origin, &result) {
                    warn!(%token, %origin, "relay result could not be delivered: {e}");
                }
            }
            None => debug!(%token, "relay origin gone; result not forwarded"),
        }
        Some(correlation)
    }

    /// Drains every correlation forwarded to `target`.
    pub fn abandon_target(&mut self, target: &DeviceId) -> Vec<(RelayToken, RelayCorrelation)> {
        let tokens: Vec<RelayToken> = self
            .live
            .iter()
            .filter(|(_, c)| &c.target == target)
            .map(|(t, _)| *t)
            .collect();
        let mut drained: Vec<(RelayToken, RelayCorrelation)> = tokens
            .into_iter()
            .filter_map(|t| self.live.remove(&t).map(|c| (t, c)))
            .collect();
        drained.sort_by_key(|(t, _)| *t);
        drained
    }

    /// Detaches every correlation whose origin is `session`.
    ///
    /// The tokens stay live so a late answer still updates the relay node's
    /// own state; only the forwarding is skipped.  Returns how many were
    /// detached.
    pub fn abandon_origin(&mut self, session: SessionId) -> usize {
        let mut detached = 0;
        for correlation in self.live.values_mut() {
            if correlation.origin == Some(session) {
                correlation.origin = None;
                detached += 1;
            }
        }
        detached
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}
