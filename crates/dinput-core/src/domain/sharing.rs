//! Sharing state tracker: which device handles are forwarded to a remote node.
//!
//! # Through-out vs through-in (for beginners)
//!
//! While a sink shares a physical device, the events it produces must *not*
//! also be delivered to the sink's own desktop, otherwise the mouse would
//! move on both machines at once.  Each handle therefore has one of two
//! states:
//!
//! ```text
//! ThroughIn  ──markThroughOut──►  ThroughOut
//!     ▲                               │
//!     └──────────markThroughIn────────┘
//! ```
//!
//! - `ThroughIn`: events stay local (the default for any handle never seen).
//! - `ThroughOut`: events are swallowed locally and forwarded to a remote node.
//!
//! The hardware-collector boundary queries [`SharingStateTracker::state_of`]
//! for every captured event; it is the only place that decision is made.

use std::collections::{BTreeMap, HashMap};

use crate::domain::ids::HandleId;

/// Sharing state of one device handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SharingState {
    /// Events are forwarded to a remote node.
    ThroughOut,
    /// Events are delivered locally.
    ThroughIn,
}

/// Canonical per-handle sharing state.
///
/// Entries are created lazily on first mark and only ever overwritten.
#[derive(Debug, Default)]
pub struct SharingStateTracker {
    states: HashMap<HandleId, SharingState>,
}

impl SharingStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks every handle as forwarded.
    ///
    /// Returns the handles whose state actually changed, in input order.
    pub fn mark_through_out<'a, I>(&mut self, handles: I) -> Vec<HandleId>
    where
        I: IntoIterator<Item = &'a HandleId>,
    {
        self.mark(handles, SharingState::ThroughOut)
    }

    /// Marks every handle as local.
    ///
    /// Returns the handles whose state actually changed.  A handle seen for
    /// the first time is recorded but not reported, since it was already
    /// local by default.
    pub fn mark_through_in<'a, I>(&mut self, handles: I) -> Vec<HandleId>
    where
        I: IntoIterator<Item = &'a HandleId>,
    {
        self.mark(handles, SharingState::ThroughIn)
    }

    /// Returns the state of `handle`, defaulting to `ThroughIn` when unknown.
    pub fn state_of(&self, handle: &HandleId) -> SharingState {
        self.states
            .get(handle)
            .copied()
            .unwrap_or(SharingState::ThroughIn)
    }

    /// Returns every handle currently forwarded.
    pub fn through_out_handles(&self) -> Vec<HandleId> {
        let mut handles: Vec<HandleId> = self
            .states
            .iter()
            .filter(|(_, state)| **state == SharingState::ThroughOut)
            .map(|(handle, _)| handle.clone())
            .collect();
        handles.sort();
        handles
    }

    /// Returns every handle ever marked together with its current state.
    pub fn snapshot(&self) -> BTreeMap<HandleId, SharingState> {
        self.states
            .iter()
            .map(|(handle, state)| (handle.clone(), *state))
            .collect()
    }

    fn mark<'a, I>(&mut self, handles: I, target: SharingState) -> Vec<HandleId>
    where
        I: IntoIterator<Item = &'a HandleId>,
    {
        let mut changed = Vec::new();
        for handle in handles {
            let previous = self.states.insert(handle.clone(), target);
            let before = previous.unwrap_or(SharingState::ThroughIn);
            if before != target {
                changed.push(handle.clone());
            }
        }
        changed
    }
}
