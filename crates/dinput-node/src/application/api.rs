//! The public distributed-input API.
//!
//! Callers never touch a controller directly.  Every operation is enqueued
//! onto the event loop that owns the controller and resolves once the loop
//! completes it, so the methods here are `async` and return the final
//! outcome of the request rather than just "accepted".
//!
//! Relay variants take two device ids: `src` is the relay node that should
//! issue the request and `sink` is the device owner it should address.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use dinput_core::{AllowList, DeviceId, HandleId, InputTypeMask, SharingState};

use crate::application::error::SharingError;
use crate::application::sink_session::SharingListener;

#[async_trait]
pub trait DistributedInput: Send + Sync {
    /// Opens a session with `sink` and returns its allow-list.
    async fn prepare(&self, sink: &DeviceId) -> Result<AllowList, SharingError>;

    async fn unprepare(&self, sink: &DeviceId) -> Result<(), SharingError>;

    /// Returns the granted device classes.
    async fn start_by_type(
        &self,
        sink: &DeviceId,
        mask: InputTypeMask,
    ) -> Result<InputTypeMask, SharingError>;

    /// Returns the device classes actually stopped.
    async fn stop_by_type(
        &self,
        sink: &DeviceId,
        mask: InputTypeMask,
    ) -> Result<InputTypeMask, SharingError>;

    /// Returns the granted handles.
    async fn start_by_handles(
        &self,
        sink: &DeviceId,
        handles: BTreeSet<HandleId>,
    ) -> Result<BTreeSet<HandleId>, SharingError>;

    /// Returns the handles actually stopped.
    async fn stop_by_handles(
        &self,
        sink: &DeviceId,
        handles: BTreeSet<HandleId>,
    ) -> Result<BTreeSet<HandleId>, SharingError>;

    async fn relay_prepare(&self, src: &DeviceId, sink: &DeviceId) -> Result<(), SharingError>;

    async fn relay_unprepare(&self, src: &DeviceId, sink: &DeviceId) -> Result<(), SharingError>;

    async fn relay_start_by_type(
        &self,
        src: &DeviceId,
        sink: &DeviceId,
        mask: InputTypeMask,
    ) -> Result<InputTypeMask, SharingError>;

    async fn relay_stop_by_type(
        &self,
        src: &DeviceId,
        sink: &DeviceId,
        mask: InputTypeMask,
    ) -> Result<InputTypeMask, SharingError>;

    async fn relay_start_by_handles(
        &self,
        src: &DeviceId,
        sink: &DeviceId,
        handles: BTreeSet<HandleId>,
    ) -> Result<BTreeSet<HandleId>, SharingError>;

    async fn relay_stop_by_handles(
        &self,
        src: &DeviceId,
        sink: &DeviceId,
        handles: BTreeSet<HandleId>,
    ) -> Result<BTreeSet<HandleId>, SharingError>;

    /// Adds an observer of this node's sink-side sharing transitions.
    async fn register_sharing_listener(
        &self,
        listener: Box<dyn SharingListener>,
    ) -> Result<(), SharingError>;

    /// Current sharing state of every device this node has ever shared.
    async fn query_current_sharing_state(
        &self,
    ) -> Result<BTreeMap<HandleId, SharingState>, SharingError>;
}
