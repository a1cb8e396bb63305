//! A complete node: one source loop and one sink loop behind the public API.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use async_trait::async_trait;
use dinput_core::protocol::messages::Role;
use dinput_core::{
    AllowList, DeviceId, DeviceInfo, HandleId, InputEvent, InputTypeMask, SharingState,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::sink_loop::{spawn_sink_loop, SinkHandle};
use super::source_loop::{spawn_source_loop, SourceHandle};
use crate::application::api::DistributedInput;
use crate::application::channel_registry::{ChannelRegistry, Transport, TransportEvent};
use crate::application::error::SharingError;
use crate::application::sink_session::{HardwareCollector, SharingListener, SinkController};
use crate::application::source_session::{EventInjector, SourceController, SourceSessionState};
use crate::infrastructure::hardware::simulated::{Injected, RecordingInjector, SimulatedHardware};
use crate::infrastructure::network::memory::MemoryHub;
use crate::infrastructure::storage::config::NodeConfig;

/// One transport endpoint and the events it produces.
pub struct RoleEndpoint {
    pub transport: Box<dyn Transport>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// The hardware seams of a node.
pub struct NodeHardware {
    pub collector: Box<dyn HardwareCollector>,
    /// Events read by the collector once capture is running.
    pub captured: mpsc::UnboundedReceiver<InputEvent>,
    pub injector: Box<dyn EventInjector>,
}

/// Tuning for both loops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSettings {
    pub source_queue: usize,
    pub sink_queue: usize,
    /// `None` disables latency probing.
    pub latency_probe_interval: Option<Duration>,
    pub allow_list: AllowList,
    pub batch_max: usize,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self::from_config(&NodeConfig::default())
    }
}

impl NodeSettings {
    pub fn from_config(cfg: &NodeConfig) -> Self {
        Self {
            source_queue: cfg.source.queue_capacity,
            sink_queue: cfg.sink.queue_capacity,
            latency_probe_interval: cfg.latency_probe_interval(),
            allow_list: cfg.sink.allow_list.clone(),
            batch_max: cfg.sink.batch_max,
        }
    }
}

/// Running node.  Dropping it leaves the loops running until
/// [`shutdown`](Node::shutdown) is called or the runtime ends.
pub struct Node {
    local_id: DeviceId,
    source: SourceHandle,
    sink: SinkHandle,
    tasks: Vec<JoinHandle<()>>,
}

impl Node {
    /// Builds both controllers and starts their loops.
    pub fn spawn(
        local_id: DeviceId,
        source_endpoint: RoleEndpoint,
        sink_endpoint: RoleEndpoint,
        hardware: NodeHardware,
        settings: NodeSettings,
    ) -> Self {
        let source_controller = SourceController::new(
            local_id.clone(),
            ChannelRegistry::new(source_endpoint.transport),
            hardware.injector,
        );
        let sink_controller = SinkController::new(
            local_id.clone(),
            ChannelRegistry::new(sink_endpoint.transport),
            hardware.collector,
            settings.allow_list,
            settings.batch_max,
        );

        let (source, source_task) = spawn_source_loop(
            source_controller,
            source_endpoint.events,
            settings.source_queue,
            settings.latency_probe_interval,
        );
        let (sink, sink_task) = spawn_sink_loop(
            sink_controller,
            sink_endpoint.events,
            hardware.captured,
            settings.sink_queue,
        );
        info!(device = %local_id, "node started");

        Self {
            local_id,
            source,
            sink,
            tasks: vec![source_task, sink_task],
        }
    }

    /// Starts a node whose endpoints live on `hub`, with simulated
    /// `devices` and a recording injector.
    pub fn on_hub(
        hub: &MemoryHub,
        local_id: DeviceId,
        devices: Vec<DeviceInfo>,
        settings: NodeSettings,
    ) -> (Self, SimulatedHardware, Injected) {
        let (source_transport, source_events) = hub.endpoint(local_id.clone(), Role::Source);
        let (sink_transport, sink_events) = hub.endpoint(local_id.clone(), Role::Sink);
        let (hardware, captured) = SimulatedHardware::new(devices);
        let (injector, injected) = RecordingInjector::new();
        let node = Self::spawn(
            local_id,
            RoleEndpoint {
                transport: Box::new(source_transport),
                events: source_events,
            },
            RoleEndpoint {
                transport: Box::new(sink_transport),
                events: sink_events,
            },
            NodeHardware {
                collector: Box::new(hardware.collector()),
                captured,
                injector: Box::new(injector),
            },
            settings,
        );
        (node, hardware, injected)
    }

    pub fn local_id(&self) -> &DeviceId {
        &self.local_id
    }

    pub fn source(&self) -> &SourceHandle {
        &self.source
    }

    pub fn sink(&self) -> &SinkHandle {
        &self.sink
    }

    /// What `sink` currently shares with this node.
    pub async fn source_state(
        &self,
        sink: &DeviceId,
    ) -> Result<Option<SourceSessionState>, SharingError> {
        self.source.session_state(sink).await
    }

    /// Stops both loops and waits for them to finish.
    pub async fn shutdown(self) {
        self.source.shutdown().await;
        self.sink.shutdown().await;
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("event loop ended abnormally: {e}");
            }
        }
        info!(device = %self.local_id, "node stopped");
    }
}

#[async_trait]
impl DistributedInput for Node {
    async fn prepare(&self, sink: &DeviceId) -> Result<AllowList, SharingError> {
        self.source.prepare(sink).await
    }

    async fn unprepare(&self, sink: &DeviceId) -> Result<(), SharingError> {
        self.source.unprepare(sink).await
    }

    async fn start_by_type(
        &self,
        sink: &DeviceId,
        mask: InputTypeMask,
    ) -> Result<InputTypeMask, SharingError> {
        self.source.start_by_type(sink, mask).await
    }

    async fn stop_by_type(
        &self,
        sink: &DeviceId,
        mask: InputTypeMask,
    ) -> Result<InputTypeMask, SharingError> {
        self.source.stop_by_type(sink, mask).await
    }

    async fn start_by_handles(
        &self,
        sink: &DeviceId,
        handles: BTreeSet<HandleId>,
    ) -> Result<BTreeSet<HandleId>, SharingError> {
        self.source.start_by_handles(sink, handles).await
    }

    async fn stop_by_handles(
        &self,
        sink: &DeviceId,
        handles: BTreeSet<HandleId>,
    ) -> Result<BTreeSet<HandleId>, SharingError> {
        self.source.stop_by_handles(sink, handles).await
    }

    async fn relay_prepare(&self, src: &DeviceId, sink: &DeviceId) -> Result<(), SharingError> {
        self.source.relay_prepare(src, sink).await
    }

    async fn relay_unprepare(&self, src: &DeviceId, sink: &DeviceId) -> Result<(), SharingError> {
        self.source.relay_unprepare(src, sink).await
    }

    async fn relay_start_by_type(
        &self,
        src: &DeviceId,
        sink: &DeviceId,
        mask: InputTypeMask,
    ) -> Result<InputTypeMask, SharingError> {
        self.source.relay_start_by_type(src, sink, mask).await
    }

    async fn relay_stop_by_type(
        &self,
        src: &DeviceId,
        sink: &DeviceId,
        mask: InputTypeMask,
    ) -> Result<InputTypeMask, SharingError> {
        self.source.relay_stop_by_type(src, sink, mask).await
    }

    async fn relay_start_by_handles(
        &self,
        src: &DeviceId,
        sink: &DeviceId,
        handles: BTreeSet<HandleId>,
    ) -> Result<BTreeSet<HandleId>, SharingError> {
        self.source.relay_start_by_handles(src, sink, handles).await
    }

    async fn relay_stop_by_handles(
        &self,
        src: &DeviceId,
        sink: &DeviceId,
        handles: BTreeSet<HandleId>,
    ) -> Result<BTreeSet<HandleId>, SharingError> {
        self.source.relay_stop_by_handles(src, sink, handles).await
    }

    async fn register_sharing_listener(
        &self,
        listener: Box<dyn SharingListener>,
    ) -> Result<(), SharingError> {
        self.sink.register_listener(listener).await
    }

    async fn query_current_sharing_state(
        &self,
    ) -> Result<BTreeMap<HandleId, SharingState>, SharingError> {
        self.sink.query_state().await
    }
}
