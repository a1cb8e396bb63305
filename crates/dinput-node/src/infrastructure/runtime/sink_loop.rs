//! The sink-role event loop and its public handle.
//!
//! Captured events are buffered by the controller and flushed whenever the
//! loop's queue drains, so a burst of input leaves as a few large
//! `InputEventBatch` frames while a lone event still goes out at once.

use std::collections::BTreeMap;

use dinput_core::{HandleId, InputEvent, SharingState};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, trace};

use super::{enqueue, spawn_forwarder, spawn_named};
use crate::application::channel_registry::TransportEvent;
use crate::application::dispatch::dispatch_frame;
use crate::application::error::SharingError;
use crate::application::sink_session::{SharingListener, SinkController};

/// API calls addressed to the sink controller.
pub enum SinkCommand {
    RegisterListener {
        listener: Box<dyn SharingListener>,
        reply: oneshot::Sender<()>,
    },
    QueryState {
        reply: oneshot::Sender<BTreeMap<HandleId, SharingState>>,
    },
    IsCapturing {
        reply: oneshot::Sender<bool>,
    },
}

/// Everything the sink loop reacts to.
pub enum SinkEvent {
    Transport(TransportEvent),
    Captured(InputEvent),
    Command(SinkCommand),
    Shutdown,
}

/// Cloneable front door to a running sink loop.
#[derive(Clone)]
pub struct SinkHandle {
    tx: mpsc::Sender<SinkEvent>,
}

impl SinkHandle {
    pub async fn register_listener(
        &self,
        listener: Box<dyn SharingListener>,
    ) -> Result<(), SharingError> {
        let (reply, rx) = oneshot::channel();
        let cmd = SinkCommand::RegisterListener { listener, reply };
        enqueue(&self.tx, SinkEvent::Command(cmd)).await?;
        rx.await.map_err(|_| SharingError::Disconnected)
    }

    pub async fn query_state(&self) -> Result<BTreeMap<HandleId, SharingState>, SharingError> {
        let (reply, rx) = oneshot::channel();
        enqueue(&self.tx, SinkEvent::Command(SinkCommand::QueryState { reply })).await?;
        rx.await.map_err(|_| SharingError::Disconnected)
    }

    pub async fn is_capturing(&self) -> Result<bool, SharingError> {
        let (reply, rx) = oneshot::channel();
        enqueue(&self.tx, SinkEvent::Command(SinkCommand::IsCapturing { reply })).await?;
        rx.await.map_err(|_| SharingError::Disconnected)
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(SinkEvent::Shutdown).await;
    }
}

/// Starts the sink loop plus forwarders for transport and capture events.
pub fn spawn_sink_loop(
    controller: SinkController,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    captured: mpsc::UnboundedReceiver<InputEvent>,
    queue_capacity: usize,
) -> (SinkHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(queue_capacity.max(1));
    spawn_forwarder("sink-transport", transport_events, tx.clone(), SinkEvent::Transport);
    spawn_forwarder("sink-capture", captured, tx.clone(), SinkEvent::Captured);
    let task = spawn_named("sink-loop", run(controller, rx));
    (SinkHandle { tx }, task)
}

async fn run(mut controller: SinkController, mut rx: mpsc::Receiver<SinkEvent>) {
    info!("sink loop started");
    'outer: while let Some(first) = rx.recv().await {
        let mut next = Some(first);
        while let Some(event) = next.take() {
            if !handle(&mut controller, event) {
                break 'outer;
            }
            next = rx.try_recv().ok();
        }
        controller.flush_events();
    }
    controller.flush_events();
    info!("sink loop stopped");
}

/// Returns `false` on shutdown.
fn handle(controller: &mut SinkController, event: SinkEvent) -> bool {
    match event {
        SinkEvent::Transport(TransportEvent::Opened { session, peer }) => {
            controller.on_channel_opened(session, peer);
        }
        SinkEvent::Transport(TransportEvent::Bytes { session, bytes }) => {
            dispatch_frame(controller, session, &bytes);
        }
        SinkEvent::Transport(TransportEvent::Closed { session }) => {
            controller.on_channel_closed(session);
        }
        SinkEvent::Captured(event) => {
            let handle = event.handle.clone();
            if controller.on_captured(event) == SharingState::ThroughIn {
                trace!(%handle, "event stays local");
            }
        }
        SinkEvent::Command(SinkCommand::RegisterListener { listener, reply }) => {
            controller.register_listener(listener);
            let _ = reply.send(());
        }
        SinkEvent::Command(SinkCommand::QueryState { reply }) => {
            let _ = reply.send(controller.query_sharing_state());
        }
        SinkEvent::Command(SinkCommand::IsCapturing { reply }) => {
            let _ = reply.send(controller.is_capturing());
        }
        SinkEvent::Shutdown => return false,
    }
    true
}
