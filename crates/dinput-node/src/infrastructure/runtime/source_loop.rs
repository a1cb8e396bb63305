//! The source-role event loop and its public handle.

use std::collections::BTreeSet;
use std::time::Duration;

use dinput_core::protocol::codec::now_us;
use dinput_core::{AllowList, DeviceId, HandleId, InputTypeMask};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::{await_reply, enqueue, reply_slot, spawn_forwarder, spawn_named};
use crate::application::channel_registry::TransportEvent;
use crate::application::dispatch::dispatch_frame;
use crate::application::error::SharingError;
use crate::application::pending::Completion;
use crate::application::source_session::{SourceController, SourceSessionState};

/// API calls addressed to the source controller.
pub enum SourceCommand {
    Prepare {
        sink: DeviceId,
        reply: Completion<AllowList>,
    },
    Unprepare {
        sink: DeviceId,
        reply: Completion<()>,
    },
    StartByType {
        sink: DeviceId,
        mask: InputTypeMask,
        reply: Completion<InputTypeMask>,
    },
    StopByType {
        sink: DeviceId,
        mask: InputTypeMask,
        reply: Completion<InputTypeMask>,
    },
    StartByHandles {
        sink: DeviceId,
        handles: BTreeSet<HandleId>,
        reply: Completion<BTreeSet<HandleId>>,
    },
    StopByHandles {
        sink: DeviceId,
        handles: BTreeSet<HandleId>,
        reply: Completion<BTreeSet<HandleId>>,
    },
    RelayPrepare {
        src: DeviceId,
        sink: DeviceId,
        reply: Completion<()>,
    },
    RelayUnprepare {
        src: DeviceId,
        sink: DeviceId,
        reply: Completion<()>,
    },
    RelayStartByType {
        src: DeviceId,
        sink: DeviceId,
        mask: InputTypeMask,
        reply: Completion<InputTypeMask>,
    },
    RelayStopByType {
        src: DeviceId,
        sink: DeviceId,
        mask: InputTypeMask,
        reply: Completion<InputTypeMask>,
    },
    RelayStartByHandles {
        src: DeviceId,
        sink: DeviceId,
        handles: BTreeSet<HandleId>,
        reply: Completion<BTreeSet<HandleId>>,
    },
    RelayStopByHandles {
        src: DeviceId,
        sink: DeviceId,
        handles: BTreeSet<HandleId>,
        reply: Completion<BTreeSet<HandleId>>,
    },
    SessionState {
        sink: DeviceId,
        reply: oneshot::Sender<Option<SourceSessionState>>,
    },
    Latency {
        sink: DeviceId,
        reply: oneshot::Sender<Option<Duration>>,
    },
}

/// Everything the source loop reacts to.
pub enum SourceEvent {
    Transport(TransportEvent),
    Command(SourceCommand),
    LatencyTick,
    Shutdown,
}

/// Cloneable front door to a running source loop.
#[derive(Clone)]
pub struct SourceHandle {
    tx: mpsc::Sender<SourceEvent>,
}

impl SourceHandle {
    async fn request<T, F>(&self, build: F) -> Result<T, SharingError>
    where
        T: Send + 'static,
        F: FnOnce(Completion<T>) -> SourceCommand,
    {
        let (completion, rx) = reply_slot();
        enqueue(&self.tx, SourceEvent::Command(build(completion))).await?;
        await_reply(rx).await
    }

    pub async fn prepare(&self, sink: &DeviceId) -> Result<AllowList, SharingError> {
        let sink = sink.clone();
        self.request(|reply| SourceCommand::Prepare { sink, reply })
            .await
    }

    pub async fn unprepare(&self, sink: &DeviceId) -> Result<(), SharingError> {
        let sink = sink.clone();
        self.request(|reply| SourceCommand::Unprepare { sink, reply })
            .await
    }

    pub async fn start_by_type(
        &self,
        sink: &DeviceId,
        mask: InputTypeMask,
    ) -> Result<InputTypeMask, SharingError> {
        let sink = sink.clone();
        self.request(|reply| SourceCommand::StartByType { sink, mask, reply })
            .await
    }

    pub async fn stop_by_type(
        &self,
        sink: &DeviceId,
        mask: InputTypeMask,
    ) -> Result<InputTypeMask, SharingError> {
        let sink = sink.clone();
        self.request(|reply| SourceCommand::StopByType { sink, mask, reply })
            .await
    }

    pub async fn start_by_handles(
        &self,
        sink: &DeviceId,
        handles: BTreeSet<HandleId>,
    ) -> Result<BTreeSet<HandleId>, SharingError> {
        let sink = sink.clone();
        self.request(|reply| SourceCommand::StartByHandles {
            sink,
            handles,
            reply,
        })
        .await
    }

    pub async fn stop_by_handles(
        &self,
        sink: &DeviceId,
        handles: BTreeSet<HandleId>,
    ) -> Result<BTreeSet<HandleId>, SharingError> {
        let sink = sink.clone();
        self.request(|reply| SourceCommand::StopByHandles {
            sink,
            handles,
            reply,
        })
        .await
    }

    pub async fn relay_prepare(&self, src: &DeviceId, sink: &DeviceId) -> Result<(), SharingError> {
        let (src, sink) = (src.clone(), sink.clone());
        self.request(|reply| SourceCommand::RelayPrepare { src, sink, reply })
            .await
    }

    pub async fn relay_unprepare(
        &self,
        src: &DeviceId,
        sink: &DeviceId,
    ) -> Result<(), SharingError> {
        let (src, sink) = (src.clone(), sink.clone());
        self.request(|reply| SourceCommand::RelayUnprepare { src, sink, reply })
            .await
    }

    pub async fn relay_start_by_type(
        &self,
        src: &DeviceId,
        sink: &DeviceId,
        mask: InputTypeMask,
    ) -> Result<InputTypeMask, SharingError> {
        let (src, sink) = (src.clone(), sink.clone());
        self.request(|reply| SourceCommand::RelayStartByType {
            src,
            sink,
            mask,
            reply,
        })
        .await
    }

    pub async fn relay_stop_by_type(
        &self,
        src: &DeviceId,
        sink: &DeviceId,
        mask: InputTypeMask,
    ) -> Result<InputTypeMask, SharingError> {
        let (src, sink) = (src.clone(), sink.clone());
        self.request(|reply| SourceCommand::RelayStopByType {
            src,
            sink,
            mask,
            reply,
        })
        .await
    }

    pub async fn relay_start_by_handles(
        &self,
        src: &DeviceId,
        sink: &DeviceId,
        handles: BTreeSet<HandleId>,
    ) -> Result<BTreeSet<HandleId>, SharingError> {
        let (src, sink) = (src.clone(), sink.clone());
        self.request(|reply| SourceCommand::RelayStartByHandles {
            src,
            sink,
            handles,
            reply,
        })
        .await
    }

    pub async fn relay_stop_by_handles(
        &self,
        src: &DeviceId,
        sink: &DeviceId,
        handles: BTreeSet<HandleId>,
    ) -> Result<BTreeSet<HandleId>, SharingError> {
        let (src, sink) = (src.clone(), sink.clone());
        self.request(|reply| SourceCommand::RelayStopByHandles {
            src,
            sink,
            handles,
            reply,
        })
        .await
    }

    /// What `sink` currently shares with this node, if it is prepared.
    pub async fn session_state(
        &self,
        sink: &DeviceId,
    ) -> Result<Option<SourceSessionState>, SharingError> {
        let (reply, rx) = oneshot::channel();
        let cmd = SourceCommand::SessionState {
            sink: sink.clone(),
            reply,
        };
        enqueue(&self.tx, SourceEvent::Command(cmd)).await?;
        rx.await.map_err(|_| SharingError::Disconnected)
    }

    /// Last measured round trip to `sink`.
    pub async fn latency(&self, sink: &DeviceId) -> Result<Option<Duration>, SharingError> {
        let (reply, rx) = oneshot::channel();
        let cmd = SourceCommand::Latency {
            sink: sink.clone(),
            reply,
        };
        enqueue(&self.tx, SourceEvent::Command(cmd)).await?;
        rx.await.map_err(|_| SharingError::Disconnected)
    }

    /// Asks the loop to exit after the events already queued.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(SourceEvent::Shutdown).await;
    }
}

/// Starts the source loop, its transport forwarder and, if an interval is
/// given, the latency probe ticker.
pub fn spawn_source_loop(
    controller: SourceController,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    queue_capacity: usize,
    latency_probe_interval: Option<Duration>,
) -> (SourceHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(queue_capacity.max(1));

    spawn_forwarder(
        "source-transport",
        transport_events,
        tx.clone(),
        SourceEvent::Transport,
    );
    if let Some(period) = latency_probe_interval {
        spawn_latency_ticker(period, tx.clone());
    }

    let task = spawn_named("source-loop", run(controller, rx));
    (SourceHandle { tx }, task)
}

fn spawn_latency_ticker(period: Duration, tx: mpsc::Sender<SourceEvent>) {
    spawn_named("latency-ticker", async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if tx.send(SourceEvent::LatencyTick).await.is_err() {
                break;
            }
        }
    });
}

async fn run(mut controller: SourceController, mut rx: mpsc::Receiver<SourceEvent>) {
    info!(device = %controller.local_id(), "source loop started");
    while let Some(event) = rx.recv().await {
        match event {
            SourceEvent::Transport(TransportEvent::Opened { session, peer }) => {
                controller.on_channel_opened(session, peer);
            }
            SourceEvent::Transport(TransportEvent::Bytes { session, bytes }) => {
                dispatch_frame(&mut controller, session, &bytes);
            }
            SourceEvent::Transport(TransportEvent::Closed { session }) => {
                controller.on_channel_closed(session);
            }
            SourceEvent::Command(cmd) => execute(&mut controller, cmd),
            SourceEvent::LatencyTick => controller.on_latency_tick(now_us()),
            SourceEvent::Shutdown => break,
        }
    }
    info!(device = %controller.local_id(), "source loop stopped");
}

fn execute(controller: &mut SourceController, cmd: SourceCommand) {
    // Refusals have already been delivered to the completion.
    let outcome = match cmd {
        SourceCommand::Prepare { sink, reply } => controller.prepare(&sink, reply),
        SourceCommand::Unprepare { sink, reply } => controller.unprepare(&sink, reply),
        SourceCommand::StartByType { sink, mask, reply } => {
            controller.start_by_type(&sink, mask, reply)
        }
        SourceCommand::StopByType { sink, mask, reply } => {
            controller.stop_by_type(&sink, mask, reply)
        }
        SourceCommand::StartByHandles {
            sink,
            handles,
            reply,
        } => controller.start_by_handles(&sink, handles, reply),
        SourceCommand::StopByHandles {
            sink,
            handles,
            reply,
        } => controller.stop_by_handles(&sink, handles, reply),
        SourceCommand::RelayPrepare { src, sink, reply } => {
            controller.relay_prepare(&src, &sink, reply)
        }
        SourceCommand::RelayUnprepare { src, sink, reply } => {
            controller.relay_unprepare(&src, &sink, reply)
        }
        SourceCommand::RelayStartByType {
            src,
            sink,
            mask,
            reply,
        } => controller.relay_start_by_type(&src, &sink, mask, reply),
        SourceCommand::RelayStopByType {
            src,
            sink,
            mask,
            reply,
        } => controller.relay_stop_by_type(&src, &sink, mask, reply),
        SourceCommand::RelayStartByHandles {
            src,
            sink,
            handles,
            reply,
        } => controller.relay_start_by_handles(&src, &sink, handles, reply),
        SourceCommand::RelayStopByHandles {
            src,
            sink,
            handles,
            reply,
        } => controller.relay_stop_by_handles(&src, &sink, handles, reply),
        SourceCommand::SessionState { sink, reply } => {
            let _ = reply.send(controller.source_state(&sink));
            Ok(())
        }
        SourceCommand::Latency { sink, reply } => {
            let _ = reply.send(controller.latency_of(&sink));
            Ok(())
        }
    };
    if let Err(e) = outcome {
        debug!("request refused: {e}");
    }
}
