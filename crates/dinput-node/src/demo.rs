//! In-process relay walkthrough for `dinput-node --demo`.
//!
//! Three nodes share one memory hub.  `desk` asks `laptop` to borrow the
//! mouse of `tablet`, moves it a little, and hands it back.

use std::time::Duration;

use dinput_core::domain::event::event_type;
use dinput_core::{DeviceId, DeviceInfo, InputEvent, InputTypeMask};
use tracing::info;

use dinput_node::application::api::DistributedInput;
use dinput_node::infrastructure::network::memory::MemoryHub;
use dinput_node::infrastructure::runtime::{Node, NodeSettings};

pub async fn run() -> anyhow::Result<()> {
    let hub = MemoryHub::new();
    let settings = NodeSettings {
        latency_probe_interval: None,
        ..NodeSettings::default()
    };

    let desk = DeviceId::from("desk");
    let laptop = DeviceId::from("laptop");
    let tablet = DeviceId::from("tablet");
    let (desk_node, _, _) = Node::on_hub(&hub, desk, Vec::new(), settings.clone());
    let (laptop_node, _, injected) =
        Node::on_hub(&hub, laptop.clone(), Vec::new(), settings.clone());
    let (tablet_node, tablet_hw, _) = Node::on_hub(
        &hub,
        tablet.clone(),
        vec![
            DeviceInfo {
                handle: "tablet-mouse".into(),
                name: "Tablet Mouse".to_string(),
                types: InputTypeMask::MOUSE,
            },
            DeviceInfo {
                handle: "tablet-kbd".into(),
                name: "Tablet Keyboard".to_string(),
                types: InputTypeMask::KEYBOARD,
            },
        ],
        settings,
    );

    desk_node.relay_prepare(&laptop, &tablet).await?;
    info!("desk: laptop prepared tablet");

    let granted = desk_node
        .relay_start_by_type(&laptop, &tablet, InputTypeMask::MOUSE)
        .await?;
    info!(%granted, "desk: tablet shares with laptop");

    for dx in [3, 5, -2] {
        tablet_hw.emit(InputEvent {
            handle: "tablet-mouse".into(),
            event_type: event_type::EV_REL,
            code: 0,
            value: dx,
            when_us: dinput_core::protocol::codec::now_us(),
        });
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    let delivered = injected
        .lock()
        .map(|events| events.len())
        .unwrap_or_default();
    info!(delivered, "laptop: events injected from tablet");

    for (handle, state) in tablet_node.query_current_sharing_state().await? {
        info!(%handle, ?state, "tablet: sharing state");
    }

    let stopped = desk_node
        .relay_stop_by_type(&laptop, &tablet, InputTypeMask::MOUSE)
        .await?;
    info!(%stopped, "desk: sharing stopped");
    desk_node.relay_unprepare(&laptop, &tablet).await?;
    info!("desk: relay session closed");

    desk_node.shutdown().await;
    laptop_node.shutdown().await;
    tablet_node.shutdown().await;
    Ok(())
}
