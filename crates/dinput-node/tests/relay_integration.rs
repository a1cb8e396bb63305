//! Integration tests for the relay hop: an originator asks a relay node to
//! borrow devices from a third node.
//!
//! ```text
//!   desk (originator) ──relay──► laptop (relay node) ──request──► tablet (sink)
//! ```

mod common;

use std::sync::Arc;

use common::{device, eventually, quiet_settings, rel};
use dinput_core::{DeviceId, HandleId, InputTypeMask, SharingState};
use dinput_node::application::api::DistributedInput;
use dinput_node::application::error::SharingError;
use dinput_node::infrastructure::hardware::simulated::{Injected, SimulatedHardware};
use dinput_node::infrastructure::network::memory::MemoryHub;
use dinput_node::infrastructure::runtime::Node;
use tokio_test::assert_ok;

struct Triangle {
    hub: MemoryHub,
    desk: Node,
    desk_injected: Injected,
    laptop: Node,
    laptop_injected: Injected,
    tablet: Node,
    tablet_hw: SimulatedHardware,
}

fn ids() -> (DeviceId, DeviceId, DeviceId) {
    ("desk".into(), "laptop".into(), "tablet".into())
}

fn triangle() -> Triangle {
    let hub = MemoryHub::new();
    let (desk_id, laptop_id, tablet_id) = ids();
    let (desk, _, desk_injected) = Node::on_hub(&hub, desk_id, Vec::new(), quiet_settings());
    let (laptop, _, laptop_injected) =
        Node::on_hub(&hub, laptop_id, Vec::new(), quiet_settings());
    let (tablet, tablet_hw, _) = Node::on_hub(
        &hub,
        tablet_id,
        vec![
            device("pen", InputTypeMask::TOUCHPAD),
            device("mouse", InputTypeMask::MOUSE),
        ],
        quiet_settings(),
    );
    Triangle {
        hub,
        desk,
        desk_injected,
        laptop,
        laptop_injected,
        tablet,
        tablet_hw,
    }
}

#[tokio::test]
async fn test_relayed_session_shares_tablet_with_the_relay_node() {
    // Arrange
    let t = triangle();
    let (_, laptop, tablet) = ids();

    // Act
    assert_ok!(t.desk.relay_prepare(&laptop, &tablet).await);
    let granted = t
        .desk
        .relay_start_by_type(&laptop, &tablet, InputTypeMask::MOUSE)
        .await;

    // Assert
    assert_eq!(granted, Ok(InputTypeMask::MOUSE));
    let laptop_view = t.laptop.source_state(&tablet).await.unwrap().unwrap();
    assert_eq!(laptop_view.shared_types, InputTypeMask::MOUSE);
    let tablet_state = t.tablet.query_current_sharing_state().await.unwrap();
    assert_eq!(
        tablet_state.get(&HandleId::from("mouse")),
        Some(&SharingState::ThroughOut)
    );
    assert_eq!(t.tablet_hw.start_count(), 1);
}

#[tokio::test]
async fn test_relayed_events_are_injected_on_the_relay_node_only() {
    let t = triangle();
    let (_, laptop, tablet) = ids();
    t.desk.relay_prepare(&laptop, &tablet).await.unwrap();
    t.desk
        .relay_start_by_handles(&laptop, &tablet, [HandleId::from("pen")].into())
        .await
        .unwrap();

    t.tablet_hw.emit(rel("pen", 9));
    t.tablet_hw.emit(rel("mouse", 1));

    let injected = Arc::clone(&t.laptop_injected);
    eventually("pen event on laptop", || {
        let injected = Arc::clone(&injected);
        async move { !injected.lock().unwrap().is_empty() }
    })
    .await;
    let events = t.laptop_injected.lock().unwrap().clone();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, tablet);
    assert_eq!(events[0].1.handle, HandleId::from("pen"));
    assert!(t.desk_injected.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_relay_stop_and_unprepare_tear_down_the_hop() {
    // Arrange
    let t = triangle();
    let (desk, laptop, tablet) = ids();
    t.desk.relay_prepare(&laptop, &tablet).await.unwrap();
    t.desk
        .relay_start_by_type(&laptop, &tablet, InputTypeMask::MOUSE | InputTypeMask::TOUCHPAD)
        .await
        .unwrap();

    // Act
    let stopped = t
        .desk
        .relay_stop_by_type(&laptop, &tablet, InputTypeMask::TOUCHPAD)
        .await;
    let unprepared = t.desk.relay_unprepare(&laptop, &tablet).await;

    // Assert
    assert_eq!(stopped, Ok(InputTypeMask::TOUCHPAD));
    assert_eq!(unprepared, Ok(()));
    assert_eq!(t.laptop.source_state(&tablet).await.unwrap(), None);
    assert!(!t.tablet_hw.is_capturing());
    let tablet_state = t.tablet.query_current_sharing_state().await.unwrap();
    assert!(tablet_state.values().all(|s| *s == SharingState::ThroughIn));
    // The originator's channel to the relay node stays usable.
    assert_eq!(t.hub.sessions_between(&desk, &laptop).len(), 1);
}

#[tokio::test]
async fn test_relay_to_unreachable_sink_reports_the_open_failure() {
    let t = triangle();
    let (_, laptop, _) = ids();

    let result = t.desk.relay_prepare(&laptop, &"ghost".into()).await;

    assert!(matches!(result, Err(SharingError::ChannelOpenError(_))));
}

#[tokio::test]
async fn test_relay_through_unknown_node_fails_locally() {
    let t = triangle();
    let (_, _, tablet) = ids();

    let result = t.desk.relay_prepare(&"nowhere".into(), &tablet).await;

    assert!(matches!(result, Err(SharingError::ChannelOpenError(_))));
}

#[tokio::test]
async fn test_relay_start_before_relay_prepare_is_rejected_by_the_sink() {
    let t = triangle();
    let (_, laptop, tablet) = ids();

    let result = t
        .desk
        .relay_start_by_type(&laptop, &tablet, InputTypeMask::MOUSE)
        .await;

    assert!(result.is_err());
    assert!(!t.tablet_hw.is_capturing());
}
