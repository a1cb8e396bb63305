//! Shared helpers for the node integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dinput_core::domain::event::event_type;
use dinput_core::{DeviceInfo, HandleId, InputEvent, InputTypeMask};
use dinput_node::application::sink_session::SharingListener;
use dinput_node::infrastructure::runtime::NodeSettings;

pub fn device(handle: &str, types: InputTypeMask) -> DeviceInfo {
    DeviceInfo {
        handle: handle.into(),
        name: handle.to_uppercase(),
        types,
    }
}

pub fn rel(handle: &str, dx: i32) -> InputEvent {
    InputEvent {
        handle: handle.into(),
        event_type: event_type::EV_REL,
        code: 0,
        value: dx,
        when_us: 0,
    }
}

pub fn key(handle: &str, code: u16, value: i32) -> InputEvent {
    InputEvent {
        handle: handle.into(),
        event_type: event_type::EV_KEY,
        code,
        value,
        when_us: 0,
    }
}

/// Settings without the latency ticker so tests see only their own traffic.
pub fn quiet_settings() -> NodeSettings {
    NodeSettings {
        latency_probe_interval: None,
        allow_list: vec![vec![29, 56, 111]],
        ..NodeSettings::default()
    }
}

/// Polls `check` until it returns `true`, panicking after two seconds.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Sharing transitions observed by a [`RecordingListener`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Sharing(HandleId),
    NoSharing(HandleId),
}

#[derive(Clone, Default)]
pub struct RecordingListener {
    pub seen: Arc<Mutex<Vec<Transition>>>,
}

impl RecordingListener {
    pub fn transitions(&self) -> Vec<Transition> {
        self.seen.lock().unwrap().clone()
    }
}

impl SharingListener for RecordingListener {
    fn on_sharing(&mut self, handle: &HandleId) {
        self.seen
            .lock()
            .unwrap()
            .push(Transition::Sharing(handle.clone()));
    }

    fn on_no_sharing(&mut self, handle: &HandleId) {
        self.seen
            .lock()
            .unwrap()
            .push(Transition::NoSharing(handle.clone()));
    }
}
