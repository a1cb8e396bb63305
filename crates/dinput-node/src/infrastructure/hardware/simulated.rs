//! Simulated input hardware.
//!
//! Stands in for a real capture backend in tests, the demo mode, and on
//! hosts where the binary has no device access.  A [`SimulatedHardware`]
//! handle is kept by the test (or the demo driver) to emit events and
//! inspect capture calls; the [`SimulatedCollector`] half is boxed into the
//! sink controller.
//!
//! Events emitted while capture is stopped are dropped, exactly as a real
//! device read would not happen.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dinput_core::domain::event::{event_type, key_value};
use dinput_core::{DeviceId, DeviceInfo, HandleId, InputEvent, InputTypeMask, KeyStateEntry};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::application::error::HardwareError;
use crate::application::sink_session::HardwareCollector;
use crate::application::source_session::EventInjector;

#[derive(Default)]
struct DeviceTable {
    devices: BTreeMap<HandleId, DeviceInfo>,
    held: BTreeMap<HandleId, BTreeSet<u16>>,
    capturing: bool,
    fail_next_start: bool,
    starts: usize,
    stops: usize,
}

/// Test-side handle onto a simulated device table.
#[derive(Clone)]
pub struct SimulatedHardware {
    table: Arc<Mutex<DeviceTable>>,
    captured: mpsc::UnboundedSender<InputEvent>,
}

impl SimulatedHardware {
    /// Creates the device table and the stream captured events arrive on.
    pub fn new(devices: Vec<DeviceInfo>) -> (Self, mpsc::UnboundedReceiver<InputEvent>) {
        let (captured, rx) = mpsc::unbounded_channel();
        let table = DeviceTable {
            devices: devices.into_iter().map(|d| (d.handle.clone(), d)).collect(),
            ..DeviceTable::default()
        };
        let hw = Self {
            table: Arc::new(Mutex::new(table)),
            captured,
        };
        (hw, rx)
    }

    /// The collector half, for the sink controller.
    pub fn collector(&self) -> SimulatedCollector {
        SimulatedCollector {
            table: Arc::clone(&self.table),
        }
    }

    /// Feeds one event as if a device produced it.
    ///
    /// Key presses and releases update the held-key table whether or not
    /// capture is running.  Returns `true` if the event was captured.
    pub fn emit(&self, event: InputEvent) -> bool {
        let mut table = self.lock();
        if event.event_type == event_type::EV_KEY {
            let held = table.held.entry(event.handle.clone()).or_default();
            match event.value {
                key_value::PRESSED => {
                    held.insert(event.code);
                }
                key_value::RELEASED => {
                    held.remove(&event.code);
                }
                _ => {}
            }
        }
        if !table.capturing {
            trace!(handle = %event.handle, "capture stopped; event not read");
            return false;
        }
        self.captured.send(event).is_ok()
    }

    /// Makes the next `start_capture` fail.
    pub fn fail_next_start(&self) {
        self.lock().fail_next_start = true;
    }

    pub fn is_capturing(&self) -> bool {
        self.lock().capturing
    }

    /// Number of successful `start_capture` calls.
    pub fn start_count(&self) -> usize {
        self.lock().starts
    }

    pub fn stop_count(&self) -> usize {
        self.lock().stops
    }

    fn lock(&self) -> MutexGuard<'_, DeviceTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// [`HardwareCollector`] over a simulated device table.
pub struct SimulatedCollector {
    table: Arc<Mutex<DeviceTable>>,
}

impl SimulatedCollector {
    fn lock(&self) -> MutexGuard<'_, DeviceTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl HardwareCollector for SimulatedCollector {
    fn list_devices_by_type(&self, mask: InputTypeMask) -> BTreeMap<HandleId, DeviceInfo> {
        self.lock()
            .devices
            .iter()
            .filter(|(_, d)| d.types.intersects(mask))
            .map(|(h, d)| (h.clone(), d.clone()))
            .collect()
    }

    fn list_devices_by_handle_ids(
        &self,
        handles: &BTreeSet<HandleId>,
    ) -> BTreeMap<HandleId, DeviceInfo> {
        self.lock()
            .devices
            .iter()
            .filter(|(h, _)| handles.contains(*h))
            .map(|(h, d)| (h.clone(), d.clone()))
            .collect()
    }

    fn start_capture(&mut self) -> Result<(), HardwareError> {
        let mut table = self.lock();
        if std::mem::take(&mut table.fail_next_start) {
            return Err(HardwareError::CaptureUnavailable(
                "simulated device busy".to_string(),
            ));
        }
        table.capturing = true;
        table.starts += 1;
        debug!("simulated capture started");
        Ok(())
    }

    fn stop_capture(&mut self) {
        let mut table = self.lock();
        table.capturing = false;
        table.stops += 1;
        debug!("simulated capture stopped");
    }

    fn pressed_keys(&self, handles: &BTreeSet<HandleId>) -> Vec<KeyStateEntry> {
        self.lock()
            .held
            .iter()
            .filter(|(h, _)| handles.contains(*h))
            .flat_map(|(h, codes)| {
                codes.iter().map(move |&code| KeyStateEntry {
                    handle: h.clone(),
                    code,
                    value: key_value::PRESSED,
                })
            })
            .collect()
    }
}

/// Everything a [`RecordingInjector`] was asked to inject.
pub type Injected = Arc<Mutex<Vec<(DeviceId, InputEvent)>>>;

/// [`EventInjector`] that records instead of touching a virtual device.
pub struct RecordingInjector {
    injected: Injected,
}

impl RecordingInjector {
    pub fn new() -> (Self, Injected) {
        let injected = Injected::default();
        (
            Self {
                injected: Arc::clone(&injected),
            },
            injected,
        )
    }
}

impl EventInjector for RecordingInjector {
    fn inject_event(&mut self, from: &DeviceId, event: &InputEvent) -> Result<(), HardwareError> {
        self.injected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((from.clone(), event.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(handle: &str, types: InputTypeMask) -> DeviceInfo {
        DeviceInfo {
            handle: handle.into(),
            name: handle.to_uppercase(),
            types,
        }
    }

    fn key(handle: &str, code: u16, value: i32) -> InputEvent {
        InputEvent {
            handle: handle.into(),
            event_type: event_type::EV_KEY,
            code,
            value,
            when_us: 0,
        }
    }

    #[test]
    fn test_lists_devices_by_type_and_by_handle() {
        // Arrange
        let (hw, _rx) = SimulatedHardware::new(vec![
            device("m", InputTypeMask::MOUSE),
            device("k", InputTypeMask::KEYBOARD),
        ]);
        let collector = hw.collector();

        // Act
        let mice = collector.list_devices_by_type(InputTypeMask::MOUSE);
        let wanted = BTreeSet::from([HandleId::from("k"), HandleId::from("zz")]);
        let known = collector.list_devices_by_handle_ids(&wanted);

        // Assert
        assert_eq!(mice.keys().cloned().collect::<Vec<_>>(), vec![HandleId::from("m")]);
        assert_eq!(known.keys().cloned().collect::<Vec<_>>(), vec![HandleId::from("k")]);
    }

    #[test]
    fn test_events_flow_only_while_capturing() {
        let (hw, mut rx) = SimulatedHardware::new(vec![device("k", InputTypeMask::KEYBOARD)]);
        let mut collector = hw.collector();

        assert!(!hw.emit(key("k", 30, key_value::PRESSED)));
        collector.start_capture().unwrap();
        assert!(hw.emit(key("k", 30, key_value::RELEASED)));
        collector.stop_capture();

        assert_eq!(rx.try_recv().unwrap().value, key_value::RELEASED);
        assert!(rx.try_recv().is_err());
        assert_eq!((hw.start_count(), hw.stop_count()), (1, 1));
    }

    #[test]
    fn test_pressed_keys_tracks_held_codes() {
        let (hw, _rx) = SimulatedHardware::new(vec![device("k", InputTypeMask::KEYBOARD)]);
        hw.emit(key("k", 29, key_value::PRESSED));
        hw.emit(key("k", 30, key_value::PRESSED));
        hw.emit(key("k", 29, key_value::RELEASED));

        let held = hw.collector().pressed_keys(&BTreeSet::from([HandleId::from("k")]));

        assert_eq!(
            held,
            vec![KeyStateEntry {
                handle: "k".into(),
                code: 30,
                value: key_value::PRESSED
            }]
        );
    }

    #[test]
    fn test_fail_next_start_fails_once() {
        let (hw, _rx) = SimulatedHardware::new(Vec::new());
        let mut collector = hw.collector();
        hw.fail_next_start();

        assert!(collector.start_capture().is_err());
        assert!(collector.start_capture().is_ok());
        assert!(hw.is_capturing());
    }
}
