//! Hardware adapters for the two controller seams.
//!
//! The sink consumes a [`HardwareCollector`] (device enumeration and
//! capture) and the source consumes an [`EventInjector`] (replay on a
//! virtual device).  Real backends read `/dev/input` or install OS hooks;
//! this build ships the simulated pair in [`simulated`] plus a
//! [`LoggingInjector`] for a headless node that only logs what it would
//! inject.
//!
//! [`HardwareCollector`]: crate::application::sink_session::HardwareCollector

use dinput_core::{DeviceId, InputEvent};
use tracing::debug;

use crate::application::error::HardwareError;
use crate::application::source_session::EventInjector;

pub mod simulated;

/// Injector for a node with no virtual device: logs every event.
#[derive(Debug, Default)]
pub struct LoggingInjector {
    injected: u64,
}

impl LoggingInjector {
    pub fn injected(&self) -> u64 {
        self.injected
    }
}

impl EventInjector for LoggingInjector {
    fn inject_event(&mut self, from: &DeviceId, event: &InputEvent) -> Result<(), HardwareError> {
        self.injected += 1;
        debug!(
            %from,
            handle = %event.handle,
            kind = event.event_type,
            code = event.code,
            value = event.value,
            "inject"
        );
        Ok(())
    }
}
