//! Sensor access contract and a simulated thermometer
use std::sync::atomic::{AtomicU32, Ordering};

use rand::Rng;

use crate::contracts::{DeviceHandle, PhysicalValue, SensorKind, Unit};
use crate::errors::{Result, TelemetryError};

/// Hardware abstraction for typed sensor reads
///
/// Reads may block on device I/O; they are only issued from the control loop.
pub trait SensorSource: Send + Sync {
    /// Locate the first device measuring `kind`
    fn find_device(&self, kind: SensorKind) -> Option<DeviceHandle>;

    /// Read the current value of a located device
    fn read(&self, device: &DeviceHandle) -> Result<PhysicalValue>;
}

/// Temperature sensor producing a base value with random jitter
pub struct SimulatedThermometer {
    name: String,
    base_centi: i16,
    jitter_centi: i16,
    reads: AtomicU32,
}

impl SimulatedThermometer {
    pub fn new(name: impl Into<String>, base_centi: i16, jitter_centi: i16) -> Self {
        Self {
            name: name.into(),
            base_centi,
            jitter_centi: jitter_centi.saturating_abs(),
            reads: AtomicU32::new(0),
        }
    }

    /// Number of reads served so far
    pub fn reads(&self) -> u32 {
        self.reads.load(Ordering::Relaxed)
    }
}

impl SensorSource for SimulatedThermometer {
    fn find_device(&self, kind: SensorKind) -> Option<DeviceHandle> {
        (kind == SensorKind::Temperature).then(|| DeviceHandle {
            index: 0,
            name: self.name.clone(),
            kind,
        })
    }

    fn read(&self, device: &DeviceHandle) -> Result<PhysicalValue> {
        if device.kind != SensorKind::Temperature || device.index != 0 {
            return Err(TelemetryError::SensorRead {
                device: device.name.clone(),
                reason: "unknown device".to_string(),
            });
        }
        self.reads.fetch_add(1, Ordering::Relaxed);

        let jitter = if self.jitter_centi > 0 {
            rand::thread_rng().gen_range(-self.jitter_centi..=self.jitter_centi)
        } else {
            0
        };
        Ok(PhysicalValue::centi(
            self.base_centi.saturating_add(jitter),
            Unit::Celsius,
        ))
    }
}
