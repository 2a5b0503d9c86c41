//! Register store: owns every simulated device.
//!
//! Devices are created once at startup and never resized or removed.

pub mod register;

use std::collections::BTreeMap;

use rand::Rng;

use crate::delta::MAX_REGISTERS;
use crate::error::RegcastError;

pub use register::{Device, MAX_VALUE, MIN_VALUE, Register, snap_drift};

/// All devices, keyed by id.
#[derive(Debug, Default)]
pub struct RegisterStore {
    devices: BTreeMap<u32, Device>,
}

impl RegisterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `device_count` devices with ids `1..=device_count`, each
    /// holding `registers_per_device` random registers.
    pub fn random<R: Rng + ?Sized>(
        device_count: u32,
        registers_per_device: usize,
        rng: &mut R,
    ) -> Result<Self, RegcastError> {
        check_register_count(registers_per_device)?;
        let devices = (1..=device_count)
            .map(|id| (id, Device::random(id, registers_per_device, &mut *rng)))
            .collect();
        Ok(Self { devices })
    }

    /// Add a device. Fails if the id is taken or the
    /// register count cannot be addressed on the wire.
    pub fn insert(&mut self, device: Device) -> Result<(), RegcastError> {
        check_register_count(device.len())?;
        if self.devices.contains_key(&device.id()) {
            return Err(RegcastError::InvalidConfig(format!(
                "duplicate device id {}",
                device.id()
            )));
        }
        self.devices.insert(device.id(), device);
        Ok(())
    }

    pub fn get(&self, id: u32) -> Option<&Device> {
        self.devices.get(&id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut Device> {
        self.devices.get_mut(&id)
    }

    /// Published vector of device `id`.
    pub fn published(&self, id: u32) -> Result<Vec<u8>, RegcastError> {
        self.get(id)
            .map(Device::published)
            .ok_or(RegcastError::DeviceNotFound(id))
    }

    /// Device ids in ascending order.
    pub fn ids(&self) -> Vec<u32> {
        self.devices.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

fn check_register_count(count: usize) -> Result<(), RegcastError> {
    if count == 0 || count > MAX_REGISTERS {
        return Err(RegcastError::InvalidConfig(format!(
            "register count {count} must be in 1..={MAX_REGISTERS}"
        )));
    }
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────
