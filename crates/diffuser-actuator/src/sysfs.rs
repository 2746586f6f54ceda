//! Linux sysfs GPIO driver (`/sys/class/gpio`).
//!
//! `setup` exports the pin if needed, sets direction `out` and drives it
//! LOW. `cleanup` drives every bound pin LOW and unexports it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use diffuser_core::error::{DiffuserError, Result};
use diffuser_core::traits::Actuator;
use diffuser_core::types::Channel;

pub struct SysfsActuator {
    root: PathBuf,
    pins: Mutex<BTreeMap<Channel, u8>>,
}

impl SysfsActuator {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            pins: Mutex::new(BTreeMap::new()),
        }
    }

    fn pins(&self) -> MutexGuard<'_, BTreeMap<Channel, u8>> {
        self.pins.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn pin_dir(&self, pin: u8) -> PathBuf {
        self.root.join(format!("gpio{pin}"))
    }

    fn write_attr(&self, path: &Path, value: &str) -> Result<()> {
        std::fs::write(path, value)
            .map_err(|e| DiffuserError::ActuatorFault(format!("write {} to {}: {e}", value, path.display())))
    }

    fn write_level(&self, channel: Channel, high: bool) -> Result<()> {
        let pin = self
            .pins()
            .get(&channel)
            .copied()
            .ok_or_else(|| DiffuserError::InvalidChannel(format!("{channel} is not bound to a pin")))?;
        let value = if high { "1" } else { "0" };
        self.write_attr(&self.pin_dir(pin).join("value"), value)
    }
}

impl Actuator for SysfsActuator {
    fn name(&self) -> &str {
        "sysfs"
    }

    fn setup(&self, channel: Channel, pin: u8) -> Result<()> {
        let dir = self.pin_dir(pin);
        if !dir.exists() {
            self.write_attr(&self.root.join("export"), &pin.to_string())?;
        }
        self.write_attr(&dir.join("direction"), "out")?;
        self.write_attr(&dir.join("value"), "0")?;
        self.pins().insert(channel, pin);
        tracing::info!("🔌 Initialized pin {pin} for {channel}");
        Ok(())
    }

    fn set_high(&self, channel: Channel) -> Result<()> {
        self.write_level(channel, true)
    }

    fn set_low(&self, channel: Channel) -> Result<()> {
        self.write_level(channel, false)
    }

    fn cleanup(&self) -> Result<()> {
        let pins: Vec<u8> = std::mem::take(&mut *self.pins()).into_values().collect();
        let mut first_err = None;
        for pin in pins {
            let result = self
                .write_attr(&self.pin_dir(pin).join("value"), "0")
                .and_then(|_| self.write_attr(&self.root.join("unexport"), &pin.to_string()));
            if let Err(e) = result {
                tracing::warn!("⚠️ GPIO cleanup failed for pin {pin}: {e}");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn is_hardware(&self) -> bool {
        true
    }
}
