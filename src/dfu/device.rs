//! Device detection for STM32 DfuSe bootloaders.
//!
//! Walks the USB bus for devices matching a VID/PID pair that expose a
//! DFU-mode interface (class 0xFE, subclass 0x01, protocol 0x02).

use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use rusb::{Device, GlobalContext};
use serde::Serialize;

use super::commands::DfuCommands;
use super::config::{is_dfu_mode_interface, REENUMERATION_DELAY};
use super::error::{DfuError, DfuResult};
use super::idle::IdleOutcome;
use super::transport::DfuDevice;
use crate::settings::ProgrammerSettings;

/// Information about a detected DFU interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stm32DeviceInfo {
    /// USB bus number.
    pub bus: u8,
    /// Device address on the bus.
    pub address: u8,
    /// USB Vendor ID.
    pub vid: u16,
    /// USB Product ID.
    pub pid: u16,
    /// DFU interface number.
    pub interface: u8,
    /// Alternate setting selected when opening.
    pub alt_setting: u8,
    /// Interface string, e.g. the DfuSe memory layout (if readable).
    pub description: Option<String>,
}

impl Stm32DeviceInfo {
    /// Get a display label for this device.
    pub fn display_label(&self) -> String {
        let base = format!(
            "{:04x}:{:04x} bus {} address {} interface {} alt {}",
            self.vid, self.pid, self.bus, self.address, self.interface, self.alt_setting
        );
        match &self.description {
            Some(description) => format!("{} \"{}\"", base, description),
            None => base,
        }
    }
}

/// A detected STM32 bootloader that can be opened.
pub struct Stm32Device {
    pub info: Stm32DeviceInfo,
    device: Device<GlobalContext>,
}

impl Stm32Device {
    /// Open the device and claim its DFU interface.
    pub fn open(&self, timeout: Duration) -> DfuResult<DfuDevice> {
        DfuDevice::open(
            &self.device,
            self.info.interface,
            self.info.alt_setting,
            timeout,
        )
    }
}

/// Find all attached devices with the given VID/PID and a DFU-mode interface.
///
/// Only alternate setting 0 of each interface is reported; on STM32 parts
/// that is the internal flash.
pub fn find_stm32_devices(vid: u16, pid: u16) -> DfuResult<Vec<Stm32Device>> {
    let mut devices = Vec::new();

    for device in rusb::devices()?.iter() {
        let descriptor = match device.device_descriptor() {
            Ok(descriptor) => descriptor,
            Err(e) => {
                debug!(
                    "Skipping bus {} address {}: {}",
                    device.bus_number(),
                    device.address(),
                    e
                );
                continue;
            }
        };
        if descriptor.vendor_id() != vid || descriptor.product_id() != pid {
            continue;
        }

        let config = match device.active_config_descriptor() {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Cannot read configuration of {:04x}:{:04x}: {}",
                    vid, pid, e
                );
                continue;
            }
        };

        for interface in config.interfaces() {
            for setting in interface.descriptors() {
                if setting.setting_number() != 0
                    || !is_dfu_mode_interface(
                        setting.class_code(),
                        setting.sub_class_code(),
                        setting.protocol_code(),
                    )
                {
                    continue;
                }

                let info = Stm32DeviceInfo {
                    bus: device.bus_number(),
                    address: device.address(),
                    vid,
                    pid,
                    interface: setting.interface_number(),
                    alt_setting: setting.setting_number(),
                    description: read_interface_string(&device, &setting),
                };
                debug!("Found {}", info.display_label());
                devices.push(Stm32Device {
                    info,
                    device: device.clone(),
                });
            }
        }
    }

    Ok(devices)
}

/// Best effort; many hosts refuse to open devices they do not own.
fn read_interface_string(
    device: &Device<GlobalContext>,
    setting: &rusb::InterfaceDescriptor<'_>,
) -> Option<String> {
    setting.description_string_index()?;

    let timeout = Duration::from_millis(500);
    let handle = device.open().ok()?;
    let language = *handle.read_languages(timeout).ok()?.first()?;
    handle
        .read_interface_string(language, setting, timeout)
        .map_err(|e| debug!("Reading interface string: {}", e))
        .ok()
}

/// Open the first matching bootloader and bring it to dfuIDLE.
///
/// If recovery resets the device, it is re-enumerated and opened once more.
pub fn connect(settings: &ProgrammerSettings) -> DfuResult<DfuCommands<DfuDevice>> {
    let mut reset_seen = false;

    loop {
        let device = find_stm32_devices(settings.vendor_id, settings.product_id)?
            .into_iter()
            .next()
            .ok_or(DfuError::NoDeviceFound)?;
        info!("Using {}", device.info.display_label());

        let transport = device.open(settings.transfer_timeout())?;
        let mut commands = DfuCommands::new(transport)
            .with_detach_timeout(settings.detach_timeout_ms)
            .with_idle_retries(settings.idle_retries);

        match commands.make_idle(true) {
            IdleOutcome::Ready => return Ok(commands),
            IdleOutcome::DeviceReset if !reset_seen => {
                reset_seen = true;
                drop(commands);
                info!("Device was reset, waiting for it to re-enumerate");
                thread::sleep(REENUMERATION_DELAY);
            }
            IdleOutcome::DeviceReset => return Err(DfuError::DeviceReset),
            IdleOutcome::Failed => {
                return Err(DfuError::IdleFailed {
                    attempts: settings.idle_retries,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(description: Option<&str>) -> Stm32DeviceInfo {
        Stm32DeviceInfo {
            bus: 1,
            address: 7,
            vid: 0x0483,
            pid: 0xdf11,
            interface: 0,
            alt_setting: 0,
            description: description.map(str::to_string),
        }
    }

    #[test]
    fn test_display_label() {
        assert_eq!(
            info(None).display_label(),
            "0483:df11 bus 1 address 7 interface 0 alt 0"
        );
        assert!(info(Some("@Internal Flash  /0x08000000/064*0002Kg"))
            .display_label()
            .ends_with("\"@Internal Flash  /0x08000000/064*0002Kg\""));
    }

    #[test]
    fn test_device_info_serializes() {
        let json = serde_json::to_string(&info(None)).unwrap();
        assert!(json.contains("\"vid\":1155"));
        assert!(json.contains("\"alt_setting\":0"));
    }
}
