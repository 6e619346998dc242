//! Device listing.

use stmdfu::dfu::{find_stm32_devices, DfuError, DfuResult, Stm32DeviceInfo};
use stmdfu::settings::ProgrammerSettings;

/// Print every attached bootloader interface.
///
/// Finding none is reported as [`DfuError::NoDeviceFound`].
pub fn list_devices(settings: &ProgrammerSettings, json: bool) -> DfuResult<()> {
    let devices: Vec<Stm32DeviceInfo> = find_stm32_devices(settings.vendor_id, settings.product_id)?
        .into_iter()
        .map(|d| d.info)
        .collect();

    if devices.is_empty() {
        return Err(DfuError::NoDeviceFound);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
    } else {
        for (index, device) in devices.iter().enumerate() {
            println!("[{}] {}", index, device.display_label());
        }
    }
    Ok(())
}
