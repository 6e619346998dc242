//! USB control-transfer transport for DFU communication.
//!
//! Provides a trait-based abstraction over the control pipe, enabling both
//! real hardware and simulated bootloaders in tests.

use std::time::Duration;

use log::{debug, trace};
use rusb::{Device, DeviceHandle, Direction, GlobalContext, Recipient, RequestType};

#[cfg(test)]
use mockall::automock;

use super::config::DfuRequest;
use super::error::DfuResult;

/// Trait for DFU transport operations.
///
/// Every request is a class-specific, interface-recipient control transfer
/// (DFU 1.1, section 3). Implementations must block until the transfer
/// completes or times out.
#[cfg_attr(test, automock)]
pub trait DfuTransport: Send {
    /// Host-to-device request. Returns the number of bytes sent.
    fn control_out(&mut self, request: DfuRequest, value: u16, data: &[u8]) -> DfuResult<usize>;

    /// Device-to-host request. Returns the number of bytes received.
    fn control_in(
        &mut self,
        request: DfuRequest,
        value: u16,
        buffer: &mut [u8],
    ) -> DfuResult<usize>;

    /// Issue a USB port reset. The device re-enumerates afterwards.
    fn reset(&mut self) -> DfuResult<()>;
}

/// An open, claimed DFU interface on a real USB device.
///
/// The interface is released when the value is dropped and the handle is
/// closed right after, so every exit path cleans up.
pub struct DfuDevice {
    handle: DeviceHandle<GlobalContext>,
    interface: u8,
    timeout: Duration,
}

impl DfuDevice {
    /// Open `device`, claim `interface` and select `alt_setting`.
    pub fn open(
        device: &Device<GlobalContext>,
        interface: u8,
        alt_setting: u8,
        timeout: Duration,
    ) -> DfuResult<Self> {
        let handle = device.open()?;

        // Not supported on every platform; claiming still works without it.
        handle.set_auto_detach_kernel_driver(true).ok();
        handle.claim_interface(interface)?;

        let opened = Self {
            handle,
            interface,
            timeout,
        };
        opened.handle.set_alternate_setting(interface, alt_setting)?;

        debug!(
            "Opened DFU interface {} (alt {}) on bus {} address {}",
            interface,
            alt_setting,
            device.bus_number(),
            device.address()
        );

        Ok(opened)
    }

    /// Claimed interface number, used as `wIndex` of every request.
    pub fn interface(&self) -> u8 {
        self.interface
    }
}

impl DfuTransport for DfuDevice {
    fn control_out(&mut self, request: DfuRequest, value: u16, data: &[u8]) -> DfuResult<usize> {
        trace!(
            "{} wValue={} wLength={} -> interface {}",
            request.name(),
            value,
            data.len(),
            self.interface
        );

        let request_type =
            rusb::request_type(Direction::Out, RequestType::Class, Recipient::Interface);
        let written = self.handle.write_control(
            request_type,
            request as u8,
            value,
            self.interface as u16,
            data,
            self.timeout,
        )?;

        Ok(written)
    }

    fn control_in(
        &mut self,
        request: DfuRequest,
        value: u16,
        buffer: &mut [u8],
    ) -> DfuResult<usize> {
        trace!(
            "{} wValue={} wLength={} <- interface {}",
            request.name(),
            value,
            buffer.len(),
            self.interface
        );

        let request_type =
            rusb::request_type(Direction::In, RequestType::Class, Recipient::Interface);
        let read = self.handle.read_control(
            request_type,
            request as u8,
            value,
            self.interface as u16,
            buffer,
            self.timeout,
        )?;

        Ok(read)
    }

    fn reset(&mut self) -> DfuResult<()> {
        self.handle.reset()?;
        Ok(())
    }
}

impl Drop for DfuDevice {
    fn drop(&mut self) {
        // Fails with NoDevice after a reset; nothing left to release then.
        if let Err(e) = self.handle.release_interface(self.interface) {
            debug!("Releasing interface {}: {}", self.interface, e);
        }
    }
}
