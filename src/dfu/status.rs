//! Decoding of DFU_GETSTATUS / DFU_GETSTATE responses.

use std::fmt;

use super::error::{DfuError, DfuResult};

/// Length of a DFU_GETSTATUS response.
pub const STATUS_RESPONSE_LEN: usize = 6;

/// Bootloader state as reported in `bState` (DFU 1.1, section 6.1.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DfuState {
    AppIdle = 0x00,
    AppDetach = 0x01,
    DfuIdle = 0x02,
    DfuDownloadSync = 0x03,
    DfuDownloadBusy = 0x04,
    DfuDownloadIdle = 0x05,
    DfuManifestSync = 0x06,
    DfuManifest = 0x07,
    DfuManifestWaitReset = 0x08,
    DfuUploadIdle = 0x09,
    DfuError = 0x0A,
}

impl DfuState {
    /// Parse a state from its wire value.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(DfuState::AppIdle),
            0x01 => Some(DfuState::AppDetach),
            0x02 => Some(DfuState::DfuIdle),
            0x03 => Some(DfuState::DfuDownloadSync),
            0x04 => Some(DfuState::DfuDownloadBusy),
            0x05 => Some(DfuState::DfuDownloadIdle),
            0x06 => Some(DfuState::DfuManifestSync),
            0x07 => Some(DfuState::DfuManifest),
            0x08 => Some(DfuState::DfuManifestWaitReset),
            0x09 => Some(DfuState::DfuUploadIdle),
            0x0A => Some(DfuState::DfuError),
            _ => None,
        }
    }

    /// Name used by the DFU class specification.
    pub fn name(&self) -> &'static str {
        match self {
            DfuState::AppIdle => "appIDLE",
            DfuState::AppDetach => "appDETACH",
            DfuState::DfuIdle => "dfuIDLE",
            DfuState::DfuDownloadSync => "dfuDNLOAD-SYNC",
            DfuState::DfuDownloadBusy => "dfuDNBUSY",
            DfuState::DfuDownloadIdle => "dfuDNLOAD-IDLE",
            DfuState::DfuManifestSync => "dfuMANIFEST-SYNC",
            DfuState::DfuManifest => "dfuMANIFEST",
            DfuState::DfuManifestWaitReset => "dfuMANIFEST-WAIT-RESET",
            DfuState::DfuUploadIdle => "dfuUPLOAD-IDLE",
            DfuState::DfuError => "dfuERROR",
        }
    }
}

impl fmt::Display for DfuState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome code as reported in `bStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DfuStatusCode {
    Ok = 0x00,
    ErrTarget = 0x01,
    ErrFile = 0x02,
    ErrWrite = 0x03,
    ErrErase = 0x04,
    ErrCheckErased = 0x05,
    ErrProg = 0x06,
    ErrVerify = 0x07,
    ErrAddress = 0x08,
    ErrNotDone = 0x09,
    ErrFirmware = 0x0A,
    ErrVendor = 0x0B,
    ErrUsbReset = 0x0C,
    ErrPowerOnReset = 0x0D,
    ErrUnknown = 0x0E,
    ErrStalledPkt = 0x0F,
}

impl DfuStatusCode {
    /// Parse a status code from its wire value.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(DfuStatusCode::Ok),
            0x01 => Some(DfuStatusCode::ErrTarget),
            0x02 => Some(DfuStatusCode::ErrFile),
            0x03 => Some(DfuStatusCode::ErrWrite),
            0x04 => Some(DfuStatusCode::ErrErase),
            0x05 => Some(DfuStatusCode::ErrCheckErased),
            0x06 => Some(DfuStatusCode::ErrProg),
            0x07 => Some(DfuStatusCode::ErrVerify),
            0x08 => Some(DfuStatusCode::ErrAddress),
            0x09 => Some(DfuStatusCode::ErrNotDone),
            0x0A => Some(DfuStatusCode::ErrFirmware),
            0x0B => Some(DfuStatusCode::ErrVendor),
            0x0C => Some(DfuStatusCode::ErrUsbReset),
            0x0D => Some(DfuStatusCode::ErrPowerOnReset),
            0x0E => Some(DfuStatusCode::ErrUnknown),
            0x0F => Some(DfuStatusCode::ErrStalledPkt),
            _ => None,
        }
    }

    /// Short name used by the DFU class specification.
    pub fn name(&self) -> &'static str {
        match self {
            DfuStatusCode::Ok => "OK",
            DfuStatusCode::ErrTarget => "errTARGET",
            DfuStatusCode::ErrFile => "errFILE",
            DfuStatusCode::ErrWrite => "errWRITE",
            DfuStatusCode::ErrErase => "errERASE",
            DfuStatusCode::ErrCheckErased => "errCHECK_ERASED",
            DfuStatusCode::ErrProg => "errPROG",
            DfuStatusCode::ErrVerify => "errVERIFY",
            DfuStatusCode::ErrAddress => "errADDRESS",
            DfuStatusCode::ErrNotDone => "errNOTDONE",
            DfuStatusCode::ErrFirmware => "errFIRMWARE",
            DfuStatusCode::ErrVendor => "errVENDOR",
            DfuStatusCode::ErrUsbReset => "errUSBR",
            DfuStatusCode::ErrPowerOnReset => "errPOR",
            DfuStatusCode::ErrUnknown => "errUNKNOWN",
            DfuStatusCode::ErrStalledPkt => "errSTALLEDPKT",
        }
    }

    /// Get a human-readable description.
    pub fn description(&self) -> &'static str {
        match self {
            DfuStatusCode::Ok => "No error condition is present",
            DfuStatusCode::ErrTarget => "File is not targeted for use by this device",
            DfuStatusCode::ErrFile => "File fails some vendor-specific verification test",
            DfuStatusCode::ErrWrite => "Device is unable to write memory",
            DfuStatusCode::ErrErase => "Memory erase function failed",
            DfuStatusCode::ErrCheckErased => "Memory erase check failed",
            DfuStatusCode::ErrProg => "Program memory function failed",
            DfuStatusCode::ErrVerify => "Programmed memory failed verification",
            DfuStatusCode::ErrAddress => "Received address is out of range",
            DfuStatusCode::ErrNotDone => "Received DFU_DNLOAD with wLength = 0 too early",
            DfuStatusCode::ErrFirmware => "Device firmware is corrupt",
            DfuStatusCode::ErrVendor => "Vendor-specific error (read protection active)",
            DfuStatusCode::ErrUsbReset => "Device detected unexpected USB reset",
            DfuStatusCode::ErrPowerOnReset => "Device detected unexpected power on reset",
            DfuStatusCode::ErrUnknown => "Something went wrong",
            DfuStatusCode::ErrStalledPkt => "Device stalled an unexpected request",
        }
    }
}

impl fmt::Display for DfuStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded DFU_GETSTATUS response.
///
/// Read fresh on every poll and never cached across commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DfuStatus {
    pub status: DfuStatusCode,
    /// Minimum time the host must wait before the next request (24 bits).
    pub poll_timeout_ms: u32,
    pub state: DfuState,
    pub string_index: u8,
}

impl DfuStatus {
    /// Parse a 6-byte GETSTATUS response.
    ///
    /// Layout: `bStatus, bwPollTimeout[3] (LE), bState, iString`.
    pub fn parse(data: &[u8]) -> DfuResult<Self> {
        if data.len() < STATUS_RESPONSE_LEN {
            return Err(DfuError::ShortTransfer {
                request: "GETSTATUS",
                expected: STATUS_RESPONSE_LEN,
                actual: data.len(),
            });
        }

        let status = DfuStatusCode::from_byte(data[0]).ok_or(DfuError::UnknownStatus(data[0]))?;
        let poll_timeout_ms = u32::from_le_bytes([data[1], data[2], data[3], 0]);
        let state = DfuState::from_byte(data[4]).ok_or(DfuError::UnknownState(data[4]))?;

        Ok(Self {
            status,
            poll_timeout_ms,
            state,
            string_index: data[5],
        })
    }

    /// Encode back into the 6-byte wire form.
    pub fn to_bytes(&self) -> [u8; STATUS_RESPONSE_LEN] {
        let timeout = self.poll_timeout_ms.to_le_bytes();
        [
            self.status as u8,
            timeout[0],
            timeout[1],
            timeout[2],
            self.state as u8,
            self.string_index,
        ]
    }

    /// Whether the device is idle and ready for a new command sequence.
    pub fn is_ready(&self) -> bool {
        self.state == DfuState::DfuIdle && self.status == DfuStatusCode::Ok
    }
}

impl fmt::Display for DfuStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "status={} state={} poll_timeout={}ms string={}",
            self.status, self.state, self.poll_timeout_ms, self.string_index
        )
    }
}
