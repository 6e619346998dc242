//! Error types for the DfuSe codec and the STM32 DFU protocol driver.

use thiserror::Error;

use super::status::{DfuState, DfuStatusCode};

/// Result type alias for DFU operations.
pub type DfuResult<T> = Result<T, DfuError>;

/// Errors that can occur during DFU operations.
#[derive(Debug, Error)]
pub enum DfuError {
    /// Control transfer failed in the USB stack.
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    /// Standard I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error for the settings file.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The device moved fewer bytes than the request required.
    #[error("{request}: short transfer, expected {expected} bytes, got {actual}")]
    ShortTransfer {
        request: &'static str,
        expected: usize,
        actual: usize,
    },

    /// GETSTATUS reported a `bStatus` outside the DFU 1.1 range.
    #[error("Unknown DFU status code 0x{0:02X}")]
    UnknownStatus(u8),

    /// GETSTATUS/GETSTATE reported a `bState` outside the DFU 1.1 range.
    #[error("Unknown DFU state 0x{0:02X}")]
    UnknownState(u8),

    /// The bootloader was not in the state the command sequence requires.
    #[error(
        "{operation} (block {block}): expected state {expected}, device is in {actual} ({status})"
    )]
    UnexpectedState {
        operation: &'static str,
        block: u16,
        expected: DfuState,
        actual: DfuState,
        status: DfuStatusCode,
    },

    /// dfuERROR with errTARGET: the address is not valid on this device.
    #[error("{operation} (block {block}): address 0x{address:08X} is unsupported by the target")]
    AddressUnsupported {
        operation: &'static str,
        block: u16,
        address: u32,
    },

    /// dfuERROR with errVENDOR: flash read protection is enabled.
    #[error("{operation} (block {block}): read protection is enabled")]
    ReadProtected { operation: &'static str, block: u16 },

    /// dfuERROR with any other status.
    #[error("{operation} (block {block}): device reported {status} in {state}")]
    DeviceError {
        operation: &'static str,
        block: u16,
        status: DfuStatusCode,
        state: DfuState,
    },

    /// The bootloader could not be brought back to dfuIDLE.
    #[error("Device did not reach dfuIDLE after {attempts} attempts")]
    IdleFailed { attempts: u32 },

    /// The idle-recovery procedure reset the device; it must be re-opened.
    #[error("Device was reset and must be re-opened")]
    DeviceReset,

    /// A container section did not start with its fixed signature.
    #[error("Invalid {section} signature: {found:?}")]
    InvalidSignature {
        section: &'static str,
        found: Vec<u8>,
    },

    /// The container ended in the middle of a section.
    #[error("Truncated {section}: needed {needed} bytes, {available} available")]
    Truncated {
        section: &'static str,
        needed: usize,
        available: usize,
    },

    /// The suffix CRC does not match the file contents.
    #[error("CRC mismatch: file says 0x{expected:08X}, contents hash to 0x{actual:08X}")]
    CrcMismatch { expected: u32, actual: u32 },

    /// A length field disagrees with the sections actually present.
    #[error("{field} mismatch: header says {declared}, contents give {actual}")]
    SizeMismatch {
        field: &'static str,
        declared: u64,
        actual: u64,
    },

    /// Bytes remain after the DFU suffix.
    #[error("{count} unexpected bytes after the DFU suffix")]
    TrailingData { count: usize },

    /// Caller supplied an invalid address, size or payload.
    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// No STM32 DFU device is attached.
    #[error("No STM32 DFU device found")]
    NoDeviceFound,
}

impl DfuError {
    /// Whether this error was reported by the bootloader through dfuERROR.
    pub fn is_device_reported(&self) -> bool {
        matches!(
            self,
            DfuError::AddressUnsupported { .. }
                | DfuError::ReadProtected { .. }
                | DfuError::DeviceError { .. }
        )
    }

    /// Whether this error comes from a malformed DfuSe container.
    pub fn is_malformed_container(&self) -> bool {
        matches!(
            self,
            DfuError::InvalidSignature { .. }
                | DfuError::Truncated { .. }
                | DfuError::CrcMismatch { .. }
                | DfuError::SizeMismatch { .. }
                | DfuError::TrailingData { .. }
        )
    }

    /// Get a user-friendly error code for support purposes.
    pub fn error_code(&self) -> &'static str {
        match self {
            DfuError::Usb(_) => "DFU-001",
            DfuError::Io(_) => "DFU-002",
            DfuError::Json(_) => "DFU-004",
            DfuError::ShortTransfer { .. } => "DFU-005",
            DfuError::UnknownStatus(_) => "DFU-010",
            DfuError::UnknownState(_) => "DFU-011",
            DfuError::UnexpectedState { .. } => "DFU-020",
            DfuError::IdleFailed { .. } => "DFU-021",
            DfuError::DeviceReset => "DFU-022",
            DfuError::AddressUnsupported { .. } => "DFU-030",
            DfuError::ReadProtected { .. } => "DFU-031",
            DfuError::DeviceError { .. } => "DFU-032",
            DfuError::InvalidSignature { .. } => "DFU-040",
            DfuError::Truncated { .. } => "DFU-041",
            DfuError::CrcMismatch { .. } => "DFU-042",
            DfuError::SizeMismatch { .. } => "DFU-043",
            DfuError::TrailingData { .. } => "DFU-044",
            DfuError::NoDeviceFound => "DFU-050",
            DfuError::InvalidArgument { .. } => "DFU-060",
        }
    }
}
