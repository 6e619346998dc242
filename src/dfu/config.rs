//! Configuration constants for the STM32 DfuSe bootloader protocol.

use std::time::Duration;

// ============================================================================
// USB Device Identifiers
// ============================================================================

/// STMicroelectronics USB Vendor ID.
pub const STM32_VID: u16 = 0x0483;

/// Product ID of the STM32 system-memory DFU bootloader.
pub const STM32_DFU_PID: u16 = 0xDF11;

/// Interface class for application-specific interfaces.
pub const DFU_INTERFACE_CLASS: u8 = 0xFE;

/// DFU interface subclass.
pub const DFU_INTERFACE_SUBCLASS: u8 = 0x01;

/// DFU-mode interface protocol (0x01 is runtime mode).
pub const DFU_INTERFACE_PROTOCOL: u8 = 0x02;

// ============================================================================
// Timeouts
// ============================================================================

/// Per-transfer timeout for every control request.
/// Erasing and programming can hold a request for a while.
pub const DFU_TRANSFER_TIMEOUT: Duration = Duration::from_millis(2500);

/// Time the device waits for a USB reset after DFU_DETACH.
pub const DFU_DETACH_TIMEOUT_MS: u16 = 1000;

/// Wait before looking for a device again after resetting it.
pub const REENUMERATION_DELAY: Duration = Duration::from_millis(1500);

// ============================================================================
// DFU Class Requests (DFU 1.1, table 3.2)
// ============================================================================

/// DFU class-specific request codes (`bRequest`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DfuRequest {
    Detach = 0,
    Download = 1,
    Upload = 2,
    GetStatus = 3,
    ClearStatus = 4,
    GetState = 5,
    Abort = 6,
}

impl DfuRequest {
    /// Request name as used in log and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            DfuRequest::Detach => "DETACH",
            DfuRequest::Download => "DNLOAD",
            DfuRequest::Upload => "UPLOAD",
            DfuRequest::GetStatus => "GETSTATUS",
            DfuRequest::ClearStatus => "CLRSTATUS",
            DfuRequest::GetState => "GETSTATE",
            DfuRequest::Abort => "ABORT",
        }
    }
}

// ============================================================================
// DfuSe Commands (AN3156)
// ============================================================================

/// Lists the supported commands (UPLOAD on block 0).
pub const DFUSE_CMD_GET: u8 = 0x00;

/// Set the address pointer.
pub const DFUSE_CMD_SET_ADDRESS: u8 = 0x21;

/// Erase a page, or mass erase when sent without an address.
pub const DFUSE_CMD_ERASE: u8 = 0x41;

/// Remove read protection (triggers a mass erase).
pub const DFUSE_CMD_READ_UNPROTECT: u8 = 0x92;

/// Block number used for DfuSe commands.
pub const COMMAND_BLOCK: u16 = 0;

/// First block number that carries flash data. Blocks 0 and 1 are reserved.
pub const FIRST_DATA_BLOCK: u16 = 2;

// ============================================================================
// Flash Layout
// ============================================================================

/// Transfer size and flash page size of the STM32 bootloader.
pub const FLASH_PAGE_SIZE: usize = 2048;

/// Value of erased flash, used to pad the final partial page.
pub const ERASED_BYTE: u8 = 0xFF;

/// Start of the main flash memory.
pub const FLASH_BASE_ADDRESS: u32 = 0x0800_0000;

/// Location of the option bytes.
pub const OPTION_BYTES_ADDRESS: u32 = 0x1FFF_F800;

/// Number of option bytes returned by the bootloader.
pub const OPTION_BYTES_LEN: usize = 16;

/// Number of bytes returned by the GET command.
pub const GET_COMMANDS_LEN: usize = 4;

// ============================================================================
// Retry Configuration
// ============================================================================

/// Iterations of the idle-recovery loop before giving up.
pub const IDLE_RETRIES: u32 = 4;

// ============================================================================
// Helper Functions
// ============================================================================

/// Check if an interface descriptor describes a DFU-mode interface.
pub fn is_dfu_mode_interface(class: u8, subclass: u8, protocol: u8) -> bool {
    class == DFU_INTERFACE_CLASS
        && subclass == DFU_INTERFACE_SUBCLASS
        && protocol == DFU_INTERFACE_PROTOCOL
}

/// Name of a DfuSe command byte as reported by GET.
pub fn dfuse_command_name(opcode: u8) -> &'static str {
    match opcode {
        DFUSE_CMD_GET => "GET",
        DFUSE_CMD_SET_ADDRESS => "SET_ADDRESS",
        DFUSE_CMD_ERASE => "ERASE",
        DFUSE_CMD_READ_UNPROTECT => "READ_UNPROTECT",
        _ => "unknown",
    }
}

/// Number of `FLASH_PAGE_SIZE` blocks needed to hold `length` bytes.
pub fn page_count(length: usize) -> usize {
    length.div_ceil(FLASH_PAGE_SIZE)
}

/// Start address of the flash page containing `address`.
pub fn page_start(address: u32, page_size: u32) -> u32 {
    address - (address % page_size)
}
