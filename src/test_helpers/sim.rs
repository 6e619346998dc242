use std::collections::BTreeMap;
use std::ops::Range;

use crate::dfu::config::{
    page_start, DfuRequest, ERASED_BYTE, FIRST_DATA_BLOCK, FLASH_BASE_ADDRESS, FLASH_PAGE_SIZE,
    OPTION_BYTES_ADDRESS, OPTION_BYTES_LEN,
};
use crate::dfu::error::{DfuError, DfuResult};
use crate::dfu::status::{DfuState, DfuStatus, DfuStatusCode};
use crate::dfu::transport::DfuTransport;

/// Flash covered by the simulated part (128 KiB).
pub const SIM_FLASH: Range<u32> = FLASH_BASE_ADDRESS..FLASH_BASE_ADDRESS + 0x2_0000;

/// Option bytes the simulated part reports.
pub const SIM_OPTION_BYTES: [u8; OPTION_BYTES_LEN] = [
    0xA5, 0x5A, 0xFF, 0x00, 0xFF, 0x00, 0xFF, 0x00, 0xFF, 0x00, 0xFF, 0x00, 0xFF, 0x00, 0xFF, 0x00,
];

/// One control transfer seen by the simulator.
#[derive(Debug, Clone, PartialEq)]
pub struct Transfer {
    pub request: DfuRequest,
    pub value: u16,
    /// Payload of an OUT transfer; empty for IN transfers.
    pub data: Vec<u8>,
    /// `wLength` of the transfer.
    pub length: usize,
}

enum Pending {
    Command(Vec<u8>),
    Data { block: u16, data: Vec<u8> },
}

/// An STM32 DfuSe bootloader in software.
///
/// Follows the DFU 1.1 state machine closely enough for the command layer:
/// a DNLOAD moves to dfuDNLOAD-SYNC, the first GETSTATUS executes the block
/// and reports dfuDNBUSY, the next one reports the outcome.
pub struct SimulatedBootloader {
    pub state: DfuState,
    pub status: DfuStatusCode,
    pub address_pointer: u32,
    /// Sparse memory; absent bytes read as erased.
    pub memory: BTreeMap<u32, u8>,
    pub transfers: Vec<Transfer>,
    pub resets: u32,
    pub read_protected: bool,
    /// When false, CLRSTATUS leaves dfuERROR untouched.
    pub clear_status_recovers: bool,
    /// Report dfuDNLOAD-IDLE straight after a DNLOAD, skipping dfuDNBUSY.
    pub skip_busy: bool,
    /// Upcoming GETSTATUS requests that fail at the USB level.
    pub failing_status_polls: u32,
    pending: Option<Pending>,
    outcome: Option<Result<(), DfuStatusCode>>,
}

impl SimulatedBootloader {
    /// An idle bootloader with erased flash and default option bytes.
    pub fn new() -> Self {
        let mut sim = Self {
            state: DfuState::DfuIdle,
            status: DfuStatusCode::Ok,
            address_pointer: FLASH_BASE_ADDRESS,
            memory: BTreeMap::new(),
            transfers: Vec::new(),
            resets: 0,
            read_protected: false,
            clear_status_recovers: true,
            skip_busy: false,
            failing_status_polls: 0,
            pending: None,
            outcome: None,
        };
        sim.load(OPTION_BYTES_ADDRESS, &SIM_OPTION_BYTES);
        sim
    }

    pub fn in_state(mut self, state: DfuState, status: DfuStatusCode) -> Self {
        self.state = state;
        self.status = status;
        self
    }

    pub fn with_read_protection(mut self) -> Self {
        self.read_protected = true;
        self
    }

    pub fn stuck_in_error(mut self) -> Self {
        self.clear_status_recovers = false;
        self
    }

    pub fn skipping_busy_state(mut self) -> Self {
        self.skip_busy = true;
        self
    }

    pub fn failing_status_polls(mut self, count: u32) -> Self {
        self.failing_status_polls = count;
        self
    }

    /// Place bytes in memory without going through the protocol.
    pub fn load(&mut self, address: u32, bytes: &[u8]) {
        for (offset, &byte) in bytes.iter().enumerate() {
            self.memory.insert(address + offset as u32, byte);
        }
    }

    pub fn read_memory(&self, address: u32, len: usize) -> Vec<u8> {
        (0..len as u32)
            .map(|offset| {
                self.memory
                    .get(&(address + offset))
                    .copied()
                    .unwrap_or(ERASED_BYTE)
            })
            .collect()
    }

    pub fn count(&self, request: DfuRequest) -> usize {
        self.transfers
            .iter()
            .filter(|t| t.request == request)
            .count()
    }

    pub fn downloads(&self) -> Vec<&Transfer> {
        self.of_kind(DfuRequest::Download)
    }

    pub fn uploads(&self) -> Vec<&Transfer> {
        self.of_kind(DfuRequest::Upload)
    }

    fn of_kind(&self, request: DfuRequest) -> Vec<&Transfer> {
        self.transfers
            .iter()
            .filter(|t| t.request == request)
            .collect()
    }

    fn is_valid(&self, address: u32, len: usize) -> bool {
        let end = address as u64 + len as u64;
        let within = |range: &Range<u32>| {
            address >= range.start && end <= range.end as u64
        };
        let option_bytes = OPTION_BYTES_ADDRESS..OPTION_BYTES_ADDRESS + OPTION_BYTES_LEN as u32;
        within(&SIM_FLASH) || within(&option_bytes)
    }

    fn stall(&mut self, status: DfuStatusCode) -> DfuError {
        self.state = DfuState::DfuError;
        self.status = status;
        DfuError::Usb(rusb::Error::Pipe)
    }

    fn fail(&mut self, status: DfuStatusCode) {
        self.state = DfuState::DfuError;
        self.status = status;
    }

    fn erase_range(&mut self, range: Range<u32>) {
        let keys: Vec<u32> = self.memory.range(range).map(|(&a, _)| a).collect();
        for key in keys {
            self.memory.remove(&key);
        }
    }

    fn execute(&mut self, pending: Pending) -> Result<(), DfuStatusCode> {
        match pending {
            Pending::Command(command) => self.execute_command(&command),
            Pending::Data { block, data } => {
                let offset = (block - FIRST_DATA_BLOCK) as u32 * FLASH_PAGE_SIZE as u32;
                let address = self.address_pointer.wrapping_add(offset);
                if self.read_protected {
                    return Err(DfuStatusCode::ErrVendor);
                }
                if !self.is_valid(address, data.len()) {
                    return Err(DfuStatusCode::ErrTarget);
                }
                let current = self.read_memory(address, data.len());
                if current.iter().any(|&b| b != ERASED_BYTE) {
                    return Err(DfuStatusCode::ErrWrite);
                }
                self.load(address, &data);
                Ok(())
            }
        }
    }

    fn execute_command(&mut self, command: &[u8]) -> Result<(), DfuStatusCode> {
        let address = |bytes: &[u8]| u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);

        match (command[0], command.len()) {
            (0x21, 5) => {
                let target = address(command);
                if !self.is_valid(target, 1) {
                    return Err(DfuStatusCode::ErrTarget);
                }
                self.address_pointer = target;
                Ok(())
            }
            (0x41, 5) => {
                let target = address(command);
                if self.read_protected {
                    return Err(DfuStatusCode::ErrVendor);
                }
                if !SIM_FLASH.contains(&target) {
                    return Err(DfuStatusCode::ErrTarget);
                }
                let start = page_start(target, FLASH_PAGE_SIZE as u32);
                self.erase_range(start..start + FLASH_PAGE_SIZE as u32);
                Ok(())
            }
            (0x41, 1) => {
                if self.read_protected {
                    return Err(DfuStatusCode::ErrVendor);
                }
                self.erase_range(SIM_FLASH);
                Ok(())
            }
            _ => Err(DfuStatusCode::ErrStalledPkt),
        }
    }

    /// State change caused by a GETSTATUS request.
    fn advance(&mut self) {
        match self.state {
            DfuState::DfuDownloadSync => {
                let outcome = match self.pending.take() {
                    Some(pending) => self.execute(pending),
                    None => Ok(()),
                };
                if self.skip_busy {
                    self.finish(outcome);
                } else {
                    self.outcome = Some(outcome);
                    self.state = DfuState::DfuDownloadBusy;
                }
            }
            DfuState::DfuDownloadBusy => {
                let outcome = self.outcome.take().unwrap_or(Ok(()));
                self.finish(outcome);
            }
            DfuState::DfuManifestSync => self.state = DfuState::DfuManifest,
            DfuState::DfuManifest => self.state = DfuState::DfuManifestWaitReset,
            _ => {}
        }
    }

    fn finish(&mut self, outcome: Result<(), DfuStatusCode>) {
        match outcome {
            Ok(()) => {
                self.state = DfuState::DfuDownloadIdle;
                self.status = DfuStatusCode::Ok;
            }
            Err(code) => self.fail(code),
        }
    }

    fn upload(&mut self, block: u16, buffer: &mut [u8]) -> DfuResult<usize> {
        if !matches!(self.state, DfuState::DfuIdle | DfuState::DfuUploadIdle) {
            return Err(self.stall(DfuStatusCode::ErrStalledPkt));
        }

        match block {
            0 => {
                let commands = [0x00, 0x21, 0x41, 0x92];
                let len = buffer.len().min(commands.len());
                buffer[..len].copy_from_slice(&commands[..len]);
                self.state = DfuState::DfuUploadIdle;
                Ok(len)
            }
            1 => Err(self.stall(DfuStatusCode::ErrStalledPkt)),
            _ => {
                if self.read_protected {
                    self.fail(DfuStatusCode::ErrVendor);
                    return Ok(0);
                }
                let offset = (block - FIRST_DATA_BLOCK) as u32 * buffer.len() as u32;
                let address = self.address_pointer.wrapping_add(offset);
                if !self.is_valid(address, buffer.len()) {
                    self.fail(DfuStatusCode::ErrTarget);
                    return Ok(0);
                }
                buffer.copy_from_slice(&self.read_memory(address, buffer.len()));
                self.state = DfuState::DfuUploadIdle;
                Ok(buffer.len())
            }
        }
    }
}

impl Default for SimulatedBootloader {
    fn default() -> Self {
        Self::new()
    }
}

impl DfuTransport for SimulatedBootloader {
    fn control_out(&mut self, request: DfuRequest, value: u16, data: &[u8]) -> DfuResult<usize> {
        self.transfers.push(Transfer {
            request,
            value,
            data: data.to_vec(),
            length: data.len(),
        });

        match request {
            DfuRequest::Download => {
                if !matches!(self.state, DfuState::DfuIdle | DfuState::DfuDownloadIdle) {
                    return Err(self.stall(DfuStatusCode::ErrStalledPkt));
                }
                if data.is_empty() {
                    self.state = DfuState::DfuManifestSync;
                    return Ok(0);
                }
                self.pending = Some(if value == 0 {
                    Pending::Command(data.to_vec())
                } else {
                    Pending::Data {
                        block: value,
                        data: data.to_vec(),
                    }
                });
                if value == 1 {
                    return Err(self.stall(DfuStatusCode::ErrStalledPkt));
                }
                self.state = DfuState::DfuDownloadSync;
                Ok(data.len())
            }
            DfuRequest::ClearStatus => {
                if self.state == DfuState::DfuError && self.clear_status_recovers {
                    self.state = DfuState::DfuIdle;
                    self.status = DfuStatusCode::Ok;
                }
                Ok(0)
            }
            DfuRequest::Abort => {
                match self.state {
                    DfuState::DfuDownloadBusy | DfuState::DfuManifest => {
                        self.fail(DfuStatusCode::ErrStalledPkt)
                    }
                    DfuState::DfuDownloadSync
                    | DfuState::DfuDownloadIdle
                    | DfuState::DfuManifestSync
                    | DfuState::DfuUploadIdle
                    | DfuState::DfuIdle => {
                        self.pending = None;
                        self.state = DfuState::DfuIdle;
                    }
                    _ => {}
                }
                Ok(0)
            }
            DfuRequest::Detach => {
                if self.state == DfuState::AppIdle {
                    self.state = DfuState::AppDetach;
                }
                Ok(0)
            }
            _ => Err(self.stall(DfuStatusCode::ErrStalledPkt)),
        }
    }

    fn control_in(
        &mut self,
        request: DfuRequest,
        value: u16,
        buffer: &mut [u8],
    ) -> DfuResult<usize> {
        self.transfers.push(Transfer {
            request,
            value,
            data: Vec::new(),
            length: buffer.len(),
        });

        match request {
            DfuRequest::GetStatus => {
                if self.failing_status_polls > 0 {
                    self.failing_status_polls -= 1;
                    return Err(DfuError::Usb(rusb::Error::Timeout));
                }
                self.advance();
                let report = DfuStatus {
                    status: self.status,
                    poll_timeout_ms: 0,
                    state: self.state,
                    string_index: 0,
                }
                .to_bytes();
                let len = buffer.len().min(report.len());
                buffer[..len].copy_from_slice(&report[..len]);
                Ok(len)
            }
            DfuRequest::GetState => {
                buffer[0] = self.state as u8;
                Ok(1)
            }
            DfuRequest::Upload => self.upload(value, buffer),
            _ => Err(self.stall(DfuStatusCode::ErrStalledPkt)),
        }
    }

    fn reset(&mut self) -> DfuResult<()> {
        self.resets += 1;
        self.pending = None;
        self.state = DfuState::DfuIdle;
        self.status = DfuStatusCode::Ok;
        Ok(())
    }
}
