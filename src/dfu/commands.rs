//! DfuSe command layer (AN3156) on top of the raw DFU requests.
//!
//! Every DfuSe command is a DNLOAD on block 0 followed by two GETSTATUS
//! polls: the first starts execution and must report dfuDNBUSY, the second
//! reports the outcome. Flash data travels in blocks numbered from 2; the
//! device computes the target address as
//! `pointer + (block - 2) * transfer_size`.

use log::{debug, info};

use super::config::{
    page_count, COMMAND_BLOCK, DFUSE_CMD_ERASE, DFUSE_CMD_SET_ADDRESS, DFU_DETACH_TIMEOUT_MS,
    ERASED_BYTE, FIRST_DATA_BLOCK, FLASH_BASE_ADDRESS, FLASH_PAGE_SIZE, GET_COMMANDS_LEN,
    IDLE_RETRIES, OPTION_BYTES_ADDRESS, OPTION_BYTES_LEN,
};
use super::error::{DfuError, DfuResult};
use super::requests::DfuRequests;
use super::status::{DfuState, DfuStatus, DfuStatusCode};
use super::transport::DfuTransport;

/// DfuSe command interface for one open bootloader.
pub struct DfuCommands<T: DfuTransport> {
    pub(super) requests: DfuRequests<T>,
    pub(super) detach_timeout_ms: u16,
    pub(super) idle_retries: u32,
    /// Last address pointer the device accepted.
    address_pointer: u32,
}

impl<T: DfuTransport> DfuCommands<T> {
    pub fn new(transport: T) -> Self {
        Self {
            requests: DfuRequests::new(transport),
            detach_timeout_ms: DFU_DETACH_TIMEOUT_MS,
            idle_retries: IDLE_RETRIES,
            // The bootloader starts with its pointer at the base of flash
            address_pointer: FLASH_BASE_ADDRESS,
        }
    }

    pub fn with_detach_timeout(mut self, timeout_ms: u16) -> Self {
        self.detach_timeout_ms = timeout_ms;
        self
    }

    /// At least one iteration is always made.
    pub fn with_idle_retries(mut self, retries: u32) -> Self {
        self.idle_retries = retries.max(1);
        self
    }

    /// Raw request access, for callers that need a single request.
    pub fn requests(&mut self) -> &mut DfuRequests<T> {
        &mut self.requests
    }

    pub fn transport(&self) -> &T {
        self.requests.transport()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.requests.transport_mut()
    }

    pub fn into_inner(self) -> T {
        self.requests.into_inner()
    }

    pub fn address_pointer(&self) -> u32 {
        self.address_pointer
    }

    /// SET_ADDRESS: move the pointer used by subsequent data blocks.
    pub fn set_address_pointer(&mut self, address: u32) -> DfuResult<()> {
        debug!("Set address pointer to 0x{:08X}", address);
        let command = address_command(DFUSE_CMD_SET_ADDRESS, address);
        self.run_command("set_address_pointer", &command, address)?;
        self.address_pointer = address;
        Ok(())
    }

    /// ERASE: erase the flash page containing `address`.
    pub fn erase_page(&mut self, address: u32) -> DfuResult<()> {
        self.ensure_idle(false)?;
        debug!("Erase page at 0x{:08X}", address);
        let command = address_command(DFUSE_CMD_ERASE, address);
        self.run_command("erase_page", &command, address)
    }

    /// ERASE without an address: erase the whole flash.
    pub fn mass_erase(&mut self) -> DfuResult<()> {
        self.ensure_idle(false)?;
        info!("Mass erase");
        let address = self.address_pointer;
        self.run_command("mass_erase", &[DFUSE_CMD_ERASE], address)
    }

    /// Program `data` starting at the current address pointer.
    ///
    /// The final block is padded with erased bytes to a full page.
    /// `on_progress` receives `(bytes_written, total)` after every block.
    pub fn write_flash<F>(&mut self, data: &[u8], mut on_progress: F) -> DfuResult<()>
    where
        F: FnMut(usize, usize),
    {
        if data.is_empty() {
            return Err(DfuError::InvalidArgument {
                reason: "nothing to write".to_string(),
            });
        }
        check_block_range(data.len())?;

        self.ensure_idle(false)?;

        let total = data.len();
        let mut written = 0;
        for (index, chunk) in data.chunks(FLASH_PAGE_SIZE).enumerate() {
            let block = FIRST_DATA_BLOCK + index as u16;

            if chunk.len() == FLASH_PAGE_SIZE {
                self.requests.download(block, Some(chunk))?;
            } else {
                let mut page = [ERASED_BYTE; FLASH_PAGE_SIZE];
                page[..chunk.len()].copy_from_slice(chunk);
                self.requests.download(block, Some(&page))?;
            }

            let address = self.block_address(block, FLASH_PAGE_SIZE);
            self.complete_download("write_flash", block, address)?;

            written += chunk.len();
            on_progress(written, total);
        }

        Ok(())
    }

    /// Read `length` bytes starting at the current address pointer.
    ///
    /// Whole pages are always requested; only the valid bytes of the last
    /// page are returned.
    pub fn read_flash<F>(&mut self, length: usize, mut on_progress: F) -> DfuResult<Vec<u8>>
    where
        F: FnMut(usize, usize),
    {
        if length == 0 {
            return Err(DfuError::InvalidArgument {
                reason: "nothing to read".to_string(),
            });
        }
        check_block_range(length)?;

        self.ensure_idle(false)?;

        let pages = page_count(length);
        let mut data = vec![0u8; length];

        for page in 0..pages - 1 {
            let block = FIRST_DATA_BLOCK + page as u16;
            let start = page * FLASH_PAGE_SIZE;
            self.upload_block(
                "read_flash",
                block,
                &mut data[start..start + FLASH_PAGE_SIZE],
                FLASH_PAGE_SIZE,
            )?;
            on_progress(start + FLASH_PAGE_SIZE, length);
        }

        let block = FIRST_DATA_BLOCK + (pages - 1) as u16;
        let start = (pages - 1) * FLASH_PAGE_SIZE;
        let remaining = length - start;
        let mut scratch = [0u8; FLASH_PAGE_SIZE];
        self.upload_block("read_flash", block, &mut scratch, remaining)?;
        data[start..].copy_from_slice(&scratch[..remaining]);
        on_progress(length, length);

        Ok(data)
    }

    /// Read the 16 option bytes.
    pub fn read_option_bytes(&mut self) -> DfuResult<[u8; OPTION_BYTES_LEN]> {
        self.ensure_idle(false)?;
        self.set_address_pointer(OPTION_BYTES_ADDRESS)?;
        self.ensure_idle(false)?;

        let mut bytes = [0u8; OPTION_BYTES_LEN];
        self.upload_block(
            "read_option_bytes",
            FIRST_DATA_BLOCK,
            &mut bytes,
            OPTION_BYTES_LEN,
        )?;
        Ok(bytes)
    }

    /// GET: the command byte list the bootloader supports.
    ///
    /// The first byte is GET itself, followed by SET_ADDRESS, ERASE and
    /// READ_UNPROTECT on STM32 parts.
    pub fn get_commands(&mut self) -> DfuResult<[u8; GET_COMMANDS_LEN]> {
        self.ensure_idle(false)?;

        let mut commands = [0u8; GET_COMMANDS_LEN];
        self.upload_block(
            "get_commands",
            COMMAND_BLOCK,
            &mut commands,
            GET_COMMANDS_LEN,
        )?;
        Ok(commands)
    }

    /// Jump to `address` and leave DFU mode.
    ///
    /// The device answers the zero-length DNLOAD by entering dfuMANIFEST,
    /// then detaches from the bus.
    pub fn leave_dfu_mode(&mut self, address: u32) -> DfuResult<()> {
        self.set_address_pointer(address)?;

        info!("Leaving DFU mode, jumping to 0x{:08X}", address);
        self.requests.download(FIRST_DATA_BLOCK, None)?;

        let status = self.requests.get_status()?;
        classify_status(&status, "leave_dfu_mode", FIRST_DATA_BLOCK, address)?;
        expect_state(
            &status,
            DfuState::DfuManifest,
            "leave_dfu_mode",
            FIRST_DATA_BLOCK,
        )
    }

    /// Address the device will use for `block` with the given transfer size.
    fn block_address(&self, block: u16, transfer_size: usize) -> u32 {
        let offset = (block - FIRST_DATA_BLOCK) as u32 * transfer_size as u32;
        self.address_pointer.wrapping_add(offset)
    }

    /// Send a DfuSe command on block 0 and wait for it to execute.
    fn run_command(
        &mut self,
        operation: &'static str,
        command: &[u8],
        address: u32,
    ) -> DfuResult<()> {
        self.requests.download(COMMAND_BLOCK, Some(command))?;
        self.complete_download(operation, COMMAND_BLOCK, address)?;
        Ok(())
    }

    /// The two GETSTATUS polls that follow every DNLOAD.
    fn complete_download(
        &mut self,
        operation: &'static str,
        block: u16,
        address: u32,
    ) -> DfuResult<DfuStatus> {
        let status = self.requests.get_status()?;
        classify_status(&status, operation, block, address)?;
        expect_state(&status, DfuState::DfuDownloadBusy, operation, block)?;

        let status = self.requests.get_status()?;
        classify_status(&status, operation, block, address)?;
        Ok(status)
    }

    /// UPLOAD one block, then check the device is still healthy.
    ///
    /// The status is checked before the length so a device that refuses the
    /// read reports why.
    fn upload_block(
        &mut self,
        operation: &'static str,
        block: u16,
        buffer: &mut [u8],
        required: usize,
    ) -> DfuResult<()> {
        let received = self.requests.upload(block, buffer)?;

        let address = self.block_address(block.max(FIRST_DATA_BLOCK), buffer.len());
        let status = self.requests.get_status()?;
        classify_status(&status, operation, block, address)?;
        expect_state(&status, DfuState::DfuUploadIdle, operation, block)?;

        if received < required {
            return Err(DfuError::ShortTransfer {
                request: "UPLOAD",
                expected: required,
                actual: received,
            });
        }
        Ok(())
    }
}

/// Opcode followed by a little-endian address.
fn address_command(opcode: u8, address: u32) -> [u8; 5] {
    let a = address.to_le_bytes();
    [opcode, a[0], a[1], a[2], a[3]]
}

fn check_block_range(length: usize) -> DfuResult<()> {
    let last_block = FIRST_DATA_BLOCK as usize + page_count(length) - 1;
    if last_block > u16::MAX as usize {
        return Err(DfuError::InvalidArgument {
            reason: format!(
                "{} bytes need more blocks than a transfer can address",
                length
            ),
        });
    }
    Ok(())
}

/// Map a dfuERROR report onto the error taxonomy.
pub(super) fn classify_status(
    status: &DfuStatus,
    operation: &'static str,
    block: u16,
    address: u32,
) -> DfuResult<()> {
    if status.state != DfuState::DfuError {
        return Ok(());
    }

    Err(match status.status {
        DfuStatusCode::ErrTarget => DfuError::AddressUnsupported {
            operation,
            block,
            address,
        },
        DfuStatusCode::ErrVendor => DfuError::ReadProtected { operation, block },
        code => DfuError::DeviceError {
            operation,
            block,
            status: code,
            state: status.state,
        },
    })
}

fn expect_state(
    status: &DfuStatus,
    expected: DfuState,
    operation: &'static str,
    block: u16,
) -> DfuResult<()> {
    if status.state != expected {
        return Err(DfuError::UnexpectedState {
            operation,
            block,
            expected,
            actual: status.state,
            status: status.status,
        });
    }
    Ok(())
}
