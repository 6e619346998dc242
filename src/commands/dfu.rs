//! CLI verbs that talk to the bootloader.
//!
//! Every verb connects (which also brings the device to dfuIDLE), runs one
//! job and drops the device, releasing the interface.

use std::cell::Cell;
use std::fs;
use std::path::Path;

use log::info;
use stmdfu::dfu::config::{dfuse_command_name, OPTION_BYTES_ADDRESS};
use stmdfu::dfu::{connect, dump, flash_dfu_file, DfuResult, DfuStage, FlashOptions};
use stmdfu::dfuse::read_dfuse_file;
use stmdfu::settings::ProgrammerSettings;

/// Logs stage changes, and transfer progress every 10%.
pub struct ProgressReporter {
    last_decile: Cell<i32>,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self {
            last_decile: Cell::new(-1),
        }
    }

    pub fn report(&self, stage: DfuStage) {
        match stage {
            DfuStage::Erasing { done, total }
            | DfuStage::Writing { sent: done, total }
            | DfuStage::Reading {
                received: done,
                total,
            } => {
                let decile = (done * 10).checked_div(total).unwrap_or(10) as i32;
                if decile != self.last_decile.get() {
                    self.last_decile.set(decile);
                    info!("{}", stage.message());
                }
            }
            _ => {
                self.last_decile.set(-1);
                info!("{}", stage.message());
            }
        }
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// `flash <file> [--leave]`
pub fn flash(settings: &ProgrammerSettings, path: &Path, leave: bool) -> DfuResult<()> {
    let reporter = ProgressReporter::new();

    // A bad file must fail before the device is touched
    reporter.report(DfuStage::ReadingFile);
    let file = read_dfuse_file(path)?;

    reporter.report(DfuStage::Connecting);
    let mut commands = connect(settings)?;

    let options = FlashOptions {
        page_size: settings.page_size,
        leave,
    };
    flash_dfu_file(&mut commands, &file, &options, |stage| {
        reporter.report(stage)
    })
}

/// `dump <address> <size> [-o FILE]`
pub fn dump_memory(
    settings: &ProgrammerSettings,
    address: u32,
    size: u32,
    output: Option<&Path>,
) -> DfuResult<()> {
    let reporter = ProgressReporter::new();

    reporter.report(DfuStage::Connecting);
    let mut commands = connect(settings)?;
    let data = dump(&mut commands, address, size as usize, |stage| {
        reporter.report(stage)
    })?;

    match output {
        Some(path) => {
            fs::write(path, &data)?;
            info!("Wrote {} bytes to {}", data.len(), path.display());
        }
        None => print!("{}", hex_dump(address, &data)),
    }
    Ok(())
}

/// `optbytes`
pub fn option_bytes(settings: &ProgrammerSettings) -> DfuResult<()> {
    let mut commands = connect(settings)?;
    let bytes = commands.read_option_bytes()?;
    print!("{}", hex_dump(OPTION_BYTES_ADDRESS, &bytes));
    Ok(())
}

/// `erase <address>`
pub fn erase(settings: &ProgrammerSettings, address: u32) -> DfuResult<()> {
    let mut commands = connect(settings)?;
    commands.erase_page(address)?;
    info!("Erased page at 0x{:08X}", address);
    Ok(())
}

/// `masserase`
pub fn mass_erase(settings: &ProgrammerSettings) -> DfuResult<()> {
    let mut commands = connect(settings)?;
    commands.mass_erase()?;
    info!("Flash erased");
    Ok(())
}

/// `commands`
pub fn list_commands(settings: &ProgrammerSettings) -> DfuResult<()> {
    let mut commands = connect(settings)?;
    for opcode in commands.get_commands()? {
        println!("0x{:02X} {}", opcode, dfuse_command_name(opcode));
    }
    Ok(())
}

/// Classic 16-bytes-per-row hex dump with an address column.
pub fn hex_dump(address: u32, data: &[u8]) -> String {
    let mut out = String::new();
    for (row, chunk) in data.chunks(16).enumerate() {
        let offset = address.wrapping_add(row as u32 * 16);
        let bytes: Vec<String> = chunk.iter().map(|b| format!("{:02X}", b)).collect();
        out.push_str(&format!("{:08X}: {}\n", offset, bytes.join(" ")));
    }
    out
}
