//! End-to-end operations for the STM32 DfuSe bootloader.
//!
//! Orchestrates the command layer for whole jobs:
//! 1. Flash - erase every page a container touches, then program each element
//! 2. Dump - read a memory range
//! 3. Leave - optionally jump to the new firmware afterwards
//!
//! Progress is reported through a [`DfuStage`] callback.

use std::path::Path;

use log::{info, warn};

use super::commands::DfuCommands;
use super::config::{page_start, FLASH_PAGE_SIZE};
use super::error::{DfuError, DfuResult};
use super::transport::DfuTransport;
use crate::dfuse::{read_dfuse_file, DfuFile};

/// DFU progress stages for user feedback.
#[derive(Debug, Clone, PartialEq)]
pub enum DfuStage {
    /// Reading the DfuSe file.
    ReadingFile,
    /// Opening the USB device.
    Connecting,
    /// Bringing the bootloader to dfuIDLE.
    Preparing,
    /// Erasing flash pages.
    Erasing { done: usize, total: usize },
    /// Programming flash.
    Writing { sent: usize, total: usize },
    /// Reading memory.
    Reading { received: usize, total: usize },
    /// Jumping to the application.
    Leaving,
    /// Operation complete.
    Complete,
}

impl DfuStage {
    /// Get a percentage estimate for this stage.
    pub fn percent(&self) -> f32 {
        match self {
            DfuStage::ReadingFile => 0.0,
            DfuStage::Connecting => 1.0,
            DfuStage::Preparing => 2.0,
            DfuStage::Erasing { done, total } => 5.0 + fraction(*done, *total) * 20.0,
            DfuStage::Writing { sent, total } => 25.0 + fraction(*sent, *total) * 70.0,
            DfuStage::Reading { received, total } => 5.0 + fraction(*received, *total) * 90.0,
            DfuStage::Leaving => 97.0,
            DfuStage::Complete => 100.0,
        }
    }

    /// Get a human-readable message for this stage.
    pub fn message(&self) -> String {
        match self {
            DfuStage::ReadingFile => "Reading DfuSe file...".into(),
            DfuStage::Connecting => "Connecting to bootloader...".into(),
            DfuStage::Preparing => "Preparing device...".into(),
            DfuStage::Erasing { done, total } => format!("Erasing page {}/{}", done, total),
            DfuStage::Writing { sent, total } => {
                format!("Writing flash... {}%", percent_of(*sent, *total))
            }
            DfuStage::Reading { received, total } => {
                format!("Reading memory... {}%", percent_of(*received, *total))
            }
            DfuStage::Leaving => "Leaving DFU mode...".into(),
            DfuStage::Complete => "Done!".into(),
        }
    }
}

fn fraction(done: usize, total: usize) -> f32 {
    if total == 0 {
        1.0
    } else {
        done as f32 / total as f32
    }
}

fn percent_of(done: usize, total: usize) -> usize {
    (done * 100).checked_div(total).unwrap_or(100)
}

/// Options for [`flash_dfu_file`].
#[derive(Debug, Clone)]
pub struct FlashOptions {
    /// Erase granularity of the target.
    pub page_size: u32,
    /// Jump to the first element's address when done.
    pub leave: bool,
}

impl Default for FlashOptions {
    fn default() -> Self {
        Self {
            page_size: FLASH_PAGE_SIZE as u32,
            leave: false,
        }
    }
}

/// Start addresses of every page touched by the file's elements, in order
/// and without duplicates.
pub fn erase_plan(file: &DfuFile, page_size: u32) -> DfuResult<Vec<u32>> {
    if page_size == 0 {
        return Err(DfuError::InvalidArgument {
            reason: "page size must be non-zero".to_string(),
        });
    }

    let mut pages = Vec::new();
    for (_, element) in file.elements() {
        let mut page = page_start(element.address, page_size) as u64;
        while page < element.end_address() {
            pages.push(page as u32);
            page += page_size as u64;
        }
    }
    pages.sort_unstable();
    pages.dedup();
    Ok(pages)
}

/// Read a DfuSe file and program it.
pub fn flash_file<T, P, F>(
    commands: &mut DfuCommands<T>,
    path: P,
    options: &FlashOptions,
    on_progress: F,
) -> DfuResult<()>
where
    T: DfuTransport,
    P: AsRef<Path>,
    F: Fn(DfuStage),
{
    on_progress(DfuStage::ReadingFile);
    let file = read_dfuse_file(path)?;
    flash_dfu_file(commands, &file, options, on_progress)
}

/// Program every element of every image in `file`.
///
/// All pages are erased before the first write so elements sharing a page
/// do not erase each other.
pub fn flash_dfu_file<T, F>(
    commands: &mut DfuCommands<T>,
    file: &DfuFile,
    options: &FlashOptions,
    on_progress: F,
) -> DfuResult<()>
where
    T: DfuTransport,
    F: Fn(DfuStage),
{
    let first_address = file
        .elements()
        .find(|(_, e)| !e.data.is_empty())
        .map(|(_, e)| e.address)
        .ok_or_else(|| DfuError::InvalidArgument {
            reason: "DfuSe file contains no data".to_string(),
        })?;

    on_progress(DfuStage::Preparing);
    commands.ensure_idle(false)?;

    let pages = erase_plan(file, options.page_size)?;
    let total = pages.len();
    info!("Erasing {} page(s)", total);
    for (index, page) in pages.iter().enumerate() {
        commands.erase_page(*page)?;
        on_progress(DfuStage::Erasing {
            done: index + 1,
            total,
        });
    }

    let total: usize = file.elements().map(|(_, e)| e.data.len()).sum();
    let mut sent = 0;
    for (image, element) in file.elements() {
        if element.data.is_empty() {
            warn!("Skipping empty element at 0x{:08X}", element.address);
            continue;
        }

        info!(
            "Writing {} bytes to 0x{:08X} (target {} '{}')",
            element.data.len(),
            element.address,
            image.target_prefix.alternate_setting,
            image.target_prefix.name()
        );
        commands.set_address_pointer(element.address)?;
        commands.write_flash(&element.data, |done, _| {
            on_progress(DfuStage::Writing {
                sent: sent + done,
                total,
            })
        })?;
        sent += element.data.len();
    }

    if options.leave {
        on_progress(DfuStage::Leaving);
        commands.ensure_idle(false)?;
        commands.leave_dfu_mode(first_address)?;
    }

    on_progress(DfuStage::Complete);
    Ok(())
}

/// Read `length` bytes starting at `address`.
pub fn dump<T, F>(
    commands: &mut DfuCommands<T>,
    address: u32,
    length: usize,
    on_progress: F,
) -> DfuResult<Vec<u8>>
where
    T: DfuTransport,
    F: Fn(DfuStage),
{
    on_progress(DfuStage::Preparing);
    commands.ensure_idle(false)?;
    commands.set_address_pointer(address)?;

    info!("Reading {} bytes from 0x{:08X}", length, address);
    let data = commands.read_flash(length, |received, total| {
        on_progress(DfuStage::Reading { received, total })
    })?;

    on_progress(DfuStage::Complete);
    Ok(data)
}
