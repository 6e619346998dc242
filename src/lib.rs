//! USB DfuSe programmer for STM32 system-memory bootloaders.
//!
//! - [`dfuse`] reads and writes DfuSe firmware containers
//! - [`dfu`] drives the bootloader over USB: requests, DfuSe commands,
//!   idle recovery and whole flash/dump jobs
//! - [`settings`] holds the persisted programmer settings

pub mod dfu;
pub mod dfuse;
pub mod settings;

#[cfg(test)]
mod test_helpers;
