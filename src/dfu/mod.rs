//! USB DFU driver for the STM32 system-memory (DfuSe) bootloader.
//!
//! Layers, bottom-up:
//!
//! 1. **Transport** - class control transfers on the DFU interface
//!    ([`DfuTransport`], [`DfuDevice`])
//! 2. **Requests** - the seven DFU 1.1 requests ([`DfuRequests`])
//! 3. **Commands** - DfuSe commands and flash block transfers
//!    ([`DfuCommands`]), plus idle recovery ([`IdleOutcome`])
//! 4. **Protocol** - whole jobs with progress reporting ([`flash_file`],
//!    [`dump`])
//!
//! # Example
//!
//! ```ignore
//! use stmdfu::dfu::{connect, flash_file, FlashOptions};
//! use stmdfu::settings::ProgrammerSettings;
//!
//! let settings = ProgrammerSettings::default();
//! let mut commands = connect(&settings)?;
//! flash_file(&mut commands, "firmware.dfu", &FlashOptions::default(), |stage| {
//!     println!("{}: {:.0}%", stage.message(), stage.percent())
//! })?;
//! ```

pub(crate) mod commands;
pub mod config;
mod device;
pub(crate) mod error;
mod idle;
mod protocol;
pub(crate) mod requests;
pub(crate) mod status;
pub(crate) mod transport;

// Device detection
pub use device::{connect, find_stm32_devices, Stm32Device, Stm32DeviceInfo};

// Layers
pub use commands::DfuCommands;
pub use idle::IdleOutcome;
pub use requests::DfuRequests;
pub use transport::{DfuDevice, DfuTransport};

// Protocol
pub use protocol::{dump, erase_plan, flash_dfu_file, flash_file, DfuStage, FlashOptions};

// Wire types and errors
pub use error::{DfuError, DfuResult};
pub use status::{DfuState, DfuStatus, DfuStatusCode};
