//! Programmer settings with JSON persistence.
//!
//! This module provides:
//! - `ProgrammerSettings` with the USB IDs, timeouts and retry budget used
//!   when talking to the bootloader
//! - Persistence to a JSON file chosen by the user
//!
//! Every field has a default, so a settings file only needs the values it
//! changes.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dfu::config::{
    DFU_DETACH_TIMEOUT_MS, DFU_TRANSFER_TIMEOUT, FLASH_BASE_ADDRESS, FLASH_PAGE_SIZE,
    IDLE_RETRIES, STM32_DFU_PID, STM32_VID,
};
use crate::dfu::error::{DfuError, DfuResult};

/// Settings for one programmer session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ProgrammerSettings {
    /// USB Vendor ID of the bootloader.
    pub vendor_id: u16,
    /// USB Product ID of the bootloader.
    pub product_id: u16,
    /// Timeout of every control transfer.
    pub transfer_timeout_ms: u64,
    /// `wTimeout` sent with DFU_DETACH.
    pub detach_timeout_ms: u16,
    /// Iterations of the idle-recovery loop.
    pub idle_retries: u32,
    /// Erase granularity used when flashing.
    pub page_size: u32,
    /// Load address used by `convert` when none is given.
    pub load_address: u32,
    /// Target name written by `convert` when none is given.
    pub target_name: String,
}

impl Default for ProgrammerSettings {
    fn default() -> Self {
        Self {
            vendor_id: STM32_VID,
            product_id: STM32_DFU_PID,
            transfer_timeout_ms: DFU_TRANSFER_TIMEOUT.as_millis() as u64,
            detach_timeout_ms: DFU_DETACH_TIMEOUT_MS,
            idle_retries: IDLE_RETRIES,
            page_size: FLASH_PAGE_SIZE as u32,
            load_address: FLASH_BASE_ADDRESS,
            target_name: "ST...".to_string(),
        }
    }
}

impl ProgrammerSettings {
    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms)
    }

    /// Reject values the protocol cannot work with.
    pub fn validate(&self) -> DfuResult<()> {
        if self.page_size == 0 {
            return Err(DfuError::InvalidArgument {
                reason: "pageSize must be non-zero".to_string(),
            });
        }
        if self.idle_retries == 0 {
            return Err(DfuError::InvalidArgument {
                reason: "idleRetries must be at least 1".to_string(),
            });
        }
        if self.transfer_timeout_ms == 0 {
            return Err(DfuError::InvalidArgument {
                reason: "transferTimeoutMs must be non-zero".to_string(),
            });
        }
        Ok(())
    }

    /// Check if these settings differ from defaults.
    pub fn has_non_default_settings(&self) -> bool {
        *self != Self::default()
    }
}

/// Manages persistence of programmer settings to a JSON file.
pub struct SettingsManager {
    settings_file_path: PathBuf,
}

impl SettingsManager {
    pub fn new(settings_file_path: &Path) -> Self {
        Self {
            settings_file_path: settings_file_path.to_path_buf(),
        }
    }

    /// Load settings from disk, returning defaults if the file doesn't exist.
    pub fn load(&self) -> DfuResult<ProgrammerSettings> {
        if !self.settings_file_path.exists() {
            return Ok(ProgrammerSettings::default());
        }

        let contents = fs::read_to_string(&self.settings_file_path)?;

        // Handle empty file gracefully
        if contents.trim().is_empty() {
            return Ok(ProgrammerSettings::default());
        }

        let settings: ProgrammerSettings = serde_json::from_str(&contents)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Save settings to disk.
    pub fn save(&self, settings: &ProgrammerSettings) -> DfuResult<()> {
        if let Some(parent) = self.settings_file_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(settings)?;
        fs::write(&self.settings_file_path, contents)?;
        Ok(())
    }

    /// Get the path where settings are stored.
    pub fn settings_path(&self) -> &Path {
        &self.settings_file_path
    }
}
