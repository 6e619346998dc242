//! Settings resolution for a CLI run.

use std::path::Path;

use log::debug;
use stmdfu::dfu::DfuResult;
use stmdfu::settings::{ProgrammerSettings, SettingsManager};

/// Load settings from `config` (defaults when absent), then apply the
/// `--vid`/`--pid` overrides.
pub fn load_settings(
    config: Option<&Path>,
    vid: Option<u16>,
    pid: Option<u16>,
) -> DfuResult<ProgrammerSettings> {
    let mut settings = match config {
        Some(path) => SettingsManager::new(path).load()?,
        None => ProgrammerSettings::default(),
    };

    if let Some(vid) = vid {
        settings.vendor_id = vid;
    }
    if let Some(pid) = pid {
        settings.product_id = pid;
    }

    if settings.has_non_default_settings() {
        debug!("Using non-default settings: {:?}", settings);
    }
    Ok(settings)
}
