//! Recovery of the bootloader into dfuIDLE.
//!
//! Every transfer sequence starts from dfuIDLE. A device left mid-download,
//! mid-upload or in dfuERROR by an earlier session is brought back with the
//! request each state accepts.

use log::{debug, warn};

use super::commands::DfuCommands;
use super::error::{DfuError, DfuResult};
use super::status::{DfuState, DfuStatusCode};
use super::transport::DfuTransport;

/// Result of [`DfuCommands::make_idle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleOutcome {
    /// The device reported dfuIDLE with status OK.
    Ready,
    /// The device was reset and must be re-enumerated and re-opened.
    DeviceReset,
    /// The retry budget ran out.
    Failed,
}

impl<T: DfuTransport> DfuCommands<T> {
    /// Drive the device into dfuIDLE.
    ///
    /// With `initial_abort` an ABORT is sent before the first poll. A failed
    /// status poll is answered with CLRSTATUS and counts as an attempt.
    pub fn make_idle(&mut self, initial_abort: bool) -> IdleOutcome {
        if initial_abort {
            if let Err(e) = self.requests.abort() {
                warn!("Initial abort failed: {}", e);
            }
        }

        for attempt in 1..=self.idle_retries {
            let status = match self.requests.get_status() {
                Ok(status) => status,
                Err(e) => {
                    warn!(
                        "Attempt {}: status poll failed ({}), clearing status",
                        attempt, e
                    );
                    self.clear_status_logged();
                    continue;
                }
            };

            match status.state {
                DfuState::DfuIdle if status.status == DfuStatusCode::Ok => {
                    debug!("Device idle after {} attempt(s)", attempt);
                    return IdleOutcome::Ready;
                }
                DfuState::DfuIdle | DfuState::DfuError => {
                    warn!(
                        "Device in {} ({}), clearing status",
                        status.state, status.status
                    );
                    self.clear_status_logged();
                }
                DfuState::DfuDownloadSync
                | DfuState::DfuDownloadIdle
                | DfuState::DfuManifestSync
                | DfuState::DfuUploadIdle
                | DfuState::DfuDownloadBusy
                | DfuState::DfuManifest => {
                    debug!("Device in {}, aborting", status.state);
                    if let Err(e) = self.requests.abort() {
                        warn!("Abort failed: {}", e);
                    }
                }
                DfuState::AppIdle => {
                    warn!("Device in appIDLE, sending detach");
                    if let Err(e) = self.requests.detach(self.detach_timeout_ms) {
                        warn!("Detach failed: {}", e);
                    }
                }
                DfuState::AppDetach | DfuState::DfuManifestWaitReset => {
                    warn!("Device in {}, resetting", status.state);
                    if let Err(e) = self.requests.reset_device() {
                        warn!("Reset failed: {}", e);
                    }
                    return IdleOutcome::DeviceReset;
                }
            }
        }

        IdleOutcome::Failed
    }

    /// [`make_idle`](Self::make_idle), with anything but `Ready` as an error.
    pub fn ensure_idle(&mut self, initial_abort: bool) -> DfuResult<()> {
        match self.make_idle(initial_abort) {
            IdleOutcome::Ready => Ok(()),
            IdleOutcome::DeviceReset => Err(DfuError::DeviceReset),
            IdleOutcome::Failed => Err(DfuError::IdleFailed {
                attempts: self.idle_retries,
            }),
        }
    }

    fn clear_status_logged(&mut self) {
        if let Err(e) = self.requests.clear_status() {
            warn!("Clear status failed: {}", e);
        }
    }
}
