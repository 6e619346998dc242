//! DFU class requests (DFU 1.1, sections 5 and 6).
//!
//! Each request is a thin, validated wrapper around one control transfer.
//! GETSTATUS is the only request that blocks beyond the transfer itself: it
//! sleeps for the device-declared `bwPollTimeout` before returning.

use std::thread;
use std::time::Duration;

use log::{debug, trace};

use super::config::DfuRequest;
use super::error::{DfuError, DfuResult};
use super::status::{DfuState, DfuStatus, STATUS_RESPONSE_LEN};
use super::transport::DfuTransport;

/// Raw DFU request layer over a [`DfuTransport`].
pub struct DfuRequests<T: DfuTransport> {
    transport: T,
}

impl<T: DfuTransport> DfuRequests<T> {
    /// Create a request layer that owns the given transport.
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Borrow the underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Give the transport back, closing the request layer.
    pub fn into_inner(self) -> T {
        self.transport
    }

    /// DFU_DETACH: ask a runtime-mode device to switch to DFU mode.
    ///
    /// `timeout_ms` is how long the device waits for the following USB reset.
    pub fn detach(&mut self, timeout_ms: u16) -> DfuResult<()> {
        self.transport
            .control_out(DfuRequest::Detach, timeout_ms, &[])?;
        Ok(())
    }

    /// DFU_DNLOAD: send `payload` as block `block`.
    ///
    /// `None` issues a zero-length download. An empty `Some` payload is
    /// rejected before any transfer is made.
    pub fn download(&mut self, block: u16, payload: Option<&[u8]>) -> DfuResult<usize> {
        let data = match payload {
            Some([]) => {
                return Err(DfuError::InvalidArgument {
                    reason: format!("DNLOAD block {}: payload present but empty", block),
                })
            }
            Some(data) => data,
            None => &[],
        };

        let written = self
            .transport
            .control_out(DfuRequest::Download, block, data)?;

        if written != data.len() {
            return Err(DfuError::ShortTransfer {
                request: DfuRequest::Download.name(),
                expected: data.len(),
                actual: written,
            });
        }

        Ok(written)
    }

    /// DFU_UPLOAD: read up to `buffer.len()` bytes of block `block`.
    ///
    /// Returns the number of bytes the device actually sent.
    pub fn upload(&mut self, block: u16, buffer: &mut [u8]) -> DfuResult<usize> {
        if buffer.is_empty() {
            return Err(DfuError::InvalidArgument {
                reason: format!("UPLOAD block {}: zero-length buffer", block),
            });
        }

        self.transport.control_in(DfuRequest::Upload, block, buffer)
    }

    /// DFU_GETSTATUS: read and decode the device status.
    ///
    /// Sleeps for the reported poll timeout before returning so the next
    /// request never arrives early.
    pub fn get_status(&mut self) -> DfuResult<DfuStatus> {
        let mut buffer = [0u8; STATUS_RESPONSE_LEN];
        let read = self
            .transport
            .control_in(DfuRequest::GetStatus, 0, &mut buffer)?;

        if read != STATUS_RESPONSE_LEN {
            return Err(DfuError::ShortTransfer {
                request: DfuRequest::GetStatus.name(),
                expected: STATUS_RESPONSE_LEN,
                actual: read,
            });
        }

        let status = DfuStatus::parse(&buffer)?;
        debug!("{}", status);

        if status.poll_timeout_ms != 0 {
            thread::sleep(Duration::from_millis(status.poll_timeout_ms as u64));
        }

        Ok(status)
    }

    /// DFU_CLRSTATUS: leave dfuERROR and return to dfuIDLE.
    pub fn clear_status(&mut self) -> DfuResult<()> {
        self.transport.control_out(DfuRequest::ClearStatus, 0, &[])?;
        Ok(())
    }

    /// DFU_GETSTATE: read the state without triggering any transition.
    pub fn get_state(&mut self) -> DfuResult<DfuState> {
        let mut buffer = [0u8; 1];
        let read = self
            .transport
            .control_in(DfuRequest::GetState, 0, &mut buffer)?;

        if read != 1 {
            return Err(DfuError::ShortTransfer {
                request: DfuRequest::GetState.name(),
                expected: 1,
                actual: read,
            });
        }

        DfuState::from_byte(buffer[0]).ok_or(DfuError::UnknownState(buffer[0]))
    }

    /// DFU_ABORT: return to dfuIDLE from any idle sub-state.
    pub fn abort(&mut self) -> DfuResult<()> {
        self.transport.control_out(DfuRequest::Abort, 0, &[])?;
        Ok(())
    }

    /// USB port reset (not a DFU request, but part of the detach sequence).
    pub fn reset_device(&mut self) -> DfuResult<()> {
        trace!("USB reset");
        self.transport.reset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dfu::status::DfuStatusCode;
    use crate::dfu::transport::MockDfuTransport;

    #[test]
    fn test_download_sends_block_and_payload() {
        let mut mock = MockDfuTransport::new();
        mock.expect_control_out()
            .withf(|request, value, data| {
                *request == DfuRequest::Download
                    && *value == 0
                    && data.to_vec() == vec![0x21u8, 0x00, 0x00, 0x00, 0x08]
            })
            .times(1)
            .returning(|_, _, data| Ok(data.len()));

        let mut requests = DfuRequests::new(mock);
        let written = requests
            .download(0, Some(&[0x21, 0x00, 0x00, 0x00, 0x08]))
            .unwrap();
        assert_eq!(written, 5);
    }

    #[test]
    fn test_download_rejects_empty_payload_without_transfer() {
        // No expectations: any transfer would panic
        let mock = MockDfuTransport::new();
        let mut requests = DfuRequests::new(mock);

        let result = requests.download(2, Some(&[]));
        assert!(matches!(result, Err(DfuError::InvalidArgument { .. })));
    }

    #[test]
    fn test_download_without_payload_is_zero_length() {
        let mut mock = MockDfuTransport::new();
        mock.expect_control_out()
            .withf(|request, value, data| {
                *request == DfuRequest::Download && *value == 2 && data.is_empty()
            })
            .times(1)
            .returning(|_, _, _| Ok(0));

        let mut requests = DfuRequests::new(mock);
        assert_eq!(requests.download(2, None).unwrap(), 0);
    }

    #[test]
    fn test_download_short_write() {
        let mut mock = MockDfuTransport::new();
        mock.expect_control_out().returning(|_, _, _| Ok(3));

        let mut requests = DfuRequests::new(mock);
        let result = requests.download(2, Some(&[0xAA; 2048]));
        assert!(matches!(
            result,
            Err(DfuError::ShortTransfer {
                expected: 2048,
                actual: 3,
                ..
            })
        ));
    }

    #[test]
    fn test_upload_rejects_empty_buffer() {
        let mock = MockDfuTransport::new();
        let mut requests = DfuRequests::new(mock);

        let mut buffer: [u8; 0] = [];
        assert!(matches!(
            requests.upload(2, &mut buffer),
            Err(DfuError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_upload_returns_received_length() {
        let mut mock = MockDfuTransport::new();
        mock.expect_control_in()
            .withf(|request, value, buffer| {
                *request == DfuRequest::Upload && *value == 0 && buffer.len() == 4
            })
            .times(1)
            .returning(|_, _, buffer| {
                buffer.copy_from_slice(&[0x00, 0x21, 0x41, 0x92]);
                Ok(4)
            });

        let mut requests = DfuRequests::new(mock);
        let mut buffer = [0u8; 4];
        assert_eq!(requests.upload(0, &mut buffer).unwrap(), 4);
        assert_eq!(buffer, [0x00, 0x21, 0x41, 0x92]);
    }

    #[test]
    fn test_get_status_decodes_response() {
        let mut mock = MockDfuTransport::new();
        mock.expect_control_in()
            .withf(|request, value, buffer| {
                *request == DfuRequest::GetStatus && *value == 0 && buffer.len() == 6
            })
            .times(1)
            .returning(|_, _, buffer| {
                buffer.copy_from_slice(&[0x0B, 0x00, 0x00, 0x00, 0x0A, 0x00]);
                Ok(6)
            });

        let mut requests = DfuRequests::new(mock);
        let status = requests.get_status().unwrap();
        assert_eq!(status.status, DfuStatusCode::ErrVendor);
        assert_eq!(status.state, DfuState::DfuError);
    }

    #[test]
    fn test_get_status_waits_poll_timeout() {
        let mut mock = MockDfuTransport::new();
        mock.expect_control_in().returning(|_, _, buffer| {
            buffer.copy_from_slice(&[0x00, 20, 0x00, 0x00, 0x02, 0x00]);
            Ok(6)
        });

        let mut requests = DfuRequests::new(mock);
        let start = std::time::Instant::now();
        let status = requests.get_status().unwrap();
        assert_eq!(status.poll_timeout_ms, 20);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_get_status_short_response() {
        let mut mock = MockDfuTransport::new();
        mock.expect_control_in().returning(|_, _, _| Ok(2));

        let mut requests = DfuRequests::new(mock);
        assert!(matches!(
            requests.get_status(),
            Err(DfuError::ShortTransfer {
                expected: 6,
                actual: 2,
                ..
            })
        ));
    }

    #[test]
    fn test_get_status_transport_error() {
        let mut mock = MockDfuTransport::new();
        mock.expect_control_in()
            .returning(|_, _, _| Err(DfuError::Usb(rusb::Error::Timeout)));

        let mut requests = DfuRequests::new(mock);
        assert!(matches!(
            requests.get_status(),
            Err(DfuError::Usb(rusb::Error::Timeout))
        ));
    }

    #[test]
    fn test_get_state() {
        let mut mock = MockDfuTransport::new();
        mock.expect_control_in()
            .withf(|request, _, buffer| *request == DfuRequest::GetState && buffer.len() == 1)
            .returning(|_, _, buffer| {
                buffer[0] = 0x09;
                Ok(1)
            });

        let mut requests = DfuRequests::new(mock);
        assert_eq!(requests.get_state().unwrap(), DfuState::DfuUploadIdle);
    }

    #[test]
    fn test_detach_passes_timeout_as_value() {
        let mut mock = MockDfuTransport::new();
        mock.expect_control_out()
            .withf(|request, value, data| {
                *request == DfuRequest::Detach && *value == 1000 && data.is_empty()
            })
            .times(1)
            .returning(|_, _, _| Ok(0));

        let mut requests = DfuRequests::new(mock);
        requests.detach(1000).unwrap();
    }

    #[test]
    fn test_abort_and_clear_status_requests() {
        let mut mock = MockDfuTransport::new();
        mock.expect_control_out()
            .withf(|request, _, _| *request == DfuRequest::Abort)
            .times(1)
            .returning(|_, _, _| Ok(0));
        mock.expect_control_out()
            .withf(|request, _, _| *request == DfuRequest::ClearStatus)
            .times(1)
            .returning(|_, _, _| Ok(0));

        let mut requests = DfuRequests::new(mock);
        requests.abort().unwrap();
        requests.clear_status().unwrap();
    }
}
