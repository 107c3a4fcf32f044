//! USB HID transport implementation
//!
//! Report-oriented: `recv` delivers whole input reports and `send`
//! writes whole output reports, never partial frames. The blocking
//! `hidapi` handle lives behind a mutex and is read with a short
//! timeout, the same shape the serial adapter uses.

use super::{Channel, OpeningPhase, TransportError, TransportKind, TransportStats};
use async_trait::async_trait;
use bytes::Bytes;
use hidapi::{HidApi, HidDevice};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Largest report size accepted by the adapter.
const MAX_REPORT_LEN: usize = 4096;

/// USB HID device configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HidConfig {
    /// Vendor id
    pub vendor_id: u16,
    /// Product id
    pub product_id: u16,
    /// Platform device path; takes precedence over VID/PID when set
    pub path: Option<String>,
    /// Output report id prepended to every write
    pub output_report_id: u8,
    /// Report payload length in bytes
    pub report_len: usize,
}

impl HidConfig {
    /// Create a configuration addressing a device by VID/PID.
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
            path: None,
            output_report_id: 0,
            report_len: 64,
        }
    }

    /// Address the device by platform path instead.
    #[must_use]
    pub fn path(mut self, path: &str) -> Self {
        self.path = Some(path.to_string());
        self
    }

    /// Set the output report id.
    #[must_use]
    pub fn output_report_id(mut self, id: u8) -> Self {
        self.output_report_id = id;
        self
    }

    /// Set the report payload length.
    #[must_use]
    pub fn report_len(mut self, len: usize) -> Self {
        self.report_len = len;
        self
    }
}

/// USB HID channel.
pub struct HidTransport {
    config: HidConfig,
    device: Arc<Mutex<Option<HidDevice>>>,
    // Kept for the lifetime of the open device handle
    api: Mutex<Option<HidApi>>,
    stats: Arc<RwLock<TransportStats>>,
}

impl HidTransport {
    /// Create a HID channel, validating the configuration.
    pub fn new(config: HidConfig) -> Result<Self, TransportError> {
        if config.report_len == 0 || config.report_len > MAX_REPORT_LEN {
            return Err(TransportError::InvalidConfiguration(format!(
                "report length {} out of range 1..={MAX_REPORT_LEN}",
                config.report_len
            )));
        }
        if config.path.is_none() && config.vendor_id == 0 && config.product_id == 0 {
            return Err(TransportError::InvalidConfiguration(
                "neither device path nor VID/PID given".to_string(),
            ));
        }
        Ok(Self {
            config,
            device: Arc::new(Mutex::new(None)),
            api: Mutex::new(None),
            stats: Arc::new(RwLock::new(TransportStats::default())),
        })
    }
}

#[async_trait]
impl Channel for HidTransport {
    async fn open(&mut self) -> Result<(), TransportError> {
        let api = HidApi::new().map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        let device = match &self.config.path {
            Some(path) => {
                let cpath = std::ffi::CString::new(path.as_str()).map_err(|_| {
                    TransportError::InvalidConfiguration(format!("invalid device path {path}"))
                })?;
                api.open_path(&cpath)
            }
            None => api.open(self.config.vendor_id, self.config.product_id),
        }
        .map_err(|e| {
            // An absent device is an addressing problem, not a transient
            let info = match &self.config.path {
                Some(path) => path.clone(),
                None => format!(
                    "{:04x}:{:04x}",
                    self.config.vendor_id, self.config.product_id
                ),
            };
            if api
                .device_list()
                .any(|d| d.vendor_id() == self.config.vendor_id && d.product_id() == self.config.product_id)
            {
                TransportError::ConnectionFailed(e.to_string())
            } else {
                TransportError::PortNotFound(info)
            }
        })?;

        *self.device.lock() = Some(device);
        *self.api.lock() = Some(api);
        *self.stats.write() = TransportStats::default();
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        *self.device.lock() = None;
        *self.api.lock() = None;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.device.lock().is_some()
    }

    async fn send(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        if data.len() > self.config.report_len {
            return Err(TransportError::SendError(format!(
                "payload {} exceeds report length {}",
                data.len(),
                self.config.report_len
            )));
        }

        // One whole output report: id byte plus zero-padded payload
        let mut report = vec![0u8; self.config.report_len + 1];
        report[0] = self.config.output_report_id;
        report[1..=data.len()].copy_from_slice(data);

        {
            let device_guard = self.device.lock();
            let device = device_guard.as_ref().ok_or(TransportError::NotConnected)?;
            device
                .write(&report)
                .map_err(|e| TransportError::SendError(e.to_string()))?;
        }

        let mut stats = self.stats.write();
        stats.bytes_sent += data.len() as u64;
        stats.chunks_sent += 1;

        Ok(data.len())
    }

    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        let mut buffer = vec![0u8; self.config.report_len];
        let read = {
            let device_guard = self.device.lock();
            let device = device_guard.as_ref().ok_or(TransportError::NotConnected)?;
            device
                .read_timeout(&mut buffer, 100)
                .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?
        };

        if read == 0 {
            return Ok(None);
        }
        buffer.truncate(read);

        let mut stats = self.stats.write();
        stats.bytes_received += read as u64;
        stats.chunks_received += 1;

        Ok(Some(Bytes::from(buffer)))
    }

    fn kind(&self) -> TransportKind {
        TransportKind::UsbHid
    }

    fn peer_info(&self) -> String {
        match &self.config.path {
            Some(path) => format!("HID {path}"),
            None => format!(
                "HID {:04x}:{:04x}",
                self.config.vendor_id, self.config.product_id
            ),
        }
    }

    fn stats(&self) -> TransportStats {
        *self.stats.read()
    }

    fn opening_phase(&self) -> OpeningPhase {
        OpeningPhase::Starting
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        assert!(HidTransport::new(HidConfig::new(0x16C0, 0x05DF)).is_ok());
        assert!(HidTransport::new(HidConfig::new(0, 0)).is_err());
        assert!(HidTransport::new(HidConfig::new(0x16C0, 0x05DF).report_len(0)).is_err());
        assert!(HidTransport::new(HidConfig::new(0, 0).path("/dev/hidraw0")).is_ok());
    }

    #[tokio::test]
    async fn test_send_before_open_fails_fast() {
        let mut transport = HidTransport::new(HidConfig::new(0x16C0, 0x05DF)).unwrap();
        let err = transport.send(&[0u8; 8]).await.unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
    }

    #[tokio::test]
    async fn test_oversized_payload_is_rejected() {
        let mut transport =
            HidTransport::new(HidConfig::new(0x16C0, 0x05DF).report_len(8)).unwrap();
        let err = transport.send(&[0u8; 9]).await.unwrap_err();
        assert!(matches!(err, TransportError::SendError(_)));
    }
}
