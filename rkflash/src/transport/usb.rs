//! Native USB bulk channel using the `nusb` crate.
//!
//! Claims interface 0 of a Rockchip device in bootloader mode and talks to
//! its bulk IN/OUT endpoint pair.

use {
    crate::{
        device::{ChipKind, DetectedDevice, UsbMode},
        error::{Error, Result, TransportError},
        transport::{BulkChannel, UsbConfig},
    },
    log::{debug, info, trace, warn},
    nusb::{
        Endpoint, Interface, MaybeFuture,
        descriptors::TransferType,
        transfer::{Buffer, Bulk, Direction, In, Out},
    },
    std::time::Duration,
};

/// Fallback bulk IN endpoint.
const DEFAULT_IN_EP: u8 = 0x81;

/// Fallback bulk OUT endpoint.
const DEFAULT_OUT_EP: u8 = 0x02;

/// Bootloader interface number.
const INTERFACE: u8 = 0;

/// Bulk channel to a Rockchip bootloader over USB.
pub struct UsbChannel {
    interface: Interface,
    in_endpoint: u8,
    out_endpoint: u8,
    timeout: Duration,
    name: String,
    device: DetectedDevice,
}

impl UsbChannel {
    /// Open the first device matching `config`.
    pub fn open(config: &UsbConfig) -> Result<Self> {
        let device_info = nusb::list_devices()
            .wait()
            .map_err(|e| TransportError::Open(e.to_string()))?
            .find(|d| {
                config.matches(
                    d.vendor_id(),
                    d.product_id(),
                    d.bus_id(),
                    d.device_address(),
                )
            })
            .ok_or(Error::DeviceNotFound)?;

        Self::open_device(&device_info, config.timeout)
    }

    /// Open a specific enumerated device.
    pub fn open_device(device_info: &nusb::DeviceInfo, timeout: Duration) -> Result<Self> {
        let detected = DetectedDevice::from_device_info(device_info);
        info!(
            "Opening {} ({}) at bus {} address {}",
            detected.chip.name(),
            detected.mode,
            detected.bus,
            detected.address
        );

        let device = device_info
            .open()
            .wait()
            .map_err(|e| TransportError::Open(e.to_string()))?;

        let (in_endpoint, out_endpoint) = find_bulk_endpoints(&device);
        debug!("Bulk endpoints: IN {in_endpoint:#04x}, OUT {out_endpoint:#04x}");

        let interface = device
            .claim_interface(INTERFACE)
            .wait()
            .map_err(|e| TransportError::Open(format!("cannot claim interface: {e}")))?;
        debug!("Interface {INTERFACE} claimed");

        Ok(Self {
            interface,
            in_endpoint,
            out_endpoint,
            timeout,
            name: format!("{}@{}:{}", detected.chip.name(), detected.bus, detected.address),
            device: detected,
        })
    }

    /// Information about the opened device.
    pub fn device(&self) -> &DetectedDevice {
        &self.device
    }

    /// Chip classification from the product ID.
    pub fn chip(&self) -> ChipKind {
        self.device.chip
    }

    /// Whether the device is running the boot ROM rather than a loader.
    pub fn is_maskrom(&self) -> bool {
        self.device.mode == UsbMode::Maskrom
    }
}

/// Locate the bulk endpoint pair of interface 0, falling back to the usual
/// Rockchip addresses when descriptors are unavailable.
/// Clamp a packet-rounded IN transfer to the length the caller asked for.
///
/// Returns the kept bytes and how many were cut off.
fn fit_reply(data: &[u8], max_len: usize) -> (&[u8], usize) {
    let len = data.len().min(max_len);
    (&data[..len], data.len() - len)
}

fn find_bulk_endpoints(device: &nusb::Device) -> (u8, u8) {
    let mut in_ep = None;
    let mut out_ep = None;

    if let Ok(config) = device.active_configuration() {
        for alt in config.interface_alt_settings() {
            if alt.interface_number() != INTERFACE {
                continue;
            }
            for ep in alt.endpoints() {
                if ep.transfer_type() != TransferType::Bulk {
                    continue;
                }
                match ep.direction() {
                    Direction::In => {
                        in_ep.get_or_insert(ep.address());
                    },
                    Direction::Out => {
                        out_ep.get_or_insert(ep.address());
                    },
                }
            }
        }
    }

    (
        in_ep.unwrap_or(DEFAULT_IN_EP),
        out_ep.unwrap_or(DEFAULT_OUT_EP),
    )
}

impl BulkChannel for UsbChannel {
    fn send(&mut self, data: &[u8]) -> std::result::Result<(), TransportError> {
        let mut out_ep: Endpoint<Bulk, Out> = self
            .interface
            .endpoint(self.out_endpoint)
            .map_err(|e| TransportError::Send(e.to_string()))?;

        let mut out_buf = Buffer::new(data.len());
        out_buf.extend_from_slice(data);

        let completion = out_ep.transfer_blocking(out_buf, self.timeout);
        completion
            .into_result()
            .map_err(|e| TransportError::Send(e.to_string()))?;

        trace!("bulk out {} bytes", data.len());
        Ok(())
    }

    fn receive(&mut self, max_len: usize) -> std::result::Result<Vec<u8>, TransportError> {
        let mut in_ep: Endpoint<Bulk, In> = self
            .interface
            .endpoint(self.in_endpoint)
            .map_err(|e| TransportError::Receive(e.to_string()))?;

        let max_packet_size = in_ep.max_packet_size();
        let request_len = max_len.div_ceil(max_packet_size) * max_packet_size;
        let mut in_buf = Buffer::new(request_len);
        in_buf.set_requested_len(request_len);

        let completion = in_ep.transfer_blocking(in_buf, self.timeout);
        let data = completion
            .into_result()
            .map_err(|e| TransportError::Receive(e.to_string()))?;

        let (reply, dropped) = fit_reply(&data, max_len);
        if dropped > 0 {
            warn!(
                "{}: device sent {} bytes for a {max_len}-byte read, dropped {dropped}",
                self.name,
                data.len()
            );
        }
        trace!("bulk in {} bytes", reply.len());
        Ok(reply.to_vec())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_reply_within_request() {
        let data = [0xAA; 13];
        let (reply, dropped) = fit_reply(&data, 512);
        assert_eq!(reply.len(), 13);
        assert_eq!(dropped, 0);
    }

    #[test]
    fn test_fit_reply_reports_overrun() {
        let data = [0x55; 512];
        let (reply, dropped) = fit_reply(&data, 13);
        assert_eq!(reply, &data[..13]);
        assert_eq!(dropped, 499);
    }
}
