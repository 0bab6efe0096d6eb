use std::time::Duration;

use nusb::{
    MaybeFuture,
    transfer::{Buffer, Bulk, ControlIn, ControlOut, ControlType, In, Out, Recipient},
};
use tracing::trace;

use super::channel::{EP_IN, EP_OUT, Link, request};
use crate::error::Fault;

/// A claimed XPC on the USB bus.
pub struct UsbLink {
    interface: Option<nusb::Interface>,
    device: Option<nusb::Device>,
    timeout: Duration,
}

impl UsbLink {
    pub fn open(info: &nusb::DeviceInfo, timeout: Duration) -> Result<Self, Fault> {
        let device = info.open().wait()?;
        let interface = device.detach_and_claim_interface(0).wait()?;
        trace!("claimed interface 0");
        Ok(Self {
            interface: Some(interface),
            device: Some(device),
            timeout,
        })
    }

    fn interface(&self) -> Result<&nusb::Interface, Fault> {
        self.interface.as_ref().ok_or(Fault::Released)
    }
}

impl Link for UsbLink {
    fn control_out(&mut self, value: u16, index: u16) -> Result<(), Fault> {
        let data = ControlOut {
            control_type: ControlType::Vendor,
            recipient: Recipient::Device,
            request: request::VENDOR,
            value,
            index,
            data: &[],
        };
        self.interface()?.control_out(data, self.timeout).wait()?;
        Ok(())
    }

    fn control_in(&mut self, value: u16, index: u16, buf: &mut [u8]) -> Result<usize, Fault> {
        let data = ControlIn {
            control_type: ControlType::Vendor,
            recipient: Recipient::Device,
            request: request::VENDOR,
            value,
            index,
            length: u16::try_from(buf.len()).unwrap_or(u16::MAX),
        };
        let data = self.interface()?.control_in(data, self.timeout).wait()?;
        let len = data.len().min(buf.len());
        buf[..len].copy_from_slice(&data[..len]);
        Ok(data.len())
    }

    fn bulk_out(&mut self, data: &[u8]) -> Result<usize, Fault> {
        let mut endpoint = self.interface()?.endpoint::<Bulk, Out>(EP_OUT)?;

        let mut buffer = Buffer::new(data.len());
        buffer.extend_from_slice(data);
        endpoint.submit(buffer);

        let Some(completion) = endpoint.wait_next_complete(self.timeout) else {
            endpoint.cancel_all();
            let _ = endpoint.wait_next_complete(Duration::from_millis(100));
            return Err(Fault::Timeout(self.timeout));
        };
        completion.status?;
        Ok(completion.actual_len)
    }

    fn bulk_in(&mut self, buf: &mut [u8]) -> Result<usize, Fault> {
        let mut endpoint = self.interface()?.endpoint::<Bulk, In>(EP_IN)?;

        // IN transfers must be a whole number of packets
        let max_packet_size = endpoint.max_packet_size().max(1);
        endpoint.submit(Buffer::new(buf.len().div_ceil(max_packet_size) * max_packet_size));

        let Some(completion) = endpoint.wait_next_complete(self.timeout) else {
            endpoint.cancel_all();
            let _ = endpoint.wait_next_complete(Duration::from_millis(100));
            return Err(Fault::Timeout(self.timeout));
        };
        completion.status?;

        let len = completion.actual_len.min(buf.len());
        buf[..len].copy_from_slice(&completion.buffer[..len]);
        Ok(completion.actual_len)
    }

    fn release(&mut self) -> Result<(), Fault> {
        // dropping the interface releases it, dropping the device closes it
        drop(self.interface.take());
        drop(self.device.take());
        Ok(())
    }
}
