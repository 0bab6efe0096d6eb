use tracing::{instrument, trace};

use super::GpioRouting;
use crate::{
    Hex, Result,
    error::{Error, Fault},
};

/// Vendor request values. Every request goes out as `bRequest = 0xB0` with
/// one of these in `wValue` and its argument in `wIndex`.
pub mod request {
    pub const VENDOR: u8 = 0xb0;

    pub const OUTPUT_DISABLE: u16 = 0x10;
    pub const OUTPUT_ENABLE: u16 = 0x18;
    pub const REQUEST_28: u16 = 0x28;
    pub const WRITE_GPIO: u16 = 0x30;
    pub const READ_GPIO: u16 = 0x38;
    pub const READ_HARDWARE_ID: u16 = 0x42;
    pub const READ_VERSION: u16 = 0x50;
    pub const SELECT_GPIO: u16 = 0x52;
    pub const SHIFT: u16 = 0xa6;
}

pub const EP_OUT: u8 = 0x02;
pub const EP_IN: u8 = 0x86;

/// Raw USB access to one cable.
///
/// Implementations report how many bytes actually moved; length checking is
/// done once, in [`ControlChannel`].
pub trait Link {
    fn control_out(&mut self, value: u16, index: u16) -> Result<(), Fault>;
    fn control_in(&mut self, value: u16, index: u16, buf: &mut [u8]) -> Result<usize, Fault>;
    fn bulk_out(&mut self, data: &[u8]) -> Result<usize, Fault>;
    fn bulk_in(&mut self, buf: &mut [u8]) -> Result<usize, Fault>;

    /// Release the interface and close the device. Called at most once.
    fn release(&mut self) -> Result<(), Fault>;
}

/// The only code that issues requests to the cable. One method per request,
/// no retries.
pub struct ControlChannel<L> {
    link: L,
}

impl<L: Link> ControlChannel<L> {
    pub fn new(link: L) -> Self {
        Self { link }
    }

    pub fn into_link(self) -> L {
        self.link
    }

    fn out(&mut self, op: &'static str, value: u16, index: u16) -> Result<()> {
        self.link
            .control_out(value, index)
            .map_err(Error::transport(op))
    }

    fn read<const N: usize>(&mut self, op: &'static str, value: u16, index: u16) -> Result<[u8; N]> {
        let mut buf = [0; N];
        let actual = self
            .link
            .control_in(value, index, &mut buf)
            .map_err(Error::transport(op))?;
        check_len(op, N, actual)?;
        Ok(buf)
    }

    pub fn output_enable(&mut self, enable: bool) -> Result<()> {
        let value = match enable {
            true => request::OUTPUT_ENABLE,
            false => request::OUTPUT_DISABLE,
        };
        self.out("output enable", value, 0)
    }

    /// Undocumented; issued with 0x11 before and 0x12 after configuring the
    /// CPLD.
    pub fn request_28(&mut self, value: u16) -> Result<()> {
        self.out("request 28", request::REQUEST_28, value)
    }

    pub fn write_gpio(&mut self, bits: u8) -> Result<()> {
        trace!(bits = %Hex(bits), "write gpio");
        self.out("write gpio", request::WRITE_GPIO, u16::from(bits))
    }

    pub fn read_gpio(&mut self) -> Result<u8> {
        let [bits] = self.read("read gpio", request::READ_GPIO, 0)?;
        Ok(bits)
    }

    pub fn read_firmware_version(&mut self) -> Result<u16> {
        self.read("read firmware version", request::READ_VERSION, 0)
            .map(u16::from_le_bytes)
    }

    pub fn read_cpld_version(&mut self) -> Result<u16> {
        self.read("read cpld version", request::READ_VERSION, 1)
            .map(u16::from_le_bytes)
    }

    pub fn read_hardware_id(&mut self) -> Result<u64> {
        self.read("read hardware id", request::READ_HARDWARE_ID, 0)
            .map(u64::from_le_bytes)
    }

    pub fn select_gpio(&mut self, routing: GpioRouting) -> Result<()> {
        self.out("select gpio", request::SELECT_GPIO, routing as u16)
    }

    /// One ext transfer: announce `bits`, send `tx`, then read back `rx` if
    /// any TDO was sampled.
    #[instrument(skip_all, fields(bits = bits, tx = tx.len()))]
    pub fn shift(&mut self, bits: u16, tx: &[u8], rx: Option<&mut [u8]>) -> Result<()> {
        const OP: &str = "shift";
        self.out(OP, request::SHIFT, bits)?;

        let written = self.link.bulk_out(tx).map_err(Error::transport(OP))?;
        check_len(OP, tx.len(), written)?;

        if let Some(rx) = rx {
            let read = self.link.bulk_in(rx).map_err(Error::transport(OP))?;
            check_len(OP, rx.len(), read)?;
        }
        Ok(())
    }

    pub fn release(&mut self) -> Result<()> {
        self.link.release().map_err(Error::transport("release"))
    }
}

fn check_len(op: &'static str, expected: usize, actual: usize) -> Result<()> {
    match expected == actual {
        true => Ok(()),
        false => Err(Error::transport(op)(Fault::Short { expected, actual })),
    }
}
