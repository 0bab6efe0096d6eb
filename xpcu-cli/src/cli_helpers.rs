use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use color_eyre::eyre::{OptionExt, WrapErr};

/// `VID:PID`, both in hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbAddr {
    pub vid: u16,
    pub pid: u16,
}

impl FromStr for UsbAddr {
    type Err = color_eyre::eyre::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (vid, pid) = s.split_once(':').ok_or_eyre("no ':'")?;
        let vid = u16::from_str_radix(vid, 16)?;
        let pid = u16::from_str_radix(pid, 16)?;
        Ok(Self { vid, pid })
    }
}

impl Display for UsbAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04X}:{:04X}", self.vid, self.pid)
    }
}

impl From<UsbAddr> for (u16, u16) {
    fn from(addr: UsbAddr) -> Self {
        (addr.vid, addr.pid)
    }
}

/// Shift data given as hex bytes, first byte shifted first. An odd digit
/// count is padded with a leading zero, so `9` is `09`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexData(pub Vec<u8>);

impl FromStr for HexData {
    type Err = color_eyre::eyre::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim_start_matches("0x");
        let data = match s.len() % 2 {
            0 => hex::decode(s),
            _ => hex::decode(format!("0{s}")),
        }
        .wrap_err_with(|| format!("invalid hex data {s:?}"))?;
        Ok(Self(data))
    }
}
