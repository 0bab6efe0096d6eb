use crate::{Hex, Result, units::Bits};

/// A cable that is able to drive a JTAG TAP.
///
/// Bit buffers are packed LSB first: bit `n` of a shift is
/// `buf[n / 8] >> (n % 8) & 1`. Every call either completes or fails; partial
/// shifts are never reported.
pub trait Backend {
    /// Clock `len` bits through the current shift state.
    ///
    /// `tdi = None` shifts zeros. With `tdo = None` nothing is sampled, which
    /// is cheaper on cables that return TDO separately. `last` raises TMS on
    /// the final bit, leaving the shift state.
    fn shift_block(
        &mut self,
        tdi: Option<&[u8]>,
        tdo: Option<&mut [u8]>,
        len: Bits<usize>,
        last: bool,
    ) -> Result<()>;

    /// Clock `len` bits of `pattern` on TMS, with TDI held low.
    ///
    /// `force_flush` asks for the bits to reach the wire before returning,
    /// for callers that are about to wait on the target.
    fn shift_tms(&mut self, pattern: &[u8], len: Bits<usize>, force_flush: bool) -> Result<()>;

    /// Disable the cable outputs and release it. Calling this again is a
    /// no-op.
    fn close(&mut self) -> Result<()>;

    /// Who is on the other end of the wire, if the cable can tell.
    fn identity(&self) -> Option<&Identity> {
        None
    }

    /// [`Backend::shift_block`], returning a freshly allocated capture.
    fn shift(&mut self, tdi: &[u8], len: Bits<usize>, last: bool) -> Result<Vec<u8>> {
        let mut tdo = vec![0; len.bytes().0];
        self.shift_block(Some(tdi), Some(&mut tdo), len, last)?;
        Ok(tdo)
    }
}

impl<B: Backend + ?Sized> Backend for Box<B> {
    fn shift_block(
        &mut self,
        tdi: Option<&[u8]>,
        tdo: Option<&mut [u8]>,
        len: Bits<usize>,
        last: bool,
    ) -> Result<()> {
        B::shift_block(&mut *self, tdi, tdo, len, last)
    }

    fn shift_tms(&mut self, pattern: &[u8], len: Bits<usize>, force_flush: bool) -> Result<()> {
        B::shift_tms(&mut *self, pattern, len, force_flush)
    }

    fn close(&mut self) -> Result<()> {
        B::close(&mut *self)
    }

    fn identity(&self) -> Option<&Identity> {
        B::identity(&**self)
    }
}

/// Cable identity, read once when the cable is opened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub vid: u16,
    pub pid: u16,
    /// Cable table name the cable was opened as.
    pub subtype: &'static str,
    pub hardware_id: u64,
    pub firmware_version: u16,
    pub cpld_version: u16,
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{:>12}: {}:{}", "usb", Hex(self.vid), Hex(self.pid))?;
        writeln!(f, "{:>12}: {}", "subtype", self.subtype)?;
        writeln!(f, "{:>12}: {}", "hardware id", Hex(self.hardware_id))?;
        writeln!(f, "{:>12}: {}", "firmware", Hex(self.firmware_version))?;
        write!(f, "{:>12}: {}", "cpld", Hex(self.cpld_version))
    }
}

/// Checks buffer sizes shared by every [`Backend::shift_block`]
/// implementation.
pub(crate) fn check_lengths(
    tdi: Option<&[u8]>,
    tdo: Option<&[u8]>,
    len: Bits<usize>,
) -> Result<()> {
    let need = len.bytes().0;
    for (name, buf) in [("tdi", tdi), ("tdo", tdo)] {
        if let Some(buf) = buf
            && buf.len() < need
        {
            return Err(crate::Error::ProtocolViolation(format!(
                "{name} holds {} bytes, {} bits need {need}",
                buf.len(),
                len.0,
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_buffers_are_rejected() {
        assert!(check_lengths(Some(&[0; 2]), None, Bits(16)).is_ok());
        assert!(check_lengths(None, Some(&[0; 3]), Bits(17)).is_ok());
        let err = check_lengths(Some(&[0; 1]), None, Bits(9)).unwrap_err();
        assert!(matches!(err, crate::Error::ProtocolViolation(_)), "{err}");
        assert!(check_lengths(None, Some(&[]), Bits(1)).is_err());
        assert!(check_lengths(None, None, Bits(1 << 20)).is_ok());
    }
}
