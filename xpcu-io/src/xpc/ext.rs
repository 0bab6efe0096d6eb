//! Batched bit transfers through the CPLD ("ext transfer").
//!
//! Bits are packed four to every two bytes:
//!
//! ```text
//! buf[0]: ssss iiii
//! buf[1]: oooo cccc
//! buf[2]: ssss iiii
//! buf[3]: oooo cccc
//! ```
//!
//! - `s` -> TMS
//! - `i` -> TDI
//! - `o` -> sample TDO
//! - `c` -> clock this bit
//!
//! Data is sent LSB-first. Given: `buf[0] = 0x9a`, `buf[1] = 0x3f`
//! ```text
//! ┌Signals──┐┌Waves────────────────────────────────┐
//! │TCK      ││──┐   ┌───┐   ┌───┐   ┌───┐   ┌───┐  │
//! │         ││  └───┘   └───┘   └───┘   └───┘   └──│
//! │TMS(1001)││  ────────┐               ┌────────  │
//! │         ││          └───────────────┘          │
//! │TDI(0101)││          ┌───────┐       ┌────────  │
//! │         ││  ────────┘       └───────┘          │
//! │TDO(1100)││      │───s───│───s───│───────│──────│
//! └─────────┘└─────────────────────────────────────┘
//! ```
//!
//! Sampled TDO comes back as little-endian 16-bit words, first bit in bit 0.
//! The final word of a transfer is only partially shifted, so its `r` valid
//! bits sit at the top.

use tracing::debug;

use super::{CPLD_MAX_BYTES, channel::ControlChannel, channel::Link};
use crate::{
    Result, SpaceHex,
    error::Error,
    utils::{bit, set_bit},
};

/// Bit slots in one transfer, two bytes per four bits.
pub const WRITE_BITS: usize = 2 * CPLD_MAX_BYTES;
/// TDO bits one transfer can return.
pub const READ_BITS: usize = 8 * READ_BYTES;
const READ_BYTES: usize = CPLD_MAX_BYTES / 4;

/// Real bits queued before an intermediate flush.
///
/// The firmware drops transfers whose length is a multiple of four, so the
/// last transfer of a shift may need a padding bit. Stopping one short of
/// [`WRITE_BITS`] keeps that slot free, and makes intermediate flushes odd
/// length so they never need padding.
pub const CAPACITY: usize = WRITE_BITS - 1;

/// State of one logical shift. Lives for a single [`shift_block`] or
/// [`shift_tms`] call and is never shared.
pub(super) struct ExtTransfer<'a> {
    buf: [u8; CPLD_MAX_BYTES],
    rx: [u8; READ_BYTES],
    in_bits: usize,
    out_bits: usize,
    out_done: usize,
    out: Option<&'a mut [u8]>,
}

impl<'a> ExtTransfer<'a> {
    pub fn new(out: Option<&'a mut [u8]>) -> Self {
        Self {
            buf: [0; CPLD_MAX_BYTES],
            rx: [0; READ_BYTES],
            in_bits: 0,
            out_bits: 0,
            out_done: 0,
            out,
        }
    }

    /// Queue one clocked bit, flushing when the buffer fills.
    pub fn push<L: Link>(
        &mut self,
        ctrl: &mut ControlChannel<L>,
        tdi: bool,
        tms: bool,
    ) -> Result<()> {
        self.add_bit(tdi, tms, true);
        if self.in_bits == CAPACITY || self.out_bits == READ_BITS {
            self.flush(ctrl)?;
        }
        Ok(())
    }

    /// Send whatever is still queued.
    pub fn finish<L: Link>(mut self, ctrl: &mut ControlChannel<L>) -> Result<()> {
        if self.in_bits == 0 {
            return Ok(());
        }
        if self.in_bits % 4 == 0 {
            self.add_bit(false, false, false);
        }
        self.flush(ctrl)
    }

    /// A bit that is not `real` is sent without a clock or a sample.
    fn add_bit(&mut self, tdi: bool, tms: bool, real: bool) {
        let bit_idx = self.in_bits & 3;
        let buf_idx = (self.in_bits - bit_idx) >> 1;

        if bit_idx == 0 {
            self.buf[buf_idx] = 0;
            self.buf[buf_idx + 1] = 0;
        }
        self.in_bits += 1;

        if !real {
            return;
        }

        self.buf[buf_idx] |= (tms as u8) << (4 + bit_idx) | (tdi as u8) << bit_idx;
        self.buf[buf_idx + 1] |= 1 << bit_idx;
        if self.out.is_some() {
            self.buf[buf_idx + 1] |= 1 << (4 + bit_idx);
            self.out_bits += 1;
        }
    }

    fn flush<L: Link>(&mut self, ctrl: &mut ControlChannel<L>) -> Result<()> {
        let in_len = 2 * self.in_bits.div_ceil(4);
        let out_len = 2 * self.out_bits.div_ceil(16);
        let bits = u16::try_from(self.in_bits)
            .map_err(|_| Error::ProtocolViolation(format!("{} bits in one transfer", self.in_bits)))?;

        debug!(
            in_bits = self.in_bits,
            out_bits = self.out_bits,
            data = %SpaceHex(&self.buf[..in_len]),
        );

        let rx = match out_len {
            0 => None,
            _ => Some(&mut self.rx[..out_len]),
        };
        ctrl.shift(bits, &self.buf[..in_len], rx)?;

        if let Some(out) = self.out.as_deref_mut() {
            self.out_done = decode_tdo(&self.rx[..out_len], self.out_bits, out, self.out_done);
        }

        self.in_bits = 0;
        self.out_bits = 0;
        Ok(())
    }
}

/// Unpack `count` sampled bits from `rx` into `out`, starting at bit `at`.
/// Returns the next free bit position.
fn decode_tdo(rx: &[u8], count: usize, out: &mut [u8], mut at: usize) -> usize {
    let mut left = count;
    for word in rx.chunks_exact(2) {
        let n = left.min(16);
        let word = u16::from_le_bytes([word[0], word[1]]) >> (16 - n);
        for k in 0..n {
            set_bit(out, at, word >> k & 1 == 1);
            at += 1;
        }
        left -= n;
    }
    at
}

/// Shift `len` bits of `tdi` (zeros if `None`), raising TMS on the final bit
/// when `last`.
pub(super) fn shift_block<L: Link>(
    ctrl: &mut ControlChannel<L>,
    tdi: Option<&[u8]>,
    tdo: Option<&mut [u8]>,
    len: usize,
    last: bool,
) -> Result<()> {
    let mut xts = ExtTransfer::new(tdo);
    for idx in 0..len {
        let tdi = tdi.is_some_and(|tdi| bit(tdi, idx));
        let tms = last && idx == len - 1;
        xts.push(ctrl, tdi, tms)?;
    }
    xts.finish(ctrl)
}

pub(super) fn shift_tms<L: Link>(
    ctrl: &mut ControlChannel<L>,
    pattern: &[u8],
    len: usize,
) -> Result<()> {
    let mut xts = ExtTransfer::new(None);
    for idx in 0..len {
        xts.push(ctrl, false, bit(pattern, idx))?;
    }
    xts.finish(ctrl)
}
