//! Bit-banged shifts through the GPIO register, used when the TAP is routed to
//! the cable's own CPLD. One control request per edge, so only suited to
//! short chains.

use super::{
    GPIO_PROG, GPIO_TCK, GPIO_TDI, GPIO_TDO, GPIO_TMS,
    channel::{ControlChannel, Link},
};
use crate::{
    Result,
    utils::{bit, set_bit},
};

/// One TCK cycle. TDO is read while TCK is low, before the rising edge.
fn clock<L: Link>(
    ctrl: &mut ControlChannel<L>,
    tms: bool,
    tdi: bool,
    capture: bool,
) -> Result<Option<bool>> {
    let mut lines = GPIO_PROG;
    if tms {
        lines |= GPIO_TMS;
    }
    if tdi {
        lines |= GPIO_TDI;
    }

    ctrl.write_gpio(lines)?;
    let tdo = match capture {
        true => Some(ctrl.read_gpio()? & GPIO_TDO != 0),
        false => None,
    };
    ctrl.write_gpio(lines | GPIO_TCK)?;
    Ok(tdo)
}

pub(super) fn shift_block<L: Link>(
    ctrl: &mut ControlChannel<L>,
    tdi: Option<&[u8]>,
    mut tdo: Option<&mut [u8]>,
    len: usize,
    last: bool,
) -> Result<()> {
    for idx in 0..len {
        let tdi = tdi.is_some_and(|tdi| bit(tdi, idx));
        let tms = last && idx == len - 1;
        let sampled = clock(ctrl, tms, tdi, tdo.is_some())?;
        if let (Some(tdo), Some(value)) = (tdo.as_deref_mut(), sampled) {
            set_bit(tdo, idx, value);
        }
    }
    Ok(())
}

pub(super) fn shift_tms<L: Link>(
    ctrl: &mut ControlChannel<L>,
    pattern: &[u8],
    len: usize,
) -> Result<()> {
    for idx in 0..len {
        clock(ctrl, bit(pattern, idx), false, false)?;
    }
    Ok(())
}
