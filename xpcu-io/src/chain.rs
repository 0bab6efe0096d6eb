use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use eyre::{Result, WrapErr, bail, eyre};
use tracing::{debug, info, instrument};

use crate::{
    Backend,
    devices::{DeviceInfo, IdCode},
    jtag::{PATHS, Path, State},
    units::Bits,
    utils::{bit, set_bit},
};

/// Devices past this are assumed to be a stuck TDO.
pub const MAX_DEVICES: usize = 32;

/// Asks long-running chain operations to stop at their next step.
#[derive(Clone, Debug, Default)]
pub struct Cancel(Arc<AtomicBool>);

impl Cancel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// The underlying flag, for handing to a signal handler.
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }

    fn check(&self) -> Result<()> {
        match self.is_cancelled() {
            true => Err(eyre!("cancelled")),
            false => Ok(()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainDevice {
    /// `None` for a device that came out of reset in BYPASS.
    pub idcode: Option<u32>,
    pub info: Option<DeviceInfo>,
}

impl ChainDevice {
    pub fn name(&self) -> &'static str {
        match (&self.info, self.idcode) {
            (Some(info), _) => info.name,
            (None, Some(_)) => "unknown",
            (None, None) => "bypass",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TestReport {
    pub runs: usize,
    pub mismatches: usize,
}

/// A detected JTAG chain, driven through any [`Backend`].
///
/// Device 0 is the one nearest TDO, the first to shift out. Between
/// operations the TAP rests in [`State::RunTestIdle`].
pub struct Chain<B> {
    backend: B,
    devices: Vec<ChainDevice>,
    selected: usize,
    /// Device given an instruction by the last [`Chain::shift_ir`]; every
    /// other device is in BYPASS. `None` after reset, when all hold IDCODE.
    loaded: Option<usize>,
    state: State,
}

impl<B: Backend> Chain<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            devices: Vec::new(),
            selected: 0,
            loaded: None,
            state: State::TestLogicReset,
        }
    }

    pub fn backend(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn devices(&self) -> &[ChainDevice] {
        &self.devices
    }

    fn goto(&mut self, to: State) -> Result<()> {
        let path = match self.state == to {
            true => return Ok(()),
            false => PATHS[self.state][to],
        };
        self.tms(path)?;
        self.state = to;
        Ok(())
    }

    fn tms(&mut self, path: Path) -> Result<()> {
        self.backend
            .shift_tms(&[path.as_clocked()], path.bits(), false)
            .wrap_err_with(|| format!("clocking tms path {path}"))
    }

    fn reset(&mut self) -> Result<()> {
        self.tms(Path::RESET)?;
        self.state = State::TestLogicReset;
        self.loaded = None;
        Ok(())
    }

    /// Reset the TAP and read every device's IDCODE out of DR.
    ///
    /// A device that answers with a leading 0 holds BYPASS instead of an
    /// IDCODE. A full word of ones is TDI coming back around: the end of the
    /// chain.
    #[instrument(skip_all)]
    pub fn detect(
        &mut self,
        db: &HashMap<IdCode, DeviceInfo>,
        cancel: &Cancel,
    ) -> Result<&[ChainDevice]> {
        self.devices = self.scan(db, cancel)?;
        self.selected = 0;
        for (i, device) in self.devices.iter().enumerate() {
            match device.idcode {
                Some(idcode) => info!(i, idcode = %crate::Hex(idcode), name = device.name()),
                None => info!(i, "device in bypass"),
            }
        }
        Ok(&self.devices)
    }

    fn scan(&mut self, db: &HashMap<IdCode, DeviceInfo>, cancel: &Cancel) -> Result<Vec<ChainDevice>> {
        self.reset()?;
        self.goto(State::ShiftDR)?;

        let mut ret = Vec::new();
        loop {
            cancel.check()?;
            let first = self.backend.shift(&[0xff], Bits(1), false)?;
            if first[0] & 1 == 0 {
                ret.push(ChainDevice {
                    idcode: None,
                    info: None,
                });
            } else {
                let rest = self.backend.shift(&[0xff; 4], Bits(31), false)?;
                let idcode = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]) << 1 | 1;
                if idcode == 0xffff_ffff {
                    break;
                }
                ret.push(ChainDevice {
                    idcode: Some(idcode),
                    info: db.get(&IdCode::new(idcode)).cloned(),
                });
            }
            if ret.len() > MAX_DEVICES {
                bail!("more than {MAX_DEVICES} devices on the chain, is TDO stuck low?");
            }
        }

        // still in Shift-DR; TDI is low on the way out, and Update-DR of
        // IDCODE or BYPASS changes nothing
        self.goto(State::RunTestIdle)?;
        debug!(devices = ret.len());
        Ok(ret)
    }

    /// Make `index` the target of [`Chain::shift_ir`] and [`Chain::shift_dr`].
    pub fn select(&mut self, index: usize) -> Result<()> {
        if index >= self.devices.len() {
            bail!(
                "device {index} selected, but the chain has {} devices",
                self.devices.len()
            );
        }
        self.selected = index;
        Ok(())
    }

    pub fn selected(&self) -> Option<&ChainDevice> {
        self.devices.get(self.selected)
    }

    pub fn idcode(&self) -> Option<u32> {
        self.selected().and_then(|device| device.idcode)
    }

    pub fn description(&self) -> &'static str {
        self.selected().map_or("none", ChainDevice::name)
    }

    fn irlens(&self) -> Result<Vec<usize>> {
        self.devices
            .iter()
            .enumerate()
            .map(|(i, device)| match &device.info {
                Some(info) => Ok(usize::from(info.irlen.0)),
                None => Err(eyre!("IR length of device {i} ({}) unknown", device.name())),
            })
            .collect()
    }

    /// Load `tdi` into the selected device's instruction register, putting
    /// every other device in BYPASS. Returns the captured IR.
    #[instrument(skip_all, fields(selected = self.selected))]
    pub fn shift_ir(&mut self, tdi: &[u8]) -> Result<Vec<u8>> {
        if self.devices.is_empty() {
            bail!("no devices on the chain");
        }
        let lens = self.irlens()?;
        let len = lens[self.selected];
        if tdi.len() < Bits(len).bytes().0 {
            bail!("instruction needs {len} bits, got {} bytes", tdi.len());
        }

        let out = self.shift_through(State::ShiftIR, &lens, tdi, true)?;
        self.loaded = Some(self.selected);
        Ok(out)
    }

    /// Shift `len` bits through the selected device's data register.
    /// Returns the captured DR.
    ///
    /// Unselected devices are in BYPASS after a [`Chain::shift_ir`], or hold
    /// IDCODE after [`Chain::detect`].
    #[instrument(skip_all, fields(selected = self.selected, len = len.0))]
    pub fn shift_dr(&mut self, tdi: &[u8], len: Bits<usize>) -> Result<Vec<u8>> {
        if self.devices.is_empty() {
            bail!("no devices on the chain");
        }
        if tdi.len() < len.bytes().0 {
            bail!("{} bits need {} bytes, got {}", len.0, len.bytes().0, tdi.len());
        }
        if let Some(loaded) = self.loaded
            && loaded != self.selected
        {
            bail!("instruction was loaded for device {loaded}, shift IR for device {} first", self.selected);
        }
        let lens = self
            .devices
            .iter()
            .enumerate()
            .map(|(i, device)| {
                if i == self.selected {
                    len.0
                } else if self.loaded.is_some() || device.idcode.is_none() {
                    1
                } else {
                    32
                }
            })
            .collect::<Vec<_>>();

        self.shift_through(State::ShiftDR, &lens, tdi, false)
    }

    /// Scan the whole chain once. `fill` gives the bit sent to unselected
    /// devices.
    fn shift_through(
        &mut self,
        shift: State,
        lens: &[usize],
        tdi: &[u8],
        fill: bool,
    ) -> Result<Vec<u8>> {
        let total = Bits(lens.iter().sum::<usize>());
        let offset = lens[..self.selected].iter().sum::<usize>();
        let len = lens[self.selected];

        let mut tx = vec![0; total.bytes().0];
        let mut at = 0;
        for (i, &n) in lens.iter().enumerate() {
            for k in 0..n {
                let value = match i == self.selected {
                    true => bit(tdi, k),
                    false => fill,
                };
                set_bit(&mut tx, at, value);
                at += 1;
            }
        }

        self.goto(shift)?;
        let rx = self.backend.shift(&tx, total, true)?;
        self.state = match shift {
            State::ShiftIR => State::Exit1IR,
            _ => State::Exit1DR,
        };
        self.goto(State::RunTestIdle)?;

        let mut out = vec![0; Bits(len).bytes().0];
        for k in 0..len {
            set_bit(&mut out, k, bit(&rx, offset + k));
        }
        Ok(out)
    }

    /// Detect the chain `iterations` times, or until cancelled when `None`,
    /// comparing each scan with the first. `progress` is called after every
    /// scan with the number completed.
    #[instrument(skip_all)]
    pub fn test(
        &mut self,
        db: &HashMap<IdCode, DeviceInfo>,
        iterations: Option<usize>,
        cancel: &Cancel,
        mut progress: impl FnMut(usize),
    ) -> Result<TestReport> {
        let reference = self.detect(db, cancel)?.to_vec();
        if reference.is_empty() {
            bail!("no devices on the chain");
        }

        let mut report = TestReport::default();
        while iterations.is_none_or(|n| report.runs < n) {
            if cancel.is_cancelled() {
                info!(runs = report.runs, "test cancelled");
                break;
            }
            let scan = self.scan(db, cancel)?;
            if scan != reference {
                report.mismatches += 1;
                debug!(run = report.runs, ?scan, "chain mismatch");
            }
            report.runs += 1;
            progress(report.runs);
        }
        Ok(report)
    }
}
