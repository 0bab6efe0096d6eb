//! A simulated XPC: answers the cable's vendor requests, unpacks ext
//! transfers and drives a simulated target with the decoded clocks.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::{
    error::Fault,
    jtag::{GRAPH, State},
    xpc::{GPIO_TCK, GPIO_TDI, GPIO_TDO, GPIO_TMS, Link, request},
};

/// One device on a simulated chain.
#[derive(Clone, Copy, Debug)]
pub struct SimDevice {
    pub idcode: Option<u32>,
    pub irlen: u8,
    pub idcode_instr: u64,
}

impl SimDevice {
    /// `irlen` must be in `1..=64`.
    pub const fn new(idcode: u32, irlen: u8, idcode_instr: u64) -> Self {
        assert!(irlen >= 1 && irlen <= 64, "irlen must be in 1..=64");
        Self {
            idcode: Some(idcode),
            irlen,
            idcode_instr,
        }
    }

    /// A device without an IDCODE register, selecting BYPASS out of reset.
    pub const fn bypass(irlen: u8) -> Self {
        assert!(irlen >= 1 && irlen <= 64, "irlen must be in 1..=64");
        Self {
            idcode: None,
            irlen,
            idcode_instr: 0,
        }
    }
}

/// What sits on the other end of the cable.
#[derive(Clone, Debug)]
pub enum Target {
    /// TDO follows TDI.
    Loopback,
    /// TDO walks this sequence, one entry per sample, repeating.
    Pattern(Vec<bool>),
    /// A JTAG chain. Device 0 drives TDO.
    Chain(Vec<SimDevice>),
}

#[derive(Clone, Copy, Debug)]
pub struct Cycle {
    pub tms: bool,
    pub tdi: bool,
    pub tdo: bool,
}

/// One 0xA6 request as the firmware saw it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShiftRecord {
    pub bits: u16,
    pub clocked: usize,
    pub sampled: usize,
}

/// Shared handle to a simulated cable. Clones see the same cable, so tests
/// keep one to inspect a cable that a session has taken ownership of.
#[derive(Clone)]
pub struct FakeCable(Arc<Mutex<Sim>>);

struct Sim {
    firmware_version: u16,
    cpld_version: u16,
    hardware_id: u64,
    outputs_enabled: bool,
    routing: Option<u16>,
    gpio: u8,
    gpio_writes: Vec<u8>,
    last_tdo: bool,
    pending_shift: Option<u16>,
    response: Option<Vec<u8>>,
    shifts: Vec<ShiftRecord>,
    cycles: Option<Vec<Cycle>>,
    short_reads: usize,
    released: bool,
    target: Device,
}

impl FakeCable {
    pub fn new(target: Target) -> Self {
        Self(Arc::new(Mutex::new(Sim {
            firmware_version: 0x0006,
            cpld_version: 0x0012,
            hardware_id: 0x0000_0123_4567_89ab,
            outputs_enabled: false,
            routing: None,
            gpio: 0,
            gpio_writes: Vec::new(),
            last_tdo: false,
            pending_shift: None,
            response: None,
            shifts: Vec::new(),
            cycles: None,
            short_reads: 0,
            released: false,
            target: Device::new(target),
        })))
    }

    pub fn with_versions(self, firmware: u16, cpld: u16) -> Self {
        {
            let mut sim = self.sim();
            sim.firmware_version = firmware;
            sim.cpld_version = cpld;
        }
        self
    }

    pub fn with_hardware_id(self, hardware_id: u64) -> Self {
        self.sim().hardware_id = hardware_id;
        self
    }

    /// Keep every clock cycle, for [`FakeCable::consume_waveform`].
    pub fn recording(self) -> Self {
        self.sim().cycles = Some(Vec::new());
        self
    }

    /// Make the next bulk read return one byte less than asked for.
    pub fn fail_next_read(&self) {
        self.sim().short_reads += 1;
    }

    pub fn take_gpio_writes(&self) -> Vec<u8> {
        std::mem::take(&mut self.sim().gpio_writes)
    }

    pub fn take_shifts(&self) -> Vec<ShiftRecord> {
        std::mem::take(&mut self.sim().shifts)
    }

    pub fn take_cycles(&self) -> Vec<Cycle> {
        self.sim().cycles.as_mut().map(std::mem::take).unwrap_or_default()
    }

    pub fn consume_waveform(&self) -> String {
        write_cycles(&self.take_cycles())
    }

    pub fn outputs_enabled(&self) -> bool {
        self.sim().outputs_enabled
    }

    pub fn routing(&self) -> Option<u16> {
        self.sim().routing
    }

    pub fn is_released(&self) -> bool {
        self.sim().released
    }

    /// TAP state of a simulated chain.
    pub fn tap_state(&self) -> Option<State> {
        match &self.sim().target {
            Device::Chain(chain) => Some(chain.state),
            _ => None,
        }
    }

    fn sim(&self) -> MutexGuard<'_, Sim> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Link for FakeCable {
    fn control_out(&mut self, value: u16, index: u16) -> Result<(), Fault> {
        let mut sim = self.sim();
        if sim.released {
            return Err(Fault::Released);
        }
        match value {
            request::OUTPUT_ENABLE => sim.outputs_enabled = true,
            request::OUTPUT_DISABLE => sim.outputs_enabled = false,
            request::REQUEST_28 => {}
            request::WRITE_GPIO => sim.write_gpio(index as u8),
            request::SELECT_GPIO => sim.routing = Some(index),
            request::SHIFT => sim.pending_shift = Some(index),
            other => return Err(Fault::Rejected(other)),
        }
        Ok(())
    }

    fn control_in(&mut self, value: u16, index: u16, buf: &mut [u8]) -> Result<usize, Fault> {
        let mut sim = self.sim();
        if sim.released {
            return Err(Fault::Released);
        }
        let data = match (value, index) {
            (request::READ_VERSION, 0) => sim.firmware_version.to_le_bytes().to_vec(),
            (request::READ_VERSION, 1) => sim.cpld_version.to_le_bytes().to_vec(),
            (request::READ_HARDWARE_ID, _) => sim.hardware_id.to_le_bytes().to_vec(),
            (request::READ_GPIO, _) => vec![sim.read_gpio()],
            (other, _) => return Err(Fault::Rejected(other)),
        };
        let len = data.len().min(buf.len());
        buf[..len].copy_from_slice(&data[..len]);
        Ok(len)
    }

    fn bulk_out(&mut self, data: &[u8]) -> Result<usize, Fault> {
        let mut sim = self.sim();
        if sim.released {
            return Err(Fault::Released);
        }
        let Some(bits) = sim.pending_shift.take() else {
            return Err(Fault::Rejected(request::SHIFT));
        };
        // the real firmware mangles these; refuse so callers notice
        if bits % 4 == 0 {
            return Err(Fault::Rejected(request::SHIFT));
        }
        let expected = 2 * usize::from(bits).div_ceil(4);
        if data.len() != expected {
            return Err(Fault::Short {
                expected,
                actual: data.len(),
            });
        }
        sim.run_ext(bits, data);
        Ok(data.len())
    }

    fn bulk_in(&mut self, buf: &mut [u8]) -> Result<usize, Fault> {
        let mut sim = self.sim();
        if sim.released {
            return Err(Fault::Released);
        }
        let Some(response) = sim.response.take() else {
            return Err(Fault::Rejected(request::SHIFT));
        };
        let mut len = response.len().min(buf.len());
        if sim.short_reads > 0 {
            sim.short_reads -= 1;
            len = len.saturating_sub(1);
        }
        buf[..len].copy_from_slice(&response[..len]);
        Ok(len)
    }

    fn release(&mut self) -> Result<(), Fault> {
        let mut sim = self.sim();
        if sim.released {
            return Err(Fault::Released);
        }
        sim.released = true;
        Ok(())
    }
}

impl Sim {
    fn write_gpio(&mut self, bits: u8) {
        self.gpio_writes.push(bits);
        let rising = bits & GPIO_TCK != 0 && self.gpio & GPIO_TCK == 0;
        self.gpio = bits;
        if rising {
            let tms = bits & GPIO_TMS != 0;
            let tdi = bits & GPIO_TDI != 0;
            let tdo = std::mem::take(&mut self.last_tdo);
            self.target.clock(tms, tdi);
            if let Some(cycles) = &mut self.cycles {
                cycles.push(Cycle { tms, tdi, tdo });
            }
        }
    }

    fn read_gpio(&mut self) -> u8 {
        self.last_tdo = self.target.sample(self.gpio & GPIO_TDI != 0);
        match self.last_tdo {
            true => GPIO_TDO,
            false => 0,
        }
    }

    fn run_ext(&mut self, bits: u16, data: &[u8]) {
        let mut sampled = Vec::new();
        let mut clocked = 0;
        for idx in 0..usize::from(bits) {
            let k = idx % 4;
            let (b0, b1) = (data[idx / 4 * 2], data[idx / 4 * 2 + 1]);
            let tdi = b0 >> k & 1 == 1;
            let tms = b0 >> (4 + k) & 1 == 1;
            let tck = b1 >> k & 1 == 1;
            let sample = b1 >> (4 + k) & 1 == 1;
            if !tck {
                continue;
            }

            clocked += 1;
            let tdo = sample && {
                let tdo = self.target.sample(tdi);
                sampled.push(tdo);
                tdo
            };
            self.target.clock(tms, tdi);
            if let Some(cycles) = &mut self.cycles {
                cycles.push(Cycle { tms, tdi, tdo });
            }
        }

        self.shifts.push(ShiftRecord {
            bits,
            clocked,
            sampled: sampled.len(),
        });
        if !sampled.is_empty() {
            self.response = Some(pack_tdo(&sampled));
        }
    }
}

/// Sampled bits as the CPLD returns them: 16-bit little-endian words filled
/// from the top, so a partial final word has its bits high.
fn pack_tdo(sampled: &[bool]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 * sampled.len().div_ceil(16));
    for chunk in sampled.chunks(16) {
        let mut word = 0u16;
        for &bit in chunk {
            word = word >> 1 | u16::from(bit) << 15;
        }
        out.extend(word.to_le_bytes());
    }
    out
}

enum Device {
    Loopback,
    Pattern { bits: Vec<bool>, next: usize },
    Chain(Chain),
}

impl Device {
    fn new(target: Target) -> Self {
        match target {
            Target::Loopback => Self::Loopback,
            Target::Pattern(bits) => Self::Pattern { bits, next: 0 },
            Target::Chain(devices) => Self::Chain(Chain::new(devices)),
        }
    }

    /// TDO as seen before the next rising edge.
    fn sample(&mut self, tdi: bool) -> bool {
        match self {
            Self::Loopback => tdi,
            Self::Pattern { bits, next } => {
                if bits.is_empty() {
                    return false;
                }
                let bit = bits[*next % bits.len()];
                *next += 1;
                bit
            }
            Self::Chain(chain) => chain.tdo(),
        }
    }

    fn clock(&mut self, tms: bool, tdi: bool) {
        if let Self::Chain(chain) = self {
            chain.clock(tms, tdi);
        }
    }
}

struct Chain {
    state: State,
    devices: Vec<TapDevice>,
}

struct TapDevice {
    spec: SimDevice,
    ir: u64,
    instr: u64,
    dr: u64,
    dr_len: u8,
}

impl TapDevice {
    fn new(spec: SimDevice) -> Self {
        let mut ret = Self {
            spec,
            ir: 0,
            instr: 0,
            dr: 0,
            dr_len: 1,
        };
        ret.reset();
        ret
    }

    fn reset(&mut self) {
        self.instr = match self.spec.idcode {
            Some(_) => self.spec.idcode_instr,
            None => u64::MAX >> (64 - self.spec.irlen),
        };
    }

    fn capture_dr(&mut self) {
        match self.spec.idcode {
            Some(idcode) if self.instr == self.spec.idcode_instr => {
                self.dr = u64::from(idcode);
                self.dr_len = 32;
            }
            _ => {
                self.dr = 0;
                self.dr_len = 1;
            }
        }
    }
}

impl Chain {
    fn new(devices: Vec<SimDevice>) -> Self {
        Self {
            state: State::TestLogicReset,
            devices: devices.into_iter().map(TapDevice::new).collect(),
        }
    }

    fn tdo(&self) -> bool {
        let Some(first) = self.devices.first() else {
            return true;
        };
        match self.state {
            State::ShiftIR => first.ir & 1 == 1,
            State::ShiftDR => first.dr & 1 == 1,
            // TDO floats, pulled up
            _ => true,
        }
    }

    fn clock(&mut self, tms: bool, tdi: bool) {
        match self.state {
            State::TestLogicReset => self.devices.iter_mut().for_each(TapDevice::reset),
            State::CaptureIR => self.devices.iter_mut().for_each(|d| d.ir = 0b01),
            State::ShiftIR => self.shift(tdi, true),
            State::UpdateIR => self.devices.iter_mut().for_each(|d| d.instr = d.ir),
            State::CaptureDR => self.devices.iter_mut().for_each(TapDevice::capture_dr),
            State::ShiftDR => self.shift(tdi, false),
            _ => {}
        }
        self.state = GRAPH[self.state][tms];
    }

    /// All registers move at once: TDI enters the last device, each device
    /// feeds the one before it.
    fn shift(&mut self, tdi: bool, ir: bool) {
        let mut input = tdi;
        for device in self.devices.iter_mut().rev() {
            let (reg, len) = match ir {
                true => (&mut device.ir, device.spec.irlen),
                false => (&mut device.dr, device.dr_len),
            };
            let out = *reg & 1 == 1;
            *reg = *reg >> 1 | u64::from(input) << (len - 1);
            input = out;
        }
    }
}

fn write_waveform(
    bits: impl Iterator<Item = bool>,
    start: bool,
    top: &mut String,
    bot: &mut String,
) {
    let mut prev = start;
    for b in bits {
        let (t, u) = match (prev, b) {
            (true, true) => ("──", "  "),
            (true, false) => ("─┐", " └"),
            (false, true) => (" ┌", "─┘"),
            (false, false) => ("  ", "──"),
        };
        top.push_str(t);
        bot.push_str(u);
        prev = b;
    }
}

fn write_cycles(cycles: &[Cycle]) -> String {
    let wave_width = cycles.len() * 2;
    let mut ret = String::from("┌Signals┐┌Waves");
    ret.extend(std::iter::repeat_n('─', wave_width.saturating_sub(5)));
    ret.push_str("┐\n");

    let mut row = |name: &str, top: String, bot: String| {
        ret.push_str(&format!("│{name:<7}││{top}│\n"));
        ret.push_str(&format!("│       ││{bot}│\n"));
    };

    row(
        "tck",
        "┌┐".repeat(cycles.len()),
        "┘└".repeat(cycles.len()),
    );
    let signals: [(&str, fn(&Cycle) -> bool); 3] = [
        ("tms", |c| c.tms),
        ("tdi", |c| c.tdi),
        ("tdo", |c| c.tdo),
    ];
    for (name, signal) in signals {
        let (mut top, mut bot) = (String::new(), String::new());
        write_waveform(cycles.iter().map(signal), false, &mut top, &mut bot);
        row(name, top, bot);
    }

    ret.push_str("└───────┘└─────");
    ret.extend(std::iter::repeat_n('─', wave_width.saturating_sub(5)));
    ret.push_str("┘\n");
    ret
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "irlen must be in 1..=64")]
    fn empty_instruction_register() {
        SimDevice::bypass(0);
    }

    #[test]
    #[should_panic(expected = "irlen must be in 1..=64")]
    fn instruction_register_wider_than_u64() {
        SimDevice::new(0x01414093, 65, 0x09);
    }

    #[test]
    fn widest_instruction_register_resets_to_bypass() {
        let device = TapDevice::new(SimDevice::bypass(64));
        assert_eq!(device.instr, u64::MAX);

        let mut chain = Chain::new(vec![SimDevice::bypass(64)]);
        chain.shift(true, true);
        assert_eq!(chain.devices[0].ir, 1 << 63);
    }

    #[test]
    fn pack_fills_words_from_the_top() {
        let bits = [true, false, true];
        assert_eq!(pack_tdo(&bits), (0b101u16 << 13).to_le_bytes());

        let mut bits = vec![false; 16];
        bits[0] = true;
        bits.push(true);
        assert_eq!(pack_tdo(&bits), [0x01, 0x00, 0x00, 0x80]);
    }

    #[test]
    fn chain_shifts_idcodes_out_after_reset() {
        let mut chain = Chain::new(vec![
            SimDevice::new(0x11111111, 6, 0x09),
            SimDevice::bypass(4),
            SimDevice::new(0x22222223, 8, 0xfe),
        ]);
        // TLR -> RTI -> Select-DR -> Capture-DR -> Shift-DR
        for tms in [false, true, false, false] {
            chain.clock(tms, true);
        }
        assert_eq!(chain.state, State::ShiftDR);

        let mut out = Vec::new();
        for _ in 0..(32 + 1 + 32 + 4) {
            out.push(chain.tdo());
            chain.clock(false, true);
        }
        let word = |bits: &[bool]| {
            bits.iter()
                .rev()
                .fold(0u32, |acc, &b| acc << 1 | u32::from(b))
        };
        assert_eq!(word(&out[..32]), 0x11111111);
        assert!(!out[32]);
        assert_eq!(word(&out[33..65]), 0x22222223);
        assert!(out[65..].iter().all(|&b| b));
    }

    #[test]
    fn ir_capture_reads_01() {
        let mut chain = Chain::new(vec![SimDevice::new(0x11111111, 6, 0x09)]);
        // TLR -> RTI -> Select-DR -> Select-IR -> Capture-IR -> Shift-IR
        for tms in [false, true, true, false, false] {
            chain.clock(tms, false);
        }
        assert_eq!(chain.state, State::ShiftIR);
        let mut out = Vec::new();
        for _ in 0..6 {
            out.push(chain.tdo());
            chain.clock(false, false);
        }
        assert_eq!(out, [true, false, false, false, false, false]);
    }

    #[test]
    fn waveform_has_a_row_per_signal() {
        let cycles = [
            Cycle {
                tms: true,
                tdi: false,
                tdo: false,
            },
            Cycle {
                tms: false,
                tdi: true,
                tdo: true,
            },
        ];
        let waves = write_cycles(&cycles);
        assert_eq!(waves.lines().count(), 10);
        for name in ["tck", "tms", "tdi", "tdo"] {
            assert!(waves.contains(&format!("│{name:<7}││")), "{waves}");
        }
    }
}
