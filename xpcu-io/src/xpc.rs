//! Xilinx Platform Cable USB.

use std::ops::RangeInclusive;

use nusb::MaybeFuture;
use tracing::{debug, info, instrument, warn};

use crate::{
    Backend, Hex, Result,
    backend::{Identity, check_lengths},
    cables::{Cable, OpenOptions},
    error::{Error, Fault, Part},
    units::Bits,
};

mod channel;
mod ext;
mod gpio;
mod usb;

pub use channel::{ControlChannel, EP_IN, EP_OUT, Link, request};
pub use ext::{CAPACITY, READ_BITS, WRITE_BITS};
pub use usb::UsbLink;

pub const XPC_VID: u16 = 0x03fd;
pub const XPC_PID: u16 = 0x0008;

/// Size of the CPLD's transfer buffer.
pub const CPLD_MAX_BYTES: usize = 4096;

pub(crate) const GPIO_PROG: u8 = 1 << 3;
pub(crate) const GPIO_TCK: u8 = 1 << 2;
pub(crate) const GPIO_TMS: u8 = 1 << 1;
pub(crate) const GPIO_TDI: u8 = 1 << 0;
pub(crate) const GPIO_TDO: u8 = 1 << 0;

/// Where the cable's JTAG lines go.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
#[repr(u16)]
pub enum GpioRouting {
    /// The cable's own CPLD, bit-banged through the GPIO register.
    Internal = 0,
    /// The target header, driven by batched CPLD transfers.
    External = 1,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Health {
    Ready,
    /// A transfer failed; the TAP state is unknown until the cable is
    /// reopened.
    Poisoned,
    Closed,
}

/// An open, initialized cable. Outputs are disabled and the interface
/// released when closed or dropped.
pub struct Session<L: Link> {
    ctrl: ControlChannel<L>,
    identity: Identity,
    routing: GpioRouting,
    health: Health,
}

/// A cable on the bus that matches the wanted VID:PID, not yet claimed.
pub struct Candidate<F> {
    pub serial: Option<String>,
    pub open: F,
}

impl Session<UsbLink> {
    /// Find, claim and initialize a cable on the USB bus.
    #[instrument(skip_all, fields(cable = cable.name, routing = %routing))]
    pub fn open(cable: &'static Cable, opts: &OpenOptions, routing: GpioRouting) -> Result<Self> {
        Self::open_from(|| usb_candidates(cable, opts), cable, opts, routing)
    }
}

impl<L: Link> Session<L> {
    /// Pick one of `enumerate`'s candidates by `opts.serial`, then claim and
    /// initialize it.
    ///
    /// A transport failure is retried once with a fresh enumeration, since the
    /// interface claim can race with the OS finishing enumeration.
    pub fn open_from<E, F>(
        mut enumerate: E,
        cable: &'static Cable,
        opts: &OpenOptions,
        routing: GpioRouting,
    ) -> Result<Self>
    where
        E: FnMut() -> Result<Vec<Candidate<F>>>,
        F: FnOnce() -> Result<L>,
    {
        match Self::try_open(&mut enumerate, cable, opts, routing) {
            Err(e) if e.is_transport() => {
                warn!(error = %e, "opening cable failed, retrying once");
                Self::try_open(&mut enumerate, cable, opts, routing)
            }
            r => r,
        }
    }

    fn try_open<E, F>(
        enumerate: &mut E,
        cable: &'static Cable,
        opts: &OpenOptions,
        routing: GpioRouting,
    ) -> Result<Self>
    where
        E: FnMut() -> Result<Vec<Candidate<F>>>,
        F: FnOnce() -> Result<L>,
    {
        let link = find(enumerate()?, cable, opts)?;
        Self::with_link(link, cable, opts, routing)
    }
}

fn usb_candidates(
    cable: &Cable,
    opts: &OpenOptions,
) -> Result<Vec<Candidate<impl FnOnce() -> Result<UsbLink> + use<>>>> {
    let (vid, pid) = opts.address(cable);
    let timeout = opts.timeout;
    let candidates = nusb::list_devices()
        .wait()
        .map_err(|e| Error::transport("list devices")(e.into()))?
        .filter(|d| d.vendor_id() == vid && d.product_id() == pid)
        .filter(|d| cable.description.is_none_or(|desc| d.product_string() == Some(desc)))
        .map(|info| Candidate {
            serial: info.serial_number().map(str::to_owned),
            open: move || UsbLink::open(&info, timeout).map_err(Error::transport("open device")),
        })
        .collect::<Vec<_>>();
    debug!(candidates = candidates.len());
    Ok(candidates)
}

/// Pick the cable to open. A serial matches the USB serial string first, and
/// otherwise, when it parses as hex, the hardware ID burned into the cable.
/// Cables that fail to open are skipped while matching by hardware ID.
fn find<L, F>(mut candidates: Vec<Candidate<F>>, cable: &Cable, opts: &OpenOptions) -> Result<L>
where
    L: Link,
    F: FnOnce() -> Result<L>,
{
    let (vid, pid) = opts.address(cable);
    let not_found = || Error::DeviceNotFound {
        wanted: match &opts.serial {
            Some(serial) => format!("{}:{} serial {serial}", Hex(vid), Hex(pid)),
            None => format!("{}:{}", Hex(vid), Hex(pid)),
        },
    };

    let Some(serial) = &opts.serial else {
        return match candidates.into_iter().next() {
            Some(first) => (first.open)(),
            None => Err(not_found()),
        };
    };
    if let Some(i) = candidates.iter().position(|c| c.serial.as_deref() == Some(serial.as_str())) {
        return (candidates.swap_remove(i).open)();
    }
    let Ok(wanted) = u64::from_str_radix(serial, 16) else {
        return Err(not_found());
    };
    for candidate in candidates {
        let mut ctrl = match (candidate.open)() {
            Ok(link) => ControlChannel::new(link),
            Err(e) => {
                warn!(serial = ?candidate.serial, error = %e, "skipping cable that cannot be opened");
                continue;
            }
        };
        match ctrl.read_hardware_id() {
            Ok(hid) if hid == wanted => return Ok(ctrl.into_link()),
            Ok(hid) => debug!(hid = %Hex(hid), "hardware id mismatch"),
            Err(e) => warn!(error = %e, "failed to read hardware id"),
        }
        if let Err(e) = ctrl.release() {
            warn!(error = %e, "failed to release non-matching cable");
        }
    }
    Err(not_found())
}

impl<L: Link> Session<L> {
    /// Initialize a cable over an already claimed link. On failure the link is
    /// shut down before returning.
    pub fn with_link(
        link: L,
        cable: &'static Cable,
        opts: &OpenOptions,
        routing: GpioRouting,
    ) -> Result<Self> {
        if let Some(frequency) = opts.frequency {
            debug!(frequency, "shift rate is fixed by the cable firmware, ignoring frequency");
        }

        let mut ctrl = ControlChannel::new(link);
        match init(&mut ctrl, opts, routing) {
            Ok((firmware_version, cpld_version, hardware_id)) => {
                let (vid, pid) = opts.address(cable);
                let identity = Identity {
                    vid,
                    pid,
                    subtype: cable.name,
                    hardware_id,
                    firmware_version,
                    cpld_version,
                };
                Ok(Self {
                    ctrl,
                    identity,
                    routing,
                    health: Health::Ready,
                })
            }
            Err(e) => {
                if let Err(cleanup) = shutdown(&mut ctrl) {
                    warn!(error = %cleanup, "cleanup after failed open");
                }
                Err(e)
            }
        }
    }

    pub fn routing(&self) -> GpioRouting {
        self.routing
    }

    fn ready(&self, op: &'static str) -> Result<()> {
        match self.health {
            Health::Ready => Ok(()),
            Health::Poisoned => Err(Error::transport(op)(Fault::Poisoned)),
            Health::Closed => Err(Error::transport(op)(Fault::Released)),
        }
    }

    fn watch(&mut self, result: Result<()>) -> Result<()> {
        if let Err(e) = &result
            && e.is_transport()
        {
            warn!(error = %e, "transfer failed, session unusable until reopened");
            self.health = Health::Poisoned;
        }
        result
    }
}

fn init<L: Link>(
    ctrl: &mut ControlChannel<L>,
    opts: &OpenOptions,
    routing: GpioRouting,
) -> Result<(u16, u16, u64)> {
    ctrl.request_28(0x11)?;
    ctrl.write_gpio(GPIO_PROG)?;

    let firmware = ctrl.read_firmware_version()?;
    let cpld = ctrl.read_cpld_version()?;
    info!(firmware_version = %Hex(firmware), cpld_version = %Hex(cpld));
    check_version(Part::Firmware, firmware, &opts.firmware)?;
    check_version(Part::Cpld, cpld, &opts.cpld)?;

    let hardware_id = ctrl.read_hardware_id()?;
    info!(hardware_id = %Hex(hardware_id));

    ctrl.select_gpio(routing)?;
    ctrl.request_28(0x11)?;
    ctrl.output_enable(true)?;
    ctrl.shift(2, &[0x00; 2], None)?;
    ctrl.request_28(0x12)?;

    Ok((firmware, cpld, hardware_id))
}

fn check_version(part: Part, version: u16, supported: &RangeInclusive<u16>) -> Result<()> {
    // a cable stuck mid-reset reads back 0
    if version != 0 && supported.contains(&version) {
        return Ok(());
    }
    Err(Error::IncompatibleFirmware {
        part,
        version,
        min: *supported.start(),
        max: *supported.end(),
    })
}

/// Disable outputs, then release. Both are attempted; the first error wins.
fn shutdown<L: Link>(ctrl: &mut ControlChannel<L>) -> Result<()> {
    let disabled = ctrl.output_enable(false);
    if let Err(e) = &disabled {
        warn!(error = %e, "failed to disable cable outputs");
    }
    let released = ctrl.release();
    disabled.and(released)
}

impl<L: Link> Backend for Session<L> {
    #[instrument(skip_all, fields(len = len.0, last = last))]
    fn shift_block(
        &mut self,
        tdi: Option<&[u8]>,
        mut tdo: Option<&mut [u8]>,
        len: Bits<usize>,
        last: bool,
    ) -> Result<()> {
        self.ready("shift")?;
        check_lengths(tdi, tdo.as_deref(), len)?;
        if len.0 == 0 {
            return Ok(());
        }

        let result = match self.routing {
            GpioRouting::External => {
                ext::shift_block(&mut self.ctrl, tdi, tdo.as_deref_mut(), len.0, last)
            }
            GpioRouting::Internal => {
                gpio::shift_block(&mut self.ctrl, tdi, tdo.as_deref_mut(), len.0, last)
            }
        };
        self.watch(result)?;

        if let Some(tdo) = tdo {
            tdo[len.bytes().0 - 1] &= len.tail_mask();
        }
        Ok(())
    }

    /// Every call reaches the wire before returning, so `force_flush` is
    /// always satisfied.
    #[instrument(skip_all, fields(len = len.0))]
    fn shift_tms(&mut self, pattern: &[u8], len: Bits<usize>, _force_flush: bool) -> Result<()> {
        self.ready("shift tms")?;
        check_lengths(Some(pattern), None, len)?;
        if len.0 == 0 {
            return Ok(());
        }

        let result = match self.routing {
            GpioRouting::External => ext::shift_tms(&mut self.ctrl, pattern, len.0),
            GpioRouting::Internal => gpio::shift_tms(&mut self.ctrl, pattern, len.0),
        };
        self.watch(result)
    }

    fn close(&mut self) -> Result<()> {
        if self.health == Health::Closed {
            return Ok(());
        }
        self.health = Health::Closed;
        info!("closing cable");
        shutdown(&mut self.ctrl)
    }

    fn identity(&self) -> Option<&Identity> {
        Some(&self.identity)
    }
}

impl<L: Link> Drop for Session<L> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "closing cable on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        cables,
        sim::{FakeCable, ShiftRecord, Target},
    };

    fn open(cable: &FakeCable, routing: GpioRouting) -> Session<FakeCable> {
        let session = Session::with_link(
            cable.clone(),
            cables::find("xpc").unwrap(),
            &OpenOptions::default(),
            routing,
        )
        .unwrap();
        cable.take_shifts();
        cable.take_gpio_writes();
        session
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 37 + 11) as u8).collect()
    }

    /// A listed cable. `None` is one another process has claimed.
    fn candidate(
        serial: &str,
        cable: Option<&FakeCable>,
    ) -> Candidate<impl FnOnce() -> Result<FakeCable> + use<>> {
        let cable = cable.cloned();
        Candidate {
            serial: Some(serial.to_owned()),
            open: move || {
                cable.ok_or_else(|| {
                    Error::transport("open device")(Fault::Timeout(Duration::from_secs(1)))
                })
            },
        }
    }

    fn by_serial(serial: &str) -> OpenOptions {
        OpenOptions {
            serial: Some(serial.to_owned()),
            ..Default::default()
        }
    }

    #[test]
    fn transport_failure_is_retried_with_a_fresh_listing() {
        let cable = FakeCable::new(Target::Loopback);
        let mut listings = vec![vec![candidate("B", Some(&cable))], vec![candidate("A", None)]];

        let session = Session::open_from(
            || Ok(listings.pop().unwrap_or_default()),
            cables::find("xpc").unwrap(),
            &OpenOptions::default(),
            GpioRouting::External,
        )
        .unwrap();
        assert!(listings.is_empty());
        assert!(cable.outputs_enabled());
        drop(session);
        assert!(cable.is_released());
    }

    #[test]
    fn second_transport_failure_is_returned() {
        let mut listings = 0;
        let r = Session::open_from(
            || {
                listings += 1;
                Ok(vec![candidate("A", None)])
            },
            cables::find("xpc").unwrap(),
            &OpenOptions::default(),
            GpioRouting::External,
        );
        assert!(matches!(r, Err(Error::Transport { op: "open device", .. })));
        assert_eq!(listings, 2);
    }

    #[test]
    fn incompatible_version_is_not_retried() {
        let cable = FakeCable::new(Target::Loopback).with_versions(0, 0x0012);
        let mut listings = 0;
        let r = Session::open_from(
            || {
                listings += 1;
                Ok(vec![candidate("A", Some(&cable))])
            },
            cables::find("xpc").unwrap(),
            &OpenOptions::default(),
            GpioRouting::External,
        );
        assert!(matches!(
            r,
            Err(Error::IncompatibleFirmware {
                part: Part::Firmware,
                version: 0,
                ..
            })
        ));
        assert_eq!(listings, 1);
        assert!(cable.is_released());
    }

    #[test]
    fn missing_cable_is_not_retried() {
        let mut listings = 0;
        let r = Session::open_from(
            || {
                listings += 1;
                Ok(vec![candidate("A", Some(&FakeCable::new(Target::Loopback)))])
            },
            cables::find("xpc").unwrap(),
            &by_serial("not-a-cable"),
            GpioRouting::External,
        );
        assert!(matches!(r, Err(Error::DeviceNotFound { .. })));
        assert_eq!(listings, 1);
    }

    #[test]
    fn serial_string_is_matched_before_hardware_id() {
        let first = FakeCable::new(Target::Loopback).with_hardware_id(0xcafe);
        let second = FakeCable::new(Target::Loopback);
        let session = Session::open_from(
            || Ok(vec![candidate("A", Some(&first)), candidate("cafe", Some(&second))]),
            cables::find("xpc").unwrap(),
            &by_serial("cafe"),
            GpioRouting::External,
        )
        .unwrap();
        assert_eq!(session.identity().unwrap().hardware_id, 0x0000_0123_4567_89ab);
        assert!(!first.outputs_enabled());
        assert!(!first.is_released());
    }

    #[test]
    fn hardware_id_picks_the_matching_cable() {
        let first = FakeCable::new(Target::Loopback).with_hardware_id(0x1111);
        let second = FakeCable::new(Target::Loopback).with_hardware_id(0x2222);
        let session = Session::open_from(
            || Ok(vec![candidate("A", Some(&first)), candidate("B", Some(&second))]),
            cables::find("xpc").unwrap(),
            &by_serial("2222"),
            GpioRouting::External,
        )
        .unwrap();
        assert_eq!(session.identity().unwrap().hardware_id, 0x2222);
        assert!(first.is_released());
        assert!(!second.is_released());
        assert!(second.outputs_enabled());
    }

    #[test]
    fn claimed_cable_is_skipped_when_matching_hardware_id() {
        let free = FakeCable::new(Target::Loopback).with_hardware_id(0x2222);
        let mut listings = 0;
        let session = Session::open_from(
            || {
                listings += 1;
                Ok(vec![candidate("A", None), candidate("B", Some(&free))])
            },
            cables::find("xpc").unwrap(),
            &by_serial("2222"),
            GpioRouting::External,
        )
        .unwrap();
        assert_eq!(session.identity().unwrap().hardware_id, 0x2222);
        assert_eq!(listings, 1);
    }

    #[test]
    fn no_hardware_id_match_releases_every_cable() {
        let listed = [
            FakeCable::new(Target::Loopback).with_hardware_id(0x1111),
            FakeCable::new(Target::Loopback).with_hardware_id(0x3333),
        ];
        let r = Session::open_from(
            || Ok(listed.iter().map(|c| candidate("A", Some(c))).collect()),
            cables::find("xpc").unwrap(),
            &by_serial("2222"),
            GpioRouting::External,
        );
        assert!(matches!(r, Err(Error::DeviceNotFound { .. })));
        assert!(listed.iter().all(FakeCable::is_released));
    }

    #[test]
    fn open_runs_init_sequence() {
        let cable = FakeCable::new(Target::Loopback);
        let session = Session::with_link(
            cable.clone(),
            cables::find("xpc").unwrap(),
            &OpenOptions::default(),
            GpioRouting::External,
        )
        .unwrap();

        assert!(cable.outputs_enabled());
        assert_eq!(cable.routing(), Some(1));
        assert_eq!(cable.take_gpio_writes(), [GPIO_PROG]);
        assert_eq!(
            cable.take_shifts(),
            [ShiftRecord {
                bits: 2,
                clocked: 0,
                sampled: 0
            }]
        );

        let identity = session.identity().unwrap();
        assert_eq!((identity.vid, identity.pid), (XPC_VID, XPC_PID));
        assert_eq!(identity.subtype, "xpc");
        assert_eq!(identity.firmware_version, 0x0006);
        assert_eq!(identity.cpld_version, 0x0012);
        assert_eq!(identity.hardware_id, 0x0000_0123_4567_89ab);
    }

    #[test]
    fn incompatible_version_releases_cable() {
        let cable = FakeCable::new(Target::Loopback).with_versions(0x0006, 0);
        let err = Session::with_link(
            cable.clone(),
            cables::find("xpc").unwrap(),
            &OpenOptions::default(),
            GpioRouting::External,
        )
        .err()
        .unwrap();
        assert!(
            matches!(
                err,
                Error::IncompatibleFirmware {
                    part: Part::Cpld,
                    version: 0,
                    ..
                }
            ),
            "{err}"
        );
        assert!(err.to_string().contains("try resetting the cable"));
        assert!(cable.is_released());
        assert!(!cable.outputs_enabled());

        let cable = FakeCable::new(Target::Loopback);
        let opts = OpenOptions {
            firmware: 0x0010..=0x0020,
            ..Default::default()
        };
        let err = Session::with_link(
            cable.clone(),
            cables::find("xpc").unwrap(),
            &opts,
            GpioRouting::External,
        )
        .err()
        .unwrap();
        assert!(matches!(err, Error::IncompatibleFirmware { part: Part::Firmware, .. }));
        assert!(cable.is_released());
    }

    #[test]
    fn close_is_idempotent() {
        let cable = FakeCable::new(Target::Loopback);
        let mut session = open(&cable, GpioRouting::External);
        session.close().unwrap();
        assert!(cable.is_released());
        assert!(!cable.outputs_enabled());
        session.close().unwrap();

        let err = session.shift_block(None, None, Bits(8), false).unwrap_err();
        assert!(
            matches!(err, Error::Transport { fault: Fault::Released, .. }),
            "{err}"
        );
    }

    #[test]
    fn drop_closes() {
        let cable = FakeCable::new(Target::Loopback);
        drop(open(&cable, GpioRouting::External));
        assert!(cable.is_released());
        assert!(!cable.outputs_enabled());
    }

    #[test]
    fn loopback_preserves_order() {
        let cable = FakeCable::new(Target::Loopback);
        let mut session = open(&cable, GpioRouting::External);

        for len in [
            1, 2, 3, 4, 5, 7, 8, 9, 15, 16, 17, 31, 32, 33, 4095, 8191, 8192, 8193, 16383, 20000,
        ] {
            let len = Bits(len);
            let tdi = pattern(len.bytes().0);
            let tdo = session.shift(&tdi, len, false).unwrap();

            let mut expected = tdi.clone();
            *expected.last_mut().unwrap() &= len.tail_mask();
            assert_eq!(tdo, expected, "len {}", len.0);
        }
    }

    #[test]
    fn long_shifts_split_at_capacity() {
        let cable = FakeCable::new(Target::Loopback);
        let mut session = open(&cable, GpioRouting::External);

        for len in [8190, 8191, 8192, 16382, 16383, 20000] {
            let tdi = pattern(Bits(len).bytes().0);
            for capture in [false, true] {
                let mut tdo = vec![0; tdi.len()];
                let tdo = capture.then_some(&mut tdo[..]);
                session.shift_block(Some(&tdi), tdo, Bits(len), false).unwrap();

                let shifts = cable.take_shifts();
                assert_eq!(shifts.len(), len.div_ceil(CAPACITY), "len {len}");
                assert_eq!(shifts.iter().map(|s| s.clocked).sum::<usize>(), len);
                let sampled = shifts.iter().map(|s| s.sampled).sum::<usize>();
                assert_eq!(sampled, if capture { len } else { 0 });
                for shift in &shifts {
                    assert_ne!(shift.bits % 4, 0, "len {len}");
                    assert!(usize::from(shift.bits) <= WRITE_BITS);
                }
            }
        }
    }

    #[test]
    fn multiple_of_four_gets_a_padding_bit() {
        let cable = FakeCable::new(Target::Loopback);
        let mut session = open(&cable, GpioRouting::External);
        session.shift_block(Some(&[0x0f]), None, Bits(4), false).unwrap();
        assert_eq!(
            cable.take_shifts(),
            [ShiftRecord {
                bits: 5,
                clocked: 4,
                sampled: 0
            }]
        );
    }

    #[test]
    fn zero_length_is_a_no_op() {
        let cable = FakeCable::new(Target::Loopback);
        let mut session = open(&cable, GpioRouting::External);
        session.shift_block(None, Some(&mut []), Bits(0), true).unwrap();
        session.shift_tms(&[], Bits(0), true).unwrap();
        assert!(cable.take_shifts().is_empty());
    }

    #[test]
    fn pattern_capture_on_both_routings() {
        for routing in [GpioRouting::External, GpioRouting::Internal] {
            let cable = FakeCable::new(Target::Pattern(vec![false, true]));
            let mut session = open(&cable, routing);
            let tdo = session.shift(&[0xff], Bits(8), false).unwrap();
            assert_eq!(tdo, [0xaa], "{routing}");
        }
    }

    #[test]
    fn internal_tms_is_bit_banged() {
        let cable = FakeCable::new(Target::Loopback);
        let mut session = open(&cable, GpioRouting::Internal);
        session.shift_tms(&[0b0110], Bits(4), true).unwrap();

        let (lo, hi) = (GPIO_PROG, GPIO_PROG | GPIO_TMS);
        assert_eq!(
            cable.take_gpio_writes(),
            [
                lo,
                lo | GPIO_TCK,
                hi,
                hi | GPIO_TCK,
                hi,
                hi | GPIO_TCK,
                lo,
                lo | GPIO_TCK,
            ]
        );
        assert!(cable.take_shifts().is_empty());
    }

    #[test]
    fn external_tms_is_one_transfer() {
        let cable = FakeCable::new(Target::Loopback).recording();
        let mut session = open(&cable, GpioRouting::External);
        session.shift_tms(&[0b0110], Bits(4), true).unwrap();

        assert_eq!(
            cable.take_shifts(),
            [ShiftRecord {
                bits: 5,
                clocked: 4,
                sampled: 0
            }]
        );
        let tms = cable.take_cycles().iter().map(|c| c.tms).collect::<Vec<_>>();
        assert_eq!(tms, [false, true, true, false]);
        assert!(cable.take_gpio_writes().is_empty());
    }

    #[test]
    fn last_raises_tms_on_the_final_bit() {
        let cable = FakeCable::new(Target::Loopback).recording();
        let mut session = open(&cable, GpioRouting::External);

        session.shift_block(Some(&[0b101]), None, Bits(3), true).unwrap();
        session.shift_tms(&[0b01], Bits(2), false).unwrap();

        let cycles = cable.take_cycles();
        let tms = cycles.iter().map(|c| c.tms).collect::<Vec<_>>();
        let tdi = cycles.iter().map(|c| c.tdi).collect::<Vec<_>>();
        assert_eq!(tms, [false, false, true, true, false]);
        assert_eq!(tdi, [true, false, true, false, false]);
    }

    #[test]
    fn waveform_of_recorded_cycles() {
        let cable = FakeCable::new(Target::Loopback).recording();
        let mut session = open(&cable, GpioRouting::External);
        session.shift(&[0b0110], Bits(4), false).unwrap();

        let waves = cable.consume_waveform();
        assert!(waves.starts_with("┌Signals┐┌Waves"), "{waves}");
        assert!(waves.contains("│tdo    ││"), "{waves}");
        assert!(cable.take_cycles().is_empty());
    }

    #[test]
    fn short_read_poisons_the_session() {
        let cable = FakeCable::new(Target::Loopback);
        let mut session = open(&cable, GpioRouting::External);

        cable.fail_next_read();
        let err = session.shift(&[0xff; 2], Bits(16), false).unwrap_err();
        assert!(
            matches!(
                err,
                Error::Transport {
                    fault: Fault::Short {
                        expected: 2,
                        actual: 1
                    },
                    ..
                }
            ),
            "{err}"
        );

        let err = session.shift_tms(&[0x1f], Bits(5), false).unwrap_err();
        assert!(
            matches!(err, Error::Transport { fault: Fault::Poisoned, .. }),
            "{err}"
        );

        session.close().unwrap();
        assert!(cable.is_released());
    }

    #[test]
    fn short_buffers_do_not_poison() {
        let cable = FakeCable::new(Target::Loopback);
        let mut session = open(&cable, GpioRouting::External);

        let err = session.shift_block(Some(&[0]), None, Bits(9), false).unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation(_)), "{err}");
        let err = session
            .shift_block(None, Some(&mut [0; 1]), Bits(9), false)
            .unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation(_)), "{err}");
        assert!(cable.take_shifts().is_empty());

        session.shift(&[0xa5, 0x01], Bits(9), false).unwrap();
    }
}
