//! Shifts of arbitrary length and content through a simulated cable.

use proptest::prelude::*;
use xpcu_io::{
    Backend,
    cables::{self, OpenOptions},
    sim::{FakeCable, Target},
    units::Bits,
    xpc::{CAPACITY, GpioRouting, Session},
};

fn session(cable: &FakeCable) -> Session<FakeCable> {
    let session = Session::with_link(
        cable.clone(),
        cables::find("xpc").unwrap(),
        &OpenOptions::default(),
        GpioRouting::External,
    )
    .unwrap();
    cable.take_shifts();
    session
}

/// Bit length and a TDI buffer just big enough for it.
fn shift() -> impl Strategy<Value = (usize, Vec<u8>)> {
    (1usize..3 * CAPACITY).prop_flat_map(|len| {
        (
            Just(len),
            proptest::collection::vec(any::<u8>(), len.div_ceil(8)),
        )
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Every bit comes back once, in order, in as few transfers as the
    /// buffer allows.
    #[test]
    fn loopback_returns_tdi((len, tdi) in shift(), last in any::<bool>()) {
        let cable = FakeCable::new(Target::Loopback);
        let mut session = session(&cable);

        let tdo = session.shift(&tdi, Bits(len), last).unwrap();
        let shifts = cable.take_shifts();

        let mut expected = tdi.clone();
        *expected.last_mut().unwrap() &= Bits(len).tail_mask();
        prop_assert_eq!(tdo, expected);

        prop_assert_eq!(shifts.len(), len.div_ceil(CAPACITY));
        prop_assert_eq!(shifts.iter().map(|s| s.clocked).sum::<usize>(), len);
        prop_assert_eq!(shifts.iter().map(|s| s.sampled).sum::<usize>(), len);
        for s in &shifts {
            prop_assert_ne!(s.bits % 4, 0);
        }
    }

    #[test]
    fn tms_only_samples_nothing(pattern in any::<u8>(), len in 1usize..=8) {
        let cable = FakeCable::new(Target::Loopback).recording();
        let mut session = session(&cable);

        session.shift_tms(&[pattern], Bits(len), false).unwrap();
        let shifts = cable.take_shifts();
        prop_assert_eq!(shifts.len(), 1);
        prop_assert_eq!(shifts[0].sampled, 0);

        let cycles = cable.take_cycles();
        prop_assert_eq!(cycles.len(), len);
        for (i, cycle) in cycles.iter().enumerate() {
            prop_assert_eq!(cycle.tms, pattern >> i & 1 == 1);
            prop_assert!(!cycle.tdi);
        }
    }
}

#[test]
fn every_length_up_to_one_transfer() {
    let cable = FakeCable::new(Target::Loopback);
    let mut session = session(&cable);
    let tdi = (0..1024).map(|i| (i * 151 + 7) as u8).collect::<Vec<_>>();

    for len in 1..=8192 {
        let len = Bits(len);
        let tdi = &tdi[..len.bytes().0];
        let tdo = session.shift(tdi, len, false).unwrap();
        assert_eq!(tdo[..tdo.len() - 1], tdi[..tdi.len() - 1], "len {}", len.0);
        assert_eq!(tdo[tdo.len() - 1], tdi[tdi.len() - 1] & len.tail_mask(), "len {}", len.0);
    }
}
