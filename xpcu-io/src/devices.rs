use crate::units::Bits;

#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IdCode(u32);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub irlen: Bits<u8>,
    pub name: &'static str,
}

impl IdCode {
    pub const fn new(code: u32) -> Self {
        /// IEEE 11491-2013, Figure 12-1, "Structure of the device
        /// identification code"
        const VERSION: u32 = 0xf0000000;
        Self(code & !VERSION)
    }

    pub const fn code(self) -> u32 {
        self.0
    }

    /// Bits 1..12, the JEDEC manufacturer code.
    pub const fn manufacturer(self) -> u16 {
        (self.0 >> 1 & 0x7ff) as u16
    }
}

/// Returns iterator of `(idcode, info)`. Intended to be collected into a
/// `HashMap`, to be passed to [`crate::Chain::detect`].
pub fn builtin() -> impl Iterator<Item = (IdCode, DeviceInfo)> {
    xilinx()
}

fn xilinx() -> impl Iterator<Item = (IdCode, DeviceInfo)> {
    use Bits as B;

    const fn id(code: u32) -> IdCode {
        IdCode::new(code)
    }

    #[rustfmt::skip]
    static DEVICES: &[(IdCode, DeviceInfo)] = &[
        // Spartan-7
        (id(0x03622093), DeviceInfo { irlen: B( 6), name: "XC7S6"     }),
        (id(0x03620093), DeviceInfo { irlen: B( 6), name: "XC7S15"    }),
        (id(0x037C4093), DeviceInfo { irlen: B( 6), name: "XC7S25"    }),
        (id(0x0362F093), DeviceInfo { irlen: B( 6), name: "XC7S50"    }),
        // Artix-7
        (id(0x0362E093), DeviceInfo { irlen: B( 6), name: "XC7A15T"   }),
        (id(0x0362D093), DeviceInfo { irlen: B( 6), name: "XC7A35T"   }),
        (id(0x0362C093), DeviceInfo { irlen: B( 6), name: "XC7A50T"   }),
        (id(0x03631093), DeviceInfo { irlen: B( 6), name: "XC7A100T"  }),
        (id(0x03636093), DeviceInfo { irlen: B( 6), name: "XC7A200T"  }),
        // Spartan-6
        (id(0x04001093), DeviceInfo { irlen: B( 6), name: "XC6SLX9"   }),
        (id(0x04002093), DeviceInfo { irlen: B( 6), name: "XC6SLX16"  }),
        (id(0x04004093), DeviceInfo { irlen: B( 6), name: "XC6SLX25"  }),
        (id(0x04008093), DeviceInfo { irlen: B( 6), name: "XC6SLX45"  }),
        // Spartan-3
        (id(0x0140D093), DeviceInfo { irlen: B( 6), name: "XC3S50"    }),
        (id(0x01414093), DeviceInfo { irlen: B( 6), name: "XC3S200"   }),
        (id(0x0141C093), DeviceInfo { irlen: B( 6), name: "XC3S400"   }),
        (id(0x01428093), DeviceInfo { irlen: B( 6), name: "XC3S1000"  }),
        (id(0x01434093), DeviceInfo { irlen: B( 6), name: "XC3S1500"  }),
        (id(0x01440093), DeviceInfo { irlen: B( 6), name: "XC3S2000"  }),
        (id(0x01C10093), DeviceInfo { irlen: B( 6), name: "XC3S100E"  }),
        (id(0x01C1A093), DeviceInfo { irlen: B( 6), name: "XC3S250E"  }),
        (id(0x01C22093), DeviceInfo { irlen: B( 6), name: "XC3S500E"  }),
        (id(0x02210093), DeviceInfo { irlen: B( 6), name: "XC3S50A"   }),
        (id(0x02218093), DeviceInfo { irlen: B( 6), name: "XC3S200A"  }),
        (id(0x02220093), DeviceInfo { irlen: B( 6), name: "XC3S400A"  }),
        // Platform flash
        (id(0x05044093), DeviceInfo { irlen: B( 8), name: "XCF01S"    }),
        (id(0x05045093), DeviceInfo { irlen: B( 8), name: "XCF02S"    }),
        (id(0x05046093), DeviceInfo { irlen: B( 8), name: "XCF04S"    }),
        (id(0x05057093), DeviceInfo { irlen: B(16), name: "XCF08P"    }),
        (id(0x05058093), DeviceInfo { irlen: B(16), name: "XCF16P"    }),
        (id(0x05059093), DeviceInfo { irlen: B(16), name: "XCF32P"    }),
        // XC18
        (id(0x05024093), DeviceInfo { irlen: B( 8), name: "XC18V01"   }),
        (id(0x05025093), DeviceInfo { irlen: B( 8), name: "XC18V02"   }),
        (id(0x05026093), DeviceInfo { irlen: B( 8), name: "XC18V04"   }),
        // XC95XL
        (id(0x09602093), DeviceInfo { irlen: B( 8), name: "XC9536XL"  }),
        (id(0x09604093), DeviceInfo { irlen: B( 8), name: "XC9572XL"  }),
        (id(0x09608093), DeviceInfo { irlen: B( 8), name: "XC95144XL" }),
        (id(0x09616093), DeviceInfo { irlen: B( 8), name: "XC95288XL" }),
        // XC2C
        (id(0x06E1C093), DeviceInfo { irlen: B( 8), name: "XC2C32A"   }),
        (id(0x06E5E093), DeviceInfo { irlen: B( 8), name: "XC2C64A"   }),
        (id(0x06D8A093), DeviceInfo { irlen: B( 8), name: "XC2C128"   }),
        (id(0x06D4A093), DeviceInfo { irlen: B( 8), name: "XC2C256"   }),
    ];

    DEVICES.iter().cloned()
}
