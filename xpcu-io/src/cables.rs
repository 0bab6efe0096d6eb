use std::{ops::RangeInclusive, time::Duration};

use nusb::MaybeFuture;

use crate::{
    Backend, Result,
    error::Error,
    sim::{FakeCable, SimDevice, Target},
    xpc::{self, GpioRouting},
};

type BoxedBackend = Box<dyn Backend>;
type InitFn = fn(&'static Cable, &OpenOptions) -> Result<BoxedBackend>;

pub struct Cable {
    pub name: &'static str,
    pub vid: u16,
    pub pid: u16,
    /// USB product string to match, for cables sharing a VID:PID.
    pub description: Option<&'static str>,
    pub init: InitFn,
}

impl Cable {
    pub fn open(&'static self, opts: &OpenOptions) -> Result<BoxedBackend> {
        (self.init)(self, opts)
    }
}

impl std::fmt::Debug for Cable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cable")
            .field("name", &self.name)
            .field("vid", &self.vid)
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

/// Everything needed to open a cable besides the cable itself.
#[derive(Clone, Debug)]
pub struct OpenOptions {
    /// USB serial string, or the cable's hardware ID in hex.
    pub serial: Option<String>,
    /// Overrides the cable's VID:PID.
    pub usb: Option<(u16, u16)>,
    /// Requested TCK frequency in Hz. Advisory; cables with a fixed rate
    /// ignore it.
    pub frequency: Option<u32>,
    /// Per USB transfer.
    pub timeout: Duration,
    pub firmware: RangeInclusive<u16>,
    pub cpld: RangeInclusive<u16>,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            serial: None,
            usb: None,
            frequency: None,
            timeout: Duration::from_secs(1),
            firmware: 0x0001..=0xfffe,
            cpld: 0x0001..=0xfffe,
        }
    }
}

impl OpenOptions {
    pub fn address(&self, cable: &Cable) -> (u16, u16) {
        self.usb.unwrap_or((cable.vid, cable.pid))
    }
}

pub fn find(name: &str) -> Option<&'static Cable> {
    KNOWN.iter().find(|cable| cable.name == name)
}

/// A known cable currently on the bus.
#[derive(Debug)]
pub struct Attached {
    pub cable: &'static Cable,
    pub serial: Option<String>,
    pub product: Option<String>,
}

pub fn attached() -> Result<Vec<Attached>> {
    let devices = nusb::list_devices()
        .wait()
        .map_err(|e| Error::transport("list devices")(e.into()))?;

    let mut ret = Vec::new();
    for device in devices {
        let matching = KNOWN.iter().filter(|cable| {
            cable.vid == device.vendor_id()
                && cable.pid == device.product_id()
                && cable
                    .description
                    .is_none_or(|desc| device.product_string() == Some(desc))
        });
        for cable in matching {
            ret.push(Attached {
                cable,
                serial: device.serial_number().map(str::to_owned),
                product: device.product_string().map(str::to_owned),
            });
        }
    }
    Ok(ret)
}

const fn c(vid: u16, pid: u16, name: &'static str, init: InitFn) -> Cable {
    Cable {
        name,
        vid,
        pid,
        description: None,
        init,
    }
}

fn init_xpc(cable: &'static Cable, opts: &OpenOptions, routing: GpioRouting) -> Result<BoxedBackend> {
    Ok(Box::new(xpc::Session::open(cable, opts, routing)?))
}

/// An XPC with a Spartan-3 and its platform flash on the header, for trying
/// things out without hardware.
fn init_sim(cable: &'static Cable, opts: &OpenOptions) -> Result<BoxedBackend> {
    let chain = vec![
        SimDevice::new(0x01414093, 6, 0x09),
        SimDevice::new(0x05045093, 8, 0xfe),
    ];
    let link = FakeCable::new(Target::Chain(chain));
    Ok(Box::new(xpc::Session::with_link(
        link,
        cable,
        opts,
        GpioRouting::External,
    )?))
}

pub const KNOWN: &[Cable] = &[
    c(xpc::XPC_VID, xpc::XPC_PID, "xpc", |cable, opts| {
        init_xpc(cable, opts, GpioRouting::External)
    }),
    c(xpc::XPC_VID, xpc::XPC_PID, "xpc_internal", |cable, opts| {
        init_xpc(cable, opts, GpioRouting::Internal)
    }),
    // never on the bus: `attached` skips it
    Cable {
        name: "sim",
        vid: xpc::XPC_VID,
        pid: xpc::XPC_PID,
        description: Some("simulated"),
        init: init_sim,
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_unique() {
        for (i, a) in KNOWN.iter().enumerate() {
            for b in &KNOWN[i + 1..] {
                assert_ne!(a.name, b.name);
            }
        }
    }

    #[test]
    fn lookup() {
        let xpc = find("xpc").unwrap();
        assert_eq!((xpc.vid, xpc.pid), (0x03fd, 0x0008));
        assert!(find("usb-blaster").is_none());

        let opts = OpenOptions {
            usb: Some((0x1234, 0x5678)),
            ..Default::default()
        };
        assert_eq!(opts.address(xpc), (0x1234, 0x5678));
        assert_eq!(OpenOptions::default().address(xpc), (0x03fd, 0x0008));
    }

    #[test]
    fn sim_cable_opens_and_identifies() {
        let mut backend = find("sim").unwrap().open(&OpenOptions::default()).unwrap();
        let identity = backend.identity().unwrap().clone();
        assert_eq!(identity.subtype, "sim");
        assert_eq!(identity.vid, 0x03fd);
        backend.close().unwrap();
        backend.close().unwrap();
    }
}
