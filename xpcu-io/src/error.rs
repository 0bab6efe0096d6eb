pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No attached cable matched the requested address and serial.
    #[error("no cable matching {wanted}")]
    DeviceNotFound { wanted: String },

    /// The cable reported a firmware or CPLD version outside the supported
    /// range.
    #[error(
        "incompatible {part} version {version:04X} (supported {min:04X}..={max:04X}), try resetting the cable"
    )]
    IncompatibleFirmware {
        part: Part,
        version: u16,
        min: u16,
        max: u16,
    },

    #[error("transport error during {op}")]
    Transport {
        op: &'static str,
        #[source]
        fault: Fault,
    },

    /// The caller asked for something the cable cannot express.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
}

/// What went wrong underneath an [`Error::Transport`].
#[derive(Debug, thiserror::Error)]
pub enum Fault {
    #[error("USB error: {0}")]
    Usb(#[from] nusb::Error),

    #[error("USB transfer error: {0}")]
    Transfer(#[from] nusb::transfer::TransferError),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("short transfer: {actual} of {expected} bytes")]
    Short { expected: usize, actual: usize },

    #[error("request {0:#06x} rejected by cable")]
    Rejected(u16),

    #[error("interface already released")]
    Released,

    #[error("session unusable after an earlier transport failure, reopen the cable")]
    Poisoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Part {
    Firmware,
    Cpld,
}

impl Error {
    pub(crate) fn transport(op: &'static str) -> impl FnOnce(Fault) -> Self {
        move |fault| Self::Transport { op, fault }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}
