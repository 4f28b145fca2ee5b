//! Baud-rate capability probing.
//!
//! Before a working session is opened, the OS serial driver can be asked
//! which baud rates the port hardware supports. The answer is a bit mask
//! (`dwSettableBaud` on Windows); the bit assignments below follow the Win32
//! `SETTABLE_BAUD` constants. The probe is strictly diagnostic: when it
//! cannot run (wrong platform, busy port, missing privilege) callers fall
//! back to the instrument's factory rate and carry on.

use crate::sys;

/// Factory baud rate of PM-series instruments. Used whenever the capability
/// probe yields nothing.
pub const FACTORY_BAUD: u32 = 115_200;

/// Known capability bits in driver order. Note the non-monotonic tail: the
/// Win32 constants assign 115200 a lower bit than 57600.
pub const BAUD_BITS: [(&str, u32); 19] = [
    ("75 bps", 0x0000_0001),
    ("110 bps", 0x0000_0002),
    ("134.5 bps", 0x0000_0004),
    ("150 bps", 0x0000_0008),
    ("300 bps", 0x0000_0010),
    ("600 bps", 0x0000_0020),
    ("1200 bps", 0x0000_0040),
    ("1800 bps", 0x0000_0080),
    ("2400 bps", 0x0000_0100),
    ("4800 bps", 0x0000_0200),
    ("7200 bps", 0x0000_0400),
    ("9600 bps", 0x0000_0800),
    ("14400 bps", 0x0000_1000),
    ("19200 bps", 0x0000_2000),
    ("38400 bps", 0x0000_4000),
    ("56K bps", 0x0000_8000),
    ("57600 bps", 0x0004_0000),
    ("115200 bps", 0x0002_0000),
    ("128K bps", 0x0001_0000),
];

/// The settable-baud mask reported by the OS driver for one port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaudCapabilityMask(u32);

impl BaudCapabilityMask {
    pub fn new(mask: u32) -> Self {
        Self(mask)
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    /// All known rates in table order, each flagged as settable or not.
    pub fn rates(self) -> impl Iterator<Item = (&'static str, bool)> {
        BAUD_BITS
            .iter()
            .map(move |&(label, bit)| (label, self.0 & bit != 0))
    }

    /// Labels of the rates whose bits are set.
    pub fn supported(self) -> Vec<&'static str> {
        self.rates()
            .filter_map(|(label, set)| set.then_some(label))
            .collect()
    }
}

/// Query the settable baud rates for a port.
///
/// The port is opened transiently and the handle is released again on every
/// path before this returns. Failure is non-fatal by contract: the result is
/// simply `None` and a warning is logged, since the rest of the system
/// treats "capability unknown" as a valid outcome.
pub fn probe_port(port: &str) -> Option<BaudCapabilityMask> {
    match sys::settable_baud_mask(port) {
        Ok(Some(mask)) => {
            let mask = BaudCapabilityMask::new(mask);
            log::debug!(
                "Port {} settable baud mask {:#010x}: {:?}",
                port,
                mask.raw(),
                mask.supported()
            );
            Some(mask)
        }
        Ok(None) => {
            log::debug!("No settable-baud query on this platform; capability unknown");
            None
        }
        Err(e) => {
            log::warn!("Capability query for {} failed ({}); proceeding with defaults", port, e);
            None
        }
    }
}
