//! Platform capability service: one operation, "query the settable baud
//! rates for port X". Only Windows exposes this through the serial driver
//! (`GetCommProperties`); everywhere else the stub reports unknown, which
//! callers already treat as a valid non-fatal outcome.

#[cfg(windows)]
#[path = "windows.rs"]
mod imp;

#[cfg(not(windows))]
#[path = "stub.rs"]
mod imp;

/// `Ok(Some(mask))` when the driver answered, `Ok(None)` when the platform
/// has no such query, `Err` when the query itself failed.
pub fn settable_baud_mask(port: &str) -> std::io::Result<Option<u32>> {
    imp::settable_baud_mask(port)
}
