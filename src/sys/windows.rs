use std::ffi::OsStr;
use std::os::windows::ffi::OsStrExt;

use windows_sys::Win32::Devices::Communication::{GetCommProperties, COMMPROP};
use windows_sys::Win32::Foundation::{CloseHandle, HANDLE, INVALID_HANDLE_VALUE};
use windows_sys::Win32::Storage::FileSystem::{CreateFileW, FILE_ATTRIBUTE_NORMAL, OPEN_EXISTING};

/// Owning wrapper so the port handle is closed on every exit path.
struct OwnedHandle(HANDLE);

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        // SAFETY: the handle came from a successful CreateFileW and is
        // closed exactly once, here.
        unsafe {
            CloseHandle(self.0);
        }
    }
}

pub fn settable_baud_mask(port: &str) -> std::io::Result<Option<u32>> {
    // Zero desired access: the handle is only good for metadata queries,
    // which is all GetCommProperties needs. The port stays usable by others.
    let path: Vec<u16> = OsStr::new(&format!(r"\\.\{}", port))
        .encode_wide()
        .chain(std::iter::once(0))
        .collect();

    // SAFETY: `path` is a valid NUL-terminated wide string that outlives
    // the call; all pointer arguments are either null or valid.
    let raw = unsafe {
        CreateFileW(
            path.as_ptr(),
            0,
            0,
            std::ptr::null(),
            OPEN_EXISTING,
            FILE_ATTRIBUTE_NORMAL,
            std::ptr::null_mut(),
        )
    };
    if raw == INVALID_HANDLE_VALUE {
        return Err(std::io::Error::last_os_error());
    }
    let handle = OwnedHandle(raw);

    // SAFETY: `handle` is live and `props` is a zeroed out-parameter of the
    // exact type the API fills in.
    let mut props: COMMPROP = unsafe { std::mem::zeroed() };
    let ok = unsafe { GetCommProperties(handle.0, &mut props) };
    if ok == 0 {
        return Err(std::io::Error::last_os_error());
    }

    Ok(Some(props.dwSettableBaud))
}
