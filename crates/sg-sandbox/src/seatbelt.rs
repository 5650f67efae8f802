//! macOS Seatbelt (sandbox_init) implementation.
//!
//! Generates an SBPL (Sandbox Profile Language) profile and applies it via the
//! `sandbox_init()` FFI call. Reads are allowed broadly, writes only beneath
//! policy paths, and denied paths lose both. In SBPL a more specific deny
//! beats a broader allow.

use std::ffi::{CStr, CString};
use std::path::Path;
use std::ptr;

use crate::policy::SandboxPolicy;
use crate::SandboxError;

extern "C" {
    fn sandbox_init(
        profile: *const libc::c_char,
        flags: u64,
        errorbuf: *mut *mut libc::c_char,
    ) -> libc::c_int;

    fn sandbox_free_error(errorbuf: *mut libc::c_char);
}

/// `kSBXProfileString`: interpret the profile parameter as a string.
const SBPL_PROFILE_STRING: u64 = 0;

/// Always writable: terminal devices and per-process temp dirs used by dyld.
const ALWAYS_WRITABLE: &[&str] = &["/dev", "/private/var/folders"];

/// Apply the Seatbelt sandbox to the current process. Irreversible.
pub fn apply_seatbelt(policy: &SandboxPolicy) -> Result<(), SandboxError> {
    let profile = generate_sbpl(policy);
    let c_profile = CString::new(profile)
        .map_err(|e| SandboxError::Platform(format!("SBPL contains null byte: {e}")))?;

    let mut errorbuf: *mut libc::c_char = ptr::null_mut();
    // SAFETY: c_profile is a valid NUL-terminated string that outlives the call,
    // and errorbuf is a valid out-pointer.
    let ret = unsafe { sandbox_init(c_profile.as_ptr(), SBPL_PROFILE_STRING, &mut errorbuf) };
    if ret == 0 {
        return Ok(());
    }

    let msg = if errorbuf.is_null() {
        "unknown sandbox_init error".to_string()
    } else {
        // SAFETY: sandbox_init set errorbuf to a C string we must free.
        let msg = unsafe { CStr::from_ptr(errorbuf) }
            .to_string_lossy()
            .into_owned();
        unsafe { sandbox_free_error(errorbuf) };
        msg
    };
    Err(SandboxError::Platform(format!("sandbox_init failed: {msg}")))
}

fn subpath(action: &str, op: &str, path: &Path) -> String {
    let escaped = path.display().to_string().replace('\\', "\\\\").replace('"', "\\\"");
    format!("({action} {op} (subpath \"{escaped}\"))")
}

/// Generate an SBPL profile from a [`SandboxPolicy`].
pub fn generate_sbpl(policy: &SandboxPolicy) -> String {
    let mut lines: Vec<String> = [
        "(version 1)",
        "(deny default)",
        "(allow process*)",
        "(allow mach*)",
        "(allow ipc*)",
        "(allow signal)",
        "(allow sysctl*)",
        "(allow network*)",
        "(allow pseudo-tty)",
        "(allow file*)",
        "(deny file-write*)",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    for path in ALWAYS_WRITABLE {
        lines.push(subpath("allow", "file-write*", Path::new(path)));
    }
    for path in &policy.writable {
        lines.push(subpath("allow", "file-write*", path));
    }
    for path in &policy.denied {
        lines.push(subpath("deny", "file-read*", path));
        lines.push(subpath("deny", "file-write*", path));
    }

    let mut profile = lines.join("\n");
    profile.push('\n');
    profile
}
