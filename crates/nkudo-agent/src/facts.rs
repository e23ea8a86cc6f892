//! Host fact collection and fingerprinting (§4.2, §4.4, §10's `hostfacts`
//! CLI verb).
//!
//! The host-facts collector and hypervisor are named as out-of-scope
//! external collaborators (§1) — this module stops at "read what the
//! kernel already exposes", not "drive a hypervisor".

use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::wire::HostFactsWire;

/// Read-only snapshot of this host's capacity, reported on every
/// heartbeat.
#[must_use]
pub fn collect() -> HostFactsWire {
    HostFactsWire {
        cpu_cores_total: cpu_cores(),
        memory_bytes_total: memory_bytes_total(),
        storage_bytes_total: storage_bytes_total("/"),
        kvm_available: Path::new("/dev/kvm").exists(),
        hypervisor_available: hypervisor_available(),
    }
}

fn cpu_cores() -> i32 {
    std::thread::available_parallelism()
        .map(|n| i32::try_from(n.get()).unwrap_or(i32::MAX))
        .unwrap_or(1)
}

#[cfg(unix)]
fn memory_bytes_total() -> i64 {
    // SAFETY: `sysinfo` fills a caller-owned, zero-initialized struct and
    // returns a status code; no pointers escape this function.
    #[allow(unsafe_code)]
    unsafe {
        let mut info: libc::sysinfo = std::mem::zeroed();
        if libc::sysinfo(&mut info) == 0 {
            i64::try_from(u64::from(info.mem_unit) * info.totalram).unwrap_or(i64::MAX)
        } else {
            0
        }
    }
}

#[cfg(not(unix))]
fn memory_bytes_total() -> i64 {
    0
}

#[cfg(unix)]
fn storage_bytes_total(path: &str) -> i64 {
    use std::ffi::CString;

    let Ok(c_path) = CString::new(path) else {
        return 0;
    };
    // SAFETY: `statvfs` fills a caller-owned, zero-initialized struct from
    // a NUL-terminated path we just constructed; no pointers escape.
    #[allow(unsafe_code)]
    unsafe {
        let mut stat: libc::statvfs = std::mem::zeroed();
        if libc::statvfs(c_path.as_ptr(), &mut stat) == 0 {
            i64::try_from(stat.f_blocks as u64 * stat.f_frsize as u64).unwrap_or(i64::MAX)
        } else {
            0
        }
    }
}

#[cfg(not(unix))]
fn storage_bytes_total(_path: &str) -> i64 {
    0
}

fn hypervisor_available() -> bool {
    ["/usr/bin/firecracker", "/usr/local/bin/firecracker", "/usr/bin/cloud-hypervisor"]
        .iter()
        .any(|p| Path::new(p).exists())
}

/// Local system hostname, used both as a report field and as the CSR
/// subject common name (§4.2).
pub fn hostname() -> Result<String> {
    #[cfg(unix)]
    {
        // SAFETY: `gethostname` writes at most `buf.len()` bytes, including
        // the NUL terminator, into a buffer we own.
        #[allow(unsafe_code)]
        unsafe {
            let mut buf = vec![0u8; 256];
            if libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) != 0 {
                return Err(crate::error::AgentError::Runtime(
                    "gethostname failed".to_owned(),
                ));
            }
            let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
            buf.truncate(end);
            Ok(String::from_utf8_lossy(&buf).into_owned())
        }
    }
    #[cfg(not(unix))]
    {
        std::env::var("COMPUTERNAME")
            .map_err(|_| crate::error::AgentError::Runtime("could not determine hostname".to_owned()))
    }
}

/// Stable per-host fingerprint: `sha256(machine-id || primary MAC)` (§4.2).
/// Best-effort — both inputs fall back to an empty string if unreadable so
/// that enrollment on an unusual host still produces *a* fingerprint rather
/// than failing outright.
#[must_use]
pub fn fingerprint() -> String {
    let machine_id = std::fs::read_to_string("/etc/machine-id")
        .or_else(|_| std::fs::read_to_string("/var/lib/dbus/machine-id"))
        .unwrap_or_default();
    let mac = primary_mac_address().unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(machine_id.trim().as_bytes());
    hasher.update(mac.trim().as_bytes());
    hex::encode(hasher.finalize())
}

/// First non-loopback interface's MAC address under `/sys/class/net`.
fn primary_mac_address() -> Option<String> {
    let entries = std::fs::read_dir("/sys/class/net").ok()?;
    let mut names: Vec<_> = entries
        .filter_map(std::result::Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n != "lo")
        .collect();
    names.sort();

    for name in names {
        if let Ok(addr) = std::fs::read_to_string(format!("/sys/class/net/{name}/address")) {
            let addr = addr.trim().to_owned();
            if !addr.is_empty() && addr != "00:00:00:00:00:00" {
                return Some(addr);
            }
        }
    }
    None
}
