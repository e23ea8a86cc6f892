//! Agent's local view of its MicroVMs (§6 `state/vms.json`).
//!
//! The hypervisor itself is an out-of-scope external collaborator (§1) —
//! this module only persists and reports the inventory the dispatcher was
//! last told about; it does not query a running hypervisor process.

use std::path::Path;

use crate::error::Result;
use crate::wire::MicroVmWire;

pub fn load(path: &Path) -> Result<Vec<MicroVmWire>> {
    match std::fs::read_to_string(path) {
        Ok(raw) => Ok(serde_json::from_str(&raw)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

pub fn save(path: &Path, vms: &[MicroVmWire]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let raw = serde_json::to_string_pretty(vms)?;
    std::fs::write(path, raw)?;
    Ok(())
}
