// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! On-disk instance descriptor format.
//!
//! One `<instanceID>.json` per instance, owner-readable only, written
//! atomically (temp file + rename) so a crashed writer never leaves a
//! partially visible descriptor.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A backend instance as self-reported through the instances directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceDescriptor {
    pub id: String,
    pub name: String,
    pub directory: PathBuf,
    pub port: u16,
    pub started_at: DateTime<Utc>,
    pub last_ping: DateTime<Utc>,
    pub process_info: ProcessInfo,
}

/// Originating process of an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: i32,
    pub executable: String,
}

impl InstanceDescriptor {
    /// The descriptor's file path under `dir`.
    pub fn path_in(&self, dir: &Path) -> PathBuf {
        descriptor_path(dir, &self.id)
    }

    /// Base URL of the instance's MCP endpoint.
    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }
}

/// File path for an instance ID under `dir`.
pub fn descriptor_path(dir: &Path, id: &str) -> PathBuf {
    dir.join(format!("{id}.json"))
}

/// Write a descriptor atomically with 0600 permissions.
///
/// The temp file lives in the same directory so the rename stays on one
/// filesystem.
pub fn write_atomic(dir: &Path, desc: &InstanceDescriptor) -> anyhow::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    std::fs::create_dir_all(dir)?;
    let final_path = desc.path_in(dir);
    let tmp_path = dir.join(format!(".{}.json.tmp", desc.id));

    let json = serde_json::to_vec_pretty(desc)?;
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(&tmp_path)?;
    file.write_all(&json)?;
    file.sync_all()?;
    drop(file);

    std::fs::rename(&tmp_path, &final_path)?;
    Ok(())
}

/// Read and parse one descriptor file.
pub fn read_descriptor(path: &Path) -> anyhow::Result<InstanceDescriptor> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

/// Whether the recorded PID refers to a live process.
pub fn pid_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
}

#[cfg(test)]
#[path = "descriptor_tests.rs"]
mod tests;
