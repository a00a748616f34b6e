//! Host description reported to the backend and the administrative
//! interface.
//!
//! [`SystemInfo::collect`] reads everything from the process environment and
//! compile-time constants, so it never fails and needs no platform API.
//!
//! # Config attributes
//!
//! Every time the backend sends a config request, the agent answers with a
//! flat list of `key = value` attributes.  [`config_attributes`] builds that
//! list: the host description first, then the operator's extra attributes
//! from `[connection.attributes]`, which may override the built-in keys.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Version of this agent build.
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Snapshot of the host the agent runs on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub machine_name: String,
    /// OS family, e.g. `"windows"` or `"linux"`.
    pub platform: String,
    /// CPU architecture, e.g. `"x86_64"`.
    pub architecture: String,
    pub is_64bit: bool,
    pub agent_version: String,
}

impl SystemInfo {
    pub fn collect() -> Self {
        Self {
            machine_name: machine_name(),
            platform: std::env::consts::OS.to_string(),
            architecture: std::env::consts::ARCH.to_string(),
            is_64bit: cfg!(target_pointer_width = "64"),
            agent_version: AGENT_VERSION.to_string(),
        }
    }
}

/// Builds the attribute set answered to every config request.
pub fn config_attributes(
    info: &SystemInfo,
    device_id: &str,
    extra: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut attributes = BTreeMap::from([
        ("machine_name".to_string(), info.machine_name.clone()),
        ("platform".to_string(), info.platform.clone()),
        ("architecture".to_string(), info.architecture.clone()),
        ("agent_version".to_string(), info.agent_version.clone()),
        ("device_id".to_string(), device_id.to_string()),
    ]);
    attributes.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
    attributes
}

/// Tries `COMPUTERNAME` (Windows) first, then `HOSTNAME` (Unix), and falls
/// back to `"up2date-device"`.
fn machine_name() -> String {
    std::env::var("COMPUTERNAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .ok()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| "up2date-device".to_string())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
