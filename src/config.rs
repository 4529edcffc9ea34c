//! Boot handoff contract and persisted-state loading (spec §6).

use std::collections::HashMap;

use crate::klog::LogMode;

/// The parsed boot-arguments map the EEPROM layer hands the kernel.
#[derive(Debug, Clone)]
pub struct BootArgs {
    pub log_level: LogMode,
    pub safe_mode: bool,
    pub init_path: String,
    pub quick_boot: bool,
}

impl Default for BootArgs {
    fn default() -> Self {
        BootArgs {
            log_level: LogMode::Info,
            safe_mode: false,
            init_path: "/sbin/init".to_string(),
            quick_boot: false,
        }
    }
}

/// Optional secure-boot measurement block. The kernel only ever checks
/// for its *presence*; verifying it is the bootloader's job (spec §1).
#[derive(Debug, Clone)]
pub struct BootSecurity {
    pub secure_boot_active: bool,
    pub measurement: Vec<u8>,
}

/// The full boot handoff: primary filesystem address plus the parsed
/// arguments and an optional security block. The kernel treats the
/// absence of either defensively (spec §6).
#[derive(Debug, Clone, Default)]
pub struct BootHandoff {
    pub primary_fs_address: Option<String>,
    pub args: BootArgs,
    pub security: Option<BootSecurity>,
}

/// Abstracts `/etc/fstab`, `/etc/passwd`, `/etc/perms`, `/etc/autoload`:
/// spec §6 only requires "a loader that returns a map", the concrete
/// encoding being provider-defined.
pub trait PersistedStateLoader {
    fn load_table(&self, path: &str) -> Option<HashMap<String, String>>;
}

/// An optional `ring` requirement alongside a path permission entry from
/// `/etc/perms`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathPermission {
    pub mode: u32,
    pub required_ring: Option<crate::process::Ring>,
}

/// In-memory `PersistedStateLoader` for tests and embedders without a
/// real filesystem behind `/etc`.
#[derive(Debug, Clone, Default)]
pub struct MapStateLoader {
    tables: HashMap<String, HashMap<String, String>>,
}

impl MapStateLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, path: &str, table: HashMap<String, String>) -> Self {
        self.tables.insert(path.to_string(), table);
        self
    }
}

impl PersistedStateLoader for MapStateLoader {
    fn load_table(&self, path: &str) -> Option<HashMap<String, String>> {
        self.tables.get(path).cloned()
    }
}
