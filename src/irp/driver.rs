//! Driver objects and load descriptors (spec §4.5).

use std::collections::HashMap;

use crate::object::ObjectId;
use crate::process::{Pid, Ring};
use crate::script::TaskBody;

use super::MajorFunction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    /// Kernel-mode driver: spawned at ring 2.
    Kmd,
    /// Component driver: one instance per matching hardware component,
    /// spawned at ring 2.
    Cmd,
    /// User-mode driver: spawned at ring 3.
    Umd,
}

impl DriverKind {
    pub fn spawn_ring(self) -> Ring {
        match self {
            DriverKind::Kmd | DriverKind::Cmd => Ring::R2,
            DriverKind::Umd => Ring::R3,
        }
    }
}

/// The driver-info descriptor DKMS reads out of a candidate source
/// before spawning it (spec §4.5).
#[derive(Debug, Clone)]
pub struct DriverInfo {
    pub unique_name: String,
    pub kind: DriverKind,
    pub load_priority: u32,
    pub version: String,
    /// CMDs declare the hardware component type they match; other kinds
    /// leave this unset.
    pub supported_component_type: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DriverObject {
    pub image_path: String,
    pub driver_pid: Pid,
    pub first_device: Option<ObjectId>,
    /// Name of the unload entry point, if the driver declared one;
    /// invoked by DKMS before tearing the driver process down.
    pub unload_fn: Option<String>,
    /// `major_function → handler reference` the scripting VM resolves
    /// when DKMS signals `irp_dispatch` (spec §4.5 dispatch table).
    pub dispatch_table: HashMap<MajorFunction, String>,
    pub info: DriverInfo,
}

impl DriverObject {
    pub fn new(image_path: &str, driver_pid: Pid, info: DriverInfo) -> Self {
        DriverObject {
            image_path: image_path.to_string(),
            driver_pid,
            first_device: None,
            unload_fn: None,
            dispatch_table: HashMap::new(),
            info,
        }
    }

    pub fn handler_for(&self, major: MajorFunction) -> Option<&str> {
        self.dispatch_table.get(&major).map(|s| s.as_str())
    }
}

/// What DKMS needs to run the driver-loading sequence (spec §4.5): the
/// descriptor it would read out of the candidate source, plus the
/// embedder-supplied body to actually spawn (this crate has no script
/// loader of its own — see `script::TaskBody`). For a `Cmd`, `components`
/// lists the distinct hardware components DKMS spawns one instance per;
/// it's empty for `Kmd`/`Umd`, which spawn exactly once.
pub struct DriverLoadDescriptor {
    pub image_path: String,
    pub info: DriverInfo,
    /// Checked only when `BootSecurity::secure_boot_active`; absence or
    /// an empty signature is rejected (spec §4.5: "validates any
    /// signature if secure boot is active"). The kernel only checks
    /// presence, the same policy as `BootSecurity` itself — verifying it
    /// cryptographically is the bootloader's job.
    pub signature: Option<Vec<u8>>,
    pub dispatch_table: HashMap<MajorFunction, String>,
    pub unload_fn: Option<String>,
    pub body: TaskBody,
    pub components: Vec<String>,
}

/// One spawned instance of a loaded driver: its process, its
/// `DRIVER_OBJECT`, and the handle a loader awaits for
/// `driver_init_complete` (spec §4.5).
pub struct LoadedDriver {
    pub driver_pid: Pid,
    pub driver_object: ObjectId,
    pub driver_object_token: String,
    /// The component name this instance was spawned for, for a `Cmd`.
    pub component: Option<String>,
    /// Handle bound to the *caller's* synapse token — wait on this one,
    /// not `driver_init_token`, which belongs to the driver process.
    pub init_complete_token: String,
}
