//! Driver Kernel Module Service: device tree, symlink table, dispatch
//! (spec §4.5).

use std::collections::HashMap;

use crate::error::{KernelError, KResult};
use crate::object::{ObjectBody, ObjectManager};
use crate::process::Pid;

use super::{Irp, MajorFunction};

/// `device_name → device_object` plus the `\DosDevices` symbolic-link
/// table PM consults to map `/dev/*` paths onto kernel device names.
#[derive(Default)]
pub struct Dkms {
    device_tree: HashMap<String, crate::object::ObjectId>,
    symlink_table: HashMap<String, String>,
}

impl Dkms {
    pub fn new() -> Self {
        Dkms::default()
    }

    pub fn create_device(&mut self, name: &str, device: crate::object::ObjectId) {
        self.device_tree.insert(name.to_string(), device);
    }

    pub fn delete_device(&mut self, name: &str) -> Option<crate::object::ObjectId> {
        self.device_tree.remove(name)
    }

    pub fn create_symbolic_link(&mut self, from: &str, to_device_name: &str) {
        self.symlink_table.insert(from.to_string(), to_device_name.to_string());
    }

    /// Resolves a `/dev/*`-style path through `\DosDevices` to a kernel
    /// device name, if a link exists; otherwise treats `path` as already
    /// a device name.
    pub fn resolve_device_name<'a>(&'a self, path: &'a str) -> &'a str {
        self.symlink_table.get(path).map(|s| s.as_str()).unwrap_or(path)
    }

    /// `dispatch_irp`: resolves the device, finds the driver's dispatch
    /// entry for the IRP's major function, and returns the pair DKMS
    /// hands to `signal_send(driver_pid, "irp_dispatch", irp, handler)`.
    /// Returns `no_driver` if the device is unknown or the driver has no
    /// handler registered for this major function.
    pub fn dispatch_irp(&self, manager: &ObjectManager, irp: &Irp) -> KResult<(Pid, String)> {
        let device_name = self.resolve_device_name(&irp.device_name);
        let device_id = self.device_tree.get(device_name).ok_or(KernelError::NoDriver)?;

        let device_header = manager.header(*device_id).ok_or(KernelError::NoDriver)?;
        let device = match &device_header.body {
            ObjectBody::Device(d) => d,
            _ => return Err(KernelError::NoDriver),
        };

        let driver_header = manager.header(device.driver_back_ptr).ok_or(KernelError::NoDriver)?;
        let driver = match &driver_header.body {
            ObjectBody::Driver(d) => d,
            _ => return Err(KernelError::NoDriver),
        };

        let handler = driver
            .handler_for(irp.major_function)
            .ok_or(KernelError::NoDriver)?
            .to_string();
        Ok((driver.driver_pid, handler))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::irp::device::DeviceObject;
    use crate::irp::driver::{DriverInfo, DriverKind, DriverObject};
    use crate::irp::IoParameters;
    use crate::object::security::SecurityDescriptor;

    fn security() -> SecurityDescriptor {
        SecurityDescriptor::new(0, 0, 0o755)
    }

    #[test]
    fn dispatch_finds_registered_handler() {
        let mut manager = ObjectManager::new();
        let mut dkms = Dkms::new();

        let info = DriverInfo {
            unique_name: "tty".to_string(),
            kind: DriverKind::Kmd,
            load_priority: 0,
            version: "1.0".to_string(),
            supported_component_type: None,
        };
        let mut driver = DriverObject::new("/drivers/tty.lua", 42, info);
        driver.dispatch_table.insert(MajorFunction::Read, "tty_read".to_string());
        let driver_id = manager.create_object(ObjectBody::Driver(driver), None, security()).unwrap();

        let device = DeviceObject::new(driver_id, "\\Device\\Tty0");
        let device_id = manager.create_object(ObjectBody::Device(device), None, security()).unwrap();
        dkms.create_device("\\Device\\Tty0", device_id);
        dkms.create_symbolic_link("/dev/tty", "\\Device\\Tty0");

        let irp = Irp::new(
            MajorFunction::Read,
            "/dev/tty",
            IoParameters { data: Vec::new(), method: 0, args: Vec::new() },
            101,
        );
        let (driver_pid, handler) = dkms.dispatch_irp(&manager, &irp).unwrap();
        assert_eq!(driver_pid, 42);
        assert_eq!(handler, "tty_read");
    }

    #[test]
    fn dispatch_to_unknown_device_is_no_driver() {
        let manager = ObjectManager::new();
        let dkms = Dkms::new();
        let irp = Irp::new(
            MajorFunction::Read,
            "/dev/nothing",
            IoParameters { data: Vec::new(), method: 0, args: Vec::new() },
            1,
        );
        assert!(matches!(dkms.dispatch_irp(&manager, &irp), Err(KernelError::NoDriver)));
    }
}
