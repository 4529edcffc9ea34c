//! Pipeline Manager: the VFS-facing half of the IRP fabric (spec §4.5).

use std::collections::HashMap;

use slab::Slab;

use crate::error::{KernelError, KResult};
use crate::object::ObjectManager;
use crate::process::Pid;

use super::dkms::Dkms;
use super::{Irp, IoParameters, IoStatus, MajorFunction};

pub type PendingIrpId = usize;

/// An IRP in flight, parked waiting for its driver to call
/// `complete_request`. PM wakes `originator` once that happens.
pub struct PendingIrp {
    pub irp: Irp,
    pub originator: Pid,
}

#[derive(Default)]
pub struct PipelineManager {
    in_flight: Slab<PendingIrp>,
    /// Results of IRPs a driver has already completed, waiting for the
    /// originator to collect them through `take_result`. `complete`
    /// wakes the originator but can't hand the result back synchronously
    /// — the originator is a separate parked future — so it's held here
    /// instead of being dropped once `in_flight` forgets the IRP.
    completed: HashMap<PendingIrpId, (IoStatus, Vec<u8>)>,
}

impl PipelineManager {
    pub fn new() -> Self {
        PipelineManager::default()
    }

    /// Validates the caller's handle through the Object Manager isn't
    /// this method's job directly — callers perform that via
    /// `reference_by_handle` before calling here, matching the syscall
    /// layer's existing authentication flow (spec §4.2). This
    /// constructs the IRP, routes it through DKMS, and parks the caller.
    pub fn submit(
        &mut self,
        manager: &ObjectManager,
        dkms: &Dkms,
        major_function: MajorFunction,
        device_path: &str,
        parameters: IoParameters,
        sender_pid: Pid,
    ) -> KResult<(PendingIrpId, Pid, String)> {
        let irp = Irp::new(major_function, device_path, parameters, sender_pid);
        let (driver_pid, handler) = dkms.dispatch_irp(manager, &irp)?;
        let id = self.in_flight.insert(PendingIrp { irp, originator: sender_pid });
        Ok((id, driver_pid, handler))
    }

    /// `complete_request` routed back through DKMS: removes the pending
    /// IRP and hands back the originator and final status so the
    /// scheduler can wake it (spec §4.5: "unconditionally, even on
    /// error").
    pub fn complete(
        &mut self,
        id: PendingIrpId,
        status: IoStatus,
        information: Vec<u8>,
    ) -> KResult<(Pid, IoStatus, Vec<u8>)> {
        let mut pending = self.in_flight.try_remove(id).ok_or(KernelError::NotFound)?;
        pending.irp.complete(status, information.clone());
        self.completed.insert(id, (status, information.clone()));
        Ok((pending.originator, status, information))
    }

    /// Collects a completed IRP's result, for the parked `vfs_*` future
    /// that submitted it. Returns `None` while the IRP is still pending
    /// *or already collected* — callers poll this after being woken by
    /// `dk_complete_request`'s `mark_ready`, which only fires once.
    pub fn take_result(&mut self, id: PendingIrpId) -> Option<(IoStatus, Vec<u8>)> {
        self.completed.remove(&id)
    }

    pub fn pending_count(&self) -> usize {
        self.in_flight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::irp::device::DeviceObject;
    use crate::irp::driver::{DriverInfo, DriverKind, DriverObject};
    use crate::object::security::SecurityDescriptor;
    use crate::object::ObjectBody;

    fn security() -> SecurityDescriptor {
        SecurityDescriptor::new(0, 0, 0o755)
    }

    #[test]
    fn submit_then_complete_wakes_originator_with_status() {
        let mut manager = ObjectManager::new();
        let mut dkms = Dkms::new();
        let mut pm = PipelineManager::new();

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

        let params = IoParameters { data: Vec::new(), method: 0, args: vec![16] };
        let (id, driver_pid, handler) = pm
            .submit(&manager, &dkms, MajorFunction::Read, "/dev/tty", params, 101)
            .unwrap();
        assert_eq!(driver_pid, 42);
        assert_eq!(handler, "tty_read");
        assert_eq!(pm.pending_count(), 1);

        let (originator, status, information) =
            pm.complete(id, IoStatus::Success, b"hello\n".to_vec()).unwrap();
        assert_eq!(originator, 101);
        assert_eq!(status, IoStatus::Success);
        assert_eq!(information, b"hello\n");
        assert_eq!(pm.pending_count(), 0);
    }

    #[test]
    fn submit_without_driver_returns_no_driver() {
        let manager = ObjectManager::new();
        let dkms = Dkms::new();
        let mut pm = PipelineManager::new();
        let params = IoParameters { data: Vec::new(), method: 0, args: Vec::new() };
        let result = pm.submit(&manager, &dkms, MajorFunction::Read, "/dev/nothing", params, 1);
        assert!(matches!(result, Err(KernelError::NoDriver)));
    }
}
