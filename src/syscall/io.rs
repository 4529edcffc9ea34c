//! `vfs_*` and `dk_*` syscalls: the IRP routing fabric's syscall surface
//! (spec §4.5, §6). A `vfs_*` call submits an IRP through DKMS to the
//! owning driver and parks the caller; the driver answers with
//! `dk_complete_request`, which wakes the originator.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use crate::error::{KernelError, KResult};
use crate::ipc::event::{Event, EventKind};
use crate::irp::device::DeviceObject;
use crate::irp::driver::{DriverKind, DriverLoadDescriptor, DriverObject, LoadedDriver};
use crate::irp::pipeline_manager::PendingIrpId;
use crate::irp::{IoParameters, IoStatus, MajorFunction};
use crate::object::security::{Access, SecurityDescriptor};
use crate::object::{ObjectBody, ObjectId};
use crate::process::context::ProcessContext;
use crate::process::{Pid, Ring};
use crate::script::TaskBody;
use crate::{Kernel, KernelHandle};

fn submit_irp(
    state: &KernelHandle,
    caller: Pid,
    major_function: MajorFunction,
    device_path: &str,
    parameters: IoParameters,
) -> KResult<(PendingIrpId, Pid, String)> {
    super::enter(state, caller, Ring::R3)?;
    let mut state = state.borrow_mut();
    let state = &mut *state;
    state.pipeline.submit(&state.objects, &state.dkms, major_function, device_path, parameters, caller)
}

fn dk_create_device(state: &KernelHandle, caller: Pid, name: &str, device: ObjectId) -> KResult<()> {
    super::enter(state, caller, Ring::R2)?;
    state.borrow_mut().dkms.create_device(name, device);
    Ok(())
}

fn dk_delete_device(state: &KernelHandle, caller: Pid, name: &str) -> KResult<()> {
    super::enter(state, caller, Ring::R2)?;
    state.borrow_mut().dkms.delete_device(name).map(|_| ()).ok_or(KernelError::NotFound)
}

fn dk_create_symbolic_link(state: &KernelHandle, caller: Pid, from: &str, to_device_name: &str) -> KResult<()> {
    super::enter(state, caller, Ring::R2)?;
    state.borrow_mut().dkms.create_symbolic_link(from, to_device_name);
    Ok(())
}

fn dk_complete_request(
    state: &KernelHandle,
    ready: &crate::scheduler::ReadyQueue,
    caller: Pid,
    pending: PendingIrpId,
    status: IoStatus,
    information: Vec<u8>,
) -> KResult<()> {
    super::enter(state, caller, Ring::R2)?;
    let (originator, _status, _information) = state.borrow_mut().pipeline.complete(pending, status, information)?;
    crate::scheduler::wake(state, ready, originator);
    Ok(())
}

fn dk_register_interrupt(state: &KernelHandle, caller: Pid, device: ObjectId, handler_name: &str) -> KResult<()> {
    super::enter(state, caller, Ring::R2)?;
    let mut state = state.borrow_mut();
    let header = state.objects.header_mut(device).ok_or(KernelError::NotFound)?;
    match &mut header.body {
        crate::object::ObjectBody::Device(d) => {
            d.device_extension = handler_name.as_bytes().to_vec();
            Ok(())
        }
        _ => Err(KernelError::WrongType),
    }
}

impl Kernel {
    /// Driver loading (spec §4.5): validates the descriptor's signature
    /// if secure boot is active, spawns the driver process — or one per
    /// hardware component for a `Cmd` — at its kind's ring, registers
    /// its `DRIVER_OBJECT`, and hands it `DRIVER_OBJECT_TOKEN`/
    /// `DRIVER_INIT_COMPLETE_TOKEN` through its environment, the same
    /// channel ordinary `spawn` args already use rather than a second
    /// configuration path just for drivers. This only needs `&mut Kernel`
    /// (not the `&KernelHandle` free-function pattern the rest of this
    /// module uses) because spawning needs the scheduler, which —
    /// like every other spawn entry point — only `Kernel` can reach.
    ///
    /// Returns immediately without waiting for `driver_init_complete`:
    /// `Kernel` has no executor of its own to block on, the same reason
    /// `vfs_*`'s `Kernel` methods return a pending id rather than a
    /// result. Each `LoadedDriver::init_complete_token` is a handle the
    /// caller polls with `wait_single` across ticks, or — if the caller
    /// is itself a running task — awaits directly, the normal
    /// `ProcessContext` blocking path.
    pub fn load_driver(&mut self, caller: Pid, descriptor: DriverLoadDescriptor) -> KResult<Vec<LoadedDriver>> {
        super::enter(&self.state, caller, Ring::R2)?;

        let secure_boot_active = self.state.borrow().boot.security.as_ref().is_some_and(|s| s.secure_boot_active);
        let signed = descriptor.signature.as_ref().is_some_and(|sig| !sig.is_empty());
        if secure_boot_active && !signed {
            log::warn!("refusing to load unsigned driver '{}': secure boot is active", descriptor.info.unique_name);
            return Err(KernelError::AccessDenied);
        }

        let ring = descriptor.info.kind.spawn_ring();
        let is_cmd = matches!(descriptor.info.kind, DriverKind::Cmd);
        let instances: Vec<Option<String>> = if is_cmd {
            descriptor.components.iter().cloned().map(Some).collect()
        } else {
            vec![None]
        };

        let shared_body: Rc<dyn Fn(ProcessContext) -> crate::scheduler::TaskFuture> = Rc::from(descriptor.body);
        let mut loaded = Vec::with_capacity(instances.len());

        for component in instances {
            let body = Rc::clone(&shared_body);
            let instance_body: TaskBody = Box::new(move |ctx| body(ctx));
            let driver_pid = self.spawn_with_body(ring, HashMap::new(), Some(caller), instance_body)?;

            let driver_object = {
                let mut object = DriverObject::new(&descriptor.image_path, driver_pid, descriptor.info.clone());
                object.dispatch_table = descriptor.dispatch_table.clone();
                object.unload_fn = descriptor.unload_fn.clone();
                object
            };
            let driver_object_id =
                self.ob_create_object(caller, ObjectBody::Driver(driver_object), None, SecurityDescriptor::new(0, 0, 0o600))?;
            let driver_object_token = self.ob_create_handle(driver_pid, driver_object_id, Access::READ | Access::WRITE)?;

            let init_event_id = self.ob_create_object(
                caller,
                ObjectBody::Event(Event::new(EventKind::ManualReset, false)),
                None,
                SecurityDescriptor::new(0, 0, 0o600),
            )?;
            let driver_init_token = self.ob_create_handle(driver_pid, init_event_id, Access::WRITE)?;
            let caller_init_token = self.ob_create_handle(caller, init_event_id, Access::READ)?;

            if let Some(name) = &component {
                let device_id = self.ob_create_object(
                    driver_pid,
                    ObjectBody::Device(DeviceObject::new(driver_object_id, name)),
                    None,
                    SecurityDescriptor::new(0, 0, 0o600),
                )?;
                self.dk_create_device(driver_pid, name, device_id)?;
            }

            {
                let mut state = self.state.borrow_mut();
                if let Some(process) = state.processes.get_mut(driver_pid) {
                    process.env.insert("DRIVER_OBJECT_TOKEN".to_string(), driver_object_token.clone());
                    process.env.insert("DRIVER_INIT_COMPLETE_TOKEN".to_string(), driver_init_token);
                    if let Some(name) = &component {
                        process.env.insert("DRIVER_COMPONENT_NAME".to_string(), name.clone());
                    }
                }
            }

            loaded.push(LoadedDriver {
                driver_pid,
                driver_object: driver_object_id,
                driver_object_token,
                component,
                init_complete_token: caller_init_token,
            });
        }

        Ok(loaded)
    }

    /// `vfs_open`: submits a `Create` IRP to the device backing `path`.
    /// Returns the pending IRP id the caller later resolves with
    /// `dk_complete_request`'s result (delivered by whoever wakes it).
    pub fn vfs_open(&mut self, caller: Pid, path: &str, access_flags: u32) -> KResult<PendingIrpId> {
        let params = IoParameters { data: Vec::new(), method: access_flags, args: Vec::new() };
        let (id, _driver_pid, _handler) = submit_irp(&self.state, caller, MajorFunction::Create, path, params)?;
        Ok(id)
    }

    pub fn vfs_read(&mut self, caller: Pid, path: &str, max_len: usize) -> KResult<PendingIrpId> {
        let params = IoParameters { data: Vec::new(), method: max_len as u32, args: Vec::new() };
        let (id, _driver_pid, _handler) = submit_irp(&self.state, caller, MajorFunction::Read, path, params)?;
        Ok(id)
    }

    pub fn vfs_write(&mut self, caller: Pid, path: &str, data: Vec<u8>) -> KResult<PendingIrpId> {
        let params = IoParameters { data, method: 0, args: Vec::new() };
        let (id, _driver_pid, _handler) = submit_irp(&self.state, caller, MajorFunction::Write, path, params)?;
        Ok(id)
    }

    pub fn vfs_close(&mut self, caller: Pid, path: &str) -> KResult<PendingIrpId> {
        let params = IoParameters { data: Vec::new(), method: 0, args: Vec::new() };
        let (id, _driver_pid, _handler) = submit_irp(&self.state, caller, MajorFunction::Close, path, params)?;
        Ok(id)
    }

    /// `vfs_device_control`: the catch-all IOCTL-style entry point,
    /// `args` is the opaque control-code payload (spec §4.5).
    pub fn vfs_device_control(&mut self, caller: Pid, path: &str, control_code: u32, args: Vec<u8>) -> KResult<PendingIrpId> {
        let params = IoParameters { data: Vec::new(), method: control_code, args };
        let (id, _driver_pid, _handler) =
            submit_irp(&self.state, caller, MajorFunction::DeviceControl, path, params)?;
        Ok(id)
    }

    /// `dk_create_device`: registers `device` in the device tree under
    /// `name`, callable only by the driver's own process (spec §4.5).
    pub fn dk_create_device(&mut self, caller: Pid, name: &str, device: ObjectId) -> KResult<()> {
        dk_create_device(&self.state, caller, name, device)
    }

    pub fn dk_delete_device(&mut self, caller: Pid, name: &str) -> KResult<()> {
        dk_delete_device(&self.state, caller, name)
    }

    /// `dk_create_symbolic_link`: publishes a `\DosDevices`-style alias
    /// (e.g. `/dev/tty` → `\Device\Tty0`) resolved by every `vfs_*` call.
    pub fn dk_create_symbolic_link(&mut self, caller: Pid, from: &str, to_device_name: &str) -> KResult<()> {
        dk_create_symbolic_link(&self.state, caller, from, to_device_name)
    }

    /// `dk_complete_request`: a driver's mandatory response to every IRP
    /// it receives, even on error (spec §4.5). Wakes the originator.
    pub fn dk_complete_request(
        &mut self,
        caller: Pid,
        pending: PendingIrpId,
        status: IoStatus,
        information: Vec<u8>,
    ) -> KResult<()> {
        dk_complete_request(&self.state, &self.ready_queue(), caller, pending, status, information)
    }

    /// `dk_register_interrupt`: drivers hook into device interrupts
    /// through a named handler the scripting VM resolves, mirroring the
    /// dispatch-table pattern already used for major functions (spec
    /// §4.5's device extension mechanism). Out of scope is any real
    /// hardware interrupt delivery — this only records the association.
    pub fn dk_register_interrupt(&mut self, caller: Pid, device: ObjectId, handler_name: &str) -> KResult<()> {
        dk_register_interrupt(&self.state, caller, device, handler_name)
    }
}

/// Awaits the result of an IRP this process submitted, parking it
/// (`ProcessStatus::Sleeping`, `WakePredicate::Pid`-style — reusing
/// `Irp` completion as the predicate) until `dk_complete_request` wakes
/// it (spec §4.5).
struct IrpFuture {
    kernel: KernelHandle,
    pid: Pid,
    id: PendingIrpId,
    parked: bool,
}

impl Future for IrpFuture {
    type Output = KResult<(IoStatus, Vec<u8>)>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut state = this.kernel.borrow_mut();
        if let Some((status, information)) = state.pipeline.take_result(this.id) {
            if let Some(process) = state.processes.get_mut(this.pid) {
                process.unpark();
            }
            return Poll::Ready(Ok((status, information)));
        }
        if !this.parked {
            if let Some(process) = state.processes.get_mut(this.pid) {
                process.park(crate::process::WakePredicate::Pid(this.pid), None);
            }
            this.parked = true;
        }
        Poll::Pending
    }
}

impl ProcessContext {
    async fn vfs_submit_and_await(
        &self,
        major_function: MajorFunction,
        path: &str,
        parameters: IoParameters,
    ) -> KResult<(IoStatus, Vec<u8>)> {
        let (id, _driver_pid, _handler) = submit_irp(&self.kernel, self.pid, major_function, path, parameters)?;
        IrpFuture { kernel: self.kernel.clone(), pid: self.pid, id, parked: false }.await
    }

    pub async fn vfs_open(&self, path: &str, access_flags: u32) -> KResult<(IoStatus, Vec<u8>)> {
        let params = IoParameters { data: Vec::new(), method: access_flags, args: Vec::new() };
        self.vfs_submit_and_await(MajorFunction::Create, path, params).await
    }

    pub async fn vfs_read(&self, path: &str, max_len: usize) -> KResult<(IoStatus, Vec<u8>)> {
        let params = IoParameters { data: Vec::new(), method: max_len as u32, args: Vec::new() };
        self.vfs_submit_and_await(MajorFunction::Read, path, params).await
    }

    pub async fn vfs_write(&self, path: &str, data: Vec<u8>) -> KResult<(IoStatus, Vec<u8>)> {
        let params = IoParameters { data, method: 0, args: Vec::new() };
        self.vfs_submit_and_await(MajorFunction::Write, path, params).await
    }

    pub async fn vfs_close(&self, path: &str) -> KResult<(IoStatus, Vec<u8>)> {
        let params = IoParameters { data: Vec::new(), method: 0, args: Vec::new() };
        self.vfs_submit_and_await(MajorFunction::Close, path, params).await
    }

    pub async fn vfs_device_control(&self, path: &str, control_code: u32, args: Vec<u8>) -> KResult<(IoStatus, Vec<u8>)> {
        let params = IoParameters { data: Vec::new(), method: control_code, args };
        self.vfs_submit_and_await(MajorFunction::DeviceControl, path, params).await
    }

    pub fn dk_create_device(&self, name: &str, device: ObjectId) -> KResult<()> {
        dk_create_device(&self.kernel, self.pid, name, device)
    }

    pub fn dk_delete_device(&self, name: &str) -> KResult<()> {
        dk_delete_device(&self.kernel, self.pid, name)
    }

    pub fn dk_create_symbolic_link(&self, from: &str, to_device_name: &str) -> KResult<()> {
        dk_create_symbolic_link(&self.kernel, self.pid, from, to_device_name)
    }

    pub fn dk_complete_request(&self, pending: PendingIrpId, status: IoStatus, information: Vec<u8>) -> KResult<()> {
        dk_complete_request(&self.kernel, &self.ready, self.pid, pending, status, information)
    }

    pub fn dk_register_interrupt(&self, device: ObjectId, handler_name: &str) -> KResult<()> {
        dk_register_interrupt(&self.kernel, self.pid, device, handler_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BootHandoff;
    use crate::irp::device::DeviceObject;
    use crate::irp::driver::{DriverInfo, DriverKind, DriverObject};
    use crate::object::security::SecurityDescriptor;
    use crate::object::ObjectBody;
    use std::collections::HashMap;

    fn boot_with_driver() -> (Kernel, Pid) {
        let mut kernel = Kernel::boot(BootHandoff::default());
        let driver_pid = kernel.spawn("", "tty-driver", Ring::R2, HashMap::new(), None).unwrap();

        let info = DriverInfo {
            unique_name: "tty".to_string(),
            kind: DriverKind::Kmd,
            load_priority: 0,
            version: "1.0".to_string(),
            supported_component_type: None,
        };
        let mut driver = DriverObject::new("/drivers/tty.lua", driver_pid, info);
        driver.dispatch_table.insert(MajorFunction::Read, "tty_read".to_string());
        let driver_id = kernel
            .ob_create_object(driver_pid, ObjectBody::Driver(driver), None, SecurityDescriptor::new(0, 0, 0o755))
            .unwrap();
        let device_id = kernel
            .ob_create_object(
                driver_pid,
                ObjectBody::Device(DeviceObject::new(driver_id, "\\Device\\Tty0")),
                None,
                SecurityDescriptor::new(0, 0, 0o755),
            )
            .unwrap();
        kernel.dk_create_device(driver_pid, "\\Device\\Tty0", device_id).unwrap();
        kernel.dk_create_symbolic_link(driver_pid, "/dev/tty", "\\Device\\Tty0").unwrap();
        (kernel, driver_pid)
    }

    #[test]
    fn vfs_read_then_complete_wakes_originator() {
        let (mut kernel, driver_pid) = boot_with_driver();
        let caller = kernel.spawn("", "reader", Ring::R3, HashMap::new(), None).unwrap();

        let pending = kernel.vfs_read(caller, "/dev/tty", 64).unwrap();
        kernel.dk_complete_request(driver_pid, pending, IoStatus::Success, b"hi\n".to_vec()).unwrap();
        assert_eq!(kernel.state.borrow().pipeline.pending_count(), 0);
    }

    #[test]
    fn vfs_read_on_unknown_device_is_no_driver() {
        let mut kernel = Kernel::boot(BootHandoff::default());
        let caller = kernel.spawn("", "reader", Ring::R3, HashMap::new(), None).unwrap();
        assert!(matches!(kernel.vfs_read(caller, "/dev/nothing", 64), Err(KernelError::NoDriver)));
    }
}
