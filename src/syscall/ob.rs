//! `ob_*` syscalls: Object Manager entry points (spec §4.2, §6).
//!
//! Each operation is a free function over `&KernelHandle` so both
//! [`Kernel`] and a running task's own [`ProcessContext`] can invoke it
//! (see `syscall::signal`'s module doc for why).

use crate::error::{KernelError, KResult};
use crate::object::security::{Access, SecurityDescriptor};
use crate::object::{ObjectBody, ObjectId, ObjectType};
use crate::process::context::ProcessContext;
use crate::process::{Pid, Ring};
use crate::{Kernel, KernelHandle};

/// `ob_create_object`: allocate an unnamed (or namespace-rooted)
/// object with ref=1, handle=0.
fn ob_create_object(
    state: &KernelHandle,
    caller: Pid,
    body: ObjectBody,
    path: Option<&str>,
    security: SecurityDescriptor,
) -> KResult<ObjectId> {
    super::enter(state, caller, Ring::R3)?;
    state.borrow_mut().objects.create_object(body, path, security)
}

/// `ob_insert_object`: register an already-created object at `path`.
fn ob_insert_object(state: &KernelHandle, caller: Pid, object: ObjectId, path: &str) -> KResult<()> {
    super::enter(state, caller, Ring::R3)?;
    state.borrow_mut().objects.insert_object(object, path)
}

/// `ob_lookup`: resolve `path`, optionally asserting its type.
fn ob_lookup(state: &KernelHandle, caller: Pid, path: &str, expected_type: Option<ObjectType>) -> KResult<ObjectId> {
    super::enter(state, caller, Ring::R3)?;
    state.borrow_mut().objects.lookup_object(path, expected_type)
}

/// `ob_open_handle`: resolve `path`, access-check the caller, and mint a
/// handle token bound to the caller's synapse token.
fn ob_open_handle(state: &KernelHandle, caller: Pid, path: &str, desired_access: Access) -> KResult<String> {
    super::enter(state, caller, Ring::R3)?;
    let mut state = state.borrow_mut();
    let state = &mut *state;
    state.objects.open_handle(&mut state.processes, caller, path, desired_access)
}

/// `ob_create_handle`: mint a handle directly against an already
/// referenced object, skipping namespace resolution and access check
/// (used by drivers vending objects they just created).
fn ob_create_handle(state: &KernelHandle, caller: Pid, object: ObjectId, access: Access) -> KResult<String> {
    super::enter(state, caller, Ring::R3)?;
    let mut state = state.borrow_mut();
    let state = &mut *state;
    state.objects.create_handle(&mut state.processes, caller, object, access)
}

/// `ob_reference_by_handle`: validate the handle's bound synapse token
/// (spec §4.2) and resolve it to its object.
fn ob_reference_by_handle(
    state: &KernelHandle,
    caller: Pid,
    token: &str,
    access: Access,
    caller_synapse_token: &str,
) -> KResult<ObjectId> {
    super::enter(state, caller, Ring::R3)?;
    let mut state = state.borrow_mut();
    let state = &mut *state;
    state.objects.reference_by_handle(&state.processes, caller, token, access, caller_synapse_token)
}

/// `ob_close_handle`.
fn ob_close_handle(state: &KernelHandle, caller: Pid, token: &str) -> KResult<()> {
    super::enter(state, caller, Ring::R3)?;
    let mut state = state.borrow_mut();
    let state = &mut *state;
    state.objects.close_handle(&mut state.processes, caller, token)
}

/// `ob_get_standard_handle`: look up one of the small negative-integer
/// stdin/stdout/stderr-style slots (spec §4.2).
fn ob_get_standard_handle(state: &KernelHandle, caller: Pid, slot: i32) -> KResult<String> {
    let state = state.borrow();
    let process = state.processes.get(caller).ok_or(KernelError::NotFound)?;
    process.handles.standard_handle(slot).map(str::to_string).ok_or(KernelError::NotFound)
}

/// `ob_set_standard_handle`.
fn ob_set_standard_handle(state: &KernelHandle, caller: Pid, slot: i32, token: String) -> KResult<()> {
    super::enter(state, caller, Ring::R3)?;
    let mut state = state.borrow_mut();
    let process = state.processes.get_mut(caller).ok_or(KernelError::NotFound)?;
    process.handles.set_standard_handle(slot, token);
    Ok(())
}

/// `ob_inherit_handles`: duplicate `parent`'s inheritable handles into
/// `child`'s table, bound to the child's own synapse token (spec §4.2's
/// spawn-time inheritance) — exposed separately from `spawn` for
/// embedders that build the child process themselves.
fn ob_inherit_handles(state: &KernelHandle, parent: Pid, child: Pid) -> KResult<()> {
    let mut state = state.borrow_mut();
    let state = &mut *state;
    let (parent_handles, child_token) = {
        let parent_process = state.processes.get(parent).ok_or(KernelError::NotFound)?;
        let child_process = state.processes.get(child).ok_or(KernelError::NotFound)?;
        let handles = parent_process.handles.iter().map(|(t, e)| (t.clone(), e.clone())).collect();
        (handles, child_process.synapse_token.clone())
    };
    let inherited = crate::object::inherit_handles(&mut state.objects, &parent_handles, &child_token);
    let child_process = state.processes.get_mut(child).ok_or(KernelError::NotFound)?;
    for (token, entry) in inherited {
        child_process.handles.insert(token, entry);
    }
    Ok(())
}

impl Kernel {
    pub fn ob_create_object(
        &mut self,
        caller: Pid,
        body: ObjectBody,
        path: Option<&str>,
        security: SecurityDescriptor,
    ) -> KResult<ObjectId> {
        ob_create_object(&self.state, caller, body, path, security)
    }

    pub fn ob_insert_object(&mut self, caller: Pid, object: ObjectId, path: &str) -> KResult<()> {
        ob_insert_object(&self.state, caller, object, path)
    }

    pub fn ob_lookup(&mut self, caller: Pid, path: &str, expected_type: Option<ObjectType>) -> KResult<ObjectId> {
        ob_lookup(&self.state, caller, path, expected_type)
    }

    pub fn ob_open_handle(&mut self, caller: Pid, path: &str, desired_access: Access) -> KResult<String> {
        ob_open_handle(&self.state, caller, path, desired_access)
    }

    pub fn ob_create_handle(&mut self, caller: Pid, object: ObjectId, access: Access) -> KResult<String> {
        ob_create_handle(&self.state, caller, object, access)
    }

    pub fn ob_reference_by_handle(
        &mut self,
        caller: Pid,
        token: &str,
        access: Access,
        caller_synapse_token: &str,
    ) -> KResult<ObjectId> {
        ob_reference_by_handle(&self.state, caller, token, access, caller_synapse_token)
    }

    pub fn ob_close_handle(&mut self, caller: Pid, token: &str) -> KResult<()> {
        ob_close_handle(&self.state, caller, token)
    }

    pub fn ob_get_standard_handle(&self, caller: Pid, slot: i32) -> KResult<String> {
        ob_get_standard_handle(&self.state, caller, slot)
    }

    pub fn ob_set_standard_handle(&mut self, caller: Pid, slot: i32, token: String) -> KResult<()> {
        ob_set_standard_handle(&self.state, caller, slot, token)
    }

    pub fn ob_inherit_handles(&mut self, parent: Pid, child: Pid) -> KResult<()> {
        ob_inherit_handles(&self.state, parent, child)
    }
}

impl ProcessContext {
    pub fn ob_create_object(
        &self,
        body: ObjectBody,
        path: Option<&str>,
        security: SecurityDescriptor,
    ) -> KResult<ObjectId> {
        ob_create_object(&self.kernel, self.pid, body, path, security)
    }

    pub fn ob_insert_object(&self, object: ObjectId, path: &str) -> KResult<()> {
        ob_insert_object(&self.kernel, self.pid, object, path)
    }

    pub fn ob_lookup(&self, path: &str, expected_type: Option<ObjectType>) -> KResult<ObjectId> {
        ob_lookup(&self.kernel, self.pid, path, expected_type)
    }

    pub fn ob_open_handle(&self, path: &str, desired_access: Access) -> KResult<String> {
        ob_open_handle(&self.kernel, self.pid, path, desired_access)
    }

    pub fn ob_create_handle(&self, object: ObjectId, access: Access) -> KResult<String> {
        ob_create_handle(&self.kernel, self.pid, object, access)
    }

    pub fn ob_reference_by_handle(&self, token: &str, access: Access, caller_synapse_token: &str) -> KResult<ObjectId> {
        ob_reference_by_handle(&self.kernel, self.pid, token, access, caller_synapse_token)
    }

    pub fn ob_close_handle(&self, token: &str) -> KResult<()> {
        ob_close_handle(&self.kernel, self.pid, token)
    }

    pub fn ob_get_standard_handle(&self, slot: i32) -> KResult<String> {
        ob_get_standard_handle(&self.kernel, self.pid, slot)
    }

    pub fn ob_set_standard_handle(&self, slot: i32, token: String) -> KResult<()> {
        ob_set_standard_handle(&self.kernel, self.pid, slot, token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BootHandoff;
    use crate::object::security::SecurityDescriptor;
    use std::collections::HashMap;

    #[test]
    fn open_handle_round_trips_through_close() {
        let mut kernel = Kernel::boot(BootHandoff::default());
        let pid = kernel.spawn("", "t", Ring::R3, HashMap::new(), None).unwrap();

        let obj = kernel
            .ob_create_object(
                pid,
                ObjectBody::Directory,
                Some("\\test-dir"),
                SecurityDescriptor::new(0, 0, 0o777),
            )
            .unwrap();

        let token = kernel.ob_open_handle(pid, "\\test-dir", Access::READ).unwrap();
        let referenced = kernel
            .ob_reference_by_handle(pid, &token, Access::READ, &kernel.process_get_synapse_token(pid).unwrap())
            .unwrap();
        assert_eq!(referenced, obj);

        kernel.ob_close_handle(pid, &token).unwrap();
    }

    #[test]
    fn inherit_handles_copies_into_child_table() {
        let mut kernel = Kernel::boot(BootHandoff::default());
        let parent = kernel.spawn("", "parent", Ring::R3, HashMap::new(), None).unwrap();
        kernel
            .ob_create_object(parent, ObjectBody::Directory, Some("\\shared"), SecurityDescriptor::new(0, 0, 0o777))
            .unwrap();
        kernel.ob_open_handle(parent, "\\shared", Access::READ).unwrap();

        let child = kernel.spawn("", "child", Ring::R3, HashMap::new(), Some(parent)).unwrap();
        assert!(kernel.ob_get_standard_handle(child, -10).is_err());
        kernel.ob_inherit_handles(parent, child).unwrap();
    }
}
