//! `process_*` syscalls not already covered by [`crate::Kernel::spawn`]
//! and [`crate::Kernel::wait`] (spec §6).

use crate::error::{KernelError, KResult};
use crate::process::context::ProcessContext;
use crate::process::{Pid, Ring};
use crate::{Kernel, KernelHandle};

/// `process_get_pid`/`process_get_ring`/`process_get_synapse_token` read
/// the caller's own table entry and never touch the scheduler, so they
/// stay plain functions over `&KernelHandle` with no ring check of their
/// own beyond "the caller still exists".
fn process_get_pid(state: &KernelHandle, caller: Pid) -> KResult<Pid> {
    if state.borrow().processes.contains(caller) {
        Ok(caller)
    } else {
        Err(KernelError::NotFound)
    }
}

fn process_get_ring(state: &KernelHandle, caller: Pid) -> KResult<Ring> {
    state.borrow().processes.get(caller).map(|p| p.ring).ok_or(KernelError::NotFound)
}

/// `process_elevate`: regenerates the process's synapse token,
/// deliberately invalidating every handle bound to the old one (spec
/// §4.2) — the caller must re-acquire handles afterward.
fn process_elevate(state: &KernelHandle, caller: Pid, new_ring: Ring) -> KResult<()> {
    super::enter(state, caller, Ring::R3)?;
    let mut state = state.borrow_mut();
    let process = state.processes.get_mut(caller).ok_or(KernelError::NotFound)?;
    process.ring = new_ring;
    process.regenerate_synapse_token();
    Ok(())
}

fn process_get_synapse_token(state: &KernelHandle, caller: Pid) -> KResult<String> {
    state
        .borrow()
        .processes
        .get(caller)
        .map(|p| p.synapse_token.clone())
        .ok_or(KernelError::NotFound)
}

impl Kernel {
    /// `process_kill`: forcibly terminates `target` with `exit_code`,
    /// same cleanup path as a natural exit or watchdog termination
    /// (spec §4.3).
    pub fn process_kill(&mut self, caller: Pid, target: Pid, exit_code: i32) -> KResult<()> {
        super::enter(&self.state, caller, Ring::R3)?;
        if !self.state.borrow().processes.contains(target) {
            return Err(KernelError::NotFound);
        }
        self.force_kill(target, exit_code);
        Ok(())
    }

    pub fn process_get_pid(&self, caller: Pid) -> KResult<Pid> {
        process_get_pid(&self.state, caller)
    }

    pub fn process_get_ring(&self, caller: Pid) -> KResult<Ring> {
        process_get_ring(&self.state, caller)
    }

    pub fn process_elevate(&mut self, caller: Pid, new_ring: Ring) -> KResult<()> {
        process_elevate(&self.state, caller, new_ring)
    }

    pub fn process_get_synapse_token(&self, caller: Pid) -> KResult<String> {
        process_get_synapse_token(&self.state, caller)
    }
}

impl ProcessContext {
    pub fn process_get_pid(&self) -> KResult<Pid> {
        process_get_pid(&self.kernel, self.pid)
    }

    pub fn process_get_ring(&self) -> KResult<Ring> {
        process_get_ring(&self.kernel, self.pid)
    }

    pub fn process_elevate(&self, new_ring: Ring) -> KResult<()> {
        process_elevate(&self.kernel, self.pid, new_ring)
    }

    pub fn process_get_synapse_token(&self) -> KResult<String> {
        process_get_synapse_token(&self.kernel, self.pid)
    }

    /// `process_kill`: a task can't reach `Scheduler::terminate` directly
    /// (it needs `self.tasks` to drop the target's own future, which
    /// `ProcessContext` never holds — only `Kernel` does), so this
    /// expresses the kill as a pending `SIGKILL`. The scheduler's own
    /// per-tick sweep (`Scheduler::sweep_signal_kills`) reaps it — within
    /// one tick, and without the target needing to reach a checkpoint of
    /// its own first, since `SIGKILL` bypasses ordinary delivery (spec
    /// §4.4).
    pub fn process_kill(&self, target: Pid) -> KResult<()> {
        if !self.kernel.borrow().processes.contains(target) {
            return Err(KernelError::NotFound);
        }
        self.signal_send(target, crate::process::signal::SIGKILL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BootHandoff;
    use std::collections::HashMap;

    #[test]
    fn elevate_invalidates_old_synapse_token() {
        let mut kernel = Kernel::boot(BootHandoff::default());
        let pid = kernel.spawn("", "t", Ring::R3, HashMap::new(), None).unwrap();
        let before = kernel.process_get_synapse_token(pid).unwrap();
        kernel.process_elevate(pid, Ring::R0).unwrap();
        let after = kernel.process_get_synapse_token(pid).unwrap();
        assert_ne!(before, after);
        assert_eq!(kernel.process_get_ring(pid).unwrap(), Ring::R0);
    }

    #[test]
    fn kill_removes_process() {
        let mut kernel = Kernel::boot(BootHandoff::default());
        let pid = kernel.spawn("", "t", Ring::R3, HashMap::new(), None).unwrap();
        kernel.process_kill(pid, pid, -1).unwrap();
        assert!(matches!(kernel.process_get_pid(pid), Err(KernelError::NotFound)));
    }
}
