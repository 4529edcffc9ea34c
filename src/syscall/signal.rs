//! `signal_*` syscalls (spec §4.4, §6).
//!
//! Each operation is a free function over `&KernelHandle` (plus a
//! `ReadyQueue` where it can wake someone) so both [`Kernel`] — the
//! embedder's own handle — and [`crate::process::context::ProcessContext`]
//! — the handle a running task's own future holds — can invoke it; the
//! `impl` blocks below are thin wrappers supplying their own caller.

use crate::error::{KernelError, KResult};
use crate::process::context::ProcessContext;
use crate::process::signal::SignalNumber;
use crate::process::{Pid, Ring, SignalDisposition};
use crate::scheduler::ReadyQueue;
use crate::{Kernel, KernelHandle};

/// `signal_handle`: registers a disposition for `sig`, overriding the
/// default action. Rejected for SIGKILL/SIGSTOP (spec §4.4).
fn signal_handle(state: &KernelHandle, caller: Pid, sig: SignalNumber, disposition: SignalDisposition) -> KResult<()> {
    super::enter(state, caller, Ring::R3)?;
    if crate::process::signal::is_uncatchable(sig) {
        return Err(KernelError::InvalidArgument);
    }
    let mut state = state.borrow_mut();
    let process = state.processes.get_mut(caller).ok_or(KernelError::NotFound)?;
    process.signal_handlers.insert(sig, disposition);
    Ok(())
}

/// `signal_send`: enqueues `sig` as pending on `target`. Delivery happens
/// lazily, at the target's next checkpoint or syscall entry (spec §4.1,
/// §4.3), not synchronously here.
fn signal_send(state: &KernelHandle, ready: &ReadyQueue, caller: Pid, target: Pid, sig: SignalNumber) -> KResult<()> {
    super::enter(state, caller, Ring::R3)?;
    {
        let mut state = state.borrow_mut();
        let process = state.processes.get_mut(target).ok_or(KernelError::NotFound)?;
        process.pending_signals.set(sig);
    }
    crate::scheduler::wake(state, ready, target);
    Ok(())
}

/// `signal_mask`: adds `sig` to the caller's blocked set. A no-op for
/// SIGKILL/SIGSTOP rather than an error, matching `SignalMask::mask`'s
/// own refusal (spec §4.4).
fn signal_mask(state: &KernelHandle, caller: Pid, sig: SignalNumber) -> KResult<()> {
    super::enter(state, caller, Ring::R3)?;
    let mut state = state.borrow_mut();
    let process = state.processes.get_mut(caller).ok_or(KernelError::NotFound)?;
    process.signal_mask.mask(sig);
    Ok(())
}

fn signal_unmask(state: &KernelHandle, caller: Pid, sig: SignalNumber) -> KResult<()> {
    super::enter(state, caller, Ring::R3)?;
    let mut state = state.borrow_mut();
    let process = state.processes.get_mut(caller).ok_or(KernelError::NotFound)?;
    process.signal_mask.unmask(sig);
    Ok(())
}

/// `signal_pull`: pops the next already-delivered signal off the
/// caller's queue, for the embedder's script-level handler dispatch
/// loop to act on.
fn signal_pull(state: &KernelHandle, caller: Pid) -> KResult<Option<SignalNumber>> {
    super::enter(state, caller, Ring::R3)?;
    let mut state = state.borrow_mut();
    let process = state.processes.get_mut(caller).ok_or(KernelError::NotFound)?;
    Ok(process.delivered_signals.pop_front())
}

impl Kernel {
    pub fn signal_handle(&mut self, caller: Pid, sig: SignalNumber, disposition: SignalDisposition) -> KResult<()> {
        signal_handle(&self.state, caller, sig, disposition)
    }

    pub fn signal_send(&mut self, caller: Pid, target: Pid, sig: SignalNumber) -> KResult<()> {
        signal_send(&self.state, &self.ready_queue(), caller, target, sig)
    }

    pub fn signal_mask(&mut self, caller: Pid, sig: SignalNumber) -> KResult<()> {
        signal_mask(&self.state, caller, sig)
    }

    pub fn signal_unmask(&mut self, caller: Pid, sig: SignalNumber) -> KResult<()> {
        signal_unmask(&self.state, caller, sig)
    }

    pub fn signal_pull(&mut self, caller: Pid) -> KResult<Option<SignalNumber>> {
        signal_pull(&self.state, caller)
    }
}

impl ProcessContext {
    pub fn signal_handle(&self, sig: SignalNumber, disposition: SignalDisposition) -> KResult<()> {
        signal_handle(&self.kernel, self.pid, sig, disposition)
    }

    pub fn signal_send(&self, target: Pid, sig: SignalNumber) -> KResult<()> {
        signal_send(&self.kernel, &self.ready, self.pid, target, sig)
    }

    pub fn signal_mask(&self, sig: SignalNumber) -> KResult<()> {
        signal_mask(&self.kernel, self.pid, sig)
    }

    pub fn signal_unmask(&self, sig: SignalNumber) -> KResult<()> {
        signal_unmask(&self.kernel, self.pid, sig)
    }

    pub fn signal_pull(&self) -> KResult<Option<SignalNumber>> {
        signal_pull(&self.kernel, self.pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BootHandoff;
    use crate::process::signal::{SIGKILL, SIGTERM};
    use std::collections::HashMap;

    #[test]
    fn send_then_pull_delivers_after_checkpoint() {
        let mut kernel = Kernel::boot(BootHandoff::default());
        let pid = kernel.spawn("", "t", Ring::R3, HashMap::new(), None).unwrap();

        kernel.signal_send(pid, pid, SIGTERM).unwrap();

        // `enter`'s preamble delivers pending signals before every
        // syscall runs, so the pull that follows the send already finds
        // it moved into the delivered queue.
        assert_eq!(kernel.signal_pull(pid).unwrap(), Some(SIGTERM));
        assert_eq!(kernel.signal_pull(pid).unwrap(), None);
    }

    #[test]
    fn handle_rejects_uncatchable_signal() {
        let mut kernel = Kernel::boot(BootHandoff::default());
        let pid = kernel.spawn("", "t", Ring::R3, HashMap::new(), None).unwrap();
        let result = kernel.signal_handle(pid, SIGKILL, SignalDisposition::Ignore);
        assert!(matches!(result, Err(KernelError::InvalidArgument)));
    }
}
