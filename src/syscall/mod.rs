//! Syscall surface (spec §6): every entry point validates the caller's
//! ring, delivers pending signals, then dispatches into the owning
//! component. Split as `impl Kernel` blocks by prefix rather than one
//! giant numeric `match`, since this is a hosted library API rather
//! than a raw trap-and-dispatch ABI.

pub mod io;
pub mod ke;
pub mod ob;
pub mod process;
pub mod signal;

use crate::error::{KernelError, KResult};
use crate::process::{Pid, Ring};
use crate::KernelHandle;

/// Shared preamble every syscall runs before doing its own work (spec
/// §4.3: "every syscall validates the caller's ring ... and delivers
/// pending signals before dispatching").
///
/// `required` is the least-privileged ring allowed to make the call: a
/// caller whose own ring is *less* privileged (a larger `Ring` ordinal)
/// than `required` is rejected. Most syscalls pass `Ring::R3` (no floor
/// beyond being a live process); a handful of privileged operations pass
/// a stricter ring.
///
/// Takes the bare [`KernelHandle`] rather than `&Kernel` so both the
/// embedder-facing `Kernel` methods and a running task's own
/// [`crate::process::ProcessContext`] — which only ever holds a handle,
/// never the scheduler that owns it — can invoke the same syscalls.
pub(crate) fn enter(state: &KernelHandle, pid: Pid, required: Ring) -> KResult<()> {
    let mut state = state.borrow_mut();
    let process = state.processes.get_mut(pid).ok_or(KernelError::NotFound)?;
    if process.ring > required {
        return Err(KernelError::AccessDenied);
    }
    crate::process::signal::deliver_pending(process);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BootHandoff;
    use crate::Kernel;
    use std::collections::HashMap;

    #[test]
    fn enter_rejects_insufficient_ring() {
        let mut kernel = Kernel::boot(BootHandoff::default());
        let pid = kernel.spawn("", "t", Ring::R3, HashMap::new(), None).unwrap();
        assert!(matches!(enter(&kernel.state, pid, Ring::R0), Err(KernelError::AccessDenied)));
        assert!(enter(&kernel.state, pid, Ring::R3).is_ok());
    }
}
