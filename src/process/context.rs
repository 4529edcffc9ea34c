//! The injected `__pc` checkpoint (spec §4.1) and the per-process handle
//! used to reach kernel state from inside a running task's future.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::error::KResult;
use crate::scheduler::ReadyQueue;
use crate::time::{Monotonic, CHECK_INTERVAL, QUANTUM};
use crate::KernelHandle;

use super::Pid;

/// Handed to every spawned task's future; the only way task code reaches
/// kernel state, mirroring how the instrumented source only ever calls
/// `__pc()` and syscalls, never touches kernel internals directly.
///
/// Carries its own [`ReadyQueue`] handle (cloned from the [`crate::Kernel`]
/// that spawned it) alongside `kernel`, so the `ke_*`/`ob_*`/`vfs_*`/
/// `signal_*`/`process_*` methods below can actually requeue the caller
/// the same way a syscall invoked through `Kernel` does — a task's own
/// future otherwise has no path back to the scheduler it runs inside.
#[derive(Clone)]
pub struct ProcessContext {
    pub kernel: KernelHandle,
    pub ready: ReadyQueue,
    pub pid: Pid,
}

impl ProcessContext {
    pub fn new(kernel: KernelHandle, ready: ReadyQueue, pid: Pid) -> Self {
        ProcessContext { kernel, ready, pid }
    }

    /// The body of the injected `__pc()` call: a fast counter that only
    /// does real work every `CHECK_INTERVAL` calls, at which cadence it
    /// delivers pending signals and cooperatively yields if the task has
    /// held the processor past `QUANTUM` (spec §4.1).
    pub async fn checkpoint(&self) {
        let should_yield = {
            let mut state = self.kernel.borrow_mut();
            let Some(process) = state.processes.get_mut(self.pid) else {
                return;
            };
            process.checkpoint_counter += 1;
            if process.checkpoint_counter < CHECK_INTERVAL {
                return;
            }
            process.checkpoint_counter = 0;
            crate::process::signal::deliver_pending(process);
            Monotonic::now().elapsed_since(process.last_yield) >= QUANTUM
        };

        if should_yield {
            YieldNow::default().await;
            let mut state = self.kernel.borrow_mut();
            if let Some(process) = state.processes.get_mut(self.pid) {
                process.last_yield = Monotonic::now();
            }
        }
    }

    pub fn wait_for_exit(&self, target: Pid) -> super::WaitForExit {
        super::WaitForExit::new(self.kernel.clone(), target)
    }

    pub fn status(&self) -> KResult<super::ProcessStatus> {
        let state = self.kernel.borrow();
        state
            .processes
            .get(self.pid)
            .map(|p| p.status)
            .ok_or(crate::error::KernelError::NotFound)
    }
}

/// Yields control back to the executor exactly once: pending on first
/// poll (immediately re-scheduling itself via the waker), ready on the
/// second. This is the cooperative yield a `__pc` checkpoint performs —
/// not a sleep, just "let the scheduler resume someone else".
#[derive(Default)]
struct YieldNow {
    polled_once: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.polled_once {
            Poll::Ready(())
        } else {
            self.polled_once = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}
