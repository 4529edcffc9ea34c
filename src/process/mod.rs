//! Scheduler & Process Manager process model (spec §4.3).

pub mod context;
pub mod signal;

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::rc::Rc;
use std::cell::Cell;
use std::task::Waker;

use crate::error::{KernelError, KResult};
use crate::object::handle::HandleTable;
use crate::rng::opaque_token;
use crate::time::Monotonic;

pub use signal::{PendingSignals, SignalDisposition, SignalMask, SignalNumber};

/// A small positive integer identifying a process (spec §3).
pub type Pid = u32;

/// PIDs below this threshold (and any Ring 0 caller) skip synapse-token
/// authentication (spec §4.2, Open Question resolved in DESIGN.md).
pub const TRUSTED_PID_THRESHOLD: Pid = 20;

/// Privilege level. Declaration order matters: it defines the `Ord` used
/// by checks like "ring >= Ring::R2Five" (spec §4.1's "Ring >= 2.5").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Ring {
    R0,
    R1,
    R2,
    R2Five,
    R3,
}

impl Ring {
    /// Whether source at this ring must pass through the Preempt
    /// Instrumenter before it is allowed to run (spec §4.1).
    pub fn requires_instrumentation(self) -> bool {
        self >= Ring::R2Five
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Ready,
    Running,
    Sleeping,
    Dead,
}

/// Why a sleeping process is parked (spec §4.3: "an object to be
/// signaled, a timeout deadline, a pid to observe, or a signal mask").
#[derive(Debug, Clone)]
pub enum WakePredicate {
    Objects { ids: Vec<crate::object::ObjectId>, wait_all: bool },
    Timeout(Monotonic),
    Pid(Pid),
    Signal(SignalMask),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulerStats {
    pub cpu_time: std::time::Duration,
    pub preempt_count: u64,
    pub last_slice: std::time::Duration,
    pub max_slice: std::time::Duration,
    pub watchdog_strikes: u32,
}

/// A slot registered by [`Process::wait_for_exit`]: resolved exactly once,
/// by whichever of [`process kill`](super::scheduler) or
/// [`Process::wait_for_exit`] observes the death first.
pub type ExitSlot = Rc<Cell<Option<i32>>>;

pub struct Process {
    pub pid: Pid,
    pub status: ProcessStatus,
    pub ring: Ring,
    pub parent: Option<Pid>,
    pub env: HashMap<String, String>,
    pub uid: u32,
    pub gid: u32,
    pub synapse_token: String,
    pub threads: Vec<Pid>,
    pub is_thread: bool,
    pub stats: SchedulerStats,
    pub irql: u8,
    pub process_group: Pid,
    pub handles: HandleTable,
    pub pending_signals: PendingSignals,
    pub signal_mask: SignalMask,
    pub signal_handlers: HashMap<SignalNumber, SignalDisposition>,
    pub delivered_signals: VecDeque<SignalNumber>,
    pub wake_predicate: Option<WakePredicate>,
    /// Set alongside `wake_predicate` by a blocking syscall that accepted
    /// a timeout; the scheduler's per-tick sweep wakes anyone still
    /// `Sleeping` past this deadline with `KernelError::Timeout` (spec
    /// §4.4's `wait_multiple(... , timeout)`).
    pub sleep_deadline: Option<Monotonic>,
    pub checkpoint_counter: u32,
    pub last_yield: Monotonic,
    pub watchdog_resume_start: Option<Monotonic>,

    exit_waiters: Vec<(Waker, ExitSlot)>,
}

impl Process {
    pub fn new(pid: Pid, ring: Ring, parent: Option<Pid>, uid: u32, gid: u32) -> Self {
        Process {
            pid,
            status: ProcessStatus::Ready,
            ring,
            parent,
            env: HashMap::new(),
            uid,
            gid,
            synapse_token: opaque_token("syn"),
            threads: Vec::new(),
            is_thread: false,
            stats: SchedulerStats::default(),
            irql: 0,
            process_group: pid,
            handles: HandleTable::new(),
            pending_signals: PendingSignals::default(),
            signal_mask: SignalMask::default(),
            signal_handlers: HashMap::new(),
            delivered_signals: VecDeque::new(),
            wake_predicate: None,
            sleep_deadline: None,
            checkpoint_counter: 0,
            last_yield: Monotonic::now(),
            watchdog_resume_start: None,
            exit_waiters: Vec::new(),
        }
    }

    /// Regenerating the synapse token (on `process_elevate`) deliberately
    /// invalidates every handle bound to the old token (spec §4.2).
    pub fn regenerate_synapse_token(&mut self) {
        self.synapse_token = opaque_token("syn");
    }

    pub fn register_exit_waiter(&mut self, waker: Waker, slot: ExitSlot) {
        self.exit_waiters.push((waker, slot));
    }

    /// Called exactly once, when the process transitions to `Dead`:
    /// hands the exit code to every registered waiter and wakes them.
    pub fn resolve_exit_waiters(&mut self, exit_code: i32) {
        for (waker, slot) in self.exit_waiters.drain(..) {
            slot.set(Some(exit_code));
            waker.wake();
        }
    }

    /// Parks the process pending `predicate`, optionally bounded by
    /// `deadline` (spec §4.3's running→sleeping transition).
    pub fn park(&mut self, predicate: WakePredicate, deadline: Option<Monotonic>) {
        self.status = ProcessStatus::Sleeping;
        self.wake_predicate = Some(predicate);
        self.sleep_deadline = deadline;
    }

    /// Clears a park set by `park`, leaving the process `Ready` for the
    /// scheduler to resume. A no-op if the process wasn't `Sleeping` —
    /// callers that wake a pid speculatively (signals, IRP completion)
    /// don't need to know whether it was actually asleep.
    pub fn unpark(&mut self) {
        if self.status == ProcessStatus::Sleeping {
            self.status = ProcessStatus::Ready;
        }
        self.wake_predicate = None;
        self.sleep_deadline = None;
    }
}

/// `spawn → kill → wait`: the future returned by `process_wait`. Looks the
/// pid up once on first poll (so a pid that is already gone, or was never
/// registered with us, resolves to `NotFound` immediately, including on
/// every call *after* an earlier waiter already consumed the exit code —
/// dead processes are removed from the table as soon as they are
/// reported, per spec §8's "subsequent wait returns not_found").
pub struct WaitForExit {
    kernel: crate::KernelHandle,
    target: Pid,
    slot: Option<ExitSlot>,
}

impl WaitForExit {
    pub fn new(kernel: crate::KernelHandle, target: Pid) -> Self {
        WaitForExit { kernel, target, slot: None }
    }
}

impl std::future::Future for WaitForExit {
    type Output = KResult<i32>;

    fn poll(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        use std::task::Poll;

        if let Some(slot) = &self.slot {
            return match slot.get() {
                Some(code) => Poll::Ready(Ok(code)),
                None => Poll::Pending,
            };
        }

        let mut state = self.kernel.borrow_mut();
        match state.processes.get_mut(self.target) {
            Some(proc) => {
                let slot: ExitSlot = Rc::new(Cell::new(None));
                proc.register_exit_waiter(cx.waker().clone(), slot.clone());
                drop(state);
                self.get_mut().slot = Some(slot);
                Poll::Pending
            }
            None => Poll::Ready(Err(KernelError::NotFound)),
        }
    }
}

/// The process table (spec §3). Owned by `KState`.
#[derive(Default)]
pub struct ProcessTable {
    table: HashMap<Pid, Process>,
    next_pid: Pid,
}

impl ProcessTable {
    pub fn new() -> Self {
        ProcessTable { table: HashMap::new(), next_pid: 1 }
    }

    pub fn allocate_pid(&mut self) -> Pid {
        let pid = self.next_pid;
        self.next_pid += 1;
        pid
    }

    pub fn insert(&mut self, process: Process) {
        self.table.insert(process.pid, process);
    }

    pub fn get(&self, pid: Pid) -> Option<&Process> {
        self.table.get(&pid)
    }

    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut Process> {
        self.table.get_mut(&pid)
    }

    pub fn remove(&mut self, pid: Pid) -> Option<Process> {
        self.table.remove(&pid)
    }

    pub fn contains(&self, pid: Pid) -> bool {
        self.table.contains_key(&pid)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Pid, &Process)> {
        self.table.iter()
    }

    pub fn pids(&self) -> Vec<Pid> {
        self.table.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_ordering_matches_privilege() {
        assert!(Ring::R0 < Ring::R2Five);
        assert!(Ring::R2Five <= Ring::R3);
        assert!(!Ring::R2.requires_instrumentation());
        assert!(Ring::R2Five.requires_instrumentation());
        assert!(Ring::R3.requires_instrumentation());
    }

    #[test]
    fn elevate_changes_token() {
        let mut p = Process::new(100, Ring::R3, None, 1000, 1000);
        let before = p.synapse_token.clone();
        p.regenerate_synapse_token();
        assert_ne!(before, p.synapse_token);
    }
}
