//! Single-threaded cooperative round-robin scheduler (spec §4.3, §5).

pub mod waker;
pub mod watchdog;

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::Instant;

use crate::object::ObjectManager;
use crate::process::{Pid, ProcessStatus};
use crate::KernelHandle;

/// Exit code synthesized for a process the watchdog forcibly terminates
/// (spec §4.3: "forcibly terminated with an error").
pub const WATCHDOG_TERMINATION_EXIT_CODE: i32 = -9;

/// Exit code synthesized for a process reaped by a pending `SIGKILL`
/// (spec §4.4). `process_kill` issued from inside a task's own future
/// (`ProcessContext`, which holds no `Scheduler` and so cannot call
/// `terminate` directly) goes through this path instead of the
/// `Kernel::force_kill` one the embedder-facing API uses.
pub const SIGNAL_KILL_EXIT_CODE: i32 = -(crate::process::signal::SIGKILL as i32);

/// A task's future resolves to the process's exit code once it runs to
/// completion on its own (as opposed to being forcibly terminated).
pub type TaskFuture = Pin<Box<dyn Future<Output = i32>>>;

/// FIFO of pids ready to run, deduplicated so a pid woken twice before
/// its next resumption isn't resumed twice.
#[derive(Default)]
pub struct ReadySet {
    queue: VecDeque<Pid>,
    queued: HashSet<Pid>,
}

impl ReadySet {
    pub fn mark_ready(&mut self, pid: Pid) {
        if self.queued.insert(pid) {
            self.queue.push_back(pid);
        }
    }

    pub fn pop_ready(&mut self) -> Option<Pid> {
        let pid = self.queue.pop_front()?;
        self.queued.remove(&pid);
        Some(pid)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

pub type ReadyQueue = Rc<RefCell<ReadySet>>;

/// Wakes `pid`: clears any park set by a blocking syscall and requeues it
/// onto `ready`. Every object-state-change syscall that can unblock a
/// waiter (`set_event`, `release_mutex`, `release_semaphore`, pipe/mqueue
/// writes, IRP completion, signal delivery) goes through this single
/// path rather than touching `ReadySet` directly, so the sleeping→ready
/// transition (spec §4.3) always happens together with the requeue.
pub fn wake(kernel: &KernelHandle, ready: &ReadyQueue, pid: Pid) {
    if let Some(process) = kernel.borrow_mut().processes.get_mut(pid) {
        process.unpark();
    }
    ready.borrow_mut().mark_ready(pid);
}

/// What happened on a single `tick()` (spec §4.3 preemption detection).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Idle,
    Preempted(Pid),
    Parked(Pid),
    Exited(Pid, i32),
    WatchdogTerminated(Pid),
}

pub struct Scheduler {
    tasks: HashMap<Pid, TaskFuture>,
    ready: ReadyQueue,
}

impl Default for Scheduler {
    fn default() -> Self {
        Scheduler { tasks: HashMap::new(), ready: Rc::new(RefCell::new(ReadySet::default())) }
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler::default()
    }

    pub fn ready_queue(&self) -> ReadyQueue {
        Rc::clone(&self.ready)
    }

    pub fn spawn_task(&mut self, pid: Pid, future: TaskFuture) {
        self.tasks.insert(pid, future);
        self.ready.borrow_mut().mark_ready(pid);
    }

    pub fn ready_len(&self) -> usize {
        self.ready.borrow().len()
    }

    /// Resumes exactly one ready task, per spec §4.3's round-robin
    /// model. Returns `TickOutcome::Idle` if nothing is ready.
    pub fn tick(&mut self, kernel: &KernelHandle) -> TickOutcome {
        self.sweep_signal_kills(kernel);
        self.sweep_timeouts(kernel);

        let Some(pid) = self.ready.borrow_mut().pop_ready() else {
            return TickOutcome::Idle;
        };

        let Some(future) = self.tasks.get_mut(&pid) else {
            // Woken after it already exited; nothing to resume.
            return TickOutcome::Idle;
        };

        {
            let mut state = kernel.borrow_mut();
            if let Some(process) = state.processes.get_mut(pid) {
                process.status = ProcessStatus::Running;
                crate::process::signal::deliver_pending(process);
            }
        }

        let task_waker = waker::create_waker(pid, Rc::clone(&self.ready));
        let mut cx = Context::from_waker(&task_waker);

        let started = Instant::now();
        let poll = future.as_mut().poll(&mut cx);
        let slice = started.elapsed();

        let tripped = {
            let mut state = kernel.borrow_mut();
            match state.processes.get_mut(pid) {
                Some(process) => {
                    let tripped = watchdog::record_slice(&mut process.stats, slice);
                    if slice <= crate::time::WATCHDOG_SLICE_LIMIT {
                        // A resumption that stayed under the limit is a
                        // clean exit from this tick's perspective — only
                        // a consecutive run of over-limit resumptions
                        // should accumulate toward termination.
                        watchdog::decay_on_clean_exit(&mut process.stats);
                    }
                    tripped
                }
                None => false,
            }
        };

        if tripped {
            self.tasks.remove(&pid);
            self.terminate(kernel, pid, WATCHDOG_TERMINATION_EXIT_CODE);
            return TickOutcome::WatchdogTerminated(pid);
        }

        match poll {
            Poll::Ready(exit_code) => {
                self.tasks.remove(&pid);
                self.terminate(kernel, pid, exit_code);
                TickOutcome::Exited(pid, exit_code)
            }
            Poll::Pending => {
                let mut state = kernel.borrow_mut();
                match state.processes.get(pid).map(|p| p.status) {
                    Some(ProcessStatus::Running) => {
                        if let Some(process) = state.processes.get_mut(pid) {
                            process.status = ProcessStatus::Ready;
                            process.stats.preempt_count += 1;
                        }
                        drop(state);
                        self.ready.borrow_mut().mark_ready(pid);
                        TickOutcome::Preempted(pid)
                    }
                    _ => TickOutcome::Parked(pid),
                }
            }
        }
    }

    /// Reaps every process with a pending `SIGKILL` (spec §4.4): a
    /// process can't be relied on to ever reach a checkpoint that would
    /// deliver it (it may be asleep on an object forever), so killing by
    /// signal is enforced from the scheduler side rather than waiting for
    /// `deliver_pending` to run.
    fn sweep_signal_kills(&mut self, kernel: &KernelHandle) {
        let killed: Vec<Pid> = {
            let state = kernel.borrow();
            state
                .processes
                .iter()
                .filter(|(_, p)| p.pending_signals.is_set(crate::process::signal::SIGKILL))
                .map(|(pid, _)| *pid)
                .collect()
        };
        for pid in killed {
            self.terminate(kernel, pid, SIGNAL_KILL_EXIT_CODE);
        }
    }

    /// Sweeps every `Sleeping` process each tick for an expired
    /// `sleep_deadline`, waking it so the blocking future it's parked in
    /// observes the timeout on its next poll (spec §4.4). Mirrors the
    /// teacher's own per-tick timeout registry sweep, scaled down from a
    /// dedicated queue to a linear scan since this scheduler's process
    /// table is already small enough to walk every tick.
    fn sweep_timeouts(&mut self, kernel: &KernelHandle) {
        let now = crate::time::Monotonic::now();
        let expired: Vec<Pid> = {
            let state = kernel.borrow();
            state
                .processes
                .iter()
                .filter(|(_, p)| {
                    p.status == ProcessStatus::Sleeping
                        && p.sleep_deadline.is_some_and(|deadline| now >= deadline)
                })
                .map(|(pid, _)| *pid)
                .collect()
        };
        for pid in expired {
            wake(kernel, &self.ready, pid);
        }
    }

    /// Runs ticks until the ready queue drains, for scenarios (tests,
    /// embedders without their own loop) that want to run to quiescence
    /// in one call rather than pump `tick()` themselves.
    pub fn run_until_idle(&mut self, kernel: &KernelHandle) -> Vec<TickOutcome> {
        let mut outcomes = Vec::new();
        loop {
            let outcome = self.tick(kernel);
            if outcome == TickOutcome::Idle {
                return outcomes;
            }
            outcomes.push(outcome);
        }
    }

    /// Process death (spec §4.3): wakes exit waiters, releases handles,
    /// hands off owned mutexes as abandoned, and recursively kills
    /// threads (parent exit) — but a thread's own exit does not kill its
    /// siblings.
    pub fn terminate(&mut self, kernel: &KernelHandle, pid: Pid, exit_code: i32) {
        self.tasks.remove(&pid);
        let removed = {
            let mut state = kernel.borrow_mut();
            state.processes.remove(pid)
        };
        let Some(mut process) = removed else { return };

        process.status = ProcessStatus::Dead;
        process.resolve_exit_waiters(exit_code);

        let is_thread_exit = process.is_thread;
        let threads = std::mem::take(&mut process.threads);

        {
            let mut state = kernel.borrow_mut();
            state.objects.release_all_handles(&process.handles);
            let handoffs = state.objects.release_mutexes_owned_by(pid);
            drop(state);
            for (_, new_owner) in handoffs {
                if let Some(new_owner) = new_owner {
                    self.ready.borrow_mut().mark_ready(new_owner);
                }
            }
        }

        if !is_thread_exit {
            for thread_pid in threads {
                self.tasks.remove(&thread_pid);
                self.terminate(kernel, thread_pid, exit_code);
            }
        }
    }
}

pub fn objects_unreferenced_ok(_manager: &ObjectManager) {
    // Placeholder hook point for invariant auditing (spec §8); the
    // concrete checks live in integration tests against a live manager.
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectManager;
    use crate::process::{Process, ProcessTable, Ring};
    use crate::irp::dkms::Dkms;
    use crate::irp::pipeline_manager::PipelineManager;
    use crate::config::BootHandoff;
    use crate::KState;

    fn new_kernel() -> KernelHandle {
        Rc::new(RefCell::new(KState {
            processes: ProcessTable::new(),
            objects: ObjectManager::new(),
            dkms: Dkms::new(),
            pipeline: PipelineManager::new(),
            boot: BootHandoff::default(),
        }))
    }

    #[test]
    fn preempted_task_is_requeued_ready() {
        let kernel = new_kernel();
        let pid = {
            let mut state = kernel.borrow_mut();
            let pid = state.processes.allocate_pid();
            state.processes.insert(Process::new(pid, Ring::R3, None, 0, 0));
            pid
        };

        let mut scheduler = Scheduler::new();
        // A future that yields once (simulating a `__pc` checkpoint)
        // then completes.
        let mut yielded = false;
        scheduler.spawn_task(
            pid,
            Box::pin(std::future::poll_fn(move |cx| {
                if yielded {
                    Poll::Ready(0)
                } else {
                    yielded = true;
                    cx.waker().wake_by_ref();
                    Poll::Pending
                }
            })),
        );

        assert_eq!(scheduler.tick(&kernel), TickOutcome::Preempted(pid));
        assert_eq!(scheduler.ready_len(), 1);
        assert_eq!(scheduler.tick(&kernel), TickOutcome::Exited(pid, 0));
    }

    #[test]
    fn exit_wakes_waiters_and_removes_process() {
        let kernel = new_kernel();
        let pid = {
            let mut state = kernel.borrow_mut();
            let pid = state.processes.allocate_pid();
            state.processes.insert(Process::new(pid, Ring::R3, None, 0, 0));
            pid
        };

        let mut scheduler = Scheduler::new();
        scheduler.spawn_task(pid, Box::pin(async { 42 }));
        let outcome = scheduler.tick(&kernel);
        assert_eq!(outcome, TickOutcome::Exited(pid, 42));
        assert!(!kernel.borrow().processes.contains(pid));
    }
}
