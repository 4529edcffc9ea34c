//! Kernel Core: Preempt Instrumenter, Object Manager, Scheduler &
//! Process Manager, Kernel IPC, and the IRP Fabric — the five
//! cooperating components hosted inside a single-threaded sandboxed
//! scripting environment with coroutines (spec §1, §2).
//!
//! This crate embeds the kernel itself, not the scripting VM: the
//! embedder supplies the actual interpreter through [`script::TaskBody`]
//! and calls into [`Kernel`] the way the instrumented source's `__pc`
//! checkpoint and every syscall would.

pub mod config;
pub mod error;
pub mod instrumenter;
pub mod ipc;
pub mod irp;
pub mod klog;
pub mod object;
pub mod process;
pub mod rng;
pub mod scheduler;
pub mod script;
pub mod syscall;
pub mod time;

#[cfg(test)]
mod tests_scenarios;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use config::BootHandoff;
use error::{KernelError, KResult};
use irp::dkms::Dkms;
use irp::pipeline_manager::PipelineManager;
use object::handle::HandleEntry;
use object::ObjectManager;
use process::context::ProcessContext;
use process::{Pid, Process, ProcessTable, Ring};
use scheduler::{Scheduler, TickOutcome};
use script::TaskBody;

/// Everything mutated by kernel code (spec §5: "mutated only by kernel
/// code executing at ring 0 and only while no task is concurrently
/// resumed"). Single `Rc<RefCell<_>>` ownership is sound here because
/// the whole kernel runs on one host thread — see DESIGN.md.
pub struct KState {
    pub processes: ProcessTable,
    pub objects: ObjectManager,
    pub dkms: Dkms,
    pub pipeline: PipelineManager,
    pub boot: BootHandoff,
}

pub type KernelHandle = Rc<RefCell<KState>>;

/// The kernel facade an embedder drives: boot it once, `spawn` an init
/// process, then call `tick`/`run_until_idle` from the host's own event
/// loop (spec §4.3's scheduler is cooperative, not self-driving).
pub struct Kernel {
    pub state: KernelHandle,
    scheduler: Scheduler,
    halted: bool,
}

impl Kernel {
    pub fn boot(handoff: BootHandoff) -> Self {
        klog::set_log_mode(handoff.args.log_level);
        log::info!("kernel boot: init={}", handoff.args.init_path);

        let state = Rc::new(RefCell::new(KState {
            processes: ProcessTable::new(),
            objects: ObjectManager::new(),
            dkms: Dkms::new(),
            pipeline: PipelineManager::new(),
            boot: handoff,
        }));
        Kernel { state, scheduler: Scheduler::new(), halted: false }
    }

    /// `kernel_panic` (spec §7): logs and halts the scheduler. Every
    /// `tick`/`run_until_idle` call after this returns `KernelPanic`
    /// rather than silently doing nothing.
    pub fn panic(&mut self, message: &str) {
        log::error!("kernel panic: {message}");
        self.halted = true;
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// `kernel_set_log_mode`.
    pub fn kernel_set_log_mode(&mut self, mode: klog::LogMode) {
        klog::set_log_mode(mode);
    }

    /// `process_spawn`: instruments source per its ring, allocates a pid
    /// and synapse token, inherits the parent's handles, and marks the
    /// new task ready (spec §4.3).
    pub fn spawn(
        &mut self,
        source: &str,
        name: &str,
        ring: Ring,
        env: HashMap<String, String>,
        parent: Option<Pid>,
    ) -> KResult<Pid> {
        let body = script::compile_default_body(source, name, ring)?;
        self.spawn_with_body(ring, env, parent, body)
    }

    /// Spawns with an embedder-supplied body instead of compiling
    /// source directly — how drivers and tests inject real behavior
    /// without a real script interpreter (spec §4.5's driver spawn).
    pub fn spawn_with_body(
        &mut self,
        ring: Ring,
        env: HashMap<String, String>,
        parent: Option<Pid>,
        body: TaskBody,
    ) -> KResult<Pid> {
        let pid = {
            let mut state = self.state.borrow_mut();
            let pid = state.processes.allocate_pid();

            let mut process = match parent {
                Some(parent_pid) => {
                    let (parent_uid, parent_gid, parent_handles): (u32, u32, HashMap<String, HandleEntry>) = {
                        let p = state.processes.get(parent_pid).ok_or(KernelError::NotFound)?;
                        (p.uid, p.gid, p.handles.iter().map(|(t, e)| (t.clone(), e.clone())).collect())
                    };
                    let mut process = Process::new(pid, ring, parent, parent_uid, parent_gid);
                    let inherited =
                        object::inherit_handles(&mut state.objects, &parent_handles, &process.synapse_token);
                    for (token, entry) in inherited {
                        process.handles.insert(token, entry);
                    }
                    process
                }
                None => Process::new(pid, ring, parent, 0, 0),
            };
            process.env = env;
            state.processes.insert(process);
            pid
        };

        let ctx = ProcessContext::new(Rc::clone(&self.state), self.scheduler.ready_queue(), pid);
        let future = body(ctx);
        self.scheduler.spawn_task(pid, future);
        Ok(pid)
    }

    /// `create_thread`: a new pid sharing the parent's environment and
    /// synapse token. Thread exit never terminates siblings; the
    /// parent's exit terminates every thread it owns (spec §4.3).
    pub fn create_thread(&mut self, parent: Pid, body: TaskBody) -> KResult<Pid> {
        let pid = {
            let mut state = self.state.borrow_mut();
            let parent_process = state.processes.get(parent).ok_or(KernelError::NotFound)?;
            let ring = parent_process.ring;
            let env = parent_process.env.clone();
            let synapse_token = parent_process.synapse_token.clone();
            let uid = parent_process.uid;
            let gid = parent_process.gid;
            let process_group = parent_process.process_group;

            let pid = state.processes.allocate_pid();
            let mut thread = Process::new(pid, ring, Some(parent), uid, gid);
            thread.is_thread = true;
            thread.synapse_token = synapse_token;
            thread.env = env;
            thread.process_group = process_group;
            state.processes.insert(thread);
            if let Some(parent_process) = state.processes.get_mut(parent) {
                parent_process.threads.push(pid);
            }
            pid
        };

        let ctx = ProcessContext::new(Rc::clone(&self.state), self.scheduler.ready_queue(), pid);
        let future = body(ctx);
        self.scheduler.spawn_task(pid, future);
        Ok(pid)
    }

    /// `process_wait`.
    pub fn wait(&self, target: Pid) -> process::WaitForExit {
        process::WaitForExit::new(Rc::clone(&self.state), target)
    }

    /// Forcibly terminates `pid` outside the normal natural-completion
    /// or watchdog paths — used by `process_kill` (spec §6).
    pub fn force_kill(&mut self, pid: Pid, exit_code: i32) {
        self.scheduler.terminate(&self.state, pid, exit_code);
    }

    pub fn tick(&mut self) -> KResult<TickOutcome> {
        if self.halted {
            return Err(KernelError::KernelPanic);
        }
        Ok(self.scheduler.tick(&self.state))
    }

    pub fn run_until_idle(&mut self) -> KResult<Vec<TickOutcome>> {
        if self.halted {
            return Err(KernelError::KernelPanic);
        }
        Ok(self.scheduler.run_until_idle(&self.state))
    }

    pub fn ready_len(&self) -> usize {
        self.scheduler.ready_len()
    }

    /// The scheduler's ready queue handle, for syscall free functions
    /// that need to wake a pid other than the caller (spec §4.4's object
    /// wake paths) without reaching into `Scheduler` internals directly.
    pub(crate) fn ready_queue(&self) -> scheduler::ReadyQueue {
        self.scheduler.ready_queue()
    }

    /// Marks `pid` ready without resuming it immediately — how a
    /// completed IRP or a signaled object wakes a parked process (spec
    /// §4.5, §4.4) without the syscall layer touching the scheduler's
    /// internals directly.
    pub(crate) fn mark_ready(&mut self, pid: Pid) {
        scheduler::wake(&self.state, &self.scheduler.ready_queue(), pid);
    }
}
