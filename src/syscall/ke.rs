//! `ke_*` syscalls: the Kernel IPC primitives (spec §4.4, §6). Every
//! object here is created through the Object Manager and addressed by
//! handle token, same as any other object type.
//!
//! Each immediate operation is a free function over `&KernelHandle` (plus
//! a `ReadyQueue` where it wakes someone) so both [`Kernel`] and a
//! running task's own [`ProcessContext`] can invoke it — see
//! `syscall::signal`'s module doc. The genuinely *blocking* operations
//! (`wait_multiple`/`wait_single` with a timeout, mutex/semaphore
//! acquire, pipe read/write, mqueue receive) are only exposed as async
//! methods on `ProcessContext`: `Kernel` has no running task to suspend,
//! so it keeps the older try-once, non-blocking primitives instead.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use crate::error::{KernelError, KResult};
use crate::ipc::event::{Event, EventKind};
use crate::ipc::mqueue::MessageQueue;
use crate::ipc::mutex::{AcquireOutcome, Mutex};
use crate::ipc::pipe::Pipe;
use crate::ipc::section::Section;
use crate::ipc::semaphore::Semaphore;
use crate::ipc::wait;
use crate::object::security::{Access, SecurityDescriptor};
use crate::object::{ObjectBody, ObjectId};
use crate::process::context::ProcessContext;
use crate::process::{Pid, Ring, WakePredicate};
use crate::scheduler::ReadyQueue;
use crate::time::Monotonic;
use crate::{Kernel, KernelHandle};

/// Every `ke_create_*` mints a fresh object with no namespace entry and
/// a handle owned by the caller, closed over this one path.
fn create_and_handle(state: &KernelHandle, caller: Pid, body: ObjectBody, access: Access) -> KResult<String> {
    let mut state = state.borrow_mut();
    let state = &mut *state;
    let (uid, gid) = {
        let process = state.processes.get(caller).ok_or(KernelError::NotFound)?;
        (process.uid, process.gid)
    };
    let object = state.objects.create_object(body, None, SecurityDescriptor::new(uid, gid, 0o600))?;
    let token = state.objects.create_handle(&mut state.processes, caller, object, access)?;
    // `create_object` already left ref_count = 1 for the caller's own
    // ownership; `create_handle` added the handle's own ref on top of
    // that, matching every other object type's single-handle-out effect.
    Ok(token)
}

fn resolve(state: &KernelHandle, caller: Pid, token: &str, access: Access) -> KResult<ObjectId> {
    let mut state = state.borrow_mut();
    let state = &mut *state;
    let caller_token = state.processes.get(caller).ok_or(KernelError::NotFound)?.synapse_token.clone();
    state.objects.reference_by_handle(&state.processes, caller, token, access, &caller_token)
}

fn ke_create_event(state: &KernelHandle, caller: Pid, manual_reset: bool, initially_signaled: bool) -> KResult<String> {
    super::enter(state, caller, Ring::R3)?;
    let kind = if manual_reset { EventKind::ManualReset } else { EventKind::AutoReset };
    let body = ObjectBody::Event(Event::new(kind, initially_signaled));
    create_and_handle(state, caller, body, Access::READ | Access::WRITE)
}

/// `set_event`: wakes waiters and, for a manual-reset event, leaves it
/// signaled. Every woken pid is marked ready here directly, rather than
/// handed back for the caller to wake — `signal_send`'s
/// mutate-then-`wake` pattern, generalized to every other object type
/// that can unblock a waiter (spec §4.3's sleeping→ready transition).
fn set_event(state: &KernelHandle, ready: &ReadyQueue, caller: Pid, token: &str) -> KResult<Vec<Pid>> {
    super::enter(state, caller, Ring::R3)?;
    let id = resolve(state, caller, token, Access::WRITE)?;
    let woken = {
        let mut s = state.borrow_mut();
        let header = s.objects.header_mut(id).ok_or(KernelError::NotFound)?;
        match &mut header.body {
            ObjectBody::Event(e) => e.set(),
            _ => return Err(KernelError::WrongType),
        }
    };
    for pid in &woken {
        crate::scheduler::wake(state, ready, *pid);
    }
    Ok(woken)
}

fn reset_event(state: &KernelHandle, caller: Pid, token: &str) -> KResult<()> {
    super::enter(state, caller, Ring::R3)?;
    let id = resolve(state, caller, token, Access::WRITE)?;
    let mut state = state.borrow_mut();
    let header = state.objects.header_mut(id).ok_or(KernelError::NotFound)?;
    match &mut header.body {
        ObjectBody::Event(e) => {
            e.reset();
            Ok(())
        }
        _ => Err(KernelError::WrongType),
    }
}

fn pulse_event(state: &KernelHandle, ready: &ReadyQueue, caller: Pid, token: &str) -> KResult<Vec<Pid>> {
    super::enter(state, caller, Ring::R3)?;
    let id = resolve(state, caller, token, Access::WRITE)?;
    let woken = {
        let mut s = state.borrow_mut();
        let header = s.objects.header_mut(id).ok_or(KernelError::NotFound)?;
        match &mut header.body {
            ObjectBody::Event(e) => e.pulse(),
            _ => return Err(KernelError::WrongType),
        }
    };
    for pid in &woken {
        crate::scheduler::wake(state, ready, *pid);
    }
    Ok(woken)
}

fn create_mutex(state: &KernelHandle, caller: Pid) -> KResult<String> {
    super::enter(state, caller, Ring::R3)?;
    create_and_handle(state, caller, ObjectBody::Mutex(Mutex::new()), Access::READ | Access::WRITE)
}

/// `acquire_mutex` isn't listed separately in the glossary alongside
/// `release_mutex`, but a mutex with no way to acquire it is useless; it
/// shares the same handle-resolution path as every other `ke_*`
/// operation. Never blocks: a `Blocked` outcome still enqueues the caller
/// into the mutex's own waiter list (so a later `release` can hand
/// ownership off), matching `Mutex::acquire`'s contract, but it's on the
/// caller to actually suspend — `ProcessContext::acquire_mutex` does that
/// with `MutexAcquireFuture` below.
fn acquire_mutex(state: &KernelHandle, caller: Pid, token: &str) -> KResult<AcquireOutcome> {
    super::enter(state, caller, Ring::R3)?;
    let id = resolve(state, caller, token, Access::WRITE)?;
    let mut state = state.borrow_mut();
    let header = state.objects.header_mut(id).ok_or(KernelError::NotFound)?;
    match &mut header.body {
        ObjectBody::Mutex(m) => Ok(m.acquire(caller)),
        _ => Err(KernelError::WrongType),
    }
}

/// `release_mutex`: wakes the next owner directly if the release handed
/// ownership off to a waiter.
fn release_mutex(state: &KernelHandle, ready: &ReadyQueue, caller: Pid, token: &str) -> KResult<Option<Pid>> {
    super::enter(state, caller, Ring::R3)?;
    let id = resolve(state, caller, token, Access::WRITE)?;
    let next_owner = {
        let mut s = state.borrow_mut();
        let header = s.objects.header_mut(id).ok_or(KernelError::NotFound)?;
        match &mut header.body {
            ObjectBody::Mutex(m) => m.release(caller).map_err(|_| KernelError::AccessDenied)?,
            _ => return Err(KernelError::WrongType),
        }
    };
    if let Some(pid) = next_owner {
        crate::scheduler::wake(state, ready, pid);
    }
    Ok(next_owner)
}

fn create_semaphore(state: &KernelHandle, caller: Pid, initial: u32, max: u32) -> KResult<String> {
    super::enter(state, caller, Ring::R3)?;
    create_and_handle(state, caller, ObjectBody::Semaphore(Semaphore::new(initial, max)), Access::READ | Access::WRITE)
}

fn release_semaphore(state: &KernelHandle, ready: &ReadyQueue, caller: Pid, token: &str, n: u32) -> KResult<Vec<Pid>> {
    super::enter(state, caller, Ring::R3)?;
    let id = resolve(state, caller, token, Access::WRITE)?;
    let woken = {
        let mut s = state.borrow_mut();
        let header = s.objects.header_mut(id).ok_or(KernelError::NotFound)?;
        match &mut header.body {
            ObjectBody::Semaphore(s) => s.release(n),
            _ => return Err(KernelError::WrongType),
        }
    };
    for pid in &woken {
        crate::scheduler::wake(state, ready, *pid);
    }
    Ok(woken)
}

fn create_pipe(state: &KernelHandle, caller: Pid, capacity: usize) -> KResult<String> {
    super::enter(state, caller, Ring::R3)?;
    create_and_handle(state, caller, ObjectBody::Pipe(Pipe::new(capacity)), Access::READ | Access::WRITE)
}

/// Non-blocking `pipe_write`: accepts only what already fits, same as
/// `Pipe::write` itself — the try-once primitive `Kernel` exposes.
/// `ProcessContext::pipe_write` blocks until the rest fits instead.
fn pipe_write(state: &KernelHandle, caller: Pid, token: &str, data: &[u8]) -> KResult<usize> {
    super::enter(state, caller, Ring::R3)?;
    let id = resolve(state, caller, token, Access::WRITE)?;
    let mut state = state.borrow_mut();
    let header = state.objects.header_mut(id).ok_or(KernelError::NotFound)?;
    match &mut header.body {
        ObjectBody::Pipe(p) => p.write(data),
        _ => Err(KernelError::WrongType),
    }
}

fn pipe_read(state: &KernelHandle, caller: Pid, token: &str, max_len: usize) -> KResult<Vec<u8>> {
    super::enter(state, caller, Ring::R3)?;
    let id = resolve(state, caller, token, Access::READ)?;
    let mut state = state.borrow_mut();
    let header = state.objects.header_mut(id).ok_or(KernelError::NotFound)?;
    match &mut header.body {
        ObjectBody::Pipe(p) => Ok(p.read(max_len)),
        _ => Err(KernelError::WrongType),
    }
}

fn create_section(state: &KernelHandle, caller: Pid) -> KResult<String> {
    super::enter(state, caller, Ring::R3)?;
    create_and_handle(state, caller, ObjectBody::Section(Section::new()), Access::READ | Access::WRITE)
}

fn map_section(state: &KernelHandle, caller: Pid, token: &str) -> KResult<()> {
    super::enter(state, caller, Ring::R3)?;
    let id = resolve(state, caller, token, Access::READ)?;
    let mut state = state.borrow_mut();
    let header = state.objects.header_mut(id).ok_or(KernelError::NotFound)?;
    match &mut header.body {
        ObjectBody::Section(s) => {
            s.map(caller);
            Ok(())
        }
        _ => Err(KernelError::WrongType),
    }
}

fn unmap_section(state: &KernelHandle, caller: Pid, token: &str) -> KResult<()> {
    super::enter(state, caller, Ring::R3)?;
    let id = resolve(state, caller, token, Access::READ)?;
    let mut state = state.borrow_mut();
    let header = state.objects.header_mut(id).ok_or(KernelError::NotFound)?;
    match &mut header.body {
        ObjectBody::Section(s) => {
            s.unmap(caller);
            Ok(())
        }
        _ => Err(KernelError::WrongType),
    }
}

fn create_mqueue(state: &KernelHandle, caller: Pid, capacity: usize, max_message_size: usize) -> KResult<String> {
    super::enter(state, caller, Ring::R3)?;
    create_and_handle(
        state,
        caller,
        ObjectBody::MessageQueue(MessageQueue::new(capacity, max_message_size)),
        Access::READ | Access::WRITE,
    )
}

/// `mq_send`: wakes every pending `mq_receive` after a successful send —
/// the message is now visible to them (spec §4.4). Send itself still
/// isn't a blocking operation (a full queue fails with `QuotaExceeded`
/// rather than parking the sender); see DESIGN.md for that scope call.
fn mq_send(state: &KernelHandle, ready: &ReadyQueue, caller: Pid, token: &str, priority: u8, body: Vec<u8>) -> KResult<()> {
    super::enter(state, caller, Ring::R3)?;
    let id = resolve(state, caller, token, Access::WRITE)?;
    let woken = {
        let mut s = state.borrow_mut();
        let header = s.objects.header_mut(id).ok_or(KernelError::NotFound)?;
        match &mut header.body {
            ObjectBody::MessageQueue(q) => {
                q.send(priority, body)?;
                std::mem::take(&mut q.receive_waiters)
            }
            _ => return Err(KernelError::WrongType),
        }
    };
    for pid in woken {
        crate::scheduler::wake(state, ready, pid);
    }
    Ok(())
}

/// Non-blocking `mq_receive`: returns `None` immediately on an empty
/// queue, same try-once contract as `pipe_read`/`acquire_mutex` above.
fn mq_receive(state: &KernelHandle, caller: Pid, token: &str) -> KResult<Option<(u8, Vec<u8>)>> {
    super::enter(state, caller, Ring::R3)?;
    let id = resolve(state, caller, token, Access::READ)?;
    let mut state = state.borrow_mut();
    let header = state.objects.header_mut(id).ok_or(KernelError::NotFound)?;
    match &mut header.body {
        ObjectBody::MessageQueue(q) => Ok(q.receive()),
        _ => Err(KernelError::WrongType),
    }
}

/// One-shot `wait_multiple` evaluation: reports whether the set is
/// satisfied right now, or — if `timeout` is `Some(Duration::ZERO)` — a
/// `Timeout` as soon as it isn't. `Kernel` has no scheduler to suspend
/// against, so any other timeout value just degrades to the immediate
/// check; real blocking with a real deadline only exists through
/// `ProcessContext::wait_multiple`'s `WaitFuture`.
fn wait_multiple(
    state: &KernelHandle,
    caller: Pid,
    tokens: &[&str],
    wait_all: bool,
    timeout: Option<Duration>,
) -> KResult<wait::WaitOutcome> {
    super::enter(state, caller, Ring::R3)?;
    let ids: KResult<Vec<ObjectId>> = tokens.iter().map(|t| resolve(state, caller, t, Access::READ)).collect();
    let ids = ids?;
    let outcome = wait::evaluate(&state.borrow().objects, &ids, wait_all);
    match (outcome, timeout) {
        (wait::WaitOutcome::Pending, Some(d)) if d.is_zero() => Err(KernelError::Timeout),
        _ => Ok(outcome),
    }
}

impl Kernel {
    pub fn ke_create_event(&mut self, caller: Pid, manual_reset: bool, initially_signaled: bool) -> KResult<String> {
        ke_create_event(&self.state, caller, manual_reset, initially_signaled)
    }

    pub fn set_event(&mut self, caller: Pid, token: &str) -> KResult<Vec<Pid>> {
        set_event(&self.state, &self.ready_queue(), caller, token)
    }

    pub fn reset_event(&mut self, caller: Pid, token: &str) -> KResult<()> {
        reset_event(&self.state, caller, token)
    }

    pub fn pulse_event(&mut self, caller: Pid, token: &str) -> KResult<Vec<Pid>> {
        pulse_event(&self.state, &self.ready_queue(), caller, token)
    }

    pub fn create_mutex(&mut self, caller: Pid) -> KResult<String> {
        create_mutex(&self.state, caller)
    }

    pub fn acquire_mutex(&mut self, caller: Pid, token: &str) -> KResult<AcquireOutcome> {
        acquire_mutex(&self.state, caller, token)
    }

    pub fn release_mutex(&mut self, caller: Pid, token: &str) -> KResult<Option<Pid>> {
        release_mutex(&self.state, &self.ready_queue(), caller, token)
    }

    pub fn create_semaphore(&mut self, caller: Pid, initial: u32, max: u32) -> KResult<String> {
        create_semaphore(&self.state, caller, initial, max)
    }

    pub fn release_semaphore(&mut self, caller: Pid, token: &str, n: u32) -> KResult<Vec<Pid>> {
        release_semaphore(&self.state, &self.ready_queue(), caller, token, n)
    }

    pub fn create_pipe(&mut self, caller: Pid, capacity: usize) -> KResult<String> {
        create_pipe(&self.state, caller, capacity)
    }

    pub fn pipe_write(&mut self, caller: Pid, token: &str, data: &[u8]) -> KResult<usize> {
        pipe_write(&self.state, caller, token, data)
    }

    pub fn pipe_read(&mut self, caller: Pid, token: &str, max_len: usize) -> KResult<Vec<u8>> {
        pipe_read(&self.state, caller, token, max_len)
    }

    pub fn create_section(&mut self, caller: Pid) -> KResult<String> {
        create_section(&self.state, caller)
    }

    pub fn map_section(&mut self, caller: Pid, token: &str) -> KResult<()> {
        map_section(&self.state, caller, token)
    }

    pub fn unmap_section(&mut self, caller: Pid, token: &str) -> KResult<()> {
        unmap_section(&self.state, caller, token)
    }

    pub fn create_mqueue(&mut self, caller: Pid, capacity: usize, max_message_size: usize) -> KResult<String> {
        create_mqueue(&self.state, caller, capacity, max_message_size)
    }

    pub fn mq_send(&mut self, caller: Pid, token: &str, priority: u8, body: Vec<u8>) -> KResult<()> {
        mq_send(&self.state, &self.ready_queue(), caller, token, priority, body)
    }

    pub fn mq_receive(&mut self, caller: Pid, token: &str) -> KResult<Option<(u8, Vec<u8>)>> {
        mq_receive(&self.state, caller, token)
    }

    /// `wait_single`: shorthand for `wait_multiple` with one object and
    /// `wait_all = true` (the two are equivalent at n=1).
    pub fn wait_single(&mut self, caller: Pid, token: &str) -> KResult<wait::WaitOutcome> {
        self.wait_multiple(caller, &[token], true, None)
    }

    pub fn wait_multiple(
        &mut self,
        caller: Pid,
        tokens: &[&str],
        wait_all: bool,
        timeout: Option<Duration>,
    ) -> KResult<wait::WaitOutcome> {
        wait_multiple(&self.state, caller, tokens, wait_all, timeout)
    }
}

/// Registers `pid` as interested in `id` becoming signaled, for the
/// object types whose "signaled" state isn't itself consumed by the act
/// of observing it (an `Event` doesn't stop being signaled because
/// something looked; a `Pipe`/`MessageQueue` still needs a separate
/// `read`/`receive` to actually drain). `Mutex`/`Semaphore` are
/// deliberately excluded — see the `WaitFuture` doc comment.
fn register_wait_interest(body: &mut ObjectBody, pid: Pid) {
    match body {
        ObjectBody::Event(e) => e.enqueue_waiter(pid),
        ObjectBody::Pipe(p) => p.read_waiters.push_back(pid),
        ObjectBody::MessageQueue(q) => q.receive_waiters.push(pid),
        _ => {}
    }
}

/// `wait_multiple`/`wait_single` driven by a real future: re-evaluates
/// `wait::evaluate` on every poll, parks the caller (`ProcessStatus::
/// Sleeping`, `WakePredicate::Objects`) the first time it isn't
/// satisfied yet, and — with a `timeout` — resolves to
/// `KernelError::Timeout` once the scheduler's per-tick sweep has woken
/// it past the deadline without the set ever becoming satisfied (spec
/// §4.4).
///
/// Registration only reaches `Event`/`Pipe`/`MessageQueue` (see
/// `register_wait_interest`): a `Mutex`/`Semaphore` in the set still
/// participates in the satisfied check, but since granting either one
/// means directly handing off ownership to a specific waiter (not just
/// flipping a "signaled" bit), mixing that into a multi-object wait
/// could hand ownership to a process that only meant to *observe* it.
/// A waiter blocked solely on a mutex/semaphore here is re-checked
/// whenever anything else in the set wakes it, or its timeout expires —
/// documented as an accepted scope limit in DESIGN.md, not silently
/// dropped behavior.
struct WaitFuture {
    kernel: KernelHandle,
    pid: Pid,
    ids: Vec<ObjectId>,
    wait_all: bool,
    deadline: Option<Monotonic>,
    registered: bool,
}

impl Future for WaitFuture {
    type Output = KResult<wait::WaitOutcome>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut state = this.kernel.borrow_mut();

        let outcome = wait::evaluate(&state.objects, &this.ids, this.wait_all);
        if let wait::WaitOutcome::Satisfied(_) = outcome {
            if let Some(process) = state.processes.get_mut(this.pid) {
                process.unpark();
            }
            return Poll::Ready(Ok(outcome));
        }

        if let Some(deadline) = this.deadline {
            if Monotonic::now() >= deadline {
                if let Some(process) = state.processes.get_mut(this.pid) {
                    process.unpark();
                }
                return Poll::Ready(Err(KernelError::Timeout));
            }
        }

        if !this.registered {
            for &id in &this.ids {
                if let Some(header) = state.objects.header_mut(id) {
                    register_wait_interest(&mut header.body, this.pid);
                }
            }
            if let Some(process) = state.processes.get_mut(this.pid) {
                process.park(
                    WakePredicate::Objects { ids: this.ids.clone(), wait_all: this.wait_all },
                    this.deadline,
                );
            }
            this.registered = true;
        }
        Poll::Pending
    }
}

/// Blocking `acquire_mutex`: the first poll calls `Mutex::acquire`
/// directly, which already enqueues the caller into the mutex's own
/// waiter list on `Blocked` — no separate registration step needed.
/// Later polls just check whether `release` has since made this pid the
/// owner (spec §4.4).
struct MutexAcquireFuture {
    kernel: KernelHandle,
    pid: Pid,
    id: ObjectId,
    requested: bool,
}

impl Future for MutexAcquireFuture {
    type Output = KResult<AcquireOutcome>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut state = this.kernel.borrow_mut();
        let header = match state.objects.header_mut(this.id) {
            Some(h) => h,
            None => return Poll::Ready(Err(KernelError::NotFound)),
        };
        let m = match &mut header.body {
            ObjectBody::Mutex(m) => m,
            _ => return Poll::Ready(Err(KernelError::WrongType)),
        };

        if !this.requested {
            this.requested = true;
            return match m.acquire(this.pid) {
                AcquireOutcome::Blocked => {
                    if let Some(process) = state.processes.get_mut(this.pid) {
                        process.park(WakePredicate::Objects { ids: vec![this.id], wait_all: true }, None);
                    }
                    Poll::Pending
                }
                outcome => Poll::Ready(Ok(outcome)),
            };
        }

        if m.owner == Some(this.pid) {
            let abandoned = m.take_abandoned();
            if let Some(process) = state.processes.get_mut(this.pid) {
                process.unpark();
            }
            Poll::Ready(Ok(if abandoned { AcquireOutcome::Abandoned } else { AcquireOutcome::Acquired }))
        } else {
            Poll::Pending
        }
    }
}

/// Blocking `acquire_semaphore`, mirroring `MutexAcquireFuture`: the
/// semaphore has no owner concept, so "was I granted" is "am I no longer
/// in the waiter list `Semaphore::acquire` pushed me into" rather than an
/// ownership check.
struct SemaphoreAcquireFuture {
    kernel: KernelHandle,
    pid: Pid,
    id: ObjectId,
    requested: bool,
}

impl Future for SemaphoreAcquireFuture {
    type Output = KResult<()>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut state = this.kernel.borrow_mut();
        let header = match state.objects.header_mut(this.id) {
            Some(h) => h,
            None => return Poll::Ready(Err(KernelError::NotFound)),
        };
        let s = match &mut header.body {
            ObjectBody::Semaphore(s) => s,
            _ => return Poll::Ready(Err(KernelError::WrongType)),
        };

        if !this.requested {
            this.requested = true;
            if s.acquire(this.pid) {
                return Poll::Ready(Ok(()));
            }
            if let Some(process) = state.processes.get_mut(this.pid) {
                process.park(WakePredicate::Objects { ids: vec![this.id], wait_all: true }, None);
            }
            return Poll::Pending;
        }

        if s.waiters.contains(&this.pid) {
            Poll::Pending
        } else {
            if let Some(process) = state.processes.get_mut(this.pid) {
                process.unpark();
            }
            Poll::Ready(Ok(()))
        }
    }
}

/// Blocking `pipe_write`: writes as much as currently fits on every
/// poll, parking on `write_waiters` between attempts, until the whole
/// buffer has gone out (spec §4.4: "write blocks on full").
struct PipeWriteFuture {
    kernel: KernelHandle,
    ready: ReadyQueue,
    pid: Pid,
    id: ObjectId,
    data: Vec<u8>,
    written: usize,
    registered: bool,
}

impl Future for PipeWriteFuture {
    type Output = KResult<usize>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut state = this.kernel.borrow_mut();
        let header = match state.objects.header_mut(this.id) {
            Some(h) => h,
            None => return Poll::Ready(Err(KernelError::NotFound)),
        };
        let p = match &mut header.body {
            ObjectBody::Pipe(p) => p,
            _ => return Poll::Ready(Err(KernelError::WrongType)),
        };

        if this.written >= this.data.len() {
            if let Some(process) = state.processes.get_mut(this.pid) {
                process.unpark();
            }
            return Poll::Ready(Ok(this.written));
        }

        match p.write(&this.data[this.written..]) {
            Ok(n) if n > 0 => {
                this.written += n;
                let readers = std::mem::take(&mut p.read_waiters);
                drop(state);
                for reader in readers {
                    crate::scheduler::wake(&this.kernel, &this.ready, reader);
                }
                let mut state = this.kernel.borrow_mut();
                if this.written >= this.data.len() {
                    if let Some(process) = state.processes.get_mut(this.pid) {
                        process.unpark();
                    }
                    return Poll::Ready(Ok(this.written));
                }
                if !this.registered {
                    if let Some(header) = state.objects.header_mut(this.id) {
                        if let ObjectBody::Pipe(p) = &mut header.body {
                            p.write_waiters.push_back(this.pid);
                        }
                    }
                    if let Some(process) = state.processes.get_mut(this.pid) {
                        process.park(WakePredicate::Objects { ids: vec![this.id], wait_all: true }, None);
                    }
                    this.registered = true;
                }
                Poll::Pending
            }
            Ok(_) => {
                if !this.registered {
                    p.write_waiters.push_back(this.pid);
                    if let Some(process) = state.processes.get_mut(this.pid) {
                        process.park(WakePredicate::Objects { ids: vec![this.id], wait_all: true }, None);
                    }
                    this.registered = true;
                }
                Poll::Pending
            }
            Err(e) => Poll::Ready(Err(e)),
        }
    }
}

/// Blocking `pipe_read`: returns as soon as any data (or EOF) is
/// available, otherwise parks on `read_waiters` (spec §4.4: "read blocks
/// on empty").
struct PipeReadFuture {
    kernel: KernelHandle,
    ready: ReadyQueue,
    pid: Pid,
    id: ObjectId,
    max_len: usize,
    registered: bool,
}

impl Future for PipeReadFuture {
    type Output = KResult<Vec<u8>>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut state = this.kernel.borrow_mut();
        let header = match state.objects.header_mut(this.id) {
            Some(h) => h,
            None => return Poll::Ready(Err(KernelError::NotFound)),
        };
        let p = match &mut header.body {
            ObjectBody::Pipe(p) => p,
            _ => return Poll::Ready(Err(KernelError::WrongType)),
        };

        if p.buffered() > 0 {
            let data = p.read(this.max_len);
            let writers = std::mem::take(&mut p.write_waiters);
            if let Some(process) = state.processes.get_mut(this.pid) {
                process.unpark();
            }
            drop(state);
            for writer in writers {
                crate::scheduler::wake(&this.kernel, &this.ready, writer);
            }
            return Poll::Ready(Ok(data));
        }
        if p.is_eof() {
            if let Some(process) = state.processes.get_mut(this.pid) {
                process.unpark();
            }
            return Poll::Ready(Ok(Vec::new()));
        }
        if !this.registered {
            p.read_waiters.push_back(this.pid);
            if let Some(process) = state.processes.get_mut(this.pid) {
                process.park(WakePredicate::Objects { ids: vec![this.id], wait_all: true }, None);
            }
            this.registered = true;
        }
        Poll::Pending
    }
}

/// Blocking `mq_receive`: parks on `receive_waiters` while the queue is
/// empty (spec §4.4).
struct MqueueReceiveFuture {
    kernel: KernelHandle,
    pid: Pid,
    id: ObjectId,
    registered: bool,
}

impl Future for MqueueReceiveFuture {
    type Output = KResult<(u8, Vec<u8>)>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut state = this.kernel.borrow_mut();
        let header = match state.objects.header_mut(this.id) {
            Some(h) => h,
            None => return Poll::Ready(Err(KernelError::NotFound)),
        };
        let q = match &mut header.body {
            ObjectBody::MessageQueue(q) => q,
            _ => return Poll::Ready(Err(KernelError::WrongType)),
        };

        if let Some(message) = q.receive() {
            if let Some(process) = state.processes.get_mut(this.pid) {
                process.unpark();
            }
            return Poll::Ready(Ok(message));
        }
        if !this.registered {
            q.receive_waiters.push(this.pid);
            if let Some(process) = state.processes.get_mut(this.pid) {
                process.park(WakePredicate::Objects { ids: vec![this.id], wait_all: true }, None);
            }
            this.registered = true;
        }
        Poll::Pending
    }
}

impl ProcessContext {
    pub fn ke_create_event(&self, manual_reset: bool, initially_signaled: bool) -> KResult<String> {
        ke_create_event(&self.kernel, self.pid, manual_reset, initially_signaled)
    }

    pub fn set_event(&self, token: &str) -> KResult<Vec<Pid>> {
        set_event(&self.kernel, &self.ready, self.pid, token)
    }

    pub fn reset_event(&self, token: &str) -> KResult<()> {
        reset_event(&self.kernel, self.pid, token)
    }

    pub fn pulse_event(&self, token: &str) -> KResult<Vec<Pid>> {
        pulse_event(&self.kernel, &self.ready, self.pid, token)
    }

    pub fn create_mutex(&self) -> KResult<String> {
        create_mutex(&self.kernel, self.pid)
    }

    /// Blocking mutex acquire (spec §4.4): suspends the task until it
    /// owns the mutex, rather than `Kernel::acquire_mutex`'s try-once
    /// `Blocked` result.
    pub async fn acquire_mutex(&self, token: &str) -> KResult<AcquireOutcome> {
        super::enter(&self.kernel, self.pid, Ring::R3)?;
        let id = resolve(&self.kernel, self.pid, token, Access::WRITE)?;
        MutexAcquireFuture { kernel: self.kernel.clone(), pid: self.pid, id, requested: false }.await
    }

    pub fn release_mutex(&self, token: &str) -> KResult<Option<Pid>> {
        release_mutex(&self.kernel, &self.ready, self.pid, token)
    }

    pub fn create_semaphore(&self, initial: u32, max: u32) -> KResult<String> {
        create_semaphore(&self.kernel, self.pid, initial, max)
    }

    /// Blocking semaphore acquire (spec §4.4).
    pub async fn acquire_semaphore(&self, token: &str) -> KResult<()> {
        super::enter(&self.kernel, self.pid, Ring::R3)?;
        let id = resolve(&self.kernel, self.pid, token, Access::WRITE)?;
        SemaphoreAcquireFuture { kernel: self.kernel.clone(), pid: self.pid, id, requested: false }.await
    }

    pub fn release_semaphore(&self, token: &str, n: u32) -> KResult<Vec<Pid>> {
        release_semaphore(&self.kernel, &self.ready, self.pid, token, n)
    }

    pub fn create_pipe(&self, capacity: usize) -> KResult<String> {
        create_pipe(&self.kernel, self.pid, capacity)
    }

    /// Blocking pipe write: unlike `Kernel::pipe_write`, keeps writing
    /// across wakeups until every byte of `data` has gone out (spec
    /// §4.4: "write blocks on full").
    pub async fn pipe_write(&self, token: &str, data: &[u8]) -> KResult<usize> {
        super::enter(&self.kernel, self.pid, Ring::R3)?;
        let id = resolve(&self.kernel, self.pid, token, Access::WRITE)?;
        PipeWriteFuture {
            kernel: self.kernel.clone(),
            ready: self.ready.clone(),
            pid: self.pid,
            id,
            data: data.to_vec(),
            written: 0,
            registered: false,
        }
        .await
    }

    /// Blocking pipe read: suspends on an empty, still-open pipe instead
    /// of returning zero bytes immediately (spec §4.4: "read blocks on
    /// empty").
    pub async fn pipe_read(&self, token: &str, max_len: usize) -> KResult<Vec<u8>> {
        super::enter(&self.kernel, self.pid, Ring::R3)?;
        let id = resolve(&self.kernel, self.pid, token, Access::READ)?;
        PipeReadFuture { kernel: self.kernel.clone(), ready: self.ready.clone(), pid: self.pid, id, max_len, registered: false }
            .await
    }

    pub fn create_section(&self) -> KResult<String> {
        create_section(&self.kernel, self.pid)
    }

    pub fn map_section(&self, token: &str) -> KResult<()> {
        map_section(&self.kernel, self.pid, token)
    }

    pub fn unmap_section(&self, token: &str) -> KResult<()> {
        unmap_section(&self.kernel, self.pid, token)
    }

    pub fn create_mqueue(&self, capacity: usize, max_message_size: usize) -> KResult<String> {
        create_mqueue(&self.kernel, self.pid, capacity, max_message_size)
    }

    pub fn mq_send(&self, token: &str, priority: u8, body: Vec<u8>) -> KResult<()> {
        mq_send(&self.kernel, &self.ready, self.pid, token, priority, body)
    }

    /// Blocking `mq_receive` (spec §4.4).
    pub async fn mq_receive(&self, token: &str) -> KResult<(u8, Vec<u8>)> {
        super::enter(&self.kernel, self.pid, Ring::R3)?;
        let id = resolve(&self.kernel, self.pid, token, Access::READ)?;
        MqueueReceiveFuture { kernel: self.kernel.clone(), pid: self.pid, id, registered: false }.await
    }

    /// `wait_single`: shorthand for `wait_multiple` with one object and
    /// `wait_all = true`.
    pub async fn wait_single(&self, token: &str, timeout: Option<Duration>) -> KResult<wait::WaitOutcome> {
        self.wait_multiple(&[token], true, timeout).await
    }

    /// Blocking `wait_multiple` (spec §4.4): the real, schedulable
    /// counterpart to `Kernel::wait_multiple`'s one-shot check.
    pub async fn wait_multiple(&self, tokens: &[&str], wait_all: bool, timeout: Option<Duration>) -> KResult<wait::WaitOutcome> {
        super::enter(&self.kernel, self.pid, Ring::R3)?;
        let ids: KResult<Vec<ObjectId>> =
            tokens.iter().map(|t| resolve(&self.kernel, self.pid, t, Access::READ)).collect();
        let ids = ids?;
        let deadline = timeout.map(|d| Monotonic::now() + d);
        WaitFuture { kernel: self.kernel.clone(), pid: self.pid, ids, wait_all, deadline, registered: false }.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BootHandoff;
    use std::collections::HashMap;

    #[test]
    fn event_set_then_wait_single_is_satisfied() {
        let mut kernel = Kernel::boot(BootHandoff::default());
        let pid = kernel.spawn("", "t", Ring::R3, HashMap::new(), None).unwrap();
        let token = kernel.ke_create_event(pid, true, false).unwrap();

        assert_eq!(kernel.wait_single(pid, &token).unwrap(), wait::WaitOutcome::Pending);
        kernel.set_event(pid, &token).unwrap();
        assert_eq!(kernel.wait_single(pid, &token).unwrap(), wait::WaitOutcome::Satisfied(0));
    }

    #[test]
    fn mutex_acquire_then_release_round_trips() {
        let mut kernel = Kernel::boot(BootHandoff::default());
        let pid = kernel.spawn("", "t", Ring::R3, HashMap::new(), None).unwrap();
        let token = kernel.create_mutex(pid).unwrap();

        assert!(matches!(kernel.acquire_mutex(pid, &token).unwrap(), AcquireOutcome::Acquired));
        assert_eq!(kernel.release_mutex(pid, &token).unwrap(), None);
    }

    #[test]
    fn mqueue_send_then_receive_round_trips() {
        let mut kernel = Kernel::boot(BootHandoff::default());
        let pid = kernel.spawn("", "t", Ring::R3, HashMap::new(), None).unwrap();
        let token = kernel.create_mqueue(pid, 4, 64).unwrap();

        kernel.mq_send(pid, &token, 3, b"hi".to_vec()).unwrap();
        assert_eq!(kernel.mq_receive(pid, &token).unwrap(), Some((3, b"hi".to_vec())));
    }
}
