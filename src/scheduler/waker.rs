//! Per-process wakers (spec §5): waking a task marks its pid ready again
//! in the scheduler's ready queue rather than touching its future
//! directly.
//!
//! `std::task::Wake` requires `Arc` (and therefore `Send + Sync`), which
//! doesn't fit a single-threaded, `Rc`-based kernel. A hand-rolled
//! `RawWaker` over `Rc` is the standard way single-threaded executors
//! get a `Waker` without paying for atomics they'll never need.

use std::rc::Rc;
use std::task::{RawWaker, RawWakerVTable, Waker};

use crate::process::Pid;

use super::ReadyQueue;

struct TaskWaker {
    pid: Pid,
    ready: ReadyQueue,
}

unsafe fn clone_raw(data: *const ()) -> RawWaker {
    let rc = Rc::from_raw(data as *const TaskWaker);
    let cloned = Rc::clone(&rc);
    std::mem::forget(rc);
    RawWaker::new(Rc::into_raw(cloned) as *const (), &VTABLE)
}

unsafe fn wake_raw(data: *const ()) {
    let rc = Rc::from_raw(data as *const TaskWaker);
    rc.ready.borrow_mut().mark_ready(rc.pid);
}

unsafe fn wake_by_ref_raw(data: *const ()) {
    let rc = Rc::from_raw(data as *const TaskWaker);
    rc.ready.borrow_mut().mark_ready(rc.pid);
    std::mem::forget(rc);
}

unsafe fn drop_raw(data: *const ()) {
    drop(Rc::from_raw(data as *const TaskWaker));
}

static VTABLE: RawWakerVTable = RawWakerVTable::new(clone_raw, wake_raw, wake_by_ref_raw, drop_raw);

/// Builds a `Waker` that, when woken, marks `pid` ready in `ready`.
pub fn create_waker(pid: Pid, ready: ReadyQueue) -> Waker {
    let rc = Rc::new(TaskWaker { pid, ready });
    let raw = RawWaker::new(Rc::into_raw(rc) as *const (), &VTABLE);
    unsafe { Waker::from_raw(raw) }
}
