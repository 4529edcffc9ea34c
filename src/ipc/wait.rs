//! `wait_single` / `wait_multiple` (spec §4.4): evaluates whether a set
//! of dispatcher objects currently satisfies a wait, without owning any
//! scheduling decisions itself (those live in the scheduler module).

use crate::object::{ObjectBody, ObjectId, ObjectManager};

/// Whether a single object is currently "signaled" in the sense relevant
/// to waiting on it. Types with no waitable state (directories, files,
/// devices, drivers, sections) are never signaled.
pub fn is_signaled(manager: &ObjectManager, id: ObjectId) -> bool {
    match manager.header(id).map(|h| &h.body) {
        Some(ObjectBody::Event(e)) => e.signaled,
        Some(ObjectBody::Mutex(m)) => m.owner.is_none(),
        Some(ObjectBody::Semaphore(s)) => s.count > 0,
        Some(ObjectBody::Pipe(p)) => p.buffered() > 0 || p.is_eof(),
        Some(ObjectBody::MessageQueue(q)) => !q.is_empty(),
        Some(ObjectBody::Timer(t)) => t.signaled,
        _ => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// `wait_any`: the lowest-index signaled object.
    Satisfied(usize),
    /// Nothing satisfiable yet; the caller should block.
    Pending,
}

/// Evaluates a `wait_multiple` call against the objects' current state.
/// `wait_all` only reports `Satisfied` when every object is
/// simultaneously signaled (spec: "completes atomically only when every
/// object is simultaneously satisfiable"); `wait_any` reports the lowest
/// index as soon as one is.
pub fn evaluate(manager: &ObjectManager, ids: &[ObjectId], wait_all: bool) -> WaitOutcome {
    if wait_all {
        if ids.iter().all(|id| is_signaled(manager, *id)) {
            WaitOutcome::Satisfied(0)
        } else {
            WaitOutcome::Pending
        }
    } else {
        match ids.iter().position(|id| is_signaled(manager, *id)) {
            Some(index) => WaitOutcome::Satisfied(index),
            None => WaitOutcome::Pending,
        }
    }
}
