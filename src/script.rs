//! Minimal stand-in for the sandboxed scripting VM (spec §1, §5).
//!
//! The real system hosts every process as a coroutine inside a
//! single-threaded scripting runtime with a dynamic-code loader that
//! routes all compiled chunks through the Preempt Instrumenter (spec
//! §4.1). This kernel core doesn't embed a script interpreter itself —
//! that's an embedder concern, wired in via [`TaskBody`] — but it does
//! own the one contract the rest of the kernel depends on: a process is
//! a [`Future`] that periodically calls back into [`ProcessContext::checkpoint`],
//! and its source must pass through `instrument` before it runs at
//! Ring ≥ 2.5.

use crate::error::KResult;
use crate::instrumenter::{instrument, InstrumentError};
use crate::process::context::ProcessContext;
use crate::process::Ring;
use crate::scheduler::TaskFuture;

/// Source after (if required) passing through the Preempt Instrumenter.
pub struct CompiledScript {
    pub name: String,
    pub source: String,
    pub injection_count: usize,
}

/// `spawn`'s "load file contents ... run them through the Preempt
/// Instrumenter for Ring ≥ 2.5" step (spec §4.3). Rings below 2.5 run
/// unmodified — cooperative yielding is the caller's own responsibility
/// there (spec §4.1 only mandates instrumentation at Ring ≥ 2.5).
pub fn compile(source: &str, name: &str, ring: Ring) -> Result<CompiledScript, InstrumentError> {
    if ring.requires_instrumentation() {
        let (instrumented, injection_count) = instrument(source, name)?;
        Ok(CompiledScript { name: name.to_string(), source: instrumented, injection_count })
    } else {
        Ok(CompiledScript { name: name.to_string(), source: source.to_string(), injection_count: 0 })
    }
}

/// A task's executable body, supplied by the embedder's real script
/// engine: given a [`ProcessContext`] to checkpoint and make syscalls
/// through, produce the future the scheduler polls.
pub type TaskBody = Box<dyn Fn(ProcessContext) -> TaskFuture>;

/// A body for processes that have no embedder-supplied logic (tests,
/// placeholder drivers): calls `checkpoint()` once per instrumented
/// injection point, then exits 0. Exercises the same checkpoint/yield
/// path real script execution would, without needing an interpreter.
pub fn default_body(script: CompiledScript) -> TaskBody {
    Box::new(move |ctx: ProcessContext| {
        let checkpoints = script.injection_count.max(1);
        Box::pin(async move {
            for _ in 0..checkpoints {
                ctx.checkpoint().await;
            }
            0
        })
    })
}

/// Convenience: compile and wrap in one step for the common case.
pub fn compile_default_body(source: &str, name: &str, ring: Ring) -> KResult<TaskBody> {
    let script = compile(source, name, ring).map_err(|_| crate::error::KernelError::InvalidArgument)?;
    Ok(default_body(script))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_below_2_5_skips_instrumentation() {
        let script = compile("while true do end", "loop.lua", Ring::R2).unwrap();
        assert_eq!(script.injection_count, 0);
        assert_eq!(script.source, "while true do end");
    }

    #[test]
    fn ring_3_is_instrumented() {
        let script = compile("while x do foo() end", "loop.lua", Ring::R3).unwrap();
        assert_eq!(script.injection_count, 1);
        assert!(script.source.contains("__pc"));
    }
}
