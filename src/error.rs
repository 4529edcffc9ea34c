//! Kernel error taxonomy (spec §7).
//!
//! Every syscall surface returns a [`KResult`]. Errors are values, not
//! exceptions: a numeric `status` plus a human-readable tag, so that a
//! completed IRP's error can be surfaced to its originator verbatim.

use thiserror::Error;

/// Crate-wide result alias.
pub type KResult<T> = Result<T, KernelError>;

/// The kernel's error taxonomy, per spec §7. Not exhaustive by design —
/// new variants may be added as the IRP fabric and drivers grow, but the
/// numeric `status()` of existing variants never changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum KernelError {
    #[error("pending")]
    Pending,
    #[error("timeout")]
    Timeout,
    #[error("access denied")]
    AccessDenied,
    #[error("synapse token mismatch")]
    TokenMismatch,
    #[error("bad handle")]
    BadHandle,
    #[error("not found")]
    NotFound,
    #[error("path already exists")]
    PathExists,
    #[error("invalid path")]
    InvalidPath,
    #[error("wrong object type")]
    WrongType,
    #[error("invalid object type")]
    InvalidType,
    #[error("symlink resolution exceeded depth limit")]
    SymlinkLoop,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("quota exceeded")]
    QuotaExceeded,
    #[error("resource busy")]
    Busy,
    #[error("abandoned mutex")]
    AbandonedMutex,
    #[error("pipe closed")]
    PipeClosed,
    #[error("no driver for device")]
    NoDriver,
    #[error("IRQL_NOT_LESS_OR_EQUAL")]
    IrqlNotLessOrEqual,
    #[error("kernel panic")]
    KernelPanic,
}

impl KernelError {
    /// The numeric status code carried alongside the tag (spec §7).
    pub const fn status(self) -> i32 {
        match self {
            KernelError::Pending => 1,
            KernelError::Timeout => 2,
            KernelError::AccessDenied => 3,
            KernelError::TokenMismatch => 4,
            KernelError::BadHandle => 5,
            KernelError::NotFound => 6,
            KernelError::PathExists => 7,
            KernelError::InvalidPath => 8,
            KernelError::WrongType => 9,
            KernelError::InvalidType => 10,
            KernelError::SymlinkLoop => 11,
            KernelError::InvalidArgument => 12,
            KernelError::QuotaExceeded => 13,
            KernelError::Busy => 14,
            KernelError::AbandonedMutex => 15,
            KernelError::PipeClosed => 16,
            KernelError::NoDriver => 17,
            KernelError::IrqlNotLessOrEqual => 18,
            KernelError::KernelPanic => 19,
        }
    }

    pub const fn tag(self) -> &'static str {
        match self {
            KernelError::Pending => "pending",
            KernelError::Timeout => "timeout",
            KernelError::AccessDenied => "access_denied",
            KernelError::TokenMismatch => "token_mismatch",
            KernelError::BadHandle => "bad_handle",
            KernelError::NotFound => "not_found",
            KernelError::PathExists => "path_exists",
            KernelError::InvalidPath => "invalid_path",
            KernelError::WrongType => "wrong_type",
            KernelError::InvalidType => "invalid_type",
            KernelError::SymlinkLoop => "symlink_loop",
            KernelError::InvalidArgument => "invalid_argument",
            KernelError::QuotaExceeded => "quota_exceeded",
            KernelError::Busy => "busy",
            KernelError::AbandonedMutex => "abandoned_mutex",
            KernelError::PipeClosed => "pipe_closed",
            KernelError::NoDriver => "no_driver",
            KernelError::IrqlNotLessOrEqual => "irql_not_less_or_equal",
            KernelError::KernelPanic => "kernel_panic",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_stable() {
        assert_eq!(KernelError::TokenMismatch.tag(), "token_mismatch");
        assert_eq!(KernelError::NotFound.status(), 6);
    }
}
