//! POSIX-style signal delivery (spec §4.4).

/// Signal numbers. Matches common POSIX numbering so embedders already
/// familiar with it feel at home; this kernel does not interoperate with
/// a host OS's real signal delivery.
pub type SignalNumber = u32;

pub const SIGHUP: SignalNumber = 1;
pub const SIGINT: SignalNumber = 2;
pub const SIGQUIT: SignalNumber = 3;
pub const SIGKILL: SignalNumber = 9;
pub const SIGUSR1: SignalNumber = 10;
pub const SIGSEGV: SignalNumber = 11;
pub const SIGUSR2: SignalNumber = 12;
pub const SIGPIPE: SignalNumber = 13;
pub const SIGTERM: SignalNumber = 15;
pub const SIGCHLD: SignalNumber = 17;
pub const SIGCONT: SignalNumber = 18;
pub const SIGSTOP: SignalNumber = 19;
pub const SIGTSTP: SignalNumber = 20;

/// SIGKILL and SIGSTOP are uncatchable (spec §4.4): neither can be
/// masked, ignored, or handled.
pub fn is_uncatchable(sig: SignalNumber) -> bool {
    sig == SIGKILL || sig == SIGSTOP
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalDisposition {
    Default,
    Ignore,
    Handler(u64),
}

/// A 32-signal pending set, indexed by signal number bit position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingSignals(pub u32);

impl PendingSignals {
    pub fn set(&mut self, sig: SignalNumber) {
        self.0 |= 1 << sig;
    }

    pub fn clear(&mut self, sig: SignalNumber) {
        self.0 &= !(1 << sig);
    }

    pub fn is_set(&self, sig: SignalNumber) -> bool {
        self.0 & (1 << sig) != 0
    }

    /// The lowest-numbered pending, unmasked signal, if any.
    pub fn lowest_deliverable(&self, mask: SignalMask) -> Option<SignalNumber> {
        for sig in 0..32 {
            if self.is_set(sig) && (!mask.is_masked(sig) || is_uncatchable(sig)) {
                return Some(sig);
            }
        }
        None
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignalMask(pub u32);

impl SignalMask {
    pub fn is_masked(&self, sig: SignalNumber) -> bool {
        self.0 & (1 << sig) != 0
    }

    pub fn mask(&mut self, sig: SignalNumber) {
        if !is_uncatchable(sig) {
            self.0 |= 1 << sig;
        }
    }

    pub fn unmask(&mut self, sig: SignalNumber) {
        self.0 &= !(1 << sig);
    }
}

/// The conventional default action for a signal without a registered
/// handler (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultAction {
    Terminate,
    Ignore,
    Continue,
    Stop,
}

pub fn default_action(sig: SignalNumber) -> DefaultAction {
    match sig {
        SIGCHLD | SIGURG_UNUSED => DefaultAction::Ignore,
        SIGCONT => DefaultAction::Continue,
        SIGSTOP | SIGTSTP => DefaultAction::Stop,
        _ => DefaultAction::Terminate,
    }
}

// Not part of the public signal table; kept so `default_action`'s match
// reads like a real signal-disposition table without adding an unused
// public constant.
const SIGURG_UNUSED: SignalNumber = 0;

/// Moves the lowest-numbered deliverable signal (spec §4.1: "on every
/// `__pc` checkpoint and at each syscall boundary") from the pending set
/// into the process's delivered queue, for the scheduler to act on.
/// SIGKILL bypasses the mask unconditionally.
pub fn deliver_pending(process: &mut super::Process) {
    if process.pending_signals.is_set(SIGKILL) {
        process.pending_signals.clear(SIGKILL);
        process.delivered_signals.push_back(SIGKILL);
        return;
    }

    if let Some(sig) = process.pending_signals.lowest_deliverable(process.signal_mask) {
        process.pending_signals.clear(sig);
        process.delivered_signals.push_back(sig);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kill_and_stop_are_uncatchable() {
        assert!(is_uncatchable(SIGKILL));
        assert!(is_uncatchable(SIGSTOP));
        assert!(!is_uncatchable(SIGTERM));
    }

    #[test]
    fn mask_refuses_uncatchable() {
        let mut mask = SignalMask::default();
        mask.mask(SIGKILL);
        assert!(!mask.is_masked(SIGKILL));
    }

    #[test]
    fn lowest_deliverable_skips_masked() {
        let mut pending = PendingSignals::default();
        pending.set(SIGTERM);
        pending.set(SIGUSR1);
        let mut mask = SignalMask::default();
        mask.mask(SIGTERM);
        assert_eq!(pending.lowest_deliverable(mask), Some(SIGUSR1));
    }

    #[test]
    fn sigkill_always_deliverable_even_if_masked_bit_set() {
        let mut pending = PendingSignals::default();
        pending.set(SIGKILL);
        let mask = SignalMask(1 << SIGKILL); // forging a masked bit directly
        assert_eq!(pending.lowest_deliverable(mask), Some(SIGKILL));
    }
}
