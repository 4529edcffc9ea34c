//! Object ownership and the three-triad access check (spec §4.2).

use crate::process::Ring;

/// `{owner_uid, group_gid, mode}` carried in every object header.
#[derive(Debug, Clone, Copy)]
pub struct SecurityDescriptor {
    pub owner_uid: u32,
    pub group_gid: u32,
    pub mode: u32,
    /// An optional minimum ring required to touch the object at all,
    /// independent of the uid/gid mode bits (e.g. `/etc/perms` entries).
    pub required_ring: Option<Ring>,
}

impl SecurityDescriptor {
    pub fn new(owner_uid: u32, group_gid: u32, mode: u32) -> Self {
        SecurityDescriptor { owner_uid, group_gid, mode, required_ring: None }
    }

    pub fn with_required_ring(mut self, ring: Ring) -> Self {
        self.required_ring = Some(ring);
        self
    }
}

bitflags::bitflags! {
    /// Desired/granted access, read low 3 bits like POSIX rwx.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Access: u32 {
        const READ = 0b001;
        const WRITE = 0b010;
        const EXECUTE = 0b100;
    }
}

/// Standard three-triad check: owner/group/other, each occupying three
/// bits of `mode` (owner highest), plus an optional ring floor.
pub fn check_access(
    desc: &SecurityDescriptor,
    caller_uid: u32,
    caller_gid: u32,
    caller_ring: Ring,
    desired: Access,
) -> bool {
    if let Some(required) = desc.required_ring {
        if caller_ring > required {
            return false;
        }
    }

    let granted = if caller_uid == desc.owner_uid {
        (desc.mode >> 6) & 0b111
    } else if caller_gid == desc.group_gid {
        (desc.mode >> 3) & 0b111
    } else {
        desc.mode & 0b111
    };

    granted & desired.bits() == desired.bits()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_gets_owner_triad() {
        let desc = SecurityDescriptor::new(1000, 1000, 0o640);
        assert!(check_access(&desc, 1000, 1000, Ring::R3, Access::READ | Access::WRITE));
        assert!(!check_access(&desc, 1000, 1000, Ring::R3, Access::EXECUTE));
    }

    #[test]
    fn group_and_other_fall_through() {
        let desc = SecurityDescriptor::new(1000, 2000, 0o640);
        assert!(check_access(&desc, 5, 2000, Ring::R3, Access::READ));
        assert!(!check_access(&desc, 5, 2000, Ring::R3, Access::WRITE));
        assert!(!check_access(&desc, 5, 5, Ring::R3, Access::READ));
    }

    #[test]
    fn required_ring_floor_rejects_lower_privilege() {
        let desc = SecurityDescriptor::new(0, 0, 0o777).with_required_ring(Ring::R1);
        assert!(check_access(&desc, 0, 0, Ring::R0, Access::READ));
        assert!(!check_access(&desc, 0, 0, Ring::R2, Access::READ));
    }
}
