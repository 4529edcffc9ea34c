//! The `\`-rooted object namespace (spec §3, §4.2).

use std::collections::HashMap;

use crate::error::{KernelError, KResult};
use crate::object::ObjectId;

/// Symlink chains longer than this are rejected as `symlink_loop`.
pub const MAX_SYMLINK_DEPTH: u32 = 8;

/// A directory node: children keyed by their path segment.
#[derive(Debug, Default)]
pub struct Directory {
    pub children: HashMap<String, ObjectId>,
}

/// Maps every live path to the object it names, plus the directory tree
/// used to reject `path_exists`/`invalid_path`. Kept separate from the
/// object arena: a path is a property of *naming*, not of the object.
#[derive(Default)]
pub struct Namespace {
    paths: HashMap<String, ObjectId>,
}

fn split_path(path: &str) -> KResult<Vec<&str>> {
    if !path.starts_with('\\') {
        return Err(KernelError::InvalidPath);
    }
    Ok(path.split('\\').filter(|s| !s.is_empty()).collect())
}

impl Namespace {
    pub fn new() -> Self {
        Namespace { paths: HashMap::new() }
    }

    pub fn insert(&mut self, path: &str, id: ObjectId) -> KResult<()> {
        split_path(path)?;
        if self.paths.contains_key(path) {
            return Err(KernelError::PathExists);
        }
        self.paths.insert(path.to_string(), id);
        Ok(())
    }

    pub fn remove(&mut self, path: &str) {
        self.paths.remove(path);
    }

    pub fn path_of(&self, id: ObjectId) -> Option<&str> {
        self.paths.iter().find(|(_, v)| **v == id).map(|(k, _)| k.as_str())
    }

    /// Resolves `path` to an object id, following symlink targets up to
    /// [`MAX_SYMLINK_DEPTH`] times via `resolve_symlink`, which the caller
    /// supplies so the namespace itself need not know about object bodies.
    pub fn resolve(
        &self,
        path: &str,
        mut resolve_symlink: impl FnMut(ObjectId) -> Option<String>,
    ) -> KResult<ObjectId> {
        split_path(path)?;
        let mut current = path.to_string();
        for _ in 0..=MAX_SYMLINK_DEPTH {
            let id = *self.paths.get(&current).ok_or(KernelError::NotFound)?;
            match resolve_symlink(id) {
                Some(target) => current = target,
                None => return Ok(id),
            }
        }
        Err(KernelError::SymlinkLoop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectId;

    #[test]
    fn rejects_non_rooted_paths() {
        let ns = Namespace::new();
        assert!(matches!(
            ns.resolve("dev\\tty", |_| None),
            Err(KernelError::InvalidPath)
        ));
    }

    #[test]
    fn duplicate_insert_is_path_exists() {
        let mut ns = Namespace::new();
        let id = ObjectId::new(0, 0);
        ns.insert("\\dev\\tty", id).unwrap();
        assert!(matches!(ns.insert("\\dev\\tty", id), Err(KernelError::PathExists)));
    }

    #[test]
    fn symlink_chain_resolves_through_target() {
        let mut ns = Namespace::new();
        let real = ObjectId::new(1, 0);
        let link = ObjectId::new(2, 0);
        ns.insert("\\dev\\tty", real).unwrap();
        ns.insert("\\DosDevices\\tty0", link).unwrap();
        let resolved = ns
            .resolve("\\DosDevices\\tty0", |id| {
                if id == link {
                    Some("\\dev\\tty".to_string())
                } else {
                    None
                }
            })
            .unwrap();
        assert_eq!(resolved, real);
    }

    #[test]
    fn self_referential_symlink_loops() {
        let mut ns = Namespace::new();
        let link = ObjectId::new(3, 0);
        ns.insert("\\loop", link).unwrap();
        let result = ns.resolve("\\loop", |_| Some("\\loop".to_string()));
        assert!(matches!(result, Err(KernelError::SymlinkLoop)));
    }
}
