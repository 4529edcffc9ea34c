//! Object Manager: typed objects, namespace, handles, token auth (spec §4.2).

pub mod handle;
pub mod namespace;
pub mod security;

use std::collections::HashMap;

use slab::Slab;

use crate::error::{KernelError, KResult};
use crate::object::handle::{HandleEntry, HANDLE_QUOTA};
use crate::object::namespace::Namespace;
use crate::object::security::{check_access, Access, SecurityDescriptor};
use crate::process::{Pid, ProcessTable, Ring, TRUSTED_PID_THRESHOLD};
use crate::rng::opaque_token;

/// A globally unique object identifier: a slab index plus a generation
/// counter, packed into 64 bits so a stale id from a destroyed object's
/// former slot never aliases the slot's new occupant (spec §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId(u64);

impl ObjectId {
    pub fn new(index: u32, generation: u32) -> Self {
        ObjectId(((index as u64) << 32) | generation as u64)
    }

    fn index(self) -> usize {
        (self.0 >> 32) as usize
    }

    fn generation(self) -> u32 {
        self.0 as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Directory,
    SymbolicLink,
    Device,
    File,
    Driver,
    Event,
    Mutex,
    Semaphore,
    Timer,
    Pipe,
    Section,
    MessageQueue,
}

/// Minimal file body; concrete filesystem formats are out of scope
/// (spec §1) — this only carries enough for a handle to mean something.
#[derive(Debug, Clone)]
pub struct FileBody {
    pub backing_path: String,
    pub cursor: u64,
}

#[derive(Debug, Clone)]
pub struct TimerBody {
    pub periodic: Option<std::time::Duration>,
    pub deadline: Option<crate::time::Monotonic>,
    pub signaled: bool,
}

/// Type-specific payload. IPC primitives and the device/driver bodies
/// are defined in their own modules and simply wrapped here; the Object
/// Manager owns the generic header and lifetime, not the semantics.
pub enum ObjectBody {
    Directory,
    SymbolicLink(String),
    Device(crate::irp::device::DeviceObject),
    Driver(crate::irp::driver::DriverObject),
    File(FileBody),
    Event(crate::ipc::event::Event),
    Mutex(crate::ipc::mutex::Mutex),
    Semaphore(crate::ipc::semaphore::Semaphore),
    Timer(TimerBody),
    Pipe(crate::ipc::pipe::Pipe),
    Section(crate::ipc::section::Section),
    MessageQueue(crate::ipc::mqueue::MessageQueue),
}

impl ObjectBody {
    pub fn object_type(&self) -> ObjectType {
        match self {
            ObjectBody::Directory => ObjectType::Directory,
            ObjectBody::SymbolicLink(_) => ObjectType::SymbolicLink,
            ObjectBody::Device(_) => ObjectType::Device,
            ObjectBody::Driver(_) => ObjectType::Driver,
            ObjectBody::File(_) => ObjectType::File,
            ObjectBody::Event(_) => ObjectType::Event,
            ObjectBody::Mutex(_) => ObjectType::Mutex,
            ObjectBody::Semaphore(_) => ObjectType::Semaphore,
            ObjectBody::Timer(_) => ObjectType::Timer,
            ObjectBody::Pipe(_) => ObjectType::Pipe,
            ObjectBody::Section(_) => ObjectType::Section,
            ObjectBody::MessageQueue(_) => ObjectType::MessageQueue,
        }
    }
}

pub struct ObjectHeader {
    pub object_id: ObjectId,
    pub path: Option<String>,
    pub ref_count: u32,
    pub handle_count: u32,
    pub security: SecurityDescriptor,
    pub permanent: bool,
    pub delete_pending: bool,
    pub body: ObjectBody,
    generation: u32,
}

impl ObjectHeader {
    pub fn object_type(&self) -> ObjectType {
        self.body.object_type()
    }
}

/// Owns every kernel object in a generational slab (spec §9): object ids
/// remain unique for the process's lifetime even after their slot is
/// recycled by a later `create_object`.
#[derive(Default)]
pub struct ObjectManager {
    arena: Slab<ObjectHeader>,
    generations: Vec<u32>,
    namespace: Namespace,
}

impl ObjectManager {
    pub fn new() -> Self {
        ObjectManager { arena: Slab::new(), generations: Vec::new(), namespace: Namespace::new() }
    }

    fn generation_for(&mut self, index: usize) -> u32 {
        if self.generations.len() <= index {
            self.generations.resize(index + 1, 0);
        }
        self.generations[index]
    }

    pub fn header(&self, id: ObjectId) -> Option<&ObjectHeader> {
        let entry = self.arena.get(id.index())?;
        (entry.generation == id.generation()).then_some(entry)
    }

    pub fn header_mut(&mut self, id: ObjectId) -> Option<&mut ObjectHeader> {
        let generation = id.generation();
        let entry = self.arena.get_mut(id.index())?;
        (entry.generation == generation).then_some(entry)
    }

    /// `create_object`: ref=1, handle=0. If `path` is given it is also
    /// registered in the namespace, same as calling `insert_object` right
    /// after (spec §4.2 lists them separately for objects created
    /// unnamed and named into the namespace later).
    pub fn create_object(
        &mut self,
        body: ObjectBody,
        path: Option<&str>,
        security: SecurityDescriptor,
    ) -> KResult<ObjectId> {
        let index = self.arena.vacant_key();
        let generation = self.generation_for(index);
        let id = ObjectId::new(index as u32, generation);
        let header = ObjectHeader {
            object_id: id,
            path: path.map(str::to_string),
            ref_count: 1,
            handle_count: 0,
            security,
            permanent: false,
            delete_pending: false,
            body,
            generation,
        };
        let inserted = self.arena.insert(header);
        debug_assert_eq!(inserted, index);

        if let Some(p) = path {
            if let Err(e) = self.namespace.insert(p, id) {
                self.arena.remove(index);
                return Err(e);
            }
        }
        Ok(id)
    }

    /// `insert_object`: register an already-created object at a path.
    pub fn insert_object(&mut self, id: ObjectId, path: &str) -> KResult<()> {
        self.namespace.insert(path, id)?;
        if let Some(header) = self.header_mut(id) {
            header.path = Some(path.to_string());
        }
        Ok(())
    }

    /// `lookup_object`: resolves `path` (through symlinks, spec §4.2),
    /// bumps `ref_count`, and optionally enforces `expected_type`.
    pub fn lookup_object(
        &mut self,
        path: &str,
        expected_type: Option<ObjectType>,
    ) -> KResult<ObjectId> {
        let id = self.namespace.resolve(path, |candidate| {
            self.header(candidate).and_then(|h| match &h.body {
                ObjectBody::SymbolicLink(target) => Some(target.clone()),
                _ => None,
            })
        })?;

        let header = self.header(id).ok_or(KernelError::NotFound)?;
        if let Some(expected) = expected_type {
            if header.object_type() != expected {
                return Err(KernelError::WrongType);
            }
        }

        let header = self.header_mut(id).expect("checked above");
        header.ref_count += 1;
        Ok(id)
    }

    fn bypasses_token_check(pid: Pid, ring: Ring) -> bool {
        pid < TRUSTED_PID_THRESHOLD || ring == Ring::R0
    }

    /// `create_handle`: bumps `ref_count` and `handle_count`, mints a
    /// fresh token bound to the caller's current synapse token.
    pub fn create_handle(
        &mut self,
        processes: &mut ProcessTable,
        pid: Pid,
        object: ObjectId,
        access: Access,
    ) -> KResult<String> {
        let process = processes.get_mut(pid).ok_or(KernelError::NotFound)?;
        if process.handles.len() >= HANDLE_QUOTA {
            return Err(KernelError::QuotaExceeded);
        }

        let header = self.header_mut(object).ok_or(KernelError::NotFound)?;
        if header.delete_pending {
            return Err(KernelError::NotFound);
        }
        header.ref_count += 1;
        header.handle_count += 1;

        let token = opaque_token("h");
        process.handles.insert(
            token.clone(),
            HandleEntry {
                object,
                granted_access: access,
                bound_synapse_token: process.synapse_token.clone(),
            },
        );
        Ok(token)
    }

    /// `open_handle`: resolve `path`, access-check against the caller's
    /// `(uid, gid, ring)`, then behave like `create_handle`.
    pub fn open_handle(
        &mut self,
        processes: &mut ProcessTable,
        pid: Pid,
        path: &str,
        desired_access: Access,
    ) -> KResult<String> {
        let (uid, gid, ring) = {
            let process = processes.get(pid).ok_or(KernelError::NotFound)?;
            (process.uid, process.gid, process.ring)
        };

        let id = self.lookup_object(path, None)?;
        let header = self.header(id).expect("just looked up");
        if !check_access(&header.security, uid, gid, ring, desired_access) {
            self.dereference(id);
            return Err(KernelError::AccessDenied);
        }

        let token = self.create_handle(processes, pid, id, desired_access);
        // `create_handle` adds its own ref; release the transient one
        // `lookup_object` added above regardless of the outcome.
        self.dereference(id);
        token
    }

    /// `reference_by_handle`: validates the handle's bound synapse token
    /// (unless the caller bypasses the check, spec §4.2) and that the
    /// granted access covers `access`, then bumps `ref_count`.
    pub fn reference_by_handle(
        &mut self,
        processes: &ProcessTable,
        pid: Pid,
        token: &str,
        access: Access,
        caller_token: &str,
    ) -> KResult<ObjectId> {
        let process = processes.get(pid).ok_or(KernelError::NotFound)?;
        let entry = process.handles.get(token).ok_or(KernelError::BadHandle)?;

        if !Self::bypasses_token_check(pid, process.ring) && entry.bound_synapse_token != caller_token {
            return Err(KernelError::TokenMismatch);
        }
        if !entry.granted_access.contains(access) {
            return Err(KernelError::AccessDenied);
        }

        let object = entry.object;
        let header = self.header_mut(object).ok_or(KernelError::NotFound)?;
        header.ref_count += 1;
        Ok(object)
    }

    /// `close_handle`: removes the entry and releases its ref and handle
    /// counts, finalizing the object if that brings both to zero.
    pub fn close_handle(
        &mut self,
        processes: &mut ProcessTable,
        pid: Pid,
        token: &str,
    ) -> KResult<()> {
        let process = processes.get_mut(pid).ok_or(KernelError::NotFound)?;
        let entry = process.handles.remove(token).ok_or(KernelError::BadHandle)?;

        if let Some(header) = self.header_mut(entry.object) {
            header.ref_count = header.ref_count.saturating_sub(1);
            header.handle_count = header.handle_count.saturating_sub(1);
        }
        self.finalize_if_unreferenced(entry.object);
        Ok(())
    }

    /// `dereference`: drop a transient reference obtained outside a
    /// handle (e.g. from `lookup_object`), without touching handle_count.
    pub fn dereference(&mut self, id: ObjectId) {
        if let Some(header) = self.header_mut(id) {
            header.ref_count = header.ref_count.saturating_sub(1);
        }
        self.finalize_if_unreferenced(id);
    }

    /// Marks an object for destruction once both counts reach zero,
    /// without destroying it immediately if a handle is still open
    /// (spec §3's `delete_pending`).
    pub fn mark_delete_pending(&mut self, id: ObjectId) {
        if let Some(header) = self.header_mut(id) {
            header.delete_pending = true;
        }
        self.finalize_if_unreferenced(id);
    }

    fn finalize_if_unreferenced(&mut self, id: ObjectId) {
        let should_finalize = match self.header(id) {
            Some(h) => h.ref_count == 0 && h.handle_count == 0 && !h.permanent,
            None => false,
        };
        if !should_finalize {
            return;
        }

        let index = id.index();
        if let Some(path) = self.arena[index].path.clone() {
            self.namespace.remove(&path);
        }
        self.arena.remove(index);
        self.generations[index] = self.generations[index].wrapping_add(1);
    }

    pub fn type_of(&self, id: ObjectId) -> Option<ObjectType> {
        self.header(id).map(|h| h.object_type())
    }

    /// Releases every handle in a dying process's table directly,
    /// without a `ProcessTable` lookup — used when the process has
    /// already been removed from the table (spec §4.3: "resources held
    /// by it are released").
    pub fn release_all_handles(&mut self, handles: &handle::HandleTable) {
        let objects: Vec<ObjectId> = handles.iter().map(|(_, entry)| entry.object).collect();
        for id in objects {
            if let Some(header) = self.header_mut(id) {
                header.ref_count = header.ref_count.saturating_sub(1);
                header.handle_count = header.handle_count.saturating_sub(1);
            }
            self.finalize_if_unreferenced(id);
        }
    }

    /// Hands every mutex `pid` still owns to its next waiter, marked
    /// abandoned (spec §4.3/§4.4). Returns `(mutex, new_owner)` pairs so
    /// the scheduler can wake the new owners.
    pub fn release_mutexes_owned_by(&mut self, pid: Pid) -> Vec<(ObjectId, Option<Pid>)> {
        let ids: Vec<ObjectId> = self
            .arena
            .iter()
            .filter_map(|(_, h)| match &h.body {
                ObjectBody::Mutex(m) if m.owner == Some(pid) => Some(h.object_id),
                _ => None,
            })
            .collect();

        ids.into_iter()
            .map(|id| {
                let next = match self.header_mut(id) {
                    Some(header) => match &mut header.body {
                        ObjectBody::Mutex(m) => m.release_on_owner_death(),
                        _ => None,
                    },
                    None => None,
                };
                (id, next)
            })
            .collect()
    }
}

/// Duplicates a parent's inheritable handles into `child` (spec §4.2's
/// spawn-time handle inheritance): bumps the object's ref/handle counts
/// and mints a fresh token bound to the child's synapse token.
pub fn inherit_handles(
    manager: &mut ObjectManager,
    parent_handles: &HashMap<String, HandleEntry>,
    child_synapse_token: &str,
) -> HashMap<String, HandleEntry> {
    let mut out = HashMap::new();
    for entry in parent_handles.values() {
        if let Some(header) = manager.header_mut(entry.object) {
            header.ref_count += 1;
            header.handle_count += 1;
        }
        let token = opaque_token("h");
        out.insert(
            token,
            HandleEntry {
                object: entry.object,
                granted_access: entry.granted_access,
                bound_synapse_token: child_synapse_token.to_string(),
            },
        );
    }
    out
}
