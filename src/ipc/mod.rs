//! Kernel IPC: events, mutexes, semaphores, pipes, sections, message
//! queues, and multi-object wait (spec §4.4).

pub mod event;
pub mod mqueue;
pub mod mutex;
pub mod pipe;
pub mod section;
pub mod semaphore;
pub mod wait;
