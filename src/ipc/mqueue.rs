//! Priority message queue (spec §4.4): bounded capacity, messages ordered
//! by `(priority_desc, enqueue_seq_asc)`.

use std::collections::BinaryHeap;

use crate::error::{KernelError, KResult};
use crate::process::Pid;

#[derive(Debug, Clone)]
struct QueuedMessage {
    priority: u8,
    seq: u64,
    body: Vec<u8>,
}

impl PartialEq for QueuedMessage {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for QueuedMessage {}

impl Ord for QueuedMessage {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Higher priority sorts first; for equal priority, lower seq
        // (enqueued earlier) sorts first — both achieved by reversing
        // seq's natural order against a max-heap.
        self.priority.cmp(&other.priority).then_with(|| other.seq.cmp(&self.seq))
    }
}
impl PartialOrd for QueuedMessage {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug)]
pub struct MessageQueue {
    heap: BinaryHeap<QueuedMessage>,
    next_seq: u64,
    pub capacity: usize,
    pub max_message_size: usize,
    pub receive_waiters: Vec<Pid>,
}

impl MessageQueue {
    pub fn new(capacity: usize, max_message_size: usize) -> Self {
        MessageQueue {
            heap: BinaryHeap::new(),
            next_seq: 0,
            capacity,
            max_message_size,
            receive_waiters: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn send(&mut self, priority: u8, body: Vec<u8>) -> KResult<()> {
        if body.len() > self.max_message_size {
            return Err(KernelError::InvalidArgument);
        }
        if self.heap.len() >= self.capacity {
            return Err(KernelError::QuotaExceeded);
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(QueuedMessage { priority, seq, body });
        Ok(())
    }

    /// `receive`: highest priority first, FIFO tie-break.
    pub fn receive(&mut self) -> Option<(u8, Vec<u8>)> {
        self.heap.pop().map(|m| (m.priority, m.body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receive_orders_by_priority_then_fifo() {
        let mut q = MessageQueue::new(8, 64);
        q.send(1, b"low".to_vec()).unwrap();
        q.send(5, b"high".to_vec()).unwrap();
        q.send(5, b"high-later".to_vec()).unwrap();

        assert_eq!(q.receive(), Some((5, b"high".to_vec())));
        assert_eq!(q.receive(), Some((5, b"high-later".to_vec())));
        assert_eq!(q.receive(), Some((1, b"low".to_vec())));
        assert_eq!(q.receive(), None);
    }

    #[test]
    fn send_past_capacity_errors() {
        let mut q = MessageQueue::new(1, 64);
        q.send(0, b"a".to_vec()).unwrap();
        assert!(matches!(q.send(0, b"b".to_vec()), Err(KernelError::QuotaExceeded)));
    }

    #[test]
    fn oversized_message_errors() {
        let mut q = MessageQueue::new(8, 2);
        assert!(matches!(q.send(0, b"too long".to_vec()), Err(KernelError::InvalidArgument)));
    }
}
