//! Fixed-capacity ring-buffer pipe (spec §4.4).

use std::collections::VecDeque;

use crate::error::{KernelError, KResult};
use crate::process::Pid;

#[derive(Debug)]
pub struct Pipe {
    buffer: VecDeque<u8>,
    capacity: usize,
    write_open: bool,
    read_open: bool,
    pub read_waiters: VecDeque<Pid>,
    pub write_waiters: VecDeque<Pid>,
}

impl Pipe {
    pub fn new(capacity: usize) -> Self {
        Pipe {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
            write_open: true,
            read_open: true,
            read_waiters: VecDeque::new(),
            write_waiters: VecDeque::new(),
        }
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn free_capacity(&self) -> usize {
        self.capacity - self.buffer.len()
    }

    /// Writes as much of `data` as fits without blocking; returns the
    /// number of bytes accepted. Writing to a closed read end is an
    /// error (spec §4.4: "delivers a pipe signal to the writer").
    pub fn write(&mut self, data: &[u8]) -> KResult<usize> {
        if !self.read_open {
            return Err(KernelError::PipeClosed);
        }
        let n = data.len().min(self.free_capacity());
        self.buffer.extend(data[..n].iter().copied());
        Ok(n)
    }

    /// Reads up to `max_len` bytes. Once the write end is closed and the
    /// buffer has drained, reads return `Ok(0)` (EOF) rather than block.
    pub fn read(&mut self, max_len: usize) -> Vec<u8> {
        let n = max_len.min(self.buffer.len());
        self.buffer.drain(..n).collect()
    }

    pub fn is_eof(&self) -> bool {
        !self.write_open && self.buffer.is_empty()
    }

    pub fn close_write(&mut self) {
        self.write_open = false;
    }

    pub fn close_read(&mut self) {
        self.read_open = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_never_exceeds_capacity() {
        let mut p = Pipe::new(4);
        let written = p.write(b"hello world").unwrap();
        assert_eq!(written, 4);
        assert_eq!(p.buffered(), 4);
    }

    #[test]
    fn bytes_written_equal_bytes_readable_plus_buffered() {
        let mut p = Pipe::new(8);
        p.write(b"abcd").unwrap();
        let read = p.read(2);
        assert_eq!(read, b"ab");
        assert_eq!(p.buffered(), 2);
    }

    #[test]
    fn eof_after_write_end_closed_and_drained() {
        let mut p = Pipe::new(4);
        p.write(b"ab").unwrap();
        p.close_write();
        assert!(!p.is_eof());
        p.read(2);
        assert!(p.is_eof());
    }

    #[test]
    fn write_to_closed_read_end_errors() {
        let mut p = Pipe::new(4);
        p.close_read();
        assert!(matches!(p.write(b"x"), Err(KernelError::PipeClosed)));
    }
}
