//! A flow-controlled in-memory byte stream: bytes are written on the 'input' side and read in
//!  the same order on the 'output' side. The stream has a fixed capacity, and writes that do not
//!  fit are truncated rather than rejected or blocked.
//!
//! The buffered data is kept as a queue of [Bytes] chunks, one per write. Popping part of a chunk
//!  advances that chunk's start in place, so neither writing nor reading copies the data that
//!  remains buffered.

use std::cmp::min;
use std::collections::VecDeque;
use bytes::{Buf, Bytes, BytesMut};
use tracing::trace;
use crate::safe_converter::SafeCast;

#[derive(Debug)]
pub struct ByteStream {
    capacity: usize,
    chunks: VecDeque<Bytes>,
    /// total length of all chunks - kept explicitly to avoid iterating
    buffered: usize,
    bytes_written: u64,
    bytes_read: u64,
    input_ended: bool,
    error: bool,
}

impl ByteStream {
    pub fn new(capacity: usize) -> ByteStream {
        ByteStream {
            capacity,
            chunks: VecDeque::new(),
            buffered: 0,
            bytes_written: 0,
            bytes_read: 0,
            input_ended: false,
            error: false,
        }
    }

    /// Write as much of `data` as fits, returning the number of bytes that were actually written
    pub fn write(&mut self, data: &[u8]) -> usize {
        let len = min(data.len(), self.remaining_capacity());
        if len == 0 {
            return 0;
        }
        self.write_bytes(Bytes::copy_from_slice(&data[..len]))
    }

    /// Same as [ByteStream::write], but takes ownership of a buffer to avoid copying it
    pub fn write_bytes(&mut self, mut data: Bytes) -> usize {
        let len = min(data.len(), self.remaining_capacity());
        if len < data.len() {
            trace!("byte stream full: truncating write of {} bytes to {}", data.len(), len);
            data.truncate(len);
        }
        if len == 0 {
            return 0;
        }

        self.chunks.push_back(data);
        self.buffered += len;
        self.bytes_written += len.safe_cast();
        len
    }

    /// Returns a copy of up to `len` bytes from the output side without removing them
    pub fn peek_output(&self, len: usize) -> Bytes {
        let len = min(len, self.buffered);

        match self.chunks.front() {
            None => Bytes::new(),
            Some(first) if first.len() >= len => first.slice(..len),
            Some(_) => {
                let mut result = BytesMut::with_capacity(len);
                for chunk in &self.chunks {
                    let remaining = len - result.len();
                    if remaining == 0 {
                        break;
                    }
                    result.extend_from_slice(&chunk[..min(remaining, chunk.len())]);
                }
                result.freeze()
            }
        }
    }

    /// Remove up to `len` bytes from the output side
    pub fn pop_output(&mut self, len: usize) {
        let mut remaining = min(len, self.buffered);
        self.buffered -= remaining;
        self.bytes_read += remaining.safe_cast();

        while remaining > 0 {
            let Some(front) = self.chunks.front_mut() else {
                break;
            };

            if front.len() <= remaining {
                remaining -= front.len();
                self.chunks.pop_front();
            }
            else {
                front.advance(remaining);
                remaining = 0;
            }
        }
    }

    /// Read (i.e. copy and then pop) up to `len` bytes from the output side
    pub fn read(&mut self, len: usize) -> Bytes {
        let result = self.peek_output(len);
        self.pop_output(result.len());
        result
    }

    /// Signal that no more bytes will ever be written. Idempotent.
    pub fn end_input(&mut self) {
        self.input_ended = true;
    }

    pub fn input_ended(&self) -> bool {
        self.input_ended
    }

    /// `true` once the input has ended *and* everything was read
    pub fn eof(&self) -> bool {
        self.input_ended && self.buffer_empty()
    }

    /// Latch the stream into an error state. There is no way back, but bytes that are already
    ///  buffered remain readable.
    pub fn set_error(&mut self) {
        self.error = true;
    }

    pub fn error(&self) -> bool {
        self.error
    }

    pub fn buffer_size(&self) -> usize {
        self.buffered
    }

    pub fn buffer_empty(&self) -> bool {
        self.buffered == 0
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn remaining_capacity(&self) -> usize {
        self.capacity - self.buffered
    }
}
