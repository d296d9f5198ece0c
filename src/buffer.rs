// Copyright 2024 PaxLight Project Authors. Licensed under Apache-2.0.

//! Byte buffer primitives underlying all binary I/O in the engine.
//!
//! [`OutputBuffer`] is the write-side accumulation buffer for column data
//! and headers; it tracks how many bytes were appended since the last query,
//! which drives the writer's uncompressed-size accounting. [`InputBuffer`]
//! wraps a decompressed column payload and supports clamped forward/backward
//! cursor moves, which is what makes row-level `sync` cheap.

use bytes::buf::UninitSlice;
use bytes::BufMut;

/// Growable output buffer. Capacity doubles on overflow (delegated to the
/// backing `Vec`); `reset` keeps the allocation for row-group reuse.
#[derive(Debug, Default)]
pub struct OutputBuffer {
    data: Vec<u8>,
    appended: usize,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            appended: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Exact-length copy of the buffered bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.data.clone()
    }

    /// Move the buffered bytes out, leaving the buffer empty but allocated.
    pub fn take(&mut self) -> Vec<u8> {
        self.appended = 0;
        std::mem::take(&mut self.data)
    }

    /// Bytes appended since the previous call. Resets the counter.
    pub fn take_count(&mut self) -> usize {
        std::mem::take(&mut self.appended)
    }

    /// Clear the length without deallocating.
    pub fn reset(&mut self) {
        self.data.clear();
        self.appended = 0;
    }
}

unsafe impl BufMut for OutputBuffer {
    fn remaining_mut(&self) -> usize {
        self.data.remaining_mut()
    }

    unsafe fn advance_mut(&mut self, cnt: usize) {
        self.data.advance_mut(cnt);
        self.appended += cnt;
    }

    fn chunk_mut(&mut self) -> &mut UninitSlice {
        self.data.chunk_mut()
    }
}

/// Seekable input buffer over an owned byte payload.
///
/// Unlike a generic stream skip, `skip` and `rewind` clamp at the buffer
/// bounds instead of failing; `rebind` swaps in a new payload without
/// recreating the reader object, which the column reader uses when moving
/// to the next row group.
#[derive(Debug, Default)]
pub struct InputBuffer {
    data: Vec<u8>,
    pos: usize,
}

impl InputBuffer {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Rebind to a new payload, rewinding to the start.
    pub fn rebind(&mut self, data: Vec<u8>) {
        self.data = data;
        self.pos = 0;
    }

    /// Advance the cursor by up to `n` bytes, clamped at the end.
    /// Returns the number of bytes actually skipped.
    pub fn skip(&mut self, n: usize) -> usize {
        let step = n.min(self.remaining());
        self.pos += step;
        step
    }

    /// Move the cursor back by up to `n` bytes, clamped at the start.
    /// Returns the number of bytes actually rewound.
    pub fn rewind(&mut self, n: usize) -> usize {
        let step = n.min(self.pos);
        self.pos -= step;
        step
    }

    /// Borrow the next `n` bytes and advance past them. `None` when fewer
    /// than `n` bytes remain.
    pub fn read_slice(&mut self, n: usize) -> Option<&[u8]> {
        if self.remaining() < n {
            return None;
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Some(slice)
    }
}
