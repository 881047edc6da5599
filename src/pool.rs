//! Process-wide recycling of decompression state.
//!
//! Extracting objects means standing up a zlib inflater and a read buffer per
//! call; both pools cap at 128 slots and hand slots back out in O(1). Acquire
//! and release never block: lock contention or a full pool behaves like a
//! miss, falling back to a fresh allocation or dropping the slot.

use std::io::{self, Read};
use std::sync::Mutex;

use flate2::{Decompress, FlushDecompress, Status};

use crate::error::{Error, Result};

const POOL_CAPACITY: usize = 128;
const READ_BUF_LEN: usize = 4096;

struct Pool<T> {
    slots: Mutex<Vec<T>>,
}

impl<T> Pool<T> {
    const fn new() -> Pool<T> {
        Pool {
            slots: Mutex::new(Vec::new()),
        }
    }

    fn take(&self) -> Option<T> {
        self.slots.try_lock().ok()?.pop()
    }

    fn put(&self, value: T) {
        if let Ok(mut slots) = self.slots.try_lock() {
            if slots.len() < POOL_CAPACITY {
                slots.push(value);
            }
        }
    }
}

static INFLATERS: Pool<Decompress> = Pool::new();
static BUFFERS: Pool<Vec<u8>> = Pool::new();

fn take_inflater() -> Decompress {
    match INFLATERS.take() {
        Some(mut z) => {
            z.reset(true);
            z
        }
        None => Decompress::new(true),
    }
}

fn take_buffer() -> Vec<u8> {
    let mut buf = BUFFERS.take().unwrap_or_default();
    buf.clear();
    buf.resize(READ_BUF_LEN, 0);
    buf
}

/// A streaming zlib decompressor built from pooled parts.
///
/// Call [`ZlibReader::recycle`] when done with it; a dropped reader simply
/// loses its slots (the pools refill lazily).
pub struct ZlibReader<R: Read> {
    src: R,
    z: Decompress,
    buf: Vec<u8>,
    pos: usize,
    filled: usize,
    src_eof: bool,
    stream_end: bool,
}

impl<R: Read> ZlibReader<R> {
    pub fn new(src: R) -> ZlibReader<R> {
        ZlibReader {
            src,
            z: take_inflater(),
            buf: take_buffer(),
            pos: 0,
            filled: 0,
            src_eof: false,
            stream_end: false,
        }
    }

    /// True once the zlib stream has been fully consumed.
    pub fn stream_end(&self) -> bool {
        self.stream_end
    }

    /// Hands the inflater and buffer back to their pools.
    pub fn recycle(self) {
        INFLATERS.put(self.z);
        BUFFERS.put(self.buf);
    }
}

impl<R: Read> std::fmt::Debug for ZlibReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZlibReader")
            .field("pos", &self.pos)
            .field("filled", &self.filled)
            .field("src_eof", &self.src_eof)
            .field("stream_end", &self.stream_end)
            .finish()
    }
}

impl<R: Read> Read for ZlibReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.stream_end || out.is_empty() {
            return Ok(0);
        }
        loop {
            if self.pos == self.filled && !self.src_eof {
                self.filled = self.src.read(&mut self.buf)?;
                self.pos = 0;
                if self.filled == 0 {
                    self.src_eof = true;
                }
            }
            let flush = if self.src_eof {
                FlushDecompress::Finish
            } else {
                FlushDecompress::None
            };
            let before_in = self.z.total_in();
            let before_out = self.z.total_out();
            let status = self
                .z
                .decompress(&self.buf[self.pos..self.filled], out, flush)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            self.pos += (self.z.total_in() - before_in) as usize;
            let produced = (self.z.total_out() - before_out) as usize;
            if status == Status::StreamEnd {
                self.stream_end = true;
                return Ok(produced);
            }
            if produced > 0 {
                return Ok(produced);
            }
            if self.src_eof {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "truncated zlib stream",
                ));
            }
        }
    }
}

/// Inflates a complete in-memory zlib stream. Trailing bytes after the
/// stream end are ignored, which is what pack extraction relies on: entry
/// slices run to the end of the pack data.
pub fn inflate_all(data: &[u8]) -> Result<Vec<u8>> {
    let mut reader = ZlibReader::new(data);
    let mut out = Vec::new();
    let res = reader.read_to_end(&mut out);
    reader.recycle();
    res.map_err(|e| Error::corrupt(format!("zlib: {e}")))?;
    Ok(out)
}

/// Inflates a stream whose plaintext length is known in advance; a length
/// mismatch is a format violation.
pub fn inflate_exact(data: &[u8], expected: usize) -> Result<Vec<u8>> {
    let out = inflate_all(data)?;
    if out.len() != expected {
        return Err(Error::corrupt(format!(
            "declared size {} but inflated {} bytes",
            expected,
            out.len()
        )));
    }
    Ok(out)
}

/// Inflates at most `max` leading plaintext bytes of a stream, without
/// decompressing the rest. Used to peek a delta's varint header.
pub fn inflate_prefix(data: &[u8], max: usize) -> Result<Vec<u8>> {
    let mut reader = ZlibReader::new(data);
    let mut out = vec![0u8; max];
    let mut have = 0;
    let res = loop {
        match reader.read(&mut out[have..]) {
            Ok(0) => break Ok(()),
            Ok(n) => {
                have += n;
                if have == max {
                    break Ok(());
                }
            }
            Err(e) => break Err(e),
        }
    };
    reader.recycle();
    res.map_err(|e| Error::corrupt(format!("zlib: {e}")))?;
    out.truncate(have);
    Ok(out)
}

#[cfg(test)]
pub(crate) fn drain_for_tests() -> (usize, usize) {
    let a = std::mem::take(&mut *INFLATERS.slots.lock().unwrap()).len();
    let b = std::mem::take(&mut *BUFFERS.slots.lock().unwrap()).len();
    (a, b)
}
