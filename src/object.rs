use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::mem;

use crate::error::{Error, Result};
use crate::id::ObjectId;
use crate::pool::{inflate_all, inflate_exact, ZlibReader};
use crate::store::delta;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Commit,
    Tree,
    Blob,
    Tag,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Commit => "commit",
            ObjectKind::Tree => "tree",
            ObjectKind::Blob => "blob",
            ObjectKind::Tag => "tag",
        }
    }

    /// The textual form used in loose object headers.
    pub fn from_bytes(name: &[u8]) -> Option<ObjectKind> {
        match name {
            b"commit" => Some(ObjectKind::Commit),
            b"tree" => Some(ObjectKind::Tree),
            b"blob" => Some(ObjectKind::Blob),
            b"tag" => Some(ObjectKind::Tag),
            _ => None,
        }
    }

    /// The 3-bit type from a packed object header. 6 and 7 are deltas, not
    /// object kinds, and 0/5 are reserved.
    pub fn from_pack_type(t: u8) -> Option<ObjectKind> {
        match t {
            1 => Some(ObjectKind::Commit),
            2 => Some(ObjectKind::Tree),
            3 => Some(ObjectKind::Blob),
            4 => Some(ObjectKind::Tag),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A materialised-on-demand object handle.
///
/// The payload reader yields exactly `size` bytes of uncompressed content and
/// is consumed once, linearly. `close()` returns pooled decompression state;
/// a handle that is dropped instead closes itself. Reads after close fail.
///
/// Packed objects borrow the owning pack's mapping; loose objects own their
/// file handle outright.
#[derive(Debug)]
pub struct Object<'a> {
    pub id: ObjectId,
    pub kind: ObjectKind,
    pub size: u32,
    state: ReaderState<'a>,
}

#[derive(Debug)]
enum ReaderState<'a> {
    /// Loose file, decompressor positioned just past the `<kind> <size>\0`
    /// prefix.
    LooseStream { z: ZlibReader<File>, remaining: u64 },
    /// Non-delta packed object, decompressing lazily out of the pack map.
    PackStream {
        z: ZlibReader<&'a [u8]>,
        remaining: u64,
    },
    /// Delta chain, everything still compressed. `deltas` is ordered
    /// outermost first; `base` is the concrete object at the chain's end.
    DeltaPending {
        base: &'a [u8],
        base_size: u32,
        deltas: Vec<&'a [u8]>,
    },
    /// Reconstructed delta result being streamed out.
    Materialized { buf: Vec<u8>, pos: usize },
    Released,
}

impl<'a> Object<'a> {
    pub(crate) fn from_loose(
        id: ObjectId,
        kind: ObjectKind,
        size: u32,
        z: ZlibReader<File>,
    ) -> Object<'a> {
        Object {
            id,
            kind,
            size,
            state: ReaderState::LooseStream {
                z,
                remaining: size as u64,
            },
        }
    }

    pub(crate) fn from_pack(
        id: ObjectId,
        kind: ObjectKind,
        size: u32,
        z: ZlibReader<&'a [u8]>,
    ) -> Object<'a> {
        Object {
            id,
            kind,
            size,
            state: ReaderState::PackStream {
                z,
                remaining: size as u64,
            },
        }
    }

    pub(crate) fn from_delta(
        id: ObjectId,
        kind: ObjectKind,
        result_size: u32,
        base: &'a [u8],
        base_size: u32,
        deltas: Vec<&'a [u8]>,
    ) -> Object<'a> {
        Object {
            id,
            kind,
            size: result_size,
            state: ReaderState::DeltaPending {
                base,
                base_size,
                deltas,
            },
        }
    }

    /// Reads the remaining payload into an owned buffer.
    pub fn read_to_end_owned(&mut self) -> Result<Vec<u8>> {
        if matches!(self.state, ReaderState::Released) {
            return Err(Error::Closed);
        }
        let mut out = Vec::with_capacity(self.size as usize);
        match Read::read_to_end(self, &mut out) {
            Ok(_) => Ok(out),
            Err(e) => Err(demote_io(e)),
        }
    }

    /// Releases pooled readers and any per-call resources. Idempotent.
    pub fn close(&mut self) {
        match mem::replace(&mut self.state, ReaderState::Released) {
            ReaderState::LooseStream { z, .. } => z.recycle(),
            ReaderState::PackStream { z, .. } => z.recycle(),
            _ => {}
        }
    }

    /// Inflate the base, then fold the deltas over it innermost-first.
    fn materialize(&mut self) -> Result<()> {
        let state = mem::replace(&mut self.state, ReaderState::Released);
        let ReaderState::DeltaPending {
            base,
            base_size,
            deltas,
        } = state
        else {
            unreachable!("materialize outside DeltaPending");
        };
        let mut buf = inflate_exact(base, base_size as usize)?;
        for compressed in deltas.iter().rev() {
            let delta = inflate_all(compressed)?;
            buf = delta::apply(&buf, &delta)?;
        }
        if buf.len() != self.size as usize {
            return Err(Error::corrupt(format!(
                "delta chain produced {} bytes, expected {}",
                buf.len(),
                self.size
            )));
        }
        self.state = ReaderState::Materialized { buf, pos: 0 };
        Ok(())
    }
}

fn stream_read<R: Read>(
    z: &mut ZlibReader<R>,
    remaining: &mut u64,
    out: &mut [u8],
) -> io::Result<usize> {
    if *remaining == 0 {
        return Ok(0);
    }
    let want = out.len().min(*remaining as usize);
    let n = z.read(&mut out[..want])?;
    if n == 0 && want > 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "object stream ended before declared size",
        ));
    }
    *remaining -= n as u64;
    Ok(n)
}

/// Reader-side errors fold back into the store taxonomy: zlib and truncation
/// failures are corruption, everything else is io.
fn demote_io(e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => Error::corrupt(e.to_string()),
        _ => Error::Io(e),
    }
}

impl Read for Object<'_> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if matches!(self.state, ReaderState::DeltaPending { .. }) {
            self.materialize()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        }
        match &mut self.state {
            ReaderState::LooseStream { z, remaining } => stream_read(z, remaining, out),
            ReaderState::PackStream { z, remaining } => stream_read(z, remaining, out),
            ReaderState::DeltaPending { .. } => unreachable!("materialized above"),
            ReaderState::Materialized { buf, pos } => {
                let n = out.len().min(buf.len() - *pos);
                out[..n].copy_from_slice(&buf[*pos..*pos + n]);
                *pos += n;
                Ok(n)
            }
            ReaderState::Released => Err(io::Error::new(
                io::ErrorKind::Other,
                Error::Closed.to_string(),
            )),
        }
    }
}

impl Drop for Object<'_> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn deflate(data: &[u8]) -> Vec<u8> {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn blob_id() -> ObjectId {
        ObjectId::from_hex("2e65efe2a145dda7ee51d1741299f848e5bf752e").unwrap()
    }

    #[test]
    fn pack_stream_yields_declared_size() {
        let packed = deflate(b"test content\n");
        let z = ZlibReader::new(&packed[..]);
        let mut obj = Object::from_pack(blob_id(), ObjectKind::Blob, 13, z);
        assert_eq!(obj.read_to_end_owned().unwrap(), b"test content\n");
    }

    #[test]
    fn close_then_read_fails() {
        let packed = deflate(b"x");
        let z = ZlibReader::new(&packed[..]);
        let mut obj = Object::from_pack(blob_id(), ObjectKind::Blob, 1, z);
        obj.close();
        obj.close(); // idempotent
        match obj.read_to_end_owned() {
            Err(Error::Closed) => {}
            other => panic!("expected Closed, got {other:?}"),
        }
    }

    #[test]
    fn short_stream_is_corrupt() {
        let packed = deflate(b"abc");
        let z = ZlibReader::new(&packed[..]);
        // declared size larger than the stream delivers
        let mut obj = Object::from_pack(blob_id(), ObjectKind::Blob, 9, z);
        match obj.read_to_end_owned() {
            Err(Error::Corrupt(_)) => {}
            other => panic!("expected Corrupt, got {other:?}"),
        }
    }

    #[test]
    fn kind_tables() {
        assert_eq!(ObjectKind::from_pack_type(2), Some(ObjectKind::Tree));
        assert_eq!(ObjectKind::from_pack_type(6), None);
        assert_eq!(ObjectKind::from_bytes(b"tag"), Some(ObjectKind::Tag));
        assert_eq!(ObjectKind::from_bytes(b"commitx"), None);
    }
}
