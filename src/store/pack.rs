//! Pack files and their v2 indexes.
//!
//! The index is parsed eagerly but cheaply: the mapping is retained and the
//! fan-out, CID, CRC, and offset tables are addressed as slices into it. The
//! companion pack file is only mapped once the first object is extracted
//! from it.

use std::cmp::Ordering;
use std::path::Path;

use sha1::{Digest, Sha1};

use crate::error::{Error, Result};
use crate::id::{ObjectId, RAW_ID_LEN};
use crate::mmap::{Mapped, MIN_MAPPED_LEN};
use crate::object::{Object, ObjectKind};
use crate::pool::{inflate_prefix, ZlibReader};
use crate::store::delta;

pub const PACK_MAGIC: &[u8; 4] = b"PACK";
// "\377tOc"
const IDX_MAGIC: u32 = 0xff744f63;
const IDX_HEADER_LEN: usize = 8;
const FANOUT_LEN: usize = 256 * 4;
/// Pack digest plus index digest.
const IDX_TRAILER_LEN: usize = 2 * RAW_ID_LEN;
const PACK_TRAILER_LEN: usize = RAW_ID_LEN;

const OBJ_OFS_DELTA: u8 = 6;
const OBJ_REF_DELTA: u8 = 7;

fn read_be32(data: &[u8], at: usize) -> u32 {
    u32::from_be_bytes(data[at..at + 4].try_into().unwrap())
}

/// Compares the stored trailing digest against SHA-1 of everything before it.
fn verify_trailer(data: &[u8], what: &str) -> Result<()> {
    let split = data.len() - RAW_ID_LEN;
    let digest = Sha1::digest(&data[..split]);
    if digest.as_slice() != &data[split..] {
        return Err(Error::corrupt(format!("{what}: trailing digest mismatch")));
    }
    Ok(())
}

fn size_to_u32(size: u64, what: &str) -> Result<u32> {
    u32::try_from(size).map_err(|_| Error::corrupt(format!("{what} size {size} overflows u32")))
}

/// A parsed `pack-*.idx`, format v2.
#[derive(Debug)]
pub struct PackIndex {
    data: Mapped,
    count: usize,
    oid_table: usize,
    crc_table: usize,
    offset_table: usize,
}

impl PackIndex {
    pub fn open(path: &Path, verify: bool) -> Result<PackIndex> {
        let data = Mapped::open(path, MIN_MAPPED_LEN)?;
        if data.len() < IDX_HEADER_LEN + FANOUT_LEN + IDX_TRAILER_LEN {
            return Err(Error::corrupt(format!(
                "pack index {} too small for fan-out table",
                path.display()
            )));
        }
        if read_be32(&data, 0) != IDX_MAGIC {
            return Err(Error::corrupt(format!(
                "bad pack index magic in {}",
                path.display()
            )));
        }
        let version = read_be32(&data, 4);
        if version != 2 {
            return Err(Error::Unsupported("pack index versions other than 2"));
        }
        if verify {
            verify_trailer(&data, "pack index")?;
        }

        // Fan-out cells are cumulative; the last one is the entry count.
        let mut prev = 0u32;
        for i in 0..256 {
            let cell = read_be32(&data, IDX_HEADER_LEN + i * 4);
            if cell < prev {
                return Err(Error::corrupt(format!(
                    "pack index fan-out not monotonic at byte {i:#04x}"
                )));
            }
            prev = cell;
        }
        let count = prev as usize;

        let oid_table = IDX_HEADER_LEN + FANOUT_LEN;
        let crc_table = oid_table + count * RAW_ID_LEN;
        let offset_table = crc_table + count * 4;
        // A large-offset table may sit between the offsets and the trailer,
        // so this is a lower bound only.
        if offset_table + count * 4 + IDX_TRAILER_LEN > data.len() {
            return Err(Error::corrupt(format!(
                "pack index {} truncated: {} entries do not fit",
                path.display(),
                count
            )));
        }

        Ok(PackIndex {
            data,
            count,
            oid_table,
            crc_table,
            offset_table,
        })
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn fanout(&self, bucket: usize) -> usize {
        read_be32(&self.data, IDX_HEADER_LEN + bucket * 4) as usize
    }

    fn oid_at(&self, i: usize) -> &[u8] {
        let at = self.oid_table + i * RAW_ID_LEN;
        &self.data[at..at + RAW_ID_LEN]
    }

    /// The CRC-32 column is retained but not checked; repack tooling wants
    /// it, a reader does not.
    pub fn crc_at(&self, i: usize) -> u32 {
        read_be32(&self.data, self.crc_table + i * 4)
    }

    fn offset_at(&self, i: usize) -> Result<u64> {
        let raw = read_be32(&self.data, self.offset_table + i * 4);
        if raw & 0x8000_0000 != 0 {
            // points into the 8-byte offset table; only packs over 2 GiB
            // produce these
            return Err(Error::Unsupported("large pack offsets"));
        }
        Ok(raw as u64)
    }

    /// Fan-out guided binary search over the sorted CID array.
    pub fn find_offset(&self, id: &ObjectId) -> Result<Option<u64>> {
        let bucket = id.first_byte() as usize;
        let mut lo = if bucket == 0 {
            0
        } else {
            self.fanout(bucket - 1)
        };
        let mut hi = self.fanout(bucket);
        if hi > self.count {
            return Err(Error::corrupt("pack index fan-out exceeds entry count"));
        }
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.oid_at(mid).cmp(id.as_bytes()) {
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
                Ordering::Equal => return self.offset_at(mid).map(Some),
            }
        }
        Ok(None)
    }
}

/// A mapped `pack-*.pack`, v2.
pub struct PackFile {
    data: Mapped,
    count: u32,
}

impl PackFile {
    pub fn open(path: &Path, verify: bool) -> Result<PackFile> {
        let data = Mapped::open(path, MIN_MAPPED_LEN)?;
        if &data[..4] != PACK_MAGIC {
            return Err(Error::corrupt(format!(
                "bad pack magic in {}",
                path.display()
            )));
        }
        let version = read_be32(&data, 4);
        if version != 2 {
            return Err(Error::Unsupported("pack versions other than 2"));
        }
        let count = read_be32(&data, 8);
        if verify {
            verify_trailer(&data, "pack file")?;
        }
        Ok(PackFile { data, count })
    }

    pub fn object_count(&self) -> u32 {
        self.count
    }

    /// Everything before the trailing digest; object slices must not run
    /// into it.
    fn payload(&self) -> &[u8] {
        &self.data[..self.data.len() - PACK_TRAILER_LEN]
    }

    fn tail(&self, from: usize) -> Result<&[u8]> {
        self.payload()
            .get(from..)
            .ok_or_else(|| Error::corrupt("object offset beyond pack end"))
    }

    /// Packed object header: 3-bit type and 4-bit low size in the first
    /// byte, then 7 more size bits per continuation byte.
    fn entry_header(&self, offset: usize) -> Result<(u8, u64, usize)> {
        let data = self.payload();
        let mut c = *data
            .get(offset)
            .ok_or_else(|| Error::corrupt("object offset beyond pack end"))?;
        let typ = (c >> 4) & 7;
        let mut size = (c & 0x0f) as u64;
        let mut shift = 4u32;
        let mut used = 1;
        while c & 0x80 != 0 {
            c = *data
                .get(offset + used)
                .ok_or_else(|| Error::corrupt("truncated packed object header"))?;
            used += 1;
            size |= ((c & 0x7f) as u64) << shift;
            shift += 7;
        }
        Ok((typ, size, used))
    }

    /// The ofs-delta back-offset varint: unlike the size varints, each
    /// continuation adds (value+1)·128, so multi-byte encodings have no
    /// redundant forms.
    fn back_offset(&self, offset: usize) -> Result<(u64, usize)> {
        let data = self.payload();
        let mut c = *data
            .get(offset)
            .ok_or_else(|| Error::corrupt("truncated delta back-offset"))?;
        let mut value = (c & 0x7f) as u64;
        let mut used = 1;
        while c & 0x80 != 0 {
            c = *data
                .get(offset + used)
                .ok_or_else(|| Error::corrupt("truncated delta back-offset"))?;
            used += 1;
            value = ((value + 1) << 7) | (c & 0x7f) as u64;
        }
        Ok((value, used))
    }

    /// Extracts the object at a byte offset, following ofs-delta chains back
    /// to their concrete base. Deltas stay compressed until the returned
    /// object is first read.
    pub fn extract(&self, id: ObjectId, offset: u64) -> Result<Object<'_>> {
        let mut offset = offset as usize;
        let (mut typ, mut size, mut used) = self.entry_header(offset)?;

        let mut deltas: Vec<&[u8]> = Vec::new();
        while typ == OBJ_OFS_DELTA {
            let (back, more) = self.back_offset(offset + used)?;
            deltas.push(self.tail(offset + used + more)?);
            let base_offset = offset
                .checked_sub(back as usize)
                .filter(|_| back > 0)
                .ok_or_else(|| {
                    Error::corrupt(format!("delta at {offset} has bad back-offset {back}"))
                })?;
            offset = base_offset;
            (typ, size, used) = self.entry_header(offset)?;
        }
        if typ == OBJ_REF_DELTA {
            return Err(Error::Unsupported("ref-delta packed objects"));
        }
        let kind = ObjectKind::from_pack_type(typ)
            .ok_or_else(|| Error::corrupt(format!("packed object type {typ} at {offset}")))?;

        let body = self.tail(offset + used)?;
        if deltas.is_empty() {
            let z = ZlibReader::new(body);
            return Ok(Object::from_pack(id, kind, size_to_u32(size, "object")?, z));
        }

        // The declared size of a reconstructed object is the result-size
        // varint at the head of the outermost delta.
        let head = inflate_prefix(deltas[0], 32)?;
        let (_, base_used) = delta::size_varint(&head)?;
        let (result_size, _) = delta::size_varint(&head[base_used..])?;
        Ok(Object::from_delta(
            id,
            kind,
            size_to_u32(result_size, "delta result")?,
            body,
            size_to_u32(size, "delta base")?,
            deltas,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn oid(first: u8) -> ObjectId {
        let mut raw = [0x55u8; RAW_ID_LEN];
        raw[0] = first;
        ObjectId::from(raw)
    }

    /// Minimal v2 idx: three entries in buckets 0x00, 0x7f, 0xff.
    fn build_idx(offsets: [u32; 3]) -> Vec<u8> {
        let ids = [oid(0x00), oid(0x7f), oid(0xff)];
        let mut buf = Vec::new();
        buf.extend_from_slice(&IDX_MAGIC.to_be_bytes());
        buf.extend_from_slice(&2u32.to_be_bytes());
        for bucket in 0u32..256 {
            let cumulative = ids.iter().filter(|id| id.first_byte() as u32 <= bucket).count() as u32;
            buf.extend_from_slice(&cumulative.to_be_bytes());
        }
        for id in &ids {
            buf.extend_from_slice(id.as_bytes());
        }
        for id in &ids {
            let mut crc = crc32fast::Hasher::new();
            crc.update(id.as_bytes());
            buf.extend_from_slice(&crc.finalize().to_be_bytes());
        }
        for off in offsets {
            buf.extend_from_slice(&off.to_be_bytes());
        }
        buf.extend_from_slice(&[0u8; RAW_ID_LEN]); // pack digest, unchecked here
        let digest = Sha1::digest(&buf);
        buf.extend_from_slice(digest.as_slice());
        buf
    }

    fn write_idx(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(bytes).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn fanout_binary_search() {
        let f = write_idx(&build_idx([12, 345, 6789]));
        let idx = PackIndex::open(f.path(), true).unwrap();
        assert_eq!(idx.len(), 3);
        assert_eq!(idx.find_offset(&oid(0x00)).unwrap(), Some(12));
        assert_eq!(idx.find_offset(&oid(0x7f)).unwrap(), Some(345));
        assert_eq!(idx.find_offset(&oid(0xff)).unwrap(), Some(6789));
        assert_eq!(idx.find_offset(&oid(0x80)).unwrap(), None);
        // same bucket, different tail bytes
        let mut raw = *oid(0x7f).as_bytes();
        raw[19] = 0x54;
        assert_eq!(idx.find_offset(&ObjectId::from(raw)).unwrap(), None);
    }

    #[test]
    fn large_offset_is_unsupported() {
        let f = write_idx(&build_idx([0, 0x8000_0000, 1]));
        let idx = PackIndex::open(f.path(), false).unwrap();
        match idx.find_offset(&oid(0x7f)) {
            Err(Error::Unsupported(_)) => {}
            other => panic!("expected Unsupported, got {other:?}"),
        }
    }

    #[test]
    fn corrupt_trailer_detected_when_verifying() {
        let mut bytes = build_idx([1, 2, 3]);
        let len = bytes.len();
        bytes[len - 1] ^= 0xff;
        let f = write_idx(&bytes);
        assert!(PackIndex::open(f.path(), false).is_ok());
        match PackIndex::open(f.path(), true) {
            Err(Error::Corrupt(_)) => {}
            other => panic!("expected Corrupt, got {other:?}"),
        }
    }

    #[test]
    fn rejects_bad_magic_and_version() {
        let mut bytes = build_idx([1, 2, 3]);
        bytes[0] = 0;
        let f = write_idx(&bytes);
        assert!(matches!(
            PackIndex::open(f.path(), false),
            Err(Error::Corrupt(_))
        ));

        let mut bytes = build_idx([1, 2, 3]);
        bytes[7] = 3; // version
        let f = write_idx(&bytes);
        assert!(matches!(
            PackIndex::open(f.path(), false),
            Err(Error::Unsupported(_))
        ));
    }
}
