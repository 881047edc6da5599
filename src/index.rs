//! The staging index (`<repo>/index`): `DIRC` header, fixed stat blocks with
//! NUL-terminated paths padded to 8-byte boundaries, optional extension
//! chunks, and a trailing SHA-1 over everything before it.

use std::io::Read;
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt};
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};
use crate::id::{ObjectId, RAW_ID_LEN};
use crate::mmap::{Mapped, MIN_MAPPED_LEN};

pub const INDEX_MAGIC: &[u8; 4] = b"DIRC";
const HEADER_LEN: usize = 12;
const TRAILER_LEN: usize = RAW_ID_LEN;
/// Stat block (62) plus the NUL-padded minimum path area.
const MIN_ENTRY_LEN: usize = 70;
const STAT_BLOCK_LEN: usize = 62;

const FLAG_ASSUME_VALID: u16 = 0x8000;
const FLAG_EXTENDED: u16 = 0x4000;
const FLAG_STAGE_MASK: u16 = 0x3000;
const FLAG_NAME_MASK: u16 = 0x0fff;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub ctime_sec: u32,
    pub ctime_nsec: u32,
    pub mtime_sec: u32,
    pub mtime_nsec: u32,
    pub dev: u32,
    pub ino: u32,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u32,
    pub id: ObjectId,
    pub flags: u16,
    pub path: Vec<u8>,
}

impl IndexEntry {
    pub fn assume_valid(&self) -> bool {
        self.flags & FLAG_ASSUME_VALID != 0
    }

    pub fn stage(&self) -> u8 {
        ((self.flags & FLAG_STAGE_MASK) >> 12) as u8
    }

    /// Path length as recorded in the flags; 0xfff means "long, measure it".
    pub fn name_len(&self) -> u16 {
        self.flags & FLAG_NAME_MASK
    }

    pub fn path_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.path)
    }

    fn extended(&self) -> bool {
        self.flags & FLAG_EXTENDED != 0
    }
}

/// An extension chunk, retained as an opaque blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
    pub signature: [u8; 4],
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    pub version: u32,
    pub entries: Vec<IndexEntry>,
    pub extensions: Vec<Extension>,
}

impl Index {
    pub fn open(git_dir: &Path) -> Result<Index> {
        let map = Mapped::open(&git_dir.join("index"), MIN_MAPPED_LEN)?;
        Index::parse(&map)
    }

    pub fn parse(data: &[u8]) -> Result<Index> {
        if data.len() < HEADER_LEN + TRAILER_LEN {
            return Err(Error::corrupt("index file too small"));
        }
        if &data[..4] != INDEX_MAGIC {
            return Err(Error::corrupt("bad index signature"));
        }

        let split = data.len() - TRAILER_LEN;
        if Sha1::digest(&data[..split]).as_slice() != &data[split..] {
            return Err(Error::corrupt("index checksum mismatch"));
        }

        let version = u32::from_be_bytes(data[4..8].try_into().unwrap());
        let count = u32::from_be_bytes(data[8..12].try_into().unwrap());
        match version {
            2 | 3 => {}
            4 => return Err(Error::Unsupported("index version 4 path compression")),
            _ => return Err(Error::corrupt(format!("bad index version {version}"))),
        }

        let mut at = HEADER_LEN;
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            // The slice runs to end of file on purpose: the 70-byte minimum
            // counts whatever follows the entry, trailer included.
            let (entry, len) = parse_entry(&data[at..])?;
            if entry.extended() {
                return Err(Error::Unsupported("index entries with extended flags"));
            }
            at += len;
            if at > split {
                return Err(Error::corrupt("index entries overrun the trailer"));
            }
            entries.push(entry);
        }

        let mut extensions = Vec::new();
        while at < split {
            if split - at < 8 {
                return Err(Error::corrupt(format!(
                    "{} stray bytes after last index entry",
                    split - at
                )));
            }
            let signature: [u8; 4] = data[at..at + 4].try_into().unwrap();
            let size = u32::from_be_bytes(data[at + 4..at + 8].try_into().unwrap()) as usize;
            at += 8;
            if split - at < size {
                return Err(Error::corrupt(format!(
                    "index extension {:?} claims {} bytes, {} remain",
                    String::from_utf8_lossy(&signature),
                    size,
                    split - at
                )));
            }
            extensions.push(Extension {
                signature,
                payload: data[at..at + size].to_vec(),
            });
            at += size;
        }

        Ok(Index {
            version,
            entries,
            extensions,
        })
    }
}

/// Parses one entry from the slice and returns it with its padded length:
/// the stat block plus the path, rounded so 1–8 NULs close the entry.
fn parse_entry(data: &[u8]) -> Result<(IndexEntry, usize)> {
    if data.len() < MIN_ENTRY_LEN {
        return Err(Error::corrupt(format!(
            "index entry is {} bytes, minimum {}",
            data.len(),
            MIN_ENTRY_LEN
        )));
    }

    let mut cur = &data[..STAT_BLOCK_LEN];
    let ctime_sec = cur.read_u32::<BigEndian>()?;
    let ctime_nsec = cur.read_u32::<BigEndian>()?;
    let mtime_sec = cur.read_u32::<BigEndian>()?;
    let mtime_nsec = cur.read_u32::<BigEndian>()?;
    let dev = cur.read_u32::<BigEndian>()?;
    let ino = cur.read_u32::<BigEndian>()?;
    let mode = cur.read_u32::<BigEndian>()?;
    let uid = cur.read_u32::<BigEndian>()?;
    let gid = cur.read_u32::<BigEndian>()?;
    let size = cur.read_u32::<BigEndian>()?;
    let mut raw_id = [0u8; RAW_ID_LEN];
    cur.read_exact(&mut raw_id)?;
    let flags = cur.read_u16::<BigEndian>()?;

    let path_len = data[STAT_BLOCK_LEN..]
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| Error::corrupt("index entry path is unterminated"))?;
    let path = data[STAT_BLOCK_LEN..STAT_BLOCK_LEN + path_len].to_vec();

    let len = (STAT_BLOCK_LEN + path_len) / 8 * 8 + 8;
    if len > data.len() {
        return Err(Error::corrupt("index entry padding is truncated"));
    }

    Ok((
        IndexEntry {
            ctime_sec,
            ctime_nsec,
            mtime_sec,
            mtime_nsec,
            dev,
            ino,
            mode,
            uid,
            gid,
            size,
            id: ObjectId::from(raw_id),
            flags,
            path,
        },
        len,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seal(mut body: Vec<u8>) -> Vec<u8> {
        let digest = Sha1::digest(&body);
        body.extend_from_slice(digest.as_slice());
        body
    }

    fn header(version: u32, count: u32) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(INDEX_MAGIC);
        out.extend_from_slice(&version.to_be_bytes());
        out.extend_from_slice(&count.to_be_bytes());
        out
    }

    fn entry_bytes(path: &str, id: [u8; RAW_ID_LEN], mode: u32, flags: u16) -> Vec<u8> {
        let mut out = Vec::new();
        for field in [1700000000u32, 0, 1700000001, 0, 64, 99, mode, 1000, 1000, 6] {
            out.extend_from_slice(&field.to_be_bytes());
        }
        out.extend_from_slice(&id);
        out.extend_from_slice(&flags.to_be_bytes());
        out.extend_from_slice(path.as_bytes());
        let padded = (out.len()) / 8 * 8 + 8;
        out.resize(padded, 0);
        out
    }

    #[test]
    fn header_and_zero_entries_parse() {
        // four all-zero entries: empty paths, 64-byte stride
        let mut body = header(2, 4);
        body.extend_from_slice(&[0u8; 4 * 64]);
        let index = Index::parse(&seal(body)).unwrap();
        assert_eq!(index.version, 2);
        assert_eq!(index.entries.len(), 4);
        assert!(index.extensions.is_empty());
    }

    #[test]
    fn zeroed_checksum_is_corrupt() {
        let mut body = header(2, 4);
        body.extend_from_slice(&[0u8; 4 * 64]);
        body.extend_from_slice(&[0u8; TRAILER_LEN]);
        match Index::parse(&body) {
            Err(Error::Corrupt(msg)) => assert!(msg.contains("checksum")),
            other => panic!("expected Corrupt, got {other:?}"),
        }
    }

    #[test]
    fn entries_and_extension_round_out() {
        let mut body = header(2, 2);
        body.extend(entry_bytes("README.md", [0xaa; RAW_ID_LEN], 0o100644, 9));
        body.extend(entry_bytes("src/main.rs", [0xbb; RAW_ID_LEN], 0o100644, 11));
        body.extend_from_slice(b"TREE");
        body.extend_from_slice(&4u32.to_be_bytes());
        body.extend_from_slice(b"opaq");

        let index = Index::parse(&seal(body)).unwrap();
        assert_eq!(index.entries.len(), 2);
        assert_eq!(index.entries[0].path_lossy(), "README.md");
        assert_eq!(index.entries[0].mode, 0o100644);
        assert_eq!(index.entries[0].name_len(), 9);
        assert_eq!(index.entries[0].stage(), 0);
        assert!(!index.entries[0].assume_valid());
        assert_eq!(index.entries[1].path_lossy(), "src/main.rs");
        assert_eq!(index.extensions.len(), 1);
        assert_eq!(&index.extensions[0].signature, b"TREE");
        assert_eq!(index.extensions[0].payload, b"opaq");
    }

    #[test]
    fn padding_arithmetic() {
        // path lengths chosen to land just before and just after a boundary:
        // 62 + 1 = 63 pads to 64; 62 + 2 = 64 pads to 72. A stand-in for the
        // trailing digest follows each entry, as it would in a real file.
        let mut one = entry_bytes("a", [0; RAW_ID_LEN], 0, 1);
        one.extend_from_slice(&[0u8; TRAILER_LEN]);
        let (_, len) = parse_entry(&one).unwrap();
        assert_eq!(len, 64);
        let mut two = entry_bytes("ab", [0; RAW_ID_LEN], 0, 2);
        two.extend_from_slice(&[0u8; TRAILER_LEN]);
        let (_, len) = parse_entry(&two).unwrap();
        assert_eq!(len, 72);
    }

    #[test]
    fn short_and_extended_entries_fail() {
        let mut body = header(2, 1);
        body.extend_from_slice(&[0u8; 40]); // far below the 70-byte minimum
        match Index::parse(&seal(body)) {
            Err(Error::Corrupt(_)) => {}
            other => panic!("expected Corrupt, got {other:?}"),
        }

        let mut body = header(3, 1);
        body.extend(entry_bytes("a", [0; RAW_ID_LEN], 0, FLAG_EXTENDED | 1));
        match Index::parse(&seal(body)) {
            Err(Error::Unsupported(_)) => {}
            other => panic!("expected Unsupported, got {other:?}"),
        }
    }

    #[test]
    fn version_gates() {
        match Index::parse(&seal(header(4, 0))) {
            Err(Error::Unsupported(_)) => {}
            other => panic!("expected Unsupported, got {other:?}"),
        }
        match Index::parse(&seal(header(9, 0))) {
            Err(Error::Corrupt(_)) => {}
            other => panic!("expected Corrupt, got {other:?}"),
        }
        match Index::parse(&seal(b"DIRX\0\0\0\x02\0\0\0\0".to_vec())) {
            Err(Error::Corrupt(_)) => {}
            other => panic!("expected Corrupt, got {other:?}"),
        }
    }
}
