//! Tree objects: repeated `<octal-mode> <name>\0<20-byte-id>` triples,
//! stored sorted by name.

use std::borrow::Cow;
use std::fmt;

use crate::error::{Error, Result};
use crate::id::{ObjectId, RAW_ID_LEN};
use crate::object::{Object, ObjectKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub mode: u32,
    /// Path component, not further decoded.
    pub name: Vec<u8>,
    pub id: ObjectId,
}

impl TreeEntry {
    /// The referenced object's kind, as implied by the mode: directories are
    /// trees, gitlinks are commits, everything else (files, symlinks) blobs.
    pub fn kind(&self) -> ObjectKind {
        match self.mode {
            0o40000 => ObjectKind::Tree,
            0o160000 => ObjectKind::Commit,
            _ => ObjectKind::Blob,
        }
    }

    pub fn name_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.name)
    }
}

impl fmt::Display for TreeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:06o} {} {}\t{}",
            self.mode,
            self.kind(),
            self.id,
            self.name_lossy()
        )
    }
}

pub fn parse(data: &[u8]) -> Result<Vec<TreeEntry>> {
    let mut entries = Vec::new();
    let mut rest = data;
    while !rest.is_empty() {
        let sp = rest
            .iter()
            .position(|&b| b == b' ')
            .ok_or_else(|| Error::corrupt("tree entry has no mode terminator"))?;
        let mode_text = std::str::from_utf8(&rest[..sp])
            .map_err(|_| Error::corrupt("tree entry mode is not ascii"))?;
        let mode = u32::from_str_radix(mode_text, 8)
            .map_err(|_| Error::corrupt(format!("bad tree entry mode {mode_text:?}")))?;
        rest = &rest[sp + 1..];

        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| Error::corrupt("tree entry name is unterminated"))?;
        let name = rest[..nul].to_vec();
        rest = &rest[nul + 1..];

        if rest.len() < RAW_ID_LEN {
            return Err(Error::corrupt("tree entry id is truncated"));
        }
        let id = ObjectId::from_raw(&rest[..RAW_ID_LEN])?;
        rest = &rest[RAW_ID_LEN..];

        entries.push(TreeEntry { mode, name, id });
    }
    Ok(entries)
}

/// Consumes an object handle's payload and parses it.
pub fn read_from(obj: &mut Object<'_>) -> Result<Vec<TreeEntry>> {
    if obj.kind != ObjectKind::Tree {
        return Err(Error::corrupt(format!(
            "{} is a {}, not a tree",
            obj.id, obj.kind
        )));
    }
    let data = obj.read_to_end_owned()?;
    parse(&data)
}
