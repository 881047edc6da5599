//! Loose objects: one zlib-compressed file per object under the two-level
//! fan-out directory, plaintext `<kind> <decimal-size>\0<payload>`.

use std::fs::{read_dir, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::id::{is_hex_digit, ObjectId, HEX_ID_LEN};
use crate::object::{Object, ObjectKind};
use crate::pool::ZlibReader;

/// Shortest abbreviated id accepted for prefix resolution.
pub const MIN_PREFIX_LEN: usize = 4;

// "commit 4294967295\0" is 18 bytes; anything longer is garbage.
const MAX_HEADER_LEN: usize = 32;

fn object_path(git_dir: &Path, id: &ObjectId) -> PathBuf {
    let hex = id.to_hex();
    git_dir.join("objects").join(&hex[..2]).join(&hex[2..])
}

/// Opens a loose object as a lazily decompressing handle.
pub fn open(git_dir: &Path, id: ObjectId) -> Result<Object<'static>> {
    let path = object_path(git_dir, &id);
    let file = match File::open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(Error::not_found(id.to_hex()))
        }
        Err(e) => return Err(e.into()),
    };
    let mut z = ZlibReader::new(file);
    match read_header(&mut z) {
        Ok((kind, size)) => Ok(Object::from_loose(id, kind, size, z)),
        Err(e) => {
            z.recycle();
            Err(e)
        }
    }
}

/// Reads the plaintext prefix up to its NUL and parses `<kind> <size>`.
fn read_header<R: Read>(z: &mut ZlibReader<R>) -> Result<(ObjectKind, u32)> {
    let mut header = Vec::with_capacity(MAX_HEADER_LEN);
    let mut byte = [0u8; 1];
    loop {
        match z.read(&mut byte) {
            Ok(0) => return Err(Error::corrupt("loose object ends inside its header")),
            Ok(_) if byte[0] == 0 => break,
            Ok(_) => {
                header.push(byte[0]);
                if header.len() > MAX_HEADER_LEN {
                    return Err(Error::corrupt("loose object header too long"));
                }
            }
            Err(e) => return Err(Error::corrupt(format!("loose object: {e}"))),
        }
    }

    let mut fields = header.splitn(2, |&b| b == b' ');
    let kind_name = fields.next().unwrap_or_default();
    let kind = ObjectKind::from_bytes(kind_name).ok_or_else(|| {
        Error::corrupt(format!(
            "unknown loose object kind {:?}",
            String::from_utf8_lossy(kind_name)
        ))
    })?;
    let size = fields
        .next()
        .and_then(|s| std::str::from_utf8(s).ok())
        .and_then(|s| s.parse::<u32>().ok())
        .ok_or_else(|| Error::corrupt("bad size in loose object header"))?;
    Ok((kind, size))
}

/// True when the object file exists, without opening it.
pub(crate) fn exists(git_dir: &Path, id: &ObjectId) -> bool {
    object_path(git_dir, id).exists()
}

/// Resolves an abbreviated hex id against one fan-out directory.
///
/// Only loose objects participate; an id that exists solely in a pack must
/// be given in full.
pub fn resolve_prefix(git_dir: &Path, prefix: &str) -> Result<ObjectId> {
    if prefix.len() < MIN_PREFIX_LEN
        || prefix.len() > HEX_ID_LEN
        || !prefix.bytes().all(is_hex_digit)
    {
        return Err(Error::corrupt(format!(
            "object prefix {prefix:?} must be {MIN_PREFIX_LEN}-{HEX_ID_LEN} lowercase hex digits"
        )));
    }
    if prefix.len() == HEX_ID_LEN {
        return ObjectId::from_hex(prefix);
    }

    let dir = git_dir.join("objects").join(&prefix[..2]);
    let rest = &prefix[2..];
    let entries = match read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(Error::not_found(prefix.to_string()))
        }
        Err(e) => return Err(e.into()),
    };

    let mut found = None;
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.len() != HEX_ID_LEN - 2 || !name.starts_with(rest) {
            continue;
        }
        let full = format!("{}{}", &prefix[..2], name);
        if found.replace(full).is_some() {
            return Err(Error::Ambiguous(prefix.to_string()));
        }
    }
    match found {
        Some(hex) => ObjectId::from_hex(&hex),
        None => Err(Error::not_found(prefix.to_string())),
    }
}
