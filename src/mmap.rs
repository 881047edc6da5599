use std::fs::File;
use std::ops::Deref;
use std::path::Path;

use memmap2::Mmap;

use crate::error::{Error, Result};

/// Smallest file this client will map: a 12-byte header plus a trailing
/// 20-byte SHA-1, which holds for the index file, pack files, and pack
/// indexes alike.
pub const MIN_MAPPED_LEN: usize = 32;

/// A read-only file mapping. The region stays valid for the lifetime of the
/// value and is unmapped on drop, including during unwind.
#[derive(Debug)]
pub struct Mapped {
    map: Mmap,
}

impl Mapped {
    pub fn open(path: &Path, min_len: usize) -> Result<Mapped> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        if len < min_len as u64 {
            return Err(Error::corrupt(format!(
                "{} is {} bytes, need at least {}",
                path.display(),
                len,
                min_len
            )));
        }
        // Safety: the map is private and read-only; concurrent modification of
        // the underlying file by another process is declared undefined by the
        // store contract.
        let map = unsafe { Mmap::map(&file)? };
        Ok(Mapped { map })
    }
}

impl Deref for Mapped {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn maps_contents() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&[7u8; 64]).unwrap();
        let m = Mapped::open(f.path(), MIN_MAPPED_LEN).unwrap();
        assert_eq!(m.len(), 64);
        assert_eq!(m[0], 7);
    }

    #[test]
    fn rejects_short_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"tiny").unwrap();
        match Mapped::open(f.path(), MIN_MAPPED_LEN) {
            Err(Error::Corrupt(_)) => {}
            other => panic!("expected Corrupt, got {other:?}"),
        }
    }

    #[test]
    fn missing_file_is_io() {
        match Mapped::open(Path::new("/nonexistent/zzz"), MIN_MAPPED_LEN) {
            Err(Error::Io(_)) => {}
            other => panic!("expected Io, got {other:?}"),
        }
    }
}
