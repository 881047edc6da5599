//! The object resolver: pack stores first, loose storage as the fallback.

pub mod delta;
pub(crate) mod loose;
pub mod pack;

use std::fs::read_dir;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use log::{trace, warn};

use crate::error::Result;
use crate::id::{ObjectId, HEX_ID_LEN};
use crate::object::Object;
use crate::store::pack::{PackFile, PackIndex};

pub use crate::store::loose::MIN_PREFIX_LEN;

/// One pack: its eagerly parsed index and a lazily mapped pack file.
struct Pack {
    idx: PackIndex,
    pack_path: PathBuf,
    file: OnceLock<PackFile>,
}

impl Pack {
    fn file(&self, verify: bool) -> Result<&PackFile> {
        if let Some(file) = self.file.get() {
            return Ok(file);
        }
        let opened = PackFile::open(&self.pack_path, verify)?;
        Ok(self.file.get_or_init(|| opened))
    }
}

/// Read-only handle on a repository's object database.
///
/// The pack list is built on first use and only grows; on-disk changes made
/// by other processes during the session are not observed.
pub struct ObjectStore {
    git_dir: PathBuf,
    verify: bool,
    packs: OnceLock<Vec<Pack>>,
}

impl ObjectStore {
    pub fn open(git_dir: impl Into<PathBuf>) -> ObjectStore {
        ObjectStore {
            git_dir: git_dir.into(),
            verify: false,
            packs: OnceLock::new(),
        }
    }

    /// Enables whole-file SHA-1 verification of packs and pack indexes.
    /// Off by default; it costs a full scan of every mapped file.
    pub fn verify_checksums(mut self, on: bool) -> ObjectStore {
        self.verify = on;
        self
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    fn packs(&self) -> &[Pack] {
        self.packs
            .get_or_init(|| scan_packs(&self.git_dir, self.verify))
    }

    /// Materialises the object named by `id`, consulting every pack index
    /// before falling back to loose storage.
    pub fn lookup(&self, id: ObjectId) -> Result<Object<'_>> {
        for pack in self.packs() {
            let Some(offset) = pack.idx.find_offset(&id)? else {
                continue;
            };
            trace!(
                "{id} packed in {} at offset {offset}",
                pack.pack_path.display()
            );
            return pack.file(self.verify)?.extract(id, offset);
        }
        trace!("{id} not packed, trying loose storage");
        loose::open(&self.git_dir, id)
    }

    /// Existence probe that avoids standing up a reader.
    pub fn exists(&self, id: ObjectId) -> Result<bool> {
        for pack in self.packs() {
            if pack.idx.find_offset(&id)?.is_some() {
                return Ok(true);
            }
        }
        Ok(loose::exists(&self.git_dir, &id))
    }

    /// Expands a possibly abbreviated hex id to a full one. Abbreviations
    /// only match loose objects, and only unambiguously.
    pub fn resolve_prefix(&self, prefix: &str) -> Result<ObjectId> {
        if prefix.len() == HEX_ID_LEN {
            return ObjectId::from_hex(prefix);
        }
        loose::resolve_prefix(&self.git_dir, prefix)
    }
}

/// Scans `objects/pack` for `pack-*.idx`. An unreadable index skips that
/// pack rather than failing the store; a missing directory means no packs.
fn scan_packs(git_dir: &Path, verify: bool) -> Vec<Pack> {
    let dir = git_dir.join("objects").join("pack");
    let entries = match read_dir(&dir) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut idx_paths: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("pack-") && n.ends_with(".idx"))
        })
        .collect();
    idx_paths.sort();

    let mut packs = Vec::new();
    for path in idx_paths {
        match PackIndex::open(&path, verify) {
            Ok(idx) => packs.push(Pack {
                idx,
                pack_path: path.with_extension("pack"),
                file: OnceLock::new(),
            }),
            Err(e) => warn!("skipping pack index {}: {e}", path.display()),
        }
    }
    packs
}
