//! HEAD and the branch namespace.
//!
//! Only `HEAD` and loose files under `refs/heads/` are consulted; a
//! `packed-refs` file is not read, so refs that exist only there do not
//! resolve.

use std::fs;
use std::io;
use std::path::Path;

use crate::error::{Error, Result};
use crate::id::{is_hex_digit, ObjectId, HEX_ID_LEN};
use crate::store::{ObjectStore, MIN_PREFIX_LEN};

const REF_PREFIX: &str = "ref: ";
const HEADS_PREFIX: &str = "refs/heads/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branch {
    pub name: String,
    pub id: ObjectId,
}

/// Reads `HEAD`. A symbolic ref comes back as the branch name with any
/// `refs/heads/` prefix stripped; a detached head comes back as the trimmed
/// content verbatim.
pub fn current_branch(git_dir: &Path) -> Result<String> {
    let content = match fs::read_to_string(git_dir.join("HEAD")) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(Error::not_found("HEAD"));
        }
        Err(e) => return Err(e.into()),
    };
    let content = content.trim_end();
    match content.strip_prefix(REF_PREFIX) {
        Some(target) => Ok(target
            .strip_prefix(HEADS_PREFIX)
            .unwrap_or(target)
            .to_string()),
        None => Ok(content.to_string()),
    }
}

/// Enumerates `refs/heads/`, returning branches sorted by name and the
/// position of the current branch, or -1 when HEAD is detached or points
/// elsewhere. Nested branch names (with `/`) are not descended into.
pub fn list_branches(git_dir: &Path) -> Result<(Vec<Branch>, isize)> {
    let current = current_branch(git_dir)?;
    let dir = git_dir.join("refs").join("heads");
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), -1)),
        Err(e) => return Err(e.into()),
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            continue;
        }
        if let Ok(name) = entry.file_name().into_string() {
            names.push(name);
        }
    }
    names.sort();

    let mut branches = Vec::new();
    let mut current_idx = -1isize;
    for name in names {
        let id = read_branch(git_dir, &name)?;
        if name == current {
            current_idx = branches.len() as isize;
        }
        branches.push(Branch { name, id });
    }
    Ok((branches, current_idx))
}

/// Resolves a human-supplied name to a full id: a 40-hex string, `HEAD`, a
/// branch name, or an abbreviated id (loose objects only).
pub fn resolve(store: &ObjectStore, name: &str) -> Result<ObjectId> {
    if name.len() == HEX_ID_LEN && name.bytes().all(is_hex_digit) {
        return ObjectId::from_hex(name);
    }

    let git_dir = store.git_dir();
    if name == "HEAD" {
        let head = current_branch(git_dir)?;
        if head.len() == HEX_ID_LEN && head.bytes().all(is_hex_digit) {
            return ObjectId::from_hex(&head);
        }
        return read_branch(git_dir, &head);
    }

    match read_branch(git_dir, name) {
        Ok(id) => Ok(id),
        Err(Error::NotFound(_)) => {
            if name.len() >= MIN_PREFIX_LEN && name.bytes().all(is_hex_digit) {
                store.resolve_prefix(name)
            } else {
                Err(Error::not_found(format!("ref {name}")))
            }
        }
        Err(e) => Err(e),
    }
}

fn read_branch(git_dir: &Path, name: &str) -> Result<ObjectId> {
    let path = git_dir.join("refs").join("heads").join(name);
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(Error::not_found(format!("branch {name}")));
        }
        Err(e) => return Err(e.into()),
    };
    let hex = content.trim_end();
    if hex.len() < HEX_ID_LEN {
        return Err(Error::corrupt(format!("branch file for {name} is too short")));
    }
    ObjectId::from_hex(&hex[..HEX_ID_LEN])
}
