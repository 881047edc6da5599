//! Commit objects: a block of newline-terminated headers, a blank line,
//! then the message.
//!
//! Recognised headers are `tree`, `parent` (repeatable, order kept),
//! `author`, and `committer`. Anything else (`encoding`, `gpgsig` and its
//! indented continuation lines) is tolerated and skipped.

use std::fmt;

use crate::error::{Error, Result};
use crate::id::ObjectId;
use crate::object::{Object, ObjectKind};

/// An `author` or `committer` identity line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Person {
    pub name: String,
    pub email: String,
    /// Unix seconds.
    pub time: i64,
    /// Offset as written, e.g. `-0700`.
    pub tz: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub tree: ObjectId,
    pub parents: Vec<ObjectId>,
    pub author: Person,
    pub committer: Person,
    /// Raw bytes; may contain newlines, may lack a trailing one.
    pub message: Vec<u8>,
}

impl Commit {
    pub fn parse(data: &[u8]) -> Result<Commit> {
        let mut tree = None;
        let mut parents = Vec::new();
        let mut author = None;
        let mut committer = None;

        let mut rest = data;
        loop {
            let Some(nl) = rest.iter().position(|&b| b == b'\n') else {
                return Err(Error::corrupt("commit has no header/message separator"));
            };
            let line = &rest[..nl];
            rest = &rest[nl + 1..];
            if line.is_empty() {
                break;
            }
            let (leader, value) = match line.iter().position(|&b| b == b' ') {
                Some(sp) => (&line[..sp], &line[sp + 1..]),
                None => (line, &line[..0]),
            };
            match leader {
                b"tree" => tree = Some(parse_hash_value(value, "tree")?),
                b"parent" => parents.push(parse_hash_value(value, "parent")?),
                b"author" => author = Some(parse_person(value, "author")?),
                b"committer" => committer = Some(parse_person(value, "committer")?),
                _ => {}
            }
        }

        Ok(Commit {
            tree: tree.ok_or_else(|| Error::corrupt("commit missing tree header"))?,
            parents,
            author: author.ok_or_else(|| Error::corrupt("commit missing author header"))?,
            committer: committer.ok_or_else(|| Error::corrupt("commit missing committer header"))?,
            message: rest.to_vec(),
        })
    }

    /// Consumes an object handle's payload and parses it.
    pub fn read_from(obj: &mut Object<'_>) -> Result<Commit> {
        if obj.kind != ObjectKind::Commit {
            return Err(Error::corrupt(format!(
                "{} is a {}, not a commit",
                obj.id, obj.kind
            )));
        }
        let data = obj.read_to_end_owned()?;
        Commit::parse(&data)
    }

    pub fn first_parent(&self) -> Option<ObjectId> {
        self.parents.first().copied()
    }
}

fn parse_hash_value(value: &[u8], leader: &str) -> Result<ObjectId> {
    std::str::from_utf8(value)
        .ok()
        .map(ObjectId::from_hex)
        .transpose()?
        .ok_or_else(|| Error::corrupt(format!("bad {leader} header in commit")))
}

/// `<name> <<email>> <unix-seconds> <tz>`, scanned from the end because the
/// name may contain any number of internal spaces.
fn parse_person(value: &[u8], whom: &str) -> Result<Person> {
    let text = std::str::from_utf8(value)
        .map_err(|_| Error::corrupt(format!("{whom} line is not utf-8")))?;
    let parts: Vec<&str> = text.split(' ').collect();
    if parts.len() < 3 {
        return Err(Error::corrupt(format!(
            "{whom} line has too few fields: {text:?}"
        )));
    }
    let tz = parts[parts.len() - 1];
    let time = parts[parts.len() - 2]
        .parse::<i64>()
        .map_err(|_| Error::corrupt(format!("bad timestamp in {whom} line: {text:?}")))?;
    let email = parts[parts.len() - 3];
    if email.len() < 2 || !email.starts_with('<') || !email.ends_with('>') {
        return Err(Error::corrupt(format!("bad email in {whom} line: {text:?}")));
    }
    Ok(Person {
        name: parts[..parts.len() - 3].join(" "),
        email: email[1..email.len() - 1].to_string(),
        time,
        tz: tz.to_string(),
    })
}

impl fmt::Display for Person {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}> {} {}", self.name, self.email, self.time, self.tz)
    }
}

/// The canonical on-disk form: parsing this output reproduces the value.
impl fmt::Display for Commit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "tree {}", self.tree)?;
        for parent in &self.parents {
            writeln!(f, "parent {}", parent)?;
        }
        writeln!(f, "author {}", self.author)?;
        writeln!(f, "committer {}", self.committer)?;
        writeln!(f)?;
        write!(f, "{}", String::from_utf8_lossy(&self.message))
    }
}
