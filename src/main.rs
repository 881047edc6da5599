mod cli;

use std::io::{self, Write};

use clap::Parser;

use cli::{CatFileArgs, Cli, Commands};
use ogit::{refs, tree, Commit, Error, Index, ObjectKind, ObjectStore, Result};

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    let store = ObjectStore::open(&cli.git_dir).verify_checksums(cli.verify);

    if let Err(e) = run(&store, cli.command) {
        eprintln!("ogit: {e}");
        std::process::exit(1);
    }
}

fn run(store: &ObjectStore, command: Commands) -> Result<()> {
    match command {
        Commands::CatFile(args) => cat_file(store, args),
        Commands::LsTree { name } => ls_tree(store, &name),
        Commands::LsFiles => ls_files(store),
        Commands::RevList { name } => rev_list(store, &name),
        Commands::Branch => branch(store),
        Commands::DumpIndex => dump_index(store),
    }
}

fn cat_file(store: &ObjectStore, args: CatFileArgs) -> Result<()> {
    let id = refs::resolve(store, &args.name)?;
    if args.mode.exists {
        return match store.exists(id)? {
            true => Ok(()),
            false => Err(Error::NotFound(args.name)),
        };
    }

    let mut obj = store.lookup(id)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    if args.mode.kind {
        writeln!(out, "{}", obj.kind)?;
    } else if args.mode.size {
        writeln!(out, "{}", obj.size)?;
    } else if args.mode.print {
        match obj.kind {
            ObjectKind::Commit => {
                let commit = Commit::read_from(&mut obj)?;
                write!(out, "{commit}")?;
            }
            ObjectKind::Tree => {
                for entry in tree::read_from(&mut obj)? {
                    writeln!(out, "{entry}")?;
                }
            }
            // blobs and tags stream out unmodified
            _ => {
                io::copy(&mut obj, &mut out)?;
            }
        }
    }
    obj.close();
    out.flush()?;
    Ok(())
}

fn ls_tree(store: &ObjectStore, name: &str) -> Result<()> {
    let id = refs::resolve(store, name)?;
    let mut obj = store.lookup(id)?;
    let entries = match obj.kind {
        ObjectKind::Tree => tree::read_from(&mut obj)?,
        // a commit names its tree; dereference one level
        ObjectKind::Commit => {
            let commit = Commit::read_from(&mut obj)?;
            obj.close();
            let mut tree_obj = store.lookup(commit.tree)?;
            tree::read_from(&mut tree_obj)?
        }
        other => {
            return Err(Error::Corrupt(format!("{id} is a {other}, not a tree-ish")));
        }
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for entry in entries {
        writeln!(out, "{entry}")?;
    }
    Ok(())
}

fn ls_files(store: &ObjectStore) -> Result<()> {
    let index = Index::open(store.git_dir())?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for entry in &index.entries {
        writeln!(out, "{}", entry.path_lossy())?;
    }
    Ok(())
}

fn rev_list(store: &ObjectStore, name: &str) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut next = Some(refs::resolve(store, name)?);
    while let Some(id) = next {
        let mut obj = store.lookup(id)?;
        let commit = Commit::read_from(&mut obj)?;
        obj.close();
        writeln!(out, "{id}")?;
        next = commit.first_parent();
    }
    Ok(())
}

fn branch(store: &ObjectStore) -> Result<()> {
    let (branches, current) = refs::list_branches(store.git_dir())?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for (i, branch) in branches.iter().enumerate() {
        let marker = if i as isize == current { '*' } else { ' ' };
        writeln!(out, "{marker} {}", branch.name)?;
    }
    Ok(())
}

fn dump_index(store: &ObjectStore) -> Result<()> {
    let index = Index::open(store.git_dir())?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    writeln!(
        out,
        "version {} entries {} extensions {}",
        index.version,
        index.entries.len(),
        index.extensions.len()
    )?;
    for (i, e) in index.entries.iter().enumerate() {
        writeln!(
            out,
            "entry {i}: ctime {}.{} mtime {}.{} dev {} ino {} mode {:o} uid {} gid {} size {} stage {} name length {}",
            e.ctime_sec,
            e.ctime_nsec,
            e.mtime_sec,
            e.mtime_nsec,
            e.dev,
            e.ino,
            e.mode,
            e.uid,
            e.gid,
            e.size,
            e.stage(),
            e.name_len(),
        )?;
        writeln!(out, "{} {}", e.path_lossy(), e.id)?;
    }
    for (i, x) in index.extensions.iter().enumerate() {
        writeln!(
            out,
            "extension {i}: {} size {}",
            String::from_utf8_lossy(&x.signature),
            x.payload.len()
        )?;
    }
    Ok(())
}
