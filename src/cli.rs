use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the repository's git directory
    #[arg(long, default_value = ".git")]
    pub git_dir: PathBuf,

    /// Verify pack and pack-index trailing checksums when mapping them
    #[arg(long)]
    pub verify: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print an object's type, size, or content
    CatFile(CatFileArgs),
    /// List a tree object's entries
    LsTree { name: String },
    /// List the paths staged in the index
    LsFiles,
    /// Print the first-parent commit chain, newest first
    RevList { name: String },
    /// List branches, marking the current one
    Branch,
    /// Dump the staging index verbatim
    DumpIndex,
}

#[derive(Args)]
pub struct CatFileArgs {
    #[command(flatten)]
    pub mode: CatFileMode,

    /// Object name: full or abbreviated hex id, branch, or HEAD
    pub name: String,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
pub struct CatFileMode {
    /// Pretty-print the object's content
    #[arg(short)]
    pub print: bool,

    /// Show the object's type
    #[arg(short = 't')]
    pub kind: bool,

    /// Show the object's size
    #[arg(short = 's')]
    pub size: bool,

    /// Exit successfully if the object exists
    #[arg(short = 'e')]
    pub exists: bool,
}
