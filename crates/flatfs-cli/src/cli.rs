use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Format an image file as an empty volume.
    Mkfs(MkfsArgs),

    /// Mount with the full consistency check and report volume state.
    Check(CheckArgs),

    /// List every file on the volume.
    Ls(ImageArgs),

    /// Print one file's metadata.
    Stat(NameArgs),

    /// Write a file's payload to stdout.
    Cat(NameArgs),

    /// Copy a local file onto the volume.
    Put(PutArgs),

    /// Remove a file.
    Rm(NameArgs),
}

#[derive(Args)]
pub struct ImageArgs {
    /// Path to the volume image.
    #[arg(long)]
    pub image: PathBuf,
}

#[derive(Args)]
pub struct MkfsArgs {
    #[command(flatten)]
    pub image: ImageArgs,

    /// Create the image with this many 512-byte blocks instead of
    /// formatting an existing file in place.
    #[arg(long)]
    pub blocks: Option<u32>,

    /// Largest payload one file must hold, in bytes.
    #[arg(long, default_value_t = 512)]
    pub max_file_size: u32,

    /// Skip zeroing the node header region.
    #[arg(long, default_value_t = false)]
    pub fast: bool,
}

#[derive(Args)]
pub struct CheckArgs {
    #[command(flatten)]
    pub image: ImageArgs,

    /// Report problems without writing repairs back.
    #[arg(long, default_value_t = false)]
    pub read_only: bool,
}

#[derive(Args)]
pub struct NameArgs {
    #[command(flatten)]
    pub image: ImageArgs,

    /// File name on the volume.
    pub name: String,
}

#[derive(Args)]
pub struct PutArgs {
    #[command(flatten)]
    pub image: ImageArgs,

    /// Local file to copy in.
    pub source: PathBuf,

    /// Name on the volume; defaults to the source file name.
    #[arg(long)]
    pub name: Option<String>,

    /// Mode bits for the new file.
    #[arg(long, default_value = "644")]
    pub mode: String,
}
