mod cli;

use std::io::Write as _;
use std::path::Path;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use flatfs_rs::{Disk, FlatFs, FormatOptions, MountOptions, format};

use crate::cli::{CheckArgs, Cli, Command, MkfsArgs, NameArgs, PutArgs};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Mkfs(args) => mkfs(&args),
        Command::Check(args) => check(&args),
        Command::Ls(args) => ls(&args.image),
        Command::Stat(args) => stat(&args),
        Command::Cat(args) => cat(&args),
        Command::Put(args) => put(&args),
        Command::Rm(args) => rm(&args),
    }
}

fn open_disk(image: &Path) -> anyhow::Result<Disk> {
    Disk::open(image).with_context(|| format!("opening image {}", image.display()))
}

fn mount(image: &Path, options: MountOptions) -> anyhow::Result<FlatFs<Disk>> {
    FlatFs::mount(open_disk(image)?, options)
        .with_context(|| format!("mounting {}", image.display()))
}

fn mkfs(args: &MkfsArgs) -> anyhow::Result<()> {
    let image = &args.image.image;
    let mut disk = match args.blocks {
        Some(blocks) => Disk::create(image, blocks)
            .with_context(|| format!("creating image {}", image.display()))?,
        None => open_disk(image)?,
    };
    let summary = format(
        &mut disk,
        &FormatOptions {
            max_file_size: args.max_file_size,
            fast: args.fast,
        },
    )
    .context("formatting volume")?;
    info!(image = %image.display(), files = summary.total_files, "image formatted");

    println!("volume blocks : {}", summary.total_volume_blocks);
    println!("blocks / node : {}", summary.node_blocks);
    println!("bitmap blocks : {} (x2 mirrors)", summary.bitmap_blocks);
    println!("file slots    : {}", summary.total_files);
    println!("file capacity : {} bytes", summary.file_capacity);
    Ok(())
}

fn check(args: &CheckArgs) -> anyhow::Result<()> {
    let fs = mount(
        &args.image.image,
        MountOptions {
            read_only: args.read_only,
            force_check: true,
            ..MountOptions::default()
        },
    )?;
    let stats = fs.statfs();
    println!(
        "ok: {} blocks, {}/{} file slots used",
        stats.total_volume_blocks, stats.used_files, stats.total_files
    );
    fs.unmount().context("unmounting")?;
    Ok(())
}

fn read_only() -> MountOptions {
    MountOptions {
        read_only: true,
        ..MountOptions::default()
    }
}

fn ls(image: &Path) -> anyhow::Result<()> {
    let fs = mount(image, read_only())?;
    for entry in fs.readdir().context("listing volume")? {
        println!(
            "{:3}  {:06o}  {:>10}  {}",
            entry.node,
            entry.mode,
            entry.size,
            entry.name
        );
    }
    Ok(())
}

fn stat(args: &NameArgs) -> anyhow::Result<()> {
    let fs = mount(&args.image.image, read_only())?;
    let meta = fs
        .stat(&args.name)
        .with_context(|| format!("stat {}", args.name))?;
    println!("node : {}", meta.node);
    println!("name : {}", meta.name);
    println!("size : {} bytes", meta.size);
    println!("mode : {:06o}", meta.mode);
    println!("owner: {}:{}", meta.uid, meta.gid);
    println!("ctime: {}", meta.ctime);
    println!("mtime: {}", meta.mtime);
    Ok(())
}

fn cat(args: &NameArgs) -> anyhow::Result<()> {
    let fs = mount(&args.image.image, read_only())?;
    let handle = fs
        .open(&args.name)
        .with_context(|| format!("opening {}", args.name))?;
    let size = fs.fstat(handle).context("reading metadata")?.size;

    let mut payload = vec![0u8; size as usize];
    let read = fs.read(handle, 0, &mut payload).context("reading payload")?;
    std::io::stdout().write_all(&payload[..read])?;
    Ok(())
}

fn put(args: &PutArgs) -> anyhow::Result<()> {
    let payload = std::fs::read(&args.source)
        .with_context(|| format!("reading {}", args.source.display()))?;
    let name = match &args.name {
        Some(name) => name.clone(),
        None => args
            .source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .context("source path has no file name")?,
    };
    let mode = u32::from_str_radix(&args.mode, 8).context("mode must be octal")?;

    let fs = mount(&args.image.image, MountOptions::default())?;
    let handle = fs
        .create(&name, mode, 0, 0)
        .with_context(|| format!("creating {name}"))?;
    let written = fs.write(handle, 0, &payload).context("writing payload")?;
    if written < payload.len() {
        anyhow::bail!("short write: {written} of {} bytes fit the node", payload.len());
    }
    fs.unmount().context("unmounting")?;
    info!(name = %name, bytes = written, "stored file");
    Ok(())
}

fn rm(args: &NameArgs) -> anyhow::Result<()> {
    let fs = mount(&args.image.image, MountOptions::default())?;
    fs.remove(&args.name)
        .with_context(|| format!("removing {}", args.name))?;
    fs.unmount().context("unmounting")?;
    info!(name = %args.name, "removed file");
    Ok(())
}
