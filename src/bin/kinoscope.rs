use std::{
    path::PathBuf,
    sync::{atomic::AtomicBool, mpsc::channel},
};

use anyhow::Context as _;
use clap::{Parser, Subcommand};

use kinoscope::{
    export::{export_animation, ExportOptions},
    resolve::resolve_bytes,
    store::{AnimationStore, StorePaths},
};

#[derive(Parser, Debug)]
#[command(name = "kinoscope", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Identify an animation file and print its properties.
    Info(InfoArgs),
    /// Export an animation to an MP4 (requires `ffmpeg` on PATH).
    Export(ExportArgs),
    /// Delete the persisted animation cache.
    ClearCache(ClearCacheArgs),
}

#[derive(Parser, Debug)]
struct InfoArgs {
    /// Input file: vector JSON, zip bundle, BVA container or GIF.
    #[arg(long = "in")]
    in_path: PathBuf,
}

#[derive(Parser, Debug)]
struct ExportArgs {
    /// Input file: vector JSON, zip bundle, BVA container or GIF.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Output MP4 path.
    #[arg(long)]
    out: PathBuf,

    /// Output frame rate.
    #[arg(long, default_value_t = 30)]
    framerate: u32,

    /// Virtual frame driving rate; defaults to the output frame rate.
    #[arg(long)]
    frame_interval: Option<u32>,

    /// Minimum accepted animation duration in seconds.
    #[arg(long, default_value_t = 1.0)]
    min_duration: f64,
}

#[derive(Parser, Debug)]
struct ClearCacheArgs {
    /// Store namespace root; defaults to the system temp directory.
    #[arg(long)]
    store: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Command::Info(args) => info(args),
        Command::Export(args) => export(args),
        Command::ClearCache(args) => clear_cache(args),
    }
}

fn default_store_root() -> PathBuf {
    std::env::temp_dir().join("kinoscope")
}

fn info(args: InfoArgs) -> anyhow::Result<()> {
    let bytes = std::fs::read(&args.in_path)
        .with_context(|| format!("read '{}'", args.in_path.display()))?;
    let scratch = default_store_root().join("cli-scratch");
    let resolved = resolve_bytes(&scratch, &bytes)?;

    let animation = &resolved.animation;
    let size = animation.size();
    println!("kind:     {:?}", animation.kind());
    println!("size:     {}x{}", size.width, size.height);
    println!("frames:   {}", animation.frame_count());
    println!("fps:      {:.2}", animation.fps());
    println!("duration: {:.3}s", animation.duration_secs());
    Ok(())
}

fn export(args: ExportArgs) -> anyhow::Result<()> {
    let bytes = std::fs::read(&args.in_path)
        .with_context(|| format!("read '{}'", args.in_path.display()))?;
    let scratch = default_store_root().join("cli-scratch");
    let resolved = resolve_bytes(&scratch, &bytes)?;

    let mut options = ExportOptions::new(args.framerate);
    options.frame_interval = args.frame_interval.unwrap_or(args.framerate);
    options.min_duration_secs = args.min_duration;

    let animation = std::sync::Arc::new(resolved.animation);
    export_animation(&animation, &args.out, &options, &AtomicBool::new(false))?;
    println!("wrote {}", args.out.display());
    Ok(())
}

fn clear_cache(args: ClearCacheArgs) -> anyhow::Result<()> {
    let root = args.store.unwrap_or_else(default_store_root);
    let store = AnimationStore::new(StorePaths::new(&root));
    let (tx, rx) = channel();
    store.clear_cache(move || {
        let _ = tx.send(());
    });
    rx.recv().context("store worker went away")?;
    println!("cleared {}", root.display());
    Ok(())
}
