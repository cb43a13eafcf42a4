use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use webp_animator::PixelLayout;

/// WebP animation player
///
/// Decodes a WebP file in the background and plays it back at its encoded
/// frame rate against a headless display sink.
#[derive(Parser, Debug)]
#[clap(name = "webp-animator", version)]
pub struct Opt {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print container metadata.
    Info(Info),

    /// Play the file, logging every presented frame.
    Play(Play),
}

#[derive(Args, Debug, Clone)]
pub struct Info {
    pub file: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct Play {
    pub file: PathBuf,

    /// Stop after this many presented frames.
    #[clap(long = "max-frames")]
    pub max_frames: Option<u64>,

    /// Write every presented frame as a PNG into this directory.
    #[clap(long = "dump-dir")]
    pub dump_dir: Option<PathBuf>,

    /// Config file to use instead of the one in the user config directory.
    #[clap(long = "config", short = 'c')]
    pub config: Option<PathBuf>,

    /// Frame clock period in milliseconds.
    #[clap(long = "tick-ms")]
    pub tick_ms: Option<u64>,

    /// Output pixel layout: rgba, bgra or bgra_premultiplied.
    #[clap(long = "layout")]
    pub layout: Option<PixelLayout>,
}
