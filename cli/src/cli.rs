use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "capturekit",
    about = "Inspect shareable content, take screenshots and record frames",
    author,
    version,
    propagate_version = true
)]
pub struct Cli {
    /// JSON file with `client`, `stream` and `discovery` sections.
    #[arg(long, global = true, env = "CAPTUREKIT_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Enumerate displays, windows and applications.
    List {
        /// Print the snapshot as JSON (for scripting).
        #[arg(long)]
        json: bool,

        /// Leave desktop windows out.
        #[arg(long)]
        exclude_desktop: bool,

        /// Only list windows currently on screen.
        #[arg(long)]
        on_screen_only: bool,
    },
    /// Capture a single frame and write it as PNG.
    Screenshot {
        #[command(flatten)]
        target: Target,

        #[command(flatten)]
        capture: CaptureArgs,

        /// Where to write the PNG.
        #[arg(long, short)]
        output: PathBuf,
    },
    /// Run a stream and report delivery statistics.
    Record {
        #[command(flatten)]
        target: Target,

        #[command(flatten)]
        capture: CaptureArgs,

        /// Stop after this many frames.
        #[arg(long)]
        frames: Option<u64>,

        /// Stop after this many seconds.
        #[arg(long, default_value_t = 5.0)]
        seconds: f64,

        /// Frame queue capacity (overrides the config file).
        #[arg(long)]
        queue_capacity: Option<usize>,

        /// Print the final statistics as JSON.
        #[arg(long)]
        json: bool,
    },
}

/// What to capture. Defaults to the first display.
#[derive(Debug, Clone, Default, Args)]
pub struct Target {
    /// Capture this display.
    #[arg(long, conflicts_with = "window")]
    pub display: Option<u32>,

    /// Capture this window on its own.
    #[arg(long)]
    pub window: Option<u32>,
}

/// Flags that override the `stream` section of the config file.
#[derive(Debug, Clone, Default, Args)]
pub struct CaptureArgs {
    #[arg(long)]
    pub width: Option<u32>,

    #[arg(long)]
    pub height: Option<u32>,

    /// Frame rate cap; 0 removes the cap.
    #[arg(long)]
    pub fps: Option<f64>,

    #[arg(long)]
    pub hide_cursor: bool,

    /// Also capture system audio.
    #[arg(long)]
    pub audio: bool,

    /// Surfaces the provider may have in flight.
    #[arg(long)]
    pub queue_depth: Option<u32>,
}
