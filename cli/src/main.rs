mod cli;
mod png;
mod settings;

use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Result};
use clap::Parser;
use crossbeam_channel::RecvTimeoutError;
use serde::Serialize;
use tracing::{info, trace, warn};
use tracing_subscriber::{fmt, EnvFilter};

use capturekit::{
    capture_image, CaptureStream, ContentFilter, DiscoveryOptions, OutputType, PixelFormat, Rect,
    ShareableContent, StreamConfiguration,
};

use settings::FileConfig;

fn main() -> Result<()> {
    init_tracing()?;
    let cli = cli::Cli::parse();
    let config = FileConfig::load(cli.config.as_deref())?;
    run(cli.command, config)
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!(e))
}

fn run(command: cli::Commands, config: FileConfig) -> Result<()> {
    let timeout = config.client.completion_timeout();
    match command {
        cli::Commands::List {
            json,
            exclude_desktop,
            on_screen_only,
        } => {
            let options = DiscoveryOptions {
                exclude_desktop_windows: exclude_desktop || config.discovery.exclude_desktop_windows,
                on_screen_windows_only: on_screen_only || config.discovery.on_screen_windows_only,
            };
            let content = ShareableContent::get_with_options(options)?.wait_for(timeout)?;
            list(&content, json)
        }
        cli::Commands::Screenshot {
            target,
            capture,
            output,
        } => {
            let mut settings = config.stream.clone();
            capture.apply(&mut settings);
            settings.pixel_format = PixelFormat::Bgra32;

            let content = ShareableContent::get_with_options(config.discovery)?.wait_for(timeout)?;
            let filter = select_filter(&content, &target)?;
            let configuration = StreamConfiguration::from_settings(&settings)?;

            let image = capture_image(&filter, &configuration)?.wait_for(timeout)?;
            png::write_png(&image.pixel_buffer()?, &output)?;
            info!(
                width = image.width(),
                height = image.height(),
                path = %output.display(),
                "Screenshot written"
            );
            Ok(())
        }
        cli::Commands::Record {
            target,
            capture,
            frames,
            seconds,
            queue_capacity,
            json,
        } => {
            let mut settings = config.stream.clone();
            capture.apply(&mut settings);
            let mut client = config.client;
            if let Some(capacity) = queue_capacity {
                client.frame_queue_capacity = capacity;
            }
            client.validate()?;

            let content = ShareableContent::get_with_options(config.discovery)?.wait_for(timeout)?;
            let filter = select_filter(&content, &target)?;
            let configuration = StreamConfiguration::from_settings(&settings)?;
            record(
                &filter,
                &configuration,
                &client,
                frames,
                Duration::from_secs_f64(seconds.max(0.0)),
                json,
            )
        }
    }
}

#[derive(Serialize)]
struct DisplayEntry {
    display_id: u32,
    width: u32,
    height: u32,
    frame: Rect,
    scale_factor: f64,
}

#[derive(Serialize)]
struct WindowEntry {
    window_id: u32,
    title: Option<String>,
    application: Option<String>,
    frame: Rect,
    layer: i32,
    on_screen: bool,
}

#[derive(Serialize)]
struct ApplicationEntry {
    process_id: i32,
    bundle_identifier: String,
    name: String,
}

#[derive(Serialize)]
struct Listing {
    displays: Vec<DisplayEntry>,
    windows: Vec<WindowEntry>,
    applications: Vec<ApplicationEntry>,
}

fn list(content: &ShareableContent, json: bool) -> Result<()> {
    let listing = Listing {
        displays: content
            .displays()
            .iter()
            .map(|d| DisplayEntry {
                display_id: d.display_id(),
                width: d.width(),
                height: d.height(),
                frame: d.frame(),
                scale_factor: d.scale_factor(),
            })
            .collect(),
        windows: content
            .windows()
            .iter()
            .map(|w| WindowEntry {
                window_id: w.window_id(),
                title: w.title(),
                application: w.owning_application().map(|app| app.application_name()),
                frame: w.frame(),
                layer: w.window_layer(),
                on_screen: w.is_on_screen(),
            })
            .collect(),
        applications: content
            .applications()
            .iter()
            .map(|a| ApplicationEntry {
                process_id: a.process_id(),
                bundle_identifier: a.bundle_identifier(),
                name: a.application_name(),
            })
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    println!("Displays:");
    for d in &listing.displays {
        println!("  [{}] {}x{} @{}x", d.display_id, d.width, d.height, d.scale_factor);
    }
    println!("Windows:");
    for w in &listing.windows {
        println!(
            "  [{}] {} ({}) {}x{}{}",
            w.window_id,
            w.title.as_deref().unwrap_or("<untitled>"),
            w.application.as_deref().unwrap_or("?"),
            w.frame.width(),
            w.frame.height(),
            if w.on_screen { "" } else { " off-screen" }
        );
    }
    println!("Applications:");
    for a in &listing.applications {
        println!("  [{}] {} ({})", a.process_id, a.name, a.bundle_identifier);
    }
    Ok(())
}

fn select_filter(content: &ShareableContent, target: &cli::Target) -> Result<ContentFilter> {
    if let Some(id) = target.window {
        let windows = content.windows();
        let window = windows
            .iter()
            .find(|w| w.window_id() == id)
            .ok_or_else(|| anyhow!("no window with id {id}"))?;
        return Ok(ContentFilter::desktop_independent_window(window)?);
    }

    let displays = content.displays();
    let display = match target.display {
        Some(id) => displays
            .iter()
            .find(|d| d.display_id() == id)
            .ok_or_else(|| anyhow!("no display with id {id}"))?,
        None => displays.first().ok_or_else(|| anyhow!("no displays available"))?,
    };
    Ok(ContentFilter::display_excluding_windows(display, &[])?)
}

fn record(
    filter: &ContentFilter,
    configuration: &StreamConfiguration,
    client: &capturekit::ClientConfig,
    max_frames: Option<u64>,
    duration: Duration,
    json: bool,
) -> Result<()> {
    let timeout = client.completion_timeout();
    let (error_tx, error_rx) = crossbeam_channel::bounded(1);

    let stream = CaptureStream::builder(filter, configuration)
        .on_error(move |e| {
            let _ = error_tx.try_send(e);
        })
        .build()?;
    let frames = stream.frames(OutputType::Screen, client.frame_options())?;

    stream.start()?.wait_for(timeout)?;
    info!(?duration, ?max_frames, "Recording");

    let started = Instant::now();
    let mut last_report = Instant::now();
    let mut received = 0u64;
    let mut failure = None;

    while started.elapsed() < duration && max_frames.map_or(true, |max| received < max) {
        if let Ok(e) = error_rx.try_recv() {
            failure = Some(e);
            break;
        }
        match frames.recv_timeout(Duration::from_millis(100)) {
            Ok(sample) => {
                received += 1;
                if let Some(frame) = sample.frame_info() {
                    trace!(sequence = frame.sequence, status = ?frame.status, "Frame");
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if last_report.elapsed() >= Duration::from_secs(1) {
            let s = frames.snapshot();
            info!(
                fps = s.fps,
                received = s.received,
                dropped = s.dropped,
                queued = s.queued,
                "Stats"
            );
            frames.stats().mark_reported();
            last_report = Instant::now();
        }
    }

    if let Some(e) = failure.or_else(|| error_rx.try_recv().ok()) {
        bail!("stream failed: {e}");
    }
    if let Err(e) = stream.stop()?.wait_for(timeout) {
        warn!(error = %e, "Stop did not complete cleanly");
    }

    let snapshot = frames.snapshot();
    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        println!(
            "{} frames consumed, {} dropped, {} received in {:.1}s",
            snapshot.consumed,
            snapshot.dropped,
            snapshot.received,
            started.elapsed().as_secs_f64()
        );
    }
    Ok(())
}
