// Replay runner for recorded tracking data.
//
// Camera frames (grayscale image files) and Lighthouse pulses (JSON lines of
// `{"sensor_id", "duration", "timestamp"}`) are replayed through the library,
// each source on its own blocking worker, the way a live device would drive
// them from its polling thread.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{debug, info, warn};

use optical_tracking::core_modules::lighthouse::{Pulse, Watchman, WatchmanEvent};
use optical_tracking::core_modules::tracking_model::{LedPatternTable, TrackingModel};
use optical_tracking::pipeline::{Blobwatch, BlobwatchConfig};

#[derive(Parser, Debug)]
#[command(name = "optical_tracking")]
#[command(about = "Replay IR camera frames and Lighthouse pulse logs through the tracking core")]
#[command(version)]
struct Cli {
    /// Grayscale camera frames, in capture order.
    #[arg(long, num_args = 1..)]
    frames: Vec<PathBuf>,

    /// Lighthouse pulse log, one JSON pulse per line.
    #[arg(long)]
    pulses: Option<PathBuf>,

    /// Tracking model (JSON) providing the LED blink codes.
    /// Defaults to the Rift DK2 table.
    #[arg(long)]
    model: Option<PathBuf>,

    /// Blob detection settings (JSON). Frame size is taken from the images.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("parsing {}", path.display()))
}

fn load_patterns(model: Option<&Path>) -> Result<LedPatternTable> {
    let Some(path) = model else {
        return Ok(LedPatternTable::rift_dk2());
    };
    let model: TrackingModel = read_json(path)?;
    info!(
        "Loaded tracking model with {} points from {}",
        model.num_points(),
        path.display()
    );
    if model.patterns.is_empty() {
        bail!("{} has no LED blink patterns", path.display());
    }
    Ok(model.patterns)
}

fn replay_frames(
    paths: Vec<PathBuf>,
    mut config: BlobwatchConfig,
    patterns: LedPatternTable,
) -> Result<()> {
    let mut blobwatch: Option<Blobwatch> = None;

    for path in &paths {
        let image = image::open(path)
            .with_context(|| format!("loading frame {}", path.display()))?
            .to_luma8();

        let blobwatch = blobwatch.get_or_insert_with(|| {
            config.image_width = image.width();
            config.image_height = image.height();
            info!(
                "Camera: {}x{}, {} LED patterns",
                config.image_width,
                config.image_height,
                patterns.len()
            );
            Blobwatch::new(config.clone(), patterns.clone())
        });

        let ob = blobwatch
            .process(image.as_raw(), 0)
            .with_context(|| format!("processing frame {}", path.display()))?;

        info!(
            "{}: {} blobs, {} identified",
            path.display(),
            ob.num_blobs(),
            ob.identified().count()
        );
        for blob in &ob.blobs {
            debug!(
                "  ({:3}, {:3}) area {:3} age {:3} pattern {:03x} led {:?}",
                blob.x,
                blob.y,
                blob.area,
                blob.age,
                blob.pattern,
                blob.led_id()
            );
        }
    }
    Ok(())
}

fn replay_pulses(path: PathBuf) -> Result<()> {
    let file = File::open(&path).with_context(|| format!("opening {}", path.display()))?;
    let name = path
        .file_stem()
        .map_or_else(|| "watchman".to_string(), |s| s.to_string_lossy().into_owned());
    let mut watchman = Watchman::new(name);

    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("reading {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let pulse: Pulse = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid pulse", path.display(), number + 1))?;

        for event in watchman.handle(&pulse) {
            match event {
                WatchmanEvent::BaseSpotted { channel, serial } => {
                    info!("{}: base {:X} on channel {}", watchman.name(), serial, channel);
                }
                WatchmanEvent::Calibration { channel, base } => {
                    info!(
                        "{}: calibration for base {:X} on channel {}: {}",
                        watchman.name(),
                        base.serial,
                        channel,
                        serde_json::to_string(&base)?
                    );
                }
                WatchmanEvent::Frame { channel, frame } => {
                    debug!(
                        "{}: channel {} frame: {} sweeps over {} ticks",
                        watchman.name(),
                        channel,
                        frame.sweeps.len(),
                        frame.frame_duration
                    );
                }
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    let patterns = load_patterns(cli.model.as_deref())?;
    let config = match cli.config.as_deref() {
        Some(path) => read_json(path)?,
        None => BlobwatchConfig::default(),
    };

    // One worker per device, as a live camera or receiver would have.
    let mut workers = Vec::new();
    if !cli.frames.is_empty() {
        let frames = cli.frames;
        workers.push(tokio::task::spawn_blocking(move || {
            replay_frames(frames, config, patterns)
        }));
    }
    if let Some(pulses) = cli.pulses {
        workers.push(tokio::task::spawn_blocking(move || replay_pulses(pulses)));
    }
    if workers.is_empty() {
        warn!("Nothing to replay; pass --frames and/or --pulses");
    }

    for worker in workers {
        worker.await.context("replay worker panicked")??;
    }
    Ok(())
}
