use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facegate_core::{Encoder, GalleryBuilder, GalleryStore, MatchDecision, Matcher, ToleranceMatcher};
use facegate_hw::Camera;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod webcam;

use config::Config;

#[derive(Parser)]
#[command(name = "facegate", version, about = "Face recognition gate: enroll faces, recognise them")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Gallery (encodings) file
    #[arg(short, long, global = true)]
    encodings: Option<PathBuf>,
    /// Match tolerance; candidates must be strictly closer than this
    #[arg(long, global = true)]
    tolerance: Option<f32>,
    /// Reject the best candidate unless it is strictly closer than this
    #[arg(long, global = true)]
    confidence_threshold: Option<f32>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild the gallery from a folder of single-face images
    Regenerate {
        /// Folder with .jpg/.jpeg/.png images; each file name is an identity
        #[arg(short, long)]
        images: Option<PathBuf>,
    },
    /// Recognise faces from the webcam until Ctrl-C
    Webcam {
        /// V4L2 device path
        #[arg(short, long)]
        device: Option<String>,
        /// Stop after this many frames
        #[arg(long)]
        max_frames: Option<u64>,
        /// Open this URL on the first match, then exit
        #[arg(long)]
        open_url: Option<String>,
    },
    /// Recognise every face in a still image and print JSON
    Identify {
        /// Image file
        image: PathBuf,
    },
    /// List enrolled identities
    List,
    /// List capture devices
    Devices,
}

#[derive(Serialize)]
struct FaceResult<'a> {
    region: facegate_core::FaceRegion,
    #[serde(flatten)]
    decision: &'a MatchDecision,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(path) = cli.encodings {
        config.gallery_path = path;
    }
    if let Some(t) = cli.tolerance {
        config.tolerance = t;
    }
    if let Some(t) = cli.confidence_threshold {
        config.confidence_threshold = Some(t);
    }
    config.validate()?;

    match cli.command {
        Commands::Regenerate { images } => {
            let images = images.unwrap_or_else(|| config.images_dir.clone());
            regenerate(&config, &images)?;
        }
        Commands::Webcam {
            device,
            max_frames,
            open_url,
        } => {
            if let Some(device) = device {
                config.camera_device = device;
            }
            run_webcam(config, max_frames, open_url).await?;
        }
        Commands::Identify { image } => identify(&config, &image)?,
        Commands::List => {
            let gallery = GalleryStore::new(&config.gallery_path).load()?;
            if gallery.is_empty() {
                println!("No identities enrolled");
            }
            for entry in &gallery {
                println!(
                    "{:<24} dim={:<4} sha256={}",
                    entry.identity,
                    entry.encoding.dim(),
                    &entry.encoding.fingerprint()[..16]
                );
            }
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No capture devices found");
            }
            for d in devices {
                println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
        }
    }

    Ok(())
}

fn regenerate(config: &Config, images: &Path) -> Result<()> {
    let mut builder = GalleryBuilder::new(config.encoder());
    builder.enroll_dir(images)?;
    let report = builder.finish();

    for entry in &report.gallery {
        println!("Added {}", entry.identity);
    }
    for s in &report.skipped {
        println!("Skipped {} ({}): {}", s.identity, s.source.display(), s.reason);
    }

    let store = GalleryStore::new(&config.gallery_path);
    store.save(&report.gallery)?;
    println!(
        "Encodings regenerated: {} added, {} skipped, saved to {}",
        report.gallery.len(),
        report.skipped.len(),
        store.path().display()
    );
    Ok(())
}

fn identify(config: &Config, path: &Path) -> Result<()> {
    let gallery = GalleryStore::new(&config.gallery_path).load()?;
    let matcher = ToleranceMatcher::new(config.match_policy()?);
    let image = image::open(path)
        .with_context(|| format!("decoding {}", path.display()))?
        .to_rgb8();

    let faces = config.encoder().faces(&image)?;
    let decisions = faces
        .iter()
        .map(|f| matcher.decide(&f.encoding, &gallery))
        .collect::<Result<Vec<_>, _>>()?;
    let results: Vec<FaceResult<'_>> = faces
        .iter()
        .zip(&decisions)
        .map(|(f, decision)| FaceResult {
            region: f.region,
            decision,
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

async fn run_webcam(config: Config, max_frames: Option<u64>, open_url: Option<String>) -> Result<()> {
    let gallery = GalleryStore::new(&config.gallery_path).load()?;
    if gallery.is_empty() {
        bail!("No encodings found! Run `facegate regenerate` first.");
    }
    let matcher = ToleranceMatcher::new(config.match_policy()?);
    let options = webcam::LoopOptions {
        frame_scale: config.frame_scale,
        max_frames,
        stop_on_match: open_url.is_some(),
    };

    let stop = Arc::new(AtomicBool::new(false));
    let worker_stop = Arc::clone(&stop);
    let mut worker = tokio::task::spawn_blocking(move || {
        let camera = Camera::open(&config.camera_device)?;
        let mut stream = camera.stream()?;
        let mut encoder = config.encoder();
        println!("Starting webcam on {}... Press Ctrl-C to quit.", config.camera_device);

        let mut last_overlay = String::new();
        webcam::run_loop(
            &mut stream,
            &mut encoder,
            &matcher,
            &gallery,
            &options,
            &worker_stop,
            |status| {
                let overlay = status.overlay();
                if overlay != last_overlay {
                    println!("{overlay}");
                    last_overlay = overlay;
                }
            },
        )
    });

    let outcome = tokio::select! {
        joined = &mut worker => joined??,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received; stopping after the current frame");
            stop.store(true, Ordering::Relaxed);
            worker.await??
        }
    };
    tracing::info!(?outcome, "webcam loop finished");

    if let (webcam::LoopOutcome::Matched { identity, .. }, Some(url)) = (&outcome, &open_url) {
        println!("Verified: {identity}. Opening {url}");
        webcam::open_url(url)?;
    }
    Ok(())
}
