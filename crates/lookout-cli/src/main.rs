mod config;
mod present;
mod watch;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::Config;
use lookout_core::store::summarize_diagnostics;
use lookout_core::{
    run_session, BatchReport, CaptureOptions, CaptureReport, EncodingStore, Enrollment, FrameSource,
    GalleryHandle, GalleryOrigin, ImageQuality, OnnxFaceEmbedder, OpenedGallery, RecognitionPipeline,
    SessionSummary, StopSignal,
};
use lookout_hw::{Camera, ImageSequence};
use present::{describe, ConsolePresenter, FaceRecord, OutputMode};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use watch::GalleryWatcher;

#[derive(Parser)]
#[command(name = "lookout", version, about = "Recognize known people in images and live video")]
struct Cli {
    /// Config file (default: ./lookout.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Maximum face distance for a match (lower is stricter)
    #[arg(long, global = true)]
    tolerance: Option<f32>,

    /// Directory with one subdirectory of reference photos per person
    #[arg(long, global = true)]
    reference_dir: Option<PathBuf>,

    /// Persisted gallery file
    #[arg(long = "store", global = true)]
    store_path: Option<PathBuf>,

    /// Directory containing the ONNX models
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    /// Rebuild the gallery even if the persisted one is current; a persisted
    /// gallery is still used if the reference directory is missing
    #[arg(long, global = true)]
    reencode: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Re-encode every reference image and save the gallery
    Encode,
    /// Recognize faces in one or more image files
    Image {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Emit JSON lines instead of text
        #[arg(long)]
        json: bool,
    },
    /// Recognize faces in a live camera feed until Ctrl-C
    Live {
        /// V4L2 device (overrides camera_device)
        #[arg(long)]
        device: Option<String>,
        /// Replay a directory of images instead of opening a camera
        #[arg(long, conflicts_with = "device")]
        frames_dir: Option<PathBuf>,
        /// Emit one JSON line per frame instead of change-only text
        #[arg(long)]
        json: bool,
    },
    /// Copy photos of a person into the reference directory
    Add {
        /// Person's name; becomes the directory name
        label: String,
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Capture photos of a person from the camera into the reference directory
    Enroll {
        /// Person's name; becomes the directory name
        label: String,
        /// Photos to save
        #[arg(long, default_value_t = 10)]
        count: u32,
        /// Minimum milliseconds between two saved photos
        #[arg(long, default_value_t = 1000)]
        cooldown_ms: u64,
        /// V4L2 device (overrides camera_device)
        #[arg(long)]
        device: Option<String>,
        /// Take frames from a directory of images instead of a camera
        #[arg(long, conflicts_with = "device")]
        frames_dir: Option<PathBuf>,
    },
    /// Show what the persisted gallery contains
    Stats,
    /// Report brightness, contrast and sharpness of image files
    Quality {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
}

impl Cli {
    fn config(&self) -> Result<Config> {
        let mut config = Config::load(self.config.as_deref())?;
        if let Some(t) = self.tolerance {
            config.tolerance = t;
        }
        if let Some(dir) = &self.reference_dir {
            config.reference_dir = dir.clone();
        }
        if let Some(path) = &self.store_path {
            config.store_path = path.clone();
        }
        if let Some(dir) = &self.model_dir {
            config.model_dir = dir.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.config()?;
    let store = EncodingStore::new(&config.reference_dir, &config.store_path);

    match cli.command {
        Commands::Encode => encode(&config, &store),
        Commands::Image { ref paths, json } => recognize_images(&config, &store, cli.reencode, paths, json),
        Commands::Live {
            device,
            frames_dir,
            json,
        } => {
            let source = LiveSource::choose(&config, device, frames_dir);
            let mode = if json { OutputMode::Json } else { OutputMode::Text };
            live(config, store, cli.reencode, source, mode).await
        }
        Commands::Add { ref label, ref paths } => add(&config, label, paths),
        Commands::Enroll {
            label,
            count,
            cooldown_ms,
            device,
            frames_dir,
        } => {
            let source = LiveSource::choose(&config, device, frames_dir);
            let options = CaptureOptions {
                count,
                cooldown: Duration::from_millis(cooldown_ms),
            };
            enroll(config, label, source, options).await
        }
        Commands::Stats => stats(&store),
        Commands::Quality { ref paths } => quality(paths),
    }
}

fn load_embedder(config: &Config) -> Result<OnnxFaceEmbedder> {
    OnnxFaceEmbedder::load(&config.model_dir)
        .with_context(|| format!("loading models from {}", config.model_dir.display()))
}

fn open_gallery(store: &EncodingStore, embedder: &mut OnnxFaceEmbedder, reencode: bool) -> Result<OpenedGallery> {
    let opened = store.open(embedder, reencode)?;
    report_opened(&opened);
    Ok(opened)
}

fn report_opened(opened: &OpenedGallery) {
    let gallery = &opened.manifest.gallery;
    match opened.origin {
        GalleryOrigin::Cached => eprintln!(
            "Loaded {} encodings for {} people (built {})",
            gallery.len(),
            gallery.label_count(),
            opened.manifest.built_at.format("%Y-%m-%d %H:%M:%S UTC"),
        ),
        GalleryOrigin::Rebuilt => {
            eprintln!(
                "Encoded {} reference images for {} people",
                gallery.len(),
                gallery.label_count()
            );
            for diag in &opened.diagnostics {
                eprintln!("  skipped: {diag}");
            }
        }
    }
    if gallery.is_empty() {
        eprintln!("Gallery is empty; every face will be reported as unknown");
    }
}

fn encode(config: &Config, store: &EncodingStore) -> Result<()> {
    let mut embedder = load_embedder(config)?;
    let opened = open_gallery(store, &mut embedder, true)?;

    let skipped = summarize_diagnostics(&opened.diagnostics);
    if !skipped.is_empty() {
        let parts: Vec<String> = skipped.iter().map(|(kind, n)| format!("{kind}={n}")).collect();
        eprintln!("Skipped: {}", parts.join(" "));
    }
    println!("Saved gallery to {}", store.store_path().display());
    Ok(())
}

fn recognize_images(
    config: &Config,
    store: &EncodingStore,
    reencode: bool,
    paths: &[PathBuf],
    json: bool,
) -> Result<()> {
    let mut embedder = load_embedder(config)?;
    let opened = open_gallery(store, &mut embedder, reencode)?;
    let gallery = opened.manifest.gallery;

    // Still images are full resolution and independent of each other
    let mut pipeline = RecognitionPipeline::new(embedder, Default::default())?;
    let mut report = BatchReport::default();

    for path in paths {
        let image = match image::open(path) {
            Ok(img) => img.to_rgb8(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cannot read image; skipping");
                continue;
            }
        };
        let observations = pipeline.process_image(&image, &gallery, config.tolerance);

        if json {
            let faces: Vec<FaceRecord<'_>> = observations.iter().map(FaceRecord::from).collect();
            let line = serde_json::json!({ "source": path, "faces": faces });
            println!("{line}");
        } else if observations.is_empty() {
            println!("{}: no faces", path.display());
        } else {
            let faces: Vec<String> = observations.iter().map(describe).collect();
            println!("{}: {}", path.display(), faces.join(", "));
        }
        report.push(path, observations);
    }

    if !json && report.entries.len() > 1 {
        println!();
        println!(
            "{} images, {} faces, {} unknown",
            report.entries.len(),
            report.total_faces(),
            report.unknown_faces()
        );
        for (label, images) in report.label_tally() {
            println!("  {label}: {images} image(s)");
        }
    }
    Ok(())
}

enum LiveSource {
    Camera(String),
    Replay(PathBuf),
}

impl LiveSource {
    fn choose(config: &Config, device: Option<String>, frames_dir: Option<PathBuf>) -> Self {
        match frames_dir {
            Some(dir) => LiveSource::Replay(dir),
            None => LiveSource::Camera(device.unwrap_or_else(|| config.camera_device.clone())),
        }
    }

    /// Open on the thread that will read from it; cameras stay on one thread.
    fn open(&self, warmup_frames: u32) -> Result<Box<dyn FrameSource>> {
        match self {
            LiveSource::Camera(device) => {
                let camera = Camera::open(device, warmup_frames)
                    .with_context(|| format!("opening camera {device}"))?;
                eprintln!("Watching {device} ({}x{}); press Ctrl-C to stop", camera.width, camera.height);
                Ok(Box::new(camera))
            }
            LiveSource::Replay(dir) => {
                let frames = ImageSequence::open(dir)
                    .with_context(|| format!("opening frames directory {}", dir.display()))?;
                Ok(Box::new(frames))
            }
        }
    }
}

fn stop_on_interrupt(stop: &StopSignal) {
    let stop = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received; stopping");
            stop.stop();
        }
    });
}

async fn live(
    config: Config,
    store: EncodingStore,
    reencode: bool,
    source: LiveSource,
    mode: OutputMode,
) -> Result<()> {
    let mut embedder = load_embedder(&config)?;
    let opened = open_gallery(&store, &mut embedder, reencode)?;
    let handle = Arc::new(GalleryHandle::new(opened.manifest.gallery.clone()));
    let stop = StopSignal::new();
    stop_on_interrupt(&stop);

    if config.watch_interval_secs > 0 {
        let watcher = GalleryWatcher::new(store, load_embedder(&config)?, opened.manifest, handle.clone());
        tokio::spawn(watcher.run(Duration::from_secs(config.watch_interval_secs), stop.clone()));
    }

    let mut pipeline = RecognitionPipeline::new(embedder, config.pipeline_config())?;
    let session_stop = stop.clone();
    let tolerance = config.tolerance;
    let warmup_frames = config.warmup_frames;

    // Capture and inference block; the source is opened on the worker thread
    let summary = tokio::task::spawn_blocking(move || -> Result<SessionSummary> {
        let mut presenter = ConsolePresenter::new(std::io::stdout(), mode);
        let mut frames = source.open(warmup_frames)?;
        let summary = run_session(&mut pipeline, &mut *frames, &handle, tolerance, &mut presenter, &session_stop)?;
        Ok(summary)
    })
    .await
    .context("recognition worker panicked")??;

    stop.stop();
    eprintln!(
        "Processed {} of {} frames, {} faces ({} failed, {} corrupt)",
        summary.processed, summary.frames, summary.faces, summary.failed, summary.corrupt_frames
    );
    Ok(())
}

fn add(config: &Config, label: &str, paths: &[PathBuf]) -> Result<()> {
    let mut embedder = load_embedder(config)?;
    let enrollment = Enrollment::new(&config.reference_dir);
    enrollment.label_dir(label)?;

    let mut added = 0usize;
    for path in paths {
        match enrollment.add_file(&mut embedder, label, path) {
            Ok(dest) => {
                println!("Added {}", dest.display());
                added += 1;
            }
            Err(e) => eprintln!("{}: {e}", path.display()),
        }
    }

    if added == 0 {
        anyhow::bail!("no photo added for {label}");
    }
    report_enrolled(&config.reference_dir, label, added);
    Ok(())
}

async fn enroll(config: Config, label: String, source: LiveSource, options: CaptureOptions) -> Result<()> {
    let mut embedder = load_embedder(&config)?;
    let enrollment = Enrollment::new(&config.reference_dir);
    enrollment.label_dir(&label)?;

    let stop = StopSignal::new();
    stop_on_interrupt(&stop);
    let warmup_frames = config.warmup_frames;
    let who = label.clone();

    eprintln!("Capturing {} photos of {label}; look at the camera and move slightly between shots", options.count);
    let report = tokio::task::spawn_blocking(move || -> Result<CaptureReport> {
        let mut frames = source.open(warmup_frames)?;
        Ok(enrollment.capture(&mut embedder, &who, &mut *frames, options, &stop)?)
    })
    .await
    .context("capture worker panicked")??;

    for path in &report.saved {
        println!("Saved {}", path.display());
    }
    eprintln!(
        "{} of {} photos saved ({} frames, {} rejected, {} corrupt)",
        report.saved.len(),
        options.count,
        report.frames,
        report.rejected,
        report.corrupt_frames
    );
    if !report.saved.is_empty() {
        report_enrolled(&config.reference_dir, &label, report.saved.len());
    }
    Ok(())
}

fn report_enrolled(reference_dir: &Path, label: &str, photos: usize) {
    eprintln!(
        "{photos} photo(s) for {label} in {}; the gallery is re-encoded on next use",
        reference_dir.join(label).display()
    );
}

fn stats(store: &EncodingStore) -> Result<()> {
    let manifest = EncodingStore::load(store.store_path()).with_context(|| {
        format!(
            "reading {} (run `lookout encode` to build it)",
            store.store_path().display()
        )
    })?;
    let gallery = &manifest.gallery;

    println!("Gallery: {}", store.store_path().display());
    println!("Built:   {}", manifest.built_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("Model:   {}", manifest.model_version.as_deref().unwrap_or("unknown"));
    println!(
        "Size:    {} encodings, {} people, dimension {}",
        gallery.len(),
        gallery.label_count(),
        gallery.dimension().map_or_else(|| "-".to_string(), |d| d.to_string())
    );
    for entry in gallery.stats() {
        println!("  {}: {}", entry.label, entry.encodings);
    }

    if store.reference_dir().is_dir() && EncodingStore::is_stale(&manifest, store.reference_dir()) {
        println!("Reference directory has changed since the last build; it will be re-encoded on next use");
    }
    Ok(())
}

fn quality(paths: &[PathBuf]) -> Result<()> {
    for path in paths {
        let image = image::open(path)
            .with_context(|| format!("reading {}", path.display()))?
            .to_rgb8();
        let q = ImageQuality::measure(&image);
        println!(
            "{}: brightness {:.1}, contrast {:.1}, sharpness {:.1}, score {:.2}",
            path.display(),
            q.brightness,
            q.contrast,
            q.sharpness,
            q.quality_score
        );
        for advice in q.advice() {
            println!("  {advice}");
        }
    }
    Ok(())
}
