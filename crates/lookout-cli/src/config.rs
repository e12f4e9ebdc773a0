use anyhow::{bail, Context, Result};
use lookout_core::PipelineConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// File read from the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "lookout.toml";

/// Effective settings: defaults, then the TOML file, then `LOOKOUT_*`
/// variables, then command-line flags.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Directory with one subdirectory of reference photos per person.
    pub reference_dir: PathBuf,
    /// Persisted gallery file.
    pub store_path: PathBuf,
    /// Directory containing det_10g.onnx and w600k_r50.onnx.
    pub model_dir: PathBuf,
    /// Maximum Euclidean distance for a positive match.
    pub tolerance: f32,
    /// Fully process one live frame in every N.
    pub frame_skip_interval: u32,
    /// Live frames are shrunk by this factor before detection.
    pub detection_scale: f32,
    /// V4L2 device path.
    pub camera_device: String,
    /// Frames discarded after opening the camera (AGC/AE settling).
    pub warmup_frames: u32,
    /// Seconds between reference directory checks during `live`; 0 disables.
    pub watch_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reference_dir: PathBuf::from("known_faces"),
            store_path: PathBuf::from("face_encodings.json"),
            model_dir: default_model_dir(&|key: &str| std::env::var(key).ok()),
            tolerance: 0.6,
            frame_skip_interval: 2,
            detection_scale: 0.5,
            camera_device: "/dev/video0".to_string(),
            warmup_frames: 4,
            watch_interval_secs: 0,
        }
    }
}

/// Keys accepted in `lookout.toml`; all optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    reference_dir: Option<PathBuf>,
    store_path: Option<PathBuf>,
    model_dir: Option<PathBuf>,
    tolerance: Option<f32>,
    frame_skip_interval: Option<u32>,
    detection_scale: Option<f32>,
    camera_device: Option<String>,
    warmup_frames: Option<u32>,
    watch_interval_secs: Option<u64>,
}

impl Config {
    /// Load from `path` (required to exist) or from `lookout.toml` if present,
    /// then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Config::default();

        let file = match path {
            Some(p) => Some(p.to_path_buf()),
            None => Some(PathBuf::from(DEFAULT_CONFIG_FILE)).filter(|p| p.is_file()),
        };
        if let Some(file) = file {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("reading config {}", file.display()))?;
            config
                .merge_toml(&text)
                .with_context(|| format!("parsing config {}", file.display()))?;
            tracing::debug!(path = %file.display(), "loaded config file");
        }

        config.apply_env(|key: &str| std::env::var(key).ok())?;
        Ok(config)
    }

    fn merge_toml(&mut self, text: &str) -> Result<()> {
        let file: FileConfig = toml::from_str(text)?;
        if let Some(v) = file.reference_dir {
            self.reference_dir = v;
        }
        if let Some(v) = file.store_path {
            self.store_path = v;
        }
        if let Some(v) = file.model_dir {
            self.model_dir = v;
        }
        if let Some(v) = file.tolerance {
            self.tolerance = v;
        }
        if let Some(v) = file.frame_skip_interval {
            self.frame_skip_interval = v;
        }
        if let Some(v) = file.detection_scale {
            self.detection_scale = v;
        }
        if let Some(v) = file.camera_device {
            self.camera_device = v;
        }
        if let Some(v) = file.warmup_frames {
            self.warmup_frames = v;
        }
        if let Some(v) = file.watch_interval_secs {
            self.watch_interval_secs = v;
        }
        Ok(())
    }

    /// Apply `LOOKOUT_*` overrides. Unparseable numbers are errors.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup("LOOKOUT_REFERENCE_DIR") {
            self.reference_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("LOOKOUT_STORE_PATH") {
            self.store_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("LOOKOUT_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("LOOKOUT_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        env_parse(&lookup, "LOOKOUT_TOLERANCE", &mut self.tolerance)?;
        env_parse(&lookup, "LOOKOUT_FRAME_SKIP_INTERVAL", &mut self.frame_skip_interval)?;
        env_parse(&lookup, "LOOKOUT_DETECTION_SCALE", &mut self.detection_scale)?;
        env_parse(&lookup, "LOOKOUT_WARMUP_FRAMES", &mut self.warmup_frames)?;
        env_parse(&lookup, "LOOKOUT_WATCH_INTERVAL_SECS", &mut self.watch_interval_secs)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            bail!("tolerance must be a non-negative number, got {}", self.tolerance);
        }
        self.pipeline_config()
            .validate()
            .context("invalid pipeline settings")?;
        Ok(())
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            frame_skip_interval: self.frame_skip_interval,
            detection_scale: self.detection_scale,
        }
    }
}

fn env_parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) -> Result<()>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(key) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{key}={raw:?}: {e}"))?;
    }
    Ok(())
}

/// `$XDG_DATA_HOME/lookout/models`, falling back to `~/.local/share`.
fn default_model_dir(lookup: &dyn Fn(&str) -> Option<String>) -> PathBuf {
    lookup("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("lookout/models")
}
