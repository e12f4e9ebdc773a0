//! Replay a directory of still images as a frame stream.

use image::RgbImage;
use lookout_core::fingerprint::is_image_path;
use lookout_core::session::{CaptureError, FrameSource};
use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Frames read in file-name order from one directory.
pub struct ImageSequence {
    pending: VecDeque<PathBuf>,
}

impl ImageSequence {
    pub fn open(dir: &Path) -> io::Result<Self> {
        let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && is_image_path(path))
            .collect();
        paths.sort();

        tracing::info!(dir = %dir.display(), frames = paths.len(), "opened image sequence");
        Ok(Self {
            pending: paths.into(),
        })
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

impl FrameSource for ImageSequence {
    fn next_frame(&mut self) -> Result<Option<RgbImage>, CaptureError> {
        let Some(path) = self.pending.pop_front() else {
            return Ok(None);
        };
        match image::open(&path) {
            Ok(img) => Ok(Some(img.to_rgb8())),
            Err(e) => Err(CaptureError::CorruptFrame(format!("{}: {e}", path.display()))),
        }
    }
}
