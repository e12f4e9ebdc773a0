//! Live recognition loop: pull frames, recognize, hand results to a presenter.

use crate::embedder::FaceEmbedder;
use crate::gallery::GalleryHandle;
use crate::pipeline::RecognitionPipeline;
use crate::types::FaceObservation;
use image::RgbImage;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    /// A single frame could not be decoded; the stream itself is usable.
    #[error("corrupt frame: {0}")]
    CorruptFrame(String),
    #[error("capture device failed: {0}")]
    Device(String),
}

/// Blocking source of frames (camera, recorded sequence, ...).
pub trait FrameSource {
    /// Next frame, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<RgbImage>, CaptureError>;
}

/// Consumer of per-frame recognition results.
pub trait Presenter {
    fn present(&mut self, frame_index: u64, observations: &[FaceObservation]);
}

/// Cooperative stop flag shared between a session and whoever ends it.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Capture(#[from] CaptureError),
}

/// Frame counts for one finished session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub frames: u64,
    pub processed: u64,
    pub failed: u64,
    pub corrupt_frames: u64,
    pub faces: u64,
}

/// Run until the source ends or `stop` is raised.
///
/// The stop flag is checked once per frame. The gallery is re-read from
/// `gallery` on every frame so a rebuilt gallery takes effect immediately.
/// Corrupt frames are skipped; a device failure ends the session.
pub fn run_session<E, S, P>(
    pipeline: &mut RecognitionPipeline<E>,
    source: &mut S,
    gallery: &GalleryHandle,
    tolerance: f32,
    presenter: &mut P,
    stop: &StopSignal,
) -> Result<SessionSummary, SessionError>
where
    E: FaceEmbedder,
    S: FrameSource + ?Sized,
    P: Presenter + ?Sized,
{
    let start = pipeline.stats();
    let mut summary = SessionSummary::default();
    let mut frame_index = 0u64;

    tracing::info!(
        tolerance,
        frame_skip_interval = pipeline.config().frame_skip_interval,
        "recognition session started"
    );

    while !stop.is_stopped() {
        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                tracing::info!("frame source exhausted");
                break;
            }
            Err(CaptureError::CorruptFrame(reason)) => {
                tracing::warn!(frame = frame_index, %reason, "skipping corrupt frame");
                summary.corrupt_frames += 1;
                frame_index += 1;
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let snapshot = gallery.snapshot();
        let observations = pipeline.process_frame(&frame, &snapshot, tolerance, frame_index);
        presenter.present(frame_index, &observations);
        frame_index += 1;
    }

    let end = pipeline.stats();
    summary.frames = end.frames_seen - start.frames_seen;
    summary.processed = end.frames_processed - start.frames_processed;
    summary.failed = end.frames_failed - start.frames_failed;
    summary.faces = end.faces_observed - start.faces_observed;

    tracing::info!(
        frames = summary.frames,
        processed = summary.processed,
        failed = summary.failed,
        corrupt = summary.corrupt_frames,
        stopped = stop.is_stopped(),
        "recognition session ended"
    );
    Ok(summary)
}
