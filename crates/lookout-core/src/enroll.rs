//! Adding reference photos for a person: copied from files or captured live.
//!
//! Every photo must pass the same admission rule as a gallery build (exactly
//! one face, finite encoding) before it is written under
//! `reference_dir/<label>/`. The gallery itself is not touched; the next
//! [`EncodingStore::open`](crate::store::EncodingStore::open) sees the new
//! files and rebuilds.

use crate::embedder::{locate_and_encode, FaceEmbedder};
use crate::fingerprint::is_image_path;
use crate::session::{CaptureError, FrameSource, StopSignal};
use crate::store::{single_reference_face, BuildDiagnostic};
use image::RgbImage;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("invalid label {0:?}: must be a plain directory name")]
    InvalidLabel(String),
    #[error("{} is not a supported image type (jpg, jpeg, png, bmp)", .0.display())]
    UnsupportedFormat(PathBuf),
    #[error("rejected: {0}")]
    Rejected(#[from] BuildDiagnostic),
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("save {}: {source}", path.display())]
    Save {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error(transparent)]
    Capture(#[from] CaptureError),
}

/// How a live capture run picks frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureOptions {
    /// Photos to save before stopping.
    pub count: u32,
    /// Minimum time between two saved photos.
    pub cooldown: Duration,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            count: 10,
            cooldown: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CaptureReport {
    pub saved: Vec<PathBuf>,
    pub frames: u64,
    /// Frames with no face, several faces or a failed encoding.
    pub rejected: u64,
    pub corrupt_frames: u64,
}

/// Writes reference photos for one reference directory.
#[derive(Debug, Clone)]
pub struct Enrollment {
    reference_dir: PathBuf,
}

impl Enrollment {
    pub fn new(reference_dir: impl Into<PathBuf>) -> Self {
        Self {
            reference_dir: reference_dir.into(),
        }
    }

    /// Directory holding `label`'s photos. The label must be usable as a
    /// single visible path component.
    pub fn label_dir(&self, label: &str) -> Result<PathBuf, EnrollError> {
        let trimmed = label.trim();
        let valid = !trimmed.is_empty()
            && trimmed == label
            && !label.starts_with('.')
            && !label.contains(['/', '\\', '\0']);
        if !valid {
            return Err(EnrollError::InvalidLabel(label.to_string()));
        }
        Ok(self.reference_dir.join(label))
    }

    /// Copy an existing photo into `label`'s directory if it shows exactly
    /// one face. An existing file of the same name is never overwritten.
    pub fn add_file<E: FaceEmbedder + ?Sized>(
        &self,
        embedder: &mut E,
        label: &str,
        source: &Path,
    ) -> Result<PathBuf, EnrollError> {
        let dir = self.label_dir(label)?;
        if !is_image_path(source) {
            return Err(EnrollError::UnsupportedFormat(source.to_path_buf()));
        }

        let rgb = image::open(source)
            .map_err(|e| BuildDiagnostic::UnreadableImage {
                path: source.to_path_buf(),
                reason: e.to_string(),
            })?
            .to_rgb8();
        admit(embedder, &rgb, source)?;

        fs::create_dir_all(&dir).map_err(|e| io_error(&dir, e))?;
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{label}.png"));
        let destination = free_path(&dir, &name);
        fs::copy(source, &destination).map_err(|e| io_error(&destination, e))?;

        tracing::info!(
            label,
            from = %source.display(),
            to = %destination.display(),
            "added reference photo"
        );
        Ok(destination)
    }

    /// Save frames from `source` that show exactly one face until
    /// `options.count` photos are saved, the source ends, or `stop` is raised.
    ///
    /// Photos are named `<label>_NNN.png`, continuing after any already present.
    pub fn capture<E, S>(
        &self,
        embedder: &mut E,
        label: &str,
        source: &mut S,
        options: CaptureOptions,
        stop: &StopSignal,
    ) -> Result<CaptureReport, EnrollError>
    where
        E: FaceEmbedder + ?Sized,
        S: FrameSource + ?Sized,
    {
        let dir = self.label_dir(label)?;
        fs::create_dir_all(&dir).map_err(|e| io_error(&dir, e))?;

        let mut report = CaptureReport::default();
        let mut last_saved: Option<Instant> = None;
        let mut next_index = 1u32;

        tracing::info!(label, count = options.count, dir = %dir.display(), "capturing reference photos");

        while (report.saved.len() as u32) < options.count && !stop.is_stopped() {
            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    tracing::info!("frame source exhausted");
                    break;
                }
                Err(CaptureError::CorruptFrame(reason)) => {
                    tracing::warn!(%reason, "skipping corrupt frame");
                    report.corrupt_frames += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            report.frames += 1;

            if last_saved.is_some_and(|t| t.elapsed() < options.cooldown) {
                continue;
            }

            let (path, index) = next_capture_path(&dir, label, next_index);
            if let Err(diag) = admit(embedder, &frame, &path) {
                tracing::debug!("{diag}");
                report.rejected += 1;
                continue;
            }

            frame
                .save(&path)
                .map_err(|source| EnrollError::Save { path: path.clone(), source })?;
            tracing::info!(
                path = %path.display(),
                saved = report.saved.len() + 1,
                of = options.count,
                "captured reference photo"
            );
            report.saved.push(path);
            next_index = index + 1;
            last_saved = Some(Instant::now());
        }

        Ok(report)
    }
}

fn admit<E: FaceEmbedder + ?Sized>(embedder: &mut E, image: &RgbImage, path: &Path) -> Result<(), BuildDiagnostic> {
    let faces = locate_and_encode(embedder, image).map_err(|e| BuildDiagnostic::DetectionFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    single_reference_face(path, faces).map(|_| ())
}

fn io_error(path: &Path, source: io::Error) -> EnrollError {
    EnrollError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// `dir/name`, or `dir/stem_2.ext`, `dir/stem_3.ext`, ... if taken.
fn free_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }
    let as_path = Path::new(name);
    let stem = as_path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let ext = as_path.extension().map(|e| e.to_string_lossy().into_owned());
    (2u32..)
        .map(|n| match &ext {
            Some(ext) => dir.join(format!("{stem}_{n}.{ext}")),
            None => dir.join(format!("{stem}_{n}")),
        })
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

fn next_capture_path(dir: &Path, label: &str, from: u32) -> (PathBuf, u32) {
    let mut index = from;
    loop {
        let path = dir.join(format!("{label}_{index:03}.png"));
        if !path.exists() {
            return (path, index);
        }
        index += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::EncodingStore;
    use crate::testing::{face_image, malformed_image, write_face_png, FakeEmbedder};

    struct Frames(Vec<RgbImage>);

    impl FrameSource for Frames {
        fn next_frame(&mut self) -> Result<Option<RgbImage>, CaptureError> {
            if self.0.is_empty() {
                Ok(None)
            } else {
                Ok(Some(self.0.remove(0)))
            }
        }
    }

    fn no_cooldown(count: u32) -> CaptureOptions {
        CaptureOptions {
            count,
            cooldown: Duration::ZERO,
        }
    }

    #[test]
    fn test_label_validation() {
        let enroll = Enrollment::new("/refs");
        assert_eq!(enroll.label_dir("alice").unwrap(), PathBuf::from("/refs/alice"));
        assert_eq!(enroll.label_dir("Jean Dupont").unwrap(), PathBuf::from("/refs/Jean Dupont"));
        for bad in ["", "  ", " bob", "../bob", "a/b", ".hidden", "a\\b"] {
            assert!(matches!(enroll.label_dir(bad), Err(EnrollError::InvalidLabel(_))), "{bad:?}");
        }
    }

    #[test]
    fn test_add_file_copies_single_face_photo() {
        let dir = tempfile::tempdir().unwrap();
        let photo = dir.path().join("incoming/portrait.png");
        write_face_png(&photo, &[[10, 20, 30]]);
        let enroll = Enrollment::new(dir.path().join("known_faces"));

        let saved = enroll.add_file(&mut FakeEmbedder::default(), "alice", &photo).unwrap();
        assert_eq!(saved, dir.path().join("known_faces/alice/portrait.png"));
        assert_eq!(fs::read(&saved).unwrap(), fs::read(&photo).unwrap());

        let again = enroll.add_file(&mut FakeEmbedder::default(), "alice", &photo).unwrap();
        assert_eq!(again, dir.path().join("known_faces/alice/portrait_2.png"));
    }

    #[test]
    fn test_add_file_rejects_what_a_build_would_skip() {
        let dir = tempfile::tempdir().unwrap();
        let refs = dir.path().join("known_faces");
        let group = dir.path().join("group.png");
        let empty = dir.path().join("empty.png");
        write_face_png(&group, &[[1, 1, 1], [2, 2, 2]]);
        write_face_png(&empty, &[]);
        let enroll = Enrollment::new(&refs);
        let mut embedder = FakeEmbedder::default();

        let err = enroll.add_file(&mut embedder, "bob", &group).unwrap_err();
        assert!(matches!(
            err,
            EnrollError::Rejected(BuildDiagnostic::AmbiguousReferenceImage { faces: 2, .. })
        ));
        let err = enroll.add_file(&mut embedder, "bob", &empty).unwrap_err();
        assert!(matches!(err, EnrollError::Rejected(BuildDiagnostic::NoFaceInReferenceImage { .. })));
        assert!(!refs.join("bob").exists());
    }

    #[test]
    fn test_add_file_rejects_unscanned_formats() {
        let dir = tempfile::tempdir().unwrap();
        let gif = dir.path().join("face.gif");
        fs::write(&gif, b"GIF89a").unwrap();
        let enroll = Enrollment::new(dir.path().join("known_faces"));
        let err = enroll.add_file(&mut FakeEmbedder::default(), "bob", &gif).unwrap_err();
        assert!(matches!(err, EnrollError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_capture_keeps_only_single_face_frames() {
        let dir = tempfile::tempdir().unwrap();
        let enroll = Enrollment::new(dir.path().join("known_faces"));
        let mut source = Frames(vec![
            face_image(&[]),
            face_image(&[[10, 20, 30]]),
            face_image(&[[1, 1, 1], [2, 2, 2]]),
            malformed_image(),
            face_image(&[[11, 20, 30]]),
            face_image(&[[12, 20, 30]]),
        ]);

        let report = enroll
            .capture(&mut FakeEmbedder::default(), "carol", &mut source, no_cooldown(2), &StopSignal::new())
            .unwrap();

        let names: Vec<_> = report
            .saved
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["carol_001.png", "carol_002.png"]);
        assert_eq!(report.frames, 5);
        assert_eq!(report.rejected, 3);
        assert_eq!(source.0.len(), 1);
    }

    #[test]
    fn test_capture_numbering_continues_and_feeds_build() {
        let dir = tempfile::tempdir().unwrap();
        let refs = dir.path().join("known_faces");
        write_face_png(&refs.join("dave/dave_001.png"), &[[40, 0, 0]]);
        let enroll = Enrollment::new(&refs);
        let mut source = Frames(vec![face_image(&[[41, 0, 0]])]);

        let report = enroll
            .capture(&mut FakeEmbedder::default(), "dave", &mut source, no_cooldown(3), &StopSignal::new())
            .unwrap();
        assert_eq!(report.saved, vec![refs.join("dave/dave_002.png")]);

        let store = EncodingStore::new(&refs, dir.path().join("gallery.json"));
        let built = store.build(&mut FakeEmbedder::default()).unwrap();
        assert_eq!(built.manifest.gallery.encodings_for("dave").len(), 2);
        assert!(built.diagnostics.is_empty());
    }

    #[test]
    fn test_capture_honours_stop_and_cooldown() {
        let dir = tempfile::tempdir().unwrap();
        let enroll = Enrollment::new(dir.path().join("known_faces"));

        let stop = StopSignal::new();
        stop.stop();
        let mut source = Frames(vec![face_image(&[[1, 2, 3]])]);
        let report = enroll
            .capture(&mut FakeEmbedder::default(), "erin", &mut source, no_cooldown(1), &stop)
            .unwrap();
        assert!(report.saved.is_empty());
        assert_eq!(source.0.len(), 1);

        let slow = CaptureOptions {
            count: 3,
            cooldown: Duration::from_secs(3600),
        };
        let mut source = Frames((0..4).map(|_| face_image(&[[1, 2, 3]])).collect());
        let report = enroll
            .capture(&mut FakeEmbedder::default(), "erin", &mut source, slow, &StopSignal::new())
            .unwrap();
        assert_eq!(report.saved.len(), 1);
        assert_eq!(report.frames, 4);
    }

    #[test]
    fn test_capture_device_failure_is_an_error() {
        struct Unplugged;
        impl FrameSource for Unplugged {
            fn next_frame(&mut self) -> Result<Option<RgbImage>, CaptureError> {
                Err(CaptureError::Device("gone".into()))
            }
        }
        let dir = tempfile::tempdir().unwrap();
        let enroll = Enrollment::new(dir.path().join("known_faces"));
        let err = enroll
            .capture(&mut FakeEmbedder::default(), "fay", &mut Unplugged, no_cooldown(1), &StopSignal::new())
            .unwrap_err();
        assert!(matches!(err, EnrollError::Capture(CaptureError::Device(_))));
    }
}
