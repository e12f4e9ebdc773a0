//! Persisted gallery: build from reference images, save, load, staleness.

use crate::embedder::{locate_and_encode, FaceEmbedder};
use crate::fingerprint::{Fingerprint, ReferenceImage, ReferenceScan};
use crate::gallery::Gallery;
use crate::types::{BoundingBox, Embedding, EncodingVector};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Version of the persisted manifest layout.
pub const MANIFEST_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("persisted gallery {} is corrupt: {reason}", path.display())]
    CorruptStore { path: PathBuf, reason: String },
    #[error("no persisted gallery at {}", .0.display())]
    Missing(PathBuf),
    #[error("reference directory not found: {}", .0.display())]
    MissingReferenceDir(PathBuf),
    #[error("no gallery available: reference directory {} is missing and no usable cache exists", .0.display())]
    NoGalleryAvailable(PathBuf),
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("serialize gallery: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Why a reference image or label did not contribute to the gallery.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BuildDiagnostic {
    #[error("no face found in {}", path.display())]
    NoFaceInReferenceImage { path: PathBuf },
    #[error("{faces} faces found in {}; reference images must show exactly one", path.display())]
    AmbiguousReferenceImage { path: PathBuf, faces: usize },
    #[error("cannot read {}: {reason}", path.display())]
    UnreadableImage { path: PathBuf, reason: String },
    #[error("face extraction failed for {}: {reason}", path.display())]
    DetectionFailed { path: PathBuf, reason: String },
    #[error("encoding for {} contains non-finite values", path.display())]
    NonFiniteEncoding { path: PathBuf },
    #[error("label {label:?} has no usable reference image")]
    EmptyLabel { label: String },
    #[error("cannot list label {label:?}: {reason}")]
    UnreadableLabel { label: String, reason: String },
}

/// Persisted form of the gallery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GalleryManifest {
    pub version: u32,
    pub built_at: DateTime<Utc>,
    pub model_version: Option<String>,
    pub gallery: Gallery,
    pub source_fingerprint: Fingerprint,
}

/// Result of scanning and encoding a reference directory.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub manifest: GalleryManifest,
    pub diagnostics: Vec<BuildDiagnostic>,
}

/// Where the gallery returned by [`EncodingStore::open`] came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GalleryOrigin {
    Cached,
    Rebuilt,
}

#[derive(Debug, Clone)]
pub struct OpenedGallery {
    pub manifest: GalleryManifest,
    pub origin: GalleryOrigin,
    /// Build diagnostics; empty when the cache was used.
    pub diagnostics: Vec<BuildDiagnostic>,
}

/// Owner of the gallery: the reference image directory and its persisted encodings.
#[derive(Debug, Clone)]
pub struct EncodingStore {
    reference_dir: PathBuf,
    store_path: PathBuf,
}

impl EncodingStore {
    pub fn new(reference_dir: impl Into<PathBuf>, store_path: impl Into<PathBuf>) -> Self {
        Self {
            reference_dir: reference_dir.into(),
            store_path: store_path.into(),
        }
    }

    pub fn reference_dir(&self) -> &Path {
        &self.reference_dir
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    /// Encode every reference image into a fresh gallery.
    ///
    /// Per-image problems are collected as diagnostics and never abort the build.
    pub fn build<E: FaceEmbedder + ?Sized>(&self, embedder: &mut E) -> Result<BuildReport, StoreError> {
        let dir = &self.reference_dir;
        if !dir.is_dir() {
            return Err(StoreError::MissingReferenceDir(dir.clone()));
        }

        let scan = ReferenceScan::read(dir).map_err(|e| StoreError::io(dir, e))?;
        let source_fingerprint = Fingerprint::from_scan(&scan);
        tracing::info!(
            dir = %dir.display(),
            labels = scan.labels.len(),
            images = scan.images.len(),
            "encoding reference images"
        );

        let mut gallery = Gallery::new();
        let mut diagnostics: Vec<BuildDiagnostic> = scan
            .unreadable
            .iter()
            .map(|(label, reason)| BuildDiagnostic::UnreadableLabel {
                label: label.clone(),
                reason: reason.clone(),
            })
            .collect();
        for diag in &diagnostics {
            tracing::warn!("{diag}");
        }

        for image in &scan.images {
            match encode_reference(&mut *embedder, image) {
                Ok(encoding) => {
                    tracing::debug!(label = %image.label, path = %image.path.display(), "encoded");
                    gallery.insert(encoding);
                }
                Err(diag) => {
                    tracing::warn!(label = %image.label, "{diag}");
                    diagnostics.push(diag);
                }
            }
        }

        for label in &scan.labels {
            if gallery.encodings_for(label).is_empty() {
                let diag = BuildDiagnostic::EmptyLabel {
                    label: label.clone(),
                };
                tracing::warn!("{diag}");
                diagnostics.push(diag);
            }
        }

        tracing::info!(
            labels = gallery.label_count(),
            encodings = gallery.len(),
            skipped = diagnostics.len(),
            "gallery built"
        );

        Ok(BuildReport {
            manifest: GalleryManifest {
                version: MANIFEST_VERSION,
                built_at: Utc::now(),
                model_version: embedder.model_version().map(str::to_string),
                gallery,
                source_fingerprint,
            },
            diagnostics,
        })
    }

    /// Read and validate a persisted manifest.
    pub fn load(path: &Path) -> Result<GalleryManifest, StoreError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::Missing(path.to_path_buf()))
            }
            Err(e) => return Err(StoreError::io(path, e)),
        };

        let corrupt = |reason: String| StoreError::CorruptStore {
            path: path.to_path_buf(),
            reason,
        };

        // Check the version before the full shape so an old layout reports as such.
        let probe: VersionProbe =
            serde_json::from_slice(&bytes).map_err(|e| corrupt(e.to_string()))?;
        if probe.version != MANIFEST_VERSION {
            return Err(corrupt(format!(
                "unsupported manifest version {} (expected {MANIFEST_VERSION})",
                probe.version
            )));
        }

        let manifest: GalleryManifest =
            serde_json::from_slice(&bytes).map_err(|e| corrupt(e.to_string()))?;
        manifest.gallery.validate().map_err(corrupt)?;

        tracing::info!(
            path = %path.display(),
            labels = manifest.gallery.label_count(),
            encodings = manifest.gallery.len(),
            built_at = %manifest.built_at,
            "loaded persisted gallery"
        );
        Ok(manifest)
    }

    /// Write the manifest to a sibling temp file, then rename it into place.
    pub fn save(manifest: &GalleryManifest, path: &Path) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(manifest)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }

        let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp = path.with_file_name(tmp_name);

        fs::write(&tmp, json).map_err(|e| StoreError::io(&tmp, e))?;
        fs::rename(&tmp, path).map_err(|e| StoreError::io(path, e))?;

        tracing::info!(
            path = %path.display(),
            encodings = manifest.gallery.len(),
            "saved gallery"
        );
        Ok(())
    }

    /// Whether the reference directory no longer matches the manifest.
    ///
    /// An unreadable directory counts as stale.
    pub fn is_stale(manifest: &GalleryManifest, reference_dir: &Path) -> bool {
        let current = match Fingerprint::compute(reference_dir) {
            Ok(fp) => fp,
            Err(e) => {
                tracing::warn!(dir = %reference_dir.display(), error = %e, "cannot fingerprint reference directory");
                return true;
            }
        };

        let diff = manifest.source_fingerprint.diff(&current);
        if diff.is_empty() {
            return false;
        }
        tracing::info!(
            added = ?diff.added,
            removed = ?diff.removed,
            modified = ?diff.modified,
            labels_added = ?diff.labels_added,
            labels_removed = ?diff.labels_removed,
            "reference directory changed"
        );
        true
    }

    /// Load the persisted gallery, rebuilding it when it is missing, corrupt,
    /// stale, produced by another model, or when `force_rebuild` is set.
    ///
    /// When the reference directory is missing or cannot be listed, a usable
    /// persisted gallery is returned instead, even if `force_rebuild` is set.
    pub fn open<E: FaceEmbedder + ?Sized>(
        &self,
        embedder: &mut E,
        force_rebuild: bool,
    ) -> Result<OpenedGallery, StoreError> {
        let model_version = embedder.model_version().map(str::to_string);
        let cached = if force_rebuild {
            tracing::info!("re-encode requested");
            None
        } else {
            self.load_usable(model_version.as_deref())
        };

        if let Some(manifest) = &cached {
            if !Self::is_stale(manifest, &self.reference_dir) {
                return Ok(OpenedGallery::cached(manifest.clone()));
            }
        }

        // Only consulted when a rebuild is impossible.
        let fallback = |cached: Option<GalleryManifest>| {
            cached.or_else(|| {
                if force_rebuild {
                    self.load_usable(model_version.as_deref())
                } else {
                    None
                }
            })
        };

        if !self.reference_dir.is_dir() {
            return match fallback(cached) {
                Some(manifest) => {
                    tracing::warn!(
                        dir = %self.reference_dir.display(),
                        "reference directory missing; using persisted gallery"
                    );
                    Ok(OpenedGallery::cached(manifest))
                }
                None => Err(StoreError::NoGalleryAvailable(self.reference_dir.clone())),
            };
        }

        let report = match self.build(embedder) {
            Ok(report) => report,
            Err(e @ StoreError::Io { .. }) => {
                return match fallback(cached) {
                    Some(manifest) => {
                        tracing::warn!(error = %e, "cannot rebuild gallery; using persisted gallery");
                        Ok(OpenedGallery::cached(manifest))
                    }
                    None => Err(e),
                };
            }
            Err(e) => return Err(e),
        };
        if let Err(e) = Self::save(&report.manifest, &self.store_path) {
            tracing::warn!(error = %e, "could not persist rebuilt gallery; continuing in memory");
        }

        Ok(OpenedGallery {
            manifest: report.manifest,
            origin: GalleryOrigin::Rebuilt,
            diagnostics: report.diagnostics,
        })
    }

    /// Rebuild and persist if `current` is stale; `None` when it is still fresh.
    pub fn refresh<E: FaceEmbedder + ?Sized>(
        &self,
        current: &GalleryManifest,
        embedder: &mut E,
    ) -> Result<Option<BuildReport>, StoreError> {
        if !Self::is_stale(current, &self.reference_dir) {
            return Ok(None);
        }
        let report = self.build(embedder)?;
        Self::save(&report.manifest, &self.store_path)?;
        Ok(Some(report))
    }

    fn load_usable(&self, model_version: Option<&str>) -> Option<GalleryManifest> {
        match Self::load(&self.store_path) {
            Ok(manifest) if manifest.model_version.as_deref() != model_version => {
                tracing::info!(
                    stored = ?manifest.model_version,
                    current = ?model_version,
                    "persisted gallery was built with another model; rebuilding"
                );
                None
            }
            Ok(manifest) => Some(manifest),
            Err(StoreError::Missing(path)) => {
                tracing::info!(path = %path.display(), "no persisted gallery; building");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "persisted gallery unusable; rebuilding");
                None
            }
        }
    }
}

impl OpenedGallery {
    fn cached(manifest: GalleryManifest) -> Self {
        Self {
            manifest,
            origin: GalleryOrigin::Cached,
            diagnostics: Vec::new(),
        }
    }
}

#[derive(Deserialize)]
struct VersionProbe {
    version: u32,
}

fn encode_reference<E: FaceEmbedder + ?Sized>(
    embedder: &mut E,
    image: &ReferenceImage,
) -> Result<EncodingVector, BuildDiagnostic> {
    let path = image.path.clone();
    let rgb = image::open(&image.path)
        .map_err(|e| BuildDiagnostic::UnreadableImage {
            path: path.clone(),
            reason: e.to_string(),
        })?
        .to_rgb8();

    let faces = locate_and_encode(embedder, &rgb).map_err(|e| BuildDiagnostic::DetectionFailed {
        path: path.clone(),
        reason: e.to_string(),
    })?;

    let embedding = single_reference_face(&path, faces)?;
    Ok(EncodingVector {
        label: image.label.clone(),
        embedding,
        source_path: Some(path),
    })
}

/// Admission rule for a reference image: exactly one face, with a finite encoding.
pub(crate) fn single_reference_face(
    path: &Path,
    mut faces: Vec<(BoundingBox, Embedding)>,
) -> Result<Embedding, BuildDiagnostic> {
    let path = path.to_path_buf();
    match faces.len() {
        0 => Err(BuildDiagnostic::NoFaceInReferenceImage { path }),
        1 => {
            let (_, embedding) = faces.remove(0);
            if embedding.is_finite() {
                Ok(embedding)
            } else {
                Err(BuildDiagnostic::NonFiniteEncoding { path })
            }
        }
        n => Err(BuildDiagnostic::AmbiguousReferenceImage { path, faces: n }),
    }
}

/// Count diagnostics per kind, for summaries.
pub fn summarize_diagnostics(diagnostics: &[BuildDiagnostic]) -> BTreeMap<&'static str, usize> {
    let mut counts = BTreeMap::new();
    for diag in diagnostics {
        let kind = match diag {
            BuildDiagnostic::NoFaceInReferenceImage { .. } => "no_face",
            BuildDiagnostic::AmbiguousReferenceImage { .. } => "ambiguous",
            BuildDiagnostic::UnreadableImage { .. } => "unreadable",
            BuildDiagnostic::DetectionFailed { .. } => "detection_failed",
            BuildDiagnostic::NonFiniteEncoding { .. } => "non_finite",
            BuildDiagnostic::EmptyLabel { .. } => "empty_label",
            BuildDiagnostic::UnreadableLabel { .. } => "unreadable_label",
        };
        *counts.entry(kind).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{write_face_png, FakeEmbedder, NAN_MARKER};

    struct Fixture {
        _dir: tempfile::TempDir,
        refs: PathBuf,
        store: EncodingStore,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let refs = dir.path().join("known_faces");
        write_face_png(&refs.join("alice/1.png"), &[[10, 20, 30]]);
        write_face_png(&refs.join("alice/2.png"), &[[11, 20, 30]]);
        write_face_png(&refs.join("bob/1.png"), &[[90, 0, 0]]);
        let store = EncodingStore::new(&refs, dir.path().join("gallery.json"));
        Fixture { _dir: dir, refs, store }
    }

    #[test]
    fn test_build_collects_one_encoding_per_image() {
        let fx = fixture();
        let report = fx.store.build(&mut FakeEmbedder::default()).unwrap();
        let g = &report.manifest.gallery;

        assert!(report.diagnostics.is_empty());
        assert_eq!(g.labels().collect::<Vec<_>>(), vec!["alice", "bob"]);
        assert_eq!(g.encodings_for("alice").len(), 2);
        assert_eq!(g.encodings_for("bob")[0].embedding.values, vec![0.9, 0.0, 0.0]);
        assert_eq!(
            g.encodings_for("bob")[0].source_path.as_deref(),
            Some(fx.refs.join("bob/1.png").as_path())
        );
        assert_eq!(report.manifest.model_version.as_deref(), Some("fake-v1"));
        assert_eq!(report.manifest.source_fingerprint.files.len(), 3);
    }

    #[test]
    fn test_build_skips_ambiguous_and_faceless_images() {
        let fx = fixture();
        write_face_png(&fx.refs.join("bob/group.png"), &[[1, 1, 1], [2, 2, 2]]);
        write_face_png(&fx.refs.join("bob/empty.png"), &[]);
        write_face_png(&fx.refs.join("carol/empty.png"), &[]);
        std::fs::write(fx.refs.join("bob/broken.jpg"), b"not an image").unwrap();

        let report = fx.store.build(&mut FakeEmbedder::default()).unwrap();
        let g = &report.manifest.gallery;
        assert_eq!(g.encodings_for("bob").len(), 1);
        assert!(!g.labels().any(|l| l == "carol"));

        let counts = summarize_diagnostics(&report.diagnostics);
        assert_eq!(counts.get("ambiguous"), Some(&1));
        assert_eq!(counts.get("no_face"), Some(&2));
        assert_eq!(counts.get("unreadable"), Some(&1));
        assert_eq!(counts.get("empty_label"), Some(&1));
        assert!(report.diagnostics.contains(&BuildDiagnostic::AmbiguousReferenceImage {
            path: fx.refs.join("bob/group.png"),
            faces: 2,
        }));
    }

    #[test]
    fn test_build_skips_non_finite_encodings() {
        let fx = fixture();
        write_face_png(&fx.refs.join("bob/glitch.png"), &[[NAN_MARKER, 0, 0]]);

        let mut embedder = FakeEmbedder::default();
        let report = fx.store.build(&mut embedder).unwrap();
        assert_eq!(report.manifest.gallery.encodings_for("bob").len(), 1);
        assert!(report.diagnostics.contains(&BuildDiagnostic::NonFiniteEncoding {
            path: fx.refs.join("bob/glitch.png"),
        }));

        EncodingStore::save(&report.manifest, fx.store.store_path()).unwrap();
        assert_eq!(EncodingStore::load(fx.store.store_path()).unwrap(), report.manifest);
    }

    #[test]
    fn test_build_is_idempotent() {
        let fx = fixture();
        let a = fx.store.build(&mut FakeEmbedder::default()).unwrap();
        let b = fx.store.build(&mut FakeEmbedder::default()).unwrap();
        assert!(a.manifest.gallery.same_contents(&b.manifest.gallery));
        assert_eq!(a.manifest.source_fingerprint, b.manifest.source_fingerprint);
    }

    #[test]
    fn test_build_requires_reference_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = EncodingStore::new(dir.path().join("nope"), dir.path().join("g.json"));
        let err = store.build(&mut FakeEmbedder::default()).unwrap_err();
        assert!(matches!(err, StoreError::MissingReferenceDir(_)));
    }

    #[test]
    fn test_save_load_round_trip_is_fresh() {
        let fx = fixture();
        let report = fx.store.build(&mut FakeEmbedder::default()).unwrap();
        EncodingStore::save(&report.manifest, fx.store.store_path()).unwrap();

        let loaded = EncodingStore::load(fx.store.store_path()).unwrap();
        assert_eq!(loaded, report.manifest);
        assert!(!EncodingStore::is_stale(&loaded, &fx.refs));
    }

    #[test]
    fn test_is_stale_after_add_remove_modify() {
        let fx = fixture();
        let manifest = fx.store.build(&mut FakeEmbedder::default()).unwrap().manifest;

        write_face_png(&fx.refs.join("bob/2.png"), &[[1, 2, 3]]);
        assert!(EncodingStore::is_stale(&manifest, &fx.refs));
        std::fs::remove_file(fx.refs.join("bob/2.png")).unwrap();
        assert!(!EncodingStore::is_stale(&manifest, &fx.refs));

        std::fs::remove_file(fx.refs.join("alice/2.png")).unwrap();
        assert!(EncodingStore::is_stale(&manifest, &fx.refs));
        write_face_png(&fx.refs.join("alice/2.png"), &[[11, 20, 30]]);

        write_face_png(&fx.refs.join("bob/1.png"), &[[91, 0, 0]]);
        assert!(EncodingStore::is_stale(&manifest, &fx.refs));
    }

    #[test]
    fn test_is_stale_on_new_label_dir() {
        let fx = fixture();
        let manifest = fx.store.build(&mut FakeEmbedder::default()).unwrap().manifest;
        std::fs::create_dir_all(fx.refs.join("dave")).unwrap();
        assert!(EncodingStore::is_stale(&manifest, &fx.refs));
    }

    #[test]
    fn test_load_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = EncodingStore::load(&dir.path().join("none.json")).unwrap_err();
        assert!(matches!(err, StoreError::Missing(_)));
    }

    #[test]
    fn test_load_corrupt_payloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("g.json");
        for payload in [
            "{\"version\": 1, \"gallery\": ",
            "[1, 2, 3]",
            "{\"version\": 99, \"built_at\": \"2024-01-01T00:00:00Z\"}",
            "{\"version\": 1, \"built_at\": \"2024-01-01T00:00:00Z\", \"model_version\": null, \
             \"gallery\": {\"bob\": []}, \"source_fingerprint\": {\"labels\": [], \"files\": {}}}",
        ] {
            std::fs::write(&path, payload).unwrap();
            let err = EncodingStore::load(&path).unwrap_err();
            assert!(matches!(err, StoreError::CorruptStore { .. }), "{payload}: {err}");
        }
    }

    #[test]
    fn test_open_builds_then_uses_cache() {
        let fx = fixture();
        let mut embedder = FakeEmbedder::default();

        let first = fx.store.open(&mut embedder, false).unwrap();
        assert_eq!(first.origin, GalleryOrigin::Rebuilt);
        assert!(fx.store.store_path().exists());

        let calls = embedder.detect_calls;
        let second = fx.store.open(&mut embedder, false).unwrap();
        assert_eq!(second.origin, GalleryOrigin::Cached);
        assert_eq!(embedder.detect_calls, calls);
        assert!(second.manifest.gallery.same_contents(&first.manifest.gallery));
    }

    #[test]
    fn test_open_rebuilds_corrupt_store() {
        let fx = fixture();
        std::fs::write(fx.store.store_path(), b"\x00\x01garbage").unwrap();
        let opened = fx.store.open(&mut FakeEmbedder::default(), false).unwrap();
        assert_eq!(opened.origin, GalleryOrigin::Rebuilt);
        assert_eq!(opened.manifest.gallery.len(), 3);
        assert!(EncodingStore::load(fx.store.store_path()).is_ok());
    }

    #[test]
    fn test_open_rebuilds_for_other_model() {
        let fx = fixture();
        fx.store.open(&mut FakeEmbedder::default(), false).unwrap();
        let mut other = FakeEmbedder {
            model: "fake-v2",
            ..FakeEmbedder::default()
        };
        let opened = fx.store.open(&mut other, false).unwrap();
        assert_eq!(opened.origin, GalleryOrigin::Rebuilt);
        assert_eq!(opened.manifest.model_version.as_deref(), Some("fake-v2"));
    }

    #[test]
    fn test_open_force_rebuild() {
        let fx = fixture();
        fx.store.open(&mut FakeEmbedder::default(), false).unwrap();
        let opened = fx.store.open(&mut FakeEmbedder::default(), true).unwrap();
        assert_eq!(opened.origin, GalleryOrigin::Rebuilt);
    }

    #[test]
    fn test_open_without_refs_or_cache_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = EncodingStore::new(dir.path().join("nope"), dir.path().join("g.json"));
        let err = store.open(&mut FakeEmbedder::default(), false).unwrap_err();
        assert!(matches!(err, StoreError::NoGalleryAvailable(_)));
    }

    #[test]
    fn test_open_falls_back_to_cache_when_refs_vanish() {
        let fx = fixture();
        fx.store.open(&mut FakeEmbedder::default(), false).unwrap();
        std::fs::remove_dir_all(&fx.refs).unwrap();

        let opened = fx.store.open(&mut FakeEmbedder::default(), false).unwrap();
        assert_eq!(opened.origin, GalleryOrigin::Cached);
        assert_eq!(opened.manifest.gallery.len(), 3);
    }

    #[test]
    fn test_reencode_falls_back_to_cache_when_refs_vanish() {
        let fx = fixture();
        fx.store.open(&mut FakeEmbedder::default(), false).unwrap();
        std::fs::remove_dir_all(&fx.refs).unwrap();

        let opened = fx.store.open(&mut FakeEmbedder::default(), true).unwrap();
        assert_eq!(opened.origin, GalleryOrigin::Cached);
        assert_eq!(opened.manifest.gallery.len(), 3);
    }

    #[cfg(unix)]
    #[test]
    fn test_open_uses_cache_when_refs_cannot_be_listed() {
        use std::os::unix::fs::PermissionsExt;

        let fx = fixture();
        fx.store.open(&mut FakeEmbedder::default(), false).unwrap();
        write_face_png(&fx.refs.join("carol/1.png"), &[[5, 5, 5]]);
        std::fs::set_permissions(&fx.refs, std::fs::Permissions::from_mode(0o300)).unwrap();
        // Privileged users can list the directory anyway.
        let listable = std::fs::read_dir(&fx.refs).is_ok();

        let opened = fx.store.open(&mut FakeEmbedder::default(), false);
        std::fs::set_permissions(&fx.refs, std::fs::Permissions::from_mode(0o755)).unwrap();
        if listable {
            return;
        }

        let opened = opened.unwrap();
        assert_eq!(opened.origin, GalleryOrigin::Cached);
        assert_eq!(opened.manifest.gallery.label_count(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_label_is_a_diagnostic() {
        use std::os::unix::fs::PermissionsExt;

        let fx = fixture();
        let bob = fx.refs.join("bob");
        std::fs::set_permissions(&bob, std::fs::Permissions::from_mode(0o000)).unwrap();
        let listable = std::fs::read_dir(&bob).is_ok();

        let report = fx.store.build(&mut FakeEmbedder::default());
        std::fs::set_permissions(&bob, std::fs::Permissions::from_mode(0o755)).unwrap();
        if listable {
            return;
        }

        let report = report.unwrap();
        assert_eq!(report.manifest.gallery.labels().collect::<Vec<_>>(), vec!["alice"]);
        assert_eq!(summarize_diagnostics(&report.diagnostics).get("unreadable_label"), Some(&1));
    }

    #[test]
    fn test_refresh_only_when_stale() {
        let fx = fixture();
        let mut embedder = FakeEmbedder::default();
        let opened = fx.store.open(&mut embedder, false).unwrap();
        assert!(fx.store.refresh(&opened.manifest, &mut embedder).unwrap().is_none());

        write_face_png(&fx.refs.join("carol/1.png"), &[[5, 5, 5]]);
        let report = fx.store.refresh(&opened.manifest, &mut embedder).unwrap().unwrap();
        assert_eq!(report.manifest.gallery.label_count(), 3);
        let persisted = EncodingStore::load(fx.store.store_path()).unwrap();
        assert!(!EncodingStore::is_stale(&persisted, &fx.refs));
    }
}
