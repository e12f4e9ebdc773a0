//! Reference directory scanning and change detection.
//!
//! Layout: one subdirectory per label, image files inside. The fingerprint
//! records the label set plus (mtime, length, SHA-256) for every image so that
//! additions, removals and edits all show up as a difference.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// File extensions treated as reference images (compared case-insensitively).
pub const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// One image found under a label directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceImage {
    pub label: String,
    pub path: PathBuf,
    /// `label/file` with forward slashes; the fingerprint key.
    pub relative: String,
}

/// Labels and images found in a reference directory, in sorted order.
#[derive(Debug, Clone, Default)]
pub struct ReferenceScan {
    pub labels: BTreeSet<String>,
    pub images: Vec<ReferenceImage>,
    /// Label directories that could not be listed, with the error text.
    /// They are left out of `labels`.
    pub unreadable: BTreeMap<String, String>,
}

impl ReferenceScan {
    /// Scan `dir`. Only a failure to list `dir` itself is an error.
    pub fn read(dir: &Path) -> io::Result<Self> {
        Self::read_with(dir, &sorted_entries)
    }

    fn read_with(dir: &Path, list: &dyn Fn(&Path) -> io::Result<Vec<PathBuf>>) -> io::Result<Self> {
        let mut scan = ReferenceScan::default();

        for label_dir in list(dir)? {
            if !label_dir.is_dir() {
                continue;
            }
            let Some(label) = visible_name(&label_dir) else {
                continue;
            };

            let entries = match list(&label_dir) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!(dir = %label_dir.display(), error = %e, "cannot list label directory");
                    scan.unreadable.insert(label, e.to_string());
                    continue;
                }
            };
            for path in entries {
                let Some(file_name) = visible_name(&path) else {
                    continue;
                };
                if path.is_file() && is_image_path(&path) {
                    scan.images.push(ReferenceImage {
                        relative: format!("{label}/{file_name}"),
                        label: label.clone(),
                        path,
                    });
                }
            }
            scan.labels.insert(label);
        }

        Ok(scan)
    }
}

fn sorted_entries(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut paths = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<io::Result<Vec<_>>>()?;
    paths.sort();
    Ok(paths)
}

fn visible_name(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_string_lossy().into_owned();
    (!name.starts_with('.')).then_some(name)
}

pub fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

/// Identity of one reference image file at scan time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStamp {
    /// Modification time in nanoseconds since the Unix epoch.
    pub modified_ns: u64,
    pub len: u64,
    /// Hex-encoded SHA-256 of the file contents.
    pub sha256: String,
}

impl FileStamp {
    pub fn read(path: &Path) -> io::Result<Self> {
        let meta = fs::metadata(path)?;
        let modified_ns = meta
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        let digest = Sha256::digest(fs::read(path)?);
        Ok(Self {
            modified_ns,
            len: meta.len(),
            sha256: digest.iter().map(|b| format!("{b:02x}")).collect(),
        })
    }
}

/// Summary of a reference directory used to decide whether a rebuild is due.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub labels: BTreeSet<String>,
    pub files: BTreeMap<String, FileStamp>,
}

impl Fingerprint {
    pub fn compute(dir: &Path) -> io::Result<Self> {
        Ok(Self::from_scan(&ReferenceScan::read(dir)?))
    }

    /// Stamp every scanned image. Files that vanish or become unreadable
    /// between the scan and the stamp are left out.
    pub fn from_scan(scan: &ReferenceScan) -> Self {
        let mut files = BTreeMap::new();
        for image in &scan.images {
            match FileStamp::read(&image.path) {
                Ok(stamp) => {
                    files.insert(image.relative.clone(), stamp);
                }
                Err(e) => {
                    tracing::warn!(path = %image.path.display(), error = %e, "cannot stamp reference image");
                }
            }
        }
        Self {
            labels: scan.labels.clone(),
            files,
        }
    }

    /// Differences between `self` (recorded) and `current`.
    pub fn diff(&self, current: &Fingerprint) -> FingerprintDiff {
        let mut diff = FingerprintDiff::default();

        for (path, stamp) in &current.files {
            match self.files.get(path) {
                None => diff.added.push(path.clone()),
                Some(old) if old != stamp => diff.modified.push(path.clone()),
                Some(_) => {}
            }
        }
        diff.removed = self
            .files
            .keys()
            .filter(|p| !current.files.contains_key(*p))
            .cloned()
            .collect();
        diff.labels_added = current.labels.difference(&self.labels).cloned().collect();
        diff.labels_removed = self.labels.difference(&current.labels).cloned().collect();

        diff
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FingerprintDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub modified: Vec<String>,
    pub labels_added: Vec<String>,
    pub labels_removed: Vec<String>,
}

impl FingerprintDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.modified.is_empty()
            && self.labels_added.is_empty()
            && self.labels_removed.is_empty()
    }
}
