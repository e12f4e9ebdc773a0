//! In-memory gallery of known identities and the shared handle sessions read it through.

use crate::types::EncodingVector;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// Mapping from identity label to the reference encodings captured for it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Gallery {
    entries: BTreeMap<String, Vec<EncodingVector>>,
}

/// Per-label encoding count, as reported by [`Gallery::stats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelStats {
    pub label: String,
    pub encodings: usize,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an encoding under its own label.
    pub fn insert(&mut self, encoding: EncodingVector) {
        self.entries
            .entry(encoding.label.clone())
            .or_default()
            .push(encoding);
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn encodings_for(&self, label: &str) -> &[EncodingVector] {
        self.entries.get(label).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All encodings, flattened across labels.
    pub fn encodings(&self) -> impl Iterator<Item = &EncodingVector> {
        self.entries.values().flatten()
    }

    /// Total number of encodings.
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn label_count(&self) -> usize {
        self.entries.len()
    }

    /// Embedding dimension of the first stored encoding.
    pub fn dimension(&self) -> Option<usize> {
        self.encodings().next().map(|e| e.embedding.dim())
    }

    pub fn stats(&self) -> Vec<LabelStats> {
        self.entries
            .iter()
            .map(|(label, encs)| LabelStats {
                label: label.clone(),
                encodings: encs.len(),
            })
            .collect()
    }

    /// Check the structural invariants a deserialized gallery must hold.
    pub fn validate(&self) -> Result<(), String> {
        let dim = self.dimension();
        for (label, encs) in &self.entries {
            if encs.is_empty() {
                return Err(format!("label {label:?} has no encodings"));
            }
            for enc in encs {
                if &enc.label != label {
                    return Err(format!(
                        "encoding labelled {:?} stored under {label:?}",
                        enc.label
                    ));
                }
                if !enc.embedding.is_finite() {
                    return Err(format!("label {label:?} holds an encoding with non-finite values"));
                }
                if Some(enc.embedding.dim()) != dim {
                    return Err(format!(
                        "label {label:?} holds a {}-dim encoding, expected {}",
                        enc.embedding.dim(),
                        dim.unwrap_or(0)
                    ));
                }
            }
        }
        Ok(())
    }

    /// Compare contents ignoring the order of encodings within each label.
    pub fn same_contents(&self, other: &Gallery) -> bool {
        if self.entries.len() != other.entries.len() {
            return false;
        }
        self.entries.iter().all(|(label, encs)| {
            let Some(theirs) = other.entries.get(label) else {
                return false;
            };
            sorted_values(encs) == sorted_values(theirs)
        })
    }
}

fn sorted_values(encs: &[EncodingVector]) -> Vec<&Vec<f32>> {
    let mut values: Vec<&Vec<f32>> = encs.iter().map(|e| &e.embedding.values).collect();
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    values
}

/// Shared, swappable reference to the gallery a session matches against.
///
/// Readers take an `Arc` snapshot per frame; a rebuild installs a complete
/// new gallery with [`replace`](Self::replace) instead of mutating in place.
#[derive(Debug, Default)]
pub struct GalleryHandle {
    current: RwLock<Arc<Gallery>>,
}

impl GalleryHandle {
    pub fn new(gallery: Gallery) -> Self {
        Self {
            current: RwLock::new(Arc::new(gallery)),
        }
    }

    pub fn snapshot(&self) -> Arc<Gallery> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Swap in a new gallery, returning the previous one.
    pub fn replace(&self, gallery: Gallery) -> Arc<Gallery> {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *guard, Arc::new(gallery))
    }
}
