//! Nearest-neighbour matching of a probe embedding against the gallery.

use crate::gallery::Gallery;
use crate::types::{Embedding, MatchResult};

/// Distances closer than this are treated as equal when breaking ties.
pub const TIE_EPSILON: f32 = 1e-6;

/// Strategy for comparing a probe embedding against a gallery of known faces.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &Gallery, tolerance: f32) -> MatchResult;
}

/// Euclidean nearest-neighbour matcher.
///
/// Searches every encoding of every label; labels only name the winner.
/// Equidistant candidates resolve to the lexicographically smaller label.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(&self, probe: &Embedding, gallery: &Gallery, tolerance: f32) -> MatchResult {
        let mut best: Option<(f32, &str)> = None;
        let mut incomparable = 0usize;

        for candidate in gallery.encodings() {
            let Some(dist) = probe
                .euclidean_distance(&candidate.embedding)
                .filter(|d| !d.is_nan())
            else {
                incomparable += 1;
                continue;
            };
            let label = candidate.label.as_str();

            best = match best {
                None => Some((dist, label)),
                Some((best_dist, _)) if dist < best_dist - TIE_EPSILON => Some((dist, label)),
                Some((best_dist, best_label)) if (dist - best_dist).abs() <= TIE_EPSILON => {
                    Some((dist.min(best_dist), label.min(best_label)))
                }
                keep => keep,
            };
        }

        if incomparable > 0 {
            tracing::debug!(
                incomparable,
                probe_dim = probe.dim(),
                "ignored gallery encodings with a different dimension"
            );
        }

        match best {
            None => MatchResult::unknown(f32::INFINITY),
            Some((dist, label)) if dist <= tolerance => MatchResult {
                label: Some(label.to_string()),
                distance: dist,
                confidence: (1.0 - dist).clamp(0.0, 1.0),
                is_match: true,
            },
            Some((dist, _)) => MatchResult::unknown(dist),
        }
    }
}
