//! Best-match search over a gallery snapshot.

use crate::gallery::Gallery;
use crate::types::{Embedding, FaceStatus, MatchResult};

/// Strategy for comparing a probe embedding against a gallery of enrolled faces.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &Gallery, threshold: f32) -> MatchResult;
}

/// Linear-scan cosine similarity matcher.
///
/// Entries whose dimensionality differs from the probe, or that hold
/// non-finite values, are skipped. Among equal top scores the first one
/// reached in gallery iteration order wins; that order is not stable.
#[derive(Debug, Clone, Copy, Default)]
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn compare(&self, probe: &Embedding, gallery: &Gallery, threshold: f32) -> MatchResult {
        if !probe.is_well_formed() {
            return MatchResult::unknown(0.0);
        }

        let mut best_sim = f32::NEG_INFINITY;
        let mut best_id: Option<&str> = None;

        for (id, candidate) in gallery.iter() {
            if candidate.dim() != probe.dim() || !candidate.is_well_formed() {
                continue;
            }
            let sim = probe.similarity(candidate);
            if sim.is_finite() && sim > best_sim {
                best_sim = sim;
                best_id = Some(id);
            }
        }

        match best_id {
            Some(id) if best_sim >= threshold => MatchResult {
                identity: Some(id.to_string()),
                score: best_sim,
                status: FaceStatus::Recognized,
            },
            Some(_) => MatchResult::unknown(best_sim),
            None => MatchResult::unknown(0.0),
        }
    }
}
