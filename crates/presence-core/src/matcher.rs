//! Gallery matching.

use crate::types::{Embedding, Identity, MatchDecision, ObservedFace};

/// Standard tolerance of the dlib-based face encoder: distances at or
/// below this value are considered the same person.
pub const DEFAULT_TOLERANCE: f32 = 0.6;

/// Strategy for deciding which gallery identity, if any, each observed face belongs to.
pub trait Matcher {
    fn match_faces(
        &self,
        gallery: &[Identity],
        observed: &[ObservedFace],
        tolerance: f32,
    ) -> Vec<MatchDecision>;
}

/// Arg-min Euclidean matcher.
///
/// Ties resolve to the first identity in gallery order, so results are
/// stable for a fixed gallery.
#[derive(Debug, Default, Clone, Copy)]
pub struct EuclideanMatcher;

impl EuclideanMatcher {
    /// Index and distance of the closest comparable gallery entry.
    ///
    /// Entries whose embedding length differs from the probe's are never
    /// candidates.
    fn closest(gallery: &[Identity], probe: &Embedding) -> Option<(usize, f32)> {
        let mut best: Option<(usize, f32)> = None;
        for (i, identity) in gallery.iter().enumerate() {
            let Some(dist) = probe.euclidean_distance(&identity.embedding) else {
                continue;
            };
            // Strict `<` keeps the first minimum.
            if best.map_or(true, |(_, d)| dist < d) {
                best = Some((i, dist));
            }
        }
        best
    }
}

impl Matcher for EuclideanMatcher {
    fn match_faces(
        &self,
        gallery: &[Identity],
        observed: &[ObservedFace],
        tolerance: f32,
    ) -> Vec<MatchDecision> {
        if gallery.is_empty() {
            return Vec::new();
        }

        observed
            .iter()
            .map(|face| {
                let Some((idx, distance)) = Self::closest(gallery, &face.embedding) else {
                    tracing::warn!(
                        len = face.embedding.len(),
                        "observed embedding not comparable with the gallery"
                    );
                    return MatchDecision {
                        face: face.clone(),
                        identity: None,
                        distance: f32::INFINITY,
                    };
                };
                let identity = (distance <= tolerance).then(|| gallery[idx].name.clone());
                tracing::trace!(
                    candidate = %gallery[idx].name,
                    distance,
                    matched = identity.is_some(),
                    "face compared"
                );
                MatchDecision {
                    face: face.clone(),
                    identity,
                    distance,
                }
            })
            .collect()
    }
}
