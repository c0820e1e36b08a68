use crate::name::IdentityName;
use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, in pixel coordinates of the image it was found in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
    pub left: f32,
}

impl BoundingBox {
    /// Map a box found on a down-sampled image back to the original frame.
    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            top: self.top * factor,
            right: self.right * factor,
            bottom: self.bottom * factor,
            left: self.left * factor,
        }
    }

    pub fn width(&self) -> f32 {
        (self.right - self.left).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.bottom - self.top).max(0.0)
    }
}

/// Face embedding vector (128-dimensional for the dlib ResNet encoder).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Compute Euclidean distance between two embeddings.
    ///
    /// `None` when the vectors come from different encoders (length
    /// mismatch) or either one is empty; such embeddings are not comparable.
    pub fn euclidean_distance(&self, other: &Embedding) -> Option<f32> {
        if self.values.is_empty() || self.values.len() != other.values.len() {
            tracing::debug!(
                left = self.values.len(),
                right = other.values.len(),
                "embeddings not comparable"
            );
            return None;
        }
        let dist = self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt();
        Some(dist)
    }
}

/// A known person: canonical name plus one reference embedding.
#[derive(Debug, Clone)]
pub struct Identity {
    pub name: IdentityName,
    pub embedding: Embedding,
}

/// A face found in the current frame. Never persisted.
#[derive(Debug, Clone)]
pub struct ObservedFace {
    pub embedding: Embedding,
    /// Box in original-frame coordinates.
    pub bbox: BoundingBox,
}

/// Outcome of matching one observed face against the gallery.
#[derive(Debug, Clone)]
pub struct MatchDecision {
    pub face: ObservedFace,
    /// `None` means the face is unknown.
    pub identity: Option<IdentityName>,
    /// Distance to the closest gallery entry.
    pub distance: f32,
}

impl MatchDecision {
    pub fn is_known(&self) -> bool {
        self.identity.is_some()
    }

    /// Overlay label: upper-cased display name, or `UNKNOWN`.
    pub fn label(&self) -> String {
        match &self.identity {
            Some(name) => name.display().to_uppercase(),
            None => "UNKNOWN".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_identical() {
        let a = Embedding::new(vec![0.1, 0.2, 0.3]);
        assert_eq!(a.euclidean_distance(&a.clone()), Some(0.0));
    }

    #[test]
    fn test_euclidean_3_4_5() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        let d = a.euclidean_distance(&b).unwrap();
        assert!((d - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_length_mismatch_is_not_comparable() {
        let a = Embedding::new(vec![1.0, 0.0, 9.0]);
        let b = Embedding::new(vec![1.0, 0.0]);
        assert_eq!(a.euclidean_distance(&b), None);
        assert_eq!(b.euclidean_distance(&a), None);
    }

    #[test]
    fn test_euclidean_empty_is_not_comparable() {
        let empty = Embedding::new(vec![]);
        assert_eq!(empty.euclidean_distance(&empty.clone()), None);
        assert_eq!(empty.euclidean_distance(&Embedding::new(vec![0.3; 128])), None);
    }

    #[test]
    fn test_bbox_scaled() {
        let b = BoundingBox { top: 1.0, right: 20.0, bottom: 10.0, left: 2.0 };
        let s = b.scaled(4.0);
        assert_eq!(s, BoundingBox { top: 4.0, right: 80.0, bottom: 40.0, left: 8.0 });
        assert_eq!(s.width(), 72.0);
        assert_eq!(s.height(), 36.0);
    }

    #[test]
    fn test_label() {
        let face = ObservedFace {
            embedding: Embedding::new(vec![0.0]),
            bbox: BoundingBox { top: 0.0, right: 1.0, bottom: 1.0, left: 0.0 },
        };
        let known = MatchDecision {
            face: face.clone(),
            identity: Some(IdentityName::new("jean_paul").unwrap()),
            distance: 0.1,
        };
        let unknown = MatchDecision { face, identity: None, distance: 0.9 };
        assert_eq!(known.label(), "JEAN PAUL");
        assert_eq!(unknown.label(), "UNKNOWN");
    }
}
