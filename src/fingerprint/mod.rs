//! Perceptual fingerprints and the comparators that score them.
//!
//! Two strategies share the [`Comparator`] interface:
//! - [`HashComparator`]: fixed-length perceptual hash, Hamming distance.
//! - [`StructuralComparator`]: canonical luminance grid, windowed SSIM.

pub mod hash;
pub mod structural;

pub use hash::{HashComparator, HashFingerprint};
pub use structural::{ssim, StructuralComparator};

use crate::config::{HashConfig, StructuralConfig};
use image::{DynamicImage, GenericImageView};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("Invalid image: {reason}")]
    InvalidImage { reason: String },

    #[error("Fingerprint computation failed: {message}")]
    ComputationFailed { message: String },
}

/// Why a candidate was rejected as invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    InvalidImage,
    ComputationFailed,
}

impl FingerprintError {
    pub fn reason(&self) -> RejectReason {
        match self {
            FingerprintError::InvalidImage { .. } => RejectReason::InvalidImage,
            FingerprintError::ComputationFailed { .. } => RejectReason::ComputationFailed,
        }
    }
}

/// Outcome of comparing two fingerprints.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Score {
    /// Number of differing bits; lower is closer.
    Hamming(u32),
    /// Structural similarity in [-1, 1]; higher is closer.
    Similarity(f64),
}

impl Score {
    /// Whether `self` is a strictly closer match than `other`.
    pub fn is_closer_than(&self, other: &Score) -> bool {
        match (self, other) {
            (Score::Hamming(a), Score::Hamming(b)) => a < b,
            (Score::Similarity(a), Score::Similarity(b)) => a > b,
            _ => false,
        }
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Score::Hamming(bits) => write!(f, "hamming {}", bits),
            Score::Similarity(value) => write!(f, "ssim {:.4}", value),
        }
    }
}

/// A fingerprinting strategy together with its duplicate rule.
pub trait Comparator: Send + Sync {
    type Fingerprint: Clone + Send + Sync + fmt::Debug;

    fn name(&self) -> &'static str;

    /// Deterministic fingerprint of the pixel content.
    fn compute(&self, image: &DynamicImage) -> Result<Self::Fingerprint, FingerprintError>;

    /// Canonical string form, used as storage key.
    fn key(&self, fingerprint: &Self::Fingerprint) -> String;

    /// Symmetric comparison of two fingerprints.
    fn score(&self, a: &Self::Fingerprint, b: &Self::Fingerprint) -> Score;

    fn is_duplicate(&self, score: Score) -> bool;
}

pub(crate) fn ensure_dimensions(image: &DynamicImage) -> Result<(), FingerprintError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(FingerprintError::InvalidImage {
            reason: format!("zero-sized image ({}x{})", width, height),
        });
    }
    Ok(())
}

/// Both scores for a pair of images.
#[derive(Debug, Clone, Serialize)]
pub struct Comparison {
    pub hamming: u32,
    pub hash_duplicate: bool,
    pub similarity: f64,
    pub structural_duplicate: bool,
}

pub fn compare_images(
    a: &DynamicImage,
    b: &DynamicImage,
    hash: &HashConfig,
    structural: &StructuralConfig,
) -> Result<Comparison, FingerprintError> {
    let hasher = HashComparator::new(hash);
    let hash_score = hasher.score(&hasher.compute(a)?, &hasher.compute(b)?);

    let ssim = StructuralComparator::new(structural);
    let ssim_score = ssim.score(&ssim.compute(a)?, &ssim.compute(b)?);

    let hamming = match hash_score {
        Score::Hamming(bits) => bits,
        Score::Similarity(_) => {
            return Err(FingerprintError::ComputationFailed {
                message: "hash comparator returned a similarity".to_string(),
            });
        }
    };
    let similarity = match ssim_score {
        Score::Similarity(value) => value,
        Score::Hamming(_) => {
            return Err(FingerprintError::ComputationFailed {
                message: "structural comparator returned a distance".to_string(),
            });
        }
    };

    Ok(Comparison {
        hamming,
        hash_duplicate: hasher.is_duplicate(hash_score),
        similarity,
        structural_duplicate: ssim.is_duplicate(ssim_score),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{diagonal_ramp, solid_gray, split_halves};

    #[test]
    fn test_score_ordering() {
        assert!(Score::Hamming(1).is_closer_than(&Score::Hamming(3)));
        assert!(!Score::Hamming(3).is_closer_than(&Score::Hamming(3)));
        assert!(Score::Similarity(0.99).is_closer_than(&Score::Similarity(0.96)));
        assert!(!Score::Similarity(0.5).is_closer_than(&Score::Hamming(0)));
    }

    #[test]
    fn test_compare_identical_images() {
        let image = diagonal_ramp(128, 96);
        let comparison = compare_images(
            &image,
            &image.clone(),
            &HashConfig::default(),
            &StructuralConfig::default(),
        )
        .unwrap();

        assert_eq!(comparison.hamming, 0);
        assert!(comparison.hash_duplicate);
        assert!(comparison.similarity >= 0.999);
        assert!(comparison.structural_duplicate);
    }

    #[test]
    fn test_compare_distinct_images() {
        let comparison = compare_images(
            &solid_gray(64, 64, 128),
            &split_halves(64, 64),
            &HashConfig::default(),
            &StructuralConfig::default(),
        )
        .unwrap();

        assert!(comparison.hamming > 0);
        assert!(!comparison.hash_duplicate);
        assert!(comparison.similarity < 0.95);
        assert!(!comparison.structural_duplicate);
    }

    #[test]
    fn test_error_reason_codes() {
        let invalid = FingerprintError::InvalidImage {
            reason: "truncated".to_string(),
        };
        let failed = FingerprintError::ComputationFailed {
            message: "empty hash".to_string(),
        };
        assert_eq!(invalid.reason(), RejectReason::InvalidImage);
        assert_eq!(failed.reason(), RejectReason::ComputationFailed);
        assert_eq!(
            serde_json::to_string(&RejectReason::ComputationFailed).unwrap(),
            "\"computation_failed\""
        );
    }

    #[test]
    fn test_compare_rejects_empty_image() {
        let result = compare_images(
            &DynamicImage::new_luma8(0, 0),
            &solid_gray(8, 8, 1),
            &HashConfig::default(),
            &StructuralConfig::default(),
        );
        assert!(matches!(result, Err(FingerprintError::InvalidImage { .. })));
    }
}
