use super::{ensure_dimensions, Comparator, FingerprintError, Score};
use crate::config::StructuralConfig;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage};

const K1: f64 = 0.01;
const K2: f64 = 0.03;
const DATA_RANGE: f64 = 255.0;

/// Pairwise SSIM over a canonical grayscale resize of each frame.
///
/// The fingerprint is the resized luminance grid itself, so it is computed
/// once per frame; every lookup still has to score against each admitted
/// entry.
#[derive(Debug, Clone)]
pub struct StructuralComparator {
    size: u32,
    window: u32,
    threshold: f64,
}

impl StructuralComparator {
    pub fn new(config: &StructuralConfig) -> Self {
        Self {
            size: config.size,
            window: config.window,
            threshold: config.threshold,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

impl Default for StructuralComparator {
    fn default() -> Self {
        Self::new(&StructuralConfig::default())
    }
}

impl Comparator for StructuralComparator {
    type Fingerprint = GrayImage;

    fn name(&self) -> &'static str {
        "structural-similarity"
    }

    fn compute(&self, image: &DynamicImage) -> Result<GrayImage, FingerprintError> {
        ensure_dimensions(image)?;
        if self.size == 0 {
            return Err(FingerprintError::ComputationFailed {
                message: "canonical size is zero".to_string(),
            });
        }
        Ok(image
            .resize_exact(self.size, self.size, FilterType::Triangle)
            .to_luma8())
    }

    fn key(&self, fingerprint: &GrayImage) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&fingerprint.width().to_le_bytes());
        hasher.update(&fingerprint.height().to_le_bytes());
        hasher.update(fingerprint.as_raw());
        hasher.finalize().to_hex().to_string()
    }

    fn score(&self, a: &GrayImage, b: &GrayImage) -> Score {
        Score::Similarity(ssim(a, b, self.window))
    }

    /// Inclusive: a score equal to the threshold is a duplicate.
    fn is_duplicate(&self, score: Score) -> bool {
        match score {
            Score::Similarity(value) => value >= self.threshold,
            Score::Hamming(_) => false,
        }
    }
}

/// Summed-area table with a zero row and column in front.
struct Integral {
    stride: usize,
    sums: Vec<f64>,
}

impl Integral {
    fn build(width: usize, height: usize, value: impl Fn(usize) -> f64) -> Self {
        let stride = width + 1;
        let mut sums = vec![0.0; stride * (height + 1)];
        for y in 0..height {
            let mut row = 0.0;
            for x in 0..width {
                row += value(y * width + x);
                sums[(y + 1) * stride + x + 1] = sums[y * stride + x + 1] + row;
            }
        }
        Self { stride, sums }
    }

    /// Sum over `[x0, x1) x [y0, y1)`.
    fn rect(&self, x0: usize, y0: usize, x1: usize, y1: usize) -> f64 {
        let s = self.stride;
        self.sums[y1 * s + x1] - self.sums[y0 * s + x1] - self.sums[y1 * s + x0]
            + self.sums[y0 * s + x0]
    }
}

/// Mean structural similarity of two equally sized grayscale images using a
/// uniform `window`x`window` filter and sample covariance. Only windows lying
/// fully inside the image contribute. Images of different size score 0.
pub fn ssim(a: &GrayImage, b: &GrayImage, window: u32) -> f64 {
    if a.dimensions() != b.dimensions() {
        return 0.0;
    }
    let (width, height) = (a.width() as usize, a.height() as usize);
    let win = (window as usize).min(width).min(height);
    if win == 0 {
        return 0.0;
    }

    let pa = a.as_raw();
    let pb = b.as_raw();
    let sx = Integral::build(width, height, |i| pa[i] as f64);
    let sy = Integral::build(width, height, |i| pb[i] as f64);
    let sxx = Integral::build(width, height, |i| (pa[i] as f64) * (pa[i] as f64));
    let syy = Integral::build(width, height, |i| (pb[i] as f64) * (pb[i] as f64));
    let sxy = Integral::build(width, height, |i| (pa[i] as f64) * (pb[i] as f64));

    let np = (win * win) as f64;
    let cov_norm = if np > 1.0 { np / (np - 1.0) } else { 1.0 };
    let c1 = (K1 * DATA_RANGE).powi(2);
    let c2 = (K2 * DATA_RANGE).powi(2);

    let mut total = 0.0;
    let mut count = 0usize;
    for y0 in 0..=(height - win) {
        for x0 in 0..=(width - win) {
            let (x1, y1) = (x0 + win, y0 + win);
            let ux = sx.rect(x0, y0, x1, y1) / np;
            let uy = sy.rect(x0, y0, x1, y1) / np;
            let uxx = sxx.rect(x0, y0, x1, y1) / np;
            let uyy = syy.rect(x0, y0, x1, y1) / np;
            let uxy = sxy.rect(x0, y0, x1, y1) / np;

            let vx = cov_norm * (uxx - ux * ux);
            let vy = cov_norm * (uyy - uy * uy);
            let vxy = cov_norm * (uxy - ux * uy);

            let numerator = (2.0 * ux * uy + c1) * (2.0 * vxy + c2);
            let denominator = (ux * ux + uy * uy + c1) * (vx + vy + c2);
            total += numerator / denominator;
            count += 1;
        }
    }

    total / count as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{diagonal_ramp, solid_gray, split_halves, split_rows, with_pixel};

    #[test]
    fn test_self_similarity() {
        let comparator = StructuralComparator::default();
        let fingerprint = comparator.compute(&diagonal_ramp(300, 200)).unwrap();
        let score = comparator.score(&fingerprint, &fingerprint);
        match score {
            Score::Similarity(value) => assert!(value >= 0.999, "self ssim {}", value),
            other => panic!("unexpected score {:?}", other),
        }
        assert!(comparator.is_duplicate(score));
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let comparator = StructuralComparator::default();
        let image = diagonal_ramp(320, 180);

        let first = comparator.compute(&image).unwrap();
        let second = comparator.compute(&image).unwrap();
        assert_eq!(first, second);
        assert_eq!(comparator.key(&first), comparator.key(&second));
        assert_eq!(
            comparator.score(&first, &second),
            comparator.score(&second, &first)
        );
    }

    #[test]
    fn test_fingerprint_is_canonical_size() {
        let comparator = StructuralComparator::default();
        let fingerprint = comparator.compute(&diagonal_ramp(640, 360)).unwrap();
        assert_eq!(fingerprint.dimensions(), (256, 256));
    }

    #[test]
    fn test_similarity_is_symmetric() {
        let comparator = StructuralComparator::default();
        let a = comparator.compute(&split_halves(100, 100)).unwrap();
        let b = comparator.compute(&diagonal_ramp(100, 100)).unwrap();
        assert_eq!(comparator.score(&a, &b), comparator.score(&b, &a));
    }

    #[test]
    fn test_distinct_frames_score_low() {
        let comparator = StructuralComparator::default();
        let gray = comparator.compute(&solid_gray(256, 256, 128)).unwrap();
        let black = comparator.compute(&solid_gray(256, 256, 0)).unwrap();
        let score = comparator.score(&gray, &black);
        assert!(!comparator.is_duplicate(score));

        let halves = comparator.compute(&split_halves(256, 256)).unwrap();
        let rows = comparator.compute(&split_rows(256, 256)).unwrap();
        assert!(!comparator.is_duplicate(comparator.score(&halves, &rows)));
    }

    #[test]
    fn test_single_pixel_change_stays_duplicate() {
        let comparator = StructuralComparator::default();
        let base = diagonal_ramp(256, 256);
        let touched = with_pixel(&base, 0, 0, 255);
        let a = comparator.compute(&base).unwrap();
        let b = comparator.compute(&touched).unwrap();
        assert!(comparator.is_duplicate(comparator.score(&a, &b)));
    }

    #[test]
    fn test_threshold_boundary_is_inclusive() {
        let base = StructuralComparator::default();
        let a = base.compute(&diagonal_ramp(256, 256)).unwrap();
        let b = base.compute(&with_pixel(&split_halves(256, 256), 10, 10, 0)).unwrap();
        let Score::Similarity(value) = base.score(&a, &b) else {
            panic!("structural comparator must return a similarity");
        };

        let at = StructuralComparator::new(&StructuralConfig {
            threshold: value,
            ..StructuralConfig::default()
        });
        assert!(at.is_duplicate(Score::Similarity(value)));

        let above = StructuralComparator::new(&StructuralConfig {
            threshold: value + 1e-9,
            ..StructuralConfig::default()
        });
        assert!(!above.is_duplicate(Score::Similarity(value)));

        assert!(base.is_duplicate(Score::Similarity(0.95)));
        assert!(!base.is_duplicate(Score::Similarity(0.949_999)));
    }

    #[test]
    fn test_key_depends_on_content() {
        let comparator = StructuralComparator::default();
        let a = comparator.compute(&solid_gray(64, 64, 10)).unwrap();
        let b = comparator.compute(&solid_gray(64, 64, 11)).unwrap();
        assert_eq!(comparator.key(&a), comparator.key(&a.clone()));
        assert_ne!(comparator.key(&a), comparator.key(&b));
        assert_eq!(comparator.key(&a).len(), 64);
    }

    #[test]
    fn test_ssim_mismatched_sizes() {
        let a = GrayImage::new(16, 16);
        let b = GrayImage::new(8, 8);
        assert_eq!(ssim(&a, &b, 7), 0.0);
    }

    #[test]
    fn test_ssim_of_uniform_equal_images_is_one() {
        let a = solid_gray(32, 32, 77).to_luma8();
        assert_eq!(ssim(&a, &a, 7), 1.0);
    }
}
