use super::{ensure_dimensions, Comparator, FingerprintError, Score};
use crate::config::{HashAlgorithm, HashConfig};
use image::DynamicImage;
use image_hasher::{HashAlg, Hasher, HasherConfig};
use std::fmt;

/// Perceptual hash bits, optionally followed by a luminance band code.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct HashFingerprint {
    bytes: Box<[u8]>,
}

impl HashFingerprint {
    pub fn from_bytes(bytes: impl Into<Box<[u8]>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_hex(&self) -> String {
        self.bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Differing bits. Bytes present in only one side count as fully different.
    pub fn hamming(&self, other: &HashFingerprint) -> u32 {
        let shared: u32 = self
            .bytes
            .iter()
            .zip(other.bytes.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum();
        let extra = self.bytes.len().abs_diff(other.bytes.len()) as u32 * 8;
        shared + extra
    }
}

impl fmt::Debug for HashFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HashFingerprint({})", self.to_hex())
    }
}

/// Average/gradient hash comparator with a maximum Hamming distance.
pub struct HashComparator {
    hasher: Hasher,
    max_distance: u32,
    luma_bands: u8,
}

impl HashComparator {
    pub fn new(config: &HashConfig) -> Self {
        let hasher = HasherConfig::new()
            .hash_size(config.size, config.size)
            .hash_alg(hash_alg(config.algorithm))
            .to_hasher();

        Self {
            hasher,
            max_distance: config.max_distance,
            luma_bands: config.luma_bands,
        }
    }

    pub fn max_distance(&self) -> u32 {
        self.max_distance
    }
}

impl Default for HashComparator {
    fn default() -> Self {
        Self::new(&HashConfig::default())
    }
}

fn hash_alg(algorithm: HashAlgorithm) -> HashAlg {
    match algorithm {
        HashAlgorithm::Mean => HashAlg::Mean,
        HashAlgorithm::Gradient => HashAlg::Gradient,
        HashAlgorithm::DoubleGradient => HashAlg::DoubleGradient,
        HashAlgorithm::Blockhash => HashAlg::Blockhash,
    }
}

fn mean_luma(image: &DynamicImage) -> u8 {
    let gray = image.to_luma8();
    let count = gray.as_raw().len() as u64;
    if count == 0 {
        return 0;
    }
    let sum: u64 = gray.as_raw().iter().map(|&v| v as u64).sum();
    (sum / count) as u8
}

/// Thermometer code: the first `mean * bands / 256` of `bands` bits are set.
pub(crate) fn luma_code(mean: u8, bands: u8) -> Vec<u8> {
    let level = (mean as usize * bands as usize) / 256;
    let mut code = vec![0u8; (bands as usize).div_ceil(8)];
    for bit in 0..level {
        code[bit / 8] |= 1 << (bit % 8);
    }
    code
}

impl Comparator for HashComparator {
    type Fingerprint = HashFingerprint;

    fn name(&self) -> &'static str {
        "perceptual-hash"
    }

    fn compute(&self, image: &DynamicImage) -> Result<HashFingerprint, FingerprintError> {
        ensure_dimensions(image)?;

        let hash = self.hasher.hash_image(image);
        let mut bytes = hash.as_bytes().to_vec();
        if bytes.is_empty() {
            return Err(FingerprintError::ComputationFailed {
                message: "hasher produced an empty hash".to_string(),
            });
        }
        if self.luma_bands > 0 {
            bytes.extend(luma_code(mean_luma(image), self.luma_bands));
        }
        Ok(HashFingerprint::from_bytes(bytes))
    }

    fn key(&self, fingerprint: &HashFingerprint) -> String {
        fingerprint.to_hex()
    }

    fn score(&self, a: &HashFingerprint, b: &HashFingerprint) -> Score {
        Score::Hamming(a.hamming(b))
    }

    fn is_duplicate(&self, score: Score) -> bool {
        match score {
            Score::Hamming(bits) => bits <= self.max_distance,
            Score::Similarity(_) => false,
        }
    }
}
