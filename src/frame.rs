use crate::fingerprint::FingerprintError;
use image::{DynamicImage, GenericImageView, ImageReader};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Extensions picked up when discovering frames on disk.
pub const FRAME_EXTENSIONS: [&str; 7] = ["jpg", "jpeg", "png", "gif", "bmp", "tiff", "webp"];

/// Identity of a candidate frame: where in which video it was taken.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameId {
    /// Source timestamp in whole seconds.
    pub timestamp: u64,
    /// Originating source, usually a video id.
    pub source_id: Option<String>,
    /// File the frame was read from, if any.
    pub origin: Option<PathBuf>,
}

impl FrameId {
    pub fn new(timestamp: u64, source_id: Option<String>) -> Self {
        Self {
            timestamp,
            source_id,
            origin: None,
        }
    }

    fn file_name(&self) -> String {
        self.origin
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.source_id, &self.origin) {
            (_, Some(origin)) => write!(f, "{}", origin.display()),
            (Some(source), None) => write!(f, "{}@{}s", source, self.timestamp),
            (None, None) => write!(f, "@{}s", self.timestamp),
        }
    }
}

/// Pixel content of a candidate, decoded lazily.
#[derive(Debug, Clone)]
pub enum FramePixels {
    Decoded(DynamicImage),
    Encoded(Vec<u8>),
    File(PathBuf),
}

/// A frame waiting for an admission decision.
#[derive(Debug, Clone)]
pub struct CandidateFrame {
    id: FrameId,
    pixels: FramePixels,
}

impl CandidateFrame {
    pub fn from_image(timestamp: u64, source_id: Option<String>, image: DynamicImage) -> Self {
        Self {
            id: FrameId::new(timestamp, source_id),
            pixels: FramePixels::Decoded(image),
        }
    }

    pub fn from_bytes(timestamp: u64, source_id: Option<String>, bytes: Vec<u8>) -> Self {
        Self {
            id: FrameId::new(timestamp, source_id),
            pixels: FramePixels::Encoded(bytes),
        }
    }

    /// Candidate backed by a file named `{source_id}_{seconds}.{ext}`.
    /// Names that do not follow the convention get timestamp 0 and no source.
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (source_id, timestamp) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(parse_frame_stem)
            .unwrap_or((None, 0));

        Self {
            id: FrameId {
                timestamp,
                source_id,
                origin: Some(path.clone()),
            },
            pixels: FramePixels::File(path),
        }
    }

    pub fn id(&self) -> &FrameId {
        &self.id
    }

    pub fn pixels(&self) -> &FramePixels {
        &self.pixels
    }

    /// Decode the pixels, consuming the candidate.
    pub fn into_parts(self) -> (FrameId, Result<DynamicImage, FingerprintError>) {
        let image = decode_pixels(self.pixels);
        (self.id, image)
    }
}

fn decode_pixels(pixels: FramePixels) -> Result<DynamicImage, FingerprintError> {
    let image = match pixels {
        FramePixels::Decoded(image) => image,
        FramePixels::Encoded(bytes) => {
            image::load_from_memory(&bytes).map_err(|e| FingerprintError::InvalidImage {
                reason: format!("failed to decode frame bytes: {}", e),
            })?
        }
        FramePixels::File(path) => ImageReader::open(&path)
            .and_then(|reader| reader.with_guessed_format())
            .map_err(|e| FingerprintError::InvalidImage {
                reason: format!("failed to open {}: {}", path.display(), e),
            })?
            .decode()
            .map_err(|e| FingerprintError::InvalidImage {
                reason: format!("failed to decode {}: {}", path.display(), e),
            })?,
    };

    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(FingerprintError::InvalidImage {
            reason: format!("zero-sized frame ({}x{})", width, height),
        });
    }
    Ok(image)
}

/// Split a stem like `abc123_754` into its source id and timestamp.
/// A bare number is a timestamp without source.
pub fn parse_frame_stem(stem: &str) -> Option<(Option<String>, u64)> {
    if !stem.is_empty() && stem.bytes().all(|b| b.is_ascii_digit()) {
        return stem.parse().ok().map(|ts| (None, ts));
    }

    let (source, seconds) = stem.rsplit_once('_')?;
    if source.is_empty() || seconds.is_empty() || !seconds.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let timestamp = seconds.parse().ok()?;
    Some((Some(source.to_string()), timestamp))
}

/// Processing order of a batch. First-match admission depends on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameOrder {
    /// By source id, then timestamp, then file name.
    #[default]
    Timestamp,
    /// By file name only.
    Lexical,
}

/// Full origin path breaks ties, so same-named frames from sibling
/// directories keep a stable order.
pub fn sort_candidates(candidates: &mut [CandidateFrame], order: FrameOrder) {
    match order {
        FrameOrder::Timestamp => candidates.sort_by(|a, b| {
            (&a.id.source_id, a.id.timestamp, a.id.file_name(), &a.id.origin).cmp(&(
                &b.id.source_id,
                b.id.timestamp,
                b.id.file_name(),
                &b.id.origin,
            ))
        }),
        FrameOrder::Lexical => candidates.sort_by(|a, b| {
            (a.id.file_name(), &a.id.origin).cmp(&(b.id.file_name(), &b.id.origin))
        }),
    }
}

#[derive(Debug, Clone, Default)]
pub struct DiscoverOptions {
    pub order: FrameOrder,
    pub recursive: bool,
    /// Directory skipped while walking, typically the unique-frame store.
    pub exclude: Option<PathBuf>,
}

/// Walk `dir` and return candidate frames in the requested order.
pub fn discover_frames(dir: &Path, options: &DiscoverOptions) -> io::Result<Vec<CandidateFrame>> {
    if !dir.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} is not a directory", dir.display()),
        ));
    }

    let exclude = options
        .exclude
        .as_ref()
        .map(|p| p.canonicalize().unwrap_or_else(|_| p.clone()));
    let max_depth = if options.recursive { usize::MAX } else { 1 };

    let mut candidates = Vec::new();
    let walker = WalkDir::new(dir)
        .max_depth(max_depth)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| match &exclude {
            Some(excluded) => entry
                .path()
                .canonicalize()
                .map(|p| &p != excluded)
                .unwrap_or(true),
            None => true,
        });

    for entry in walker.filter_map(Result::ok) {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if let Some(ext) = path.extension().and_then(|s| s.to_str()) {
            if FRAME_EXTENSIONS.contains(&ext.to_lowercase().as_str()) {
                candidates.push(CandidateFrame::from_file(path));
            }
        }
    }

    sort_candidates(&mut candidates, options.order);
    Ok(candidates)
}
