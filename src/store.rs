use crate::config::StoreConfig;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to encode frame {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: image::ImageError,
    },
}

/// Where admitted frames are persisted, keyed by fingerprint.
pub trait FrameStore {
    fn exists(&self, key: &str) -> bool;

    /// Location a frame with `key` has, or would have, in this store.
    fn location(&self, key: &str) -> PathBuf;

    fn save(&mut self, key: &str, image: &DynamicImage) -> Result<PathBuf, StoreError>;
}

/// Directory of `{key}.{ext}` files.
#[derive(Debug, Clone)]
pub struct FsFrameStore {
    dir: PathBuf,
    extension: String,
    jpeg_quality: u8,
}

impl FsFrameStore {
    /// Open `dir`, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>, config: &StoreConfig) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            extension: config.extension.to_lowercase(),
            jpeg_quality: config.jpeg_quality,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Keys of every stored frame, sorted.
    pub fn keys(&self) -> Result<Vec<String>, StoreError> {
        let entries = fs::read_dir(&self.dir).map_err(|source| StoreError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let mut keys = Vec::new();
        for entry in entries.filter_map(Result::ok) {
            let path = entry.path();
            let matches_ext = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(&self.extension));
            if !path.is_file() || !matches_ext {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if !stem.starts_with('.') {
                    keys.push(stem.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn encode(&self, key: &str, image: &DynamicImage, path: &Path) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        };
        let encode_err = |source| StoreError::Encode {
            key: key.to_string(),
            source,
        };

        let file = File::create(path).map_err(io_err)?;
        let mut writer = BufWriter::new(file);
        match self.extension.as_str() {
            "png" => image
                .write_to(&mut writer, ImageFormat::Png)
                .map_err(encode_err)?,
            _ => {
                // JPEG has no alpha channel
                let rgb = image.to_rgb8();
                let encoder = JpegEncoder::new_with_quality(&mut writer, self.jpeg_quality);
                rgb.write_with_encoder(encoder).map_err(encode_err)?;
            }
        }
        writer.flush().map_err(io_err)?;
        writer
            .into_inner()
            .map_err(|e| io_err(e.into_error()))?
            .sync_all()
            .map_err(io_err)
    }
}

impl FrameStore for FsFrameStore {
    fn exists(&self, key: &str) -> bool {
        self.location(key).is_file()
    }

    fn location(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", key, self.extension))
    }

    /// Written to a hidden temp file first, then renamed into place, so a
    /// stored key always refers to a complete image.
    fn save(&mut self, key: &str, image: &DynamicImage) -> Result<PathBuf, StoreError> {
        let target = self.location(key);
        let temp = self.dir.join(format!(".{}.{}.tmp", key, self.extension));

        if let Err(e) = self.encode(key, image, &temp) {
            let _ = fs::remove_file(&temp);
            return Err(e);
        }
        fs::rename(&temp, &target).map_err(|source| {
            let _ = fs::remove_file(&temp);
            StoreError::Io {
                path: target.clone(),
                source,
            }
        })?;
        Ok(target)
    }
}

/// Records keys without writing anything. Backs `scan` runs.
#[derive(Debug, Clone)]
pub struct DryRunStore {
    root: PathBuf,
    extension: String,
    saved: BTreeSet<String>,
}

impl DryRunStore {
    pub fn new(root: impl Into<PathBuf>, config: &StoreConfig) -> Self {
        Self {
            root: root.into(),
            extension: config.extension.to_lowercase(),
            saved: BTreeSet::new(),
        }
    }

    pub fn saved(&self) -> &BTreeSet<String> {
        &self.saved
    }
}

impl FrameStore for DryRunStore {
    fn exists(&self, key: &str) -> bool {
        self.saved.contains(key)
    }

    fn location(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.{}", key, self.extension))
    }

    fn save(&mut self, key: &str, _image: &DynamicImage) -> Result<PathBuf, StoreError> {
        self.saved.insert(key.to_string());
        Ok(self.location(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{diagonal_ramp, solid_rgb};
    use image::{DynamicImage, GenericImageView, ImageBuffer, Rgba};
    use tempfile::TempDir;

    #[test]
    fn test_save_creates_keyed_jpeg() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = FsFrameStore::open(temp_dir.path().join("unique"), &StoreConfig::default())
            .unwrap();

        assert!(!store.exists("abc"));
        let location = store.save("abc", &diagonal_ramp(64, 48)).unwrap();

        assert_eq!(location, temp_dir.path().join("unique").join("abc.jpg"));
        assert!(store.exists("abc"));
        let reloaded = image::open(&location).unwrap();
        assert_eq!(reloaded.dimensions(), (64, 48));
        assert_eq!(store.keys().unwrap(), vec!["abc".to_string()]);
    }

    #[test]
    fn test_save_rgba_as_jpeg() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = FsFrameStore::open(temp_dir.path(), &StoreConfig::default()).unwrap();
        let rgba = DynamicImage::ImageRgba8(ImageBuffer::from_pixel(8, 8, Rgba([1, 2, 3, 128])));
        assert!(store.save("alpha", &rgba).is_ok());
    }

    #[test]
    fn test_png_store_is_lossless() {
        let temp_dir = TempDir::new().unwrap();
        let config = StoreConfig {
            extension: "png".to_string(),
            ..StoreConfig::default()
        };
        let mut store = FsFrameStore::open(temp_dir.path(), &config).unwrap();
        let image = solid_rgb(16, 16, [10, 200, 30]);
        let location = store.save("k", &image).unwrap();

        assert_eq!(location.extension().unwrap(), "png");
        let reloaded = image::open(&location).unwrap();
        assert_eq!(reloaded.to_rgb8(), image.to_rgb8());
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = FsFrameStore::open(temp_dir.path(), &StoreConfig::default()).unwrap();
        store.save("one", &diagonal_ramp(8, 8)).unwrap();
        store.save("two", &diagonal_ramp(9, 9)).unwrap();

        let names: Vec<String> = fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.iter().all(|n| !n.ends_with(".tmp")));
    }

    #[test]
    fn test_open_fails_when_path_is_a_file() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("blocker");
        fs::write(&blocker, b"file").unwrap();

        let result = FsFrameStore::open(blocker.join("unique"), &StoreConfig::default());
        assert!(matches!(result, Err(StoreError::Io { .. })));
    }

    #[test]
    fn test_save_fails_when_dir_removed() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("unique");
        let mut store = FsFrameStore::open(&dir, &StoreConfig::default()).unwrap();
        fs::remove_dir_all(&dir).unwrap();

        let result = store.save("gone", &diagonal_ramp(8, 8));
        assert!(matches!(result, Err(StoreError::Io { .. })));
        assert!(!store.exists("gone"));
    }

    #[test]
    fn test_dry_run_store_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = DryRunStore::new(temp_dir.path(), &StoreConfig::default());
        let location = store.save("abc", &diagonal_ramp(8, 8)).unwrap();

        assert_eq!(location, temp_dir.path().join("abc.jpg"));
        assert!(store.exists("abc"));
        assert!(!location.exists());
        assert_eq!(store.saved().len(), 1);
    }
}
