//! Blob storage for image and thumbnail bytes
//!
//! Originals are stored content-addressed by fingerprint; thumbnails are
//! generated at save time. Decoding and resizing are CPU-bound and run on
//! the blocking pool, never on the scheduler's main loop.

use async_trait::async_trait;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Longest side of a generated thumbnail, in pixels
const THUMBNAIL_MAX_SIDE: u32 = 256;

/// Blob storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid image: {0}")]
    Image(#[from] image::ImageError),

    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Result type for blob operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Metadata captured while saving an image
#[derive(Debug, Clone)]
pub struct BlobMetadata {
    pub image_id: String,
    /// Decoded format label (jpeg, png, webp, gif)
    pub format: String,
    pub size_bytes: u64,
    pub width: u32,
    pub height: u32,
}

/// Byte store for originals and thumbnails. The filesystem adapter is the
/// shipped implementation; object stores slot in behind the same trait.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Save the original and generate a thumbnail. Idempotent: saving the
    /// same fingerprint twice overwrites with identical content.
    async fn save(&self, image_id: &str, bytes: &[u8]) -> StorageResult<BlobMetadata>;

    /// Original bytes, or `None` if unknown
    async fn get(&self, image_id: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Thumbnail bytes (JPEG), or `None` if unknown
    async fn get_thumbnail(&self, image_id: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Remove original and thumbnail; returns whether anything existed
    async fn delete(&self, image_id: &str) -> StorageResult<bool>;

    /// Public download URL for the original
    fn image_url(&self, image_id: &str) -> String;

    /// Public download URL for the thumbnail
    fn thumbnail_url(&self, image_id: &str) -> String;
}

/// Filesystem-backed blob store rooted at a configurable directory
pub struct FsBlobStore {
    root: PathBuf,
    base_url: String,
}

impl FsBlobStore {
    /// Create the store, ensuring the directory layout exists
    pub fn new(root: impl Into<PathBuf>, base_url: &str) -> StorageResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join("originals"))?;
        std::fs::create_dir_all(root.join("thumbnails"))?;
        Ok(Self {
            root,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn original_path(&self, image_id: &str) -> PathBuf {
        self.root.join("originals").join(image_id)
    }

    fn thumbnail_path(&self, image_id: &str) -> PathBuf {
        self.root.join("thumbnails").join(format!("{}.jpg", image_id))
    }

    async fn read_optional(path: &Path) -> StorageResult<Option<Vec<u8>>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Decode, probe dimensions, and render a JPEG thumbnail. Runs on the
/// blocking pool.
fn probe_and_thumbnail(bytes: &[u8]) -> Result<(String, u32, u32, Vec<u8>), image::ImageError> {
    let format = image::guess_format(bytes)
        .map(format_label)
        .unwrap_or("jpeg")
        .to_string();
    let decoded = image::load_from_memory(bytes)?;
    let (width, height) = (decoded.width(), decoded.height());

    let thumb = decoded.thumbnail(THUMBNAIL_MAX_SIDE, THUMBNAIL_MAX_SIDE);
    // JPEG output has no alpha channel
    let rgb = image::DynamicImage::ImageRgb8(thumb.to_rgb8());
    let mut buf = Vec::new();
    rgb.write_to(&mut Cursor::new(&mut buf), image::ImageOutputFormat::Jpeg(85))?;

    Ok((format, width, height, buf))
}

fn format_label(format: image::ImageFormat) -> &'static str {
    match format {
        image::ImageFormat::Jpeg => "jpeg",
        image::ImageFormat::Png => "png",
        image::ImageFormat::WebP => "webp",
        image::ImageFormat::Gif => "gif",
        _ => "jpeg",
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn save(&self, image_id: &str, bytes: &[u8]) -> StorageResult<BlobMetadata> {
        let owned = bytes.to_vec();
        let (format, width, height, thumbnail) =
            tokio::task::spawn_blocking(move || probe_and_thumbnail(&owned)).await??;

        tokio::fs::write(self.original_path(image_id), bytes).await?;
        tokio::fs::write(self.thumbnail_path(image_id), &thumbnail).await?;

        Ok(BlobMetadata {
            image_id: image_id.to_string(),
            format,
            size_bytes: bytes.len() as u64,
            width,
            height,
        })
    }

    async fn get(&self, image_id: &str) -> StorageResult<Option<Vec<u8>>> {
        Self::read_optional(&self.original_path(image_id)).await
    }

    async fn get_thumbnail(&self, image_id: &str) -> StorageResult<Option<Vec<u8>>> {
        Self::read_optional(&self.thumbnail_path(image_id)).await
    }

    async fn delete(&self, image_id: &str) -> StorageResult<bool> {
        let mut existed = false;
        for path in [self.original_path(image_id), self.thumbnail_path(image_id)] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => existed = true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(existed)
    }

    fn image_url(&self, image_id: &str) -> String {
        format!("{}/images/{}/download", self.base_url, image_id)
    }

    fn thumbnail_url(&self, image_id: &str) -> String {
        format!("{}/images/{}/thumbnail", self.base_url, image_id)
    }
}
