//! Input resolution: raw bytes + declared media type → [`InputDocument`].
//!
//! Uploads arrive with a declared MIME type that is frequently wrong or
//! generic (`application/octet-stream`). The bytes are sniffed first; the
//! declared type is used only when the magic bytes say nothing, and the
//! file extension only after that. Anything left over is rejected with
//! [`CheckError::UnsupportedFormat`] before rasterisation starts.

use crate::error::CheckError;
use std::path::Path;
use tracing::{debug, warn};

/// File formats the rasteriser accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    Png,
    Jpeg,
    Gif,
    Webp,
    Bmp,
    Pdf,
}

impl MediaType {
    /// Parse a MIME type such as `image/png` or `application/pdf; charset=binary`.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        match essence.as_str() {
            "image/png" => Some(Self::Png),
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(Self::Jpeg),
            "image/gif" => Some(Self::Gif),
            "image/webp" => Some(Self::Webp),
            "image/bmp" | "image/x-bmp" | "image/x-ms-bmp" => Some(Self::Bmp),
            "application/pdf" | "application/x-pdf" => Some(Self::Pdf),
            _ => None,
        }
    }

    /// Map a file extension (without the dot, any case).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "gif" => Some(Self::Gif),
            "webp" => Some(Self::Webp),
            "bmp" => Some(Self::Bmp),
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }

    /// Detect the format from magic bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"%PDF") {
            return Some(Self::Pdf);
        }
        match image::guess_format(bytes).ok()? {
            image::ImageFormat::Png => Some(Self::Png),
            image::ImageFormat::Jpeg => Some(Self::Jpeg),
            image::ImageFormat::Gif => Some(Self::Gif),
            image::ImageFormat::WebP => Some(Self::Webp),
            image::ImageFormat::Bmp => Some(Self::Bmp),
            _ => None,
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
            Self::Bmp => "image/bmp",
            Self::Pdf => "application/pdf",
        }
    }

    /// True for paginated documents that need a PDF renderer.
    pub fn is_document(self) -> bool {
        matches!(self, Self::Pdf)
    }

    /// The `image` crate decoder for raster formats.
    pub fn image_format(self) -> Option<image::ImageFormat> {
        match self {
            Self::Png => Some(image::ImageFormat::Png),
            Self::Jpeg => Some(image::ImageFormat::Jpeg),
            Self::Gif => Some(image::ImageFormat::Gif),
            Self::Webp => Some(image::ImageFormat::WebP),
            Self::Bmp => Some(image::ImageFormat::Bmp),
            Self::Pdf => None,
        }
    }
}

/// An uploaded file, immutable for the duration of one check.
#[derive(Clone)]
pub struct InputDocument {
    name: String,
    bytes: Vec<u8>,
    media_type: MediaType,
}

impl std::fmt::Debug for InputDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputDocument")
            .field("name", &self.name)
            .field("bytes", &self.bytes.len())
            .field("media_type", &self.media_type)
            .finish()
    }
}

impl InputDocument {
    /// Build a document from uploaded bytes and the declared MIME type.
    ///
    /// `name` is only used for display and in the exported result; it is
    /// never touched as a path.
    pub fn new(
        name: impl Into<String>,
        bytes: Vec<u8>,
        declared_mime: Option<&str>,
    ) -> Result<Self, CheckError> {
        let name = name.into();
        let declared = declared_mime.and_then(MediaType::from_mime);
        let extension = Path::new(&name)
            .extension()
            .and_then(|e| e.to_str())
            .and_then(MediaType::from_extension);

        let media_type = match (MediaType::sniff(&bytes), declared, extension) {
            (Some(sniffed), declared, _) => {
                if let Some(d) = declared.filter(|d| *d != sniffed) {
                    warn!(
                        "'{}' declared as {} but content is {}; using content type",
                        name,
                        d.mime(),
                        sniffed.mime()
                    );
                }
                sniffed
            }
            (None, Some(declared), _) => declared,
            (None, None, Some(ext)) => ext,
            (None, None, None) => {
                return Err(CheckError::UnsupportedFormat {
                    document: name,
                    media_type: declared_mime.unwrap_or("unknown").to_string(),
                    detail: "content is not a PNG, JPEG, GIF, WebP, BMP or PDF file".into(),
                })
            }
        };

        if bytes.is_empty() {
            return Err(CheckError::UnsupportedFormat {
                document: name,
                media_type: media_type.mime().to_string(),
                detail: "file is empty".into(),
            });
        }

        debug!("Input '{}': {} bytes, {}", name, bytes.len(), media_type.mime());
        Ok(Self {
            name,
            bytes,
            media_type,
        })
    }

    /// Read a local file. The media type comes from its content or extension.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, CheckError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => CheckError::PermissionDenied {
                path: path.to_path_buf(),
            },
            std::io::ErrorKind::NotFound => CheckError::FileNotFound {
                path: path.to_path_buf(),
            },
            _ => CheckError::Internal(format!("Failed to read '{}': {}", path.display(), e)),
        })?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        Self::new(name, bytes, None)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }
}
