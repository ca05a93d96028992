//! Rasterisation: [`InputDocument`] → ordered [`RasterizedPage`]s.
//!
//! Raster images decode to exactly one page, unscaled. PDFs are rendered
//! page by page through pdfium at the configured DPI, capped by
//! `max_rendered_pixels` on the longest edge.
//!
//! ## Why spawn_blocking?
//!
//! pdfium is a C++ library with thread-local state and is CPU-bound; image
//! decoding is CPU-bound too. Both run on the blocking pool so the Tokio
//! workers keep driving in-flight inference calls.
//!
//! ## Partial failure
//!
//! A page that fails to render does not abort the document. Its slot holds
//! the [`PageError`], which later becomes an `error` verdict, so page
//! indices stay contiguous.

use crate::config::CheckConfig;
use crate::error::{CheckError, PageError};
use crate::pipeline::input::{InputDocument, MediaType};
use image::DynamicImage;
use pdfium_render::prelude::*;
use tracing::{debug, info, warn};

/// PDF points per inch; pdfium page sizes are expressed in points.
const POINTS_PER_INCH: f32 = 72.0;

/// One rasterised page.
#[derive(Debug, Clone)]
pub struct PageImage {
    /// 0-based index in source order.
    pub page_index: usize,
    pub image: DynamicImage,
    /// Render resolution for PDF pages; `None` for raster inputs.
    pub dpi: Option<u32>,
}

impl PageImage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// A page slot: the rendered image, or why it could not be produced.
#[derive(Debug, Clone)]
pub struct RasterizedPage {
    pub page_index: usize,
    pub outcome: Result<PageImage, PageError>,
}

impl RasterizedPage {
    pub fn rendered(image: PageImage) -> Self {
        Self {
            page_index: image.page_index,
            outcome: Ok(image),
        }
    }

    pub fn failed(page_index: usize, detail: impl Into<String>) -> Self {
        Self {
            page_index,
            outcome: Err(PageError::RenderFailed {
                page_index,
                detail: detail.into(),
            }),
        }
    }
}

/// Rasterise every page of the input, in source order.
///
/// # Errors
/// Fatal errors only: unsupported/corrupt input, an empty document, a
/// missing or wrong PDF password, or a pdfium binding failure. Single-page
/// render failures are returned inside the vector.
pub async fn rasterize(
    input: &InputDocument,
    config: &CheckConfig,
) -> Result<Vec<RasterizedPage>, CheckError> {
    let name = input.name().to_string();
    let bytes = input.bytes().to_vec();
    let media_type = input.media_type();
    let dpi = config.dpi;
    let max_pixels = config.max_rendered_pixels;
    let password = config.password.clone();

    let pages = tokio::task::spawn_blocking(move || {
        if media_type.is_document() {
            render_pdf_blocking(&name, &bytes, dpi, max_pixels, password.as_deref())
        } else {
            decode_image_blocking(&name, &bytes, media_type)
        }
    })
    .await
    .map_err(|e| CheckError::Internal(format!("Render task panicked: {}", e)))??;

    let failed = pages.iter().filter(|p| p.outcome.is_err()).count();
    info!(
        "Rasterised '{}': {} page(s), {} failed",
        input.name(),
        pages.len(),
        failed
    );
    Ok(pages)
}

/// Decode a single raster image into one page.
fn decode_image_blocking(
    name: &str,
    bytes: &[u8],
    media_type: MediaType,
) -> Result<Vec<RasterizedPage>, CheckError> {
    let unsupported = |detail: String| CheckError::UnsupportedFormat {
        document: name.to_string(),
        media_type: media_type.mime().to_string(),
        detail,
    };

    let format = media_type
        .image_format()
        .ok_or_else(|| unsupported("not a raster image format".into()))?;
    let image = image::load_from_memory_with_format(bytes, format)
        .map_err(|e| unsupported(e.to_string()))?;

    debug!("Decoded image → {}x{} px", image.width(), image.height());
    Ok(vec![RasterizedPage::rendered(PageImage {
        page_index: 0,
        image,
        dpi: None,
    })])
}

/// Bind pdfium from `PDFIUM_LIB_PATH` if set, else from the system library.
fn bind_pdfium() -> Result<Pdfium, CheckError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(path) if !path.is_empty() => Pdfium::bind_to_library(&path),
        _ => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| CheckError::PdfiumBindingFailed(format!("{:?}", e)))?;
    Ok(Pdfium::new(bindings))
}

/// Blocking implementation of PDF rendering.
fn render_pdf_blocking(
    name: &str,
    bytes: &[u8],
    dpi: u32,
    max_pixels: u32,
    password: Option<&str>,
) -> Result<Vec<RasterizedPage>, CheckError> {
    let pdfium = bind_pdfium()?;

    let document = pdfium
        .load_pdf_from_byte_slice(bytes, password)
        .map_err(|e| {
            let err_str = format!("{:?}", e);
            if err_str.contains("Password") || err_str.contains("password") {
                if password.is_some() {
                    CheckError::WrongPassword {
                        document: name.to_string(),
                    }
                } else {
                    CheckError::PasswordRequired {
                        document: name.to_string(),
                    }
                }
            } else {
                CheckError::UnsupportedFormat {
                    document: name.to_string(),
                    media_type: MediaType::Pdf.mime().to_string(),
                    detail: err_str,
                }
            }
        })?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    if total_pages == 0 {
        return Err(CheckError::EmptyDocument {
            document: name.to_string(),
        });
    }
    info!("PDF loaded: {} pages", total_pages);

    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(dpi as f32 / POINTS_PER_INCH)
        .set_maximum_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut results = Vec::with_capacity(total_pages);

    for idx in 0..total_pages {
        let rendered = match pages.get(idx as u16) {
            Ok(page) => page
                .render_with_config(&render_config)
                .map(|bitmap| bitmap.as_image()),
            Err(e) => Err(e),
        };

        match rendered {
            Ok(image) => {
                debug!(
                    "Rendered page {} → {}x{} px",
                    idx + 1,
                    image.width(),
                    image.height()
                );
                results.push(RasterizedPage::rendered(PageImage {
                    page_index: idx,
                    image,
                    dpi: Some(dpi),
                }));
            }
            Err(e) => {
                warn!("Page {}: render failed — {:?}", idx + 1, e);
                results.push(RasterizedPage::failed(idx, format!("{:?}", e)));
            }
        }
    }

    Ok(results)
}
