//! PDF extraction: page text and embedded images via pdfium.
//!
//! pdfium is not async-aware; every call runs inside
//! `tokio::task::spawn_blocking`. The library is bound at runtime from
//! `PDFIUM_LIB_PATH`, the working directory, or the system loader path.
//!
//! Extracting a unit writes three things: PNGs under `images_dir`
//! (`{unit}_page{NN}_img{NN}.png`, numbered across the whole document),
//! image records in the metadata store, and the rendered markdown.

use crate::config::ProjectConfig;
use crate::error::FlashdeckError;
use crate::metadata::{Dimensions, ImageMetadata, MetadataStore};
use crate::output::write_atomic;
use crate::render::{render_markdown, PageText};
use crate::unit::Unit;
use image::{DynamicImage, ImageFormat};
use pdfium_render::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// An image written to disk during extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedImage {
    pub filename: String,
    pub page: u32,
    pub width: u32,
    pub height: u32,
    pub path: PathBuf,
}

impl ExtractedImage {
    fn into_metadata(self, unit: &str) -> ImageMetadata {
        ImageMetadata::extracted(
            self.filename,
            unit,
            self.page,
            self.path.to_string_lossy(),
            Dimensions {
                width: self.width,
                height: self.height,
            },
        )
    }
}

/// Result of extracting one unit.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractSummary {
    pub unit: String,
    pub pages: usize,
    pub images: usize,
    pub markdown_path: PathBuf,
    pub markdown_chars: usize,
}

/// Image file name for the `index`-th kept image of a document.
pub fn image_filename(unit: &str, page: u32, index: usize) -> String {
    format!("{unit}_page{page:02}_img{index:02}.png")
}

/// Bind to a pdfium shared library.
pub fn bind_pdfium() -> Result<Pdfium, FlashdeckError> {
    let local = match std::env::var("PDFIUM_LIB_PATH").ok().map(PathBuf::from) {
        Some(p) if p.is_dir() => Pdfium::pdfium_platform_library_name_at_path(&p),
        Some(p) => p,
        None => Pdfium::pdfium_platform_library_name_at_path("./"),
    };
    debug!("Binding pdfium from {}", local.display());
    let bindings = Pdfium::bind_to_library(&local)
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|e| FlashdeckError::PdfiumBindingFailed(format!("{e:?}")))?;
    Ok(Pdfium::new(bindings))
}

fn load_document<'a>(pdfium: &'a Pdfium, path: &Path) -> Result<PdfDocument<'a>, FlashdeckError> {
    pdfium.load_pdf_from_file(path, None).map_err(|e| {
        let err_str = format!("{e:?}");
        if err_str.contains("Password") || err_str.contains("password") {
            FlashdeckError::PasswordRequired {
                path: path.to_path_buf(),
            }
        } else {
            FlashdeckError::CorruptPdf {
                path: path.to_path_buf(),
                detail: err_str,
            }
        }
    })
}

/// Text of every page, in order, 1-based.
pub async fn extract_text_by_page(pdf_path: &Path) -> Result<Vec<PageText>, FlashdeckError> {
    let path = pdf_path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let pdfium = bind_pdfium()?;
        let document = load_document(&pdfium, &path)?;
        Ok(page_texts(&document))
    })
    .await
    .map_err(|e| FlashdeckError::Internal(format!("Extraction task panicked: {e}")))?
}

/// Write every embedded image at least `min_size` to `out_dir` as PNG.
pub async fn extract_images(
    pdf_path: &Path,
    unit: &str,
    out_dir: &Path,
    min_size: [u32; 2],
) -> Result<Vec<ExtractedImage>, FlashdeckError> {
    let path = pdf_path.to_path_buf();
    let unit = unit.to_string();
    let out_dir = out_dir.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let pdfium = bind_pdfium()?;
        let document = load_document(&pdfium, &path)?;
        page_images(&document, &unit, &out_dir, min_size)
    })
    .await
    .map_err(|e| FlashdeckError::Internal(format!("Extraction task panicked: {e}")))?
}

fn page_texts(document: &PdfDocument<'_>) -> Vec<PageText> {
    let mut pages = Vec::new();
    for (idx, page) in document.pages().iter().enumerate() {
        let page_num = idx as u32 + 1;
        let text = match page.text() {
            Ok(t) => t.all(),
            Err(e) => {
                warn!("Failed to extract text from page {}: {:?}", page_num, e);
                String::new()
            }
        };
        debug!("Page {}: {} chars", page_num, text.len());
        pages.push(PageText { page: page_num, text });
    }
    info!("Extracted text from {} pages", pages.len());
    pages
}

fn page_images(
    document: &PdfDocument<'_>,
    unit: &str,
    out_dir: &Path,
    min_size: [u32; 2],
) -> Result<Vec<ExtractedImage>, FlashdeckError> {
    std::fs::create_dir_all(out_dir).map_err(|source| FlashdeckError::OutputWriteFailed {
        path: out_dir.to_path_buf(),
        source,
    })?;

    let mut extracted = Vec::new();
    let mut counter = 1usize;

    for (idx, page) in document.pages().iter().enumerate() {
        let page_num = idx as u32 + 1;
        for object in page.objects().iter() {
            let Some(image_object) = object.as_image_object() else {
                continue;
            };
            let raw = match image_object.get_raw_image() {
                Ok(img) => img,
                Err(e) => {
                    warn!("Failed to read an image on page {}: {:?}", page_num, e);
                    continue;
                }
            };
            let (width, height) = (raw.width(), raw.height());
            if width < min_size[0] || height < min_size[1] {
                debug!("Skipping small image on page {}: {}x{}", page_num, width, height);
                continue;
            }

            let filename = image_filename(unit, page_num, counter);
            let path = out_dir.join(&filename);
            let png = match raw {
                DynamicImage::ImageRgb8(_) | DynamicImage::ImageLuma8(_) => raw,
                other => DynamicImage::ImageRgb8(other.to_rgb8()),
            };
            if let Err(e) = png.save_with_format(&path, ImageFormat::Png) {
                warn!("Failed to save {}: {}", filename, e);
                continue;
            }
            debug!("Extracted image: {} ({}x{})", filename, width, height);
            extracted.push(ExtractedImage {
                filename,
                page: page_num,
                width,
                height,
                path,
            });
            counter += 1;
        }
    }
    info!("Extracted {} images for {}", extracted.len(), unit);
    Ok(extracted)
}

/// Extract one unit: images (when enabled), metadata records, markdown.
///
/// The markdown embeds any descriptions already in the metadata store, so
/// re-extracting after a description pass keeps them.
pub async fn extract_unit(
    project: &ProjectConfig,
    unit: &Unit,
    store: &MetadataStore,
    with_images: bool,
) -> Result<ExtractSummary, FlashdeckError> {
    let pdf_path = unit.pdf_path(project);
    if !pdf_path.exists() {
        return Err(FlashdeckError::PdfNotFound { path: pdf_path });
    }
    info!("Extracting {} from {}", unit.name, pdf_path.display());

    let pages = extract_text_by_page(&pdf_path).await?;

    let mut image_count = 0;
    if with_images && project.processing.extract_images {
        let images = extract_images(
            &pdf_path,
            &unit.name,
            &project.output.images_dir,
            project.processing.min_image_size,
        )
        .await?;
        image_count = images.len();
        let records = images.into_iter().map(|i| i.into_metadata(&unit.name)).collect();
        store.record_images(records).await?;
    }

    let images = store.load().await?.images_for_unit(&unit.name);
    let markdown = render_markdown(&unit.title(), &pages, &images);
    let markdown_path = project.output.markdown_path(&unit.name);
    write_atomic(&markdown_path, markdown.as_bytes()).await?;
    info!("Wrote {} ({} chars)", markdown_path.display(), markdown.len());

    Ok(ExtractSummary {
        unit: unit.name.clone(),
        pages: pages.len(),
        images: image_count,
        markdown_path,
        markdown_chars: markdown.chars().count(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::UnitSource;

    #[test]
    fn image_names_are_zero_padded() {
        assert_eq!(image_filename("unit_1", 3, 1), "unit_1_page03_img01.png");
        assert_eq!(image_filename("unit_1", 12, 104), "unit_1_page12_img104.png");
    }

    #[test]
    fn extracted_image_becomes_record() {
        let img = ExtractedImage {
            filename: "u_page02_img01.png".into(),
            page: 2,
            width: 300,
            height: 200,
            path: PathBuf::from("outputs/images/u_page02_img01.png"),
        };
        let record = img.into_metadata("u");
        assert_eq!(record.unit, "u");
        assert_eq!(record.dimensions.width, 300);
        assert!(record.extracted_at.is_some());
        assert!(!record.is_described());
    }

    #[tokio::test]
    async fn missing_pdf_is_reported_before_binding() {
        let dir = tempfile::tempdir().unwrap();
        let project = ProjectConfig {
            pdfs_dir: dir.path().to_path_buf(),
            ..ProjectConfig::default()
        };
        let unit = Unit {
            name: "unit_x".into(),
            pdf_file: "x.pdf".into(),
            target_cards: 10,
            tags: vec!["unit_x".into()],
            source: UnitSource::ConfiguredOnly,
        };
        let store = MetadataStore::new(dir.path().join("meta.json"));
        let err = extract_unit(&project, &unit, &store, true).await.unwrap_err();
        assert!(matches!(err, FlashdeckError::PdfNotFound { .. }));
    }
}
