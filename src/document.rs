use crate::error::{PageSplitError, Warning};
use crate::geometry::PageGeometry;
use crate::metrics::GenerationMetrics;
use crate::slicer::PageSlice;
use crate::types::{Color, Rect, Size};
use image::RgbaImage;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// One composed output page. The canvas is kept PNG-encoded so a long
/// document holds compressed pages, not raw canvases.
#[derive(Debug, Clone, PartialEq)]
pub struct PageImage {
    pub slice: PageSlice,
    /// Where the band sits on the page, in geometry units.
    pub placement: Rect,
    width: u32,
    height: u32,
    png: Vec<u8>,
}

impl PageImage {
    pub(crate) fn from_rgba(
        slice: PageSlice,
        placement: Rect,
        pixels: &RgbaImage,
    ) -> Result<Self, PageSplitError> {
        let mut png = Vec::new();
        pixels.write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)?;
        Ok(Self {
            slice,
            placement,
            width: pixels.width(),
            height: pixels.height(),
            png,
        })
    }

    pub fn width_px(&self) -> u32 {
        self.width
    }

    pub fn height_px(&self) -> u32 {
        self.height
    }

    pub fn png_bytes(&self) -> &[u8] {
        &self.png
    }

    /// Decodes the page canvas.
    pub fn pixels(&self) -> Result<RgbaImage, PageSplitError> {
        let decoded = image::load_from_memory_with_format(&self.png, image::ImageFormat::Png)?;
        Ok(decoded.to_rgba8())
    }

    pub fn to_png(&self) -> Result<Vec<u8>, PageSplitError> {
        Ok(self.png.clone())
    }
}

/// Ordered pages ready to persist. Owned by whoever generated it until taken.
#[derive(Debug, Clone, PartialEq)]
pub struct PaginatedDocument {
    geometry: PageGeometry,
    background: Color,
    pages: Vec<PageImage>,
    warnings: Vec<Warning>,
    metrics: GenerationMetrics,
}

impl PaginatedDocument {
    pub(crate) fn new(geometry: PageGeometry, background: Color) -> Self {
        Self {
            geometry,
            background,
            pages: Vec::new(),
            warnings: Vec::new(),
            metrics: GenerationMetrics::default(),
        }
    }

    pub(crate) fn push_page(&mut self, page: PageImage) {
        self.pages.push(page);
    }

    pub(crate) fn push_warning(&mut self, warning: Warning) {
        if !self.warnings.contains(&warning) {
            self.warnings.push(warning);
        }
    }

    pub(crate) fn metrics_mut(&mut self) -> &mut GenerationMetrics {
        &mut self.metrics
    }

    pub fn geometry(&self) -> &PageGeometry {
        &self.geometry
    }

    /// Page size in the geometry's unit.
    pub fn page_size(&self) -> Size {
        self.geometry.page_size()
    }

    pub fn background(&self) -> Color {
        self.background
    }

    pub fn pages(&self) -> &[PageImage] {
        &self.pages
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn metrics(&self) -> &GenerationMetrics {
        &self.metrics
    }

    pub fn to_png_pages(&self) -> Result<Vec<Vec<u8>>, PageSplitError> {
        self.pages.iter().map(PageImage::to_png).collect()
    }

    /// Writes `{stem}-001.png`, `{stem}-002.png`, ... into `dir`.
    pub fn write_png_pages(
        &self,
        dir: impl AsRef<Path>,
        stem: &str,
    ) -> Result<Vec<PathBuf>, PageSplitError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let mut written = Vec::with_capacity(self.pages.len());
        for (idx, page) in self.pages.iter().enumerate() {
            let path = dir.join(format!("{stem}-{:03}.png", idx + 1));
            std::fs::write(&path, page.png_bytes())?;
            written.push(path);
        }
        Ok(written)
    }

    pub fn to_pdf_bytes(&self) -> Result<Vec<u8>, PageSplitError> {
        crate::pdf::document_to_pdf_bytes(self)
    }

    pub fn save_pdf(&self, path: impl AsRef<Path>) -> Result<(), PageSplitError> {
        crate::pdf::save_document_pdf(self, path.as_ref())
    }

    /// Hex SHA-256 over page dimensions, slice bands and encoded pixels.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update((self.pages.len() as u64).to_le_bytes());
        for page in &self.pages {
            hasher.update(page.width_px().to_le_bytes());
            hasher.update(page.height_px().to_le_bytes());
            hasher.update(page.slice.source_y.to_le_bytes());
            hasher.update(page.slice.source_height.to_le_bytes());
            hasher.update(page.png_bytes());
        }
        hasher
            .finalize()
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect()
    }
}
