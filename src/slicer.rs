use crate::debug::DebugLogger;
use crate::document::{PageImage, PaginatedDocument};
use crate::error::{PageSplitError, Warning};
use crate::geometry::PageGeometry;
use crate::metrics::{PageMetrics, elapsed_ms};
use crate::raster::{RasterImage, pixmap_to_rgba};
use crate::types::{Color, Rect};
use serde_json::json;
use std::time::Instant;
use tiny_skia::{IntRect, Pixmap, PixmapPaint, Transform};

pub const DEFAULT_MAX_PAGES: usize = 100;

/// Remaining content smaller than this (in geometry units) is treated as consumed.
const SLICE_EPSILON: f32 = 1e-3;

/// The band of source rows that becomes one output page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSlice {
    pub index: usize,
    pub source_y: u32,
    pub source_height: u32,
    /// Height the band occupies on the page, in geometry units.
    pub content_height: f32,
}

impl PageSlice {
    pub fn source_end(&self) -> u32 {
        self.source_y + self.source_height
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlicePlan {
    pub slices: Vec<PageSlice>,
    /// Image height scaled to the content width, in geometry units.
    pub image_height: f32,
    /// Geometry units per source pixel.
    pub px_to_unit: f32,
    pub truncated: bool,
}

/// Cuts a `image_width`x`image_height` capture into content-area bands.
///
/// Bands are whole source rows and every row lands in exactly one band; the
/// last band always ends at the bottom of the image. Planning stops after
/// `max_pages` bands and flags the plan as truncated.
pub fn plan_slices(
    image_width: u32,
    image_height: u32,
    content_width: f32,
    content_height: f32,
    max_pages: usize,
) -> Result<SlicePlan, PageSplitError> {
    if image_width == 0 || image_height == 0 {
        return Err(PageSplitError::Capture(format!(
            "cannot slice an empty {image_width}x{image_height} image"
        )));
    }
    if !(content_width.is_finite() && content_width > 0.0)
        || !(content_height.is_finite() && content_height > 0.0)
    {
        return Err(PageSplitError::InvalidConfiguration(format!(
            "content area must be positive, got {content_width}x{content_height}"
        )));
    }
    if max_pages == 0 {
        return Err(PageSplitError::InvalidConfiguration(
            "page limit must be at least 1".to_string(),
        ));
    }

    let scaled_height = image_height as f32 * content_width / image_width as f32;
    let px_to_unit = scaled_height / image_height as f32;
    if !(px_to_unit.is_finite() && px_to_unit > 0.0) {
        return Err(PageSplitError::Measurement(format!(
            "degenerate pixel scale {px_to_unit}"
        )));
    }

    let to_row = |units: f32| ((units / px_to_unit).round().max(0.0) as u32).min(image_height);
    let mut slices = Vec::new();
    let mut truncated = false;
    let mut current_y = 0.0_f32;
    let mut next_row = 0_u32;
    while current_y < scaled_height - SLICE_EPSILON && next_row < image_height {
        if slices.len() >= max_pages {
            truncated = true;
            break;
        }
        let page_content_height = content_height.min(scaled_height - current_y);
        let is_last = current_y + page_content_height >= scaled_height - SLICE_EPSILON;
        let end_row = if is_last {
            image_height
        } else {
            to_row(current_y + page_content_height)
        };
        if end_row > next_row {
            slices.push(PageSlice {
                index: slices.len(),
                source_y: next_row,
                source_height: end_row - next_row,
                content_height: page_content_height,
            });
            next_row = end_row;
        }
        current_y += page_content_height;
    }

    Ok(SlicePlan {
        slices,
        image_height: scaled_height,
        px_to_unit,
        truncated,
    })
}

/// Composes planned slices into pages one at a time, so callers can yield
/// between pages. Consumes the capture.
pub struct Slicer {
    source: Pixmap,
    plan: SlicePlan,
    geometry: PageGeometry,
    background: Color,
    max_pages: usize,
    /// Device pixels per geometry unit on the output pages.
    device_per_unit: f32,
    document: PaginatedDocument,
    debug: Option<DebugLogger>,
    next: usize,
}

impl Slicer {
    pub fn new(
        image: RasterImage,
        geometry: &PageGeometry,
        background: Color,
        max_pages: usize,
    ) -> Result<Self, PageSplitError> {
        let content = geometry.content_area();
        let plan = plan_slices(
            image.width(),
            image.height(),
            content.width,
            content.height,
            max_pages,
        )?;
        let device_per_unit = 1.0 / plan.px_to_unit;
        log::debug!(
            "planned {} page(s) from a {}x{} capture ({:.4}{} per px)",
            plan.slices.len(),
            image.width(),
            image.height(),
            plan.px_to_unit,
            geometry.unit().label()
        );
        Ok(Self {
            source: image.to_pixmap()?,
            plan,
            geometry: *geometry,
            background,
            max_pages,
            device_per_unit,
            document: PaginatedDocument::new(*geometry, background),
            debug: None,
            next: 0,
        })
    }

    pub fn with_debug(mut self, logger: Option<DebugLogger>) -> Self {
        self.debug = logger;
        self
    }

    pub fn plan(&self) -> &SlicePlan {
        &self.plan
    }

    pub fn remaining(&self) -> usize {
        self.plan.slices.len().saturating_sub(self.next)
    }

    pub fn is_done(&self) -> bool {
        self.remaining() == 0
    }

    /// Size of every composed page in device pixels.
    pub fn page_size_px(&self) -> (u32, u32) {
        let size = self.geometry.page_size();
        (
            (size.width * self.device_per_unit).round().max(1.0) as u32,
            (size.height * self.device_per_unit).round().max(1.0) as u32,
        )
    }

    /// Composes the next page, or returns `None` once every slice is placed.
    pub fn next_page(&mut self) -> Result<Option<&PageImage>, PageSplitError> {
        let Some(slice) = self.plan.slices.get(self.next).copied() else {
            return Ok(None);
        };
        let started = Instant::now();
        let page = self.compose(slice)?;
        self.next += 1;

        let compose_ms = elapsed_ms(started);
        log::debug!(
            "page {}: rows {}..{} ({:.1}ms)",
            slice.index + 1,
            slice.source_y,
            slice.source_end(),
            compose_ms
        );
        if let Some(logger) = &self.debug {
            logger.event(
                "slice.page",
                json!({
                    "page": slice.index + 1,
                    "source_y": slice.source_y,
                    "source_height": slice.source_height,
                    "content_height": slice.content_height,
                }),
            );
            logger.increment("slice.page", 1);
        }
        let metrics = self.document.metrics_mut();
        metrics.pages.push(PageMetrics {
            page_number: slice.index + 1,
            source_y: slice.source_y,
            source_height: slice.source_height,
            compose_ms,
        });
        metrics.slice_ms += compose_ms;
        self.document.push_page(page);
        Ok(self.document.pages().last())
    }

    /// Composes whatever is left and hands back the document.
    pub fn finish(mut self) -> Result<PaginatedDocument, PageSplitError> {
        while self.next_page()?.is_some() {}
        Ok(self.into_document())
    }

    /// Hands back the pages composed so far, with the page-limit warning if
    /// the plan was cut short.
    pub fn into_document(mut self) -> PaginatedDocument {
        if self.plan.truncated {
            let warning = Warning::PageLimitReached {
                limit: self.max_pages,
            };
            log::warn!("{warning}");
            if let Some(logger) = &self.debug {
                logger.event(
                    "slice.limit",
                    json!({
                        "limit": self.max_pages,
                        "image_height": self.plan.image_height,
                    }),
                );
            }
            self.document.push_warning(warning);
        }
        self.document
    }

    fn compose(&self, slice: PageSlice) -> Result<PageImage, PageSplitError> {
        let (page_w, page_h) = self.page_size_px();
        let mut page = Pixmap::new(page_w, page_h).ok_or_else(|| {
            PageSplitError::Capture(format!("cannot allocate a {page_w}x{page_h} page"))
        })?;
        // Opaque fill keeps margins and any transparent capture pixels from
        // coming out as gaps.
        page.fill(self.background.to_skia());

        let band_rect = IntRect::from_xywh(
            0,
            slice.source_y as i32,
            self.source.width(),
            slice.source_height,
        )
        .ok_or_else(|| {
            PageSplitError::Capture(format!(
                "invalid band at row {} height {}",
                slice.source_y, slice.source_height
            ))
        })?;
        let band = self.source.clone_rect(band_rect).ok_or_else(|| {
            PageSplitError::Capture(format!(
                "band rows {}..{} fall outside the capture",
                slice.source_y,
                slice.source_end()
            ))
        })?;

        let margins = self.geometry.margins();
        let offset_x = (margins.left * self.device_per_unit).round() as i32;
        let offset_y = (margins.top * self.device_per_unit).round() as i32;
        page.draw_pixmap(
            offset_x,
            offset_y,
            band.as_ref(),
            &PixmapPaint::default(),
            Transform::identity(),
            None,
        );

        let placement = Rect::new(
            margins.left,
            margins.top,
            self.geometry.content_area_width(),
            slice.content_height,
        );
        PageImage::from_rgba(slice, placement, &pixmap_to_rgba(&page)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::GeometryConfig;
    use crate::types::{Margins, Size, Unit};
    use image::{Rgba, RgbaImage};

    fn assert_contiguous(plan: &SlicePlan, image_height: u32) {
        let mut expected_start = 0;
        for slice in &plan.slices {
            assert_eq!(slice.source_y, expected_start, "gap or overlap at {slice:?}");
            assert!(slice.source_height > 0);
            expected_start = slice.source_end();
        }
        assert_eq!(expected_start, image_height);
    }

    #[test]
    fn bands_cover_every_row_exactly_once() {
        for height in [1, 99, 100, 101, 250, 1234, 2671, 10_000] {
            let plan = plan_slices(1440, height, 180.0, 267.0, DEFAULT_MAX_PAGES).unwrap();
            assert!(!plan.truncated);
            assert_contiguous(&plan, height);
        }
    }

    #[test]
    fn non_integral_scale_still_covers_the_image() {
        let plan = plan_slices(733, 5003, 180.0, 267.0, DEFAULT_MAX_PAGES).unwrap();
        assert_contiguous(&plan, 5003);
    }

    #[test]
    fn page_counts_follow_content_multiples() {
        let pages = |height: u32| {
            plan_slices(180, height, 180.0, 100.0, DEFAULT_MAX_PAGES)
                .unwrap()
                .slices
                .len()
        };
        assert_eq!(pages(200), 2);
        assert_eq!(pages(250), 3);
        assert_eq!(pages(50), 1);
    }

    #[test]
    fn slice_mapping_matches_the_scale() {
        // 2x capture of a 720px element onto 180mm: 0.125mm per pixel.
        let plan = plan_slices(1440, 4272, 180.0, 267.0, DEFAULT_MAX_PAGES).unwrap();
        assert!((plan.px_to_unit - 0.125).abs() < 1e-6);
        assert_eq!(plan.slices.len(), 2);
        assert_eq!(plan.slices[0].source_height, 2136);
        assert_eq!(plan.slices[1].source_y, 2136);
    }

    #[test]
    fn runaway_height_stops_at_the_page_limit() {
        let plan = plan_slices(100, 150 * 100, 100.0, 100.0, DEFAULT_MAX_PAGES).unwrap();
        assert!(plan.truncated);
        assert_eq!(plan.slices.len(), DEFAULT_MAX_PAGES);
        assert_eq!(plan.slices.last().unwrap().source_end(), 100 * 100);
    }

    #[test]
    fn zero_page_limit_is_rejected() {
        assert!(matches!(
            plan_slices(10, 10, 10.0, 10.0, 0),
            Err(PageSplitError::InvalidConfiguration(_))
        ));
    }

    fn small_geometry() -> PageGeometry {
        GeometryConfig {
            page_size: Size::new(30.0, 40.0),
            margins: Margins::all(5.0),
            unit: Unit::Pixel,
            dpi: 96.0,
            capture_scale: 1.0,
            fit_to_width: true,
        }
        .resolve()
        .unwrap()
    }

    fn striped(width: u32, height: u32) -> RasterImage {
        let mut img = RgbaImage::new(width, height);
        for (_, y, pixel) in img.enumerate_pixels_mut() {
            *pixel = Rgba([(y % 256) as u8, 0, 0, 255]);
        }
        RasterImage::from_rgba(img, 1.0).unwrap()
    }

    #[test]
    fn composites_place_bands_inside_the_margins() {
        let geometry = small_geometry();
        let slicer = Slicer::new(striped(20, 45), &geometry, Color::WHITE, 10).unwrap();
        assert_eq!(slicer.page_size_px(), (30, 40));
        let doc = slicer.finish().unwrap();

        assert_eq!(doc.page_count(), 2);
        let first = &doc.pages()[0];
        let first_px = first.pixels().unwrap();
        assert_eq!(first_px.get_pixel(0, 0).0, [255, 255, 255, 255]);
        assert_eq!(first_px.get_pixel(5, 5).0, [0, 0, 0, 255]);
        assert_eq!(first_px.get_pixel(5, 34).0, [29, 0, 0, 255]);
        assert_eq!(first.placement, Rect::new(5.0, 5.0, 20.0, 30.0));

        let second = &doc.pages()[1];
        let second_px = second.pixels().unwrap();
        assert_eq!(second.slice.source_y, 30);
        assert_eq!(second_px.get_pixel(5, 5).0, [30, 0, 0, 255]);
        // Below the last band the page keeps its background.
        assert_eq!(second_px.get_pixel(5, 25).0, [255, 255, 255, 255]);
        assert_eq!(doc.metrics().page_count(), 2);
        assert!(doc.warnings().is_empty());
    }

    #[test]
    fn background_colour_fills_the_page() {
        let geometry = small_geometry();
        let grey = Color::from_rgb8(240, 240, 240);
        let doc = Slicer::new(striped(20, 10), &geometry, grey, 10)
            .unwrap()
            .finish()
            .unwrap();
        assert_eq!(doc.pages()[0].pixels().unwrap().get_pixel(29, 39).0, [240, 240, 240, 255]);
        assert_eq!(doc.background(), grey);
    }

    #[test]
    fn truncated_plan_surfaces_a_warning() {
        let geometry = small_geometry();
        let mut slicer = Slicer::new(striped(20, 300), &geometry, Color::WHITE, 3).unwrap();
        assert_eq!(slicer.remaining(), 3);
        assert!(slicer.next_page().unwrap().is_some());
        assert_eq!(slicer.remaining(), 2);
        let doc = slicer.finish().unwrap();
        assert_eq!(doc.page_count(), 3);
        assert_eq!(doc.warnings(), &[Warning::PageLimitReached { limit: 3 }]);
    }
}
