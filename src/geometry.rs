use crate::error::PageSplitError;
use crate::types::{Margins, Size, Unit};

/// CSS reference resolution.
pub const CSS_DPI: f32 = 96.0;
pub const MM_PER_INCH: f32 = 25.4;
pub const POINTS_PER_INCH: f32 = 72.0;
/// Millimeters to CSS pixels at 96 DPI (~3.7795275591).
pub const MM_TO_PX: f32 = CSS_DPI / MM_PER_INCH;

/// Caller-facing page setup. Resolved once per generation pass into a
/// [`PageGeometry`], which is the only place unit conversion happens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometryConfig {
    pub page_size: Size,
    pub margins: Margins,
    pub unit: Unit,
    pub dpi: f32,
    /// Device pixels per CSS pixel used when capturing the layout.
    pub capture_scale: f32,
    /// Map the element width onto the content-area width before measuring.
    /// When off, the content area is converted to pixels at `dpi` as-is.
    pub fit_to_width: bool,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self::a4_millimeters()
    }
}

impl GeometryConfig {
    /// A4 with a uniform 15 mm margin, captured at 2x.
    pub fn a4_millimeters() -> Self {
        Self {
            page_size: Size::a4_mm(),
            margins: Margins::all(15.0),
            unit: Unit::Millimeter,
            dpi: CSS_DPI,
            capture_scale: 2.0,
            fit_to_width: true,
        }
    }

    /// A4 in whole device pixels with a 57 px (~15 mm) margin.
    pub fn a4_pixels() -> Self {
        Self {
            page_size: Size::a4_px(),
            margins: Margins::all(57.0),
            unit: Unit::Pixel,
            dpi: CSS_DPI,
            capture_scale: 1.0,
            fit_to_width: true,
        }
    }

    /// The `@page` setup used for native printing: A4 converted to pixels with
    /// 40 px top and bottom margins and no width fitting.
    pub fn print_css() -> Self {
        Self {
            page_size: Size::a4_mm().scaled(MM_TO_PX),
            margins: Margins {
                top: 40.0,
                right: 0.0,
                bottom: 40.0,
                left: 0.0,
            },
            unit: Unit::Pixel,
            dpi: CSS_DPI,
            capture_scale: 1.0,
            fit_to_width: false,
        }
    }

    pub fn with_margins(mut self, margins: Margins) -> Self {
        self.margins = margins;
        self
    }

    pub fn with_capture_scale(mut self, scale: f32) -> Self {
        self.capture_scale = scale;
        self
    }

    pub fn resolve(&self) -> Result<PageGeometry, PageSplitError> {
        if !self.page_size.is_positive() {
            return Err(PageSplitError::InvalidConfiguration(format!(
                "page size must be positive, got {}x{}{}",
                self.page_size.width,
                self.page_size.height,
                self.unit.label()
            )));
        }
        if !self.margins.is_valid() {
            return Err(PageSplitError::InvalidConfiguration(
                "margins must be finite and non-negative".to_string(),
            ));
        }
        if !(self.dpi.is_finite() && self.dpi > 0.0) {
            return Err(PageSplitError::InvalidConfiguration(format!(
                "dpi must be > 0, got {}",
                self.dpi
            )));
        }
        if !(self.capture_scale.is_finite() && self.capture_scale > 0.0) {
            return Err(PageSplitError::InvalidConfiguration(format!(
                "capture scale must be > 0, got {}",
                self.capture_scale
            )));
        }
        let content_area = Size::new(
            self.page_size.width - self.margins.horizontal(),
            self.page_size.height - self.margins.vertical(),
        );
        if !content_area.is_positive() {
            return Err(PageSplitError::InvalidConfiguration(format!(
                "margins leave no content area on a {}x{}{} page",
                self.page_size.width,
                self.page_size.height,
                self.unit.label()
            )));
        }
        Ok(PageGeometry {
            unit: self.unit,
            dpi: self.dpi,
            page_size: self.page_size,
            margins: self.margins,
            content_area,
            capture_scale: self.capture_scale,
            fit_to_width: self.fit_to_width,
        })
    }
}

/// Validated page geometry. Every dimension is in `unit`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    unit: Unit,
    dpi: f32,
    page_size: Size,
    margins: Margins,
    content_area: Size,
    capture_scale: f32,
    fit_to_width: bool,
}

impl PageGeometry {
    pub fn unit(&self) -> Unit {
        self.unit
    }

    pub fn dpi(&self) -> f32 {
        self.dpi
    }

    pub fn page_size(&self) -> Size {
        self.page_size
    }

    pub fn margins(&self) -> Margins {
        self.margins
    }

    pub fn capture_scale(&self) -> f32 {
        self.capture_scale
    }

    pub fn content_area(&self) -> Size {
        self.content_area
    }

    pub fn content_area_width(&self) -> f32 {
        self.content_area.width
    }

    pub fn content_area_height(&self) -> f32 {
        self.content_area.height
    }

    /// CSS pixels per geometry unit.
    pub fn px_per_unit(&self) -> f32 {
        match self.unit {
            Unit::Millimeter => self.dpi / MM_PER_INCH,
            Unit::Pixel => 1.0,
            Unit::Point => self.dpi / POINTS_PER_INCH,
        }
    }

    pub fn to_px(&self, value: f32) -> f32 {
        value * self.px_per_unit()
    }

    pub fn from_px(&self, value: f32) -> f32 {
        value / self.px_per_unit()
    }

    pub fn to_points(&self, value: f32) -> f32 {
        match self.unit {
            Unit::Millimeter => value * POINTS_PER_INCH / MM_PER_INCH,
            Unit::Pixel => value * POINTS_PER_INCH / self.dpi,
            Unit::Point => value,
        }
    }

    pub fn page_size_points(&self) -> Size {
        Size::new(
            self.to_points(self.page_size.width),
            self.to_points(self.page_size.height),
        )
    }

    pub fn content_area_px(&self) -> Size {
        Size::new(
            self.to_px(self.content_area.width),
            self.to_px(self.content_area.height),
        )
    }

    /// Geometry units per element pixel when the element is fitted to the
    /// content-area width.
    pub fn scale_factor(&self, element_width: f32) -> Result<f32, PageSplitError> {
        if !(element_width.is_finite() && element_width > 0.0) {
            return Err(PageSplitError::Measurement(format!(
                "element width must be positive, got {element_width}"
            )));
        }
        Ok(self.content_area.width / element_width)
    }

    /// Content-area height expressed in the element's own pixel space. This is
    /// the page height the break locator must be given.
    pub fn effective_page_height(&self, element_width: f32) -> Result<f32, PageSplitError> {
        let height = if self.fit_to_width {
            self.content_area.height / self.scale_factor(element_width)?
        } else {
            self.content_area_px().height
        };
        if !(height.is_finite() && height > 0.0) {
            return Err(PageSplitError::Measurement(format!(
                "effective page height is not usable: {height}"
            )));
        }
        Ok(height)
    }
}
