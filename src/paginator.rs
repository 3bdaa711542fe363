use crate::breaks::SplitPolicy;
use crate::debug::DebugLogger;
use crate::error::{PageSplitError, Warning};
use crate::geometry::PageGeometry;
use crate::layout::{LayoutSurface, SpacerInfo};
use crate::metrics::elapsed_ms;
use crate::raster::{DisplayListRasterizer, Rasterizer};
use crate::slicer::{DEFAULT_MAX_PAGES, Slicer};
use crate::spacer::{DEFAULT_MAX_REFLOW_PASSES, ReflowOptions, ReflowReport, reflow};
use crate::types::Color;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Inject spacers and let the host's print pipeline paginate.
    NativePrint,
    /// Capture one tall image and cut it into pages.
    RasterSlice,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::NativePrint => "native-print",
            Strategy::RasterSlice => "raster-slice",
        }
    }
}

/// Circuit breakers and scheduling knobs for one generation.
///
/// A reflow pass is a single spacer insert, and a pushed region lands on a
/// page top, so reflow spends at most one pass per page boundary. Once
/// `max_reflow_passes` is spent, later boundaries are left as measured: with
/// the defaults (50 passes, 100 pages) blocks past roughly page 51 can still
/// be cut. Set `max_reflow_passes` to at least `max_pages - 1` when every
/// sliced page must be protected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationLimits {
    pub max_reflow_passes: usize,
    pub max_pages: usize,
    /// Yield to the executor after this many composed pages.
    pub yield_every_pages: usize,
}

impl Default for PaginationLimits {
    fn default() -> Self {
        Self {
            max_reflow_passes: DEFAULT_MAX_REFLOW_PASSES,
            max_pages: DEFAULT_MAX_PAGES,
            yield_every_pages: 4,
        }
    }
}

impl PaginationLimits {
    pub fn validate(&self) -> Result<(), PageSplitError> {
        if self.max_pages == 0 {
            return Err(PageSplitError::InvalidConfiguration(
                "max_pages must be at least 1".to_string(),
            ));
        }
        if self.yield_every_pages == 0 {
            return Err(PageSplitError::InvalidConfiguration(
                "yield_every_pages must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Outcome of the measurement half of a generation.
#[derive(Debug, Clone, PartialEq)]
pub struct Prepared {
    /// Page height in the surface's pixel space.
    pub page_height: f32,
    pub reflow: ReflowReport,
    pub measure_ms: f64,
}

/// What the host needs to open its print dialog on the reflowed layout.
#[derive(Debug, Clone, PartialEq)]
pub struct PrintJob {
    pub geometry: PageGeometry,
    pub page_height: f32,
    pub content_height: f32,
    pub estimated_pages: usize,
    pub spacers: Vec<SpacerInfo>,
    pub warnings: Vec<Warning>,
}

pub enum Rendered {
    Pages(Slicer),
    NativePrint(PrintJob),
}

/// One way of turning a laid-out surface into pages.
pub trait Paginator {
    fn strategy(&self) -> Strategy;

    /// Measure and, where the strategy calls for it, reflow the surface.
    /// `limits` belong to whoever drives the generation.
    fn prepare(
        &mut self,
        surface: &mut dyn LayoutSurface,
        geometry: &PageGeometry,
        limits: &PaginationLimits,
        debug: Option<&DebugLogger>,
    ) -> Result<Prepared, PageSplitError>;

    fn render(
        &mut self,
        surface: &dyn LayoutSurface,
        geometry: &PageGeometry,
        limits: &PaginationLimits,
        prepared: &Prepared,
    ) -> Result<Rendered, PageSplitError>;
}

impl<P: Paginator + ?Sized> Paginator for Box<P> {
    fn strategy(&self) -> Strategy {
        (**self).strategy()
    }

    fn prepare(
        &mut self,
        surface: &mut dyn LayoutSurface,
        geometry: &PageGeometry,
        limits: &PaginationLimits,
        debug: Option<&DebugLogger>,
    ) -> Result<Prepared, PageSplitError> {
        (**self).prepare(surface, geometry, limits, debug)
    }

    fn render(
        &mut self,
        surface: &dyn LayoutSurface,
        geometry: &PageGeometry,
        limits: &PaginationLimits,
        prepared: &Prepared,
    ) -> Result<Rendered, PageSplitError> {
        (**self).render(surface, geometry, limits, prepared)
    }
}

fn reflow_surface(
    surface: &mut dyn LayoutSurface,
    geometry: &PageGeometry,
    policy: SplitPolicy,
    limits: &PaginationLimits,
    debug: Option<&DebugLogger>,
) -> Result<Prepared, PageSplitError> {
    let started = Instant::now();
    if !surface.is_committed() {
        surface.commit()?;
    }
    let page_height = geometry.effective_page_height(surface.width())?;
    let options = ReflowOptions::new(page_height)
        .with_policy(policy)
        .with_max_passes(limits.max_reflow_passes);
    let report = reflow(surface, &options, debug)?;
    Ok(Prepared {
        page_height,
        reflow: report,
        measure_ms: elapsed_ms(started),
    })
}

/// Spacer injection followed by the host's native print pipeline.
#[derive(Debug, Clone, Default)]
pub struct PrintPaginator {
    policy: SplitPolicy,
}

impl PrintPaginator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(mut self, policy: SplitPolicy) -> Self {
        self.policy = policy;
        self
    }
}

impl Paginator for PrintPaginator {
    fn strategy(&self) -> Strategy {
        Strategy::NativePrint
    }

    fn prepare(
        &mut self,
        surface: &mut dyn LayoutSurface,
        geometry: &PageGeometry,
        limits: &PaginationLimits,
        debug: Option<&DebugLogger>,
    ) -> Result<Prepared, PageSplitError> {
        reflow_surface(surface, geometry, self.policy, limits, debug)
    }

    fn render(
        &mut self,
        surface: &dyn LayoutSurface,
        geometry: &PageGeometry,
        _limits: &PaginationLimits,
        prepared: &Prepared,
    ) -> Result<Rendered, PageSplitError> {
        let content_height = surface.height();
        let estimated_pages = ((content_height / prepared.page_height).ceil() as usize).max(1);
        Ok(Rendered::NativePrint(PrintJob {
            geometry: *geometry,
            page_height: prepared.page_height,
            content_height,
            estimated_pages,
            spacers: prepared.reflow.spacers.clone(),
            warnings: prepared.reflow.warnings.clone(),
        }))
    }
}

/// Captures the (optionally reflowed) surface and slices it into pages.
#[derive(Debug, Clone)]
pub struct RasterPaginator<R: Rasterizer = DisplayListRasterizer> {
    rasterizer: R,
    inject_spacers: bool,
    background: Color,
    policy: SplitPolicy,
}

impl Default for RasterPaginator<DisplayListRasterizer> {
    fn default() -> Self {
        Self::new(DisplayListRasterizer::default())
    }
}

impl<R: Rasterizer> RasterPaginator<R> {
    pub fn new(rasterizer: R) -> Self {
        Self {
            rasterizer,
            inject_spacers: true,
            background: Color::WHITE,
            policy: SplitPolicy::default(),
        }
    }

    pub fn with_spacers(mut self, inject: bool) -> Self {
        self.inject_spacers = inject;
        self
    }

    pub fn with_background(mut self, background: Color) -> Self {
        self.background = background;
        self
    }

    pub fn with_policy(mut self, policy: SplitPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn rasterizer(&self) -> &R {
        &self.rasterizer
    }
}

impl<R: Rasterizer> Paginator for RasterPaginator<R> {
    fn strategy(&self) -> Strategy {
        Strategy::RasterSlice
    }

    fn prepare(
        &mut self,
        surface: &mut dyn LayoutSurface,
        geometry: &PageGeometry,
        limits: &PaginationLimits,
        debug: Option<&DebugLogger>,
    ) -> Result<Prepared, PageSplitError> {
        if self.inject_spacers {
            return reflow_surface(surface, geometry, self.policy, limits, debug);
        }
        let started = Instant::now();
        let removed = surface.remove_spacers();
        surface.commit()?;
        Ok(Prepared {
            page_height: geometry.effective_page_height(surface.width())?,
            reflow: ReflowReport {
                removed,
                converged: true,
                ..ReflowReport::default()
            },
            measure_ms: elapsed_ms(started),
        })
    }

    fn render(
        &mut self,
        surface: &dyn LayoutSurface,
        geometry: &PageGeometry,
        limits: &PaginationLimits,
        _prepared: &Prepared,
    ) -> Result<Rendered, PageSplitError> {
        let image = self.rasterizer.capture(surface, geometry.capture_scale())?;
        let slicer = Slicer::new(image, geometry, self.background, limits.max_pages)?;
        Ok(Rendered::Pages(slicer))
    }
}
