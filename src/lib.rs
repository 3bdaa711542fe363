mod breaks;
mod debug;
mod document;
mod error;
mod geometry;
mod html;
mod layout;
mod metrics;
mod orchestrator;
mod paginator;
mod pdf;
mod raster;
mod slicer;
mod spacer;
mod types;

pub use breaks::{
    BOUNDARY_EPSILON, PageSpan, SplitPolicy, Straddle, first_straddle, locate_straddles,
    needs_push, spacer_height,
};
pub use debug::DebugLogger;
pub use document::{PageImage, PaginatedDocument};
pub use error::{ErrorKind, PageSplitError, Warning};
pub use geometry::{CSS_DPI, GeometryConfig, MM_PER_INCH, MM_TO_PX, POINTS_PER_INCH, PageGeometry};
pub use html::{DEFAULT_AVOID_SELECTORS, HtmlLayoutOptions, layout_from_html, layout_from_html_with};
pub use layout::{
    AvoidClass, LayoutNode, LayoutSurface, LayoutTree, NodeId, NodeKind, PaintItem, SpacerInfo,
    UnsplittableRegion,
};
pub use metrics::{GenerationMetrics, PageMetrics};
pub use orchestrator::{
    Artifact, FinalizeOutcome, GenerateOutcome, GenerationState, GenerationSummary, Orchestrator,
    Phase, PrintHost,
};
pub use paginator::{
    PaginationLimits, Paginator, Prepared, PrintJob, PrintPaginator, RasterPaginator, Rendered,
    Strategy,
};
pub use pdf::{PdfOptions, PdfVersion, pdf_bytes_with_options};
pub use raster::{DisplayListRasterizer, RasterImage, Rasterizer};
pub use slicer::{DEFAULT_MAX_PAGES, PageSlice, SlicePlan, Slicer, plan_slices};
pub use spacer::{DEFAULT_MAX_REFLOW_PASSES, ReflowOptions, ReflowReport, reflow};
pub use types::{Color, Margins, Rect, Size, Unit};

use futures::executor::block_on;
use std::path::{Path, PathBuf};

/// Configured pagination entry point. Cheap to clone; every call builds a
/// fresh paginator so one `PageSplit` can serve many documents.
#[derive(Clone)]
pub struct PageSplit {
    geometry: GeometryConfig,
    strategy: Strategy,
    limits: PaginationLimits,
    policy: SplitPolicy,
    avoid_selectors: String,
    root_selector: Option<String>,
    background: Color,
    inject_spacers: bool,
    debug: Option<DebugLogger>,
}

impl PageSplit {
    pub fn builder() -> PageSplitBuilder {
        PageSplitBuilder::new()
    }

    pub fn geometry(&self) -> &GeometryConfig {
        &self.geometry
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn limits(&self) -> PaginationLimits {
        self.limits
    }

    pub fn policy(&self) -> SplitPolicy {
        self.policy
    }

    pub fn avoid_selectors(&self) -> &str {
        &self.avoid_selectors
    }

    pub fn debug_logger(&self) -> Option<&DebugLogger> {
        self.debug.as_ref()
    }

    /// A paginator for the configured strategy.
    pub fn paginator(&self) -> Box<dyn Paginator> {
        match self.strategy {
            Strategy::NativePrint => Box::new(self.print_paginator()),
            Strategy::RasterSlice => Box::new(
                RasterPaginator::default()
                    .with_spacers(self.inject_spacers)
                    .with_background(self.background)
                    .with_policy(self.policy),
            ),
        }
    }

    fn print_paginator(&self) -> PrintPaginator {
        PrintPaginator::new().with_policy(self.policy)
    }

    /// An orchestrator over `surface` for callers that drive generation
    /// themselves, e.g. from an event loop.
    pub fn orchestrator<S: LayoutSurface>(&self, surface: S) -> Orchestrator<Box<dyn Paginator>, S> {
        Orchestrator::new(self.paginator(), surface, self.geometry)
            .with_limits(self.limits)
            .with_debug(self.debug.clone())
    }

    pub fn layout_html(&self, html: &str, width: f32) -> Result<LayoutTree, PageSplitError> {
        let mut options = HtmlLayoutOptions::new(width).with_avoid_selectors(self.avoid_selectors.clone());
        if let Some(root) = &self.root_selector {
            options = options.with_root(root.clone());
        }
        layout_from_html_with(html, &options)
    }

    /// Runs one generation to completion on the current thread. The surface
    /// comes back reflowed, spacers included.
    pub fn paginate<S: LayoutSurface>(&self, surface: S) -> Result<(Artifact, S), PageSplitError> {
        let orchestrator = self.orchestrator(surface);
        let artifact = generate_blocking(&orchestrator)?;
        Ok((artifact, orchestrator.into_surface()))
    }

    pub fn render_html(&self, html: &str, width: f32) -> Result<Artifact, PageSplitError> {
        let layout = self.layout_html(html, width)?;
        let (artifact, _) = self.paginate(layout)?;
        Ok(artifact)
    }

    /// Lays out, paginates and saves `html` as a PDF at `path`.
    pub fn render_html_to_pdf(
        &self,
        html: &str,
        width: f32,
        path: impl AsRef<Path>,
    ) -> Result<GenerationSummary, PageSplitError> {
        let layout = self.layout_html(html, width)?;
        let orchestrator = self.orchestrator(layout);
        let summary = match block_on(orchestrator.generate())? {
            GenerateOutcome::Generated(summary) => summary,
            GenerateOutcome::InFlight => return Err(in_flight()),
        };
        match block_on(orchestrator.finalize(path))? {
            FinalizeOutcome::Saved { .. } | FinalizeOutcome::Printed { .. } => Ok(summary),
            FinalizeOutcome::InFlight => Err(in_flight()),
        }
    }

    /// Reflows `html` for native printing and returns the job a print host
    /// would receive, whatever strategy is configured.
    pub fn print_plan(&self, html: &str, width: f32) -> Result<PrintJob, PageSplitError> {
        let layout = self.layout_html(html, width)?;
        let orchestrator = Orchestrator::new(self.print_paginator(), layout, self.geometry)
            .with_limits(self.limits)
            .with_debug(self.debug.clone());
        match generate_blocking(&orchestrator)? {
            Artifact::NativePrint(job) => Ok(job),
            Artifact::Document(_) => Err(PageSplitError::Measurement(
                "native print produced a document".to_string(),
            )),
        }
    }
}

fn generate_blocking<P: Paginator, S: LayoutSurface>(
    orchestrator: &Orchestrator<P, S>,
) -> Result<Artifact, PageSplitError> {
    if let GenerateOutcome::InFlight = block_on(orchestrator.generate())? {
        return Err(in_flight());
    }
    orchestrator.take_artifact().ok_or_else(|| {
        PageSplitError::Measurement("generation finished without an artifact".to_string())
    })
}

fn in_flight() -> PageSplitError {
    PageSplitError::Measurement("generation already in flight".to_string())
}

pub struct PageSplitBuilder {
    geometry: GeometryConfig,
    strategy: Strategy,
    limits: PaginationLimits,
    policy: SplitPolicy,
    avoid_selectors: String,
    root_selector: Option<String>,
    background: Color,
    inject_spacers: bool,
    debug_log: Option<PathBuf>,
}

impl Default for PageSplitBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PageSplitBuilder {
    pub fn new() -> Self {
        Self {
            geometry: GeometryConfig::default(),
            strategy: Strategy::RasterSlice,
            limits: PaginationLimits::default(),
            policy: SplitPolicy::default(),
            avoid_selectors: DEFAULT_AVOID_SELECTORS.to_string(),
            root_selector: None,
            background: Color::WHITE,
            inject_spacers: true,
            debug_log: None,
        }
    }

    pub fn geometry(mut self, geometry: GeometryConfig) -> Self {
        self.geometry = geometry;
        self
    }

    pub fn page_size(mut self, size: Size) -> Self {
        self.geometry.page_size = size;
        self
    }

    pub fn margins(mut self, margins: Margins) -> Self {
        self.geometry.margins = margins;
        self
    }

    pub fn unit(mut self, unit: Unit) -> Self {
        self.geometry.unit = unit;
        self
    }

    pub fn capture_scale(mut self, scale: f32) -> Self {
        self.geometry.capture_scale = scale;
        self
    }

    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn limits(mut self, limits: PaginationLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn max_reflow_passes(mut self, passes: usize) -> Self {
        self.limits.max_reflow_passes = passes;
        self
    }

    pub fn max_pages(mut self, pages: usize) -> Self {
        self.limits.max_pages = pages;
        self
    }

    pub fn split_policy(mut self, policy: SplitPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replaces the default avoid-split selector list.
    pub fn avoid_selectors(mut self, selectors: impl Into<String>) -> Self {
        self.avoid_selectors = selectors.into();
        self
    }

    pub fn root_selector(mut self, selector: impl Into<String>) -> Self {
        self.root_selector = Some(selector.into());
        self
    }

    pub fn background(mut self, color: Color) -> Self {
        self.background = color;
        self
    }

    /// Raster slicing only: skip spacer injection and cut wherever the page
    /// boundary falls.
    pub fn inject_spacers(mut self, inject: bool) -> Self {
        self.inject_spacers = inject;
        self
    }

    // Enable JSON-lines debug logging of reflow and slicing events
    pub fn debug_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.debug_log = Some(path.into());
        self
    }

    pub fn build(self) -> Result<PageSplit, PageSplitError> {
        self.geometry.resolve()?;
        self.limits.validate()?;
        if let SplitPolicy::NearPageThreshold { ratio } = self.policy {
            if !(ratio.is_finite() && ratio > 0.0) {
                return Err(PageSplitError::InvalidConfiguration(format!(
                    "split threshold ratio must be > 0, got {ratio}"
                )));
            }
        }
        html::compile_selectors(&self.avoid_selectors)?;
        if let Some(root) = &self.root_selector {
            html::compile_selectors(root)?;
        }
        let debug = match self.debug_log {
            Some(path) => Some(DebugLogger::new(path)?),
            None => None,
        };

        Ok(PageSplit {
            geometry: self.geometry,
            strategy: self.strategy,
            limits: self.limits,
            policy: self.policy,
            avoid_selectors: self.avoid_selectors,
            root_selector: self.root_selector,
            background: self.background,
            inject_spacers: self.inject_spacers,
            debug,
        })
    }
}
