use crate::debug::DebugLogger;
use crate::document::PaginatedDocument;
use crate::error::{PageSplitError, Warning};
use crate::geometry::GeometryConfig;
use crate::layout::LayoutSurface;
use crate::metrics::{GenerationMetrics, elapsed_ms};
use crate::paginator::{PaginationLimits, Paginator, PrintJob, Rendered, Strategy};
use serde_json::json;
use std::cell::{Cell, Ref, RefCell};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Generating,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GenerationState {
    pub is_generating: bool,
    /// Start time of the last generation that has not failed since.
    pub generated_at: Option<SystemTime>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Artifact {
    Document(PaginatedDocument),
    /// The layout was reflowed in place; the host's print pipeline paginates.
    NativePrint(PrintJob),
}

impl Artifact {
    pub fn page_count(&self) -> usize {
        match self {
            Artifact::Document(doc) => doc.page_count(),
            Artifact::NativePrint(job) => job.estimated_pages,
        }
    }

    pub fn warnings(&self) -> &[Warning] {
        match self {
            Artifact::Document(doc) => doc.warnings(),
            Artifact::NativePrint(job) => &job.warnings,
        }
    }
}

/// The host side of native printing, e.g. a browser print dialog.
pub trait PrintHost {
    fn print(&mut self, job: &PrintJob) -> Result<(), PageSplitError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSummary {
    pub strategy: Strategy,
    pub pages: usize,
    pub warnings: Vec<Warning>,
    pub metrics: GenerationMetrics,
    pub generated_at: SystemTime,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GenerateOutcome {
    Generated(GenerationSummary),
    /// Another generation was already running; this call did nothing.
    InFlight,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FinalizeOutcome {
    Saved { path: PathBuf, pages: usize },
    Printed { estimated_pages: usize },
    InFlight,
}

/// Owns one layout surface and drives generation over it. Methods take
/// `&self` so a second trigger can observe the busy flag while a first
/// generation is suspended; at most one generation runs at a time.
pub struct Orchestrator<P: Paginator, S: LayoutSurface> {
    paginator: RefCell<P>,
    surface: RefCell<S>,
    geometry: GeometryConfig,
    limits: PaginationLimits,
    debug: Option<DebugLogger>,
    print_host: RefCell<Option<Box<dyn PrintHost>>>,
    state: Cell<GenerationState>,
    artifact: RefCell<Option<Artifact>>,
    passes: Cell<usize>,
}

impl<P: Paginator, S: LayoutSurface> Orchestrator<P, S> {
    pub fn new(paginator: P, surface: S, geometry: GeometryConfig) -> Self {
        Self {
            paginator: RefCell::new(paginator),
            surface: RefCell::new(surface),
            geometry,
            limits: PaginationLimits::default(),
            debug: None,
            print_host: RefCell::new(None),
            state: Cell::new(GenerationState::default()),
            artifact: RefCell::new(None),
            passes: Cell::new(0),
        }
    }

    pub fn with_limits(mut self, limits: PaginationLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Caps applied to every generation, whatever the paginator.
    pub fn limits(&self) -> PaginationLimits {
        self.limits
    }

    pub fn with_debug(mut self, debug: Option<DebugLogger>) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_print_host(self, host: Box<dyn PrintHost>) -> Self {
        self.set_print_host(host);
        self
    }

    pub fn set_print_host(&self, host: Box<dyn PrintHost>) {
        *self.print_host.borrow_mut() = Some(host);
    }

    pub fn strategy(&self) -> Strategy {
        self.paginator.borrow().strategy()
    }

    pub fn state(&self) -> GenerationState {
        self.state.get()
    }

    pub fn phase(&self) -> Phase {
        if self.state.get().is_generating {
            Phase::Generating
        } else if self.artifact.borrow().is_some() {
            Phase::Ready
        } else {
            Phase::Idle
        }
    }

    pub fn is_generating(&self) -> bool {
        self.state.get().is_generating
    }

    pub fn generated_at(&self) -> Option<SystemTime> {
        self.state.get().generated_at
    }

    /// Underlying generation passes started so far; dropped triggers do not count.
    pub fn generation_passes(&self) -> usize {
        self.passes.get()
    }

    pub fn has_artifact(&self) -> bool {
        !self.is_generating() && self.artifact.borrow().is_some()
    }

    /// Hands the artifact to the caller. Nothing is handed out mid-generation.
    pub fn take_artifact(&self) -> Option<Artifact> {
        if self.is_generating() {
            return None;
        }
        self.artifact.borrow_mut().take()
    }

    pub fn surface(&self) -> Ref<'_, S> {
        self.surface.borrow()
    }

    /// Swaps in a new root. Any artifact of the old one is dropped.
    pub fn replace_surface(&self, surface: S) -> Result<S, PageSplitError> {
        if self.is_generating() {
            return Err(PageSplitError::InvalidConfiguration(
                "cannot replace the layout while a generation is running".to_string(),
            ));
        }
        self.artifact.borrow_mut().take();
        Ok(self.surface.replace(surface))
    }

    pub fn into_surface(self) -> S {
        self.surface.into_inner()
    }

    /// Runs one generation pass unless one is already in flight.
    pub async fn generate(&self) -> Result<GenerateOutcome, PageSplitError> {
        if self.state.get().is_generating {
            log::debug!("generation already in flight; trigger dropped");
            return Ok(GenerateOutcome::InFlight);
        }
        let started_at = SystemTime::now();
        self.state.set(GenerationState {
            is_generating: true,
            generated_at: Some(started_at),
        });
        self.artifact.borrow_mut().take();
        self.passes.set(self.passes.get() + 1);
        let strategy = self.strategy();
        log::info!("generation {} started ({})", self.passes.get(), strategy.as_str());
        if let Some(logger) = &self.debug {
            logger.event(
                "generation.start",
                json!({
                    "pass": self.passes.get(),
                    "strategy": strategy.as_str(),
                    "started_at_ms": unix_ms(started_at),
                }),
            );
        }

        match self.run(strategy, started_at).await {
            Ok((artifact, summary)) => {
                *self.artifact.borrow_mut() = Some(artifact);
                self.state.set(GenerationState {
                    is_generating: false,
                    generated_at: Some(started_at),
                });
                log::info!(
                    "generation {} produced {} page(s) in {:.1}ms",
                    self.passes.get(),
                    summary.pages,
                    summary.metrics.total_ms()
                );
                if let Some(logger) = &self.debug {
                    logger.event(
                        "generation.done",
                        json!({
                            "pass": self.passes.get(),
                            "pages": summary.pages,
                            "warnings": summary.warnings.iter().map(ToString::to_string).collect::<Vec<_>>(),
                            "reflow_passes": summary.metrics.reflow_passes,
                            "measure_ms": summary.metrics.measure_ms,
                            "capture_ms": summary.metrics.capture_ms,
                            "slice_ms": summary.metrics.slice_ms,
                        }),
                    );
                    logger.emit_summary("generation");
                    logger.flush();
                }
                Ok(GenerateOutcome::Generated(summary))
            }
            Err(err) => {
                self.state.set(GenerationState::default());
                self.artifact.borrow_mut().take();
                log::error!("generation {} failed: {err}", self.passes.get());
                if let Some(logger) = &self.debug {
                    logger.event(
                        "generation.failed",
                        json!({ "pass": self.passes.get(), "error": err.to_string() }),
                    );
                    logger.flush();
                }
                Err(err)
            }
        }
    }

    /// Saves the document to `path`, or hands a print job to the print host.
    /// Generates first when nothing has been generated yet.
    pub async fn finalize(&self, path: impl AsRef<Path>) -> Result<FinalizeOutcome, PageSplitError> {
        if self.is_generating() {
            return Ok(FinalizeOutcome::InFlight);
        }
        if self.artifact.borrow().is_none() {
            if let GenerateOutcome::InFlight = self.generate().await? {
                return Ok(FinalizeOutcome::InFlight);
            }
        }

        let artifact = self.artifact.borrow();
        match artifact.as_ref() {
            Some(Artifact::Document(doc)) => {
                let path = path.as_ref().to_path_buf();
                doc.save_pdf(&path)?;
                log::info!("saved {} page(s) to {}", doc.page_count(), path.display());
                Ok(FinalizeOutcome::Saved {
                    path,
                    pages: doc.page_count(),
                })
            }
            Some(Artifact::NativePrint(job)) => {
                let mut host = self.print_host.borrow_mut();
                let host = host.as_mut().ok_or_else(|| {
                    PageSplitError::InvalidConfiguration(
                        "native print needs a print host".to_string(),
                    )
                })?;
                host.print(job)?;
                Ok(FinalizeOutcome::Printed {
                    estimated_pages: job.estimated_pages,
                })
            }
            None => Err(PageSplitError::Measurement(
                "generation finished without an artifact".to_string(),
            )),
        }
    }

    async fn run(
        &self,
        strategy: Strategy,
        started_at: SystemTime,
    ) -> Result<(Artifact, GenerationSummary), PageSplitError> {
        let geometry = self.geometry.resolve()?;
        self.limits.validate()?;
        let debug = self.debug.as_ref();

        let prepared = {
            let mut surface = self.surface.borrow_mut();
            let mut paginator = self.paginator.borrow_mut();
            paginator.prepare(&mut *surface, &geometry, &self.limits, debug)?
        };
        // Layout committed: let the host breathe before capture.
        yield_now().await;

        let capture_started = Instant::now();
        let rendered = {
            let surface = self.surface.borrow();
            let mut paginator = self.paginator.borrow_mut();
            paginator.render(&*surface, &geometry, &self.limits, &prepared)?
        };
        let capture_ms = elapsed_ms(capture_started);
        yield_now().await;

        let mut metrics = GenerationMetrics {
            reflow_passes: prepared.reflow.passes,
            spacers_inserted: prepared.reflow.spacers.len(),
            spacers_removed: prepared.reflow.removed,
            measure_ms: prepared.measure_ms,
            capture_ms,
            ..GenerationMetrics::default()
        };

        let artifact = match rendered {
            Rendered::NativePrint(job) => Artifact::NativePrint(job),
            Rendered::Pages(mut slicer) => {
                if let Some(logger) = &self.debug {
                    slicer = slicer.with_debug(Some(logger.clone()));
                }
                let mut composed = 0_usize;
                while slicer.next_page()?.is_some() {
                    composed += 1;
                    if composed % self.limits.yield_every_pages == 0 && !slicer.is_done() {
                        yield_now().await;
                    }
                }
                let mut doc = slicer.into_document();
                for warning in &prepared.reflow.warnings {
                    doc.push_warning(*warning);
                }
                let doc_metrics = doc.metrics_mut();
                metrics.pages = std::mem::take(&mut doc_metrics.pages);
                metrics.slice_ms = doc_metrics.slice_ms;
                *doc_metrics = metrics.clone();
                Artifact::Document(doc)
            }
        };

        let summary = GenerationSummary {
            strategy,
            pages: artifact.page_count(),
            warnings: artifact.warnings().to_vec(),
            metrics,
            generated_at: started_at,
        };
        Ok((artifact, summary))
    }
}

fn unix_ms(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Resolves on its second poll, waking itself so executors re-poll promptly.
struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debug::capture::SharedBuffer;
    use crate::layout::{LayoutNode, LayoutTree};
    use crate::paginator::{PrintPaginator, RasterPaginator};
    use futures::executor::block_on;
    use std::rc::Rc;

    fn report_tree(blocks: usize) -> LayoutTree {
        let mut tree = LayoutTree::new(180.0);
        let root = tree.root();
        tree.append(root, LayoutNode::heading(1, 30.0)).unwrap();
        for _ in 0..blocks {
            tree.append(root, LayoutNode::card(120.0)).unwrap();
        }
        tree
    }

    fn raster_orchestrator(tree: LayoutTree) -> Orchestrator<RasterPaginator, LayoutTree> {
        // 180px element on a 180mm content area: one layout px per mm.
        let geometry = GeometryConfig::a4_millimeters().with_capture_scale(1.0);
        Orchestrator::new(RasterPaginator::default(), tree, geometry)
    }

    #[derive(Clone, Default)]
    struct RecordingHost(Rc<RefCell<Vec<usize>>>);

    impl PrintHost for RecordingHost {
        fn print(&mut self, job: &PrintJob) -> Result<(), PageSplitError> {
            self.0.borrow_mut().push(job.estimated_pages);
            Ok(())
        }
    }

    #[test]
    fn generate_produces_a_ready_document() {
        let orchestrator = raster_orchestrator(report_tree(5));
        let outcome = block_on(orchestrator.generate()).unwrap();
        let GenerateOutcome::Generated(summary) = outcome else {
            panic!("expected a generation");
        };
        // Page height is 267; the second and fourth cards cross a boundary.
        assert_eq!(summary.pages, 3);
        assert_eq!(summary.metrics.spacers_inserted, 2);
        assert_eq!(orchestrator.phase(), Phase::Ready);
        assert!(orchestrator.generated_at().is_some());
        assert!(!orchestrator.is_generating());

        let Some(Artifact::Document(doc)) = orchestrator.take_artifact() else {
            panic!("expected a document");
        };
        assert_eq!(doc.page_count(), 3);
        assert_eq!(doc.metrics().reflow_passes, 2);
        assert_eq!(orchestrator.phase(), Phase::Idle);
    }

    #[test]
    fn back_to_back_triggers_run_one_pass() {
        let orchestrator = raster_orchestrator(report_tree(3));
        let (first, second) = block_on(async {
            futures::join!(orchestrator.generate(), orchestrator.generate())
        });
        assert!(matches!(first.unwrap(), GenerateOutcome::Generated(_)));
        assert_eq!(second.unwrap(), GenerateOutcome::InFlight);
        assert_eq!(orchestrator.generation_passes(), 1);
    }

    #[test]
    fn failure_clears_the_timestamp_and_artifact() {
        let orchestrator = raster_orchestrator(report_tree(2));
        block_on(orchestrator.generate()).unwrap();
        assert!(orchestrator.generated_at().is_some());

        let mut broken = report_tree(1);
        let root = broken.root();
        broken
            .append(root, LayoutNode::image("https://cdn.example.com/chart.png", 50.0))
            .unwrap();
        orchestrator.replace_surface(broken).unwrap();

        let err = block_on(orchestrator.generate()).unwrap_err();
        assert!(matches!(err, PageSplitError::Capture(_)));
        assert_eq!(orchestrator.state(), GenerationState::default());
        assert_eq!(orchestrator.phase(), Phase::Idle);
        assert!(orchestrator.take_artifact().is_none());

        // Not sticky: a fixed layout generates again.
        orchestrator.replace_surface(report_tree(1)).unwrap();
        assert!(block_on(orchestrator.generate()).is_ok());
        assert_eq!(orchestrator.generation_passes(), 3);
    }

    #[test]
    fn finalize_generates_when_nothing_is_ready() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("income.pdf");
        let orchestrator = raster_orchestrator(report_tree(3));

        let outcome = block_on(orchestrator.finalize(&path)).unwrap();
        assert_eq!(
            outcome,
            FinalizeOutcome::Saved {
                path: path.clone(),
                pages: 2
            }
        );
        assert_eq!(orchestrator.generation_passes(), 1);
        let loaded = lopdf::Document::load(&path).unwrap();
        assert_eq!(loaded.get_pages().len(), 2);

        // A second finalize reuses the artifact.
        block_on(orchestrator.finalize(&path)).unwrap();
        assert_eq!(orchestrator.generation_passes(), 1);
    }

    #[test]
    fn native_print_goes_through_the_host() {
        let host = RecordingHost::default();
        let orchestrator = Orchestrator::new(
            PrintPaginator::new(),
            report_tree(12),
            GeometryConfig::print_css(),
        )
        .with_print_host(Box::new(host.clone()));

        let outcome = block_on(orchestrator.finalize("unused.pdf")).unwrap();
        let FinalizeOutcome::Printed { estimated_pages } = outcome else {
            panic!("expected a print");
        };
        assert_eq!(host.0.borrow().as_slice(), &[estimated_pages]);
        assert!(!orchestrator.surface().spacers().is_empty());
    }

    #[test]
    fn native_print_without_host_is_a_configuration_error() {
        let orchestrator = Orchestrator::new(
            PrintPaginator::new(),
            report_tree(2),
            GeometryConfig::print_css(),
        );
        let err = block_on(orchestrator.finalize("unused.pdf")).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }

    #[test]
    fn page_limit_is_reported_on_the_summary() {
        let orchestrator = raster_orchestrator(report_tree(40)).with_limits(PaginationLimits {
            max_pages: 3,
            yield_every_pages: 1,
            ..PaginationLimits::default()
        });
        let GenerateOutcome::Generated(summary) = block_on(orchestrator.generate()).unwrap() else {
            panic!("expected a generation");
        };
        assert_eq!(summary.pages, 3);
        assert_eq!(summary.warnings, vec![Warning::PageLimitReached { limit: 3 }]);
    }

    #[test]
    fn caps_set_on_the_orchestrator_reach_the_paginator() {
        let orchestrator = raster_orchestrator(report_tree(40)).with_limits(PaginationLimits {
            max_pages: 3,
            max_reflow_passes: 1,
            ..PaginationLimits::default()
        });
        let GenerateOutcome::Generated(summary) = block_on(orchestrator.generate()).unwrap() else {
            panic!("expected a generation");
        };
        assert_eq!(summary.pages, 3);
        assert_eq!(summary.metrics.reflow_passes, 1);
        assert_eq!(summary.warnings.len(), 2);
        assert!(summary.warnings.contains(&Warning::PageLimitReached { limit: 3 }));
        assert!(summary.warnings.contains(&Warning::ReflowLimitReached { passes: 1 }));
    }

    #[test]
    fn lifecycle_events_reach_the_debug_log() {
        let buffer = SharedBuffer::default();
        let orchestrator = raster_orchestrator(report_tree(3))
            .with_debug(Some(DebugLogger::from_writer(buffer.clone())));
        block_on(orchestrator.generate()).unwrap();

        let kinds: Vec<String> = buffer
            .lines()
            .iter()
            .filter_map(|line| line["type"].as_str().map(str::to_string))
            .collect();
        assert_eq!(kinds.first().map(String::as_str), Some("generation.start"));
        assert!(kinds.iter().any(|k| k == "reflow.spacer"));
        assert!(kinds.iter().any(|k| k == "slice.page"));
        assert!(kinds.iter().any(|k| k == "generation.done"));
    }
}
