use crate::breaks::{SplitPolicy, first_straddle};
use crate::debug::DebugLogger;
use crate::error::{PageSplitError, Warning};
use crate::layout::{LayoutSurface, SpacerInfo};
use serde_json::json;

pub const DEFAULT_MAX_REFLOW_PASSES: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReflowOptions {
    /// Page height in the surface's own pixel space.
    pub page_height: f32,
    pub policy: SplitPolicy,
    pub max_passes: usize,
}

impl ReflowOptions {
    pub fn new(page_height: f32) -> Self {
        Self {
            page_height,
            policy: SplitPolicy::default(),
            max_passes: DEFAULT_MAX_REFLOW_PASSES,
        }
    }

    pub fn with_policy(mut self, policy: SplitPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_max_passes(mut self, max_passes: usize) -> Self {
        self.max_passes = max_passes;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReflowReport {
    pub spacers: Vec<SpacerInfo>,
    pub removed: usize,
    /// Measurement passes that ended in a spacer insert.
    pub passes: usize,
    pub converged: bool,
    pub warnings: Vec<Warning>,
}

impl ReflowReport {
    pub fn total_spacer_height(&self) -> f32 {
        self.spacers.iter().map(|s| s.height).sum()
    }
}

/// Purges earlier spacers, then pushes straddling regions one at a time,
/// re-measuring after every insert since each spacer shifts everything after it.
pub fn reflow(
    surface: &mut dyn LayoutSurface,
    options: &ReflowOptions,
    debug: Option<&DebugLogger>,
) -> Result<ReflowReport, PageSplitError> {
    let page_height = options.page_height;
    if !(page_height.is_finite() && page_height > 0.0) {
        return Err(PageSplitError::Measurement(format!(
            "page height must be positive, got {page_height}"
        )));
    }

    let removed = surface.remove_spacers();
    surface.commit()?;

    let mut report = ReflowReport {
        removed,
        ..ReflowReport::default()
    };
    loop {
        let regions = surface.avoid_regions()?;
        let Some(straddle) = first_straddle(&regions, page_height, options.policy) else {
            report.converged = true;
            break;
        };
        if report.passes >= options.max_passes {
            let warning = Warning::ReflowLimitReached {
                passes: report.passes,
            };
            log::warn!("{warning}");
            if let Some(logger) = debug {
                logger.event(
                    "reflow.limit",
                    json!({ "passes": report.passes, "node": straddle.region.node }),
                );
            }
            report.warnings.push(warning);
            break;
        }

        let spacer = surface.insert_spacer_before(straddle.region.node, straddle.push)?;
        surface.commit()?;
        report.passes += 1;
        log::debug!(
            "reflow pass {}: {} node {} at {:.2} pushed {:.2}px (pages {}..{})",
            report.passes,
            straddle.region.class.as_str(),
            straddle.region.node,
            straddle.region.top,
            straddle.push,
            straddle.span.start_page,
            straddle.span.end_page
        );
        if let Some(logger) = debug {
            logger.event(
                "reflow.spacer",
                json!({
                    "pass": report.passes,
                    "spacer": spacer,
                    "node": straddle.region.node,
                    "class": straddle.region.class.as_str(),
                    "top": straddle.region.top,
                    "height": straddle.push,
                }),
            );
            logger.increment("reflow.spacer", 1);
        }
    }

    report.spacers = surface.spacers();
    Ok(report)
}
