use std::time::Instant;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageMetrics {
    pub page_number: usize,
    pub source_y: u32,
    pub source_height: u32,
    pub compose_ms: f64,
}

/// Counters and timings for one generation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationMetrics {
    pub reflow_passes: usize,
    pub spacers_inserted: usize,
    pub spacers_removed: usize,
    pub pages: Vec<PageMetrics>,
    pub measure_ms: f64,
    pub capture_ms: f64,
    pub slice_ms: f64,
}

impl GenerationMetrics {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn total_ms(&self) -> f64 {
        self.measure_ms + self.capture_ms + self.slice_ms
    }
}

pub(crate) fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}
