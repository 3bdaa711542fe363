use crate::layout::UnsplittableRegion;

/// Offsets within this distance of a page boundary count as lying on it.
/// Absorbs float drift from summed layout heights.
pub const BOUNDARY_EPSILON: f32 = 0.01;

/// Which straddling regions get pushed to the next page.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum SplitPolicy {
    /// Push anything no taller than one page; taller regions may split.
    #[default]
    AllowOversized,
    /// Push only regions whose height is at most `ratio` of a page, so a
    /// near-page-sized block splits instead of leaving a mostly blank page.
    NearPageThreshold { ratio: f32 },
}

impl SplitPolicy {
    pub fn max_span_ratio(self) -> f32 {
        match self {
            SplitPolicy::AllowOversized => 1.0,
            SplitPolicy::NearPageThreshold { ratio } => ratio,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSpan {
    pub start_page: usize,
    pub end_page: usize,
    pub span_ratio: f32,
}

impl PageSpan {
    pub fn of(region: &UnsplittableRegion, page_height: f32) -> Self {
        let start_page = page_index(region.top + BOUNDARY_EPSILON, page_height);
        let end_page = page_index(region.bottom - BOUNDARY_EPSILON, page_height).max(start_page);
        Self {
            start_page,
            end_page,
            span_ratio: (region.bottom - region.top).abs() / page_height,
        }
    }

    pub fn crosses_boundary(&self) -> bool {
        self.start_page != self.end_page
    }
}

/// A region that must be pushed, with the spacer height that realigns it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Straddle {
    pub index: usize,
    pub region: UnsplittableRegion,
    pub span: PageSpan,
    pub push: f32,
}

fn page_index(offset: f32, page_height: f32) -> usize {
    (offset.max(0.0) / page_height).floor() as usize
}

fn starts_on_boundary(top: f32, page_height: f32) -> bool {
    let offset = top.rem_euclid(page_height);
    offset < BOUNDARY_EPSILON || page_height - offset < BOUNDARY_EPSILON
}

/// Blank height that moves `top` to the start of the next page.
pub fn spacer_height(top: f32, page_height: f32) -> f32 {
    page_height - top.rem_euclid(page_height)
}

pub fn needs_push(region: &UnsplittableRegion, page_height: f32, policy: SplitPolicy) -> bool {
    if !(page_height.is_finite() && page_height > 0.0) {
        return false;
    }
    let span = PageSpan::of(region, page_height);
    span.crosses_boundary()
        && span.span_ratio <= policy.max_span_ratio()
        && !starts_on_boundary(region.top, page_height)
}

/// Indices of regions that straddle a page boundary and must be pushed.
pub fn locate_straddles(
    regions: &[UnsplittableRegion],
    page_height: f32,
    policy: SplitPolicy,
) -> Vec<usize> {
    regions
        .iter()
        .enumerate()
        .filter(|(_, region)| needs_push(region, page_height, policy))
        .map(|(index, _)| index)
        .collect()
}

/// First region in document order that must be pushed. Positions after it
/// are stale once its spacer goes in, so callers re-measure before asking again.
pub fn first_straddle(
    regions: &[UnsplittableRegion],
    page_height: f32,
    policy: SplitPolicy,
) -> Option<Straddle> {
    regions
        .iter()
        .enumerate()
        .find(|(_, region)| needs_push(region, page_height, policy))
        .map(|(index, region)| Straddle {
            index,
            region: *region,
            span: PageSpan::of(region, page_height),
            push: spacer_height(region.top, page_height),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::AvoidClass;

    fn region(top: f32, bottom: f32) -> UnsplittableRegion {
        UnsplittableRegion::new(0, AvoidClass::Heading, top, bottom)
    }

    #[test]
    fn heading_across_first_boundary_is_pushed_by_the_remainder() {
        let straddle = first_straddle(&[region(1100.0, 1140.0)], 1123.0, SplitPolicy::default())
            .expect("heading straddles");
        assert_eq!(straddle.span.start_page, 0);
        assert_eq!(straddle.span.end_page, 1);
        assert_eq!(straddle.push, 23.0);
    }

    #[test]
    fn region_inside_one_page_is_left_alone() {
        assert!(locate_straddles(&[region(10.0, 500.0)], 1123.0, SplitPolicy::default()).is_empty());
    }

    #[test]
    fn oversized_region_is_allowed_to_split() {
        let tall = region(500.0, 500.0 + 1500.0);
        assert!(!needs_push(&tall, 1123.0, SplitPolicy::default()));
    }

    #[test]
    fn region_ending_on_a_boundary_fits() {
        assert!(!needs_push(&region(1000.0, 1123.0), 1123.0, SplitPolicy::default()));
    }

    #[test]
    fn full_page_region_at_page_top_is_not_pushed() {
        assert!(!needs_push(&region(1123.0, 2246.0), 1123.0, SplitPolicy::default()));
    }

    #[test]
    fn near_page_threshold_lets_large_blocks_split() {
        let large = region(200.0, 200.0 + 0.95 * 1000.0);
        assert!(needs_push(&large, 1000.0, SplitPolicy::AllowOversized));
        assert!(!needs_push(
            &large,
            1000.0,
            SplitPolicy::NearPageThreshold { ratio: 0.9 }
        ));
    }

    #[test]
    fn region_already_at_page_top_is_never_pushed_again() {
        let policy = SplitPolicy::NearPageThreshold { ratio: 1.5 };
        assert!(needs_push(&region(900.0, 2100.0), 1000.0, policy));
        assert!(!needs_push(&region(1000.0, 2200.0), 1000.0, policy));
    }

    #[test]
    fn locate_reports_indices_in_document_order() {
        let regions = [
            region(0.0, 40.0),
            region(90.0, 120.0),
            region(150.0, 160.0),
            region(190.0, 230.0),
        ];
        assert_eq!(locate_straddles(&regions, 100.0, SplitPolicy::default()), vec![1, 3]);
        let first = first_straddle(&regions, 100.0, SplitPolicy::default()).unwrap();
        assert_eq!(first.index, 1);
        assert_eq!(first.push, 10.0);
    }

    #[test]
    fn float_drift_at_a_boundary_is_tolerated() {
        assert!(!needs_push(&region(999.999, 1040.0), 1000.0, SplitPolicy::default()));
    }

    #[test]
    fn spacer_height_on_later_pages() {
        assert_eq!(spacer_height(2300.0, 1000.0), 700.0);
        assert_eq!(spacer_height(0.0, 1000.0), 1000.0);
    }
}
