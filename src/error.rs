use thiserror::Error;

#[derive(Debug, Error)]
pub enum PageSplitError {
    /// Layout not committed, node missing, or geometry unusable for measuring.
    #[error("measurement failed: {0}")]
    Measurement(String),
    /// The rasterizer could not read the laid-out content.
    #[error("capture failed: {0}")]
    Capture(String),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("pdf error: {0}")]
    Pdf(String),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Measurement,
    Capture,
    Configuration,
    Output,
}

impl PageSplitError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PageSplitError::Measurement(_) => ErrorKind::Measurement,
            PageSplitError::Capture(_) => ErrorKind::Capture,
            PageSplitError::InvalidConfiguration(_) => ErrorKind::Configuration,
            PageSplitError::Pdf(_) | PageSplitError::Image(_) | PageSplitError::Io(_) => {
                ErrorKind::Output
            }
        }
    }
}

impl From<lopdf::Error> for PageSplitError {
    fn from(value: lopdf::Error) -> Self {
        PageSplitError::Pdf(value.to_string())
    }
}

/// A circuit breaker tripped. Pagination stops but keeps what it produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Warning {
    ReflowLimitReached { passes: usize },
    PageLimitReached { limit: usize },
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Warning::ReflowLimitReached { passes } => {
                write!(f, "reflow stopped after {passes} passes with regions still straddling")
            }
            Warning::PageLimitReached { limit } => {
                write!(f, "page limit of {limit} reached; remaining content dropped")
            }
        }
    }
}
