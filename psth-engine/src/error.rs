use thiserror::Error;

pub type HistogramResult<T> = Result<T, HistogramError>;

/// Failures raised by the histogram core.
///
/// The geometry and mismatch variants are contract violations and propagate
/// to the caller unrecovered; the out-of-range variants signal internal
/// inconsistencies which the aggregator answers with a full reset.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HistogramError {
    #[error("bin edges must contain at least two entries, got {0}")]
    TooFewBinEdges(usize),
    #[error("bin edges must be strictly increasing")]
    NonIncreasingBinEdges,
    #[error("bin count must be positive")]
    ZeroBinCount,
    #[error("per-class count length {actual} does not match class count {expected}")]
    ClassCountMismatch { expected: usize, actual: usize },
    #[error("class index {class} out of range for {class_count} classes")]
    ClassIndexOutOfRange { class: usize, class_count: usize },
    #[error("unit index {unit} out of range for {unit_count} units")]
    UnitIndexOutOfRange { unit: usize, unit_count: usize },
    #[error("invalid engine configuration: {reason}")]
    InvalidConfiguration { reason: &'static str },
}
