//! Online peri-event time histograms (PSTH) for spike event streams.
//!
//! Raw timestamped events and class-labeled triggers flow into a
//! [`TriggeredWindowExtractor`], which cuts a time window around each
//! trigger. A [`HistogramAggregator`] folds the windows into growing
//! per-unit, per-class histogram matrices and hands out immutable
//! normalized snapshots. [`PsthEngine`] wires the two together on a tokio
//! worker with optional Gaussian smoothing and runtime-tunable geometry.

mod engine;
mod error;
mod histogram;
mod kernel;
mod sorted_index;
mod window;

pub use engine::{EngineConfig, EngineHandle, EngineInputs, PsthEngine};
pub use error::{HistogramError, HistogramResult};
pub use histogram::{AggregatorSnapshot, HistogramAggregator, HistogramMatrix};
pub use kernel::{gaussian_kernel, halo_bins};
pub use sorted_index::SortedKeyIndex;
pub use window::{TriggeredWindow, TriggeredWindowExtractor};
