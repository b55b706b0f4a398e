mod extractor;

pub use extractor::TriggeredWindowExtractor;

use chrono::{DateTime, Utc};
use psth_common::Timestamped;

/// The samples captured around one trigger, the trigger's class, and the
/// trigger's original (non-delayed) timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggeredWindow<T, C> {
    pub samples: Vec<Timestamped<T>>,
    pub class: C,
    pub anchor: DateTime<Utc>,
}
