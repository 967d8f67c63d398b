//! Local metrics collection and rendering
//!
//! - [`collector`]: reads CPU, memory and disk figures from the operating system
//! - [`formatter`]: turns a metrics payload into the text posted to a channel
//! - [`alerts`]: compares collected figures against usage thresholds

pub mod alerts;
pub mod collector;
pub mod formatter;

pub use alerts::{ThresholdWatch, Thresholds, check_thresholds};
pub use collector::{MetricSections, MetricsSource, SysinfoCollector};
pub use formatter::{format, format_cpu, format_response, format_value};
