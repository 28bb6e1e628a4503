//! Job configuration.

mod duration;
mod job;

pub use duration::parse_duration;
pub use job::{JobConfig, ReconnectSettings};
