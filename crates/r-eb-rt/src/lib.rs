//! ---
//! eb_section: "02-pacing-scheduling"
//! eb_subsection: "module"
//! eb_type: "source"
//! eb_scope: "code"
//! eb_description: "Pacing and cycle allocation helpers for the engine."
//! eb_version: "v0.0.0-prealpha"
//! eb_owner: "tbd"
//! ---
//! Pacing and cycle allocation for R-EB activities.
//!
//! [`RateSpec`] parses the user facing `<rate>[,<burst>[,<mode>]]` grammar,
//! [`RateModel`] is the pure scheduling arithmetic, [`RateLimiter`] wraps it
//! with a hot-swappable configuration shared by all workers of an activity,
//! and [`CycleSource`] hands out cycle numbers.

pub mod cycles;
pub mod error;
pub mod limiter;
pub mod model;
pub mod spec;

pub use cycles::{CycleRange, CycleSource};
pub use error::{Cancelled, CycleRangeError, RateSpecError};
pub use limiter::RateLimiter;
pub use model::{Grant, RateModel, Timeline};
pub use spec::{PacingMode, RateLimiterConfig, RateSpec};
