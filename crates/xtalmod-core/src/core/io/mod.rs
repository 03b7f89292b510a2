//! Structure-file import: the strategy driver and format implementations.

pub mod jana;
pub mod traits;
