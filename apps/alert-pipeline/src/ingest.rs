mod merger;
mod types;

#[cfg(test)]
mod tests;

pub use merger::{SampleMerger, DEFAULT_WINDOW};
pub use types::{LatestReadings, Sample};
