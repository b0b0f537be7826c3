//! Lodstream - adaptive level-of-detail streaming of large datasets
//!
//! Datasets are split into pieces that can each be produced at any
//! resolution. A [`streaming::StreamingView`] renders them over several
//! passes, fetching the most visible pieces first, caching what was fetched
//! and refining the view once a sweep completes.

pub mod core;
pub mod math;
pub mod streaming;
