//! Randomness analysis over inter-event intervals: entropy measures,
//! histograms, and the composite data-quality report.

mod entropy;
mod quality;
mod service;

pub use entropy::*;
pub use quality::*;
pub use service::{AnalysisService, EntropySummary, ServiceError};

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic, PartialEq)]
pub enum AnalysisError {
    #[error("bucket size must be positive, got {0} ns")]
    InvalidBucketSize(i64),

    #[error("renyi alpha must be positive and finite, got {0}")]
    InvalidAlpha(f64),

    #[error("calculation needs at least {needed} intervals, have {have}")]
    InsufficientData { needed: usize, have: usize },
}
