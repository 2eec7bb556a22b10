//! Clients for the two external statistical validators (an SP 800-22
//! randomness test suite and an SP 800-90B min-entropy assessor) and for
//! the identity collaborator that issues service tokens.
//!
//! Transport failures are surfaced per request stage so callers can tell
//! an unreachable validator from a malformed response.

mod assessment;
mod identity;
mod suite;

pub use assessment::{AssessResponse, AssessmentClient, EstimatorEntry};
pub use identity::{TokenClient, TokenError};
pub use suite::{SuiteClient, SuiteResponse, SuiteTestResult};

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ValidatorError {
    #[error("error building validator request")]
    RequestBuild(#[source] reqwest::Error),

    #[error("error executing validator request")]
    RequestExecute(#[source] reqwest::Error),

    #[error("validator reported a server error")]
    Status(#[source] reqwest::Error),

    #[error("error deserializing validator response")]
    Deserialize(#[source] reqwest::Error),
}
