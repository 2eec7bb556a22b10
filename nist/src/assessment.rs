use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use log::debug;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ValidatorError;

#[derive(Debug, Serialize)]
struct AssessRequest {
    data: String,
    bits_per_symbol: u32,
    iid: bool,
    non_iid: bool,
    verbosity: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EstimatorEntry {
    pub name: String,
    pub entropy_estimate: Option<f64>,
    pub passed: Option<bool>,
    pub details: Option<String>,
    pub description: Option<String>,
}

impl EstimatorEntry {
    /// The assessor reports `-1.0` for estimators that don't produce an
    /// entropy figure. Zero is a legitimate estimate and must survive.
    pub fn effective_estimate(&self) -> Option<f64> {
        self.entropy_estimate.filter(|&e| e != -1.0)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssessResponse {
    pub min_entropy: f64,
    pub passed: bool,
    pub assessment_summary: Option<String>,
    #[serde(default)]
    pub iid_results: Vec<EstimatorEntry>,
    #[serde(default)]
    pub non_iid_results: Vec<EstimatorEntry>,
}

/// Client for the remote SP 800-90B min-entropy assessor.
pub struct AssessmentClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl AssessmentClient {
    pub fn new(base_url: String, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            timeout,
        }
    }

    pub async fn assess(&self, data: &[u8], bearer: &str) -> Result<AssessResponse, ValidatorError> {
        debug!("Submitting {} bytes to the SP 800-90B assessor", data.len());

        let body = AssessRequest {
            data: BASE64.encode(data),
            bits_per_symbol: 8,
            iid: true,
            non_iid: true,
            verbosity: 1,
        };

        let request = self
            .client
            .post(format!("{}/api/v1/assess", self.base_url))
            .bearer_auth(bearer)
            .timeout(self.timeout)
            .json(&body)
            .build()
            .map_err(ValidatorError::RequestBuild)?;

        let response = self
            .client
            .execute(request)
            .await
            .map_err(ValidatorError::RequestExecute)?
            .error_for_status()
            .map_err(ValidatorError::Status)?;

        response
            .json::<AssessResponse>()
            .await
            .map_err(ValidatorError::Deserialize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(estimate: Option<f64>) -> EstimatorEntry {
        EstimatorEntry {
            name: "mcv".to_string(),
            entropy_estimate: estimate,
            passed: Some(true),
            details: None,
            description: None,
        }
    }

    #[test]
    fn sentinel_estimate_maps_to_none() {
        assert_eq!(entry(Some(-1.0)).effective_estimate(), None);
        assert_eq!(entry(None).effective_estimate(), None);
    }

    #[test]
    fn zero_is_a_legitimate_estimate() {
        assert_eq!(entry(Some(0.0)).effective_estimate(), Some(0.0));
        assert_eq!(entry(Some(7.2)).effective_estimate(), Some(7.2));
    }
}
