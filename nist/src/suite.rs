use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use log::debug;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ValidatorError;

#[derive(Debug, Serialize)]
struct SuiteRequest<'a> {
    data: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    batch_id: Option<&'a str>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SuiteTestResult {
    pub name: String,
    pub passed: bool,
    pub p_value: Option<f64>,
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SuiteResponse {
    pub results: Vec<SuiteTestResult>,
    pub tests_run: u32,
    pub overall_pass_rate: f64,
    pub nist_compliant: bool,
}

/// Client for the remote SP 800-22 test suite service. One call runs the
/// full 15-test battery over the submitted bitstream.
pub struct SuiteClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl SuiteClient {
    pub fn new(base_url: String, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            timeout,
        }
    }

    pub async fn run_suite(
        &self,
        data: &[u8],
        batch_id: Option<&str>,
        bearer: &str,
    ) -> Result<SuiteResponse, ValidatorError> {
        debug!("Submitting {} bytes to the SP 800-22 suite", data.len());

        let body = SuiteRequest {
            data: BASE64.encode(data),
            batch_id,
        };

        let request = self
            .client
            .post(format!("{}/api/v1/tests/run", self.base_url))
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
            .json::<SuiteResponse>()
            .await
            .map_err(ValidatorError::Deserialize)
    }
}
