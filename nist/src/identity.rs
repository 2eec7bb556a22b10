use log::{debug, warn};
use miette::Diagnostic;
use serde::Deserialize;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum TokenError {
    #[error("token endpoint circuit breaker is open")]
    BreakerOpen,

    #[error("error building token request")]
    RequestBuild(#[source] reqwest::Error),

    #[error("error executing token request")]
    RequestExecute(#[source] reqwest::Error),

    #[error("token endpoint reported an error")]
    Status(#[source] reqwest::Error),

    #[error("error deserializing token response")]
    Deserialize(#[source] reqwest::Error),
}

#[derive(Debug)]
struct BreakerState {
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

/// Consecutive-failure circuit breaker. While open, calls are refused
/// without touching the network; once the reset period elapses a trial
/// call is let through, and a success closes the breaker again.
#[derive(Debug)]
struct Breaker {
    threshold: u32,
    reset: Duration,
    state: Mutex<BreakerState>,
}

impl Breaker {
    fn new(threshold: u32, reset: Duration) -> Self {
        Self {
            threshold,
            reset,
            state: Mutex::new(BreakerState {
                consecutive_failures: 0,
                open_until: None,
            }),
        }
    }

    fn allow(&self, now: Instant) -> bool {
        let state = self.state.lock().expect("breaker lock poisoned");
        match state.open_until {
            Some(open_until) => now >= open_until,
            None => true,
        }
    }

    fn record_success(&self) {
        let mut state = self.state.lock().expect("breaker lock poisoned");
        state.consecutive_failures = 0;
        state.open_until = None;
    }

    fn record_failure(&self, now: Instant) {
        let mut state = self.state.lock().expect("breaker lock poisoned");
        state.consecutive_failures += 1;
        if state.consecutive_failures >= self.threshold {
            state.open_until = Some(now + self.reset);
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Fetches service tokens from the identity collaborator. Inbound token
/// verification is someone else's job; this client only covers the
/// outbound direction, for calls the service makes on its own behalf.
pub struct TokenClient {
    client: reqwest::Client,
    token_url: String,
    timeout: Duration,
    breaker: Breaker,
}

impl TokenClient {
    pub fn new(
        token_url: String,
        timeout: Duration,
        breaker_threshold: u32,
        breaker_reset: Duration,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            token_url,
            timeout,
            breaker: Breaker::new(breaker_threshold, breaker_reset),
        }
    }

    pub async fn service_token(&self) -> Result<String, TokenError> {
        if !self.breaker.allow(Instant::now()) {
            debug!("Refusing token fetch, circuit breaker is open");
            return Err(TokenError::BreakerOpen);
        }

        match self.fetch().await {
            Ok(token) => {
                self.breaker.record_success();
                Ok(token)
            }
            Err(e) => {
                warn!("Token fetch failed: {e}");
                self.breaker.record_failure(Instant::now());
                Err(e)
            }
        }
    }

    async fn fetch(&self) -> Result<String, TokenError> {
        let request = self
            .client
            .post(&self.token_url)
            .timeout(self.timeout)
            .form(&[("grant_type", "client_credentials")])
            .build()
            .map_err(TokenError::RequestBuild)?;

        let response = self
            .client
            .execute(request)
            .await
            .map_err(TokenError::RequestExecute)?
            .error_for_status()
            .map_err(TokenError::Status)?;

        let token = response
            .json::<TokenResponse>()
            .await
            .map_err(TokenError::Deserialize)?;

        Ok(token.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breaker_opens_after_threshold_failures() {
        let breaker = Breaker::new(5, Duration::from_secs(60));
        let now = Instant::now();

        for _ in 0..4 {
            breaker.record_failure(now);
            assert!(breaker.allow(now));
        }
        breaker.record_failure(now);
        assert!(!breaker.allow(now));
    }

    #[test]
    fn breaker_allows_a_trial_after_reset_elapses() {
        let breaker = Breaker::new(5, Duration::from_secs(60));
        let now = Instant::now();

        for _ in 0..5 {
            breaker.record_failure(now);
        }
        assert!(!breaker.allow(now + Duration::from_secs(59)));
        assert!(breaker.allow(now + Duration::from_secs(60)));
    }

    #[test]
    fn success_resets_the_failure_count() {
        let breaker = Breaker::new(5, Duration::from_secs(60));
        let now = Instant::now();

        for _ in 0..4 {
            breaker.record_failure(now);
        }
        breaker.record_success();
        for _ in 0..4 {
            breaker.record_failure(now);
        }
        assert!(breaker.allow(now));
        breaker.record_failure(now);
        assert!(!breaker.allow(now));
    }

    #[test]
    fn failed_trial_reopens_the_breaker() {
        let breaker = Breaker::new(5, Duration::from_secs(60));
        let now = Instant::now();

        for _ in 0..5 {
            breaker.record_failure(now);
        }
        let after_reset = now + Duration::from_secs(61);
        assert!(breaker.allow(after_reset));
        breaker.record_failure(after_reset);
        assert!(!breaker.allow(after_reset + Duration::from_secs(59)));
    }
}
