use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

/// All operator knobs. Read once at startup and passed down immutably;
/// there is no dynamic reconfiguration path.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ServerConfig {
    pub db_pool_size: u32,

    /// Capacity of the in-process ingestion queue. Acks start carrying a
    /// backpressure hint once the queue is over 80% full.
    pub ingest_queue_capacity: usize,
    /// Token-bucket rate applied to each live subscriber session.
    pub subscriber_batches_per_second: u32,

    /// The SP 800-22 suite refuses to run on fewer bits than this.
    pub min_suite_bits: u64,
    /// Upper bound on the bytes submitted to the suite in one call;
    /// larger bitstreams are chunked.
    pub max_suite_bytes: usize,
    /// The SP 800-90B assessor input is truncated to this many bytes.
    pub max_assessment_bytes: usize,

    /// Expected decay event rate of a healthy detector, in Hz.
    pub expected_rate_hz: f64,
    /// Tolerance factor for the plausibility band around the expected
    /// rate: mean intervals within [1/(rate*f), f/rate] count as
    /// realistic.
    pub rate_tolerance_factor: f64,

    pub hourly_suite_cron: String,
    pub weekly_assessment_cron: String,

    pub feeder_period_seconds: u64,
    pub feeder_max_bytes: usize,
    pub feeder_device: String,

    pub max_active_jobs_per_actor: i64,
    pub max_parallel_jobs: usize,
    pub validator_timeout_seconds: u64,
    pub token_timeout_seconds: u64,
    pub breaker_threshold: u32,
    pub breaker_reset_seconds: u64,

    pub suite_base_url: String,
    pub assessment_base_url: String,
    pub token_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            db_pool_size: 20,
            ingest_queue_capacity: 1000,
            subscriber_batches_per_second: 20,
            min_suite_bits: 1_000_000,
            max_suite_bytes: 1_250_000,
            max_assessment_bytes: 1_000_000,
            expected_rate_hz: 25.0,
            rate_tolerance_factor: 4.0,
            // Second-resolution cron expressions: top of every hour, and
            // Sunday 03:00 for the weekly assessment.
            hourly_suite_cron: "0 0 * * * *".to_string(),
            weekly_assessment_cron: "0 0 3 * * Sun".to_string(),
            feeder_period_seconds: 5,
            feeder_max_bytes: 512,
            feeder_device: "/dev/random".to_string(),
            max_active_jobs_per_actor: 3,
            max_parallel_jobs: 2,
            validator_timeout_seconds: 600,
            token_timeout_seconds: 10,
            breaker_threshold: 5,
            breaker_reset_seconds: 60,
            suite_base_url: "http://sp800-22:8080".to_string(),
            assessment_base_url: "http://sp800-90b:8080".to_string(),
            token_url: "http://identity:8080/oauth/token".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file("ENTROPY.toml"))
            .merge(Env::prefixed("ENTROPY_"))
    }

    pub fn config() -> figment::Result<Self> {
        Self::figment().extract()
    }
}
