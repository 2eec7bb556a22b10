//! The conceptual RPC message set exchanged with edge gateways and live
//! subscribers. Wire encoding is an adapter concern; the core sees these
//! as plain values moving over channels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One detected decay as reported by a gateway. Either `hw_timestamp_ns`
/// or `tdc_timestamp_ps` must be present; everything else is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    pub hw_timestamp_ns: Option<i64>,
    pub tdc_timestamp_ps: Option<i64>,
    pub rpi_timestamp_us: Option<i64>,
    pub sequence_number: i64,
    pub channel: Option<i32>,
    pub source_address: Option<String>,
    pub quality_score: Option<f64>,
}

/// Self-reported gateway health, forwarded opaquely in acks so operators
/// can correlate server-side and edge-side views.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeMetrics {
    pub events_per_second: Option<f64>,
    pub buffer_fill_percent: Option<f64>,
    pub health_test_failures: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBatch {
    pub batch_id: Option<String>,
    pub batch_sequence: u64,
    pub events: Vec<EventMessage>,
    pub edge_metrics: Option<EdgeMetrics>,
    pub sent_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchAck {
    pub batch_sequence: u64,
    pub success: bool,
    pub received_count: u32,
    pub persisted_count: u32,
    pub processing_time_ms: u64,
    pub backpressure: bool,
    pub backpressure_reason: Option<String>,
    pub error: Option<String>,
    pub edge_metrics: Option<EdgeMetrics>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hello {
    pub gateway_id: String,
    pub firmware_version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ping {
    pub nonce: u64,
    pub sent_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pong {
    pub nonce: u64,
}

/// Server-side limits echoed to a gateway after `Hello` so the edge can
/// size its batches and clocks to what the server will accept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigUpdate {
    pub max_batch_events: u32,
    pub max_clock_skew_ahead_secs: i64,
    pub max_clock_skew_behind_hours: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub gateway_id: String,
    pub uptime_seconds: Option<u64>,
    pub detector_voltage: Option<f64>,
    pub temperature_celsius: Option<f64>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ControlRequest {
    Hello(Hello),
    Ping(Ping),
    HealthReport(HealthReport),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ControlResponse {
    ConfigUpdate(ConfigUpdate),
    Pong(Pong),
    Ok,
}

#[cfg(test)]
mod tests {
    use super::*;

    // The wire adapters serialize these types; a batch must survive a
    // round trip without losing optional fields.
    #[test]
    fn batch_round_trips_through_json() {
        let batch = EventBatch {
            batch_id: Some("gw-07-000123".to_string()),
            batch_sequence: 123,
            events: vec![EventMessage {
                hw_timestamp_ns: Some(1_700_000_000_000_000_000),
                tdc_timestamp_ps: Some(987_654_321),
                rpi_timestamp_us: Some(123_456),
                sequence_number: 42,
                channel: Some(2),
                source_address: None,
                quality_score: Some(0.98),
            }],
            edge_metrics: Some(EdgeMetrics {
                events_per_second: Some(25.2),
                buffer_fill_percent: Some(0.4),
                health_test_failures: None,
            }),
            sent_at: Some(chrono::Utc::now()),
        };

        let json = serde_json::to_string(&batch).unwrap();
        let back: EventBatch = serde_json::from_str(&json).unwrap();

        assert_eq!(back.batch_sequence, batch.batch_sequence);
        assert_eq!(back.batch_id, batch.batch_id);
        assert_eq!(back.events.len(), 1);
        assert_eq!(back.events[0].sequence_number, 42);
        assert_eq!(back.events[0].quality_score, Some(0.98));
        assert_eq!(
            back.edge_metrics.as_ref().unwrap().events_per_second,
            Some(25.2)
        );
    }
}
