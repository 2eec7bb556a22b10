//! Translation of incoming gateway events into canonical store records,
//! including per-event validation and whitening.

use chrono::{DateTime, Duration, Utc};
use entropy_db::models::NewEvent;
use thiserror::Error;

use crate::messages::EventMessage;

/// Hardware timestamps may run at most this far ahead of the server
/// clock before the event is dropped.
pub const MAX_FUTURE_SKEW: Duration = Duration::seconds(60);
/// ...and at most this far behind it.
pub const MAX_PAST_SKEW: Duration = Duration::hours(24);

#[derive(Debug, Error, PartialEq)]
pub enum MapError {
    #[error("event carries neither hw_timestamp_ns nor tdc_timestamp_ps")]
    MissingTimestamp,

    #[error("hw_timestamp_ns must be positive, got {0}")]
    NonPositiveTimestamp(i64),

    #[error("hw_timestamp_ns is {0} ns ahead of the server clock")]
    TimestampInFuture(i64),

    #[error("hw_timestamp_ns is {0} ns behind the server clock")]
    TimestampInPast(i64),

    #[error("sequence_number must be non-negative, got {0}")]
    NegativeSequence(i64),

    #[error("quality_score must be within [0, 1], got {0}")]
    QualityOutOfRange(f64),
}

/// XOR-fold of the two big-endian timestamp words. Length-preserving:
/// two 8-byte words in, 8 whitened bytes out.
pub fn whiten(tdc_timestamp_ps: i64, rpi_timestamp_us: i64) -> [u8; 8] {
    let ps = tdc_timestamp_ps.to_be_bytes();
    let us = rpi_timestamp_us.to_be_bytes();

    let mut out = [0u8; 8];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = ps[i] ^ us[i];
    }
    out
}

/// Maps one gateway event into a store row, enforcing the proto-level
/// validation rules. A returned error means this event is dropped; it
/// never fails the batch.
pub fn map_event<'a>(
    msg: &'a EventMessage,
    batch_id: Option<&'a str>,
    received_at: DateTime<Utc>,
    network_delay_ms: Option<f64>,
    now: DateTime<Utc>,
) -> Result<NewEvent<'a>, MapError> {
    // A gateway-supplied ns value wins; dividing down the TDC picosecond
    // word is the fallback for gateways that only ship raw counters.
    let hw_timestamp_ns = match (msg.hw_timestamp_ns, msg.tdc_timestamp_ps) {
        (Some(ns), _) => ns,
        (None, Some(ps)) => ps / 1000,
        (None, None) => return Err(MapError::MissingTimestamp),
    };

    if hw_timestamp_ns <= 0 {
        return Err(MapError::NonPositiveTimestamp(hw_timestamp_ns));
    }

    let now_ns = now
        .timestamp_nanos_opt()
        .expect("server clock outside the representable nanosecond range");
    let max_ahead = MAX_FUTURE_SKEW
        .num_nanoseconds()
        .expect("constant fits in i64");
    let max_behind = MAX_PAST_SKEW
        .num_nanoseconds()
        .expect("constant fits in i64");

    if hw_timestamp_ns > now_ns.saturating_add(max_ahead) {
        return Err(MapError::TimestampInFuture(hw_timestamp_ns - now_ns));
    }
    if hw_timestamp_ns < now_ns.saturating_sub(max_behind) {
        return Err(MapError::TimestampInPast(now_ns - hw_timestamp_ns));
    }

    if msg.sequence_number < 0 {
        return Err(MapError::NegativeSequence(msg.sequence_number));
    }

    if let Some(score) = msg.quality_score {
        if !(0.0..=1.0).contains(&score) {
            return Err(MapError::QualityOutOfRange(score));
        }
    }

    let whitened = match (msg.tdc_timestamp_ps, msg.rpi_timestamp_us) {
        (Some(ps), Some(us)) => Some(whiten(ps, us).to_vec()),
        _ => None,
    };

    Ok(NewEvent {
        batch_id,
        hw_timestamp_ns,
        sequence_number: msg.sequence_number,
        rpi_timestamp_us: msg.rpi_timestamp_us,
        tdc_timestamp_ps: msg.tdc_timestamp_ps,
        channel: msg.channel,
        whitened,
        server_received: received_at.naive_utc(),
        network_delay_ms,
        source_address: msg.source_address.as_deref(),
        quality_score: msg.quality_score,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(now: DateTime<Utc>) -> EventMessage {
        EventMessage {
            hw_timestamp_ns: Some(now.timestamp_nanos_opt().unwrap()),
            tdc_timestamp_ps: Some(123_456_789_012),
            rpi_timestamp_us: Some(98_765_432),
            sequence_number: 7,
            channel: Some(1),
            source_address: Some("10.0.0.8".to_string()),
            quality_score: Some(0.93),
        }
    }

    #[test]
    fn whitening_is_deterministic_and_length_preserving() {
        let a = whiten(0x0123_4567_89ab_cdef, 0x0fed_cba9_8765_4321);
        let b = whiten(0x0123_4567_89ab_cdef, 0x0fed_cba9_8765_4321);
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);

        // XOR-folding a word with itself cancels out
        assert_eq!(whiten(42, 42), [0u8; 8]);
    }

    #[test]
    fn gateway_ns_value_wins_over_derivation() {
        let now = Utc::now();
        let msg = message(now);
        let event = map_event(&msg, Some("b-1"), now, Some(12.5), now).unwrap();
        assert_eq!(event.hw_timestamp_ns, msg.hw_timestamp_ns.unwrap());
        assert_eq!(event.network_delay_ms, Some(12.5));
        assert!(event.whitened.is_some());
    }

    #[test]
    fn hw_timestamp_derives_from_tdc_when_absent() {
        // Anchor "now" close to the epoch so a raw picosecond counter
        // divides down into the acceptance window.
        let now = DateTime::from_timestamp_nanos(2_000_000_000);
        let mut msg = message(now);
        msg.hw_timestamp_ns = None;
        msg.tdc_timestamp_ps = Some(1_500_000_000_000);
        let event = map_event(&msg, None, now, None, now).unwrap();
        assert_eq!(event.hw_timestamp_ns, 1_500_000_000);
    }

    #[test]
    fn whitening_skipped_without_both_counters() {
        let now = Utc::now();
        let mut msg = message(now);
        msg.rpi_timestamp_us = None;
        let event = map_event(&msg, None, now, None, now).unwrap();
        assert!(event.whitened.is_none());
    }

    #[test]
    fn rejects_event_with_no_timestamp_source() {
        let now = Utc::now();
        let mut msg = message(now);
        msg.tdc_timestamp_ps = None;
        msg.hw_timestamp_ns = None;
        assert_eq!(
            map_event(&msg, None, now, None, now),
            Err(MapError::MissingTimestamp)
        );
    }

    #[test]
    fn rejects_timestamps_outside_the_skew_window() {
        let now = Utc::now();
        let now_ns = now.timestamp_nanos_opt().unwrap();

        let mut msg = message(now);
        msg.hw_timestamp_ns = Some(now_ns + 61 * 1_000_000_000);
        assert!(matches!(
            map_event(&msg, None, now, None, now),
            Err(MapError::TimestampInFuture(_))
        ));

        let mut msg = message(now);
        msg.hw_timestamp_ns = Some(now_ns - 25 * 3600 * 1_000_000_000);
        assert!(matches!(
            map_event(&msg, None, now, None, now),
            Err(MapError::TimestampInPast(_))
        ));

        // 30 seconds ahead is within tolerance
        let mut msg = message(now);
        msg.hw_timestamp_ns = Some(now_ns + 30 * 1_000_000_000);
        assert!(map_event(&msg, None, now, None, now).is_ok());
    }

    #[test]
    fn rejects_negative_sequence_and_bad_quality() {
        let now = Utc::now();

        let mut msg = message(now);
        msg.sequence_number = -1;
        assert_eq!(
            map_event(&msg, None, now, None, now),
            Err(MapError::NegativeSequence(-1))
        );

        let mut msg = message(now);
        msg.quality_score = Some(1.5);
        assert_eq!(
            map_event(&msg, None, now, None, now),
            Err(MapError::QualityOutOfRange(1.5))
        );

        // Boundary values are legitimate
        let mut msg = message(now);
        msg.quality_score = Some(0.0);
        assert!(map_event(&msg, None, now, None, now).is_ok());
        msg.quality_score = Some(1.0);
        assert!(map_event(&msg, None, now, None, now).is_ok());
    }
}
