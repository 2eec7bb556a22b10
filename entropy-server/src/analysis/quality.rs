use entropy_db::models::DbEvent;
use serde::Serialize;

/// Penalty thresholds for the composite score. Drift is in µs/hour,
/// network delay in milliseconds.
const DRIFT_WARN_US_PER_HOUR: f64 = 10.0;
const DRIFT_SEVERE_US_PER_HOUR: f64 = 50.0;
const NETWORK_DELAY_WARN_MS: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QualityClass {
    Excellent,
    Good,
    Warning,
    Critical,
}

impl QualityClass {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.95 {
            QualityClass::Excellent
        } else if score >= 0.85 {
            QualityClass::Good
        } else if score >= 0.70 {
            QualityClass::Warning
        } else {
            QualityClass::Critical
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SequenceGap {
    pub after_sequence: i64,
    pub missing: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct QualityReport {
    pub total_events: usize,
    pub gaps: Vec<SequenceGap>,
    pub missing_count: i64,
    pub clock_drift_us_per_hour: Option<f64>,
    pub avg_network_delay_ms: Option<f64>,
    pub avg_decay_interval_ms: Option<f64>,
    pub decay_rate_realistic: bool,
    pub quality_score: f64,
    pub classification: QualityClass,
    pub recommendations: Vec<String>,
}

/// Sequence gaps over chronologically ordered events. Only strictly
/// increasing steps count; a sequence reset (new gateway session) is not
/// a gap.
fn sequence_gaps(events: &[DbEvent]) -> (Vec<SequenceGap>, i64) {
    let mut gaps = Vec::new();
    let mut missing = 0i64;
    for pair in events.windows(2) {
        let step = pair[1].sequence_number - pair[0].sequence_number;
        if step > 1 {
            gaps.push(SequenceGap {
                after_sequence: pair[0].sequence_number,
                missing: step - 1,
            });
            missing += step - 1;
        }
    }
    (gaps, missing)
}

/// Least-squares slope of the per-event clock offset
/// (`server_received − hw_timestamp`) against wall time, in µs per hour.
/// `None` when the window is too short to fit a line.
fn clock_drift_us_per_hour(events: &[DbEvent]) -> Option<f64> {
    if events.len() < 2 {
        return None;
    }

    let t0 = events[0].server_received;
    let points: Vec<(f64, f64)> = events
        .iter()
        .map(|event| {
            let hours = (event.server_received - t0).num_milliseconds() as f64 / 3_600_000.0;
            let offset_us = event.server_received.and_utc().timestamp_micros() as f64
                - event.hw_timestamp_ns as f64 / 1000.0;
            (hours, offset_us)
        })
        .collect();

    let n = points.len() as f64;
    let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n;

    let sxx: f64 = points.iter().map(|(x, _)| (x - mean_x).powi(2)).sum();
    if sxx == 0.0 {
        // All events landed at the same wall-clock instant
        return None;
    }
    let sxy: f64 = points
        .iter()
        .map(|(x, y)| (x - mean_x) * (y - mean_y))
        .sum();

    Some(sxy / sxx)
}

/// The multiplicative score composition. Pure so the penalty rules can
/// be exercised without building event rows.
pub fn composite_score(
    total_events: usize,
    missing_count: i64,
    clock_drift_us_per_hour: Option<f64>,
    decay_rate_realistic: bool,
    avg_network_delay_ms: Option<f64>,
) -> f64 {
    let mut score = 1.0;

    if total_events > 0 {
        score *= 1.0 - missing_count as f64 / total_events as f64;
    }

    if let Some(drift) = clock_drift_us_per_hour {
        if drift.abs() > DRIFT_WARN_US_PER_HOUR {
            score *= 0.95;
        }
        if drift.abs() > DRIFT_SEVERE_US_PER_HOUR {
            score *= 0.85;
        }
    }

    if !decay_rate_realistic {
        score *= 0.90;
    }

    if let Some(delay) = avg_network_delay_ms {
        if delay > NETWORK_DELAY_WARN_MS {
            score *= 0.95;
        }
    }

    score.clamp(0.0, 1.0)
}

/// Builds the quality report for one window of chronologically ordered
/// events. `expected_rate_hz` and `tolerance_factor` define the
/// plausibility band for the mean decay interval.
pub fn quality_report(
    events: &[DbEvent],
    expected_rate_hz: f64,
    tolerance_factor: f64,
) -> QualityReport {
    if events.is_empty() {
        return QualityReport {
            total_events: 0,
            gaps: Vec::new(),
            missing_count: 0,
            clock_drift_us_per_hour: None,
            avg_network_delay_ms: None,
            avg_decay_interval_ms: None,
            decay_rate_realistic: false,
            quality_score: 0.0,
            classification: QualityClass::Critical,
            recommendations: vec!["No events in the window; check gateway connectivity".to_string()],
        };
    }

    let (gaps, missing_count) = sequence_gaps(events);
    let drift = clock_drift_us_per_hour(events);

    let delays: Vec<f64> = events.iter().filter_map(|e| e.network_delay_ms).collect();
    let avg_network_delay_ms = if delays.is_empty() {
        None
    } else {
        Some(delays.iter().sum::<f64>() / delays.len() as f64)
    };

    let intervals: Vec<i64> = events
        .windows(2)
        .map(|pair| pair[1].hw_timestamp_ns - pair[0].hw_timestamp_ns)
        .filter(|&delta| delta > 0)
        .collect();
    let avg_decay_interval_ms = if intervals.is_empty() {
        None
    } else {
        Some(intervals.iter().sum::<i64>() as f64 / intervals.len() as f64 / 1_000_000.0)
    };

    let min_interval_ms = 1000.0 / (expected_rate_hz * tolerance_factor);
    let max_interval_ms = 1000.0 * tolerance_factor / expected_rate_hz;
    let decay_rate_realistic = avg_decay_interval_ms
        .map(|avg| avg >= min_interval_ms && avg <= max_interval_ms)
        .unwrap_or(false);

    let quality_score = composite_score(
        events.len(),
        missing_count,
        drift,
        decay_rate_realistic,
        avg_network_delay_ms,
    );

    let mut recommendations = Vec::new();
    if missing_count > 0 {
        recommendations.push(format!(
            "{missing_count} events missing from sequence numbering; check gateway buffering"
        ));
    }
    if let Some(drift) = drift {
        if drift.abs() > DRIFT_WARN_US_PER_HOUR {
            recommendations.push(format!(
                "clock drift of {drift:.1} us/hour; consider re-syncing the gateway clock"
            ));
        }
    }
    if !decay_rate_realistic {
        recommendations.push(format!(
            "mean decay interval outside the plausible band [{min_interval_ms:.1}, \
            {max_interval_ms:.1}] ms; check source geometry and detector health"
        ));
    }
    if avg_network_delay_ms.is_some_and(|d| d > NETWORK_DELAY_WARN_MS) {
        recommendations.push("network delay is high; events may arrive late".to_string());
    }

    QualityReport {
        total_events: events.len(),
        gaps,
        missing_count,
        clock_drift_us_per_hour: drift,
        avg_network_delay_ms,
        avg_decay_interval_ms,
        decay_rate_realistic,
        quality_score,
        classification: QualityClass::from_score(quality_score),
        recommendations,
    }
}
