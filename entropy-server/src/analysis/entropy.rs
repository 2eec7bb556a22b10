use std::collections::BTreeMap;

use crate::analysis::AnalysisError;

/// Embedding dimension m for the template-matching entropies.
pub const EMBEDDING_DIMENSION: usize = 2;
/// Match tolerance r as a fraction of the input's standard deviation.
pub const TOLERANCE_FACTOR: f64 = 0.2;
/// The quadratic measures never see more samples than this; longer
/// inputs are stride-downsampled first.
pub const MAX_TEMPLATE_SAMPLES: usize = 2000;
/// The histogram endpoint refuses to draw conclusions from less.
pub const HISTOGRAM_MIN_INTERVALS: usize = 100;

fn bucket_counts(intervals: &[i64], bucket_ns: i64) -> BTreeMap<i64, u64> {
    let mut counts = BTreeMap::new();
    for &interval in intervals {
        *counts.entry(interval / bucket_ns).or_insert(0u64) += 1;
    }
    counts
}

/// Shannon entropy in bits over the `⌊x/b⌋` bucketing of the intervals.
pub fn shannon_entropy(intervals: &[i64], bucket_ns: i64) -> Result<f64, AnalysisError> {
    if bucket_ns <= 0 {
        return Err(AnalysisError::InvalidBucketSize(bucket_ns));
    }
    if intervals.is_empty() {
        return Err(AnalysisError::InsufficientData { needed: 1, have: 0 });
    }

    let counts = bucket_counts(intervals, bucket_ns);
    let total = intervals.len() as f64;

    let entropy = counts
        .values()
        .map(|&count| {
            let p = count as f64 / total;
            -p * p.log2()
        })
        .sum();

    Ok(entropy)
}

/// Renyi entropy of order `alpha` over the same bucketing. The order-1
/// singularity is handled by falling back to Shannon in a small
/// neighborhood of 1, which is also its mathematical limit.
pub fn renyi_entropy(intervals: &[i64], bucket_ns: i64, alpha: f64) -> Result<f64, AnalysisError> {
    if !alpha.is_finite() || alpha <= 0.0 {
        return Err(AnalysisError::InvalidAlpha(alpha));
    }
    if (alpha - 1.0).abs() < 1e-9 {
        return shannon_entropy(intervals, bucket_ns);
    }
    if bucket_ns <= 0 {
        return Err(AnalysisError::InvalidBucketSize(bucket_ns));
    }
    if intervals.is_empty() {
        return Err(AnalysisError::InsufficientData { needed: 1, have: 0 });
    }

    let counts = bucket_counts(intervals, bucket_ns);
    let total = intervals.len() as f64;

    let sum: f64 = counts
        .values()
        .map(|&count| (count as f64 / total).powf(alpha))
        .sum();

    Ok(sum.log2() / (1.0 - alpha))
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct HistogramBucket {
    pub start: i64,
    pub end: i64,
    pub center: f64,
    pub count: u64,
    pub frequency: f64,
}

/// Histogram of the intervals with the given bucket size, sorted by
/// bucket start. Empty buckets between occupied ones are not emitted.
pub fn histogram(intervals: &[i64], bucket_ns: i64) -> Result<Vec<HistogramBucket>, AnalysisError> {
    if bucket_ns <= 0 {
        return Err(AnalysisError::InvalidBucketSize(bucket_ns));
    }
    if intervals.len() < HISTOGRAM_MIN_INTERVALS {
        return Err(AnalysisError::InsufficientData {
            needed: HISTOGRAM_MIN_INTERVALS,
            have: intervals.len(),
        });
    }

    let total = intervals.len() as f64;
    let buckets = bucket_counts(intervals, bucket_ns)
        .into_iter()
        .map(|(index, count)| {
            let start = index * bucket_ns;
            HistogramBucket {
                start,
                end: start + bucket_ns,
                center: start as f64 + bucket_ns as f64 / 2.0,
                count,
                frequency: count as f64 / total,
            }
        })
        .collect();

    Ok(buckets)
}

/// Uniform downsampling by stride selection to exactly `target` elements.
/// Inputs at or under the target are returned unchanged.
pub fn stride_downsample(intervals: &[i64], target: usize) -> Vec<i64> {
    if intervals.len() <= target {
        return intervals.to_vec();
    }
    (0..target)
        .map(|i| intervals[i * intervals.len() / target])
        .collect()
}

fn population_stddev(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}

fn templates_match(values: &[f64], i: usize, j: usize, m: usize, r: f64) -> bool {
    (0..m).all(|k| (values[i + k] - values[j + k]).abs() <= r)
}

/// Sample entropy with m = 2 and r = 0.2·stddev. Returns `+∞` when no
/// template pairs match at either length; callers map that sentinel to
/// "undefined".
pub fn sample_entropy(intervals: &[i64]) -> Result<f64, AnalysisError> {
    let m = EMBEDDING_DIMENSION;
    if intervals.len() < m + 2 {
        return Err(AnalysisError::InsufficientData {
            needed: m + 2,
            have: intervals.len(),
        });
    }

    let values: Vec<f64> = stride_downsample(intervals, MAX_TEMPLATE_SAMPLES)
        .into_iter()
        .map(|v| v as f64)
        .collect();
    let r = TOLERANCE_FACTOR * population_stddev(&values);

    // Both template lengths are counted over the same index range so the
    // ratio is well defined.
    let templates = values.len() - m;
    let mut matches_m = 0u64;
    let mut matches_m1 = 0u64;
    for i in 0..templates {
        for j in (i + 1)..templates {
            if templates_match(&values, i, j, m, r) {
                matches_m += 1;
                if templates_match(&values, i, j, m + 1, r) {
                    matches_m1 += 1;
                }
            }
        }
    }

    if matches_m == 0 || matches_m1 == 0 {
        return Ok(f64::INFINITY);
    }

    Ok(-((matches_m1 as f64 / matches_m as f64).ln()))
}

fn phi(values: &[f64], m: usize, r: f64) -> f64 {
    let templates = values.len() - m + 1;
    let mut sum = 0.0;
    for i in 0..templates {
        // Self-matches are included, so the count is never zero.
        let mut count = 0u64;
        for j in 0..templates {
            if templates_match(values, i, j, m, r) {
                count += 1;
            }
        }
        sum += (count as f64 / templates as f64).ln();
    }
    sum / templates as f64
}

/// Approximate entropy with m = 2 and r = 0.2·stddev, the standard
/// `φ(m) − φ(m+1)` definition.
pub fn approximate_entropy(intervals: &[i64]) -> Result<f64, AnalysisError> {
    let m = EMBEDDING_DIMENSION;
    if intervals.len() < m + 2 {
        return Err(AnalysisError::InsufficientData {
            needed: m + 2,
            have: intervals.len(),
        });
    }

    let values: Vec<f64> = stride_downsample(intervals, MAX_TEMPLATE_SAMPLES)
        .into_iter()
        .map(|v| v as f64)
        .collect();
    let r = TOLERANCE_FACTOR * population_stddev(&values);

    Ok(phi(&values, m, r) - phi(&values, m + 1, r))
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_eq::assert_float_eq;

    #[test]
    fn shannon_of_uniform_buckets_is_log2_of_bucket_count() {
        // One interval per 1000ns bucket: four equally likely buckets
        let intervals = [500, 1500, 2500, 3500];
        let entropy = shannon_entropy(&intervals, 1000).unwrap();
        assert_float_eq!(entropy, 2.0, abs <= 1e-12);
    }

    #[test]
    fn shannon_of_a_single_bucket_is_zero() {
        let intervals = [10, 20, 30, 40];
        let entropy = shannon_entropy(&intervals, 1000).unwrap();
        assert_float_eq!(entropy, 0.0, abs <= 1e-12);
    }

    #[test]
    fn shannon_is_bounded_by_log2_of_occupied_buckets() {
        let intervals = [100, 1100, 1200, 2100, 2150, 2199, 3500];
        let entropy = shannon_entropy(&intervals, 1000).unwrap();
        let occupied = 4.0f64; // buckets 0, 1, 2, 3
        assert!(entropy >= 0.0);
        assert!(entropy <= occupied.log2() + 1e-12);
    }

    #[test]
    fn shannon_rejects_bad_inputs() {
        assert_eq!(
            shannon_entropy(&[1, 2], 0),
            Err(AnalysisError::InvalidBucketSize(0))
        );
        assert_eq!(
            shannon_entropy(&[], 1000),
            Err(AnalysisError::InsufficientData { needed: 1, have: 0 })
        );
    }

    #[test]
    fn renyi_near_one_approaches_shannon() {
        let intervals = [100, 1100, 1200, 2100, 2150, 2199, 3500];
        let shannon = shannon_entropy(&intervals, 1000).unwrap();

        // Inside the fallback neighborhood
        let renyi_at_limit = renyi_entropy(&intervals, 1000, 1.0 + 1e-12).unwrap();
        assert_float_eq!(renyi_at_limit, shannon, abs <= 1e-12);

        // Just outside it, computed for real, still close
        let renyi_nearby = renyi_entropy(&intervals, 1000, 1.0 + 1e-6).unwrap();
        assert_float_eq!(renyi_nearby, shannon, abs <= 1e-4);
    }

    #[test]
    fn renyi_two_matches_collision_entropy_by_hand() {
        // Three intervals in bucket 0, one in bucket 1: p = [3/4, 1/4]
        let intervals = [10, 20, 30, 1500];
        let renyi = renyi_entropy(&intervals, 1000, 2.0).unwrap();
        let expected = -(0.75f64.powi(2) + 0.25f64.powi(2)).log2();
        assert_float_eq!(renyi, expected, abs <= 1e-12);

        // Order-2 entropy never exceeds Shannon
        let shannon = shannon_entropy(&intervals, 1000).unwrap();
        assert!(renyi <= shannon);
    }

    #[test]
    fn renyi_rejects_non_positive_alpha() {
        assert_eq!(
            renyi_entropy(&[1, 2], 1000, 0.0),
            Err(AnalysisError::InvalidAlpha(0.0))
        );
        assert_eq!(
            renyi_entropy(&[1, 2], 1000, -2.0),
            Err(AnalysisError::InvalidAlpha(-2.0))
        );
    }

    #[test]
    fn histogram_requires_a_hundred_intervals() {
        let intervals: Vec<i64> = (0..99).collect();
        assert_eq!(
            histogram(&intervals, 10),
            Err(AnalysisError::InsufficientData {
                needed: 100,
                have: 99
            })
        );
    }

    #[test]
    fn histogram_buckets_are_sorted_and_frequencies_sum_to_one() {
        let intervals: Vec<i64> = (0..200).map(|i| (i % 7) * 1000 + 50).collect();
        let buckets = histogram(&intervals, 1000).unwrap();

        assert!(buckets.windows(2).all(|w| w[0].start < w[1].start));
        let total: u64 = buckets.iter().map(|b| b.count).sum();
        assert_eq!(total, 200);
        let frequency_sum: f64 = buckets.iter().map(|b| b.frequency).sum();
        assert_float_eq!(frequency_sum, 1.0, abs <= 1e-12);

        for bucket in &buckets {
            assert_eq!(bucket.end, bucket.start + 1000);
            assert_float_eq!(bucket.center, bucket.start as f64 + 500.0, abs <= 1e-9);
        }
    }

    #[test]
    fn downsample_hits_the_target_length_exactly() {
        let intervals: Vec<i64> = (0..5000).collect();
        let sampled = stride_downsample(&intervals, 2000);
        assert_eq!(sampled.len(), 2000);
        // Stride selection preserves order and starts at the beginning
        assert_eq!(sampled[0], 0);
        assert!(sampled.windows(2).all(|w| w[0] < w[1]));

        // Short inputs come back unchanged
        let short = [5, 6, 7];
        assert_eq!(stride_downsample(&short, 2000), short);
    }

    #[test]
    fn sample_entropy_of_a_constant_series_is_zero() {
        let intervals = [400i64; 50];
        let entropy = sample_entropy(&intervals).unwrap();
        assert_float_eq!(entropy, 0.0, abs <= 1e-12);
    }

    #[test]
    fn sample_entropy_returns_infinity_when_nothing_matches() {
        // Pairwise template distances all exceed r = 0.2·stddev
        let intervals = [1, 2, 11, 101];
        assert_eq!(sample_entropy(&intervals), Ok(f64::INFINITY));
    }

    #[test]
    fn sample_entropy_requires_four_intervals() {
        assert_eq!(
            sample_entropy(&[1, 2, 3]),
            Err(AnalysisError::InsufficientData { needed: 4, have: 3 })
        );
    }

    #[test]
    fn approximate_entropy_of_a_constant_series_is_zero() {
        let intervals = [400i64; 50];
        let entropy = approximate_entropy(&intervals).unwrap();
        assert_float_eq!(entropy, 0.0, abs <= 1e-12);
    }

    #[test]
    fn irregular_series_scores_higher_than_periodic() {
        // Period-2 alternation vs. a scrambled version of the same values
        let periodic: Vec<i64> = (0..200).map(|i| if i % 2 == 0 { 100 } else { 900 }).collect();
        let irregular: Vec<i64> = (0..200)
            .map(|i| 100 + ((i * 7919) % 801) as i64)
            .collect();

        let periodic_apen = approximate_entropy(&periodic).unwrap();
        let irregular_apen = approximate_entropy(&irregular).unwrap();
        assert!(irregular_apen > periodic_apen);
    }
}
