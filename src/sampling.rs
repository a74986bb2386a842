// ============================================================================
// SAMPLING & AGGREGATION ENGINE
// ============================================================================
// Pure functions over time-ordered (timestamp, value) sequences:
// - centred window selection
// - average and rate over a slice of points
// - snapping requested intervals onto the standard ladders
// ============================================================================

use crate::constants::{DOWNSAMPLE_INTERVALS, WINDOW_INTERVALS};
use crate::error::{StatsError, StatsResult};
use crate::types::{StatPoint, StatValue};

// ----------------------------------------------------------------------------
// Windows
// ----------------------------------------------------------------------------

/// Inclusive index range of the points within `window / 2` of `series[index]`.
///
/// Expansion stops at the first neighbour outside the window on each side.
pub fn window_range(series: &[StatPoint], index: usize, window: i64) -> (usize, usize) {
    if window == 0 {
        return (index, index);
    }
    let timestamp = series[index].timestamp();
    let half = window / 2;
    let lower = timestamp.saturating_sub(half);
    let upper = timestamp.saturating_add(half);

    let mut start = index;
    while start > 0 && series[start - 1].timestamp() >= lower {
        start -= 1;
    }
    let mut end = index;
    while end + 1 < series.len() && series[end + 1].timestamp() <= upper {
        end += 1;
    }
    (start, end)
}

// ----------------------------------------------------------------------------
// Aggregates
// ----------------------------------------------------------------------------

/// Mean of the values in `points`.
///
/// All-integer input yields the floor of the integer mean; any float makes
/// the result a float. Text values are rejected.
pub fn average(points: &[StatPoint]) -> StatsResult<Option<StatValue>> {
    if points.is_empty() {
        return Ok(None);
    }
    let mut int_sum: i128 = 0;
    let mut float_sum = 0.0f64;
    let mut all_ints = true;

    for point in points {
        match point.value() {
            StatValue::Int(i) => {
                int_sum += i128::from(*i);
                float_sum += *i as f64;
            }
            StatValue::Float(f) => {
                all_ints = false;
                float_sum += f;
            }
            StatValue::Text(s) => return Err(StatsError::NonnumericValue(s.clone())),
        }
    }

    let count = points.len();
    if all_ints {
        let mean = int_sum.div_euclid(count as i128);
        Ok(Some(StatValue::Int(mean as i64)))
    } else {
        Ok(Some(StatValue::Float(float_sum / count as f64)))
    }
}

/// Slope between the first and last point of `points`, per millisecond.
///
/// Coincident timestamps give positive or negative infinity.
pub fn rate(points: &[StatPoint]) -> StatsResult<Option<f64>> {
    if points.len() < 2 {
        return Ok(None);
    }
    let first = &points[0];
    let last = &points[points.len() - 1];

    let numeric = |p: &StatPoint| {
        p.value()
            .as_f64()
            .ok_or_else(|| StatsError::NonnumericValue(p.value().to_string()))
    };
    let dv = numeric(last)? - numeric(first)?;
    let dt = last.timestamp() - first.timestamp();

    if dt == 0 {
        Ok(Some(if dv > 0.0 {
            f64::INFINITY
        } else {
            f64::NEG_INFINITY
        }))
    } else {
        Ok(Some(dv / dt as f64))
    }
}

/// Average over the window centred at `series[index]`.
pub fn average_over_window(
    series: &[StatPoint],
    index: usize,
    window: i64,
) -> StatsResult<Option<StatValue>> {
    let (start, end) = window_range(series, index, window);
    average(&series[start..=end])
}

/// Rate over the window centred at `series[index]`. A zero window pairs the
/// point with its predecessor (or successor for the first point).
pub fn rate_over_window(series: &[StatPoint], index: usize, window: i64) -> StatsResult<Option<f64>> {
    if series.len() < 2 {
        return Ok(None);
    }
    let (start, end) = if window == 0 {
        if index == 0 {
            (0, 1)
        } else {
            (index - 1, index)
        }
    } else {
        window_range(series, index, window)
    };
    rate(&series[start..=end])
}

// ----------------------------------------------------------------------------
// Interval Snapping
// ----------------------------------------------------------------------------

/// Snap a requested sample interval down onto the downsampling ladder.
///
/// Requests below the first rung pass through unchanged; larger requests
/// become a multiple of the largest rung not exceeding them.
pub fn closest_sample_interval(requested: i64) -> i64 {
    let rung = match DOWNSAMPLE_INTERVALS.iter().position(|&i| i > requested) {
        Some(0) => return requested,
        Some(i) => DOWNSAMPLE_INTERVALS[i - 1],
        None => DOWNSAMPLE_INTERVALS[DOWNSAMPLE_INTERVALS.len() - 1],
    };
    rung * requested.div_euclid(rung)
}

/// Snap a requested window onto the window ladder; below the first rung is 0.
pub fn closest_window_interval(requested: i64) -> i64 {
    match WINDOW_INTERVALS.iter().position(|&i| i > requested) {
        Some(0) => 0,
        Some(i) => WINDOW_INTERVALS[i - 1],
        None => WINDOW_INTERVALS[WINDOW_INTERVALS.len() - 1],
    }
}

/// Group index of a timestamp for downsampling.
#[inline]
pub fn downsample_index(timestamp: i64, sample_interval: i64) -> i64 {
    timestamp.div_euclid(sample_interval)
}
