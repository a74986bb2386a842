//! Query parameter parsing for the stats and events routes.

use serde::Deserialize;

use crate::constants::{ONE_DAY_MS, ONE_HOUR_MS, ONE_MINUTE_MS, ONE_SECOND_MS, ONE_WEEK_MS};
use crate::error::{ApiError, ApiResult};
use crate::sampling::{closest_sample_interval, closest_window_interval};
use crate::types::{now_millis, timestamp_in_range, DataFormat};

/// Accepted duration units and their length in milliseconds.
const DURATION_UNITS: [(&[&str], i64); 6] = [
    (&["h", "hour", "hours"], ONE_HOUR_MS),
    (&["d", "day", "days"], ONE_DAY_MS),
    (&["w", "week", "weeks"], ONE_WEEK_MS),
    (&["m", "min", "mins", "minute", "minutes"], ONE_MINUTE_MS),
    (&["s", "sec", "secs", "second", "seconds"], ONE_SECOND_MS),
    (&["ms", "millisecond", "milliseconds"], 1),
];

/// Time range parameters shared by every data route.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TimeRangeParams {
    #[serde(rename = "start-time")]
    pub start_time: Option<String>,
    #[serde(rename = "end-time")]
    pub end_time: Option<String>,
    pub duration: Option<String>,
}

/// Parameters of `GET /stats/data/...`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatsParams {
    #[serde(flatten)]
    pub range: TimeRangeParams,
    #[serde(rename = "sample-interval")]
    pub sample_interval: Option<String>,
    #[serde(rename = "sample-window")]
    pub sample_window: Option<String>,
    #[serde(rename = "sample-count")]
    pub sample_count: Option<String>,
    #[serde(rename = "data-format")]
    pub data_format: Option<String>,
    pub limit: Option<String>,
}

/// Parameters of `GET /events/data/...`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventsParams {
    #[serde(flatten)]
    pub range: TimeRangeParams,
    #[serde(rename = "include-pk-tag")]
    pub include_pk_tag: Option<String>,
}

impl EventsParams {
    pub fn include_pk_tag(&self) -> bool {
        self.include_pk_tag
            .as_deref()
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Epoch milliseconds, or `now`/`current`.
pub fn parse_time_point(name: &'static str, value: &str, now: i64) -> ApiResult<i64> {
    let lowered = value.trim().to_ascii_lowercase();
    if lowered == "now" || lowered == "current" {
        return Ok(now);
    }
    lowered
        .parse()
        .map_err(|_| ApiError::invalid_param(name, value))
}

/// Leading digits plus an optional unit; bare digits are milliseconds.
pub fn parse_duration(name: &'static str, value: &str) -> ApiResult<i64> {
    let value = value.trim();
    let digits_end = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, units) = value.split_at(digits_end);
    let amount: i64 = digits
        .parse()
        .map_err(|_| ApiError::invalid_param(name, value))?;

    if units.is_empty() {
        return Ok(amount);
    }
    let units = units.to_ascii_lowercase();
    let scale = DURATION_UNITS
        .iter()
        .find(|(names, _)| names.contains(&units.as_str()))
        .map(|(_, scale)| *scale)
        .ok_or(ApiError::InvalidTimeDurationUnits(units))?;
    amount
        .checked_mul(scale)
        .ok_or_else(|| ApiError::invalid_param(name, value))
}

impl TimeRangeParams {
    /// Resolve two of start/end/duration into a range. `None` when none of
    /// them is given; a lone parameter is an error.
    pub fn resolve(&self, now: i64) -> ApiResult<Option<(i64, i64)>> {
        let start = present(&self.start_time)
            .map(|v| parse_time_point("start-time", v, now))
            .transpose()?;
        let end = present(&self.end_time)
            .map(|v| parse_time_point("end-time", v, now))
            .transpose()?;
        let duration = present(&self.duration)
            .map(|v| parse_duration("duration", v))
            .transpose()?;

        let range = match (start, end, duration) {
            (None, None, None) => return Ok(None),
            (Some(start), Some(end), _) => (start, Some(end)),
            (Some(start), None, Some(duration)) => (start, start.checked_add(duration)),
            (None, Some(end), Some(duration)) => match end.checked_sub(duration) {
                Some(start) => (start, Some(end)),
                None => return Err(ApiError::InvalidTimeRange),
            },
            _ => return Err(ApiError::InvalidTimeRange),
        };
        match range {
            (start, Some(end)) if timestamp_in_range(start) && timestamp_in_range(end) => {
                Ok(Some((start, end)))
            }
            _ => Err(ApiError::InvalidTimeRange),
        }
    }

    pub fn resolve_now(&self) -> ApiResult<Option<(i64, i64)>> {
        self.resolve(now_millis())
    }

    /// Like [`resolve`](Self::resolve) but a range is mandatory.
    pub fn require(&self) -> ApiResult<(i64, i64)> {
        self.resolve_now()?.ok_or(ApiError::InvalidTimeRange)
    }
}

impl StatsParams {
    /// Window after snapping; 0 when absent.
    pub fn window(&self) -> ApiResult<i64> {
        match present(&self.sample_window) {
            Some(v) => {
                let window = parse_duration("sample-window", v)?;
                Ok(if window == 0 { 0 } else { closest_window_interval(window) })
            }
            None => Ok(0),
        }
    }

    /// Sample interval for a range query, derived from the sample count
    /// when not given, then snapped.
    pub fn sample_interval(&self, start: i64, end: i64, default_count: i64) -> ApiResult<i64> {
        let interval = match present(&self.sample_interval) {
            Some(v) => parse_duration("sample-interval", v)?,
            None => {
                let count = match present(&self.sample_count) {
                    Some(v) => v
                        .trim()
                        .parse::<i64>()
                        .ok()
                        .filter(|c| *c > 0)
                        .ok_or_else(|| ApiError::invalid_param("sample-count", v))?,
                    None => default_count,
                };
                end.checked_sub(start).ok_or(ApiError::InvalidTimeRange)?.div_euclid(count)
            }
        };
        Ok(if interval == 0 { 0 } else { closest_sample_interval(interval) })
    }

    pub fn data_format(&self) -> ApiResult<DataFormat> {
        match present(&self.data_format) {
            Some(v) => v.parse().map_err(ApiError::Stats),
            None => Ok(DataFormat::Value),
        }
    }

    pub fn limit(&self) -> ApiResult<Option<usize>> {
        present(&self.limit)
            .map(|v| v.trim().parse().map_err(|_| ApiError::invalid_param("limit", v)))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::TEN_MINUTES_MS;
    use rstest::rstest;

    fn range(start: Option<&str>, end: Option<&str>, duration: Option<&str>) -> TimeRangeParams {
        TimeRangeParams {
            start_time: start.map(str::to_string),
            end_time: end.map(str::to_string),
            duration: duration.map(str::to_string),
        }
    }

    #[rstest]
    #[case("250", 250)]
    #[case("2h", 2 * ONE_HOUR_MS)]
    #[case("3Days", 3 * ONE_DAY_MS)]
    #[case("1w", ONE_WEEK_MS)]
    #[case("5mins", 5 * ONE_MINUTE_MS)]
    #[case("30s", 30 * ONE_SECOND_MS)]
    #[case("40ms", 40)]
    fn test_parse_duration(#[case] input: &str, #[case] expected: i64) {
        assert_eq!(parse_duration("duration", input).unwrap(), expected);
    }

    #[test]
    fn test_bad_durations() {
        assert!(matches!(
            parse_duration("duration", "5fortnights"),
            Err(ApiError::InvalidTimeDurationUnits(u)) if u == "fortnights"
        ));
        assert!(matches!(
            parse_duration("duration", "h"),
            Err(ApiError::InvalidQueryParameter { .. })
        ));
        assert!(matches!(
            parse_duration("duration", "9223372036854775807w"),
            Err(ApiError::InvalidQueryParameter { name: "duration", .. })
        ));
        assert!(matches!(
            parse_duration("duration", "99999999999999999999"),
            Err(ApiError::InvalidQueryParameter { .. })
        ));
    }

    #[test]
    fn test_extreme_time_ranges_are_rejected() {
        let now = 1_000_000;
        let max = i64::MAX.to_string();
        let min = i64::MIN.to_string();
        for params in [
            range(Some(max.as_str()), None, Some("1")),
            range(None, Some(min.as_str()), Some("1")),
            range(None, Some("0"), Some(max.as_str())),
            range(Some("0"), Some(max.as_str()), None),
            range(Some("0"), None, Some("100000000w")),
        ] {
            assert!(
                matches!(params.resolve(now), Err(ApiError::InvalidTimeRange)),
                "{:?}",
                params
            );
        }

        let params = StatsParams::default();
        assert!(matches!(
            params.sample_interval(i64::MIN, i64::MAX, 50),
            Err(ApiError::InvalidTimeRange)
        ));
    }

    #[test]
    fn test_time_range_resolution() {
        let now = 1_000_000;
        assert_eq!(range(None, None, None).resolve(now).unwrap(), None);
        assert_eq!(
            range(Some("100"), Some("now"), None).resolve(now).unwrap(),
            Some((100, now))
        );
        assert_eq!(
            range(Some("100"), None, Some("1s")).resolve(now).unwrap(),
            Some((100, 1100))
        );
        assert_eq!(
            range(None, Some("CURRENT"), Some("1m")).resolve(now).unwrap(),
            Some((now - ONE_MINUTE_MS, now))
        );
        // All three given: the duration is ignored.
        assert_eq!(
            range(Some("1"), Some("2"), Some("1d")).resolve(now).unwrap(),
            Some((1, 2))
        );
        assert!(matches!(
            range(Some("100"), None, None).resolve(now),
            Err(ApiError::InvalidTimeRange)
        ));
        assert!(matches!(
            range(Some("yesterday"), Some("now"), None).resolve(now),
            Err(ApiError::InvalidQueryParameter { name: "start-time", .. })
        ));
    }

    #[test]
    fn test_sampling_parameters() {
        let params = StatsParams::default();
        assert_eq!(params.sample_interval(0, 50 * ONE_HOUR_MS, 50).unwrap(), ONE_HOUR_MS);
        assert_eq!(params.sample_interval(0, 49, 50).unwrap(), 0);
        assert_eq!(params.window().unwrap(), 0);
        assert_eq!(params.data_format().unwrap(), DataFormat::Value);

        let params = StatsParams {
            sample_interval: Some("25m".into()),
            sample_window: Some("15m".into()),
            data_format: Some("rate".into()),
            limit: Some("10".into()),
            ..Default::default()
        };
        assert_eq!(params.sample_interval(0, 1, 50).unwrap(), 20 * ONE_MINUTE_MS);
        assert_eq!(params.window().unwrap(), TEN_MINUTES_MS);
        assert_eq!(params.data_format().unwrap(), DataFormat::Rate);
        assert_eq!(params.limit().unwrap(), Some(10));

        let bad = StatsParams {
            data_format: Some("median".into()),
            sample_count: Some("0".into()),
            ..Default::default()
        };
        assert_eq!(bad.data_format().unwrap_err().status_code(), 400);
        assert!(bad.sample_interval(0, 100, 50).is_err());
    }

    #[test]
    fn test_include_pk_tag_flag() {
        let mut params = EventsParams::default();
        assert!(!params.include_pk_tag());
        params.include_pk_tag = Some("TRUE".into());
        assert!(params.include_pk_tag());
        params.include_pk_tag = Some("yes".into());
        assert!(!params.include_pk_tag());
    }
}
