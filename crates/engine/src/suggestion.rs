//! Per-field recommendation scoring.
//!
//! Signals are tried in a fixed order:
//!
//! 1. **recency**: both sides carry a last-modified time further apart than
//!    the tolerance. The newer side wins. Confidence climbs linearly from
//!    `recency_floor` at the tolerance to `recency_ceiling` at the horizon.
//! 2. **non_empty**: exactly one side is empty or absent. The populated side
//!    wins with `non_empty_confidence`.
//! 3. **ambiguous**: anything else. The target wins, capped at
//!    `ambiguous_confidence`; numeric pairs lose further confidence as their
//!    relative difference grows.

use std::fmt;

use regsync_core::{FieldSuggestion, FieldValue, SuggestionConfig, SuggestionSignal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Source,
    Target,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::Source => "source",
            Side::Target => "target",
        })
    }
}

/// Effective last-modified times (Unix ms) of both sides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SideTimes {
    pub source: Option<i64>,
    pub target: Option<i64>,
}

impl SideTimes {
    /// Newer side and the gap, when the gap exceeds `tolerance_ms`.
    pub fn newer(&self, tolerance_ms: i64) -> Option<(Side, i64)> {
        let (source, target) = (self.source?, self.target?);
        let gap = target.abs_diff(source);
        if gap <= tolerance_ms.max(0) as u64 {
            return None;
        }
        let gap = i64::try_from(gap).unwrap_or(i64::MAX);
        if target > source {
            Some((Side::Target, gap))
        } else {
            Some((Side::Source, gap))
        }
    }
}

pub fn suggest(
    field: &str,
    source: Option<&FieldValue>,
    target: Option<&FieldValue>,
    times: SideTimes,
    tuning: &SuggestionConfig,
) -> FieldSuggestion {
    let (recommended, confidence, signal, reason) =
        if let Some((side, gap)) = times.newer(tuning.recency_tolerance_ms) {
            let value = match side {
                Side::Source => source,
                Side::Target => target,
            };
            (
                value.cloned(),
                recency_confidence(gap, tuning),
                SuggestionSignal::Recency,
                format!("recency: {side} was modified {} later", format_gap(gap)),
            )
        } else if let Some((side, other_state)) = non_empty_side(source, target) {
            let value = match side {
                Side::Source => source,
                Side::Target => target,
            };
            let other = match side {
                Side::Source => Side::Target,
                Side::Target => Side::Source,
            };
            (
                value.cloned(),
                tuning.non_empty_confidence,
                SuggestionSignal::NonEmpty,
                format!("non_empty: {side} holds a value while {other} is {other_state}"),
            )
        } else {
            let (confidence, detail) = ambiguous_confidence(source, target, tuning);
            (
                target.cloned(),
                confidence,
                SuggestionSignal::Ambiguous,
                format!(
                    "ambiguous: both sides differ with no recency signal{detail}; kept target, needs manual review"
                ),
            )
        };

    FieldSuggestion {
        field: field.to_string(),
        source_value: source.cloned(),
        target_value: target.cloned(),
        recommended_value: recommended,
        confidence: confidence.clamp(0.0, 1.0),
        signal,
        reason,
    }
}

/// Maps a timestamp gap onto `[recency_floor, recency_ceiling]`.
pub fn recency_confidence(gap_ms: i64, tuning: &SuggestionConfig) -> f64 {
    let span = (tuning.recency_horizon_ms - tuning.recency_tolerance_ms).max(1) as f64;
    let over = (gap_ms - tuning.recency_tolerance_ms).max(0) as f64;
    let ratio = (over / span).min(1.0);
    tuning.recency_floor + (tuning.recency_ceiling - tuning.recency_floor) * ratio
}

fn is_blank(value: Option<&FieldValue>) -> bool {
    value.is_none_or(FieldValue::is_empty)
}

fn non_empty_side(
    source: Option<&FieldValue>,
    target: Option<&FieldValue>,
) -> Option<(Side, &'static str)> {
    let describe = |v: Option<&FieldValue>| if v.is_none() { "absent" } else { "empty" };
    match (is_blank(source), is_blank(target)) {
        (false, true) => Some((Side::Source, describe(target))),
        (true, false) => Some((Side::Target, describe(source))),
        _ => None,
    }
}

fn ambiguous_confidence(
    source: Option<&FieldValue>,
    target: Option<&FieldValue>,
    tuning: &SuggestionConfig,
) -> (f64, String) {
    let cap = tuning.ambiguous_confidence;
    match (source.and_then(FieldValue::as_number), target.and_then(FieldValue::as_number)) {
        (Some(a), Some(b)) => {
            let scale = a.abs().max(b.abs());
            let relative = if scale == 0.0 {
                0.0
            } else {
                ((a - b).abs() / scale).min(1.0)
            };
            (
                cap * (1.0 - 0.5 * relative),
                format!(" (numeric values {:.0}% apart)", relative * 100.0),
            )
        }
        _ => (cap, String::new()),
    }
}

fn format_gap(gap_ms: i64) -> String {
    const SECOND: i64 = 1_000;
    const MINUTE: i64 = 60 * SECOND;
    const HOUR: i64 = 60 * MINUTE;
    const DAY: i64 = 24 * HOUR;

    if gap_ms >= DAY {
        format!("{}d {}h", gap_ms / DAY, (gap_ms % DAY) / HOUR)
    } else if gap_ms >= HOUR {
        format!("{}h {}m", gap_ms / HOUR, (gap_ms % HOUR) / MINUTE)
    } else if gap_ms >= MINUTE {
        format!("{}m {}s", gap_ms / MINUTE, (gap_ms % MINUTE) / SECOND)
    } else if gap_ms >= SECOND {
        format!("{}s", gap_ms / SECOND)
    } else {
        format!("{gap_ms}ms")
    }
}
