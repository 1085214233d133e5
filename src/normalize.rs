// Weekly series handling.
//
// The login export emits every week for every client, the purchase export
// drops all-zero weeks. Login weeks form the calendar; purchase series are
// zero-filled against it. A login gap means the calendar itself is
// untrustworthy, so it is an error rather than something to paper over.
use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use tracing::debug;

use crate::error::{ReportError, Result};
use crate::types::{CanonicalRow, WeeklyMetric};
use crate::util::{parse_amount, parse_date_safe};

/// Per-client week -> value, in insertion-independent chronological order.
pub type WeeklySeries = BTreeMap<NaiveDate, f64>;

/// Group canonical rows into weekly series keyed by client. Rows for the same
/// client and week are summed.
pub fn weekly_series(rows: &[CanonicalRow], file: &str) -> Result<BTreeMap<String, WeeklySeries>> {
    let mut out: BTreeMap<String, WeeklySeries> = BTreeMap::new();
    for row in rows {
        let invalid = |message: String| ReportError::InvalidValue {
            file: file.to_string(),
            line: row.line,
            message,
        };
        let week = parse_date_safe(row.date.as_deref())
            .ok_or_else(|| invalid(format!("`{}` is not a date", row.date.as_deref().unwrap_or(""))))?;
        let value = parse_amount(row.value.as_deref().unwrap_or("")).map_err(invalid)?;
        *out.entry(row.group_key.clone())
            .or_default()
            .entry(week)
            .or_insert(0.0) += value;
    }
    Ok(out)
}

/// Union of all login weeks, sorted.
pub fn login_calendar(login: &BTreeMap<String, WeeklySeries>) -> BTreeSet<NaiveDate> {
    login.values().flat_map(|s| s.keys().copied()).collect()
}

/// Check that a client's login series covers the whole calendar.
pub fn check_login_complete(
    client: &str,
    series: &WeeklySeries,
    calendar: &BTreeSet<NaiveDate>,
) -> Result<()> {
    let missing: Vec<String> = calendar
        .iter()
        .filter(|w| !series.contains_key(w))
        .map(|w| w.to_string())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ReportError::IncompleteCalendar {
            client: client.to_string(),
            message: format!("login data has no row for week(s) {}", missing.join(", ")),
        })
    }
}

/// Zero-fill a purchase series against the login calendar.
///
/// The result has exactly one entry per calendar week, chronologically.
pub fn zero_fill(
    client: &str,
    purchase: &WeeklySeries,
    calendar: &BTreeSet<NaiveDate>,
) -> Result<Vec<WeeklyMetric>> {
    if let Some(stray) = purchase.keys().find(|w| !calendar.contains(w)) {
        return Err(ReportError::IncompleteCalendar {
            client: client.to_string(),
            message: format!("purchase week {} is not in the login calendar", stray),
        });
    }
    let filled = calendar.len() - purchase.len();
    if filled > 0 {
        debug!(client, filled, "zero-filled purchase weeks");
    }
    Ok(calendar
        .iter()
        .map(|week| WeeklyMetric {
            week_start: *week,
            value: purchase.get(week).copied().unwrap_or(0.0),
        })
        .collect())
}

pub fn to_metrics(series: &WeeklySeries) -> Vec<WeeklyMetric> {
    series
        .iter()
        .map(|(week, value)| WeeklyMetric {
            week_start: *week,
            value: *value,
        })
        .collect()
}
