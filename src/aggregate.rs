//! Pure transforms from record collections to derived metrics.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};

use crate::models::{non_empty, Event};

pub fn count<R>(records: &[R]) -> usize {
    records.len()
}

/// Cardinality of the non-empty keys produced by `key`.
pub fn count_unique<'a, R, F>(records: &'a [R], key: F) -> usize
where
    F: Fn(&'a R) -> Option<&'a str>,
{
    records
        .iter()
        .filter_map(|record| non_empty(key(record)))
        .collect::<HashSet<_>>()
        .len()
}

pub fn count_where<R, P>(records: &[R], predicate: P) -> usize
where
    P: Fn(&R) -> bool,
{
    records.iter().filter(|record| predicate(record)).count()
}

/// Mode of a categorical key. Empty keys are ignored. On equal counts the
/// key encountered first in `records` wins.
pub fn most_frequent<'a, R, F>(records: &'a [R], key: F) -> Option<String>
where
    F: Fn(&'a R) -> Option<&'a str>,
{
    let mut order: Vec<&str> = Vec::new();
    let mut counts: HashMap<&str, usize> = HashMap::new();

    for record in records {
        if let Some(value) = non_empty(key(record)) {
            let entry = counts.entry(value).or_insert_with(|| {
                order.push(value);
                0
            });
            *entry += 1;
        }
    }

    let mut best: Option<(&str, usize)> = None;
    for value in order {
        let hits = counts[value];
        if best.map_or(true, |(_, top)| hits > top) {
            best = Some((value, hits));
        }
    }

    best.map(|(value, _)| value.to_string())
}

/// A percentage in `0.0..=100.0`, displayed with one decimal.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct Percentage(f64);

impl Percentage {
    pub fn value(self) -> f64 {
        self.0
    }

    /// Nearest whole percent, halves rounding up.
    pub fn rounded(self) -> f64 {
        self.0.round()
    }

    /// Whole-percent rendering used in the campaign table.
    pub fn whole(self) -> String {
        format!("{}%", self.rounded())
    }
}

impl fmt::Display for Percentage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}%", self.0)
    }
}

pub fn ratio(numerator: usize, denominator: usize) -> Percentage {
    if denominator == 0 {
        return Percentage(0.0);
    }
    Percentage(numerator as f64 / denominator as f64 * 100.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Tally {
    pub count: usize,
    pub opened: usize,
    pub clicked: usize,
    pub credential_submitted: usize,
    pub reported: usize,
}

impl Tally {
    pub fn add<R: Event>(&mut self, record: &R) {
        self.count += 1;
        self.opened += usize::from(record.opened());
        self.clicked += usize::from(record.clicked());
        self.credential_submitted += usize::from(record.credential_submitted());
        self.reported += usize::from(record.reported());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Day,
    Month,
}

impl Period {
    /// Start of the bucket containing `at`; ordering of keys is chronological.
    pub fn bucket(self, at: DateTime<Utc>) -> DateTime<Utc> {
        let date = at.date_naive();
        let start = match self {
            Period::Day => date.and_hms_opt(0, 0, 0),
            Period::Month => NaiveDate::from_ymd_opt(date.year(), date.month(), 1)
                .and_then(|first| first.and_hms_opt(0, 0, 0)),
        };
        start.map(|naive| naive.and_utc()).unwrap_or(at)
    }

    pub fn label(self, key: DateTime<Utc>) -> String {
        match self {
            Period::Day => key.format("%Y-%m-%d").to_string(),
            Period::Month => key.format("%b %Y").to_string(),
        }
    }
}

/// Per-period tallies with labels in chronological order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PeriodSeries {
    pub labels: Vec<String>,
    pub totals: Vec<Tally>,
    /// Records dropped because their timestamp was missing or malformed.
    pub excluded: usize,
}

impl PeriodSeries {
    pub fn column(&self, pick: impl Fn(&Tally) -> usize) -> Vec<f64> {
        self.totals.iter().map(|tally| pick(tally) as f64).collect()
    }
}

pub fn group_by_period<R, T>(records: &[R], timestamp: T, period: Period) -> PeriodSeries
where
    R: Event,
    T: Fn(&R) -> Option<DateTime<Utc>>,
{
    let mut buckets: BTreeMap<DateTime<Utc>, Tally> = BTreeMap::new();
    let mut excluded = 0;

    for record in records {
        match timestamp(record) {
            Some(at) => buckets.entry(period.bucket(at)).or_default().add(record),
            None => excluded += 1,
        }
    }

    let mut series = PeriodSeries {
        excluded,
        ..PeriodSeries::default()
    };
    for (key, tally) in buckets {
        series.labels.push(period.label(key));
        series.totals.push(tally);
    }
    series
}

/// Tallies per category, in first-encountered order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CategoryBreakdown {
    pub labels: Vec<String>,
    pub totals: Vec<Tally>,
}

impl CategoryBreakdown {
    pub fn column(&self, pick: impl Fn(&Tally) -> usize) -> Vec<f64> {
        self.totals.iter().map(|tally| pick(tally) as f64).collect()
    }
}

pub const UNKNOWN_CATEGORY: &str = "Unknown";

pub fn group_by_category<R, F>(records: &[R], key: F) -> CategoryBreakdown
where
    R: Event,
    F: Fn(&R) -> Option<String>,
{
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut breakdown = CategoryBreakdown::default();

    for record in records {
        let label = key(record)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| UNKNOWN_CATEGORY.to_string());
        let slot = *index.entry(label.clone()).or_insert_with(|| {
            breakdown.labels.push(label);
            breakdown.totals.push(Tally::default());
            breakdown.totals.len() - 1
        });
        breakdown.totals[slot].add(record);
    }

    breakdown
}

/// Matching records per UTC hour of day. Untimed records are skipped.
pub fn hourly_histogram<R, T, P>(records: &[R], timestamp: T, predicate: P) -> [usize; 24]
where
    T: Fn(&R) -> Option<DateTime<Utc>>,
    P: Fn(&R) -> bool,
{
    let mut hours = [0usize; 24];
    for record in records.iter().filter(|record| predicate(record)) {
        if let Some(at) = timestamp(record) {
            hours[at.hour() as usize] += 1;
        }
    }
    hours
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Funnel {
    pub sent: usize,
    pub opened: usize,
    pub clicked: usize,
    pub credential_submitted: usize,
    pub reported: usize,
}

impl Funnel {
    pub fn stages(&self) -> [(&'static str, usize); 5] {
        [
            ("Sent", self.sent),
            ("Opened", self.opened),
            ("Clicked", self.clicked),
            ("Creds Submitted", self.credential_submitted),
            ("Reported", self.reported),
        ]
    }
}

pub fn funnel<R: Event>(records: &[R]) -> Funnel {
    let mut tally = Tally::default();
    for record in records {
        tally.add(record);
    }
    Funnel {
        sent: tally.count,
        opened: tally.opened,
        clicked: tally.clicked,
        credential_submitted: tally.credential_submitted,
        reported: tally.reported,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Delivery, Visit};

    fn visit(ip: Option<&str>, browser: &str) -> Visit {
        Visit {
            ip_address: ip.map(str::to_string),
            user_agent: Some(browser.to_string()),
            ..Visit::default()
        }
    }

    fn sent(at: &str, clicked: bool) -> Delivery {
        Delivery {
            sent_at: Some(at.to_string()),
            opened: Some(true),
            clicked: Some(clicked),
            ..Delivery::default()
        }
    }

    #[test]
    fn count_matches_length() {
        let visits = vec![visit(Some("10.0.0.1"), "a"); 7];
        assert_eq!(count(&visits), 7);
        assert_eq!(count::<Visit>(&[]), 0);
    }

    #[test]
    fn unique_keys_skip_duplicates_and_missing() {
        let visits = vec![
            visit(Some("10.0.0.1"), "a"),
            visit(Some("10.0.0.2"), "a"),
            visit(Some("10.0.0.1"), "a"),
            visit(None, "a"),
            visit(Some(""), "a"),
            visit(Some("  "), "a"),
        ];
        assert_eq!(count_unique(&visits, |v| v.ip_address.as_deref()), 2);
    }

    #[test]
    fn count_where_applies_predicate() {
        let deliveries = vec![sent("2026-01-01", true), sent("2026-01-02", false)];
        assert_eq!(count_where(&deliveries, |d| d.clicked()), 1);
    }

    #[test]
    fn most_frequent_breaks_ties_by_first_seen() {
        let visits = vec![
            visit(None, "Firefox"),
            visit(None, "Chrome"),
            visit(None, "Chrome"),
            visit(None, "Firefox"),
            visit(None, ""),
        ];
        let top = most_frequent(&visits, |v| v.user_agent.as_deref());
        assert_eq!(top.as_deref(), Some("Firefox"));

        let none = most_frequent(&visits[4..], |v| v.user_agent.as_deref());
        assert_eq!(none, None);
    }

    #[test]
    fn ratio_handles_zero_denominator() {
        assert_eq!(ratio(0, 0).value(), 0.0);
        assert_eq!(ratio(5, 20).value(), 25.0);
        assert_eq!(ratio(1, 3).to_string(), "33.3%");
        assert_eq!(ratio(4, 10).whole(), "40%");
    }

    #[test]
    fn period_labels_are_chronological() {
        let deliveries = vec![
            sent("2026-03-10T09:00:00", true),
            sent("2025-12-31T23:00:00", false),
            sent("bogus", true),
            sent("2026-01-05T12:00:00", true),
            sent("2026-03-01T00:00:00", false),
        ];

        let monthly = group_by_period(&deliveries, |d| d.occurred_at(), Period::Month);
        assert_eq!(monthly.labels, vec!["Dec 2025", "Jan 2026", "Mar 2026"]);
        assert_eq!(monthly.column(|t| t.count), vec![1.0, 1.0, 2.0]);
        assert_eq!(monthly.column(|t| t.clicked), vec![0.0, 1.0, 1.0]);
        assert_eq!(monthly.excluded, 1);

        let daily = group_by_period(&deliveries, |d| d.occurred_at(), Period::Day);
        assert_eq!(
            daily.labels,
            vec!["2025-12-31", "2026-01-05", "2026-03-01", "2026-03-10"]
        );
    }

    #[test]
    fn categories_keep_first_seen_order_with_unknown_fallback() {
        let deliveries = vec![
            Delivery {
                department: Some("Sales".into()),
                clicked: Some(true),
                ..Delivery::default()
            },
            Delivery::default(),
            Delivery {
                department: Some("Finance".into()),
                ..Delivery::default()
            },
            Delivery {
                department: Some("Sales".into()),
                reported: Some(true),
                ..Delivery::default()
            },
        ];
        let breakdown = group_by_category(&deliveries, |d| d.department.clone());
        assert_eq!(breakdown.labels, vec!["Sales", "Unknown", "Finance"]);
        assert_eq!(breakdown.column(|t| t.count), vec![2.0, 1.0, 1.0]);
        assert_eq!(breakdown.totals[0].clicked, 1);
        assert_eq!(breakdown.totals[0].reported, 1);
    }

    #[test]
    fn histogram_buckets_clicks_by_hour() {
        let deliveries = vec![
            sent("2026-01-01T09:15:00", true),
            sent("2026-01-02T09:45:00", true),
            sent("2026-01-02T09:50:00", false),
            sent("2026-01-03T17:00:00", true),
            sent("", true),
        ];
        let hours = hourly_histogram(&deliveries, |d| d.occurred_at(), |d| d.clicked());
        assert_eq!(hours[9], 2);
        assert_eq!(hours[17], 1);
        assert_eq!(hours.iter().sum::<usize>(), 3);
    }

    #[test]
    fn funnel_counts_each_stage() {
        let deliveries = vec![sent("2026-01-01", true), sent("2026-01-01", false)];
        let stages = funnel(&deliveries).stages();
        assert_eq!(stages[0], ("Sent", 2));
        assert_eq!(stages[1], ("Opened", 2));
        assert_eq!(stages[2], ("Clicked", 1));
        assert_eq!(stages[4], ("Reported", 0));
    }
}
