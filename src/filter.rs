use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};

use crate::models::Event;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CampaignScope {
    #[default]
    All,
    Only(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeWindow {
    #[default]
    All,
    LastDays(u32),
}

impl TimeWindow {
    /// Earliest instant inside the window. A window reaching past the
    /// representable range has no lower bound.
    pub fn cutoff(self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            TimeWindow::All => None,
            TimeWindow::LastDays(days) => TimeDelta::try_days(i64::from(days))
                .and_then(|span| now.checked_sub_signed(span)),
        }
    }
}

impl FromStr for CampaignScope {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        if value.is_empty() {
            return Err("campaign id must not be empty".to_string());
        }
        if value.eq_ignore_ascii_case("all") {
            Ok(CampaignScope::All)
        } else {
            Ok(CampaignScope::Only(value.to_string()))
        }
    }
}

impl FromStr for TimeWindow {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("all") {
            return Ok(TimeWindow::All);
        }
        value
            .parse::<u32>()
            .map(TimeWindow::LastDays)
            .map_err(|_| format!("expected a day count or \"all\", got {value:?}"))
    }
}

impl fmt::Display for CampaignScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CampaignScope::All => f.write_str("all campaigns"),
            CampaignScope::Only(id) => write!(f, "campaign {id}"),
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeWindow::All => f.write_str("all time"),
            TimeWindow::LastDays(days) => write!(f, "last {days} days"),
        }
    }
}

/// The user-selected campaign and time window.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Scope {
    pub campaign: CampaignScope,
    pub window: TimeWindow,
}

impl Scope {
    pub fn new(campaign: CampaignScope, window: TimeWindow) -> Self {
        Self { campaign, window }
    }

    /// Copies the records inside the scope, preserving their order.
    ///
    /// `now` is taken per call so a day window moves with every refresh.
    /// Records without a parseable timestamp fall outside any day window.
    pub fn apply<R: Event + Clone>(&self, records: &[R], now: DateTime<Utc>) -> Vec<R> {
        let cutoff = self.window.cutoff(now);
        records
            .iter()
            .filter(|record| match &self.campaign {
                CampaignScope::All => true,
                CampaignScope::Only(id) => record.campaign_id() == Some(id.as_str()),
            })
            .filter(|record| match self.window {
                TimeWindow::All => true,
                TimeWindow::LastDays(_) => record
                    .occurred_at()
                    .is_some_and(|at| cutoff.map_or(true, |cutoff| at >= cutoff)),
            })
            .cloned()
            .collect()
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.campaign, self.window)
    }
}
