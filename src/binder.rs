use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use crate::aggregate::{self, ratio, Percentage};
use crate::models::{classify_user_agent, parse_timestamp, Campaign, CampaignKind, Delivery, Event, Login, Visit};

pub const DEFAULT_CLICK_RATE_THRESHOLD: f64 = 20.0;
pub const DEFAULT_REPORT_RATE_THRESHOLD: f64 = 5.0;

/// Display slot identifiers shared with the surrounding page.
pub mod slots {
    pub const SENT: &str = "stat-sent";
    pub const OPENED: &str = "stat-opened";
    pub const CLICKED: &str = "stat-clicked";
    pub const CREDENTIALS: &str = "stat-creds";
    pub const REPORTED: &str = "stat-reported";
    pub const OPEN_RATE: &str = "stat-open-rate";
    pub const CLICK_RATE: &str = "stat-click-rate";
    pub const REPORT_RATE: &str = "stat-report-rate";
    pub const VISITORS: &str = "stat-visitors";
    pub const UNIQUE_IPS: &str = "stat-ips";
    pub const TOP_BROWSER: &str = "stat-browser";
    pub const TOP_OS: &str = "stat-os";
    pub const LOGINS: &str = "stat-logins";
    pub const LOGIN_EMAILS: &str = "stat-login-emails";
    pub const CAMPAIGN_TABLE: &str = "campaigns-body";

    pub const DELIVERY: [&str; 8] = [
        SENT,
        OPENED,
        CLICKED,
        CREDENTIALS,
        REPORTED,
        OPEN_RATE,
        CLICK_RATE,
        REPORT_RATE,
    ];
    pub const VISITOR: [&str; 4] = [VISITORS, UNIQUE_IPS, TOP_BROWSER, TOP_OS];
    pub const LOGIN: [&str; 2] = [LOGINS, LOGIN_EMAILS];
}

/// Placeholder shown when a mode has no qualifying key.
pub const NO_VALUE: &str = "none";

/// A campaign is at risk when its click rate is strictly above
/// `click_rate_above` and its report rate strictly below `report_rate_below`.
/// Both rates are compared as the whole percentages the table shows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskThresholds {
    pub click_rate_above: f64,
    pub report_rate_below: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            click_rate_above: DEFAULT_CLICK_RATE_THRESHOLD,
            report_rate_below: DEFAULT_REPORT_RATE_THRESHOLD,
        }
    }
}

impl RiskThresholds {
    pub fn is_at_risk(&self, click_rate: Percentage, report_rate: Percentage) -> bool {
        click_rate.rounded() > self.click_rate_above && report_rate.rounded() < self.report_rate_below
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SlotValue {
    Count(usize),
    Percent(Percentage),
    Text(String),
    Error(String),
}

impl SlotValue {
    pub fn is_error(&self) -> bool {
        matches!(self, SlotValue::Error(_))
    }
}

impl fmt::Display for SlotValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotValue::Count(value) => write!(f, "{value}"),
            SlotValue::Percent(value) => write!(f, "{value}"),
            SlotValue::Text(value) => f.write_str(value),
            SlotValue::Error(_) => f.write_str("Error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CampaignRow {
    pub id: String,
    pub name: String,
    pub kind: Option<CampaignKind>,
    pub start: String,
    pub end: String,
    pub deliveries: usize,
    pub click_rate: Percentage,
    pub report_rate: Percentage,
    pub at_risk: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableState {
    Rows(Vec<CampaignRow>),
    Error(String),
}

impl Default for TableState {
    fn default() -> Self {
        TableState::Rows(Vec::new())
    }
}

/// Current contents of every named display slot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricBoard {
    slots: BTreeMap<String, SlotValue>,
    campaigns: TableState,
}

impl MetricBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, slot: &str, value: SlotValue) {
        self.slots.insert(slot.to_string(), value);
    }

    pub fn bind_error(&mut self, slots: &[&str], error: &dyn fmt::Display) {
        for slot in slots {
            self.bind(slot, SlotValue::Error(error.to_string()));
        }
    }

    pub fn get(&self, slot: &str) -> Option<&SlotValue> {
        self.slots.get(slot)
    }

    pub fn slots(&self) -> impl Iterator<Item = (&str, &SlotValue)> {
        self.slots.iter().map(|(slot, value)| (slot.as_str(), value))
    }

    pub fn campaign_table(&self) -> &TableState {
        &self.campaigns
    }

    pub fn bind_campaign_rows(&mut self, rows: Vec<CampaignRow>) {
        self.campaigns = TableState::Rows(rows);
    }

    pub fn bind_campaign_error(&mut self, error: &dyn fmt::Display) {
        self.campaigns = TableState::Error(error.to_string());
    }
}

pub fn bind_delivery_metrics(board: &mut MetricBoard, deliveries: &[Delivery]) {
    let total = aggregate::count(deliveries);
    let opened = aggregate::count_where(deliveries, |d| d.opened());
    let clicked = aggregate::count_where(deliveries, |d| d.clicked());
    let submitted = aggregate::count_where(deliveries, |d| d.credential_submitted());
    let reported = aggregate::count_where(deliveries, |d| d.reported());

    board.bind(slots::SENT, SlotValue::Count(total));
    board.bind(slots::OPENED, SlotValue::Count(opened));
    board.bind(slots::CLICKED, SlotValue::Count(clicked));
    board.bind(slots::CREDENTIALS, SlotValue::Count(submitted));
    board.bind(slots::REPORTED, SlotValue::Count(reported));
    board.bind(slots::OPEN_RATE, SlotValue::Percent(ratio(opened, total)));
    board.bind(slots::CLICK_RATE, SlotValue::Percent(ratio(clicked, total)));
    board.bind(slots::REPORT_RATE, SlotValue::Percent(ratio(reported, total)));
}

pub fn bind_visitor_metrics(board: &mut MetricBoard, visits: &[Visit]) {
    let classes: Vec<_> = visits
        .iter()
        .map(|v| classify_user_agent(v.user_agent.as_deref().unwrap_or_default()))
        .collect();
    let top_browser = aggregate::most_frequent(&classes, |class| Some(class.browser));
    let top_os = aggregate::most_frequent(&classes, |class| Some(class.os));

    board.bind(slots::VISITORS, SlotValue::Count(aggregate::count(visits)));
    board.bind(
        slots::UNIQUE_IPS,
        SlotValue::Count(aggregate::count_unique(visits, |v| v.ip_address.as_deref())),
    );
    board.bind(
        slots::TOP_BROWSER,
        SlotValue::Text(top_browser.unwrap_or_else(|| NO_VALUE.to_string())),
    );
    board.bind(
        slots::TOP_OS,
        SlotValue::Text(top_os.unwrap_or_else(|| NO_VALUE.to_string())),
    );
}

pub fn bind_login_metrics(board: &mut MetricBoard, logins: &[Login]) {
    board.bind(slots::LOGINS, SlotValue::Count(aggregate::count(logins)));
    board.bind(
        slots::LOGIN_EMAILS,
        SlotValue::Count(aggregate::count_unique(logins, |l| l.email.as_deref())),
    );
}

fn display_date(raw: Option<&str>) -> String {
    raw.and_then(parse_timestamp)
        .map(|at| at.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// One row per campaign, computed from that campaign's share of the
/// already-scoped deliveries, ordered by click rate descending. Campaigns
/// with equal click rates keep their incoming order.
pub fn campaign_rows(
    campaigns: &[Campaign],
    deliveries: &[Delivery],
    thresholds: &RiskThresholds,
) -> Vec<CampaignRow> {
    let mut rows: Vec<CampaignRow> = campaigns
        .iter()
        .map(|campaign| {
            let own: Vec<&Delivery> = deliveries
                .iter()
                .filter(|d| d.campaign_id() == Some(campaign.id.as_str()))
                .collect();
            let total = own.len();
            let clicked = own.iter().filter(|d| d.clicked()).count();
            let reported = own.iter().filter(|d| d.reported()).count();
            let click_rate = ratio(clicked, total);
            let report_rate = ratio(reported, total);

            CampaignRow {
                id: campaign.id.clone(),
                name: campaign.name.clone(),
                kind: campaign.kind,
                start: display_date(campaign.start_at.as_deref()),
                end: display_date(campaign.end_at.as_deref()),
                deliveries: total,
                click_rate,
                report_rate,
                at_risk: thresholds.is_at_risk(click_rate, report_rate),
            }
        })
        .collect();

    rows.sort_by(|a, b| {
        b.click_rate
            .partial_cmp(&a.click_rate)
            .unwrap_or(Ordering::Equal)
    });
    rows
}
