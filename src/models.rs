use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Collections exposed by the event store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Campaigns,
    Deliveries,
    VisitorLogs,
    Logins,
}

impl Collection {
    pub fn table(self) -> &'static str {
        match self {
            Collection::Campaigns => "campaigns",
            Collection::Deliveries => "deliveries",
            Collection::VisitorLogs => "visitor_logs",
            Collection::Logins => "logins",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CampaignKind {
    Phishing,
    Smishing,
    #[serde(other)]
    #[value(skip)]
    Other,
}

impl fmt::Display for CampaignKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CampaignKind::Phishing => "phishing",
            CampaignKind::Smishing => "smishing",
            CampaignKind::Other => "other",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: Option<CampaignKind>,
    #[serde(default)]
    pub start_at: Option<String>,
    #[serde(default)]
    pub end_at: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub campaign_id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub sent_at: Option<String>,
    #[serde(default)]
    pub opened: Option<bool>,
    #[serde(default)]
    pub clicked: Option<bool>,
    #[serde(default)]
    pub credential_submitted: Option<bool>,
    #[serde(default)]
    pub reported: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Visit {
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub isp: Option<String>,
}

/// A captured credential login. The password column is never decoded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Login {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub login_time: Option<String>,
}

/// Common view over logged events used by the filter and aggregator.
///
/// Absent outcome flags read as `false`; an absent or unparseable
/// timestamp reads as `None` and drops the record from time-based work.
pub trait Event {
    fn occurred_at(&self) -> Option<DateTime<Utc>>;

    fn campaign_id(&self) -> Option<&str> {
        None
    }

    fn opened(&self) -> bool {
        false
    }

    fn clicked(&self) -> bool {
        false
    }

    fn credential_submitted(&self) -> bool {
        false
    }

    fn reported(&self) -> bool {
        false
    }
}

impl Event for Delivery {
    fn occurred_at(&self) -> Option<DateTime<Utc>> {
        self.sent_at.as_deref().and_then(parse_timestamp)
    }

    fn campaign_id(&self) -> Option<&str> {
        self.campaign_id.as_deref()
    }

    fn opened(&self) -> bool {
        self.opened.unwrap_or(false)
    }

    fn clicked(&self) -> bool {
        self.clicked.unwrap_or(false)
    }

    fn credential_submitted(&self) -> bool {
        self.credential_submitted.unwrap_or(false)
    }

    fn reported(&self) -> bool {
        self.reported.unwrap_or(false)
    }
}

impl Event for Visit {
    fn occurred_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp.as_deref().and_then(parse_timestamp)
    }
}

impl Event for Login {
    fn occurred_at(&self) -> Option<DateTime<Utc>> {
        self.login_time.as_deref().and_then(parse_timestamp)
    }
}

/// Parses the timestamp shapes written upstream: RFC 3339, naive ISO
/// date-times (treated as UTC) and bare dates (midnight UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Returns the value when it carries something other than whitespace.
pub fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserAgentClass {
    pub device: &'static str,
    pub browser: &'static str,
    pub os: &'static str,
}

pub fn classify_user_agent(user_agent: &str) -> UserAgentClass {
    let ua = user_agent.to_ascii_lowercase();
    let has = |needle: &str| ua.contains(needle);

    let device = if has("mobi") || has("android") {
        "Mobile"
    } else {
        "Desktop"
    };

    let browser = if has("edg") {
        "Edge"
    } else if has("chrome") {
        "Chrome"
    } else if has("firefox") {
        "Firefox"
    } else if has("safari") {
        "Safari"
    } else {
        "Other"
    };

    let os = if has("windows") {
        "Windows"
    } else if has("iphone") || has("ipad") {
        "iOS"
    } else if has("mac") {
        "MacOS"
    } else if has("android") {
        "Android"
    } else {
        "Other"
    };

    UserAgentClass {
        device,
        browser,
        os,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn parses_upstream_timestamp_shapes() {
        let rfc = parse_timestamp("2026-03-04T10:15:00+02:00").unwrap();
        assert_eq!(rfc.hour(), 8);

        let naive = parse_timestamp("2026-03-04T10:15:00.123456").unwrap();
        assert_eq!((naive.day(), naive.hour()), (4, 10));

        let date = parse_timestamp("2026-03-04").unwrap();
        assert_eq!(date.hour(), 0);
    }

    #[test]
    fn malformed_timestamps_are_none() {
        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_timestamp("2026-13-40").is_none());

        let delivery = Delivery {
            sent_at: Some("not a date".to_string()),
            ..Delivery::default()
        };
        assert!(delivery.occurred_at().is_none());
    }

    #[test]
    fn missing_flags_read_as_false() {
        let delivery = Delivery {
            clicked: Some(true),
            ..Delivery::default()
        };
        assert!(delivery.clicked());
        assert!(!delivery.opened());
        assert!(!delivery.reported());
    }

    #[test]
    fn decodes_document_with_unknown_campaign_type() {
        let campaign: Campaign = serde_json::from_value(serde_json::json!({
            "id": "c1",
            "name": "Quarterly",
            "type": "vishing",
            "start_at": null
        }))
        .unwrap();
        assert_eq!(campaign.kind, Some(CampaignKind::Other));
        assert!(campaign.end_at.is_none());
    }

    #[test]
    fn classifies_common_agents() {
        let edge = classify_user_agent(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 Chrome/120.0 Safari/537.36 Edg/120.0",
        );
        assert_eq!((edge.device, edge.browser, edge.os), ("Desktop", "Edge", "Windows"));

        let iphone = classify_user_agent(
            "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) Mobile/15E148 Safari/604.1",
        );
        assert_eq!((iphone.device, iphone.browser, iphone.os), ("Mobile", "Safari", "iOS"));

        let unknown = classify_user_agent("");
        assert_eq!((unknown.device, unknown.browser, unknown.os), ("Desktop", "Other", "Other"));
    }
}
