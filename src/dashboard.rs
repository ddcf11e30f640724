use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::aggregate::{self, Period};
use crate::binder::{self, slots, MetricBoard, RiskThresholds};
use crate::chart::{self, canvases, ChartBackend, ChartRegistry, ChartSpec};
use crate::error::StoreError;
use crate::filter::{CampaignScope, Scope};
use crate::models::{classify_user_agent, Campaign, Delivery, Event, Login, Visit};
use crate::store::{EventStore, Query};

/// What went wrong during one refresh. Every entry was already turned
/// into a degraded slot; the rest of the dashboard is current.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RefreshOutcome {
    pub fetch_failures: Vec<String>,
    pub render_failures: Vec<String>,
}

impl RefreshOutcome {
    pub fn is_clean(&self) -> bool {
        self.fetch_failures.is_empty() && self.render_failures.is_empty()
    }
}

pub struct Dashboard<S, B: ChartBackend> {
    store: S,
    charts: ChartRegistry<B>,
    board: MetricBoard,
    scope: Scope,
    thresholds: RiskThresholds,
}

impl<S: EventStore, B: ChartBackend> Dashboard<S, B> {
    pub fn new(store: S, backend: B, thresholds: RiskThresholds) -> Self {
        Self {
            store,
            charts: ChartRegistry::new(backend),
            board: MetricBoard::new(),
            scope: Scope::default(),
            thresholds,
        }
    }

    /// Changes the scope. Nothing is recomputed until the next refresh.
    pub fn set_scope(&mut self, scope: Scope) {
        self.scope = scope;
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn board(&self) -> &MetricBoard {
        &self.board
    }

    pub fn charts(&self) -> &ChartRegistry<B> {
        &self.charts
    }

    #[cfg(test)]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Re-fetches every collection and recomputes every slot for the
    /// current scope. Each fetch is awaited before its records are
    /// aggregated, and a failed fetch only degrades the slots it feeds.
    pub async fn refresh(&mut self, now: DateTime<Utc>) -> RefreshOutcome {
        info!(scope = %self.scope, "refreshing dashboard");
        let mut outcome = RefreshOutcome::default();

        let campaigns = self
            .store
            .query::<Campaign>(&Query::all().order_by("created_at", false))
            .await;
        let deliveries = self.store.query::<Delivery>(&self.delivery_query()).await;

        match deliveries {
            Ok(deliveries) => {
                let scoped = self.scope.apply(&deliveries, now);
                binder::bind_delivery_metrics(&mut self.board, &scoped);
                self.render_delivery_charts(&scoped, &mut outcome);

                match campaigns {
                    Ok(campaigns) => {
                        let rows = binder::campaign_rows(&campaigns, &scoped, &self.thresholds);
                        self.board.bind_campaign_rows(rows);
                    }
                    Err(err) => {
                        self.record_fetch_failure(&err, &mut outcome);
                        self.board.bind_campaign_error(&err);
                    }
                }
            }
            Err(err) => {
                self.record_fetch_failure(&err, &mut outcome);
                if let Err(campaign_err) = &campaigns {
                    self.record_fetch_failure(campaign_err, &mut outcome);
                }
                self.board.bind_error(&slots::DELIVERY, &err);
                self.board.bind_campaign_error(&err);
                for slot in canvases::DELIVERY {
                    self.charts.release(slot);
                }
            }
        }

        let window = self.window_scope();
        match self
            .store
            .query::<Visit>(&Query::all().order_by("timestamp", true))
            .await
        {
            Ok(visits) => {
                let scoped = window.apply(&visits, now);
                binder::bind_visitor_metrics(&mut self.board, &scoped);
                self.render_visitor_charts(&scoped, &mut outcome);
            }
            Err(err) => {
                self.record_fetch_failure(&err, &mut outcome);
                self.board.bind_error(&slots::VISITOR, &err);
                for slot in canvases::VISITOR {
                    self.charts.release(slot);
                }
            }
        }

        match self
            .store
            .query::<Login>(&Query::all().not_null("email"))
            .await
        {
            Ok(logins) => {
                let scoped = window.apply(&logins, now);
                binder::bind_login_metrics(&mut self.board, &scoped);
            }
            Err(err) => {
                self.record_fetch_failure(&err, &mut outcome);
                self.board.bind_error(&slots::LOGIN, &err);
            }
        }

        let degraded = self.board.slots().filter(|(_, value)| value.is_error()).count();
        info!(degraded, charts = self.charts.live_count(), "dashboard refreshed");
        outcome
    }

    fn delivery_query(&self) -> Query {
        match &self.scope.campaign {
            CampaignScope::All => Query::all(),
            CampaignScope::Only(id) => Query::all().eq("campaign_id", id.clone()),
        }
    }

    /// Visits and logins carry no campaign, so only the time window applies.
    fn window_scope(&self) -> Scope {
        Scope::new(CampaignScope::All, self.scope.window)
    }

    fn record_fetch_failure(&self, err: &StoreError, outcome: &mut RefreshOutcome) {
        warn!(error = %err, "fetch failed, marking affected slots");
        outcome.fetch_failures.push(err.to_string());
    }

    fn draw(&mut self, slot: &str, spec: ChartSpec, outcome: &mut RefreshOutcome) {
        if let Err(err) = self.charts.render(slot, spec) {
            warn!(slot, error = %err, "chart render failed");
            outcome.render_failures.push(err.to_string());
        }
    }

    fn render_delivery_charts(&mut self, deliveries: &[Delivery], outcome: &mut RefreshOutcome) {
        let monthly = aggregate::group_by_period(deliveries, |d| d.occurred_at(), Period::Month);
        if monthly.excluded > 0 {
            warn!(excluded = monthly.excluded, "deliveries without a usable sent_at");
        }
        let funnel = aggregate::funnel(deliveries);
        let hours = aggregate::hourly_histogram(deliveries, |d| d.occurred_at(), |d| d.clicked());
        let departments = aggregate::group_by_category(deliveries, |d| d.department.clone());

        self.draw(canvases::ENGAGEMENT_TREND, chart::engagement_trend(&monthly), outcome);
        self.draw(canvases::CONVERSION_FUNNEL, chart::conversion_funnel(&funnel), outcome);
        self.draw(canvases::CLICK_HEATMAP, chart::click_heatmap(&hours), outcome);
        self.draw(canvases::DEPARTMENT, chart::department_bars(&departments), outcome);
        self.draw(canvases::COMPARATIVE, chart::comparative_radar(&departments), outcome);
    }

    fn render_visitor_charts(&mut self, visits: &[Visit], outcome: &mut RefreshOutcome) {
        let daily = aggregate::group_by_period(visits, |v| v.occurred_at(), Period::Day);
        let countries = aggregate::group_by_category(visits, |v| v.country.clone());
        let devices = aggregate::group_by_category(visits, |v| {
            let class = classify_user_agent(v.user_agent.as_deref().unwrap_or_default());
            Some(format!("{} - {}", class.device, class.browser))
        });

        self.draw(canvases::VISITOR_TREND, chart::visitor_trend(&daily), outcome);
        self.draw(canvases::VISITOR_COUNTRY, chart::visitor_countries(&countries), outcome);
        self.draw(canvases::VISITOR_DEVICE, chart::visitor_devices(&devices), outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::{SlotValue, TableState};
    use crate::chart::recording::RecordingBackend;
    use crate::filter::TimeWindow;
    use crate::models::{CampaignKind, Collection};
    use crate::store::memory::MemoryStore;

    fn campaign(id: &str) -> Campaign {
        Campaign {
            id: id.to_string(),
            name: format!("Campaign {id}"),
            kind: Some(CampaignKind::Phishing),
            start_at: None,
            end_at: None,
            created_at: Some(format!("2026-01-0{}", id.len())),
        }
    }

    fn deliveries(campaign: &str, total: usize, clicked: usize, reported: usize) -> Vec<Delivery> {
        (0..total)
            .map(|i| Delivery {
                id: Some(format!("{campaign}-{i}")),
                campaign_id: Some(campaign.to_string()),
                department: Some(if i % 2 == 0 { "Sales" } else { "IT" }.to_string()),
                sent_at: Some((Utc::now() - chrono::Duration::days(3)).to_rfc3339()),
                opened: Some(i < clicked + 2),
                clicked: Some(i < clicked),
                reported: Some(i < reported),
                ..Delivery::default()
            })
            .collect()
    }

    fn dashboard(store: MemoryStore) -> Dashboard<MemoryStore, RecordingBackend> {
        Dashboard::new(store, RecordingBackend::default(), RiskThresholds::default())
    }

    #[tokio::test]
    async fn campaign_table_reflects_scoped_deliveries() {
        let store = MemoryStore::new()
            .with(&[campaign("C1")])
            .with(&deliveries("C1", 10, 4, 1));
        let mut dash = dashboard(store);
        let outcome = dash.refresh(Utc::now()).await;
        assert!(outcome.is_clean());

        assert_eq!(dash.board().get(slots::SENT), Some(&SlotValue::Count(10)));
        assert_eq!(dash.board().get(slots::CLICKED), Some(&SlotValue::Count(4)));
        let TableState::Rows(rows) = dash.board().campaign_table() else {
            panic!("campaign table should have rows");
        };
        assert_eq!(rows[0].click_rate.whole(), "40%");
        assert_eq!(rows[0].at_risk, RiskThresholds::default().is_at_risk(rows[0].click_rate, rows[0].report_rate));
        assert!(!rows[0].at_risk);
    }

    #[tokio::test]
    async fn failed_collection_only_degrades_its_own_slots() {
        let store = MemoryStore::new()
            .with(&[campaign("C1")])
            .with(&deliveries("C1", 4, 1, 0))
            .failing(Collection::VisitorLogs);
        let mut dash = dashboard(store);
        let outcome = dash.refresh(Utc::now()).await;

        assert_eq!(outcome.fetch_failures.len(), 1);
        assert!(dash.board().get(slots::VISITORS).unwrap().is_error());
        assert!(dash.board().get(slots::TOP_BROWSER).unwrap().is_error());
        assert_eq!(dash.board().get(slots::SENT), Some(&SlotValue::Count(4)));
        assert_eq!(dash.board().get(slots::LOGINS), Some(&SlotValue::Count(0)));
        assert!(dash.charts().spec(canvases::VISITOR_TREND).is_none());
        assert!(dash.charts().spec(canvases::CONVERSION_FUNNEL).is_some());
    }

    #[tokio::test]
    async fn campaign_fetch_failure_keeps_delivery_counters() {
        let store = MemoryStore::new()
            .with(&deliveries("C1", 3, 0, 0))
            .failing(Collection::Campaigns);
        let mut dash = dashboard(store);
        dash.refresh(Utc::now()).await;

        assert!(matches!(dash.board().campaign_table(), TableState::Error(_)));
        assert_eq!(dash.board().get(slots::SENT), Some(&SlotValue::Count(3)));
    }

    #[tokio::test]
    async fn both_campaign_and_delivery_failures_are_reported() {
        let store = MemoryStore::new()
            .failing(Collection::Campaigns)
            .failing(Collection::Deliveries);
        let mut dash = dashboard(store);
        let outcome = dash.refresh(Utc::now()).await;

        assert_eq!(outcome.fetch_failures.len(), 2);
        assert!(outcome.fetch_failures.iter().any(|f| f.contains("campaigns")));
        assert!(outcome.fetch_failures.iter().any(|f| f.contains("deliveries")));
        assert!(dash.board().get(slots::SENT).unwrap().is_error());
        assert!(matches!(dash.board().campaign_table(), TableState::Error(_)));
        assert_eq!(dash.board().get(slots::VISITORS), Some(&SlotValue::Count(0)));
    }

    #[tokio::test]
    async fn repeated_refresh_keeps_one_chart_per_slot() {
        let store = MemoryStore::new().with(&deliveries("C1", 5, 2, 1));
        let mut dash = dashboard(store);
        dash.refresh(Utc::now()).await;
        dash.refresh(Utc::now()).await;
        dash.refresh(Utc::now()).await;

        let slots = canvases::DELIVERY.len() + canvases::VISITOR.len();
        assert_eq!(dash.charts().live_count(), slots);
        assert_eq!(dash.charts().backend().live_handles().len(), slots);
        assert_eq!(dash.charts().backend().disposed.len(), slots * 2);
    }

    #[tokio::test]
    async fn scope_change_recomputes_from_fresh_records() {
        let mut all = deliveries("C1", 10, 4, 1);
        all.extend(deliveries("C2", 5, 0, 5));
        let store = MemoryStore::new()
            .with(&[campaign("C1"), campaign("C2")])
            .with(&all);
        let mut dash = dashboard(store);

        dash.refresh(Utc::now()).await;
        assert_eq!(dash.board().get(slots::SENT), Some(&SlotValue::Count(15)));

        dash.set_scope(Scope::new(CampaignScope::Only("C2".into()), TimeWindow::All));
        assert_eq!(dash.board().get(slots::SENT), Some(&SlotValue::Count(15)));
        dash.refresh(Utc::now()).await;
        assert_eq!(dash.board().get(slots::SENT), Some(&SlotValue::Count(5)));
        assert_eq!(dash.board().get(slots::REPORT_RATE).unwrap().to_string(), "100.0%");

        dash.store().push(&Delivery {
            campaign_id: Some("C2".into()),
            sent_at: Some(Utc::now().to_rfc3339()),
            ..Delivery::default()
        });
        dash.refresh(Utc::now()).await;
        assert_eq!(dash.board().get(slots::SENT), Some(&SlotValue::Count(6)));
    }

    #[tokio::test]
    async fn empty_store_renders_zero_state() {
        let mut dash = dashboard(MemoryStore::new());
        let outcome = dash.refresh(Utc::now()).await;

        assert!(outcome.is_clean());
        assert_eq!(dash.board().get(slots::SENT), Some(&SlotValue::Count(0)));
        assert_eq!(dash.board().get(slots::CLICK_RATE).unwrap().to_string(), "0.0%");
        assert_eq!(dash.board().campaign_table(), &TableState::Rows(Vec::new()));
        let trend = dash.charts().spec(canvases::ENGAGEMENT_TREND).unwrap();
        assert!(trend.is_empty());
    }

    #[tokio::test]
    async fn time_window_narrows_visits_and_logins() {
        let now = Utc::now();
        let store = MemoryStore::new()
            .with(&[
                Visit {
                    ip_address: Some("1.1.1.1".into()),
                    timestamp: Some((now - chrono::Duration::days(1)).to_rfc3339()),
                    ..Visit::default()
                },
                Visit {
                    ip_address: Some("2.2.2.2".into()),
                    timestamp: Some((now - chrono::Duration::days(60)).to_rfc3339()),
                    ..Visit::default()
                },
            ])
            .with(&[Login {
                email: Some("a@example.com".into()),
                login_time: Some((now - chrono::Duration::days(2)).to_rfc3339()),
            }]);
        let mut dash = dashboard(store);
        dash.set_scope(Scope::new(CampaignScope::Only("C9".into()), TimeWindow::LastDays(7)));
        dash.refresh(now).await;

        assert_eq!(dash.board().get(slots::VISITORS), Some(&SlotValue::Count(1)));
        assert_eq!(dash.board().get(slots::LOGIN_EMAILS), Some(&SlotValue::Count(1)));
    }
}
