use std::path::PathBuf;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod aggregate;
mod binder;
mod chart;
mod dashboard;
mod db;
mod error;
mod filter;
mod models;
mod report;
mod store;

use binder::{RiskThresholds, DEFAULT_CLICK_RATE_THRESHOLD, DEFAULT_REPORT_RATE_THRESHOLD};
use chart::SvgCanvas;
use dashboard::{Dashboard, RefreshOutcome};
use filter::{CampaignScope, Scope, TimeWindow};
use models::{Campaign, CampaignKind};
use store::{EventStore, PgEventStore};

#[derive(Parser)]
#[command(name = "awareness-dashboard")]
#[command(about = "Campaign analytics for phishing and smishing awareness training", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ViewArgs {
    /// Campaign id to focus on, or "all"
    #[arg(long, default_value = "all")]
    campaign: CampaignScope,
    /// Only include events from the last N days, or "all"
    #[arg(long, default_value = "all")]
    days: TimeWindow,
    /// Click rate (percent) above which a campaign is flagged
    #[arg(long, env = "AWARENESS_CLICK_THRESHOLD", default_value_t = DEFAULT_CLICK_RATE_THRESHOLD)]
    click_threshold: f64,
    /// Report rate (percent) below which a campaign is flagged
    #[arg(long, env = "AWARENESS_REPORT_THRESHOLD", default_value_t = DEFAULT_REPORT_RATE_THRESHOLD)]
    report_threshold: f64,
}

impl ViewArgs {
    fn scope(&self) -> Scope {
        Scope::new(self.campaign.clone(), self.days)
    }

    fn thresholds(&self) -> RiskThresholds {
        RiskThresholds {
            click_rate_above: self.click_threshold,
            report_rate_below: self.report_threshold,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load sample campaigns, deliveries and visits
    Seed,
    /// Import delivery records from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Register a new simulation campaign
    CreateCampaign {
        #[arg(long)]
        name: String,
        #[arg(long, value_enum, default_value_t = CampaignKind::Phishing)]
        kind: CampaignKind,
        #[arg(long)]
        start: Option<NaiveDate>,
        #[arg(long)]
        end: Option<NaiveDate>,
    },
    /// Print dashboard metrics, the campaign table and chart summaries
    Dashboard {
        #[command(flatten)]
        view: ViewArgs,
    },
    /// Render every dashboard chart to SVG
    Charts {
        #[command(flatten)]
        view: ViewArgs,
        #[arg(long, default_value = "charts")]
        out: PathBuf,
    },
    /// Export a paginated dashboard report
    Report {
        #[command(flatten)]
        view: ViewArgs,
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
        /// Lines per page, header and footer included
        #[arg(long, default_value_t = 60)]
        page_height: usize,
    },
}

fn open_dashboard(pool: &PgPool, view: &ViewArgs) -> Dashboard<PgEventStore, SvgCanvas> {
    let mut dashboard = Dashboard::new(
        PgEventStore::new(pool.clone()),
        SvgCanvas::default(),
        view.thresholds(),
    );
    dashboard.set_scope(view.scope());
    dashboard
}

fn print_alerts(outcome: &RefreshOutcome) {
    for failure in &outcome.fetch_failures {
        eprintln!("Error: {failure}");
    }
    for failure in &outcome.render_failures {
        eprintln!("Alert: {failure}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must point at the campaign event store")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} deliveries from {}.", csv.display());
        }
        Commands::CreateCampaign {
            name,
            kind,
            start,
            end,
        } => {
            let campaign = Campaign {
                id: uuid::Uuid::new_v4().to_string(),
                name,
                kind: Some(kind),
                start_at: start.map(|date| date.to_string()),
                end_at: end.map(|date| date.to_string()),
                created_at: Some(Utc::now().to_rfc3339()),
            };
            let created = PgEventStore::new(pool.clone())
                .insert(&campaign)
                .await
                .context("failed to create campaign")?;
            info!(id = %created.id, "campaign created");
            println!("Created {} campaign {} ({}).", kind, created.name, created.id);
        }
        Commands::Dashboard { view } => {
            let mut dashboard = open_dashboard(&pool, &view);
            let outcome = dashboard.refresh(Utc::now()).await;
            print_alerts(&outcome);

            println!("Dashboard for {}", dashboard.scope());
            println!();
            let width = report::PageLayout::default().width;
            for block in report::capture(dashboard.board(), dashboard.charts(), width) {
                for line in block.lines {
                    println!("{line}");
                }
            }
        }
        Commands::Charts { view, out } => {
            let mut dashboard = open_dashboard(&pool, &view);
            let outcome = dashboard.refresh(Utc::now()).await;
            print_alerts(&outcome);

            std::fs::create_dir_all(&out)
                .with_context(|| format!("failed to create {}", out.display()))?;
            let charts = dashboard.charts();
            let mut written = 0usize;
            for (slot, svg) in charts.backend().documents() {
                let path = out.join(format!("{slot}.svg"));
                std::fs::write(&path, svg)
                    .with_context(|| format!("failed to write {}", path.display()))?;

                if let Some(spec) = charts.spec(slot) {
                    let path = out.join(format!("{slot}.json"));
                    std::fs::write(&path, serde_json::to_string_pretty(spec)?)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                }
                written += 1;
            }
            println!("Wrote {written} charts to {}.", out.display());
        }
        Commands::Report {
            view,
            out_dir,
            page_height,
        } => {
            let mut dashboard = open_dashboard(&pool, &view);
            let layout = report::PageLayout {
                page_height,
                ..report::PageLayout::default()
            };
            let summary = report::export(&mut dashboard, Utc::now(), &out_dir, &layout)
                .await
                .context("report export failed")?;
            print_alerts(&summary.refresh);
            println!(
                "Report written to {} ({} pages).",
                summary.path.display(),
                summary.pages
            );
        }
    }

    Ok(())
}
