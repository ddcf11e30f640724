use anyhow::Context;
use chrono::{Duration, NaiveDate};
use sqlx::PgPool;
use uuid::Uuid;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let campaigns = vec![
        (
            "8f4c2d0e-6a61-4c3e-9d57-1b2f0f8e4a11",
            "Payroll Portal Update",
            "phishing",
            NaiveDate::from_ymd_opt(2026, 1, 12).context("invalid date")?,
        ),
        (
            "2b9e7c55-0d3a-4f1b-8c6e-5a4d3c2b1a00",
            "Parcel Redelivery Notice",
            "smishing",
            NaiveDate::from_ymd_opt(2026, 2, 3).context("invalid date")?,
        ),
    ];

    for (id, name, kind, start) in &campaigns {
        let end = *start + Duration::days(14);
        sqlx::query(
            r#"
            INSERT INTO awareness.campaigns (id, name, type, start_at, end_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $4)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name, type = EXCLUDED.type
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(kind)
        .bind(start.to_string())
        .bind(end.to_string())
        .execute(pool)
        .await?;
    }

    let departments = ["Finance", "Sales", "IT", "HR"];
    for (campaign_index, (campaign_id, _, _, start)) in campaigns.iter().enumerate() {
        for n in 0..12usize {
            let sent_at = start
                .and_hms_opt((8 + n % 9) as u32, (n * 7 % 60) as u32, 0)
                .context("invalid time")?
                + Duration::days((n / 4) as i64);
            let clicked = (n + campaign_index) % 3 == 0;

            sqlx::query(
                r#"
                INSERT INTO awareness.deliveries
                (id, campaign_id, email, department, sent_at, opened, clicked, credential_submitted, reported)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(format!("seed-{campaign_index}-{n:02}"))
            .bind(campaign_id)
            .bind(format!("employee{n:02}@example.com"))
            .bind(departments[n % departments.len()])
            .bind(sent_at.format("%Y-%m-%dT%H:%M:%S").to_string())
            .bind(clicked || n % 2 == 0)
            .bind(clicked)
            .bind(clicked && n % 2 == 0)
            .bind(!clicked && n % 5 == 1)
            .execute(pool)
            .await?;
        }
    }

    let visits = [
        ("203.0.113.10", "Mozilla/5.0 (Windows NT 10.0; Win64; x64) Chrome/120.0 Safari/537.36", "2026-01-13T09:12:00", "Lagos", "Nigeria"),
        ("203.0.113.10", "Mozilla/5.0 (Windows NT 10.0; Win64; x64) Chrome/120.0 Safari/537.36", "2026-01-13T09:40:00", "Lagos", "Nigeria"),
        ("198.51.100.7", "Mozilla/5.0 (iPhone; CPU iPhone OS 17_2 like Mac OS X) Mobile/15E148 Safari/604.1", "2026-02-04T18:05:00", "Accra", "Ghana"),
        ("192.0.2.44", "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0", "2026-02-05T11:30:00", "Nairobi", "Kenya"),
    ];

    for (ip, user_agent, timestamp, city, country) in visits {
        sqlx::query(
            r#"
            INSERT INTO awareness.visitor_logs (ip_address, user_agent, "timestamp", location, city, country, isp)
            SELECT $1, $2, $3, $4 || ', ' || $5, $4, $5, 'Unknown'
            WHERE NOT EXISTS (
                SELECT 1 FROM awareness.visitor_logs WHERE ip_address = $1 AND "timestamp" = $3
            )
            "#,
        )
        .bind(ip)
        .bind(user_agent)
        .bind(timestamp)
        .bind(city)
        .bind(country)
        .execute(pool)
        .await?;
    }

    Ok(())
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        id: Option<String>,
        campaign_id: String,
        email: String,
        department: Option<String>,
        sent_at: String,
        #[serde(default)]
        opened: bool,
        #[serde(default)]
        clicked: bool,
        #[serde(default)]
        credential_submitted: bool,
        #[serde(default)]
        reported: bool,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut inserted = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        let id = row
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

        let result = sqlx::query(
            r#"
            INSERT INTO awareness.deliveries
            (id, campaign_id, email, department, sent_at, opened, clicked, credential_submitted, reported)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(&row.campaign_id)
        .bind(&row.email)
        .bind(&row.department)
        .bind(&row.sent_at)
        .bind(row.opened)
        .bind(row.clicked)
        .bind(row.credential_submitted)
        .bind(row.reported)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            inserted += 1;
        }
    }

    Ok(inserted)
}
