use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::{PgPool, Row};

use crate::error::StoreError;
use crate::models::{Campaign, Collection, Delivery, Login, Visit};

/// A record type that lives in one event store collection.
pub trait StoredRecord: Serialize + DeserializeOwned + Clone {
    const COLLECTION: Collection;
}

impl StoredRecord for Campaign {
    const COLLECTION: Collection = Collection::Campaigns;
}

impl StoredRecord for Delivery {
    const COLLECTION: Collection = Collection::Deliveries;
}

impl StoredRecord for Visit {
    const COLLECTION: Collection = Collection::VisitorLogs;
}

impl StoredRecord for Login {
    const COLLECTION: Collection = Collection::Logins;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Eq(&'static str, String),
    NotNull(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Order {
    pub field: &'static str,
    pub ascending: bool,
}

/// Equality and presence filters plus an optional ordering. No joins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
}

impl Query {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: &'static str, value: impl Into<String>) -> Self {
        self.filters.push(Filter::Eq(field, value.into()));
        self
    }

    pub fn not_null(mut self, field: &'static str) -> Self {
        self.filters.push(Filter::NotNull(field));
        self
    }

    pub fn order_by(mut self, field: &'static str, ascending: bool) -> Self {
        self.order = Some(Order { field, ascending });
        self
    }
}

#[allow(async_fn_in_trait)]
pub trait EventStore {
    async fn query<R: StoredRecord>(&self, query: &Query) -> Result<Vec<R>, StoreError>;

    async fn insert<R: StoredRecord>(&self, record: &R) -> Result<R, StoreError>;
}

pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

pub(crate) fn select_sql(collection: Collection, query: &Query) -> String {
    let mut sql = format!(
        "SELECT row_to_json(t) AS doc FROM awareness.{} t",
        collection.table()
    );

    let mut placeholder = 0;
    for (index, filter) in query.filters.iter().enumerate() {
        sql.push_str(if index == 0 { " WHERE " } else { " AND " });
        match filter {
            Filter::Eq(field, _) => {
                placeholder += 1;
                sql.push_str(&format!("t.\"{field}\"::text = ${placeholder}"));
            }
            Filter::NotNull(field) => {
                sql.push_str(&format!("t.\"{field}\" IS NOT NULL"));
            }
        }
    }

    if let Some(order) = query.order {
        let direction = if order.ascending { "ASC" } else { "DESC" };
        sql.push_str(&format!(" ORDER BY t.\"{}\" {direction}", order.field));
    }

    sql
}

fn decode<R: StoredRecord>(doc: serde_json::Value) -> Result<R, StoreError> {
    serde_json::from_value(doc).map_err(|source| StoreError::Decode {
        collection: R::COLLECTION,
        source,
    })
}

impl EventStore for PgEventStore {
    async fn query<R: StoredRecord>(&self, query: &Query) -> Result<Vec<R>, StoreError> {
        if self.pool.is_closed() {
            return Err(StoreError::Unavailable {
                collection: R::COLLECTION,
                message: "connection pool is closed".to_string(),
            });
        }
        let sql = select_sql(R::COLLECTION, query);
        let mut statement = sqlx::query(&sql);
        for filter in &query.filters {
            if let Filter::Eq(_, value) = filter {
                statement = statement.bind(value);
            }
        }

        let rows = statement
            .fetch_all(&self.pool)
            .await
            .map_err(|source| StoreError::Query {
                collection: R::COLLECTION,
                source,
            })?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let doc: serde_json::Value =
                row.try_get("doc").map_err(|source| StoreError::Query {
                    collection: R::COLLECTION,
                    source,
                })?;
            records.push(decode(doc)?);
        }

        Ok(records)
    }

    async fn insert<R: StoredRecord>(&self, record: &R) -> Result<R, StoreError> {
        let table = R::COLLECTION.table();
        let sql = format!(
            "INSERT INTO awareness.{table} AS t \
             SELECT * FROM jsonb_populate_record(NULL::awareness.{table}, $1) \
             RETURNING row_to_json(t) AS doc"
        );
        let doc = serde_json::to_value(record).map_err(|source| StoreError::Decode {
            collection: R::COLLECTION,
            source,
        })?;

        let row = sqlx::query(&sql)
            .bind(doc)
            .fetch_one(&self.pool)
            .await
            .map_err(|source| StoreError::Insert {
                collection: R::COLLECTION,
                source,
            })?;
        let created: serde_json::Value =
            row.try_get("doc").map_err(|source| StoreError::Insert {
                collection: R::COLLECTION,
                source,
            })?;

        decode(created)
    }
}
