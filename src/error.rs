use thiserror::Error;

use crate::models::Collection;

/// Event store failures. Surfaced per display slot, never dashboard-wide.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("query on {collection} failed: {source}")]
    Query {
        collection: Collection,
        #[source]
        source: sqlx::Error,
    },
    #[error("insert into {collection} failed: {source}")]
    Insert {
        collection: Collection,
        #[source]
        source: sqlx::Error,
    },
    #[error("could not decode {collection} record: {source}")]
    Decode {
        collection: Collection,
        #[source]
        source: serde_json::Error,
    },
    #[error("{collection} is unavailable: {message}")]
    Unavailable {
        collection: Collection,
        message: String,
    },
}

/// Chart drawing and document export failures.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("chart canvas for {slot} failed: {message}")]
    Canvas { slot: String, message: String },
    #[error("report export failed: {0}")]
    Export(#[from] std::io::Error),
}
