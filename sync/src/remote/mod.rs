//! Salesforce remote API client.

mod bulk;
mod rest;

pub use bulk::{BulkQuery, PK_CHUNK_THRESHOLD};
pub use rest::{QueryStream, RestClient, API_VERSION};

use crate::error::Result;
use serde_json::{Map, Value};

/// A record stream from either the REST pager or the bulk controller.
pub enum RecordSource<'a> {
    Rest(QueryStream<'a>),
    Bulk(BulkQuery<'a>),
}

impl RecordSource<'_> {
    pub async fn next_record(&mut self) -> Result<Option<Map<String, Value>>> {
        match self {
            RecordSource::Rest(stream) => stream.next_record().await,
            RecordSource::Bulk(stream) => stream.next_record().await,
        }
    }
}
