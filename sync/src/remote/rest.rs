//! REST client: login, streaming query pager, counts, describes.
//!
//! One client instance is shared by all workers; the API-call counter is
//! atomic and every HTTP round trip increments it.

use crate::error::{Result, SyncError};
use gurglefish_engine::{canonical_id, FieldDescriptor, SObjectFields, SObjectSummary};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};

/// Remote API version; the versioned URL form must match exactly.
pub const API_VERSION: &str = "52.0";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    instance_url: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryPage {
    #[serde(default)]
    records: Vec<Value>,
    next_records_url: Option<String>,
    #[serde(default)]
    total_size: u64,
}

/// Shared remote API client.
pub struct RestClient {
    http: reqwest::Client,
    service_url: String,
    calls: AtomicU64,
}

impl RestClient {
    /// OAuth password-grant login; failure is fatal for the run.
    pub async fn login(
        consumer_key: &str,
        consumer_secret: &str,
        username: &str,
        password: &str,
        auth_url: &str,
    ) -> Result<Self> {
        let params = [
            ("grant_type", "password"),
            ("username", username),
            ("password", password),
            ("client_id", consumer_key),
            ("client_secret", consumer_secret),
        ];
        let response = reqwest::Client::new()
            .post(format!("{}/services/oauth2/token", auth_url))
            .form(&params)
            .send()
            .await?;
        let payload: TokenResponse = response.json().await?;
        if let Some(error) = payload.error {
            return Err(SyncError::AuthFailure(
                payload.error_description.unwrap_or(error),
            ));
        }
        match (payload.access_token, payload.instance_url) {
            (Some(token), Some(url)) => Self::with_session(&token, &url),
            _ => Err(SyncError::AuthFailure("token response incomplete".into())),
        }
    }

    /// Build a client around an existing session token.
    pub fn with_session(token: &str, instance_url: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("OAuth {}", token))
            .map_err(|_| SyncError::AuthFailure("token is not header-safe".into()))?;
        let session = HeaderValue::from_str(token)
            .map_err(|_| SyncError::AuthFailure("token is not header-safe".into()))?;
        headers.insert("Authorization", auth);
        headers.insert("X-SFDC-Session", session);
        headers.insert(
            "Content-Type",
            HeaderValue::from_static("application/json; charset=UTF-8"),
        );
        headers.insert(
            "Accept-Encoding",
            HeaderValue::from_static("gzip, compress, deflate"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;
        Ok(Self {
            http,
            service_url: instance_url.trim_end_matches('/').to_string(),
            calls: AtomicU64::new(0),
        })
    }

    pub fn service_url(&self) -> &str {
        &self.service_url
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Total HTTP round trips so far.
    pub fn api_calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub(crate) fn count_call(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        let url = format!(
            "{}/services/data/v{}/{}",
            self.service_url, API_VERSION, path
        );
        let response = self.http.get(&url).send().await?;
        self.count_call();
        let status = response.status();
        let body = response.text().await?;
        if status != StatusCode::OK {
            return Err(SyncError::RemoteStatus {
                status: status.as_u16(),
                url,
                body,
            });
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// List all sobjects visible to the connection.
    pub async fn sobject_list(&self) -> Result<Vec<SObjectSummary>> {
        let payload = self.get_json("sobjects/").await?;
        let sobjects = payload
            .get("sobjects")
            .cloned()
            .unwrap_or(Value::Array(vec![]));
        Ok(serde_json::from_value(sobjects)?)
    }

    /// Ingested field list of one sobject, sorted by name.
    pub async fn field_list(&self, sobject_name: &str) -> Result<SObjectFields> {
        let doc = self
            .get_json(&format!("sobjects/{}/describe", sobject_name))
            .await?;
        let fields = doc.get("fields").cloned().unwrap_or(Value::Array(vec![]));
        let descriptors: Vec<FieldDescriptor> = serde_json::from_value(fields)?;
        Ok(SObjectFields::new(descriptors))
    }

    /// Total record count, optionally restricted by a filter clause.
    pub async fn record_count(&self, sobject: &str, query_filter: Option<&str>) -> Result<u64> {
        let mut soql = format!("select count() from {}", sobject);
        if let Some(filter) = query_filter {
            soql.push_str(" where ");
            soql.push_str(filter);
        }
        let page = self.fetch_query_page(&self.query_url("query", &soql)).await?;
        Ok(page.total_size)
    }

    /// Lazily stream the records of a SOQL query, following pagination.
    pub fn query(&self, soql: &str, include_deleted: bool) -> QueryStream<'_> {
        let resource = if include_deleted { "queryAll" } else { "query" };
        QueryStream {
            client: self,
            first_url: Some(self.query_url(resource, soql)),
            next_url: None,
            records: Vec::new().into_iter(),
        }
    }

    /// Stream the sorted canonical-id set of an sobject, one per line.
    pub async fn dump_ids<W: Write>(&self, sobject: &str, out: &mut W) -> Result<u64> {
        let soql = format!("select Id from {} order by Id", sobject);
        let mut stream = self.query(&soql, false);
        let mut count = 0u64;
        while let Some(rec) = stream.next_record().await? {
            if let Some(id) = rec.get("Id").and_then(Value::as_str) {
                writeln!(out, "{}", canonical_id(id))?;
                count += 1;
            }
        }
        Ok(count)
    }

    /// The remote rejects its own escaping conventions if the payload is
    /// encoded wholesale, so the SOQL is massaged by hand: percent-encode
    /// `+`, strip newlines, spaces become `+`.
    fn query_url(&self, resource: &str, soql: &str) -> String {
        let encoded = soql
            .replace('+', "%2b")
            .replace(['\n', '\r'], "")
            .replace(' ', "+");
        format!(
            "{}/services/data/v{}/{}/?q={}",
            self.service_url, API_VERSION, resource, encoded
        )
    }

    async fn fetch_query_page(&self, url: &str) -> Result<QueryPage> {
        let response = self.http.get(url).send().await?;
        self.count_call();
        let status = response.status();
        if status.as_u16() == 431 {
            return Err(SyncError::QueryTooLarge);
        }
        let body = response.text().await?;
        if status != StatusCode::OK {
            return Err(SyncError::RemoteStatus {
                status: status.as_u16(),
                url: url.to_string(),
                body,
            });
        }
        Ok(serde_json::from_str(&body)?)
    }
}

/// Restartable-per-call lazy record sequence over the REST query API.
///
/// Only the current page is held in memory; `nextRecordsUrl` is followed
/// until absent. Envelope `attributes` are stripped from every record.
pub struct QueryStream<'a> {
    client: &'a RestClient,
    first_url: Option<String>,
    next_url: Option<String>,
    records: std::vec::IntoIter<Value>,
}

impl QueryStream<'_> {
    pub async fn next_record(&mut self) -> Result<Option<Map<String, Value>>> {
        loop {
            if let Some(value) = self.records.next() {
                let mut rec: Map<String, Value> = serde_json::from_value(value)?;
                rec.remove("attributes");
                return Ok(Some(rec));
            }
            let url = if let Some(first) = self.first_url.take() {
                first
            } else if let Some(next) = self.next_url.take() {
                format!("{}{}", self.client.service_url, next)
            } else {
                return Ok(None);
            };
            let page = self.client.fetch_query_page(&url).await?;
            self.records = page.records.into_iter();
            self.next_url = page.next_records_url;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soql_payload_encoding() {
        let client = RestClient::with_session("tok", "https://na1.salesforce.com").unwrap();
        let url = client.query_url("query", "select Id,\nName from account where x = 1+1");
        assert_eq!(
            url,
            "https://na1.salesforce.com/services/data/v52.0/query/?q=\
             select+Id,Name+from+account+where+x+=+1%2b1"
        );
    }

    #[test]
    fn query_all_resource_for_tombstones() {
        let client = RestClient::with_session("tok", "https://na1.salesforce.com/").unwrap();
        let url = client.query_url("queryAll", "select Id from a");
        assert!(url.contains("/services/data/v52.0/queryAll/?q="));
    }

    #[test]
    fn query_page_parses_pagination() {
        let page: QueryPage = serde_json::from_str(
            r#"{"totalSize": 2, "done": false,
                "records": [{"Id": "a"}, {"Id": "b"}],
                "nextRecordsUrl": "/services/data/v52.0/query/01g-2000"}"#,
        )
        .unwrap();
        assert_eq!(page.records.len(), 2);
        assert_eq!(
            page.next_records_url.as_deref(),
            Some("/services/data/v52.0/query/01g-2000")
        );
        assert_eq!(page.total_size, 2);
    }

    #[test]
    fn token_error_shape() {
        let payload: TokenResponse = serde_json::from_str(
            r#"{"error": "invalid_grant", "error_description": "authentication failure"}"#,
        )
        .unwrap();
        assert_eq!(payload.error.as_deref(), Some("invalid_grant"));
        assert_eq!(
            payload.error_description.as_deref(),
            Some("authentication failure")
        );
    }
}
