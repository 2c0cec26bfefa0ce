//! Async bulk-query job controller.
//!
//! A bulk query creates a job, submits the SOQL as one batch, closes the
//! job, then polls batch state until the work starts. With PKChunking the
//! server splits the query into extra batches keyed by primary-key range;
//! the submitted parent batch ends as `NotProcessed` and only the generated
//! batches carry results. Result pages stream one at a time.

use crate::error::{Result, SyncError};
use crate::remote::rest::{RestClient, API_VERSION};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::{HashSet, VecDeque};
use std::time::Duration;
use tokio::time::sleep;

/// Record counts above this get the PKChunking header.
pub const PK_CHUNK_THRESHOLD: u64 = 200_000;

const POLL_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobInfo {
    id: String,
    state: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchInfo {
    id: String,
    state: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchList {
    batch_info: Vec<BatchInfo>,
}

impl RestClient {
    /// Start a bulk query and return a lazy record stream over its results.
    ///
    /// `timeout` bounds the wait for the job to start; the poll cadence is
    /// 30 seconds throughout.
    pub async fn bulk_query(
        &self,
        sobject: &str,
        soql: &str,
        timeout: Duration,
        pk_chunking: bool,
    ) -> Result<BulkQuery<'_>> {
        let job = self.create_job(sobject, pk_chunking).await?;
        let batch = self.submit_batch(&job.id, soql).await?;
        self.close_job(&job.id).await?;

        tracing::info!(
            "waiting on bulk query job {} to start, timeout is {} seconds",
            job.id,
            timeout.as_secs()
        );
        self.wait_for_start(&job.id, &batch.id, timeout).await?;

        Ok(BulkQuery {
            client: self,
            job_id: job.id,
            released: HashSet::new(),
            results: VecDeque::new(),
            current: Vec::new().into_iter(),
        })
    }

    async fn create_job(&self, sobject: &str, pk_chunking: bool) -> Result<JobInfo> {
        let url = format!("{}/services/async/{}/job", self.service_url(), API_VERSION);
        let payload = json!({
            "operation": "query",
            "object": sobject,
            "contentType": "JSON",
            "concurrencyMode": "Parallel",
        });
        let mut request = self.http().post(&url).json(&payload);
        if pk_chunking {
            request = request.header("Sforce-Enable-PKChunking", "chunkSize=5000");
        }
        let response = request.send().await?;
        self.count_call();
        let status = response.status();
        let body = response.text().await?;
        if status != StatusCode::CREATED && status != StatusCode::OK {
            return Err(SyncError::RemoteStatus {
                status: status.as_u16(),
                url,
                body,
            });
        }
        let job: JobInfo = serde_json::from_str(&body)?;
        if job.state != "Open" {
            return Err(SyncError::RemoteStatus {
                status: status.as_u16(),
                url,
                body: format!("invalid job state: {}", job.state),
            });
        }
        Ok(job)
    }

    async fn submit_batch(&self, job_id: &str, soql: &str) -> Result<BatchInfo> {
        let url = format!(
            "{}/services/async/{}/job/{}/batch",
            self.service_url(),
            API_VERSION,
            job_id
        );
        let response = self
            .http()
            .post(&url)
            .body(format!("{} ", soql))
            .send()
            .await?;
        self.count_call();
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(SyncError::RemoteStatus {
                status: status.as_u16(),
                url,
                body,
            });
        }
        Ok(serde_json::from_str(&body)?)
    }

    async fn close_job(&self, job_id: &str) -> Result<()> {
        let url = format!(
            "{}/services/async/{}/job/{}",
            self.service_url(),
            API_VERSION,
            job_id
        );
        let response = self
            .http()
            .post(&url)
            .body(r#"{"state":"Closed"}"#)
            .send()
            .await?;
        self.count_call();
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await?;
            return Err(SyncError::RemoteStatus {
                status: status.as_u16(),
                url,
                body,
            });
        }
        Ok(())
    }

    async fn refresh_batch(&self, job_id: &str, batch_id: &str) -> Result<BatchInfo> {
        let url = format!(
            "{}/services/async/{}/job/{}/batch/{}",
            self.service_url(),
            API_VERSION,
            job_id,
            batch_id
        );
        let body = self.async_get(&url).await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn wait_for_start(
        &self,
        job_id: &str,
        batch_id: &str,
        timeout: Duration,
    ) -> Result<()> {
        let mut waited = Duration::ZERO;
        while waited < timeout {
            sleep(POLL_INTERVAL).await;
            waited += POLL_INTERVAL;
            let batch = self.refresh_batch(job_id, batch_id).await?;
            match batch.state.as_str() {
                "Completed" | "NotProcessed" => return Ok(()),
                "Failed" => {
                    return Err(SyncError::RemoteStatus {
                        status: 200,
                        url: format!("job/{}/batch/{}", job_id, batch_id),
                        body: "bulk batch failed".into(),
                    })
                }
                _ => {}
            }
        }
        Err(SyncError::BulkTimeout(timeout.as_secs()))
    }

    async fn async_get(&self, url: &str) -> Result<String> {
        let response = self.http().get(url).send().await?;
        self.count_call();
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(SyncError::RemoteStatus {
                status: status.as_u16(),
                url: url.to_string(),
                body,
            });
        }
        Ok(body)
    }
}

/// Lazy record stream over a bulk query's completed batches.
pub struct BulkQuery<'a> {
    client: &'a RestClient,
    job_id: String,
    /// Batches whose results are queued or that carry none
    released: HashSet<String>,
    /// (batch id, result id) pages not yet fetched
    results: VecDeque<(String, String)>,
    current: std::vec::IntoIter<Value>,
}

impl BulkQuery<'_> {
    /// Next record, or `None` when every batch is terminal and drained.
    pub async fn next_record(&mut self) -> Result<Option<Map<String, Value>>> {
        loop {
            if let Some(value) = self.current.next() {
                let mut rec: Map<String, Value> = serde_json::from_value(value)?;
                rec.remove("attributes");
                return Ok(Some(rec));
            }
            if let Some((batch_id, result_id)) = self.results.pop_front() {
                self.current = self.fetch_result_page(&batch_id, &result_id).await?;
                continue;
            }
            if !self.collect_completed_batches().await? {
                return Ok(None);
            }
        }
    }

    /// Scan batch states, queueing result pages of newly completed batches.
    ///
    /// Returns false once every batch is terminal and nothing is queued.
    async fn collect_completed_batches(&mut self) -> Result<bool> {
        loop {
            let url = format!(
                "{}/services/async/{}/job/{}/batch",
                self.client.service_url(),
                API_VERSION,
                self.job_id
            );
            let body = self.client.async_get(&url).await?;
            let batches: BatchList = serde_json::from_str(&body)?;

            let mut in_flight = false;
            for batch in &batches.batch_info {
                if self.released.contains(&batch.id) {
                    continue;
                }
                match batch.state.as_str() {
                    "Completed" => {
                        for result_id in self.fetch_result_ids(&batch.id).await? {
                            self.results.push_back((batch.id.clone(), result_id));
                        }
                        self.released.insert(batch.id.clone());
                    }
                    // PKChunking parent batch carries no results
                    "NotProcessed" => {
                        self.released.insert(batch.id.clone());
                    }
                    "Failed" => {
                        return Err(SyncError::RemoteStatus {
                            status: 200,
                            url: format!("job/{}/batch/{}", self.job_id, batch.id),
                            body: "bulk batch failed".into(),
                        })
                    }
                    _ => in_flight = true,
                }
            }

            if !self.results.is_empty() {
                return Ok(true);
            }
            if !in_flight {
                return Ok(false);
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn fetch_result_ids(&self, batch_id: &str) -> Result<Vec<String>> {
        let url = format!(
            "{}/services/async/{}/job/{}/batch/{}/result",
            self.client.service_url(),
            API_VERSION,
            self.job_id,
            batch_id
        );
        let body = self.client.async_get(&url).await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn fetch_result_page(
        &self,
        batch_id: &str,
        result_id: &str,
    ) -> Result<std::vec::IntoIter<Value>> {
        let url = format!(
            "{}/services/async/{}/job/{}/batch/{}/result/{}",
            self.client.service_url(),
            API_VERSION,
            self.job_id,
            batch_id,
            result_id
        );
        let body = self.client.async_get(&url).await?;
        let records: Vec<Value> = serde_json::from_str(&body)?;
        Ok(records.into_iter())
    }
}
