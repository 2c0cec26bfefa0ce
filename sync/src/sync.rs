//! The sync pipeline orchestrator.
//!
//! One run opens a job row, fans one task per enabled sobject into a shared
//! queue, and drains it with up to four workers. Each worker reconciles the
//! sobject's schema, computes the watermark, streams changed records, and
//! applies them with change-minimal upserts. A failed sobject never aborts
//! the job; the job row is always sealed and old history pruned.

use crate::context::Context;
use crate::error::{Result, SyncError};
use crate::remote::{RecordSource, PK_CHUNK_THRESHOLD};
use crate::schema::{ReconcileOutcome, SchemaManager};
use crate::store::{AutoScrub, TableConfig};
use chrono::{Months, Utc};
use gurglefish_engine::{canonical_id, epoch_millis_to_iso, soql, TransformKind, Transformer};
use serde_json::Value;
use sqlx::PgConnection;
use std::collections::{HashSet, VecDeque};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::NamedTempFile;

/// Commit cadence inside a worker's record loop.
const COMMIT_BATCH: u64 = 10_000;
/// Progress log cadence.
const PROGRESS_INTERVAL: u64 = 5_000;
/// How long a bulk job may take to start before the sobject fails.
const BULK_START_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Default)]
struct Counters {
    inserts: u64,
    updates: u64,
    deletes: u64,
}

impl Counters {
    fn changed(&self) -> u64 {
        self.inserts + self.updates + self.deletes
    }
}

/// Orchestrates one sync run across all enabled tables.
pub struct SyncEngine {
    ctx: Arc<Context>,
}

impl SyncEngine {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    /// Run a full sync pass: job open → fan-out → join → job close.
    pub async fn sync_tables(&self, force_scrub: bool) -> Result<()> {
        let configs = self
            .ctx
            .store
            .load_table_configs()?
            .ok_or_else(|| SyncError::ConfigMissing("config.json (run --init first)".into()))?;
        let enabled: Vec<TableConfig> = configs.into_iter().filter(|t| t.enabled).collect();
        if enabled.is_empty() {
            tracing::warn!("no tables enabled for sync");
            return Ok(());
        }

        tracing::info!("building table sync queue");
        let schema_mgr = SchemaManager::new(&self.ctx);
        for table in &enabled {
            if !self.ctx.driver.table_exists(&table.name).await? {
                schema_mgr.create_table(&table.name).await?;
            }
        }

        let jobid = self.ctx.driver.start_sync_job().await?;
        let workers = self.ctx.profile.workers().min(enabled.len());
        let queue = Arc::new(Mutex::new(VecDeque::from(enabled)));

        tracing::info!("allocating {} worker(s)", workers);
        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let ctx = Arc::clone(&self.ctx);
            let queue = Arc::clone(&queue);
            handles.push(tokio::spawn(worker_loop(
                worker,
                ctx,
                queue,
                jobid,
                force_scrub,
            )));
        }
        for handle in handles {
            if let Err(err) = handle.await {
                tracing::error!("sync worker panicked: {}", err);
            }
        }

        // guaranteed cleanup path, regardless of per-table outcomes
        self.ctx.driver.finish_sync_job(jobid).await?;
        let now = Utc::now().naive_utc();
        let cutoff = now.checked_sub_months(Months::new(2)).unwrap_or(now);
        self.ctx.driver.clean_house(cutoff).await?;

        tracing::info!(
            "total API calls used during sync: {}",
            self.ctx.remote.api_calls()
        );
        Ok(())
    }
}

async fn worker_loop(
    worker: usize,
    ctx: Arc<Context>,
    queue: Arc<Mutex<VecDeque<TableConfig>>>,
    jobid: i32,
    force_scrub: bool,
) {
    loop {
        let Some(table) = queue.lock().unwrap().pop_front() else {
            break;
        };
        if let Err(err) = Box::pin(sync_one_table(&ctx, jobid, &table, force_scrub)).await {
            tracing::error!("worker {}: sync of {} failed: {}", worker, table.name, err);
        }
    }
}

async fn sync_one_table(
    ctx: &Context,
    jobid: i32,
    table: &TableConfig,
    force_scrub: bool,
) -> Result<()> {
    let sobject_name = table.name.to_lowercase();
    let schema_mgr = SchemaManager::new(ctx);

    tracing::info!("checking {} schema for changes", sobject_name);
    if schema_mgr.reconcile(table).await? == ReconcileOutcome::Skip {
        tracing::warn!("sync of {} skipped due to warnings", sobject_name);
        return Ok(());
    }

    let watermark = ctx.driver.max_timestamp(&sobject_name).await?;
    let include_deleted = watermark.is_some();
    match watermark {
        Some(ts) => tracing::info!("start sync {} changes after {}", sobject_name, ts),
        None => tracing::info!("start full download of {}", sobject_name),
    }
    let statement = soql::with_incremental_order(&ctx.store.load_query(&sobject_name)?, watermark);

    let transformer = Transformer::new(ctx.store.load_recipe(&sobject_name)?);
    let datetime_fields: Vec<String> = transformer
        .entries()
        .iter()
        .filter(|e| e.kind == TransformKind::Timestamp)
        .map(|e| e.sobject_field.clone())
        .collect();

    let use_bulk = table.bulkapi
        && ctx.remote.record_count(&sobject_name, None).await? > PK_CHUNK_THRESHOLD;

    let calls_before = ctx.remote.api_calls();
    let sync_start = Utc::now().naive_utc();
    let mut counts = Counters::default();

    let mut source = if use_bulk {
        RecordSource::Bulk(
            ctx.remote
                .bulk_query(&sobject_name, &statement, BULK_START_TIMEOUT, true)
                .await?,
        )
    } else {
        RecordSource::Rest(ctx.remote.query(&statement, include_deleted))
    };

    let mut conn = ctx.driver.pool().acquire().await?;
    ctx.driver.begin(&mut conn).await?;
    let applied = apply_records(
        ctx,
        &mut conn,
        &sobject_name,
        &transformer,
        &datetime_fields,
        use_bulk,
        &mut source,
        &mut counts,
    )
    .await;
    match applied {
        Ok(()) => ctx.driver.commit(&mut conn).await?,
        Err(SyncError::QueryTooLarge) => {
            // recoverable at the sobject level: keep what was applied and
            // tell the operator to switch this object to the bulk API
            ctx.driver.commit(&mut conn).await?;
            tracing::error!(
                "query for {} too large for the REST API - switch to bulkapi to continue",
                sobject_name
            );
        }
        Err(err) => {
            ctx.driver.rollback(&mut conn).await?;
            return Err(err);
        }
    }

    if table.auto_scrub == AutoScrub::Always || force_scrub {
        counts.deletes += scrub_deletes(ctx, &mut conn, &sobject_name).await?;
    }

    let api_calls = ctx.remote.api_calls() - calls_before;
    tracing::info!(
        "end sync {}: {} inserts, {} updates, {} deletes ({} API calls)",
        sobject_name,
        counts.inserts,
        counts.updates,
        counts.deletes,
        api_calls
    );

    if counts.changed() > 0 {
        ctx.driver
            .insert_sync_stats(
                jobid,
                &sobject_name,
                sync_start,
                Utc::now().naive_utc(),
                watermark,
                counts.inserts,
                counts.updates,
                counts.deletes,
                api_calls,
            )
            .await?;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn apply_records<'a>(
    ctx: &'a Context,
    conn: &'a mut PgConnection,
    sobject_name: &'a str,
    transformer: &'a Transformer,
    datetime_fields: &'a [String],
    convert_datetimes: bool,
    source: &'a mut RecordSource<'_>,
    counts: &'a mut Counters,
) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
    Box::pin(async move {
    let mut uncommitted = 0u64;
    while let Some(mut rec) = source.next_record().await? {
        if convert_datetimes {
            // bulk results carry datetimes as epoch millis
            for field in datetime_fields {
                if let Some(millis) = rec.get(field).and_then(Value::as_i64) {
                    if let Some(iso) = epoch_millis_to_iso(millis) {
                        rec.insert(field.clone(), Value::String(iso));
                    }
                }
            }
        }

        if rec.get("IsDeleted").and_then(Value::as_bool).unwrap_or(false) {
            if let Some(id) = rec.get("Id").and_then(Value::as_str) {
                let deleted = ctx
                    .driver
                    .delete(&mut *conn, sobject_name, canonical_id(id))
                    .await;
                counts.deletes += deleted?;
            }
            continue;
        }

        let row = transformer.parse(&rec)?;
        let applied = ctx.driver.upsert(&mut *conn, sobject_name, &row).await;
        let (inserted, updated) = applied?;
        if inserted {
            counts.inserts += 1;
        }
        if updated {
            counts.updates += 1;
        }
        if inserted || updated {
            uncommitted += 1;
            let processed = counts.inserts + counts.updates;
            if processed % PROGRESS_INTERVAL == 0 {
                tracing::info!("{} processed {}", sobject_name, processed);
            }
            if uncommitted >= COMMIT_BATCH {
                let committed = ctx.driver.commit(&mut *conn).await;
                committed?;
                let began = ctx.driver.begin(&mut *conn).await;
                began?;
                uncommitted = 0;
            }
        }
    }
    Ok(())
    })
}

/// Tombstone backstop: diff the local and remote id sets and purge locally
/// orphaned rows. The id dumps go through temp files that are removed on
/// every exit path.
fn scrub_deletes<'a>(
    ctx: &'a Context,
    conn: &'a mut PgConnection,
    sobject_name: &'a str,
) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + 'a>> {
    Box::pin(async move {
    let mut local_file = NamedTempFile::new()?;
    {
        let mut writer = BufWriter::new(local_file.as_file_mut());
        ctx.driver.dump_ids(sobject_name, &mut writer).await?;
        writer.flush()?;
    }

    let mut remote_file = NamedTempFile::new()?;
    {
        let mut writer = BufWriter::new(remote_file.as_file_mut());
        ctx.remote.dump_ids(sobject_name, &mut writer).await?;
        writer.flush()?;
    }

    let local = read_id_set(local_file.path())?;
    let remote = read_id_set(remote_file.path())?;

    let mut deleted = 0u64;
    for id in local.difference(&remote) {
        let removed = ctx.driver.delete(&mut *conn, sobject_name, id).await;
        deleted += removed?;
    }
    Ok(deleted)
    })
}

fn read_id_set(path: &Path) -> Result<HashSet<String>> {
    let reader = BufReader::new(std::fs::File::open(path)?);
    let mut ids = HashSet::new();
    for line in reader.lines() {
        let line = line?;
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            ids.insert(trimmed.to_string());
        }
    }
    Ok(ids)
}
