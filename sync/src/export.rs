//! Full-table export, bulk load, and raw dump.
//!
//! Exports stream records through the per-sobject transformer into a
//! compressed tab-delimited file, field order matching the local table, so
//! the output loads straight back through the database's COPY path. The
//! record set is never materialized.

use crate::context::Context;
use crate::error::{Result, SyncError};
use crate::remote::{RecordSource, PK_CHUNK_THRESHOLD};
use crate::schema::SchemaManager;
use flate2::write::GzEncoder;
use flate2::Compression;
use gurglefish_engine::{epoch_millis_to_iso, export, soql, TransformKind, Transformer};
use serde_json::Value;
use std::collections::VecDeque;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const PROGRESS_INTERVAL: u64 = 5_000;
const BULK_START_TIMEOUT: Duration = Duration::from_secs(600);

/// Parallel full-table exporters.
pub struct ExportEngine {
    ctx: Arc<Context>,
}

impl ExportEngine {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    /// Export each named table, drawing from a shared queue with up to four
    /// workers.
    pub async fn export_tables(&self, table_names: &[String]) -> Result<()> {
        let tables: VecDeque<String> =
            table_names.iter().map(|name| name.to_lowercase()).collect();
        if tables.is_empty() {
            return Ok(());
        }
        let workers = self.ctx.profile.workers().min(tables.len());
        let queue = Arc::new(Mutex::new(tables));

        tracing::info!("allocating {} worker(s)", workers);
        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let ctx = Arc::clone(&self.ctx);
            let queue = Arc::clone(&queue);
            handles.push(tokio::spawn(async move {
                loop {
                    let Some(table) = queue.lock().unwrap().pop_front() else {
                        break;
                    };
                    if let Err(err) = export_one(&ctx, &table).await {
                        tracing::error!("worker {}: export of {} failed: {}", worker, table, err);
                    }
                }
            }));
        }
        for handle in handles {
            if let Err(err) = handle.await {
                tracing::error!("export worker panicked: {}", err);
            }
        }
        Ok(())
    }

    /// Load a previously exported file into its table via COPY.
    ///
    /// The table is created when missing and must be empty.
    pub async fn bulk_load(&self, table_name: &str) -> Result<u64> {
        let sobject_name = table_name.to_lowercase();
        if !self.ctx.driver.table_exists(&sobject_name).await? {
            SchemaManager::new(&self.ctx).create_table(&sobject_name).await?;
        } else if self.ctx.driver.record_count(&sobject_name).await? > 0 {
            return Err(SyncError::TableNotEmpty(sobject_name));
        }
        self.ctx
            .driver
            .import_native(&sobject_name, &self.ctx.store.export_path(&sobject_name))
            .await
    }

    /// Raw COPY dump of a local table to a compressed file.
    pub async fn dump_table(&self, table_name: &str) -> Result<()> {
        let sobject_name = table_name.to_lowercase();
        self.ctx
            .driver
            .export_native(&sobject_name, &self.ctx.store.export_path(&sobject_name))
            .await
    }
}

async fn export_one(ctx: &Context, table_name: &str) -> Result<()> {
    let sobject_name = table_name.to_lowercase();

    let configs = ctx
        .store
        .load_table_configs()?
        .ok_or_else(|| SyncError::ConfigMissing("config.json (run --init first)".into()))?;
    let Some(config) = configs.iter().find(|t| t.name == sobject_name) else {
        tracing::error!(
            "configuration for {} not found in config.json - skipping",
            sobject_name
        );
        return Ok(());
    };

    if !ctx.driver.table_exists(&sobject_name).await? {
        SchemaManager::new(ctx).create_table(&sobject_name).await?;
    }

    let total = ctx.remote.record_count(&sobject_name, None).await?;
    let map = ctx.store.load_map(&sobject_name)?;
    let transformer = Transformer::from_columns(&map);
    let datetime_fields: Vec<String> = transformer
        .entries()
        .iter()
        .filter(|e| e.kind == TransformKind::Timestamp)
        .map(|e| e.sobject_field.clone())
        .collect();

    // output field order follows the live table's ordinal positions
    let ordered_columns: Vec<String> = ctx
        .driver
        .get_table_fields(&sobject_name)
        .await?
        .into_iter()
        .map(|f| f.column_name)
        .collect();

    let field_names: Vec<String> = map.iter().map(|c| c.sobject_field.clone()).collect();
    let statement = soql::make_select_statement(&field_names, &sobject_name);

    let file = std::fs::File::create(ctx.store.export_path(&sobject_name))?;
    let mut encoder = GzEncoder::new(file, Compression::new(6));

    let mut source = if config.bulkapi {
        tracing::info!(
            "exporting {} records in {} using bulk query (may take longer)",
            total,
            sobject_name
        );
        RecordSource::Bulk(
            ctx.remote
                .bulk_query(
                    &sobject_name,
                    &statement,
                    BULK_START_TIMEOUT,
                    total > PK_CHUNK_THRESHOLD,
                )
                .await?,
        )
    } else {
        tracing::info!("exporting {}", sobject_name);
        RecordSource::Rest(ctx.remote.query(&statement, false))
    };

    let mut counter = 0u64;
    while let Some(mut rec) = source.next_record().await? {
        if config.bulkapi {
            for field in &datetime_fields {
                if let Some(millis) = rec.get(field).and_then(Value::as_i64) {
                    if let Some(iso) = epoch_millis_to_iso(millis) {
                        rec.insert(field.clone(), Value::String(iso));
                    }
                }
            }
        }
        let row = transformer.parse(&rec)?;
        encoder.write_all(&export::format_for_export(&ordered_columns, &row))?;
        counter += 1;
        if counter % PROGRESS_INTERVAL == 0 && total > 0 {
            tracing::info!(
                "{}: exported {} of {} records ({:.0}%)",
                sobject_name,
                counter,
                total,
                (counter as f64 / total as f64) * 100.0
            );
        }
    }
    encoder.finish()?;
    tracing::info!("exported {} records from {}", counter, sobject_name);
    Ok(())
}
