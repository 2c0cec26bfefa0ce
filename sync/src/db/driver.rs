//! PostgreSQL schema driver.
//!
//! Everything that talks SQL lives here: bootstrap metadata tables,
//! introspection, DDL generation and execution, index maintenance, the
//! watermark lookup, job/stats lifecycle, and the COPY-based bulk paths.
//! Row application (upsert/delete) is in the sibling `apply` module.

use crate::config::ConnectionProfile;
use crate::db::pool::{create_pool, Pool};
use crate::error::Result;
use chrono::NaiveDateTime;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use futures::TryStreamExt;
use gurglefish_engine::{map_column, ColumnMap, SObjectFields};
use sqlx::postgres::{PgPoolCopyExt, PgRow};
use sqlx::{PgConnection, Row};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Mutex;

/// One live column of a mirrored table, in ordinal order.
#[derive(Debug, Clone)]
pub struct TableField {
    pub column_name: String,
    pub data_type: String,
    pub character_maximum_length: Option<i32>,
    pub ordinal_position: i32,
}

impl<'r> sqlx::FromRow<'r, PgRow> for TableField {
    fn from_row(row: &'r PgRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(TableField {
            column_name: row.try_get("column_name")?,
            data_type: row.try_get("data_type")?,
            character_maximum_length: row.try_get("character_maximum_length")?,
            ordinal_position: row.try_get("ordinal_position")?,
        })
    }
}

/// Database-facing operations, bound to one profile's schema.
pub struct SchemaDriver {
    pool: Pool,
    schema: String,
    table_fields: Mutex<HashMap<String, Vec<TableField>>>,
}

impl SchemaDriver {
    /// Open a pool bound to the profile's schema and ensure the bootstrap
    /// tables exist. Idempotent.
    pub async fn connect(profile: &ConnectionProfile) -> Result<Self> {
        let pool = create_pool(profile).await?;
        let driver = Self {
            pool,
            schema: profile.schema().to_string(),
            table_fields: Mutex::new(HashMap::new()),
        };
        driver.verify_db_setup().await?;
        Ok(driver)
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Schema-qualified table name.
    pub fn fq(&self, table: &str) -> String {
        format!("\"{}\".\"{}\"", self.schema, table.to_lowercase())
    }

    async fn verify_db_setup(&self) -> Result<()> {
        self.exec_ddl(&format!("CREATE SCHEMA IF NOT EXISTS \"{}\"", self.schema))
            .await?;
        if !self.table_exists("sync_jobs").await? {
            self.exec_ddl(&format!(
                "create table {} ( \
                   id          serial primary key, \
                   date_start  timestamp not null default now(), \
                   date_finish timestamp )",
                self.fq("sync_jobs")
            ))
            .await?;
        }
        if !self.table_exists("sync_stats").await? {
            self.exec_ddl(&format!(
                "create table {stats} ( \
                   id         serial primary key, \
                   jobid      integer references {jobs}(id) on delete cascade, \
                   table_name text not null, \
                   inserts    numeric(8) not null, \
                   updates    numeric(8) not null, \
                   deletes    numeric(8) not null, \
                   api_calls  numeric(8) not null, \
                   sync_start timestamp not null default now(), \
                   sync_end   timestamp not null default now(), \
                   sync_since timestamp not null )",
                stats = self.fq("sync_stats"),
                jobs = self.fq("sync_jobs")
            ))
            .await?;
        }
        if !self.table_exists("schema_chg").await? {
            self.exec_ddl(&format!(
                "create table {} ( \
                   id         serial primary key, \
                   table_name text not null, \
                   col_name   text not null, \
                   operation  text not null, \
                   date_added timestamp not null default now() )",
                self.fq("schema_chg")
            ))
            .await?;
        }
        Ok(())
    }

    pub async fn exec_ddl(&self, ddl: &str) -> Result<()> {
        sqlx::raw_sql(ddl).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn table_exists(&self, table: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "select count(*) from information_schema.tables \
             where table_name = $1 and table_schema = $2",
        )
        .bind(table.to_lowercase())
        .bind(&self.schema)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    /// Column names of a mirrored table, sorted by name.
    pub async fn get_db_columns(&self, table: &str) -> Result<Vec<String>> {
        let names: Vec<String> = sqlx::query_scalar(
            "select column_name::text from information_schema.columns \
             where table_name = $1 and table_schema = $2 order by column_name",
        )
        .bind(table.to_lowercase())
        .bind(&self.schema)
        .fetch_all(&self.pool)
        .await?;
        Ok(names)
    }

    /// Live columns in ordinal order, cached per table.
    pub async fn get_table_fields(&self, table: &str) -> Result<Vec<TableField>> {
        let table = table.to_lowercase();
        if let Some(fields) = self.table_fields.lock().unwrap().get(&table) {
            return Ok(fields.clone());
        }
        let fields: Vec<TableField> = sqlx::query_as(
            "select column_name::text, data_type::text, \
                    character_maximum_length::int4, ordinal_position::int4 \
             from information_schema.columns \
             where table_name = $1 and table_schema = $2 \
             order by ordinal_position",
        )
        .bind(&table)
        .bind(&self.schema)
        .fetch_all(&self.pool)
        .await?;
        self.table_fields
            .lock()
            .unwrap()
            .insert(table, fields.clone());
        Ok(fields)
    }

    fn invalidate_table_fields(&self, table: &str) {
        self.table_fields.lock().unwrap().remove(&table.to_lowercase());
    }

    /// Generate the column maps and CREATE TABLE statement for an sobject.
    pub fn make_create_table(
        &self,
        fields: &SObjectFields,
        sobject_name: &str,
    ) -> Result<(String, Vec<ColumnMap>, String)> {
        let table_name = sobject_name.to_lowercase();
        let mut columns = Vec::new();
        let mut tablecols = Vec::new();
        for field in fields.iter() {
            if let Some(col) = map_column(&table_name, field)? {
                tablecols.push(format!("  {} {}", col.db_field, col.dml));
                columns.push(col);
            }
        }
        let ddl = format!(
            "create table {} ( \n{} )\n",
            self.fq(&table_name),
            tablecols.join(",\n")
        );
        Ok((table_name, columns, ddl))
    }

    /// Add columns for new remote fields, recording each in `schema_chg`.
    pub async fn alter_table_add_columns(
        &self,
        new_fields: &[gurglefish_engine::FieldDescriptor],
        sobject_name: &str,
    ) -> Result<Vec<ColumnMap>> {
        let mut newcols = Vec::new();
        for field in new_fields {
            let Some(col) = map_column(sobject_name, field)? else {
                continue;
            };
            tracing::info!("adding column {} to {}", col.db_field, self.fq(sobject_name));
            self.exec_ddl(&format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                self.fq(sobject_name),
                col.db_field,
                col.dml
            ))
            .await?;
            self.insert_schema_change(sobject_name, &col.db_field, "create")
                .await?;
            newcols.push(col);
        }
        self.invalidate_table_fields(sobject_name);
        Ok(newcols)
    }

    /// Drop local columns no longer present remotely.
    pub async fn alter_table_drop_columns(
        &self,
        drop_field_names: &[String],
        sobject_name: &str,
    ) -> Result<()> {
        for field in drop_field_names {
            tracing::info!("dropping column {} from {}", field, sobject_name);
            self.exec_ddl(&format!(
                "ALTER TABLE {} DROP COLUMN {}",
                self.fq(sobject_name),
                field
            ))
            .await?;
            self.insert_schema_change(sobject_name, field, "drop").await?;
        }
        self.invalidate_table_fields(sobject_name);
        Ok(())
    }

    /// Index external-id, id-lookup, and SystemModStamp columns.
    ///
    /// The id column is excluded: it is already the primary key.
    pub async fn maintain_indexes(&self, sobject_name: &str, fields: &SObjectFields) -> Result<()> {
        for field in fields.iter() {
            let indexed =
                field.external_id || field.id_lookup || field.name == "SystemModStamp";
            if !indexed || field.name.eq_ignore_ascii_case("id") {
                continue;
            }
            let col = field.name.to_lowercase();
            self.exec_ddl(&format!(
                "CREATE INDEX IF NOT EXISTS {}_{} ON {} ({})",
                sobject_name.to_lowercase(),
                col,
                self.fq(sobject_name),
                col
            ))
            .await?;
            tracing::info!("created index {}_{}", sobject_name.to_lowercase(), col);
        }
        Ok(())
    }

    /// Current watermark; `None` means the table has never been loaded.
    pub async fn max_timestamp(&self, table: &str) -> Result<Option<NaiveDateTime>> {
        let stamp: Option<NaiveDateTime> =
            sqlx::query_scalar(&format!("select max(systemmodstamp) from {}", self.fq(table)))
                .fetch_one(&self.pool)
                .await?;
        Ok(stamp)
    }

    pub async fn record_count(&self, table: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(&format!("select count(*) from {}", self.fq(table)))
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Stream the sorted id set of a local table to a writer, one per line.
    pub async fn dump_ids<W: Write>(&self, table: &str, out: &mut W) -> Result<u64> {
        let sql = format!("select id from {} order by id", self.fq(table));
        let mut rows = sqlx::query_scalar::<_, String>(&sql).fetch(&self.pool);
        let mut count = 0u64;
        while let Some(id) = rows.try_next().await? {
            writeln!(out, "{}", id.trim_end())?;
            count += 1;
        }
        Ok(count)
    }

    /// Load a previously exported gzip stream through COPY.
    pub async fn import_native(&self, table: &str, path: &Path) -> Result<u64> {
        let mut reader = GzDecoder::new(std::fs::File::open(path)?);
        let mut copy = self
            .pool
            .copy_in_raw(&format!("COPY {} FROM STDIN", self.fq(table)))
            .await?;
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            copy.send(&buf[..n]).await?;
        }
        Ok(copy.finish().await?)
    }

    /// Dump a local table to a compressed file through COPY.
    pub async fn export_native(&self, table: &str, path: &Path) -> Result<()> {
        let mut encoder = GzEncoder::new(std::fs::File::create(path)?, Compression::new(6));
        let mut copy = self
            .pool
            .copy_out_raw(&format!("COPY {} TO STDOUT", self.fq(table)))
            .await?;
        while let Some(chunk) = copy.try_next().await? {
            encoder.write_all(&chunk)?;
        }
        encoder.finish()?;
        Ok(())
    }

    pub async fn start_sync_job(&self) -> Result<i32> {
        let row: (i32,) = sqlx::query_as(&format!(
            "insert into {} (date_start) values (now()) returning id",
            self.fq("sync_jobs")
        ))
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    pub async fn finish_sync_job(&self, jobid: i32) -> Result<()> {
        sqlx::query(&format!(
            "update {} set date_finish = now() where id = $1",
            self.fq("sync_jobs")
        ))
        .bind(jobid)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn insert_sync_stats(
        &self,
        jobid: i32,
        table_name: &str,
        sync_start: NaiveDateTime,
        sync_end: NaiveDateTime,
        sync_since: Option<NaiveDateTime>,
        inserts: u64,
        updates: u64,
        deletes: u64,
        api_calls: u64,
    ) -> Result<()> {
        let sync_since =
            sync_since.unwrap_or_else(|| chrono::DateTime::<chrono::Utc>::UNIX_EPOCH.naive_utc());
        sqlx::query(&format!(
            "insert into {} (jobid, table_name, inserts, updates, deletes, \
             sync_start, sync_end, sync_since, api_calls) \
             values ($1,$2,$3,$4,$5,$6,$7,$8,$9)",
            self.fq("sync_stats")
        ))
        .bind(jobid)
        .bind(table_name)
        .bind(inserts as i64)
        .bind(updates as i64)
        .bind(deletes as i64)
        .bind(sync_start)
        .bind(sync_end)
        .bind(sync_since)
        .bind(api_calls as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete sync jobs older than the cutoff; their stats rows cascade.
    pub async fn clean_house(&self, cutoff: NaiveDateTime) -> Result<()> {
        sqlx::query(&format!(
            "delete from {} where date_start < $1",
            self.fq("sync_jobs")
        ))
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_schema_change(
        &self,
        table_name: &str,
        col_name: &str,
        operation: &str,
    ) -> Result<()> {
        sqlx::query(&format!(
            "insert into {} (table_name, col_name, operation) values ($1,$2,$3)",
            self.fq("schema_chg")
        ))
        .bind(table_name.to_lowercase())
        .bind(col_name)
        .bind(operation)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Explicit transaction control for a worker's record loop.
    pub async fn begin(&self, conn: &mut PgConnection) -> Result<()> {
        sqlx::raw_sql("BEGIN").execute(conn).await?;
        Ok(())
    }

    pub async fn commit(&self, conn: &mut PgConnection) -> Result<()> {
        sqlx::raw_sql("COMMIT").execute(conn).await?;
        Ok(())
    }

    pub async fn rollback(&self, conn: &mut PgConnection) -> Result<()> {
        sqlx::raw_sql("ROLLBACK").execute(conn).await?;
        Ok(())
    }
}
