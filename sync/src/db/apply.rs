//! Row application: change-minimal upsert and idempotent delete.
//!
//! The upsert contract is the heart of the watermark discipline: applying a
//! row that is already present and unchanged issues no DML at all, and a row
//! that differs updates exactly the changed columns. Re-reading records that
//! share the watermark stamp is therefore harmless.

use crate::db::driver::SchemaDriver;
use crate::error::{Result, SyncError};
use gurglefish_engine::{CellValue, TransformedRow};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{PgConnection, Postgres, Row};
use std::collections::HashSet;

impl SchemaDriver {
    /// Insert or minimally update one transformed row.
    ///
    /// Returns `(inserted, updated)`; `(false, false)` means the stored row
    /// already matched and nothing was written.
    pub async fn upsert(
        &self,
        conn: &mut PgConnection,
        table: &str,
        row: &TransformedRow,
    ) -> Result<(bool, bool)> {
        let pkey = row
            .id()
            .ok_or_else(|| SyncError::RowWithoutId(table.to_string()))?
            .to_string();

        // only columns present in both the incoming row and the live table
        let live: HashSet<String> = self
            .get_table_fields(table)
            .await?
            .into_iter()
            .map(|f| f.column_name)
            .collect();
        let cells: Vec<&(String, CellValue)> = row
            .cells()
            .iter()
            .filter(|(name, _)| live.contains(name))
            .collect();

        let collist: Vec<&str> = cells.iter().map(|(name, _)| name.as_str()).collect();
        let select = format!(
            "select {} from {} where id = $1",
            collist.join(", "),
            self.fq(table)
        );
        let existing = sqlx::query(&select)
            .bind(&pkey)
            .fetch_optional(&mut *conn)
            .await?;

        match existing {
            None => {
                let placeholders: Vec<String> =
                    (1..=cells.len()).map(|i| format!("${}", i)).collect();
                let sql = format!(
                    "insert into {} ({}) values ({})",
                    self.fq(table),
                    collist.join(", "),
                    placeholders.join(", ")
                );
                let mut query = sqlx::query(&sql);
                for (_, cell) in &cells {
                    query = bind_cell(query, cell);
                }
                query.execute(&mut *conn).await?;
                Ok((true, false))
            }
            Some(stored) => {
                let mut changed: Vec<&(String, CellValue)> = Vec::new();
                for (idx, &entry) in cells.iter().enumerate() {
                    let (name, cell) = entry;
                    if name == "id" {
                        continue;
                    }
                    if decode_cell(&stored, idx, cell)? != *cell {
                        changed.push(entry);
                    }
                }
                if changed.is_empty() {
                    // overlapping watermark re-read with nothing new
                    return Ok((false, false));
                }

                let sets: Vec<String> = changed
                    .iter()
                    .enumerate()
                    .map(|(i, (name, _))| format!("{} = ${}", name, i + 1))
                    .collect();
                let sql = format!(
                    "update {} set {} where id = ${}",
                    self.fq(table),
                    sets.join(", "),
                    changed.len() + 1
                );
                let mut query = sqlx::query(&sql);
                for (_, cell) in &changed {
                    query = bind_cell(query, cell);
                }
                query.bind(&pkey).execute(&mut *conn).await?;
                Ok((false, true))
            }
        }
    }

    /// Delete by canonical id; deleting an absent key is a no-op.
    pub async fn delete(&self, conn: &mut PgConnection, table: &str, key: &str) -> Result<u64> {
        let sql = format!("delete from {} where id = $1", self.fq(table));
        let result = sqlx::query(&sql).bind(key).execute(conn).await?;
        Ok(result.rows_affected())
    }
}

/// Bind a typed cell (or its typed null) as the next parameter.
fn bind_cell<'q>(
    query: Query<'q, Postgres, PgArguments>,
    cell: &CellValue,
) -> Query<'q, Postgres, PgArguments> {
    match cell {
        CellValue::Text(v) => query.bind(v.clone()),
        CellValue::Int(v) => query.bind(*v),
        CellValue::Bool(v) => query.bind(*v),
        CellValue::Date(v) => query.bind(*v),
        CellValue::Timestamp(v) => query.bind(*v),
        CellValue::Time(v) => query.bind(*v),
        CellValue::Numeric(v) => query.bind(*v),
    }
}

/// Decode a stored column with the same shape as the incoming cell.
fn decode_cell(row: &PgRow, idx: usize, like: &CellValue) -> Result<CellValue> {
    Ok(match like {
        CellValue::Text(_) => CellValue::Text(row.try_get(idx)?),
        CellValue::Int(_) => CellValue::Int(row.try_get::<Option<i32>, _>(idx)?.map(i64::from)),
        CellValue::Bool(_) => CellValue::Bool(row.try_get(idx)?),
        CellValue::Date(_) => CellValue::Date(row.try_get(idx)?),
        CellValue::Timestamp(_) => CellValue::Timestamp(row.try_get(idx)?),
        CellValue::Time(_) => CellValue::Time(row.try_get(idx)?),
        CellValue::Numeric(_) => CellValue::Numeric(row.try_get(idx)?),
    })
}
