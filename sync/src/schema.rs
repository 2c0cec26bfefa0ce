//! Schema reconciliation.
//!
//! On every sync the remote field set is compared against the live local
//! columns. New fields become columns (policy permitting); vanished fields
//! are dropped or, when auto-drop is disabled, block the sobject for this
//! run. Whenever the column set changes, the persisted column map, SELECT
//! statement, and transform recipe are regenerated together.

use crate::context::Context;
use crate::error::{Result, SyncError};
use crate::store::TableConfig;
use gurglefish_engine::{soql, ColumnMap, FieldDescriptor, SObjectFields, SObjectSummary, Transformer};
use std::collections::BTreeSet;

/// Whether a reconciled sobject may sync this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Proceed,
    /// Policy denied a required schema change; skip the sobject this run
    Skip,
}

/// Schema-level operations for one environment.
pub struct SchemaManager<'a> {
    ctx: &'a Context,
}

impl<'a> SchemaManager<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    /// Eligible remote sobjects, after the built-in rules and any literal
    /// name filters.
    pub async fn inspect(&self) -> Result<Vec<SObjectSummary>> {
        let filters = self.ctx.store.filters();
        let list = self.ctx.remote.sobject_list().await?;
        Ok(list.into_iter().filter(|s| s.eligible(&filters)).collect())
    }

    /// Generate the initial `config.json` with every eligible sobject
    /// disabled. Refuses to clobber an existing configuration.
    pub async fn initialize_config(&self) -> Result<()> {
        if self.ctx.store.load_table_configs()?.is_some() {
            return Err(SyncError::AlreadyInitialized(self.ctx.profile.id.clone()));
        }
        let configs: Vec<TableConfig> = self
            .inspect()
            .await?
            .iter()
            .map(|s| TableConfig::disabled(&s.name))
            .collect();
        self.ctx.store.save_table_configs(&configs)?;
        tracing::info!("initial configuration created for {}", self.ctx.profile.id);
        Ok(())
    }

    /// Toggle the enabled flag on the named tables.
    pub fn enable_tables(&self, table_names: &[String], flag: bool) -> Result<()> {
        let mut configs = self
            .ctx
            .store
            .load_table_configs()?
            .ok_or_else(|| SyncError::ConfigMissing("config.json (run --init first)".into()))?;
        let wanted: BTreeSet<String> = table_names.iter().map(|n| n.to_lowercase()).collect();
        for entry in configs.iter_mut() {
            if wanted.contains(&entry.name) {
                tracing::info!("setting {} sync to {}", entry.name, flag);
                entry.enabled = flag;
            }
        }
        self.ctx.store.save_table_configs(&configs)
    }

    /// Prepare every enabled sobject.
    pub async fn prepare_configured(&self) -> Result<()> {
        let configs = self
            .ctx
            .store
            .load_table_configs()?
            .ok_or_else(|| SyncError::ConfigMissing("config.json (run --init first)".into()))?;
        let names: Vec<String> = configs
            .iter()
            .filter(|t| t.enabled)
            .map(|t| t.name.clone())
            .collect();
        self.prepare_sobjects(&names).await
    }

    /// Prepare the named sobjects, creating tables as needed.
    pub async fn prepare_sobjects(&self, names: &[String]) -> Result<()> {
        let mut sorted: Vec<String> = names.iter().map(|n| n.to_lowercase()).collect();
        sorted.sort();
        sorted.dedup();
        for name in sorted {
            self.create_table(&name).await?;
        }
        Ok(())
    }

    /// Generate and persist all artifacts for an sobject, creating the
    /// table and its indexes when missing.
    pub async fn create_table(&self, sobject_name: &str) -> Result<()> {
        let sobject_name = sobject_name.to_lowercase();

        let fields = match self.ctx.store.load_fields(&sobject_name)? {
            Some(fields) => fields,
            None => {
                let fields = self.ctx.remote.field_list(&sobject_name).await?;
                self.ctx.store.save_fields(&sobject_name, &fields)?;
                fields
            }
        };

        let (table_name, columns, ddl) = self.ctx.driver.make_create_table(&fields, &sobject_name)?;
        self.ctx.store.save_map(&table_name, &columns)?;
        self.ctx.store.save_table_create(&table_name, &format!("{};\n\n", ddl))?;
        self.persist_query_and_recipe(&table_name, &columns)?;

        if !self.ctx.driver.table_exists(&table_name).await? {
            tracing::info!("creating {}", table_name);
            self.ctx.driver.exec_ddl(&ddl).await?;
            tracing::info!("creating indexes");
            self.ctx.driver.maintain_indexes(&table_name, &fields).await?;
        }
        Ok(())
    }

    /// Compare remote fields against live columns and converge per policy.
    pub async fn reconcile(&self, table: &TableConfig) -> Result<ReconcileOutcome> {
        let sobject_name = table.name.to_lowercase();

        let remote_fields = self.ctx.remote.field_list(&sobject_name).await?;
        let local_columns: BTreeSet<String> = self
            .ctx
            .driver
            .get_db_columns(&sobject_name)
            .await?
            .into_iter()
            .collect();
        let remote_names = remote_fields.names();

        let added: Vec<String> = remote_names.difference(&local_columns).cloned().collect();
        let dropped: Vec<String> = local_columns.difference(&remote_names).cloned().collect();

        if !added.is_empty() {
            if !table.auto_create_columns {
                tracing::warn!(
                    "new column found for {}, auto-create disabled, skipping",
                    sobject_name
                );
            } else {
                tracing::info!("new columns found, updating table and indexes");
                let new_defs: Vec<FieldDescriptor> = added
                    .iter()
                    .filter_map(|name| remote_fields.find(name).cloned())
                    .collect();
                let newcols = self
                    .ctx
                    .driver
                    .alter_table_add_columns(&new_defs, &sobject_name)
                    .await?;
                if !newcols.is_empty() {
                    self.ctx
                        .driver
                        .maintain_indexes(&sobject_name, &SObjectFields::new(new_defs))
                        .await?;
                    let mut map = self.ctx.store.load_map(&sobject_name)?;
                    map.extend(newcols);
                    self.ctx.store.save_map(&sobject_name, &map)?;
                    self.persist_query_and_recipe(&sobject_name, &map)?;
                    self.ctx.store.save_fields(&sobject_name, &remote_fields)?;
                }
            }
        }

        if !dropped.is_empty() {
            if !table.auto_drop_columns {
                // do not sync until the drop is allowed or reverted
                tracing::warn!(
                    "dropped column detected for {}, auto-drop disabled, skipping",
                    sobject_name
                );
                return Ok(ReconcileOutcome::Skip);
            }
            tracing::info!("dropped column(s) detected");
            self.ctx
                .driver
                .alter_table_drop_columns(&dropped, &sobject_name)
                .await?;
            let dropped_set: BTreeSet<&String> = dropped.iter().collect();
            let map: Vec<ColumnMap> = self
                .ctx
                .store
                .load_map(&sobject_name)?
                .into_iter()
                .filter(|col| !dropped_set.contains(&col.db_field))
                .collect();
            self.ctx.store.save_map(&sobject_name, &map)?;
            self.persist_query_and_recipe(&sobject_name, &map)?;
            self.ctx.store.save_fields(&sobject_name, &remote_fields)?;
        }

        Ok(ReconcileOutcome::Proceed)
    }

    /// The SELECT statement and transform recipe always mirror the map.
    fn persist_query_and_recipe(&self, sobject_name: &str, map: &[ColumnMap]) -> Result<()> {
        let field_names: Vec<String> = map.iter().map(|c| c.sobject_field.clone()).collect();
        let select = soql::make_select_statement(&field_names, sobject_name);
        self.ctx.store.save_query(sobject_name, &select)?;
        let transformer = Transformer::from_columns(map);
        self.ctx.store.save_recipe(sobject_name, transformer.entries())
    }
}
