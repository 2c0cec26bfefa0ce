//! Per-environment file store.
//!
//! Every sobject owns a directory of durable artifacts under
//! `db/<env>/schema/<sobject>/`: the raw field dump, the column map, the
//! generated DDL, the transform recipe, and the sync SELECT. Exports land
//! under `db/<env>/export/`. At most one worker touches a given sobject per
//! run, so no file locking is needed.

use crate::error::{Result, SyncError};
use gurglefish_engine::{ColumnMap, FieldDescriptor, RecipeEntry, SObjectFields};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Tombstone reconciliation policy for one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoScrub {
    Always,
    #[default]
    Daily,
    Never,
}

/// Per-table sync configuration, persisted in `config.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableConfig {
    /// Canonical lowercase sobject name
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub auto_create_columns: bool,
    #[serde(default = "default_true")]
    pub auto_drop_columns: bool,
    #[serde(default)]
    pub auto_scrub: AutoScrub,
    #[serde(default)]
    pub bulkapi: bool,
}

fn default_true() -> bool {
    true
}

impl TableConfig {
    /// A freshly discovered table: known but not yet enabled.
    pub fn disabled(name: &str) -> Self {
        Self {
            name: name.to_lowercase(),
            enabled: false,
            auto_create_columns: true,
            auto_drop_columns: true,
            auto_scrub: AutoScrub::default(),
            bulkapi: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ConfigFile {
    configuration: ConfigBody,
}

#[derive(Debug, Serialize, Deserialize)]
struct ConfigBody {
    sobjects: Vec<TableConfig>,
}

/// Durable per-environment artifact store.
#[derive(Debug, Clone)]
pub struct FileStore {
    basedir: PathBuf,
    envname: String,
    schemadir: PathBuf,
    exportdir: PathBuf,
}

impl FileStore {
    pub fn new(basedir: &Path, envname: &str) -> Result<Self> {
        let envdir = basedir.join("db").join(envname);
        let schemadir = envdir.join("schema");
        let exportdir = envdir.join("export");
        fs::create_dir_all(&schemadir)?;
        fs::create_dir_all(&exportdir)?;
        Ok(Self {
            basedir: basedir.to_path_buf(),
            envname: envname.to_string(),
            schemadir,
            exportdir,
        })
    }

    /// Compressed export target for one sobject.
    pub fn export_path(&self, sobject: &str) -> PathBuf {
        self.exportdir.join(format!("{}.exp.gz", sobject.to_lowercase()))
    }

    fn sobject_dir(&self, sobject: &str) -> Result<PathBuf> {
        let dir = self.schemadir.join(sobject.to_lowercase());
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    fn config_path(&self) -> PathBuf {
        self.basedir.join("db").join(&self.envname).join("config.json")
    }

    /// Literal-name filters: one name per line, global file plus per-env file.
    pub fn filters(&self) -> Vec<String> {
        let mut names = read_filter_file(&self.basedir.join("global-filters.txt"));
        names.extend(read_filter_file(
            &self.basedir.join("db").join(&self.envname).join("filters.txt"),
        ));
        names
    }

    pub fn load_fields(&self, sobject: &str) -> Result<Option<SObjectFields>> {
        let path = self.sobject_dir(sobject)?.join(format!("{}.json", sobject.to_lowercase()));
        match fs::read_to_string(path) {
            Ok(raw) => {
                let descriptors: Vec<FieldDescriptor> = serde_json::from_str(&raw)?;
                Ok(Some(SObjectFields::new(descriptors)))
            }
            Err(_) => Ok(None),
        }
    }

    pub fn save_fields(&self, sobject: &str, fields: &SObjectFields) -> Result<()> {
        let path = self.sobject_dir(sobject)?.join(format!("{}.json", sobject.to_lowercase()));
        write_json(&path, fields.descriptors())
    }

    pub fn load_map(&self, sobject: &str) -> Result<Vec<ColumnMap>> {
        let path = self
            .sobject_dir(sobject)?
            .join(format!("{}_map.json", sobject.to_lowercase()));
        let raw = fs::read_to_string(&path)
            .map_err(|_| SyncError::ConfigMissing(path.display().to_string()))?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save_map(&self, sobject: &str, map: &[ColumnMap]) -> Result<()> {
        let path = self
            .sobject_dir(sobject)?
            .join(format!("{}_map.json", sobject.to_lowercase()));
        write_json(&path, map)
    }

    pub fn save_table_create(&self, sobject: &str, ddl: &str) -> Result<()> {
        let path = self.sobject_dir(sobject)?.join(format!("{}.sql", sobject.to_lowercase()));
        fs::write(path, ddl)?;
        Ok(())
    }

    pub fn load_recipe(&self, sobject: &str) -> Result<Vec<RecipeEntry>> {
        let path = self
            .sobject_dir(sobject)?
            .join(format!("{}_transform.json", sobject.to_lowercase()));
        let raw = fs::read_to_string(&path)
            .map_err(|_| SyncError::ConfigMissing(path.display().to_string()))?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save_recipe(&self, sobject: &str, recipe: &[RecipeEntry]) -> Result<()> {
        let path = self
            .sobject_dir(sobject)?
            .join(format!("{}_transform.json", sobject.to_lowercase()));
        write_json(&path, recipe)
    }

    pub fn load_query(&self, sobject: &str) -> Result<String> {
        let path = self.sobject_dir(sobject)?.join("query.soql");
        fs::read_to_string(&path).map_err(|_| SyncError::ConfigMissing(path.display().to_string()))
    }

    pub fn save_query(&self, sobject: &str, soql: &str) -> Result<()> {
        let path = self.sobject_dir(sobject)?.join("query.soql");
        fs::write(path, soql)?;
        Ok(())
    }

    /// `None` when no `config.json` has been generated yet.
    pub fn load_table_configs(&self) -> Result<Option<Vec<TableConfig>>> {
        match fs::read_to_string(self.config_path()) {
            Ok(raw) => {
                let file: ConfigFile = serde_json::from_str(&raw)?;
                Ok(Some(file.configuration.sobjects))
            }
            Err(_) => Ok(None),
        }
    }

    pub fn save_table_configs(&self, configs: &[TableConfig]) -> Result<()> {
        let file = ConfigFile {
            configuration: ConfigBody {
                sobjects: configs.to_vec(),
            },
        };
        write_json(&self.config_path(), &file)
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}

fn read_filter_file(path: &Path) -> Vec<String> {
    match fs::read_to_string(path) {
        Ok(raw) => raw
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect(),
        Err(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn table_config_defaults() {
        let cfg: TableConfig = serde_json::from_value(json!({"name": "account"})).unwrap();
        assert!(!cfg.enabled);
        assert!(cfg.auto_create_columns);
        assert!(cfg.auto_drop_columns);
        assert_eq!(cfg.auto_scrub, AutoScrub::Daily);
        assert!(!cfg.bulkapi);
    }

    #[test]
    fn auto_scrub_parses_lowercase() {
        let cfg: TableConfig =
            serde_json::from_value(json!({"name": "account", "auto_scrub": "always"})).unwrap();
        assert_eq!(cfg.auto_scrub, AutoScrub::Always);
        let cfg: TableConfig =
            serde_json::from_value(json!({"name": "account", "auto_scrub": "never"})).unwrap();
        assert_eq!(cfg.auto_scrub, AutoScrub::Never);
    }

    #[test]
    fn disabled_config_lowercases_name() {
        let cfg = TableConfig::disabled("Account");
        assert_eq!(cfg.name, "account");
        assert!(!cfg.enabled);
    }

    #[test]
    fn artifacts_round_trip() {
        use gurglefish_engine::{map_column, FieldDescriptor, Transformer};

        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path(), "dev").unwrap();

        let descriptor = FieldDescriptor {
            name: "Name".into(),
            field_type: "string".into(),
            length: 255,
            precision: 0,
            scale: 0,
            external_id: false,
            id_lookup: false,
            reference_to: vec![],
            custom: false,
        };
        let fields = SObjectFields::new(vec![descriptor.clone()]);
        store.save_fields("Account", &fields).unwrap();
        assert_eq!(store.load_fields("account").unwrap().unwrap(), fields);

        let col = map_column("account", &descriptor).unwrap().unwrap();
        store.save_map("account", std::slice::from_ref(&col)).unwrap();
        assert_eq!(store.load_map("account").unwrap(), vec![col.clone()]);

        let transformer = Transformer::from_columns(std::slice::from_ref(&col));
        store.save_recipe("account", transformer.entries()).unwrap();
        assert_eq!(store.load_recipe("account").unwrap(), transformer.entries());

        store.save_query("account", "select Name from account").unwrap();
        assert_eq!(store.load_query("account").unwrap(), "select Name from account");
    }

    #[test]
    fn config_json_nests_under_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path(), "dev").unwrap();

        assert!(store.load_table_configs().unwrap().is_none());
        store
            .save_table_configs(&[TableConfig::disabled("account")])
            .unwrap();

        let raw = std::fs::read_to_string(
            dir.path().join("db").join("dev").join("config.json"),
        )
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(value["configuration"]["sobjects"].is_array());

        let configs = store.load_table_configs().unwrap().unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].name, "account");
    }

    #[test]
    fn filters_merge_global_and_env_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path(), "dev").unwrap();
        std::fs::write(dir.path().join("global-filters.txt"), "Account\n\n").unwrap();
        std::fs::write(
            dir.path().join("db").join("dev").join("filters.txt"),
            "  Contact \n",
        )
        .unwrap();

        assert_eq!(store.filters(), vec!["Account", "Contact"]);
    }

    #[test]
    fn missing_filter_files_mean_no_filtering() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path(), "dev").unwrap();
        assert!(store.filters().is_empty());
    }
}
