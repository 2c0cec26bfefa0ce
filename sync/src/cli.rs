//! Command-line surface.

use clap::{ArgGroup, Parser};
use std::io;
use std::path::Path;

/// Mirror Salesforce sobjects into PostgreSQL.
#[derive(Parser, Debug)]
#[command(name = "gurglefish", version)]
#[command(about = "Mirror Salesforce sobjects into PostgreSQL")]
#[command(after_help = "@file arguments designate a file containing actual arguments, one per line")]
#[command(group = ArgGroup::new("action").multiple(false))]
pub struct Args {
    /// Environment/DB settings name
    #[arg(value_name = "env_name")]
    pub env: String,

    /// sync table updates
    #[arg(long, num_args = 0.., value_name = "sobject|@file", group = "action")]
    pub sync: Option<Vec<String>>,

    /// load sobject schema and create tables if missing
    #[arg(long, num_args = 0.., value_name = "sobject|@file", group = "action")]
    pub schema: Option<Vec<String>>,

    /// export full sobject data to file
    #[arg(long, num_args = 1.., value_name = "sobject|@file", group = "action")]
    pub export: Option<Vec<String>>,

    /// load/import full table data, table must be empty
    #[arg(long, num_args = 1.., value_name = "sobject|@file", group = "action")]
    pub load: Option<Vec<String>>,

    /// dump contents of table to file
    #[arg(long, num_args = 1.., value_name = "table|@file", group = "action")]
    pub dump: Option<Vec<String>>,

    /// create config.json file for given environment
    #[arg(long, group = "action")]
    pub init: bool,

    /// list available sobjects
    #[arg(long)]
    pub inspect: bool,

    /// enable one or more tables to sync
    #[arg(long, num_args = 1.., value_name = "sobject|@file")]
    pub enable: Option<Vec<String>>,

    /// disable one or more tables from sync
    #[arg(long, num_args = 1.., value_name = "sobject|@file")]
    pub disable: Option<Vec<String>>,

    /// force scrub of deleted records
    #[arg(long)]
    pub scrub: bool,
}

/// Expand `@file` arguments into the names listed in the file, one per line.
pub fn make_arg_list(args: &[String]) -> io::Result<Vec<String>> {
    let mut processed = Vec::new();
    for arg in args {
        if arg.is_empty() {
            continue;
        }
        if let Some(path) = arg.strip_prefix('@') {
            processed.extend(load_file_items(Path::new(path))?);
        } else {
            processed.push(arg.clone());
        }
    }
    Ok(processed)
}

fn load_file_items(path: &Path) -> io::Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}
