//! Gurglefish - mirror Salesforce sobjects into PostgreSQL.
//!
//! Maintains schema parity with the remote org, pulls incremental changes
//! driven by the SystemModStamp watermark, and bulk-exports/loads full
//! tables. See `--help` for the command surface.

mod cli;
mod config;
mod context;
mod db;
mod error;
mod export;
mod remote;
mod schema;
mod store;
mod sync;

use crate::cli::{make_arg_list, Args};
use crate::config::Connections;
use crate::context::Context;
use crate::db::SchemaDriver;
use crate::error::{Result, SyncError};
use crate::export::ExportEngine;
use crate::remote::RestClient;
use crate::schema::SchemaManager;
use crate::store::FileStore;
use crate::sync::SyncEngine;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gurglefish=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let args = Args::parse();

    if let Err(err) = run(args).await {
        tracing::error!("{}", err);
        std::process::exit(err.exit_code());
    }
}

async fn run(args: Args) -> Result<()> {
    let basedir = config::storage_dir();
    let connections = Connections::load(&basedir)?;
    let profile = connections
        .get(&args.env)
        .ok_or_else(|| SyncError::ConfigMissing(format!("no connection profile named {}", args.env)))?
        .clone();
    if profile.dbvendor != "postgresql" {
        return Err(SyncError::UnsupportedVendor(profile.dbvendor.clone()));
    }

    let store = FileStore::new(&basedir, &args.env)?;
    let remote = RestClient::login(
        &profile.consumer_key,
        &profile.consumer_secret,
        &profile.login,
        &profile.password,
        &profile.authurl,
    )
    .await?;
    let driver = SchemaDriver::connect(&profile).await?;
    let ctx = Arc::new(Context {
        profile,
        store,
        driver,
        remote,
    });
    let schema_mgr = SchemaManager::new(&ctx);

    if args.init {
        schema_mgr.initialize_config().await?;
        return Ok(());
    }

    if args.inspect {
        for entry in schema_mgr.inspect().await? {
            tracing::info!("{} [{}]", entry.name, entry.package());
        }
        return Ok(());
    }

    if let Some(names) = &args.enable {
        schema_mgr.enable_tables(&make_arg_list(names)?, true)?;
        return Ok(());
    }

    if let Some(names) = &args.disable {
        schema_mgr.enable_tables(&make_arg_list(names)?, false)?;
        return Ok(());
    }

    if args.sync.is_some() {
        SyncEngine::new(Arc::clone(&ctx)).sync_tables(args.scrub).await?;
    }

    if let Some(names) = &args.schema {
        if names.is_empty() {
            schema_mgr.prepare_configured().await?;
        } else {
            schema_mgr.prepare_sobjects(&make_arg_list(names)?).await?;
        }
    }

    if let Some(names) = &args.export {
        ExportEngine::new(Arc::clone(&ctx))
            .export_tables(&make_arg_list(names)?)
            .await?;
    }

    if let Some(names) = &args.dump {
        let engine = ExportEngine::new(Arc::clone(&ctx));
        for table in make_arg_list(names)? {
            engine.dump_table(&table).await?;
        }
    }

    if let Some(names) = &args.load {
        let engine = ExportEngine::new(Arc::clone(&ctx));
        for table in make_arg_list(names)? {
            tracing::info!("loading {}", table);
            let count = engine.bulk_load(&table).await?;
            tracing::info!("loaded {} records", count);
        }
    }

    Ok(())
}
