//! Shared per-run context.
//!
//! No process-wide singletons: every component receives the context
//! explicitly. Workers share it behind an `Arc`; the profile is immutable
//! after load and each database statement acquires its own connection.

use crate::config::ConnectionProfile;
use crate::db::SchemaDriver;
use crate::remote::RestClient;
use crate::store::FileStore;

/// Everything a worker needs to sync or export one sobject.
pub struct Context {
    pub profile: ConnectionProfile,
    pub store: FileStore,
    pub driver: SchemaDriver,
    pub remote: RestClient,
}
