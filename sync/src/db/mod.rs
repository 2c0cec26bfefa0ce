//! Database access layer.

mod apply;
mod driver;
mod pool;

pub use driver::{SchemaDriver, TableField};
pub use pool::{create_pool, Pool};
