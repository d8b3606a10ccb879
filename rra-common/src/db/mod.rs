//! Persistence store: schema, migrations, and leg/item queries

pub mod init;
pub mod items;
pub mod legs;
pub mod migrations;
pub mod models;
pub mod retry;
pub mod schema_sync;
pub mod table_schemas;

pub use init::*;
pub use items::*;
pub use legs::*;
pub use migrations::*;
pub use models::*;
pub use retry::*;
pub use schema_sync::*;
pub use table_schemas::*;
