//! Durable Store (spec §3/§6): rusqlite behind an r2d2 pool, migrated
//! with `PRAGMA user_version`, implementing `ocn_domain::interfaces::DurableStore`.

pub mod backup;
pub mod schema;
pub mod store;

pub use store::SqliteStore;
