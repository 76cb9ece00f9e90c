//! Database module: row model and the SQLite record store.
//!
//! - `model`: `LocalRecord` and `SqlValue`, the shape mappers produce.
//! - `repo`: pool setup, migrations, and the `RecordStore` implementation.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{KeyPart, LocalRecord, NaturalKey, SqlValue, CREATED_AT, UPDATED_AT};
