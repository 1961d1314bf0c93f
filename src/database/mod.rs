//! # Document Store
//!
//! Resource and operation records are JSON documents grouped in collections
//! and identified by `_id`. [`DocumentStore`] is the contract the lifecycle
//! engines and the HA coordinator rely on:
//!
//! - `get_one` / `get_list` read by [`Filter`]
//! - `set_one` applies an [`UpdateMap`] to the first match, atomically with
//!   respect to the filter; it returns whether a document matched, which is
//!   the compare-and-set primitive the HA lock is built on
//! - `del_one` / `del_list` delete by filter
//! - `decrypt` opens field-level secrets for a given salt and schema version
//!
//! [`InMemoryStore`] backs tests and single-process runs; [`PostgresStore`]
//! keeps documents as JSONB rows.

pub mod filter;
pub mod in_memory;
pub mod postgres;
pub mod secrets;
pub mod update;

pub use filter::{Condition, Filter};
pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use secrets::SecretCipher;
pub use update::{apply_update, update_of, UpdateMap};

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::DbError;

pub type DbResult<T> = Result<T, DbError>;

#[async_trait]
pub trait DocumentStore: Send + Sync + std::fmt::Debug {
    async fn get_one(&self, collection: &str, filter: &Filter) -> DbResult<Option<Value>>;

    async fn get_list(&self, collection: &str, filter: &Filter) -> DbResult<Vec<Value>>;

    /// Insert a document; an `_id` is generated when absent. Returns the id.
    async fn create(&self, collection: &str, doc: Value) -> DbResult<String>;

    /// Update the first document matching `filter`. With `fail_on_empty` a
    /// miss is a `NotFound` error, otherwise it returns `Ok(false)`.
    async fn set_one(
        &self,
        collection: &str,
        filter: &Filter,
        update: &UpdateMap,
        fail_on_empty: bool,
    ) -> DbResult<bool>;

    async fn del_one(&self, collection: &str, filter: &Filter, fail_on_empty: bool)
        -> DbResult<bool>;

    async fn del_list(&self, collection: &str, filter: &Filter) -> DbResult<usize>;

    fn decrypt(&self, value: &str, schema_version: Option<&str>, salt: &str) -> DbResult<String>;

    /// `get_one` that treats a miss as `NotFound`
    async fn get_required(&self, collection: &str, filter: &Filter) -> DbResult<Value> {
        self.get_one(collection, filter)
            .await?
            .ok_or_else(|| DbError::not_found(collection, filter.to_string()))
    }

    /// Unconditional update by id; a missing document is an error
    async fn set_by_id(&self, collection: &str, id: &str, update: &UpdateMap) -> DbResult<()> {
        self.set_one(collection, &Filter::by_id(id), update, true)
            .await
            .map(|_| ())
    }
}

/// Document `_id` as a string
pub fn doc_id(doc: &Value) -> Option<&str> {
    doc.get("_id").and_then(Value::as_str)
}
