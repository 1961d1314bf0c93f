//! # In-Memory Document Store
//!
//! Collections live in a `DashMap`; every operation holds the collection's
//! shard lock for its whole duration, so filter evaluation and update in
//! `set_one` are one atomic step.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tracing::trace;

use super::{apply_update, doc_id, DbResult, DocumentStore, Filter, SecretCipher, UpdateMap};
use crate::errors::DbError;

#[derive(Debug, Default)]
pub struct InMemoryStore {
    collections: DashMap<String, Vec<Value>>,
    cipher: SecretCipher,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cipher(cipher: SecretCipher) -> Self {
        Self {
            collections: DashMap::new(),
            cipher,
        }
    }

    /// Number of documents in a collection
    pub fn count(&self, collection: &str) -> usize {
        self.collections
            .get(collection)
            .map(|docs| docs.len())
            .unwrap_or(0)
    }

    /// Synchronous lookup by id, for fixtures and assertions
    pub fn snapshot(&self, collection: &str, id: &str) -> Option<Value> {
        self.collections
            .get(collection)?
            .iter()
            .find(|doc| doc_id(doc) == Some(id))
            .cloned()
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn get_one(&self, collection: &str, filter: &Filter) -> DbResult<Option<Value>> {
        Ok(self
            .collections
            .get(collection)
            .and_then(|docs| docs.iter().find(|doc| filter.matches(doc)).cloned()))
    }

    async fn get_list(&self, collection: &str, filter: &Filter) -> DbResult<Vec<Value>> {
        Ok(self
            .collections
            .get(collection)
            .map(|docs| docs.iter().filter(|doc| filter.matches(doc)).cloned().collect())
            .unwrap_or_default())
    }

    async fn create(&self, collection: &str, mut doc: Value) -> DbResult<String> {
        let Value::Object(map) = &mut doc else {
            return Err(DbError::Serialization(format!(
                "{collection}: documents must be objects"
            )));
        };
        let id = match map.get("_id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                map.insert("_id".to_string(), Value::String(id.clone()));
                id
            }
        };
        let mut docs = self.collections.entry(collection.to_string()).or_default();
        if docs.iter().any(|d| doc_id(d) == Some(id.as_str())) {
            return Err(DbError::backend(
                "create",
                format!("{collection} '{id}' already exists"),
            ));
        }
        docs.push(doc);
        Ok(id)
    }

    async fn set_one(
        &self,
        collection: &str,
        filter: &Filter,
        update: &UpdateMap,
        fail_on_empty: bool,
    ) -> DbResult<bool> {
        let mut docs = self.collections.entry(collection.to_string()).or_default();
        match docs.iter_mut().find(|doc| filter.matches(doc)) {
            Some(doc) => {
                let mut updated = doc.clone();
                apply_update(&mut updated, update)?;
                *doc = updated;
                trace!(collection = %collection, filter = %filter, "Document updated");
                Ok(true)
            }
            None if fail_on_empty => Err(DbError::not_found(collection, filter.to_string())),
            None => Ok(false),
        }
    }

    async fn del_one(
        &self,
        collection: &str,
        filter: &Filter,
        fail_on_empty: bool,
    ) -> DbResult<bool> {
        let mut docs = self.collections.entry(collection.to_string()).or_default();
        match docs.iter().position(|doc| filter.matches(doc)) {
            Some(index) => {
                docs.remove(index);
                Ok(true)
            }
            None if fail_on_empty => Err(DbError::not_found(collection, filter.to_string())),
            None => Ok(false),
        }
    }

    async fn del_list(&self, collection: &str, filter: &Filter) -> DbResult<usize> {
        let mut docs = self.collections.entry(collection.to_string()).or_default();
        let before = docs.len();
        docs.retain(|doc| !filter.matches(doc));
        Ok(before - docs.len())
    }

    fn decrypt(&self, value: &str, schema_version: Option<&str>, salt: &str) -> DbResult<String> {
        self.cipher.decrypt(value, schema_version, salt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::update_of;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn conditional_update_is_compare_and_set() {
        let store = Arc::new(InMemoryStore::new());
        store
            .create("nslcmops", json!({"_id": "op1", "_admin": {}}))
            .await
            .unwrap();

        let filter = Filter::by_id("op1").unset("_admin.worker");
        let mut handles = Vec::new();
        for worker in ["a", "b", "c", "d"] {
            let store = store.clone();
            let filter = filter.clone();
            handles.push(tokio::spawn(async move {
                store
                    .set_one(
                        "nslcmops",
                        &filter,
                        &update_of([("_admin.worker", worker)]),
                        false,
                    )
                    .await
                    .unwrap()
            }));
        }
        let mut won = 0;
        for handle in handles {
            if handle.await.unwrap() {
                won += 1;
            }
        }
        assert_eq!(won, 1);
    }

    #[tokio::test]
    async fn missing_document_handling() {
        let store = InMemoryStore::new();
        let filter = Filter::by_id("nope");
        assert!(!store
            .set_one("nsrs", &filter, &UpdateMap::new(), false)
            .await
            .unwrap());
        assert!(matches!(
            store.set_one("nsrs", &filter, &UpdateMap::new(), true).await,
            Err(DbError::NotFound { .. })
        ));
        assert!(store.get_required("nsrs", &filter).await.is_err());
    }

    #[tokio::test]
    async fn delete_list_by_filter() {
        let store = InMemoryStore::new();
        for (id, ns) in [("v1", "n1"), ("v2", "n1"), ("v3", "n2")] {
            store
                .create("vnfrs", json!({"_id": id, "nsr-id-ref": ns}))
                .await
                .unwrap();
        }
        let removed = store
            .del_list("vnfrs", &Filter::new().eq("nsr-id-ref", "n1"))
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.count("vnfrs"), 1);
    }
}
