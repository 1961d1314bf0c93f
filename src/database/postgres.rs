//! # PostgreSQL Document Store
//!
//! Documents are JSONB rows in `lcm_documents(collection, id, doc)`. Filters
//! are evaluated in Rust over the rows of a collection, narrowed in SQL by id
//! when the filter pins `_id`, otherwise by a JSON path built from its
//! equality clauses. `set_one` runs in a transaction that locks the
//! candidate rows with `SELECT ... FOR UPDATE`, which makes the
//! check-then-write of the HA lock atomic across processes.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgArguments;
use sqlx::query::QueryAs;
use sqlx::{types::Json, PgPool, Postgres, Transaction};
use tracing::{debug, instrument};

use super::{apply_update, doc_id, DbResult, DocumentStore, Filter, SecretCipher, UpdateMap};
use crate::errors::DbError;

const SCHEMA: [&str; 2] = [
    r#"
CREATE TABLE IF NOT EXISTS lcm_documents (
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    doc JSONB NOT NULL,
    PRIMARY KEY (collection, id)
)"#,
    "CREATE INDEX IF NOT EXISTS lcm_documents_doc_path ON lcm_documents USING GIN (doc jsonb_path_ops)",
];

type DocRow = (Json<Value>,);

/// Rows of a collection a filter has to look at
#[derive(Debug, PartialEq)]
enum Scope<'a> {
    Id(&'a str),
    JsonPath(String),
    Collection,
}

impl<'a> Scope<'a> {
    fn of(filter: &'a Filter) -> Self {
        match (filter.id(), filter.json_path()) {
            (Some(id), _) => Self::Id(id),
            (None, Some(path)) => Self::JsonPath(path),
            (None, None) => Self::Collection,
        }
    }

    fn select(&self, for_update: bool) -> String {
        let predicate = match self {
            Self::Id(_) => " AND id = $2",
            Self::JsonPath(_) => " AND doc @? $2::jsonpath",
            Self::Collection => "",
        };
        let lock = if for_update { " FOR UPDATE" } else { "" };
        format!("SELECT doc FROM lcm_documents WHERE collection = $1{predicate} ORDER BY id{lock}")
    }

    fn bind<'q>(
        &'q self,
        query: QueryAs<'q, Postgres, DocRow, PgArguments>,
    ) -> QueryAs<'q, Postgres, DocRow, PgArguments> {
        match self {
            Self::Id(id) => query.bind(*id),
            Self::JsonPath(path) => query.bind(path.as_str()),
            Self::Collection => query,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
    cipher: SecretCipher,
}

impl PostgresStore {
    pub fn new(pool: PgPool, cipher: SecretCipher) -> Self {
        Self { pool, cipher }
    }

    /// Connect and make sure the documents table exists
    pub async fn connect(url: &str, max_connections: u32, cipher: SecretCipher) -> DbResult<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        let store = Self::new(pool, cipher);
        store.ensure_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn ensure_schema(&self) -> DbResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn candidates(&self, collection: &str, filter: &Filter) -> DbResult<Vec<Value>> {
        let scope = Scope::of(filter);
        let sql = scope.select(false);
        let rows: Vec<DocRow> = scope
            .bind(sqlx::query_as::<Postgres, DocRow>(&sql).bind(collection))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(Json(doc),)| doc).collect())
    }

    async fn locked_candidates(
        tx: &mut Transaction<'_, Postgres>,
        collection: &str,
        filter: &Filter,
    ) -> DbResult<Vec<Value>> {
        let scope = Scope::of(filter);
        let sql = scope.select(true);
        let rows: Vec<DocRow> = scope
            .bind(sqlx::query_as::<Postgres, DocRow>(&sql).bind(collection))
            .fetch_all(&mut **tx)
            .await?;
        Ok(rows.into_iter().map(|(Json(doc),)| doc).collect())
    }
}

#[async_trait]
impl DocumentStore for PostgresStore {
    async fn get_one(&self, collection: &str, filter: &Filter) -> DbResult<Option<Value>> {
        Ok(self
            .candidates(collection, filter)
            .await?
            .into_iter()
            .find(|doc| filter.matches(doc)))
    }

    async fn get_list(&self, collection: &str, filter: &Filter) -> DbResult<Vec<Value>> {
        Ok(self
            .candidates(collection, filter)
            .await?
            .into_iter()
            .filter(|doc| filter.matches(doc))
            .collect())
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
        sqlx::query("INSERT INTO lcm_documents (collection, id, doc) VALUES ($1, $2, $3)")
            .bind(collection)
            .bind(&id)
            .bind(Json(&doc))
            .execute(&self.pool)
            .await?;
        Ok(id)
    }

    #[instrument(skip(self, update), fields(collection = %collection, filter = %filter))]
    async fn set_one(
        &self,
        collection: &str,
        filter: &Filter,
        update: &UpdateMap,
        fail_on_empty: bool,
    ) -> DbResult<bool> {
        let mut tx = self.pool.begin().await?;
        let target = Self::locked_candidates(&mut tx, collection, filter)
            .await?
            .into_iter()
            .find(|doc| filter.matches(doc));

        let Some(mut doc) = target else {
            tx.rollback().await?;
            if fail_on_empty {
                return Err(DbError::not_found(collection, filter.to_string()));
            }
            return Ok(false);
        };

        let id = doc_id(&doc)
            .map(str::to_string)
            .ok_or_else(|| DbError::backend("set_one", "document without _id"))?;
        apply_update(&mut doc, update)?;
        sqlx::query("UPDATE lcm_documents SET doc = $3 WHERE collection = $1 AND id = $2")
            .bind(collection)
            .bind(&id)
            .bind(Json(&doc))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        debug!(id = %id, "Document updated");
        Ok(true)
    }

    async fn del_one(
        &self,
        collection: &str,
        filter: &Filter,
        fail_on_empty: bool,
    ) -> DbResult<bool> {
        let mut tx = self.pool.begin().await?;
        let target = Self::locked_candidates(&mut tx, collection, filter)
            .await?
            .into_iter()
            .find(|doc| filter.matches(doc));
        let Some(id) = target.as_ref().and_then(doc_id).map(str::to_string) else {
            tx.rollback().await?;
            if fail_on_empty {
                return Err(DbError::not_found(collection, filter.to_string()));
            }
            return Ok(false);
        };
        sqlx::query("DELETE FROM lcm_documents WHERE collection = $1 AND id = $2")
            .bind(collection)
            .bind(&id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn del_list(&self, collection: &str, filter: &Filter) -> DbResult<usize> {
        let mut tx = self.pool.begin().await?;
        let ids: Vec<String> = Self::locked_candidates(&mut tx, collection, filter)
            .await?
            .iter()
            .filter(|doc| filter.matches(doc))
            .filter_map(|doc| doc_id(doc).map(str::to_string))
            .collect();
        if !ids.is_empty() {
            sqlx::query("DELETE FROM lcm_documents WHERE collection = $1 AND id = ANY($2)")
                .bind(collection)
                .bind(&ids)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(ids.len())
    }

    fn decrypt(&self, value: &str, schema_version: Option<&str>, salt: &str) -> DbResult<String> {
        self.cipher.decrypt(value, schema_version, salt)
    }
}
