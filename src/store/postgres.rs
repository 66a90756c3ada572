use super::{ChangeEvent, ChangeStream, DocumentStore};
use crate::document::{Document, FIELD_TIMESTAMP};
use crate::error::StoreError;
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use sqlx::postgres::{PgListener, PgPoolOptions};
use sqlx::types::Json;
use sqlx::PgPool;
use std::time::Duration;

/// Documents live in one table per namespace schema; an insert trigger
/// announces `{id, collection}` on a per-namespace notify channel.
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
    namespace: String,
    channel: String,
}

#[derive(Debug, Deserialize)]
struct InsertNotice {
    id: i64,
    collection: String,
}

fn schema_sql(channel: &str) -> String {
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS telemetry_documents (
            id bigserial primary key,
            collection text not null,
            vin text null,
            ts_ms bigint not null,
            document jsonb not null,
            inserted_at timestamptz not null default now()
        );
        CREATE INDEX IF NOT EXISTS telemetry_documents_collection_ts_idx
            ON telemetry_documents (collection, ts_ms);
        CREATE OR REPLACE FUNCTION telemetry_documents_notify() RETURNS trigger AS $$
        BEGIN
            PERFORM pg_notify(
                '{channel}',
                json_build_object('id', NEW.id, 'collection', NEW.collection)::text
            );
            RETURN NEW;
        END;
        $$ LANGUAGE plpgsql;
        DROP TRIGGER IF EXISTS telemetry_documents_insert_notify ON telemetry_documents;
        CREATE TRIGGER telemetry_documents_insert_notify
            AFTER INSERT ON telemetry_documents
            FOR EACH ROW EXECUTE FUNCTION telemetry_documents_notify();
        "#
    )
}

impl PgDocumentStore {
    /// `namespace` must already be a validated identifier; it becomes the
    /// Postgres schema.
    pub async fn connect(
        database_url: &str,
        namespace: &str,
        max_connections: u32,
    ) -> Result<Self, StoreError> {
        let admin_pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(8))
            .connect(database_url)
            .await?;
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", namespace))
            .execute(&admin_pool)
            .await?;
        admin_pool.close().await;

        let schema_name = namespace.to_string();
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(2))
            .acquire_timeout(Duration::from_secs(8))
            .after_connect(move |conn, _meta| {
                let schema = schema_name.clone();
                Box::pin(async move {
                    sqlx::query(&format!("SET search_path TO {}", schema))
                        .execute(conn)
                        .await?;
                    Ok(())
                })
            })
            .connect(database_url)
            .await?;

        let store = Self {
            pool,
            namespace: namespace.to_string(),
            channel: format!("{}_document_insert", namespace),
        };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<(), StoreError> {
        let sql = schema_sql(&self.channel);
        sqlx::raw_sql(&sql).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn insert_one(&self, collection: &str, document: &Document) -> Result<(), StoreError> {
        let ts_ms = document
            .timestamp_ms()
            .ok_or(StoreError::MissingField(FIELD_TIMESTAMP))?;

        sqlx::query(
            r#"
            INSERT INTO telemetry_documents (collection, vin, ts_ms, document)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(collection)
        .bind(document.vin())
        .bind(ts_ms)
        .bind(Json(document))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_range(
        &self,
        collection: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Document>, StoreError> {
        let rows: Vec<Json<Document>> = sqlx::query_scalar(
            r#"
            SELECT document
            FROM telemetry_documents
            WHERE collection = $1
              AND ts_ms >= $2
              AND ts_ms <= $3
            ORDER BY id
            "#,
        )
        .bind(collection)
        .bind(start_ms)
        .bind(end_ms)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|Json(document)| document).collect())
    }

    async fn find_all(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        let rows: Vec<Json<Document>> = sqlx::query_scalar(
            "SELECT document FROM telemetry_documents WHERE collection = $1 ORDER BY id",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|Json(document)| document).collect())
    }

    async fn list_collections(&self) -> Result<Vec<String>, StoreError> {
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT collection FROM telemetry_documents ORDER BY collection",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(names)
    }

    async fn watch_inserts(&self) -> Result<ChangeStream, StoreError> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(&self.channel).await?;
        tracing::info!(channel=%self.channel, "listening for document inserts");

        let pool = self.pool.clone();
        let namespace = self.namespace.clone();
        let stream = listener.into_stream().then(move |item| {
            let pool = pool.clone();
            let namespace = namespace.clone();
            async move {
                let notification = item.map_err(StoreError::FeedBroken)?;
                let notice: InsertNotice = serde_json::from_str(notification.payload())?;
                let Json(document) = sqlx::query_scalar::<_, Json<Document>>(
                    "SELECT document FROM telemetry_documents WHERE id = $1",
                )
                .bind(notice.id)
                .fetch_one(&pool)
                .await?;
                Ok::<ChangeEvent, StoreError>(ChangeEvent {
                    namespace,
                    collection: notice.collection,
                    document,
                })
            }
        });
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::doc;
    use futures::StreamExt;
    use serde_json::json;
    use std::env;

    async fn test_store(suffix: &str) -> Option<(PgDocumentStore, String, String)> {
        if env::var("VT_INTEGRATION_TEST").ok().as_deref() != Some("1") {
            return None;
        }
        let database_url = env::var("VT_TEST_DATABASE_URL").ok()?;
        let namespace = format!("vt_test_{}_{}", suffix, std::process::id());
        let store = PgDocumentStore::connect(&database_url, &namespace, 4)
            .await
            .expect("connect test store");
        Some((store, database_url, namespace))
    }

    async fn drop_namespace(database_url: &str, namespace: &str) {
        let admin_pool = PgPoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await
            .expect("admin pool");
        let _ = sqlx::query(&format!("DROP SCHEMA IF EXISTS {} CASCADE", namespace))
            .execute(&admin_pool)
            .await;
    }

    #[tokio::test]
    async fn test_range_query_is_inclusive_and_ordered() -> anyhow::Result<()> {
        let Some((store, database_url, namespace)) = test_store("range").await else {
            return Ok(());
        };

        for (ts, state) in [(2000, "online"), (1000, "asleep"), (3000, "offline"), (4000, "x")] {
            store
                .insert_one(
                    "vehicle",
                    &doc(json!({"vin": "V1", "timestamp": ts, "state": state})),
                )
                .await?;
        }
        store
            .insert_one("charge_state", &doc(json!({"vin": "V1", "timestamp": 2000})))
            .await?;

        let found = store.find_range("vehicle", 1000, 3000).await?;
        let states: Vec<&str> = found.iter().filter_map(|d| d.str_field("state")).collect();
        assert_eq!(states, vec!["online", "asleep", "offline"]);

        let collections = store.list_collections().await?;
        assert_eq!(collections, vec!["charge_state", "vehicle"]);

        let missing_ts = store.insert_one("vehicle", &doc(json!({"vin": "V1"}))).await;
        assert!(matches!(missing_ts, Err(StoreError::MissingField("timestamp"))));

        drop_namespace(&database_url, &namespace).await;
        Ok(())
    }

    #[tokio::test]
    async fn test_insert_feed_delivers_documents() -> anyhow::Result<()> {
        let Some((store, database_url, namespace)) = test_store("feed").await else {
            return Ok(());
        };

        let mut feed = store.watch_inserts().await?;
        store
            .insert_one(
                "custom_data",
                &doc(json!({"vin": "V1", "timestamp": 10, "sleepy": true})),
            )
            .await?;

        let event = tokio::time::timeout(Duration::from_secs(5), feed.next())
            .await?
            .expect("feed item")?;
        assert_eq!(event.namespace, namespace);
        assert_eq!(event.collection, "custom_data");
        assert!(event.document.flag("sleepy"));

        drop(feed);
        drop_namespace(&database_url, &namespace).await;
        Ok(())
    }
}
