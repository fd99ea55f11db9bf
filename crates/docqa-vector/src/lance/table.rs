//! LanceDB connection and housekeeping helpers.
//!
//! Provides the database open function, a race-tolerant ensure-table helper
//! and a small key/value `meta` table that records each collection's
//! dimension and metric.

use arrow_array::{RecordBatch, RecordBatchIterator, StringArray, TimestampMillisecondArray};
use arrow_schema::{DataType, Field, Schema, SchemaRef, TimeUnit};
use chrono::Utc;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{connect, Connection};
use std::sync::Arc;

use docqa_core::{Error, Result};

pub const META_TABLE: &str = "meta";

/// Map a LanceDB failure into the shared taxonomy.
pub fn store_err(e: lancedb::Error) -> Error {
    match e {
        lancedb::Error::TableNotFound { name, .. } => Error::NotFound(format!("collection '{name}'")),
        other => Error::Upstream(format!("lancedb: {other}")),
    }
}

pub async fn open_db(uri: &str) -> Result<Connection> {
    connect(uri).execute().await.map_err(store_err)
}

pub async fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let names = conn.table_names().execute().await.map_err(store_err)?;
    Ok(names.iter().any(|n| n == name))
}

/// Create an empty table unless one exists. Returns `true` when this call
/// created it; a concurrent creator winning the race counts as "exists".
pub async fn ensure_table(conn: &Connection, name: &str, schema: SchemaRef) -> Result<bool> {
    if table_exists(conn, name).await? {
        return Ok(false);
    }
    let iter = RecordBatchIterator::new(vec![].into_iter(), schema.clone());
    match conn.create_table(name, Box::new(iter)).execute().await {
        Ok(_) => Ok(true),
        Err(lancedb::Error::TableAlreadyExists { .. }) => Ok(false),
        Err(e) => Err(store_err(e)),
    }
}

fn build_meta_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("key", DataType::Utf8, false),
        Field::new("value", DataType::Utf8, false),
        Field::new("updated_at", DataType::Timestamp(TimeUnit::Millisecond, None), false),
    ]))
}

fn meta_reader(key: &str, value: &str) -> Result<Box<dyn arrow_array::RecordBatchReader + Send>> {
    let rb = RecordBatch::try_new(
        build_meta_schema(),
        vec![
            Arc::new(StringArray::from(vec![key.to_string()])),
            Arc::new(StringArray::from(vec![value.to_string()])),
            Arc::new(TimestampMillisecondArray::from(vec![Utc::now().timestamp_millis()])),
        ],
    )
    .map_err(|e| Error::Operation(format!("building meta row: {e}")))?;
    Ok(Box::new(RecordBatchIterator::new(vec![Ok(rb)].into_iter(), build_meta_schema())))
}

/// Insert `key` only if no record exists yet and return the stored value,
/// which is the first writer's when several race.
pub async fn init_meta(conn: &Connection, key: &str, value: &str) -> Result<String> {
    ensure_table(conn, META_TABLE, build_meta_schema()).await?;
    let t = conn.open_table(META_TABLE).execute().await.map_err(store_err)?;
    let mut mi = t.merge_insert(&["key"]);
    mi.when_not_matched_insert_all();
    mi.execute(meta_reader(key, value)?).await.map_err(store_err)?;
    get_meta(conn, key)
        .await?
        .ok_or_else(|| Error::Operation(format!("meta key '{key}' missing after insert")))
}

pub async fn get_meta(conn: &Connection, key: &str) -> Result<Option<String>> {
    if !table_exists(conn, META_TABLE).await? {
        return Ok(None);
    }
    let t = conn.open_table(META_TABLE).execute().await.map_err(store_err)?;
    let mut stream = t
        .query()
        .only_if(format!("key = {}", quote(key)))
        .execute()
        .await
        .map_err(store_err)?;
    while let Some(batch) = stream.try_next().await.map_err(store_err)? {
        if batch.num_rows() == 0 {
            continue;
        }
        let val = batch
            .column_by_name("value")
            .and_then(|c| c.as_any().downcast_ref::<StringArray>())
            .ok_or_else(|| Error::Operation("meta.value column missing".into()))?;
        return Ok(Some(val.value(0).to_string()));
    }
    Ok(None)
}

/// SQL string literal with embedded quotes doubled.
pub fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_doubles_single_quotes() {
        assert_eq!(quote("o'neil"), "'o''neil'");
    }

    #[tokio::test]
    async fn init_meta_keeps_the_first_value() {
        let tmp = tempfile::tempdir().unwrap();
        let conn = open_db(&tmp.path().to_string_lossy()).await.unwrap();
        assert_eq!(get_meta(&conn, "k").await.unwrap(), None);
        assert_eq!(init_meta(&conn, "k", "first").await.unwrap(), "first");
        assert_eq!(init_meta(&conn, "k", "second").await.unwrap(), "first");
        assert_eq!(init_meta(&conn, "other", "x").await.unwrap(), "x");
        assert_eq!(get_meta(&conn, "k").await.unwrap().as_deref(), Some("first"));
    }
}
