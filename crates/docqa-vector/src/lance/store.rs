//! `VectorStore` on top of an embedded LanceDB database.
//!
//! Each collection is one table (see [`super::schema`]); its metric lives in
//! the `meta` table under `collection:<name>`. Writes are merge-inserts keyed
//! on `id`, so a batch lands as a single table version.

use arrow_array::RecordBatchIterator;
use async_trait::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, DistanceType, Table};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;

use docqa_core::{
    Chunk, ChunkId, CollectionInfo, Error, Filter, Health, Metric, Payload, Query, Result, SearchResult,
    VectorStore,
};

use super::pushdown::{self, Pushdown};
use super::schema::{build_collection_schema, decode_rows, encode_rows, vector_dimension, StoredRow};
use super::table::{ensure_table, get_meta, init_meta, open_db, store_err, table_exists, META_TABLE};
use crate::memory::{assign_ids, check_dimensions};
use crate::similarity::{rank, score};

#[derive(Debug, Serialize, Deserialize)]
struct CollectionMeta {
    dimension: usize,
    metric: Metric,
}

fn meta_key(name: &str) -> String {
    format!("collection:{name}")
}

fn distance_type(metric: Metric) -> DistanceType {
    match metric {
        Metric::L2 => DistanceType::L2,
        Metric::Cosine => DistanceType::Cosine,
        Metric::Dot => DistanceType::Dot,
    }
}

/// Lance reports squared L2, `1 - cos` and `1 - dot`; turn them back into
/// higher-is-better scores.
fn score_from_distance(metric: Metric, distance: f32) -> f32 {
    match metric {
        Metric::L2 => -distance,
        Metric::Cosine | Metric::Dot => 1.0 - distance,
    }
}

/// Keep the last occurrence of every id, preserving first-seen order.
fn dedupe_last_wins<'a>(ids: &'a [ChunkId], chunks: &'a [Chunk]) -> Vec<(&'a ChunkId, &'a Chunk)> {
    let mut slot: HashMap<&ChunkId, usize> = HashMap::new();
    let mut out: Vec<(&ChunkId, &Chunk)> = Vec::with_capacity(chunks.len());
    for (id, chunk) in ids.iter().zip(chunks) {
        match slot.get(id) {
            Some(&i) => out[i] = (id, chunk),
            None => {
                slot.insert(id, out.len());
                out.push((id, chunk));
            }
        }
    }
    out
}

/// Whether the row just past `top_k` scores the same as the last kept one.
fn tie_at_cutoff(ranked: &[SearchResult], top_k: usize) -> bool {
    top_k > 0 && ranked.len() > top_k && ranked[top_k - 1].score == ranked[top_k].score
}

fn to_result(row: StoredRow, score: f32) -> SearchResult {
    let metadata = row.payload.fields();
    SearchResult { chunk_id: row.id, text: row.payload.text, score, metadata }
}

pub struct LanceStore {
    conn: Connection,
    uri: String,
    write_lock: Mutex<()>,
}

impl LanceStore {
    pub async fn connect(uri: &str) -> Result<Self> {
        let conn = open_db(uri).await?;
        tracing::info!(uri, "opened lancedb store");
        Ok(Self { conn, uri: uri.to_string(), write_lock: Mutex::new(()) })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    async fn open(&self, name: &str) -> Result<Table> {
        self.conn.open_table(name).execute().await.map_err(store_err)
    }

    async fn metric_of(&self, name: &str) -> Result<Metric> {
        match get_meta(&self.conn, &meta_key(name)).await? {
            Some(raw) => Ok(serde_json::from_str::<CollectionMeta>(&raw)?.metric),
            None => Err(Error::Operation(format!("collection '{name}' has no recorded metric"))),
        }
    }

    async fn dimension_of(&self, table: &Table) -> Result<usize> {
        let schema = table.schema().await.map_err(store_err)?;
        vector_dimension(&schema)
            .ok_or_else(|| Error::Operation(format!("table '{}' has no vector column", table.name())))
    }

    async fn vector_search(
        &self,
        table: &Table,
        metric: Metric,
        query: &Query,
        sql: Option<String>,
    ) -> Result<Vec<SearchResult>> {
        let mut search = table
            .vector_search(query.vector.clone())
            .map_err(store_err)?
            .distance_type(distance_type(metric))
            .limit(query.top_k.saturating_add(1));
        if let Some(sql) = sql.clone() {
            search = search.only_if(sql);
        }
        let mut stream = search.execute().await.map_err(store_err)?;
        let mut results = Vec::new();
        while let Some(batch) = stream.try_next().await.map_err(store_err)? {
            for row in decode_rows(&batch)? {
                let distance = row.distance.unwrap_or(f32::INFINITY);
                results.push(to_result(row, score_from_distance(metric, distance)));
            }
        }
        rank(&mut results, query.top_k.saturating_add(1));
        if tie_at_cutoff(&results, query.top_k) {
            // the index may have dropped tied rows with smaller ids
            return self.scan_search(table, metric, query, Pushdown { sql, residual: Filter::new() }).await;
        }
        results.truncate(query.top_k);
        Ok(results)
    }

    /// Exact scoring over every row passing the SQL prefilter, used when some
    /// conditions can only be checked on decoded payload metadata.
    async fn scan_search(
        &self,
        table: &Table,
        metric: Metric,
        query: &Query,
        pushdown: Pushdown,
    ) -> Result<Vec<SearchResult>> {
        let total = table.count_rows(pushdown.sql.clone()).await.map_err(store_err)?;
        if total == 0 {
            return Ok(Vec::new());
        }
        let mut scan = table.query().limit(total);
        if let Some(sql) = pushdown.sql {
            scan = scan.only_if(sql);
        }
        let mut stream = scan.execute().await.map_err(store_err)?;
        let mut results = Vec::new();
        while let Some(batch) = stream.try_next().await.map_err(store_err)? {
            for row in decode_rows(&batch)? {
                if !pushdown.residual.matches(&row.payload.fields()) {
                    continue;
                }
                let Some(vector) = row.vector.as_deref() else { continue };
                let s = score(metric, &query.vector, vector);
                results.push(to_result(row, s));
            }
        }
        rank(&mut results, query.top_k);
        Ok(results)
    }
}

#[async_trait]
impl VectorStore for LanceStore {
    async fn ensure_collection(&self, name: &str, dimension: usize, metric: Metric) -> Result<()> {
        if name == META_TABLE {
            return Err(Error::Config(format!("'{META_TABLE}' is a reserved collection name")));
        }
        if dimension == 0 {
            return Err(Error::Config("collection dimension must be positive".into()));
        }
        let _guard = self.write_lock.lock().await;
        let created = if table_exists(&self.conn, name).await? {
            false
        } else {
            ensure_table(&self.conn, name, build_collection_schema(dimension)?).await?
        };
        // another handle may have created the table first; its schema wins
        let table = self.open(name).await?;
        let existing_dim = self.dimension_of(&table).await?;
        if existing_dim != dimension {
            return Err(Error::Config(format!(
                "collection '{name}' exists with dimension {existing_dim}, requested {dimension}"
            )));
        }
        let stored = match get_meta(&self.conn, &meta_key(name)).await? {
            Some(raw) => raw,
            None => {
                let meta = serde_json::to_string(&CollectionMeta { dimension: existing_dim, metric })?;
                init_meta(&self.conn, &meta_key(name), &meta).await?
            }
        };
        let existing_metric = serde_json::from_str::<CollectionMeta>(&stored)?.metric;
        if existing_metric != metric {
            return Err(Error::Config(format!(
                "collection '{name}' exists with metric {existing_metric}, requested {metric}"
            )));
        }
        if created {
            tracing::info!(collection = name, dimension, %metric, "created collection");
        }
        Ok(())
    }

    async fn upsert(&self, collection: &str, chunks: &[Chunk]) -> Result<Vec<ChunkId>> {
        let _guard = self.write_lock.lock().await;
        let table = self.open(collection).await?;
        let dimension = self.dimension_of(&table).await?;
        check_dimensions(chunks, dimension)?;
        let ids = assign_ids(chunks);
        if chunks.is_empty() {
            return Ok(ids);
        }

        let now = Utc::now();
        let unique = dedupe_last_wins(&ids, chunks);
        let rows: Vec<(String, Payload, &[f32])> = unique
            .iter()
            .map(|(id, chunk)| ((*id).clone(), Payload::merge(chunk, now), chunk.vector.as_slice()))
            .collect();
        let batch = encode_rows(dimension, &rows)?;
        let schema = batch.schema();
        let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));

        let mut mi = table.merge_insert(&["id"]);
        mi.when_matched_update_all(None).when_not_matched_insert_all();
        mi.execute(reader).await.map_err(store_err)?;
        tracing::debug!(collection, count = rows.len(), "upserted batch");
        Ok(ids)
    }

    async fn search(&self, collection: &str, query: &Query) -> Result<Vec<SearchResult>> {
        let table = self.open(collection).await?;
        let dimension = self.dimension_of(&table).await?;
        if query.vector.len() != dimension {
            return Err(Error::Config(format!(
                "query has dimension {}, collection '{collection}' has {dimension}",
                query.vector.len()
            )));
        }
        if query.top_k == 0 || table.count_rows(None).await.map_err(store_err)? == 0 {
            return Ok(Vec::new());
        }
        let metric = self.metric_of(collection).await?;
        let pushdown = pushdown::split(query.filter.as_ref());
        if pushdown.residual.is_empty() {
            self.vector_search(&table, metric, query, pushdown.sql).await
        } else {
            self.scan_search(&table, metric, query, pushdown).await
        }
    }

    async fn collection_info(&self, name: &str) -> Result<Option<CollectionInfo>> {
        if name == META_TABLE || !table_exists(&self.conn, name).await? {
            return Ok(None);
        }
        let table = self.open(name).await?;
        Ok(Some(CollectionInfo {
            name: name.to_string(),
            dimension: self.dimension_of(&table).await?,
            metric: self.metric_of(name).await?,
            version: table.version().await.map_err(store_err)?,
            count: table.count_rows(None).await.map_err(store_err)?,
        }))
    }

    async fn health(&self) -> Health {
        match self.conn.table_names().execute().await {
            Ok(_) => Health::Healthy,
            Err(e) => {
                tracing::warn!(uri = %self.uri, error = %e, "lancedb health check failed");
                Health::Unreachable(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, text: &str) -> Chunk {
        Chunk {
            id: Some(id.to_string()),
            text: text.to_string(),
            source_document_id: "d".into(),
            chunk_index: 0,
            vector: vec![1.0, 0.0],
            metadata: Default::default(),
        }
    }

    #[test]
    fn duplicate_ids_keep_the_last_chunk() {
        let chunks = vec![chunk("a", "first"), chunk("b", "other"), chunk("a", "second")];
        let ids = assign_ids(&chunks);
        let unique = dedupe_last_wins(&ids, &chunks);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].0, "a");
        assert_eq!(unique[0].1.text, "second");
        assert_eq!(unique[1].1.text, "other");
    }

    #[test]
    fn distances_become_higher_is_better_scores() {
        assert_eq!(score_from_distance(Metric::L2, 4.0), -4.0);
        assert_eq!(score_from_distance(Metric::Cosine, 0.25), 0.75);
        assert!(score_from_distance(Metric::Cosine, 0.0) > score_from_distance(Metric::Cosine, 0.5));
    }

    #[test]
    fn ties_at_the_cutoff_are_detected() {
        let hit = |id: &str, score: f32| SearchResult {
            chunk_id: id.into(),
            text: String::new(),
            score,
            metadata: Default::default(),
        };
        let ranked = vec![hit("a", 0.9), hit("b", 0.5), hit("c", 0.5)];
        assert!(tie_at_cutoff(&ranked, 2));
        assert!(!tie_at_cutoff(&ranked, 1));
        assert!(!tie_at_cutoff(&ranked, 3));
        assert!(!tie_at_cutoff(&ranked, 0));
    }
}
