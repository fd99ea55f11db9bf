//! In-process `VectorStore` with exact scoring. Collections live as long as
//! the store value.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use docqa_core::{
    Chunk, ChunkId, CollectionInfo, Error, Health, Metric, Payload, Query, Result, SearchResult, VectorStore,
};

use crate::similarity::{rank, score};

struct Collection {
    dimension: usize,
    metric: Metric,
    version: u64,
    points: BTreeMap<ChunkId, (Vec<f32>, Payload)>,
}

#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Collection>>> {
        self.collections.read().map_err(|_| Error::Operation("memory store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Collection>>> {
        self.collections.write().map_err(|_| Error::Operation("memory store lock poisoned".into()))
    }
}

pub(crate) fn check_dimensions(chunks: &[Chunk], dimension: usize) -> Result<()> {
    if let Some(bad) = chunks.iter().find(|c| c.vector.len() != dimension) {
        return Err(Error::Config(format!(
            "chunk {} of '{}' has dimension {}, collection expects {dimension}",
            bad.chunk_index,
            bad.source_document_id,
            bad.vector.len()
        )));
    }
    Ok(())
}

pub(crate) fn assign_ids(chunks: &[Chunk]) -> Vec<ChunkId> {
    chunks
        .iter()
        .map(|c| c.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string()))
        .collect()
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn ensure_collection(&self, name: &str, dimension: usize, metric: Metric) -> Result<()> {
        let mut collections = self.write()?;
        match collections.get(name) {
            Some(existing) if existing.dimension != dimension || existing.metric != metric => Err(Error::Config(format!(
                "collection '{name}' exists with dimension {} and metric {}, requested {dimension}/{metric}",
                existing.dimension, existing.metric
            ))),
            Some(_) => Ok(()),
            None => {
                collections.insert(
                    name.to_string(),
                    Collection { dimension, metric, version: 0, points: BTreeMap::new() },
                );
                tracing::info!(collection = name, dimension, %metric, "created collection");
                Ok(())
            }
        }
    }

    async fn upsert(&self, collection: &str, chunks: &[Chunk]) -> Result<Vec<ChunkId>> {
        let mut collections = self.write()?;
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| Error::NotFound(format!("collection '{collection}'")))?;
        check_dimensions(chunks, target.dimension)?;
        let ids = assign_ids(chunks);
        let now = Utc::now();
        for (id, chunk) in ids.iter().zip(chunks) {
            target.points.insert(id.clone(), (chunk.vector.clone(), Payload::merge(chunk, now)));
        }
        target.version += 1;
        tracing::debug!(collection, count = ids.len(), version = target.version, "upserted batch");
        Ok(ids)
    }

    async fn search(&self, collection: &str, query: &Query) -> Result<Vec<SearchResult>> {
        let collections = self.read()?;
        let target = collections
            .get(collection)
            .ok_or_else(|| Error::NotFound(format!("collection '{collection}'")))?;
        if query.vector.len() != target.dimension {
            return Err(Error::Config(format!(
                "query has dimension {}, collection '{collection}' has {}",
                query.vector.len(),
                target.dimension
            )));
        }
        let mut results = Vec::new();
        for (id, (vector, payload)) in &target.points {
            let fields = payload.fields();
            if let Some(filter) = &query.filter {
                if !filter.matches(&fields) {
                    continue;
                }
            }
            results.push(SearchResult {
                chunk_id: id.clone(),
                text: payload.text.clone(),
                score: score(target.metric, &query.vector, vector),
                metadata: fields,
            });
        }
        rank(&mut results, query.top_k);
        Ok(results)
    }

    async fn collection_info(&self, name: &str) -> Result<Option<CollectionInfo>> {
        let collections = self.read()?;
        Ok(collections.get(name).map(|c| CollectionInfo {
            name: name.to_string(),
            dimension: c.dimension,
            metric: c.metric,
            version: c.version,
            count: c.points.len(),
        }))
    }

    async fn health(&self) -> Health {
        match self.collections.read() {
            Ok(_) => Health::Healthy,
            Err(_) => Health::Unhealthy("memory store lock poisoned".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn poisoned_lock_reports_unhealthy() {
        let store = Arc::new(MemoryStore::new());
        assert!(store.health_check().await);

        let writer = store.clone();
        let crashed = std::thread::spawn(move || {
            let _guard = writer.collections.write().unwrap();
            panic!("writer crashed while holding the lock");
        })
        .join();
        assert!(crashed.is_err());

        assert_eq!(store.health().await, Health::Unhealthy("memory store lock poisoned".into()));
        assert!(!store.health().await.is_healthy());
        assert!(!store.health_check().await);
        assert!(matches!(store.collection_info("documents").await, Err(Error::Operation(_))));
    }
}
