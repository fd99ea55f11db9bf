use std::sync::Arc;

use docqa_core::{Chunk, Error, Filter, Health, MetaValue, Metadata, Metric, Query, Range, VectorStore};
use docqa_vector::{LanceStore, MemoryStore};
use tempfile::TempDir;

fn chunk(doc: &str, index: usize, text: &str, vector: Vec<f32>, meta: &[(&str, MetaValue)]) -> Chunk {
    Chunk {
        id: None,
        text: text.to_string(),
        source_document_id: doc.to_string(),
        chunk_index: index,
        vector,
        metadata: meta.iter().map(|(k, v)| (k.to_string(), v.clone())).collect::<Metadata>(),
    }
}

fn corpus() -> Vec<Chunk> {
    vec![
        chunk("policy", 0, "Claims must be filed within 30 days.", vec![1.0, 0.0, 0.0], &[
            ("filename", "policy.pdf".into()),
            ("lang", "en".into()),
        ]),
        chunk("policy", 1, "The deductible is $500.", vec![0.0, 1.0, 0.0], &[
            ("filename", "policy.pdf".into()),
            ("lang", "en".into()),
        ]),
        chunk("faq", 0, "Renewals happen every year.", vec![0.0, 0.0, 1.0], &[
            ("filename", "faq.txt".into()),
            ("lang", "de".into()),
            ("uploaded_at", "2023-01-01T00:00:00.000Z".into()),
        ]),
    ]
}

async fn lance(tmp: &TempDir) -> LanceStore {
    LanceStore::connect(&tmp.path().join("lancedb").to_string_lossy()).await.expect("connect")
}

async fn upsert_then_search_returns_best_first(store: &dyn VectorStore) -> anyhow::Result<()> {
    store.ensure_collection("documents", 3, Metric::Cosine).await?;
    let ids = store.upsert("documents", &corpus()).await?;
    assert_eq!(ids.len(), 3);
    assert!(ids.iter().all(|id| !id.is_empty()));

    let hits = store.search("documents", &Query::new(vec![0.1, 0.9, 0.0], 2)).await?;
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].text, "The deductible is $500.");
    assert_eq!(hits[0].chunk_id, ids[1]);
    assert!(hits[0].score >= hits[1].score);
    assert_eq!(hits[0].metadata.get("filename"), Some(&MetaValue::from("policy.pdf")));
    assert_eq!(hits[0].metadata.get("chunk_index"), Some(&MetaValue::Int(1)));
    assert_eq!(hits[0].metadata.get("source_document_id"), Some(&MetaValue::from("policy")));
    assert!(hits[0].metadata.contains_key("uploaded_at"));

    let info = store.collection_info("documents").await?.expect("collection exists");
    assert_eq!(info.dimension, 3);
    assert_eq!(info.metric, Metric::Cosine);
    assert_eq!(info.count, 3);
    Ok(())
}

async fn filters_restrict_candidates(store: &dyn VectorStore) -> anyhow::Result<()> {
    store.ensure_collection("documents", 3, Metric::Cosine).await?;
    store.upsert("documents", &corpus()).await?;
    let q = vec![0.0, 0.0, 1.0];

    let by_file = Query::new(q.clone(), 10).with_filter(Filter::new().eq("filename", "policy.pdf"));
    let hits = store.search("documents", &by_file).await?;
    assert_eq!(hits.len(), 2);
    assert!(hits.iter().all(|h| h.metadata.get("filename") == Some(&MetaValue::from("policy.pdf"))));

    let by_lang = Query::new(q.clone(), 10).with_filter(Filter::new().eq("lang", "en").eq("chunk_index", 1_i64));
    let hits = store.search("documents", &by_lang).await?;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].text, "The deductible is $500.");

    let older = Query::new(q.clone(), 10)
        .with_filter(Filter::new().range("uploaded_at", Range::default().lt("2024-01-01T00:00:00.000Z")));
    let hits = store.search("documents", &older).await?;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].text, "Renewals happen every year.");

    let none = Query::new(q, 10).with_filter(Filter::new().eq("lang", "fr"));
    assert!(store.search("documents", &none).await?.is_empty());
    Ok(())
}

async fn same_id_replaces_previous_chunk(store: &dyn VectorStore) -> anyhow::Result<()> {
    store.ensure_collection("documents", 3, Metric::L2).await?;
    let mut first = chunk("policy", 0, "old text", vec![1.0, 0.0, 0.0], &[]);
    first.id = Some("fixed".into());
    let mut second = chunk("policy", 0, "new text", vec![1.0, 0.0, 0.0], &[]);
    second.id = Some("fixed".into());

    store.upsert("documents", &[first]).await?;
    let ids = store.upsert("documents", &[second]).await?;
    assert_eq!(ids, vec!["fixed".to_string()]);

    let hits = store.search("documents", &Query::new(vec![1.0, 0.0, 0.0], 5)).await?;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].text, "new text");
    assert_eq!(hits[0].score, 0.0);
    assert_eq!(hits[0].metadata.get("filename"), Some(&MetaValue::from("unknown")));
    Ok(())
}

async fn mismatches_are_rejected(store: &dyn VectorStore) -> anyhow::Result<()> {
    store.ensure_collection("documents", 3, Metric::Cosine).await?;
    store.ensure_collection("documents", 3, Metric::Cosine).await?;
    assert!(matches!(store.ensure_collection("documents", 4, Metric::Cosine).await, Err(Error::Config(_))));
    assert!(matches!(store.ensure_collection("documents", 3, Metric::Dot).await, Err(Error::Config(_))));

    let bad = chunk("policy", 0, "short vector", vec![1.0, 0.0], &[]);
    assert!(matches!(store.upsert("documents", &[bad]).await, Err(Error::Config(_))));
    assert!(matches!(store.search("documents", &Query::new(vec![1.0], 1)).await, Err(Error::Config(_))));
    assert!(matches!(store.upsert("missing", &corpus()).await, Err(Error::NotFound(_))));
    assert!(store.collection_info("missing").await?.is_none());
    Ok(())
}

async fn equal_scores_break_ties_by_id(store: &dyn VectorStore) -> anyhow::Result<()> {
    store.ensure_collection("documents", 3, Metric::Cosine).await?;
    let twins: Vec<Chunk> = ["c", "a", "b"]
        .iter()
        .enumerate()
        .map(|(i, id)| {
            let mut c = chunk("twins", i, &format!("copy {id}"), vec![0.0, 1.0, 0.0], &[]);
            c.id = Some(id.to_string());
            c
        })
        .collect();
    store.upsert("documents", &twins).await?;

    let q = vec![0.0, 1.0, 0.0];
    let hits = store.search("documents", &Query::new(q.clone(), 1)).await?;
    assert_eq!(hits.iter().map(|h| h.chunk_id.as_str()).collect::<Vec<_>>(), vec!["a"]);
    let hits = store.search("documents", &Query::new(q.clone(), 2)).await?;
    assert_eq!(hits.iter().map(|h| h.chunk_id.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
    let filtered = Query::new(q, 1).with_filter(Filter::new().eq("source_document_id", "twins"));
    let hits = store.search("documents", &filtered).await?;
    assert_eq!(hits[0].chunk_id, "a");
    Ok(())
}

#[tokio::test]
async fn memory_store_contract() -> anyhow::Result<()> {
    upsert_then_search_returns_best_first(&MemoryStore::new()).await?;
    filters_restrict_candidates(&MemoryStore::new()).await?;
    same_id_replaces_previous_chunk(&MemoryStore::new()).await?;
    mismatches_are_rejected(&MemoryStore::new()).await?;
    equal_scores_break_ties_by_id(&MemoryStore::new()).await?;
    assert_eq!(MemoryStore::new().health().await, Health::Healthy);
    Ok(())
}

#[tokio::test]
async fn lance_store_round_trip() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    upsert_then_search_returns_best_first(&lance(&tmp).await).await
}

#[tokio::test]
async fn lance_store_filters() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    filters_restrict_candidates(&lance(&tmp).await).await
}

#[tokio::test]
async fn lance_store_last_write_wins() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    same_id_replaces_previous_chunk(&lance(&tmp).await).await
}

#[tokio::test]
async fn lance_store_rejects_mismatches() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let store = lance(&tmp).await;
    mismatches_are_rejected(&store).await?;
    assert!(matches!(store.ensure_collection("meta", 3, Metric::Cosine).await, Err(Error::Config(_))));
    Ok(())
}

#[tokio::test]
async fn lance_store_breaks_ties_by_id() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    equal_scores_break_ties_by_id(&lance(&tmp).await).await
}

#[tokio::test]
async fn racing_handles_keep_the_winning_definition() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let first = lance(&tmp).await;
    let second = lance(&tmp).await;
    let (a, b) = tokio::join!(
        first.ensure_collection("documents", 3, Metric::Cosine),
        second.ensure_collection("documents", 4, Metric::Dot),
    );
    assert!(a.is_ok() != b.is_ok(), "exactly one definition must win: {a:?} / {b:?}");
    let (loser, dimension, metric) = match (a, b) {
        (Ok(()), Err(e)) => (e, 3, Metric::Cosine),
        (Err(e), Ok(())) => (e, 4, Metric::Dot),
        _ => unreachable!(),
    };
    assert!(matches!(loser, Error::Config(_)), "{loser:?}");

    for store in [&first, &second, &lance(&tmp).await] {
        let info = store.collection_info("documents").await?.expect("created by the winner");
        assert_eq!((info.dimension, info.metric), (dimension, metric));
    }
    Ok(())
}

#[tokio::test]
async fn second_handle_cannot_redefine_metric() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let first = lance(&tmp).await;
    first.ensure_collection("documents", 3, Metric::Cosine).await?;

    let second = lance(&tmp).await;
    assert!(matches!(second.ensure_collection("documents", 3, Metric::Dot).await, Err(Error::Config(_))));
    assert!(matches!(second.ensure_collection("documents", 4, Metric::Cosine).await, Err(Error::Config(_))));
    second.ensure_collection("documents", 3, Metric::Cosine).await?;

    let info = first.collection_info("documents").await?.expect("collection");
    assert_eq!(info.metric, Metric::Cosine);
    assert_eq!(info.dimension, 3);
    Ok(())
}

#[tokio::test]
async fn lance_store_survives_reopen() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    {
        let store = lance(&tmp).await;
        store.ensure_collection("documents", 3, Metric::Dot).await?;
        store.upsert("documents", &corpus()).await?;
    }
    let store = lance(&tmp).await;
    store.ensure_collection("documents", 3, Metric::Dot).await?;
    let info = store.collection_info("documents").await?.expect("persisted");
    assert_eq!(info.metric, Metric::Dot);
    assert_eq!(info.count, 3);
    let hits = store.search("documents", &Query::new(vec![1.0, 0.0, 0.0], 1)).await?;
    assert_eq!(hits[0].text, "Claims must be filed within 30 days.");
    Ok(())
}

#[tokio::test]
async fn concurrent_upserts_all_land() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let store = Arc::new(lance(&tmp).await);
    store.ensure_collection("documents", 3, Metric::Cosine).await?;
    let mut handles = Vec::new();
    for worker in 0..4 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let batch: Vec<Chunk> = (0..5)
                .map(|i| chunk(&format!("doc{worker}"), i, &format!("chunk {worker}-{i}"), vec![1.0, worker as f32, i as f32], &[]))
                .collect();
            store.upsert("documents", &batch).await
        }));
    }
    for h in handles {
        assert_eq!(h.await??.len(), 5);
    }
    let info = store.collection_info("documents").await?.expect("collection");
    assert_eq!(info.count, 20);
    assert!(info.version >= 5);
    Ok(())
}

#[tokio::test]
async fn health_reports_reachable_store() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let store = lance(&tmp).await;
    assert_eq!(store.health().await, Health::Healthy);
    assert!(store.health_check().await);
    Ok(())
}
